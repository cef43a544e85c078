//! Random byte source
//!
//! Every 16-byte value the protocol draws (server nonces, padding bytes,
//! secret blinding factors) comes from here. Each draw feeds SHA-1 with:
//! - one of the per-device entropy seeds, picked by the noise sample
//! - the current time (32-bit, little-endian)
//! - the 16-bit noise sample itself
//! - the running 20-byte pool
//!
//! The digest replaces the pool and bytes 1..17 of it are returned.
//!
//! IMPORTANT: the quality of this source is bounded by the noise input.
//! The original boards sampled a floating ADC pin, which is weak. Anything
//! implementing `rand_core::RngCore` can be plugged in as the noise source;
//! on real hardware that should be the chip's TRNG (see
//! `platform::esp::TrngNoise`).

use rand_core::RngCore;
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

use crate::keystore::NUM_ENTROPY_SEEDS;

/// Size of every value handed out
pub const BLOCK_SIZE: usize = 16;

/// Pool contents at power-on, before the first draw mixes anything in
const POOL_INIT: [u8; 20] = [
    0x01, 0x0D, 0x0E, 0x0A, 0x0D, 0x0B, 0x0E, 0x0E, 0x0F, 0x05, 0x10, 0xD0, 0xE0, 0xA0, 0xD0,
    0xB0, 0xE0, 0xE0, 0xF0, 0x50,
];

/// Seeded SHA-1 mixer over an injectable noise source
pub struct RandomSource<N: RngCore> {
    noise: N,
    seeds: Zeroizing<[[u8; 16]; NUM_ENTROPY_SEEDS]>,
    pool: Zeroizing<[u8; 20]>,
}

impl<N: RngCore> RandomSource<N> {
    pub fn new(noise: N, seeds: &[[u8; 16]; NUM_ENTROPY_SEEDS]) -> Self {
        Self {
            noise,
            seeds: Zeroizing::new(*seeds),
            pool: Zeroizing::new(POOL_INIT),
        }
    }

    /// Draw one 16-byte value
    pub fn next_block(&mut self, now: u64) -> Zeroizing<[u8; BLOCK_SIZE]> {
        let sample = (self.noise.next_u32() & 0xFFFF) as u16;
        let seed = &self.seeds[usize::from(sample & 0x0F)];

        let mut hasher = Sha1::new();
        hasher.update(seed);
        hasher.update((now as u32).to_le_bytes());
        hasher.update(sample.to_le_bytes());
        hasher.update(&self.pool[..]);
        self.pool.copy_from_slice(&hasher.finalize());

        let mut block = Zeroizing::new([0u8; BLOCK_SIZE]);
        block.copy_from_slice(&self.pool[1..1 + BLOCK_SIZE]);
        block
    }

    /// Draw until the first byte of a block is non-zero and return it.
    /// Used for PKCS#1 type-2 padding, which forbids zero bytes.
    pub fn nonzero_byte(&mut self, now: u64) -> u8 {
        loop {
            let block = self.next_block(now);
            if block[0] != 0 {
                return block[0];
            }
        }
    }
}
