//! Owner-secret transport encryption
//!
//! The current owner secret leaves the device only as an RSA ciphertext
//! under the authority's public key, using PKCS#1 v1.5 type-2 padding:
//!
//! ```text
//! 00 02 | PS (k - 3 - 16 non-zero random bytes) | 00 | secret (16 bytes)
//! ```
//!
//! Each padding byte is a fresh draw from the random source, redrawn until
//! it is non-zero. The block is rebuilt for every challenge because it is
//! bound into the signed message.

use rand_core::RngCore;
use zeroize::Zeroizing;

use crate::entropy::RandomSource;
use crate::keystore::OWNER_KEY_SIZE;
use crate::rsa::{i2osp, os2ip, RsaError, RsaPublicKey};

/// Smallest padding string PKCS#1 allows
const MIN_PS_LEN: usize = 8;

/// Build the type-2 encryption block for `secret` under a `k`-byte modulus
fn pad_for_encryption<N: RngCore>(
    secret: &[u8; OWNER_KEY_SIZE],
    k: usize,
    random: &mut RandomSource<N>,
    now: u64,
) -> Result<Zeroizing<Vec<u8>>, RsaError> {
    if k < OWNER_KEY_SIZE + 3 + MIN_PS_LEN {
        return Err(RsaError::ModulusTooSmall(k));
    }
    let ps_len = k - 3 - OWNER_KEY_SIZE;

    let mut em = Zeroizing::new(vec![0u8; k]);
    em[1] = 0x02;
    for byte in em[2..2 + ps_len].iter_mut() {
        *byte = random.nonzero_byte(now);
    }
    // em[2 + ps_len] stays 0x00 as the separator
    em[3 + ps_len..].copy_from_slice(secret);
    Ok(em)
}

/// Encrypt the owner secret to the authority. Output is exactly one
/// modulus-width block.
pub fn encrypt_for_transport<N: RngCore>(
    secret: &[u8; OWNER_KEY_SIZE],
    authority: &RsaPublicKey,
    random: &mut RandomSource<N>,
    now: u64,
) -> Result<Vec<u8>, RsaError> {
    let k = authority.size();
    let em = pad_for_encryption(secret, k, random, now)?;
    let m = Zeroizing::new(os2ip(&em));
    let c = authority.public_op(&m)?;
    let block = i2osp(&c, k)?;
    Ok(block.to_vec())
}
