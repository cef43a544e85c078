//! In-memory view of the persisted key region
//!
//! The region is `MAX_KEYS` private-key records, each padded to
//! `KEY_RECORD_SIZE` bytes, followed by one machine-data record. Field
//! widths are fixed by the 1024-bit device keys and 2048-bit authority key
//! the region was provisioned with; they are part of the storage format and
//! must not drift.
//!
//! Records are not validated as RSA keypairs at load time. A corrupt record
//! only surfaces when a challenge tries to use it.

use log::{debug, info, warn};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::rsa::{RsaCrtKey, RsaError, RsaPublicKey};

/// Number of private-key slots
pub const MAX_KEYS: usize = 21;
/// On-media size of one private-key record
pub const KEY_RECORD_SIZE: usize = 0x200;
/// Number of owner-authorization secret slots
pub const NUM_OWNER_KEYS: usize = 28;
/// Size of one owner-authorization secret
pub const OWNER_KEY_SIZE: usize = 16;
/// Number of entropy seeds in the machine record
pub const NUM_ENTROPY_SEEDS: usize = 16;
/// Size of the per-key identity field
pub const PID_SIZE: usize = 16;

/// Device key modulus width (1024-bit)
pub const DEVICE_MODULUS_SIZE: usize = 128;
/// Device key prime / CRT exponent width
pub const DEVICE_HALF_SIZE: usize = 64;
/// Authority key modulus width (2048-bit)
pub const AUTHORITY_MODULUS_SIZE: usize = 256;

/// Bytes a private-key record actually uses before padding
const KEY_RECORD_USED: usize = PID_SIZE + 5 * DEVICE_HALF_SIZE + DEVICE_MODULUS_SIZE + 4 + 4;

/// Size of the machine-data record
pub const MACHINE_RECORD_SIZE: usize = 16
    + 16
    + 16
    + NUM_OWNER_KEYS * OWNER_KEY_SIZE
    + AUTHORITY_MODULUS_SIZE
    + 4
    + NUM_ENTROPY_SEEDS * 16;

/// Total bytes needed to load a key store
pub const REGION_SIZE: usize = MAX_KEYS * KEY_RECORD_SIZE + MACHINE_RECORD_SIZE;

/// Region offset of the machine-data record
pub const MACHINE_RECORD_OFFSET: usize = MAX_KEYS * KEY_RECORD_SIZE;

/// Region offset of owner-key slot `slot`, for storage that erases in place
pub const fn owner_key_offset(slot: usize) -> usize {
    MACHINE_RECORD_OFFSET + 48 + slot * OWNER_KEY_SIZE
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("key region too short: {actual} bytes, need {REGION_SIZE}")]
    RegionTooShort { actual: usize },
}

/// Storage collaborator that can produce a snapshot of the key region
pub trait RegionSource {
    /// Fill `buf` (exactly `REGION_SIZE` bytes) from the backing medium
    fn read_region(&mut self, buf: &mut [u8]) -> anyhow::Result<()>;
}

/// One RSA-1024 private key in CRT form
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyRecord {
    pid: [u8; PID_SIZE],
    p: [u8; DEVICE_HALF_SIZE],
    q: [u8; DEVICE_HALF_SIZE],
    dp: [u8; DEVICE_HALF_SIZE],
    dq: [u8; DEVICE_HALF_SIZE],
    qi: [u8; DEVICE_HALF_SIZE],
    n: [u8; DEVICE_MODULUS_SIZE],
    e: [u8; 4],
    created: [u8; 4],
}

impl PrivateKeyRecord {
    fn parse(mut bytes: &[u8]) -> Self {
        Self {
            pid: take(&mut bytes),
            p: take(&mut bytes),
            q: take(&mut bytes),
            dp: take(&mut bytes),
            dq: take(&mut bytes),
            qi: take(&mut bytes),
            n: take(&mut bytes),
            e: take(&mut bytes),
            created: take(&mut bytes),
        }
    }

    /// Per-key identity, hashed into every challenge signed with this key
    pub fn pid(&self) -> &[u8; PID_SIZE] {
        &self.pid
    }

    pub fn modulus(&self) -> &[u8; DEVICE_MODULUS_SIZE] {
        &self.n
    }

    pub fn exponent(&self) -> &[u8; 4] {
        &self.e
    }

    /// Creation timestamp as stored (big-endian seconds)
    pub fn created(&self) -> &[u8; 4] {
        &self.created
    }

    pub fn public_key(&self) -> Result<RsaPublicKey, RsaError> {
        RsaPublicKey::from_be_bytes(&self.n, &self.e)
    }

    /// Materialize the CRT private key; fails on degenerate parameters
    pub fn crt_key(&self) -> Result<RsaCrtKey, RsaError> {
        RsaCrtKey::from_be_bytes(
            &self.n, &self.e, &self.p, &self.q, &self.dp, &self.dq, &self.qi,
        )
    }
}

/// Device-wide identity, owner secrets, authority key and entropy seeds
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MachineDataRecord {
    guid: [u8; 16],
    serial: [u8; 16],
    hw_version: [u8; 16],
    owner_keys: [[u8; OWNER_KEY_SIZE]; NUM_OWNER_KEYS],
    authority_n: [u8; AUTHORITY_MODULUS_SIZE],
    authority_e: [u8; 4],
    entropy_seeds: [[u8; 16]; NUM_ENTROPY_SEEDS],
}

impl MachineDataRecord {
    fn parse(mut bytes: &[u8]) -> Self {
        let guid = take(&mut bytes);
        let serial = take(&mut bytes);
        let hw_version = take(&mut bytes);
        let mut owner_keys = [[0u8; OWNER_KEY_SIZE]; NUM_OWNER_KEYS];
        for slot in owner_keys.iter_mut() {
            *slot = take(&mut bytes);
        }
        let authority_n = take(&mut bytes);
        let authority_e = take(&mut bytes);
        let mut entropy_seeds = [[0u8; 16]; NUM_ENTROPY_SEEDS];
        for seed in entropy_seeds.iter_mut() {
            *seed = take(&mut bytes);
        }

        Self {
            guid,
            serial,
            hw_version,
            owner_keys,
            authority_n,
            authority_e,
            entropy_seeds,
        }
    }

    pub fn guid(&self) -> &[u8; 16] {
        &self.guid
    }

    pub fn serial(&self) -> &[u8; 16] {
        &self.serial
    }

    pub fn hw_version(&self) -> &[u8; 16] {
        &self.hw_version
    }

    pub fn entropy_seeds(&self) -> &[[u8; 16]; NUM_ENTROPY_SEEDS] {
        &self.entropy_seeds
    }

    /// Authority public key that owner secrets are encrypted to
    pub fn authority_key(&self) -> Result<RsaPublicKey, RsaError> {
        RsaPublicKey::from_be_bytes(&self.authority_n, &self.authority_e)
    }
}

/// Loaded key region
pub struct KeyStore {
    keys: Vec<PrivateKeyRecord>,
    machine: MachineDataRecord,
}

impl KeyStore {
    /// Decode a region snapshot (file image or flash dump)
    pub fn from_region(region: &[u8]) -> Result<Self, KeyStoreError> {
        if region.len() < REGION_SIZE {
            return Err(KeyStoreError::RegionTooShort {
                actual: region.len(),
            });
        }

        let keys = region[..MAX_KEYS * KEY_RECORD_SIZE]
            .chunks_exact(KEY_RECORD_SIZE)
            .map(|record| PrivateKeyRecord::parse(&record[..KEY_RECORD_USED]))
            .collect();
        let machine = MachineDataRecord::parse(&region[MAX_KEYS * KEY_RECORD_SIZE..REGION_SIZE]);

        debug!("Decoded {} key records and machine data", MAX_KEYS);
        Ok(Self { keys, machine })
    }

    /// Read the region through a storage collaborator
    pub fn load<S: RegionSource>(source: &mut S) -> anyhow::Result<Self> {
        let mut region = Zeroizing::new(vec![0u8; REGION_SIZE]);
        source.read_region(&mut region)?;
        let store = Self::from_region(&region)?;
        info!("Key region loaded ({} bytes)", REGION_SIZE);
        Ok(store)
    }

    /// Resolve a wire-level key index; `None` when out of range
    pub fn key(&self, index: usize) -> Option<&PrivateKeyRecord> {
        self.keys.get(index)
    }

    pub fn machine(&self) -> &MachineDataRecord {
        &self.machine
    }

    /// Index of the first owner-key slot that is not all zero, or
    /// `NUM_OWNER_KEYS` when every slot has been erased
    pub fn current_owner_key_index(&self) -> usize {
        self.machine
            .owner_keys
            .iter()
            .position(|slot| slot.iter().any(|&b| b != 0))
            .unwrap_or(NUM_OWNER_KEYS)
    }

    /// The active owner secret, if any remain
    pub fn current_owner_key(&self) -> Option<&[u8; OWNER_KEY_SIZE]> {
        self.machine.owner_keys.get(self.current_owner_key_index())
    }

    /// Zero one owner-key slot. Returns `false` for an out-of-range slot.
    pub fn erase_owner_key(&mut self, slot: usize) -> bool {
        match self.machine.owner_keys.get_mut(slot) {
            Some(key) => {
                key.zeroize();
                info!("Owner key slot {} erased", slot);
                true
            }
            None => {
                warn!("Ignoring erase of owner key slot {}", slot);
                false
            }
        }
    }

    /// Zero every private key and owner secret held in memory
    pub fn wipe(&mut self) {
        for key in self.keys.iter_mut() {
            key.zeroize();
        }
        self.machine.owner_keys.zeroize();
        warn!("All key material wiped from memory");
    }
}

/// Split a fixed-width field off the front of `bytes`
fn take<const N: usize>(bytes: &mut &[u8]) -> [u8; N] {
    let mut field = [0u8; N];
    field.copy_from_slice(&bytes[..N]);
    *bytes = &bytes[N..];
    field
}
