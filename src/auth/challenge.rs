//! Blind-signed challenge response
//!
//! A challenge carries a key index `x` and a client nonce `rn`. The reply
//! proves possession of private key `x` and ships the current owner secret
//! encrypted to the authority:
//!
//! 1. Draw a server nonce `rm`
//! 2. Hash the key's PID: `h = SHA1(PID_x)`
//! 3. Encrypt the owner secret: `PAQS = RSA_aqs(pad2(OK))`
//! 4. Send `PAQS || rm || vers` straight away (untrusted until the
//!    signature checks out)
//! 5. Sign `PAQS || rn || rm || x || h || vers` with key `x`
//! 6. Send the signature
//!
//! The private-key operation never runs on host-chosen input. The padded
//! digest is multiplied by `rm^e` and then by `rb^e` for a secret, per-call
//! `rb`, the CRT exponentiation runs on that, and the result is checked
//! with the public exponent before `rb` is divided back out. A faulted CRT
//! half fails the check and nothing derived from it leaves the device.

use std::io::Write;

use log::{debug, error};
use num_bigint_dig::{BigInt, BigUint, ModInverse};
use rand_core::RngCore;
use sha1::{Digest, Sha1};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::auth::cooldown::ChallengeMode;
use crate::auth::owner_key::encrypt_for_transport;
use crate::codec::{self, Base64Error};
use crate::entropy::RandomSource;
use crate::keystore::{KeyStore, DEVICE_MODULUS_SIZE};
use crate::rsa::{i2osp, os2ip, pkcs1_sha1_signature_pad, RsaCrtKey, RsaError};
use crate::{MAJOR_VERSION, MINOR_VERSION};

/// Client and server nonce width
pub const NONCE_SIZE: usize = 16;

/// Wire length of a `CHAL`/`CHUP` payload
pub const CHALLENGE_PAYLOAD_LEN: usize = 29;

/// Payload offsets: base64 key index, separator, base64 nonce
const INDEX_FIELD: core::ops::Range<usize> = 0..4;
const SEPARATOR: usize = 4;
const NONCE_FIELD: core::ops::Range<usize> = 5..CHALLENGE_PAYLOAD_LEN;

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("malformed challenge payload: {0}")]
    Payload(#[from] Base64Error),
    #[error("challenge field has wrong length")]
    FieldLength,
    #[error("bad field separator 0x{0:02x}")]
    Separator(u8),
    #[error("key index out of range")]
    KeyIndex,
    #[error("no active owner key")]
    NoOwnerKey,
    #[error("rsa: {0}")]
    Rsa(#[from] RsaError),
    #[error("signature consistency check failed")]
    ConsistencyCheck,
    #[error("link write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded challenge payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRequest {
    pub key_index: u16,
    pub client_nonce: [u8; NONCE_SIZE],
    pub mode: ChallengeMode,
}

impl ChallengeRequest {
    /// Parse `base64(x, 2 bytes LE) '\n' base64(rn, 16 bytes)`
    pub fn parse(payload: &[u8], mode: ChallengeMode) -> Result<Self, ChallengeError> {
        if payload.len() < CHALLENGE_PAYLOAD_LEN {
            return Err(ChallengeError::FieldLength);
        }

        let separator = payload[SEPARATOR];
        if !codec::is_whitespace(separator) {
            return Err(ChallengeError::Separator(separator));
        }

        let index = codec::decode(&payload[INDEX_FIELD])?;
        let index: [u8; 2] = index
            .as_slice()
            .try_into()
            .map_err(|_| ChallengeError::FieldLength)?;

        let nonce = codec::decode(&payload[NONCE_FIELD])?;
        let client_nonce: [u8; NONCE_SIZE] = nonce
            .as_slice()
            .try_into()
            .map_err(|_| ChallengeError::FieldLength)?;

        Ok(Self {
            key_index: u16::from_le_bytes(index),
            client_nonce,
            mode,
        })
    }
}

/// Everything a challenge needs from the engine, borrowed for one call
pub struct ChallengeContext<'a, N: RngCore> {
    pub keys: &'a KeyStore,
    pub random: &'a mut RandomSource<N>,
    pub now: u64,
}

/// Run one challenge and write the `RESP` reply (without the terminator).
///
/// Nothing is written before the key, owner secret and transport block
/// are all in hand. If a later step fails, the caller appends `FAIL`.
pub fn respond<N: RngCore, W: Write>(
    ctx: ChallengeContext<'_, N>,
    request: &ChallengeRequest,
    out: &mut W,
) -> Result<(), ChallengeError> {
    let x = usize::from(request.key_index);
    let record = ctx.keys.key(x).ok_or(ChallengeError::KeyIndex)?;
    let key = record.crt_key()?;

    let rm = ctx.random.next_block(ctx.now);
    let pid_hash = Sha1::digest(record.pid());

    let owner_key = ctx
        .keys
        .current_owner_key()
        .ok_or(ChallengeError::NoOwnerKey)?;
    let authority = ctx.keys.machine().authority_key()?;
    let paqs = encrypt_for_transport(owner_key, &authority, ctx.random, ctx.now)?;

    // Record 1: PAQS || rm || vers(major, minor, mode, 0)
    let mut record1 = Vec::with_capacity(paqs.len() + NONCE_SIZE + 4);
    record1.extend_from_slice(&paqs);
    record1.extend_from_slice(&rm[..]);
    record1.extend_from_slice(&[MAJOR_VERSION, MINOR_VERSION, request.mode.wire_value(), 0]);
    out.write_all(b"RESP")?;
    codec::write_record(out, &record1)?;
    out.flush()?;

    // Signed message: PAQS || rn || rm || x (BE) || h(PID) || vers(major, minor, 0, 0)
    let mut message = Vec::with_capacity(paqs.len() + 2 * NONCE_SIZE + 4 + 20 + 4);
    message.extend_from_slice(&paqs);
    message.extend_from_slice(&request.client_nonce);
    message.extend_from_slice(&rm[..]);
    message.extend_from_slice(&(x as u32).to_be_bytes());
    message.extend_from_slice(&pid_hash);
    message.extend_from_slice(&[MAJOR_VERSION, MINOR_VERSION, 0, 0]);

    let digest: [u8; 20] = Sha1::digest(&message).into();
    let padded = pkcs1_sha1_signature_pad(&digest, DEVICE_MODULUS_SIZE)?;

    let rb = ctx.random.next_block(ctx.now);
    let signature = blind_sign(&key, &rm[..], &padded, &rb[..])?;
    let signature = i2osp(&signature, key.public().size())?;

    codec::write_record(out, &signature)?;
    debug!("Challenge answered with key {}", x);
    Ok(())
}

/// Sign an already padded message without exposing the CRT exponentiation
/// to it directly.
///
/// `rm` is the public first blinding base, `rb` the secret second one. The
/// exponentiation result is checked against `mSecBlind` before unblinding.
/// Only `rb` is divided back out: the result is `rm * m^d mod n`, and the
/// verifier strips `rm` using the copy it received in the first record
/// (see [`verify_response`]).
pub fn blind_sign(
    key: &RsaCrtKey,
    rm: &[u8],
    padded: &[u8],
    rb: &[u8],
) -> Result<Zeroizing<BigUint>, ChallengeError> {
    let public = key.public();
    let n = public.n();

    let m = Zeroizing::new(os2ip(padded));
    let rm = Zeroizing::new(os2ip(rm) % n);
    let b = Zeroizing::new(public.public_op(&rm)?);
    let t = Zeroizing::new(&*b * &*m);
    let m_blind = Zeroizing::new(&*t % n);

    let rb = Zeroizing::new(os2ip(rb));
    let rb = Zeroizing::new(&*rb % n);
    let b_prime = Zeroizing::new(public.public_op(&rb)?);
    let t = Zeroizing::new(&*b_prime * &*m_blind);
    let m_sec_blind = Zeroizing::new(&*t % n);

    let s = key.private_op(&m_sec_blind)?;

    // Fault check: s must map back onto exactly what went in
    let check = Zeroizing::new(public.public_op(&s)?);
    if *check != *m_sec_blind {
        error!("Signature consistency check failed, discarding result");
        return Err(ChallengeError::ConsistencyCheck);
    }

    let rb_inv_signed: Zeroizing<BigInt> = Zeroizing::new(
        BigUint::clone(&rb)
            .mod_inverse(n)
            .ok_or(RsaError::NotInvertible)?,
    );
    let rb_inv = Zeroizing::new(rb_inv_signed.to_biguint().ok_or(RsaError::NotInvertible)?);
    let t = Zeroizing::new(&*rb_inv * &*s);
    Ok(Zeroizing::new(&*t % n))
}

/// Authority-side check of a challenge signature: `sig^e == rm^e * m`.
pub fn verify_response(
    public: &crate::rsa::RsaPublicKey,
    rm: &[u8],
    padded: &[u8],
    signature: &[u8],
) -> bool {
    let n = public.n();
    let rm = os2ip(rm) % n;
    let expected = match (public.public_op(&rm), os2ip(padded)) {
        (Ok(b), m) => (b * m) % n,
        _ => return false,
    };
    matches!(public.public_op(&os2ip(signature)), Ok(s) if s == expected)
}
