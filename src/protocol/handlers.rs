//! Replies for the non-challenge commands
//!
//! Each handler writes one complete record, terminator included.

use std::io::{self, Write};

use log::{debug, info};

use super::{write_fail, Reply};
use crate::codec;
use crate::keystore::{KeyStore, DEVICE_MODULUS_SIZE};
use crate::{MAJOR_VERSION, MINOR_VERSION};

const PGP_BEGIN: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----\n";
const PGP_END: &str = "-----END PGP PUBLIC KEY BLOCK-----\n";

/// OpenPGP v3 public-key packet body length
pub const PGP_V3_PACKET_LEN: usize = 1 + 4 + 2 + 1 + 2 + DEVICE_MODULUS_SIZE + 2 + 4;

/// Decode a base64 little-endian key index (exactly 2 bytes)
pub fn decode_index(payload: &[u8]) -> Option<u16> {
    let bytes = codec::decode(payload).ok()?;
    let bytes: [u8; 2] = bytes.as_slice().try_into().ok()?;
    Some(u16::from_le_bytes(bytes))
}

/// Decode a base64 little-endian 32-bit value (exactly 4 bytes)
pub fn decode_u32(payload: &[u8]) -> Option<u32> {
    let bytes = codec::decode(payload).ok()?;
    let bytes: [u8; 4] = bytes.as_slice().try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// `VRSR`: three little-endian u16 words `[0, MINOR, MAJOR]`
pub fn version<W: Write>(out: &mut W, terminator: u8) -> io::Result<()> {
    let words = [0u16, u16::from(MINOR_VERSION), u16::from(MAJOR_VERSION)];
    let mut body = [0u8; 6];
    for (chunk, word) in body.chunks_exact_mut(2).zip(words) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    Reply::new(out, terminator).text("VRSR")?.record(&body)?.finish()
}

pub fn hardware_version<W: Write>(out: &mut W, terminator: u8, keys: &KeyStore) -> io::Result<()> {
    Reply::new(out, terminator)
        .text("HVRS")?
        .record(keys.machine().hw_version())?
        .finish()
}

pub fn serial_number<W: Write>(out: &mut W, terminator: u8, keys: &KeyStore) -> io::Result<()> {
    Reply::new(out, terminator)
        .text("SNUM")?
        .record(keys.machine().serial())?
        .finish()
}

/// `CKEY`: index of the current owner key; the "none left" sentinel is
/// reported as-is so the host can tell the device is exhausted
pub fn current_owner_key<W: Write>(out: &mut W, terminator: u8, keys: &KeyStore) -> io::Result<()> {
    let index = keys.current_owner_key_index() as u32;
    Reply::new(out, terminator)
        .text("CKEY")?
        .record(&index.to_le_bytes())?
        .finish()
}

pub fn time<W: Write>(out: &mut W, terminator: u8, now: u64) -> io::Result<()> {
    Reply::new(out, terminator)
        .text("TIME")?
        .record(&(now as u32).to_le_bytes())?
        .finish()
}

/// `PIDX`: the 16-byte PID of key `x`
pub fn key_pid<W: Write>(
    out: &mut W,
    terminator: u8,
    keys: &KeyStore,
    payload: &[u8],
) -> io::Result<()> {
    let Some(record) = decode_index(payload).and_then(|x| keys.key(usize::from(x))) else {
        return write_fail(out, terminator);
    };
    Reply::new(out, terminator)
        .text("PIDX")?
        .record(record.pid())?
        .finish()
}

/// Serialize key `x` as an OpenPGP v3 public-key packet body
pub fn pgp_v3_packet(keys: &KeyStore, index: usize) -> Option<[u8; PGP_V3_PACKET_LEN]> {
    let record = keys.key(index)?;
    let mut packet = [0u8; PGP_V3_PACKET_LEN];
    let mut at = 0;
    let mut put = |bytes: &[u8]| {
        packet[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };
    put(&[0x03]);
    put(record.created());
    // validity: never expires
    put(&[0x00, 0x00]);
    // RSA encrypt-or-sign
    put(&[0x01]);
    put(&((DEVICE_MODULUS_SIZE * 8) as u16).to_be_bytes());
    put(record.modulus());
    put(&32u16.to_be_bytes());
    put(record.exponent());
    Some(packet)
}

/// `PKEY`: ASCII-armored public key of key `x`
pub fn public_key<W: Write>(
    out: &mut W,
    terminator: u8,
    keys: &KeyStore,
    payload: &[u8],
) -> io::Result<()> {
    let packet = decode_index(payload).and_then(|x| pgp_v3_packet(keys, usize::from(x)));
    let Some(packet) = packet else {
        return write_fail(out, terminator);
    };
    Reply::new(out, terminator)
        .text(PGP_BEGIN)?
        .record(&packet)?
        .text(PGP_END)?
        .finish()
}

/// Outcome of an `ALRM` request, decided before touching the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmRequest {
    At(u32),
    Overflow,
    Malformed,
}

impl AlarmRequest {
    /// Absolute wake time for an offset from `now`, in 32-bit RTC seconds
    pub fn parse(payload: &[u8], now: u64) -> Self {
        let Some(offset) = decode_u32(payload) else {
            return Self::Malformed;
        };
        match (now as u32).checked_add(offset) {
            Some(at) => Self::At(at),
            None => Self::Overflow,
        }
    }
}

pub fn alarm_reply<W: Write>(out: &mut W, terminator: u8, request: AlarmRequest) -> io::Result<()> {
    match request {
        AlarmRequest::At(at) => {
            info!("Wake alarm set for {}", at);
            Reply::new(out, terminator).text("ASET\n")?.finish()
        }
        AlarmRequest::Overflow => {
            debug!("Wake alarm offset overflows the RTC");
            Reply::new(out, terminator).text("OVFW\n")?.finish()
        }
        AlarmRequest::Malformed => write_fail(out, terminator),
    }
}
