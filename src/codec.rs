//! Base64 framing for the byte link
//!
//! Inbound payloads are base64 text that may be broken across lines, so the
//! decoder skips whitespace but refuses anything else outside the alphabet.
//! Outbound records are standard base64 wrapped at 64 columns, the layout
//! the host-side tooling has always parsed.

use std::io::{self, Write};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use thiserror::Error;

/// Output line width in characters
const LINE_WIDTH: usize = 64;

/// Standard alphabet, canonical padding, but tolerant of non-zero trailing
/// bits the way older host encoders emit them
const WIRE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Base64Error {
    #[error("invalid base64 character 0x{0:02x}")]
    InvalidCharacter(u8),
    #[error("base64 length {0} is not a multiple of 4")]
    Length(usize),
    #[error("malformed base64 quantum")]
    Malformed,
}

/// Whitespace the decoder skips
pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

/// Characters that carry base64 data (including padding)
pub fn is_alphabet(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')
}

/// Decode a base64 payload, skipping embedded whitespace
pub fn decode(input: &[u8]) -> Result<Vec<u8>, Base64Error> {
    let mut significant = Vec::with_capacity(input.len());
    for &b in input {
        if is_whitespace(b) {
            continue;
        }
        if !is_alphabet(b) {
            return Err(Base64Error::InvalidCharacter(b));
        }
        significant.push(b);
    }

    if significant.len() % 4 != 0 {
        return Err(Base64Error::Length(significant.len()));
    }

    WIRE.decode(&significant).map_err(|_| Base64Error::Malformed)
}

/// Encode `data` as base64 text with a newline every 64 characters and a
/// closing newline on a partial last line. Empty input encodes to nothing.
pub fn encode_wrapped(data: &[u8]) -> String {
    let flat = WIRE.encode(data);
    let mut out = String::with_capacity(flat.len() + flat.len() / LINE_WIDTH + 1);
    for (i, c) in flat.chars().enumerate() {
        out.push(c);
        if (i + 1) % LINE_WIDTH == 0 {
            out.push('\n');
        }
    }
    if flat.len() % LINE_WIDTH != 0 {
        out.push('\n');
    }
    out
}

/// Write one base64 record body to the link
pub fn write_record<W: Write>(out: &mut W, data: &[u8]) -> io::Result<()> {
    out.write_all(encode_wrapped(data).as_bytes())
}
