//! RSA primitives on top of `num-bigint-dig`
//!
//! Only the raw operations the protocol needs: public exponentiation, CRT
//! private exponentiation, PKCS#1 v1.5 SHA-1 signature padding and the
//! fixed-width integer/octet-string conversions. Every intermediate that
//! touches private parameters lives in a `Zeroizing` wrapper.

use num_bigint_dig::BigUint;
use num_traits::{One, Zero};
use thiserror::Error;
use zeroize::Zeroizing;

/// SHA-1 digest length
pub const SHA1_LEN: usize = 20;

/// DER prefix of a DigestInfo carrying a SHA-1 digest
pub const SHA1_DIGEST_INFO: [u8; 15] = [
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RsaError {
    #[error("degenerate key parameter: {0}")]
    InvalidKey(&'static str),
    #[error("message representative out of range")]
    MessageOutOfRange,
    #[error("integer too large for {0}-byte encoding")]
    IntegerTooLarge(usize),
    #[error("modulus of {0} bytes too small for padding")]
    ModulusTooSmall(usize),
    #[error("value has no inverse modulo n")]
    NotInvertible,
}

/// RSA public key with its modulus width in bytes
#[derive(Clone, Debug)]
pub struct RsaPublicKey {
    n: BigUint,
    e: BigUint,
    size: usize,
}

impl RsaPublicKey {
    /// Build from big-endian fields; the modulus width is the field width
    pub fn from_be_bytes(n: &[u8], e: &[u8]) -> Result<Self, RsaError> {
        let modulus = BigUint::from_bytes_be(n);
        let exponent = BigUint::from_bytes_be(e);
        if modulus <= BigUint::one() {
            return Err(RsaError::InvalidKey("n"));
        }
        if exponent.is_zero() {
            return Err(RsaError::InvalidKey("e"));
        }
        Ok(Self {
            n: modulus,
            e: exponent,
            size: n.len(),
        })
    }

    /// Modulus width in bytes (`k` in PKCS#1)
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn n(&self) -> &BigUint {
        &self.n
    }

    pub fn e(&self) -> &BigUint {
        &self.e
    }

    /// `m^e mod n`
    pub fn public_op(&self, m: &BigUint) -> Result<BigUint, RsaError> {
        if m >= &self.n {
            return Err(RsaError::MessageOutOfRange);
        }
        Ok(m.modpow(&self.e, &self.n))
    }
}

/// RSA private key in CRT form (`qi = q^-1 mod p`)
pub struct RsaCrtKey {
    public: RsaPublicKey,
    p: Zeroizing<BigUint>,
    q: Zeroizing<BigUint>,
    dp: Zeroizing<BigUint>,
    dq: Zeroizing<BigUint>,
    qi: Zeroizing<BigUint>,
}

impl RsaCrtKey {
    #[allow(clippy::too_many_arguments)]
    pub fn from_be_bytes(
        n: &[u8],
        e: &[u8],
        p: &[u8],
        q: &[u8],
        dp: &[u8],
        dq: &[u8],
        qi: &[u8],
    ) -> Result<Self, RsaError> {
        let public = RsaPublicKey::from_be_bytes(n, e)?;
        let p = Zeroizing::new(BigUint::from_bytes_be(p));
        let q = Zeroizing::new(BigUint::from_bytes_be(q));
        if *p <= BigUint::one() {
            return Err(RsaError::InvalidKey("p"));
        }
        if *q <= BigUint::one() {
            return Err(RsaError::InvalidKey("q"));
        }
        Ok(Self {
            public,
            p,
            q,
            dp: Zeroizing::new(BigUint::from_bytes_be(dp)),
            dq: Zeroizing::new(BigUint::from_bytes_be(dq)),
            qi: Zeroizing::new(BigUint::from_bytes_be(qi)),
        })
    }

    pub fn public(&self) -> &RsaPublicKey {
        &self.public
    }

    /// `c^d mod n` via Garner's recombination. No output check here; the
    /// caller must verify the result before releasing anything derived
    /// from it.
    pub fn private_op(&self, c: &BigUint) -> Result<Zeroizing<BigUint>, RsaError> {
        if c >= self.public.n() {
            return Err(RsaError::MessageOutOfRange);
        }
        let p: &BigUint = &self.p;
        let q: &BigUint = &self.q;

        let m1 = Zeroizing::new(c.modpow(&self.dp, p));
        let m2 = Zeroizing::new(c.modpow(&self.dq, q));
        let m2_mod_p = Zeroizing::new(&*m2 % p);
        // m1 < p, so adding p keeps the difference non-negative
        let lifted = Zeroizing::new(&*m1 + p);
        let diff = Zeroizing::new(&*lifted - &*m2_mod_p);
        let t = Zeroizing::new(&*self.qi * &*diff);
        let h = Zeroizing::new(&*t % p);
        let hq = Zeroizing::new(&*h * q);
        Ok(Zeroizing::new(&*m2 + &*hq))
    }
}

/// Big-endian integer to octet string of exactly `len` bytes
pub fn i2osp(x: &BigUint, len: usize) -> Result<Zeroizing<Vec<u8>>, RsaError> {
    let bytes = Zeroizing::new(x.to_bytes_be());
    // to_bytes_be encodes zero as a single 0x00
    let significant = if x.is_zero() { &bytes[..0] } else { &bytes[..] };
    if significant.len() > len {
        return Err(RsaError::IntegerTooLarge(len));
    }
    let mut out = Zeroizing::new(vec![0u8; len]);
    out[len - significant.len()..].copy_from_slice(significant);
    Ok(out)
}

/// Octet string to big-endian integer
pub fn os2ip(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

/// EMSA-PKCS1-v1_5 encoding of a SHA-1 digest for a `k`-byte modulus:
/// `00 01 FF..FF 00 DigestInfo digest`
pub fn pkcs1_sha1_signature_pad(
    digest: &[u8; SHA1_LEN],
    k: usize,
) -> Result<Zeroizing<Vec<u8>>, RsaError> {
    let t_len = SHA1_DIGEST_INFO.len() + SHA1_LEN;
    // PKCS#1 requires at least 8 bytes of 0xFF
    if k < t_len + 11 {
        return Err(RsaError::ModulusTooSmall(k));
    }
    let mut em = Zeroizing::new(vec![0xFFu8; k]);
    em[0] = 0x00;
    em[1] = 0x01;
    em[k - t_len - 1] = 0x00;
    em[k - t_len..k - SHA1_LEN].copy_from_slice(&SHA1_DIGEST_INFO);
    em[k - SHA1_LEN..].copy_from_slice(digest);
    Ok(em)
}
