//! Authentication protocol core
//!
//! # Philosophy
//!
//! The device never signs anything a host chose. Every private-key
//! operation runs on a value the device randomized itself, and every
//! result is checked with the public key before any part of it is released.
//!
//! - [`cooldown`]: who may ask (leaky bucket, presence gesture)
//! - [`owner_key`]: what the owner secret looks like in transit
//! - [`challenge`]: the blind-signed response itself
//!
//! # Anti-patterns (DO NOT IMPLEMENT)
//!
//! - Caching the encrypted owner key between challenges; it is part of the
//!   signed message and must be fresh
//! - Skipping the post-exponentiation check "for speed"
//! - Distinguishing failure causes on the wire (bad index vs. bad key vs.
//!   fault) beyond the rate-limit and presence replies

pub mod challenge;
pub mod cooldown;
pub mod owner_key;

pub use challenge::{ChallengeError, ChallengeRequest};
pub use cooldown::{AuthGate, AuthLimiter, ChallengeMode, Denial, PresenceLatch};
