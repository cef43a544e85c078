//! OwnerGuard - owner-key custody engine for a serial-attached cryptoprocessor
//!
//! The device holds a set of RSA private keys and a table of owner
//! authorization secrets. Over a narrow byte link it will:
//! 1. Prove possession of a per-key private key (blind-signed challenge)
//! 2. Hand out the current owner secret, encrypted to the authority key
//! 3. Answer a handful of identity queries (serial, version, public keys)
//!
//! Everything else (the byte channel, flash, buttons, power rails) is reached
//! through the [`platform::Platform`] trait so the protocol engine runs the
//! same on the device and on a host.

pub mod auth;
pub mod codec;
pub mod config;
pub mod engine;
pub mod entropy;
pub mod keystore;
pub mod platform;
pub mod protocol;
pub mod rsa;

pub use config::EngineConfig;
pub use engine::ProtocolEngine;
pub use keystore::KeyStore;

/// Firmware major version, reported by `VERS` and bound into every signature
pub const MAJOR_VERSION: u8 = 7;
/// Firmware minor version
pub const MINOR_VERSION: u8 = 1;
