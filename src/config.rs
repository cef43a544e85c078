//! Runtime configuration
//!
//! Only the knobs that legitimately differ between hardware variants live
//! here. Record layout and protocol lengths are wire-visible and stay as
//! constants in the modules that own them.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Default record terminator (carriage return on the shipping hardware)
pub const DEFAULT_TERMINATOR: u8 = 0x0D;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Byte that closes every inbound frame and every outbound record
    pub terminator: u8,
    /// Byte that forces a parser reset from any state
    pub sync_byte: u8,
    /// Byte written back after a sync
    pub sync_ack: u8,
    /// Unattended challenges allowed before the leak counter kicks in
    pub auth_max_auths: u32,
    /// Seconds it takes for one unattended challenge to leak out
    pub auth_interval_secs: u64,
    /// Seconds a presence gesture stays valid for a `CHUP`
    pub user_timeout_secs: u64,
    /// Seconds without a completed command before the link counts as idle
    pub idle_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            terminator: DEFAULT_TERMINATOR,
            sync_byte: b'!',
            sync_ack: b'?',
            auth_max_auths: 15,
            auth_interval_secs: 90,
            user_timeout_secs: 60,
            idle_timeout_secs: 5,
        }
    }
}

impl EngineConfig {
    /// Load a TOML config file; missing keys fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_interval_secs == 0 {
            return Err(ConfigError::Invalid("auth_interval_secs must be non-zero"));
        }
        if self.terminator == self.sync_byte {
            return Err(ConfigError::Invalid("terminator and sync byte must differ"));
        }
        // A terminator inside the base64 alphabet would end frames early
        if crate::codec::is_alphabet(self.terminator) {
            return Err(ConfigError::Invalid("terminator must not be a base64 character"));
        }
        // Sync is honored mid-payload, so it must never appear in one
        if crate::codec::is_alphabet(self.sync_byte) || crate::codec::is_whitespace(self.sync_byte) {
            return Err(ConfigError::Invalid(
                "sync byte must not be a base64 or whitespace character",
            ));
        }
        Ok(())
    }
}
