//! Hardware collaborators the engine talks to
//!
//! Everything the protocol core needs from the board (clock, straps,
//! persistent storage, power control, the presence button) goes through
//! [`Platform`]. The byte link goes through [`ByteChannel`].

use std::io::{self, Write};

#[cfg(not(target_os = "espidf"))]
pub mod host;

#[cfg(target_os = "espidf")]
pub mod esp;

pub trait Platform {
    /// Wall-clock seconds; only differences and the low 32 bits matter
    fn now_secs(&self) -> u64;

    /// Whether the service-mode strap is asserted (required for a full wipe)
    fn service_mode(&self) -> bool {
        false
    }

    /// Make an in-memory owner-key erasure permanent
    fn persist_owner_key_erasure(&mut self, slot: usize) -> anyhow::Result<()>;

    /// Destroy all persisted key material
    fn erase_key_material(&mut self) -> anyhow::Result<()>;

    fn power_down(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn reset_host(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Schedule a wake-up at absolute RTC time `at`
    fn set_alarm(&mut self, _at: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Returns `true` once per presence gesture
    fn poll_presence(&mut self) -> bool {
        false
    }
}

/// Blocking byte link to the host
pub trait ByteChannel: Write {
    /// Next byte, or `None` once the peer has gone away
    fn read_byte(&mut self) -> io::Result<Option<u8>>;
}
