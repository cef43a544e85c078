//! Auth-attempt rate limiting (leaky bucket)
//!
//! Unattended challenges (`CHAL`) are answered without anyone touching the
//! device, so they are metered: up to `auth_max_auths` may be outstanding,
//! and one leaks out every `auth_interval_secs`. Attended challenges
//! (`CHUP`) skip the bucket but need a fresh presence gesture, which is
//! consumed by the challenge.
//!
//! # Threat Model
//!
//! A host that can talk to the link but cannot press the button gets a
//! bounded number of signatures per unit time. The rejection is explicit
//! (`AUTHCOUNT?`) because the bucket state is not secret, and it is issued
//! before any private key material is touched.

use log::{debug, info};

/// Which flavour of challenge is being gated. The discriminant goes on the
/// wire in the version field of a RESP reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMode {
    /// `CHAL`: no user present, metered by the bucket
    Unattended = 0,
    /// `CHUP`: requires a presence gesture
    Attended = 1,
}

impl ChallengeMode {
    pub fn wire_value(self) -> u8 {
        self as u8
    }
}

/// Why a challenge was turned away before any crypto ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// Unattended budget exhausted
    AuthCount,
    /// No presence gesture, or it expired
    UserAbsent,
}

/// Leaky-bucket counter for unattended challenges
#[derive(Debug, Clone)]
pub struct AuthLimiter {
    count: u32,
    last_decay: u64,
    max_auths: u32,
    interval_secs: u64,
}

impl AuthLimiter {
    pub fn new(max_auths: u32, interval_secs: u64, now: u64) -> Self {
        Self {
            count: 0,
            last_decay: now,
            max_auths,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Leak whole intervals elapsed since the last decay. Called once per
    /// protocol-loop iteration; a long sleep leaks several units at once.
    pub fn decay(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_decay);
        if elapsed <= self.interval_secs {
            return;
        }

        let leaked = (elapsed / self.interval_secs).min(u64::from(self.count)) as u32;
        self.last_decay = now;
        self.count -= leaked;
        self.count = self.count.min(self.max_auths);
        if leaked > 0 {
            debug!("Auth counter leaked {} -> {}", leaked, self.count);
        }
    }

    /// Take one unit from the bucket if any remain
    pub fn try_acquire(&mut self) -> bool {
        if self.count >= self.max_auths {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// One-shot presence flag with an expiry
#[derive(Debug, Clone)]
pub struct PresenceLatch {
    armed_at: Option<u64>,
    timeout_secs: u64,
}

impl PresenceLatch {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            armed_at: None,
            timeout_secs,
        }
    }

    /// Record a presence gesture (button press). Returns true if the latch
    /// was not already armed.
    pub fn arm(&mut self, now: u64) -> bool {
        let fresh = !self.is_armed(now);
        self.armed_at = Some(now);
        fresh
    }

    pub fn is_armed(&self, now: u64) -> bool {
        self.armed_at
            .is_some_and(|at| now.saturating_sub(at) <= self.timeout_secs)
    }

    /// Consume the gesture. Returns whether it was present and unexpired.
    pub fn take(&mut self, now: u64) -> bool {
        let present = self.is_armed(now);
        self.armed_at = None;
        present
    }
}

/// Admission control in front of the challenge engine
#[derive(Debug, Clone)]
pub struct AuthGate {
    limiter: AuthLimiter,
    presence: PresenceLatch,
}

impl AuthGate {
    pub fn new(limiter: AuthLimiter, presence: PresenceLatch) -> Self {
        Self { limiter, presence }
    }

    pub fn decay(&mut self, now: u64) {
        self.limiter.decay(now);
    }

    /// Refreshes an armed latch quietly; only a new gesture is logged
    pub fn arm_presence(&mut self, now: u64) -> bool {
        let fresh = self.presence.arm(now);
        if fresh {
            info!("Presence gesture registered");
        }
        fresh
    }

    /// Decide whether a challenge may proceed. Unattended challenges spend
    /// a bucket unit; attended ones spend the presence gesture.
    pub fn should_allow(&mut self, mode: ChallengeMode, now: u64) -> Result<(), Denial> {
        match mode {
            ChallengeMode::Unattended => {
                if self.limiter.try_acquire() {
                    Ok(())
                } else {
                    info!("Unattended challenge refused, auth count exhausted");
                    Err(Denial::AuthCount)
                }
            }
            ChallengeMode::Attended => {
                if self.presence.take(now) {
                    Ok(())
                } else {
                    info!("Attended challenge refused, no presence gesture");
                    Err(Denial::UserAbsent)
                }
            }
        }
    }

    pub fn auth_count(&self) -> u32 {
        self.limiter.count()
    }
}
