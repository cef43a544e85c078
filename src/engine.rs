//! The protocol engine: one explicit context for the whole session
//!
//! Owns the key store, random source, admission gate, frame parser and
//! the platform handle. Bytes go in one at a time through [`ProtocolEngine::step`];
//! every reply is written to the supplied writer before `step` returns.

use std::io::{self, Write};

use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::auth::challenge::{respond, ChallengeContext};
use crate::auth::{
    AuthGate, AuthLimiter, ChallengeError, ChallengeMode, ChallengeRequest, Denial, PresenceLatch,
};
use crate::config::{ConfigError, EngineConfig};
use crate::entropy::RandomSource;
use crate::keystore::KeyStore;
use crate::platform::{ByteChannel, Platform};
use crate::protocol::handlers::{self, AlarmRequest};
use crate::protocol::{write_fail, Command, Frame, PacketParser, ParseEvent, ParserState, Reply};

pub struct ProtocolEngine<N: RngCore, P: Platform> {
    config: EngineConfig,
    keys: KeyStore,
    random: RandomSource<N>,
    gate: AuthGate,
    platform: P,
    parser: PacketParser,
    /// Owner-key slot armed by `DLK0`, valid for the next command only
    erase_candidate: Option<u16>,
    last_activity: u64,
}

impl<N: RngCore, P: Platform> ProtocolEngine<N, P> {
    pub fn new(
        config: EngineConfig,
        keys: KeyStore,
        noise: N,
        platform: P,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let now = platform.now_secs();
        let random = RandomSource::new(noise, keys.machine().entropy_seeds());
        let gate = AuthGate::new(
            AuthLimiter::new(config.auth_max_auths, config.auth_interval_secs, now),
            PresenceLatch::new(config.user_timeout_secs),
        );
        let parser = PacketParser::new(config.terminator, config.sync_byte);

        Ok(Self {
            config,
            keys,
            random,
            gate,
            platform,
            parser,
            erase_candidate: None,
            last_activity: now,
        })
    }

    /// Serve one connection until the peer goes away. Link errors are
    /// returned so the caller can reconnect. Parser and handshake state
    /// never carry over to the next connection.
    pub fn run<C: ByteChannel>(&mut self, channel: &mut C) -> io::Result<()> {
        let result = self.serve(channel);
        match &result {
            Ok(()) => info!("Host disconnected"),
            Err(e) => warn!("Link dropped: {}", e),
        }
        self.end_session();
        result
    }

    fn serve<C: ByteChannel>(&mut self, channel: &mut C) -> io::Result<()> {
        while let Some(byte) = channel.read_byte()? {
            self.step(byte, channel)?;
        }
        Ok(())
    }

    fn end_session(&mut self) {
        self.parser.reset();
        self.erase_candidate = None;
    }

    /// Consume one byte from the link
    pub fn step<W: Write>(&mut self, byte: u8, out: &mut W) -> io::Result<()> {
        let now = self.platform.now_secs();
        self.gate.decay(now);
        if self.platform.poll_presence() {
            self.gate.arm_presence(now);
        }

        match self.parser.feed(byte) {
            None => Ok(()),
            Some(ParseEvent::Sync) => {
                self.erase_candidate = None;
                out.write_all(&[self.config.sync_ack])?;
                out.flush()
            }
            Some(ParseEvent::Aborted(_)) => {
                self.erase_candidate = None;
                Ok(())
            }
            Some(ParseEvent::WipeConfirmed) => {
                self.last_activity = now;
                self.erase_candidate = None;
                self.confirm_wipe(out)
            }
            Some(ParseEvent::Frame(frame)) => {
                self.last_activity = now;
                self.dispatch(frame, now, out)
            }
        }
    }

    fn dispatch<W: Write>(&mut self, frame: Frame, now: u64, out: &mut W) -> io::Result<()> {
        let term = self.config.terminator;
        let erase_candidate = self.erase_candidate.take();
        debug!("Command {:?}", frame.command);

        match frame.command {
            Command::Chal => self.challenge(&frame.payload, ChallengeMode::Unattended, now, out),
            Command::Chup => self.challenge(&frame.payload, ChallengeMode::Attended, now, out),
            Command::Auth => {
                debug!("AUTH frame ignored");
                Ok(())
            }
            Command::Dlk0 => {
                self.erase_candidate = handlers::decode_index(&frame.payload);
                if self.erase_candidate.is_none() {
                    warn!("Malformed DLK0 payload");
                }
                Ok(())
            }
            Command::Dlk1 => self.erase_owner_key(erase_candidate, &frame.payload, out),
            Command::Pkey => handlers::public_key(out, term, &self.keys, &frame.payload),
            Command::Pidx => handlers::key_pid(out, term, &self.keys, &frame.payload),
            Command::Alrm => {
                let mut request = AlarmRequest::parse(&frame.payload, now);
                if let AlarmRequest::At(at) = request {
                    if let Err(e) = self.platform.set_alarm(at) {
                        warn!("Setting wake alarm failed: {}", e);
                        request = AlarmRequest::Malformed;
                    }
                }
                handlers::alarm_reply(out, term, request)
            }
            Command::Vers => handlers::version(out, term),
            Command::Hwvr => handlers::hardware_version(out, term, &self.keys),
            Command::Snum => handlers::serial_number(out, term, &self.keys),
            Command::Ckey => handlers::current_owner_key(out, term, &self.keys),
            Command::Time => handlers::time(out, term, now),
            Command::Down => {
                if let Err(e) = self.platform.power_down() {
                    error!("Power-down failed: {}", e);
                }
                Ok(())
            }
            Command::Rset => {
                if let Err(e) = self.platform.reset_host() {
                    error!("Host reset failed: {}", e);
                }
                Ok(())
            }
            Command::Wipe => {
                warn!("Full wipe stage 1 unlocked");
                Reply::new(out, term)
                    .text("WARNING: UNLOCK STAGE 1 PASSED.\n")?
                    .finish()
            }
            Command::Sure => {
                warn!("SURE without WIPE");
                Reply::new(out, term)
                    .text("UNLOCK STAGE 2 FAILED.\n")?
                    .finish()
            }
        }
    }

    fn challenge<W: Write>(
        &mut self,
        payload: &[u8],
        mode: ChallengeMode,
        now: u64,
        out: &mut W,
    ) -> io::Result<()> {
        let term = self.config.terminator;

        if let Err(denial) = self.gate.should_allow(mode, now) {
            let text = match denial {
                Denial::AuthCount => "AUTHCOUNT?\n",
                Denial::UserAbsent => "USER\n",
            };
            return Reply::new(out, term).text(text)?.finish();
        }

        let request = match ChallengeRequest::parse(payload, mode) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting challenge: {}", e);
                return write_fail(out, term);
            }
        };

        let ctx = ChallengeContext {
            keys: &self.keys,
            random: &mut self.random,
            now,
        };
        match respond(ctx, &request, out) {
            Ok(()) => {
                out.write_all(&[term])?;
                out.flush()
            }
            Err(ChallengeError::Io(e)) => Err(e),
            Err(e) => {
                warn!("Challenge on key {} failed: {}", request.key_index, e);
                write_fail(out, term)
            }
        }
    }

    /// Second half of the `DLK0`/`DLK1` handshake. Silent on success; a
    /// slot that could not be erased in storage is reported as `FAIL`.
    fn erase_owner_key<W: Write>(
        &mut self,
        armed: Option<u16>,
        payload: &[u8],
        out: &mut W,
    ) -> io::Result<()> {
        let confirmed = handlers::decode_index(payload);
        let slot = match (armed, confirmed) {
            (Some(a), Some(c)) if a == c => usize::from(a),
            (None, _) => {
                warn!("DLK1 without DLK0");
                return Ok(());
            }
            _ => {
                warn!("DLK1 does not match DLK0");
                return Ok(());
            }
        };

        if !self.keys.erase_owner_key(slot) {
            return Ok(());
        }
        match self.platform.persist_owner_key_erasure(slot) {
            Ok(()) => {
                debug!("Owner key {} erasure persisted", slot);
                Ok(())
            }
            Err(e) => {
                error!("Persisting owner key {} erasure failed: {}", slot, e);
                write_fail(out, self.config.terminator)
            }
        }
    }

    fn confirm_wipe<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        let term = self.config.terminator;

        if !self.platform.service_mode() {
            warn!("Wipe refused, service mode not asserted");
            return Reply::new(out, term)
                .text("SERVICE MODE NOT ASSERTED.\n")?
                .finish();
        }

        let mut reply = Reply::new(out, term);
        reply.text("UNLOCK STAGE 2 SUCCESS.\n")?;
        reply.writer().flush()?;

        self.keys.wipe();
        if let Err(e) = self.platform.erase_key_material() {
            // Storage still holds the keys; they come back on the next boot
            error!("Erasing persisted key material failed: {}", e);
            return reply.text("FAIL")?.finish();
        }

        reply.text("NO MORE SECRETS.\n")?.finish()?;
        if let Err(e) = self.platform.reset_host() {
            error!("Host reset failed: {}", e);
        }
        Ok(())
    }

    /// Time of the last completed command
    pub fn last_activity(&self) -> u64 {
        self.last_activity
    }

    /// Whether the link has been quiet for the configured idle timeout
    pub fn is_idle(&self, now: u64) -> bool {
        now.saturating_sub(self.last_activity) >= self.config.idle_timeout_secs
    }

    pub fn auth_count(&self) -> u32 {
        self.gate.auth_count()
    }

    pub fn parser_state(&self) -> ParserState {
        self.parser.state()
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }
}
