//! Byte-at-a-time frame parser
//!
//! ```text
//!                 tag (4)            payload (n)          terminator
//! AwaitingCommand ──────► AwaitingData ─────────► AwaitingTerminator ──► Frame
//!        │  n == 0 ─────────────────────────────────────────────────────► Frame
//!        │  WIPE ──► AwaitingWipeConfirm ── "SURE" ──► WipeConfirmed
//!        └─ sync byte in any state ──► Sync (reset)
//! ```
//!
//! Every abort drops the partial tag and payload. The parser never sees
//! more than [`MAX_PAYLOAD`] payload bytes.

use log::{debug, warn};

use super::{lookup, Command, CommandSpec, MAX_PAYLOAD};

const TAG_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    AwaitingCommand,
    AwaitingData,
    AwaitingTerminator,
    AwaitingWipeConfirm,
}

/// A completed command with its raw (still base64) payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

impl Frame {
    fn bare(command: Command) -> Self {
        Self {
            command,
            payload: heapless::Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    UnknownTag([u8; TAG_LEN]),
    PayloadTooLong(usize),
    BadTerminator(u8),
    WipeNotConfirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// Sync byte seen; parser reset, host expects the ack
    Sync,
    /// Command ready for dispatch
    Frame(Frame),
    /// `SURE` received right after `WIPE`
    WipeConfirmed,
    /// Framing violation; parser reset
    Aborted(AbortReason),
}

pub struct PacketParser {
    state: ParserState,
    tag: heapless::Vec<u8, TAG_LEN>,
    pending: Option<&'static CommandSpec>,
    payload: heapless::Vec<u8, MAX_PAYLOAD>,
    terminator: u8,
    sync_byte: u8,
}

impl PacketParser {
    pub fn new(terminator: u8, sync_byte: u8) -> Self {
        Self {
            state: ParserState::AwaitingCommand,
            tag: heapless::Vec::new(),
            pending: None,
            payload: heapless::Vec::new(),
            terminator,
            sync_byte,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Drop any partial frame and wait for a fresh tag
    pub fn reset(&mut self) {
        self.state = ParserState::AwaitingCommand;
        self.tag.clear();
        self.pending = None;
        self.payload.clear();
    }

    fn abort(&mut self, reason: AbortReason) -> Option<ParseEvent> {
        warn!("Protocol abort: {:?}", reason);
        self.reset();
        Some(ParseEvent::Aborted(reason))
    }

    fn complete(&mut self, frame: Frame) -> Option<ParseEvent> {
        self.reset();
        Some(ParseEvent::Frame(frame))
    }

    /// Push a tag byte; returns the full tag once four have arrived
    fn push_tag(&mut self, byte: u8) -> Option<[u8; TAG_LEN]> {
        // Capacity is TAG_LEN and the buffer is drained at TAG_LEN
        let _ = self.tag.push(byte);
        if self.tag.len() < TAG_LEN {
            return None;
        }
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&self.tag);
        self.tag.clear();
        Some(tag)
    }

    /// Consume one byte from the link
    pub fn feed(&mut self, byte: u8) -> Option<ParseEvent> {
        if byte == self.sync_byte {
            debug!("Sync byte, parser reset");
            self.reset();
            return Some(ParseEvent::Sync);
        }

        match self.state {
            ParserState::AwaitingCommand => {
                // Tolerate a terminator trailing a zero-payload command
                if self.tag.is_empty() && byte == self.terminator {
                    return None;
                }
                let tag = self.push_tag(byte)?;
                self.on_tag(tag)
            }
            ParserState::AwaitingData => {
                let Some(spec) = self.pending else {
                    return self.abort(AbortReason::PayloadTooLong(0));
                };
                if self.payload.push(byte).is_err() {
                    return self.abort(AbortReason::PayloadTooLong(self.payload.len() + 1));
                }
                if self.payload.len() == spec.payload_len {
                    self.state = ParserState::AwaitingTerminator;
                }
                None
            }
            ParserState::AwaitingTerminator => {
                if byte != self.terminator {
                    return self.abort(AbortReason::BadTerminator(byte));
                }
                let Some(spec) = self.pending else {
                    return self.abort(AbortReason::BadTerminator(byte));
                };
                let frame = Frame {
                    command: spec.command,
                    payload: core::mem::take(&mut self.payload),
                };
                self.complete(frame)
            }
            ParserState::AwaitingWipeConfirm => {
                let tag = self.push_tag(byte)?;
                if &tag == b"SURE" {
                    self.reset();
                    Some(ParseEvent::WipeConfirmed)
                } else {
                    self.abort(AbortReason::WipeNotConfirmed)
                }
            }
        }
    }

    fn on_tag(&mut self, tag: [u8; TAG_LEN]) -> Option<ParseEvent> {
        let Some(spec) = lookup(&tag) else {
            return self.abort(AbortReason::UnknownTag(tag));
        };

        if spec.command == Command::Wipe {
            self.reset();
            self.state = ParserState::AwaitingWipeConfirm;
            return Some(ParseEvent::Frame(Frame::bare(Command::Wipe)));
        }
        if spec.payload_len == 0 {
            return self.complete(Frame::bare(spec.command));
        }
        if spec.payload_len > MAX_PAYLOAD {
            return self.abort(AbortReason::PayloadTooLong(spec.payload_len));
        }

        self.pending = Some(spec);
        self.payload.clear();
        self.state = ParserState::AwaitingData;
        None
    }
}
