//! Wire protocol: command table, frame parser and reply handlers
//!
//! A frame is `TAG (4 ASCII bytes) [PAYLOAD (fixed length)] TERMINATOR`.
//! Payload lengths are fixed per tag and are part of the wire contract:
//! new tags can be added, existing lengths must never change.

use std::io::{self, Write};

use crate::codec;

pub mod handlers;
pub mod parser;

pub use parser::{AbortReason, Frame, PacketParser, ParseEvent, ParserState};

/// Largest payload any command may declare
pub const MAX_PAYLOAD: usize = 384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Unattended challenge
    Chal,
    /// Attended (user-present) challenge
    Chup,
    /// Reserved; framed and ignored
    Auth,
    /// Owner-key erase, stage 1
    Dlk0,
    /// Owner-key erase, stage 2
    Dlk1,
    /// Export public key
    Pkey,
    /// Report key PID
    Pidx,
    /// Schedule wake alarm
    Alrm,
    Vers,
    Hwvr,
    Snum,
    Ckey,
    Time,
    Down,
    Rset,
    /// Full-wipe unlock, stage 1
    Wipe,
    /// Full-wipe unlock, stage 2
    Sure,
}

/// One row of the command table
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub tag: [u8; 4],
    pub command: Command,
    pub payload_len: usize,
}

const fn row(tag: &[u8; 4], command: Command, payload_len: usize) -> CommandSpec {
    CommandSpec {
        tag: *tag,
        command,
        payload_len,
    }
}

pub const COMMANDS: &[CommandSpec] = &[
    row(b"CHAL", Command::Chal, 29),
    row(b"CHUP", Command::Chup, 29),
    row(b"AUTH", Command::Auth, 384),
    row(b"DLK0", Command::Dlk0, 4),
    row(b"DLK1", Command::Dlk1, 4),
    row(b"PKEY", Command::Pkey, 4),
    row(b"PIDX", Command::Pidx, 4),
    row(b"ALRM", Command::Alrm, 8),
    row(b"VERS", Command::Vers, 0),
    row(b"HWVR", Command::Hwvr, 0),
    row(b"SNUM", Command::Snum, 0),
    row(b"CKEY", Command::Ckey, 0),
    row(b"TIME", Command::Time, 0),
    row(b"DOWN", Command::Down, 0),
    row(b"RSET", Command::Rset, 0),
    row(b"WIPE", Command::Wipe, 0),
    row(b"SURE", Command::Sure, 0),
];

/// Exact, case-sensitive tag lookup
pub fn lookup(tag: &[u8]) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|row| row.tag[..] == *tag)
}

/// Writer for one outbound record: header, body, terminator
pub struct Reply<'a, W: Write> {
    out: &'a mut W,
    terminator: u8,
}

impl<'a, W: Write> Reply<'a, W> {
    pub fn new(out: &'a mut W, terminator: u8) -> Self {
        Self { out, terminator }
    }

    /// Raw text (4-byte header or a fixed message)
    pub fn text(&mut self, text: &str) -> io::Result<&mut Self> {
        self.out.write_all(text.as_bytes())?;
        Ok(self)
    }

    /// Base64 record body
    pub fn record(&mut self, data: &[u8]) -> io::Result<&mut Self> {
        codec::write_record(&mut *self.out, data)?;
        Ok(self)
    }

    /// Close the record with the terminator byte
    pub fn finish(&mut self) -> io::Result<()> {
        self.out.write_all(&[self.terminator])?;
        self.out.flush()
    }

    pub fn writer(&mut self) -> &mut W {
        &mut *self.out
    }
}

/// Generic failure marker, no detail on the wire
pub fn write_fail<W: Write>(out: &mut W, terminator: u8) -> io::Result<()> {
    Reply::new(out, terminator).text("FAIL")?.finish()
}
