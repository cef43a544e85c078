//! Hosted platform: key region in a file, link over a Unix socket
//!
//! Lets the engine run as a plain process next to the host software,
//! which connects to the socket exactly as it would open the serial port.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context;
use log::{info, warn};
use rand_core::OsRng;

use super::{ByteChannel, Platform};
use crate::keystore::{
    owner_key_offset, RegionSource, KEY_RECORD_SIZE, MAX_KEYS, NUM_OWNER_KEYS, OWNER_KEY_SIZE,
    REGION_SIZE,
};

/// Noise source for the random mixer on a hosted build
pub type HostNoise = OsRng;

/// Key region snapshot stored in a regular file
pub struct FileRegion {
    path: PathBuf,
}

impl FileRegion {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn zero_range(&self, offset: usize, len: usize) -> anyhow::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&vec![0u8; len])?;
        file.sync_all()?;
        Ok(())
    }
}

impl RegionSource for FileRegion {
    fn read_region(&mut self, buf: &mut [u8]) -> anyhow::Result<()> {
        let mut file = File::open(&self.path)
            .with_context(|| format!("opening key file {}", self.path.display()))?;
        let len = file.metadata()?.len();
        if len < REGION_SIZE as u64 {
            anyhow::bail!(
                "key file {} is {} bytes, need {}",
                self.path.display(),
                len,
                REGION_SIZE
            );
        }
        file.read_exact(buf)?;
        Ok(())
    }
}

pub struct HostPlatform {
    region: FileRegion,
    assume_present: bool,
    service_mode: bool,
}

impl HostPlatform {
    pub fn new(region: FileRegion) -> Self {
        Self {
            region,
            assume_present: false,
            service_mode: false,
        }
    }

    /// Treat every attended challenge as if the button had been pressed
    pub fn with_assume_present(mut self, yes: bool) -> Self {
        self.assume_present = yes;
        self
    }

    pub fn with_service_mode(mut self, yes: bool) -> Self {
        self.service_mode = yes;
        self
    }
}

impl Platform for HostPlatform {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn service_mode(&self) -> bool {
        self.service_mode
    }

    fn persist_owner_key_erasure(&mut self, slot: usize) -> anyhow::Result<()> {
        self.region.zero_range(owner_key_offset(slot), OWNER_KEY_SIZE)?;
        info!("Owner key slot {} erased in {}", slot, self.region.path().display());
        Ok(())
    }

    fn erase_key_material(&mut self) -> anyhow::Result<()> {
        self.region.zero_range(0, MAX_KEYS * KEY_RECORD_SIZE)?;
        self.region
            .zero_range(owner_key_offset(0), NUM_OWNER_KEYS * OWNER_KEY_SIZE)?;
        warn!("Key material erased in {}", self.region.path().display());
        Ok(())
    }

    fn power_down(&mut self) -> anyhow::Result<()> {
        info!("Power-down requested by host");
        Ok(())
    }

    fn reset_host(&mut self) -> anyhow::Result<()> {
        info!("Host reset requested");
        Ok(())
    }

    fn set_alarm(&mut self, at: u32) -> anyhow::Result<()> {
        info!("Wake alarm requested for {}", at);
        Ok(())
    }

    fn poll_presence(&mut self) -> bool {
        self.assume_present
    }
}

/// One accepted connection on the engine's Unix socket
#[cfg(unix)]
pub struct SocketChannel {
    reader: BufReader<std::os::unix::net::UnixStream>,
    writer: std::os::unix::net::UnixStream,
}

#[cfg(unix)]
impl SocketChannel {
    pub fn new(stream: std::os::unix::net::UnixStream) -> io::Result<Self> {
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }
}

#[cfg(unix)]
impl Write for SocketChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

#[cfg(unix)]
impl ByteChannel for SocketChannel {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.reader.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Listening socket; the socket file is removed again on drop
#[cfg(unix)]
pub struct SocketListener {
    listener: std::os::unix::net::UnixListener,
    path: PathBuf,
}

#[cfg(unix)]
impl SocketListener {
    pub fn bind(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        // Stale socket from a previous run
        let _ = std::fs::remove_file(&path);
        let listener = std::os::unix::net::UnixListener::bind(&path)
            .with_context(|| format!("binding {}", path.display()))?;
        info!("Listening on {}", path.display());
        Ok(Self { listener, path })
    }

    /// Block until the host connects
    pub fn accept(&self) -> anyhow::Result<SocketChannel> {
        let (stream, _) = self.listener.accept()?;
        info!("Host connected");
        Ok(SocketChannel::new(stream)?)
    }
}

#[cfg(unix)]
impl Drop for SocketListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
