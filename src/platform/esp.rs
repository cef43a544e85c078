//! ESP32-S3 board support
//!
//! - UART1 is the host link
//! - the key region lives in a raw flash partition labelled `keys`
//! - GPIO0 (BOOT) is the presence button, GPIO4 the service-mode strap,
//!   GPIO5 drives the host's power/reset line
//!
//! Noise for the random mixer comes from the chip's TRNG. With radios off
//! that is thermal noise only, which Espressif still rates as suitable for
//! cryptographic use, at a lower rate.

use std::ffi::CString;
use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use esp_idf_hal::delay::{FreeRtos, BLOCK};
use esp_idf_hal::gpio::{AnyIOPin, Gpio0, Gpio4, Gpio5, Input, Output, PinDriver, Pull};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
use esp_idf_hal::units::Hertz;
use esp_idf_svc::log::EspLogger;
use log::{info, warn};
use rand_core::{CryptoRng, RngCore};

use super::{ByteChannel, Platform};
use crate::config::EngineConfig;
use crate::engine::ProtocolEngine;
use crate::keystore::{
    owner_key_offset, KeyStore, RegionSource, KEY_RECORD_SIZE, MAX_KEYS, NUM_OWNER_KEYS,
    OWNER_KEY_SIZE,
};

const PRESS_HOLD_MS: u64 = 50;
const LINK_BAUD: u32 = 115_200;
const FLASH_SECTOR: usize = 4096;
const KEY_PARTITION: &str = "keys";

/// Samples drawn at start-up to catch a stuck TRNG
const STARTUP_SAMPLES: usize = 8;

/// TRNG noise for the random mixer.
///
/// [`RandomSource`](crate::entropy::RandomSource) only consumes the low
/// 16 bits of each `next_u32`, so every word is one fresh `esp_random()`
/// read; wider requests are assembled from those words.
pub struct TrngNoise {
    _private: (),
}

impl TrngNoise {
    /// Refuses a TRNG that repeats itself across the start-up samples
    pub fn open() -> anyhow::Result<Self> {
        let first = trng_word();
        let stuck = (1..STARTUP_SAMPLES).all(|_| trng_word() == first);
        if stuck {
            anyhow::bail!("TRNG stuck at {:#010x}", first);
        }
        Ok(Self { _private: () })
    }

    /// One 16-bit noise sample
    pub fn sample(&mut self) -> u16 {
        (trng_word() & 0xFFFF) as u16
    }
}

fn trng_word() -> u32 {
    unsafe { esp_idf_sys::esp_random() }
}

impl RngCore for TrngNoise {
    fn next_u32(&mut self) -> u32 {
        u32::from(self.sample())
    }

    fn next_u64(&mut self) -> u64 {
        (u64::from(trng_word()) << 32) | u64::from(trng_word())
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for chunk in dest.chunks_mut(4) {
            chunk.copy_from_slice(&trng_word().to_le_bytes()[..chunk.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl CryptoRng for TrngNoise {}

/// Presence button on the active-low BOOT pin.
///
/// A gesture counts once the pin has been held low for `PRESS_HOLD_MS`;
/// the pin must go high again before another gesture is reported.
pub struct PresenceButton<'d> {
    pin: PinDriver<'d, Gpio0, Input>,
    held_since_ms: Option<u64>,
    reported: bool,
}

impl<'d> PresenceButton<'d> {
    pub fn new(mut pin: PinDriver<'d, Gpio0, Input>) -> anyhow::Result<Self> {
        pin.set_pull(Pull::Up)?;
        Ok(Self {
            pin,
            held_since_ms: None,
            reported: false,
        })
    }

    pub fn take_gesture(&mut self) -> bool {
        if self.pin.is_high() {
            self.held_since_ms = None;
            self.reported = false;
            return false;
        }

        let now = uptime_ms();
        let since = *self.held_since_ms.get_or_insert(now);
        if !self.reported && now.saturating_sub(since) >= PRESS_HOLD_MS {
            self.reported = true;
            return true;
        }
        false
    }
}

fn uptime_ms() -> u64 {
    (unsafe { esp_idf_sys::esp_timer_get_time() } / 1000).max(0) as u64
}

/// Raw flash partition holding the key region
pub struct PartitionRegion {
    partition: *const esp_idf_sys::esp_partition_t,
}

impl PartitionRegion {
    pub fn find(label: &str) -> anyhow::Result<Self> {
        let label = CString::new(label)?;
        let partition = unsafe {
            esp_idf_sys::esp_partition_find_first(
                esp_idf_sys::esp_partition_type_t_ESP_PARTITION_TYPE_DATA,
                esp_idf_sys::esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                label.as_ptr(),
            )
        };
        if partition.is_null() {
            anyhow::bail!("key partition {:?} not found", label);
        }
        Ok(Self { partition })
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> anyhow::Result<()> {
        esp_idf_sys::esp!(unsafe {
            esp_idf_sys::esp_partition_read(
                self.partition,
                offset,
                buf.as_mut_ptr() as *mut _,
                buf.len(),
            )
        })?;
        Ok(())
    }

    /// Zero `len` bytes at `offset`, rewriting every sector it touches
    fn zero_range(&self, offset: usize, len: usize) -> anyhow::Result<()> {
        let first = offset / FLASH_SECTOR * FLASH_SECTOR;
        let end = offset + len;
        let mut sector = zeroize::Zeroizing::new(vec![0u8; FLASH_SECTOR]);

        let mut base = first;
        while base < end {
            self.read(base, &mut sector)?;
            let lo = offset.max(base) - base;
            let hi = end.min(base + FLASH_SECTOR) - base;
            sector[lo..hi].fill(0);

            esp_idf_sys::esp!(unsafe {
                esp_idf_sys::esp_partition_erase_range(self.partition, base, FLASH_SECTOR)
            })?;
            esp_idf_sys::esp!(unsafe {
                esp_idf_sys::esp_partition_write(
                    self.partition,
                    base,
                    sector.as_ptr() as *const _,
                    FLASH_SECTOR,
                )
            })?;
            base += FLASH_SECTOR;
        }
        Ok(())
    }
}

impl RegionSource for PartitionRegion {
    fn read_region(&mut self, buf: &mut [u8]) -> anyhow::Result<()> {
        self.read(0, buf)
    }
}

/// UART link to the host
pub struct UartChannel<'d> {
    uart: UartDriver<'d>,
}

impl Write for UartChannel<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.uart
            .write(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.uart
            .wait_tx_done(BLOCK)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

impl ByteChannel for UartChannel<'_> {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.uart.read(&mut byte, BLOCK) {
                Ok(1) => return Ok(Some(byte[0])),
                Ok(_) => continue,
                Err(e) => return Err(io::Error::new(io::ErrorKind::Other, e)),
            }
        }
    }
}

pub struct EspPlatform<'d> {
    region: PartitionRegion,
    button: PresenceButton<'d>,
    service_strap: PinDriver<'d, Gpio4, Input>,
    host_power: PinDriver<'d, Gpio5, Output>,
}

impl Platform for EspPlatform<'_> {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn service_mode(&self) -> bool {
        self.service_strap.is_high()
    }

    fn persist_owner_key_erasure(&mut self, slot: usize) -> anyhow::Result<()> {
        self.region.zero_range(owner_key_offset(slot), OWNER_KEY_SIZE)
    }

    fn erase_key_material(&mut self) -> anyhow::Result<()> {
        self.region.zero_range(0, MAX_KEYS * KEY_RECORD_SIZE)?;
        self.region
            .zero_range(owner_key_offset(0), NUM_OWNER_KEYS * OWNER_KEY_SIZE)
    }

    fn power_down(&mut self) -> anyhow::Result<()> {
        info!("Cutting host power");
        self.host_power.set_low()?;
        Ok(())
    }

    fn reset_host(&mut self) -> anyhow::Result<()> {
        info!("Pulsing host reset");
        self.host_power.set_low()?;
        FreeRtos::delay_ms(200);
        self.host_power.set_high()?;
        Ok(())
    }

    fn set_alarm(&mut self, at: u32) -> anyhow::Result<()> {
        // No RTC alarm output is wired on this board
        warn!("Wake alarm for {} not supported", at);
        Ok(())
    }

    fn poll_presence(&mut self) -> bool {
        self.button.take_gesture()
    }
}

/// Board bring-up and the protocol loop; never returns on success
pub fn run() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();
    EspLogger::initialize_default();

    info!("ownerguard v{} starting", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let pins = peripherals.pins;

    let noise = TrngNoise::open()?;
    info!("TRNG noise source ready");

    let mut region = PartitionRegion::find(KEY_PARTITION)?;
    let keys = KeyStore::load(&mut region)?;

    let mut service_strap = PinDriver::input(pins.gpio4)?;
    service_strap.set_pull(Pull::Down)?;
    let mut host_power = PinDriver::output(pins.gpio5)?;
    host_power.set_high()?;

    let platform = EspPlatform {
        region,
        button: PresenceButton::new(PinDriver::input(pins.gpio0)?)?,
        service_strap,
        host_power,
    };

    let uart = UartDriver::new(
        peripherals.uart1,
        pins.gpio17,
        pins.gpio18,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &UartConfig::new().baudrate(Hertz(LINK_BAUD)),
    )?;
    let mut channel = UartChannel { uart };

    let mut engine = ProtocolEngine::new(EngineConfig::default(), keys, noise, platform)?;
    info!("Entering protocol loop");
    loop {
        if let Err(e) = engine.run(&mut channel) {
            warn!("Link error: {}", e);
            FreeRtos::delay_ms(10);
        }
    }
}
