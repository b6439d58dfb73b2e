//! sdmmc-disk - SD/MMC SPI-mode driver
//!
//! Implements the card side of the SD/MMC SPI protocol on an exclusive SPI
//! bus: socket tracking, cold initialization with card-type discovery, and
//! single/multiple block transfers with the retry discipline the cards
//! expect.
//!
//! This is optimised for predictability and debugability, not for raw
//! throughput.

mod busy;
use busy::BusHandle;

pub mod proto;
use proto::*;

use core::convert::TryFrom;
use core::sync::atomic::{AtomicU8, Ordering};

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::{InputPin, OutputPin};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

use crate::bus::SdSpi;
use crate::diskio::{DiskError, Status};

/// A failed block operation is retried up to this many times.
const IO_ATTEMPTS: u8 = 3;

/// The card types the driver can end up talking to.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum CardKind {
    /// No card in the socket.
    None = 0,
    /// MultiMediaCard, byte addressed.
    Mmc = 1,
    /// Standard-capacity SD card (v1 or v2), byte addressed.
    Sd = 2,
    /// High-capacity SD card, block addressed.
    Sdhc = 3,
    /// A card that failed or refused initialization.
    Unknown = 4,
}

impl CardKind {
    fn from_u8(value: u8) -> CardKind {
        match value {
            1 => CardKind::Mmc,
            2 => CardKind::Sd,
            3 => CardKind::Sdhc,
            4 => CardKind::Unknown,
            _ => CardKind::None,
        }
    }

    /// The on-wire address of a logical block: high-capacity cards are
    /// block addressed, everything else byte addressed.
    fn block_address(self, lba: u64) -> Option<u32> {
        let address = match self {
            CardKind::Sdhc => lba,
            _ => lba.checked_mul(BLOCK_LEN as u64)?,
        };
        u32::try_from(address).ok()
    }

    /// How much the on-wire address advances per block.
    fn address_step(self) -> u32 {
        match self {
            CardKind::Sdhc => 1,
            _ => BLOCK_LEN as u32,
        }
    }
}

/// How the card-detect switch is wired to its input pin.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SocketSwitch {
    /// The switch closes when a card is inserted: present reads high.
    NormallyOpen,
    /// The switch opens when a card is inserted: present reads low.
    NormallyClosed,
}

impl SocketSwitch {
    fn present(self, pin_high: bool) -> bool {
        match self {
            SocketSwitch::NormallyOpen => pin_high,
            SocketSwitch::NormallyClosed => !pin_high,
        }
    }
}

/// Options for bringing up the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug)]
pub struct Options {
    /// Bus frequency to run at once the card is initialized, in Hz. The
    /// driver clamps this to what the card family supports (20 MHz for
    /// MMC, 25 MHz for SD).
    pub frequency_hz: u32,
    /// Check command and data CRCs. Some cards don't support CRC mode.
    pub use_crc: bool,
    /// Card-detect switch wiring.
    pub socket_switch: SocketSwitch,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            frequency_hz: 1_000_000,
            use_crc: true,
            socket_switch: SocketSwitch::NormallyOpen,
        }
    }
}

/// The failures the driver can hit on the wire.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The SPI peripheral failed.
    Transport,
    /// A GPIO could not be driven.
    Gpio,
    /// The card never reported ready within the busy window.
    TimeoutWaitNotBusy,
    /// No response to this command within the response window.
    TimeoutCommand(u8),
    /// No data-start token within the read window.
    TimeoutReadBuffer,
    /// The card kept rejecting this command's CRC.
    CommandCrc(u8),
    /// Data block CRC mismatch (received, computed).
    DataCrc(u16, u16),
    /// A command was answered with error bits set.
    Response(u8),
    /// The card sent something other than a data-start token.
    ReadError,
    /// The card rejected or failed to program a written block.
    WriteError,
    /// The card responded in a way that rules it out (wrong voltage
    /// window, bad check pattern, activation never finished).
    UnusableCard,
}

impl Error {
    /// Errors a fresh attempt at the same transfer can clear.
    fn is_data_error(self) -> bool {
        match self {
            Error::DataCrc(_, _) | Error::ReadError | Error::TimeoutReadBuffer => true,
            _ => false,
        }
    }
}

/// SPI-mode driver for SD and MMC cards.
///
/// Owns the bus, the chip-select output and the card-detect input for its
/// whole lifetime, and presents the block-device surface a FAT layer
/// expects: initialize, status, block read/write, sync and sector count.
///
/// The driver is single-threaded; the one entry point that may be called
/// from an interrupt handler is [`check_socket`](SdMmcDisk::check_socket),
/// which only touches the atomically held status flags and card kind. Wire
/// the card-detect edge interrupt (rising edge for a normally-open switch,
/// falling for normally-closed) to it so an ejection is latched even while
/// no disk call is running.
pub struct SdMmcDisk<SPI, CS, CD, D>
where
    SPI: SdSpi,
    CS: OutputPin,
    CD: InputPin,
    D: DelayMs<u32>,
{
    spi: SPI,
    cs: CS,
    card_detect: CD,
    delay: D,
    options: Options,
    use_crc: bool,
    wide_frames: bool,
    status: AtomicU8,
    card_kind: AtomicU8,
}

impl<SPI, CS, CD, D> SdMmcDisk<SPI, CS, CD, D>
where
    SPI: SdSpi,
    CS: OutputPin,
    CD: InputPin,
    D: DelayMs<u32>,
{
    /// Create a driver with default [`Options`].
    pub fn new(spi: SPI, cs: CS, card_detect: CD, delay: D) -> Self {
        Self::with_options(spi, cs, card_detect, delay, Options::default())
    }

    /// Create a driver with explicit options.
    pub fn with_options(spi: SPI, cs: CS, card_detect: CD, delay: D, options: Options) -> Self {
        SdMmcDisk {
            spi,
            cs,
            card_detect,
            delay,
            use_crc: options.use_crc,
            wide_frames: false,
            status: AtomicU8::new((Status::NOT_INITIALIZED | Status::NO_DISK).bits()),
            card_kind: AtomicU8::new(CardKind::None as u8),
            options,
        }
    }

    /// The kind of card discovered by the last initialization.
    pub fn card_kind(&self) -> CardKind {
        CardKind::from_u8(self.card_kind.load(Ordering::Relaxed))
    }

    /// Sample the card-detect switch and fold the result into the status
    /// flags.
    ///
    /// Safe to call from the detect-pin edge handler: the transitions are
    /// monotone (an empty socket only ever raises flags, a full one only
    /// clears the no-disk flag), so racing a foreground disk call cannot
    /// resurrect a stale initialization.
    pub fn check_socket(&self) {
        let present = match self.card_detect.is_high() {
            Ok(level) => self.options.socket_switch.present(level),
            // An unreadable switch counts as an empty socket.
            Err(_) => false,
        };
        if present {
            self.clear_status(Status::NO_DISK);
        } else {
            self.raise_status(Status::NO_DISK | Status::NOT_INITIALIZED);
            self.set_kind(CardKind::None);
        }
    }

    /// Current status after a presence sample.
    pub fn disk_status(&self) -> Status {
        self.check_socket();
        self.status_bits()
    }

    /// Initialize the card if one is present and not yet initialized, and
    /// return the resulting status.
    pub fn disk_initialize(&mut self) -> Status {
        self.check_socket();
        let status = self.status_bits();
        if status.contains(Status::NO_DISK) || !status.contains(Status::NOT_INITIALIZED) {
            return status;
        }

        if let Err(e) = self.initialize_card() {
            warn!("card initialization failed: {:?}", e);
            self.set_kind(CardKind::Unknown);
        }
        self.status_bits()
    }

    /// Read `count` 512-byte blocks starting at `sector` into `buffer`.
    pub fn disk_read(
        &mut self,
        buffer: &mut [u8],
        sector: u64,
        count: usize,
    ) -> Result<(), DiskError> {
        self.check_socket();
        if self.status_bits().contains(Status::NOT_INITIALIZED) {
            return Err(DiskError::NotReady);
        }
        let (start, step) = self.address_range(sector, count, buffer.len())?;

        let result = if count == 1 {
            self.read_block(buffer, start)
        } else {
            self.read_blocks(buffer, start, step)
        };
        result.map_err(|e| {
            warn!("read of {} blocks at {} failed: {:?}", count, sector, e);
            DiskError::Io
        })
    }

    /// Write `count` 512-byte blocks from `buffer` starting at `sector`.
    pub fn disk_write(&mut self, buffer: &[u8], sector: u64, count: usize) -> Result<(), DiskError> {
        self.check_socket();
        let status = self.status_bits();
        if status.contains(Status::NOT_INITIALIZED) {
            return Err(DiskError::NotReady);
        }
        if status.contains(Status::WRITE_PROTECTED) {
            return Err(DiskError::WriteProtected);
        }
        let (start, step) = self.address_range(sector, count, buffer.len())?;

        let result = if count == 1 {
            self.write_block(buffer, start)
        } else {
            self.write_blocks(buffer, start, step)
        };
        result.map_err(|e| {
            warn!("write of {} blocks at {} failed: {:?}", count, sector, e);
            DiskError::Io
        })
    }

    /// Block until any in-flight block programming has completed.
    pub fn disk_sync(&mut self) -> Result<(), DiskError> {
        self.check_socket();
        if self.status_bits().contains(Status::NO_DISK) {
            return Err(DiskError::NotReady);
        }
        // Selecting the card forces a wait for the end of its internal
        // write processing.
        match self.select() {
            Ok(_bus) => Ok(()),
            Err(_) => Err(DiskError::Io),
        }
    }

    /// Total number of 512-byte sectors on the card, or 0 if it cannot be
    /// determined.
    pub fn disk_sectors(&mut self) -> u64 {
        self.check_socket();
        if self.status_bits().contains(Status::NOT_INITIALIZED) {
            return 0;
        }

        for _ in 0..IO_ATTEMPTS {
            match self.read_csd() {
                Ok(csd) => return csd_sector_count(&csd),
                Err(e) if e.is_data_error() => warn!("CSD read failed: {:?}", e),
                Err(e) => {
                    warn!("CSD request failed: {:?}", e);
                    return 0;
                }
            }
        }
        0
    }

    /// The detected card type, initializing a present card first if
    /// needed.
    pub fn card_type(&mut self) -> CardKind {
        self.check_socket();
        let status = self.status_bits();
        if !status.contains(Status::NO_DISK) && status.contains(Status::NOT_INITIALIZED) {
            self.disk_initialize();
        }
        self.card_kind()
    }

    /// Turn CRC checking on or off, reprogramming an already-running card
    /// via CMD59.
    pub fn crc(&mut self, enable: bool) -> Result<(), DiskError> {
        self.check_socket();
        if enable {
            // The toggle command itself must carry a checksum while the
            // card still checks them, so flip the flag early when
            // enabling and late when disabling.
            self.use_crc = true;
        }
        if !self.status_bits().contains(Status::NOT_INITIALIZED) {
            let response = self
                .command_transaction(CMD59, enable as u32)
                .map_err(|_| DiskError::Io)?;
            if response != R1_READY_STATE {
                warn!("CMD59 refused: {:x}", response);
                return Err(DiskError::Io);
            }
        }
        self.use_crc = enable;
        Ok(())
    }

    /// Move data payloads in 16-bit frames instead of single bytes.
    pub fn large_frames(&mut self, enable: bool) {
        self.check_socket();
        self.wide_frames = enable;
    }

    /// Forget the initialized state. The next access re-initializes a
    /// still-present card.
    pub fn unmount(&mut self) {
        self.check_socket();
        self.raise_status(Status::NOT_INITIALIZED);
    }

    // ------------------------------------------------------------------
    // Status plumbing
    // ------------------------------------------------------------------

    fn status_bits(&self) -> Status {
        Status::from_bits(self.status.load(Ordering::Relaxed))
    }

    fn raise_status(&self, flags: Status) {
        self.status.fetch_or(flags.bits(), Ordering::Relaxed);
    }

    fn clear_status(&self, flags: Status) {
        self.status.fetch_and(!flags.bits(), Ordering::Relaxed);
    }

    fn set_kind(&self, kind: CardKind) {
        self.card_kind.store(kind as u8, Ordering::Relaxed);
    }

    /// Validate that the whole request is addressable on this card and
    /// return the on-wire start address and per-block step.
    fn address_range(
        &self,
        sector: u64,
        count: usize,
        buffer_len: usize,
    ) -> Result<(u32, u32), DiskError> {
        if count == 0 || buffer_len != count * BLOCK_LEN {
            return Err(DiskError::Parameter);
        }
        let kind = self.card_kind();
        let last = sector
            .checked_add(count as u64 - 1)
            .ok_or(DiskError::Parameter)?;
        let start = kind.block_address(sector).ok_or(DiskError::Parameter)?;
        kind.block_address(last).ok_or(DiskError::Parameter)?;
        Ok((start, kind.address_step()))
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    fn initialize_card(&mut self) -> Result<(), Error> {
        self.spi
            .set_frequency(INIT_FREQUENCY_HZ)
            .map_err(|_| Error::Transport)?;

        // Supply a minimum of 74 clock cycles with chip-select deasserted
        // so the card wakes up in SPI mode.
        self.cs.set_high().map_err(|_| Error::Gpio)?;
        for _ in 0..10 {
            self.spi.transfer(0xFF).map_err(|_| Error::Transport)?;
        }

        let response = self.command_transaction(CMD0, 0)?;
        if response != R1_IDLE_STATE {
            return Err(Error::Response(response));
        }

        if self.use_crc {
            let response = self.command_transaction(CMD59, 1)?;
            if response != R1_IDLE_STATE {
                return Err(Error::Response(response));
            }
        }

        let kind = self.discover_card_kind()?;
        self.set_kind(kind);
        debug!("card type: {:?}", kind);

        // Byte-addressed cards can come up with another block length.
        if kind != CardKind::Sdhc {
            let response = self.command_transaction(CMD16, BLOCK_LEN as u32)?;
            if response != R1_READY_STATE {
                return Err(Error::Response(response));
            }
        }

        // Drop the card's internal chip-select pull-up; MMC has none.
        if kind != CardKind::Mmc {
            let response = self.acommand_transaction(ACMD42, 0)?;
            if response != R1_READY_STATE {
                return Err(Error::Response(response));
            }
        }

        self.clear_status(Status::NOT_INITIALIZED);

        let ceiling = if kind == CardKind::Mmc {
            MMC_MAX_FREQUENCY_HZ
        } else {
            SD_MAX_FREQUENCY_HZ
        };
        let hz = self.options.frequency_hz.min(ceiling);
        self.spi.set_frequency(hz).map_err(|_| Error::Transport)?;
        debug!("card running at {} Hz", hz);
        Ok(())
    }

    /// Walk the discovery tree: CMD8 splits v2 cards from v1/MMC, the OCR
    /// rules out unsupported voltage ranges, and the activation poll picks
    /// the final family.
    fn discover_card_kind(&mut self) -> Result<CardKind, Error> {
        let (response, echo) = self.command_with_reply(CMD8, CMD8_CHECK_PATTERN)?;
        if response == R1_IDLE_STATE {
            // v2 family. The card echoes the voltage window and check
            // pattern; a mangled echo means the card is not usable.
            if echo & 0xFFF != CMD8_CHECK_PATTERN {
                return Err(Error::UnusableCard);
            }
            self.check_voltage_window()?;
            self.activate(ACMD41, ACMD41_HIGH_CAPACITY | OP_COND_VOLTAGE, true)?;

            let (response, ocr) = self.command_with_reply(CMD58, 0)?;
            if response != R1_READY_STATE {
                return Err(Error::Response(response));
            }
            Ok(if ocr & OCR_CCS != 0 {
                CardKind::Sdhc
            } else {
                CardKind::Sd
            })
        } else {
            // v1 SD or MMC; CMD8 is an illegal command for both.
            self.check_voltage_window()?;
            match self.activate(ACMD41, OP_COND_VOLTAGE, true) {
                Ok(()) => return Ok(CardKind::Sd),
                Err(Error::UnusableCard) => {}
                Err(e) => return Err(e),
            }
            debug!("ACMD41 refused, falling back to CMD1");
            self.activate(CMD1, OP_COND_VOLTAGE, false)?;
            Ok(CardKind::Mmc)
        }
    }

    /// CMD58 while idle: the card must support the 3.2-3.3 V window.
    fn check_voltage_window(&mut self) -> Result<(), Error> {
        let (response, ocr) = self.command_with_reply(CMD58, 0)?;
        if response != R1_IDLE_STATE || ocr & OCR_VOLTAGE_3V2_3V3 == 0 {
            return Err(Error::UnusableCard);
        }
        Ok(())
    }

    /// Poll an activation command once per millisecond until the card
    /// leaves the idle state or the activation window closes.
    fn activate(&mut self, cmd: u8, arg: u32, app_command: bool) -> Result<(), Error> {
        let mut response = R1_IDLE_STATE;
        for _ in 0..ACTIVATION_TIMEOUT_MS {
            response = if app_command {
                self.acommand_transaction(cmd, arg)?
            } else {
                self.command_transaction(cmd, arg)?
            };
            if response != R1_IDLE_STATE {
                break;
            }
            self.delay.delay_ms(1);
        }
        if response == R1_READY_STATE {
            Ok(())
        } else {
            Err(Error::UnusableCard)
        }
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    fn select(&mut self) -> Result<BusHandle<'_, SPI, CS, D>, Error> {
        BusHandle::select(
            &mut self.spi,
            &mut self.cs,
            &mut self.delay,
            self.use_crc,
            self.wide_frames,
        )
    }

    /// One command in its own select/deselect bracket.
    fn command_transaction(&mut self, cmd: u8, arg: u32) -> Result<u8, Error> {
        let mut bus = self.select()?;
        bus.command(cmd, arg)
    }

    /// One application command in its own select/deselect bracket.
    fn acommand_transaction(&mut self, cmd: u8, arg: u32) -> Result<u8, Error> {
        let mut bus = self.select()?;
        bus.acommand(cmd, arg)
    }

    /// A command with a 32-bit trailing reply (R3/R7). The trailer is only
    /// on the wire when the command was accepted.
    fn command_with_reply(&mut self, cmd: u8, arg: u32) -> Result<(u8, u32), Error> {
        let mut bus = self.select()?;
        let response = bus.command(cmd, arg)?;
        let reply = if response & !R1_IDLE_STATE == 0 {
            bus.read_extended()?
        } else {
            0
        };
        Ok((response, reply))
    }

    /// CMD13: the R1 byte plus the trailing status byte.
    fn read_card_status(&mut self) -> Result<(u8, u8), Error> {
        let mut bus = self.select()?;
        let r1 = bus.command(CMD13, 0)?;
        let r2 = bus.receive()?;
        Ok((r1, r2))
    }

    // ------------------------------------------------------------------
    // Block I/O
    // ------------------------------------------------------------------

    fn read_block(&mut self, buffer: &mut [u8], address: u32) -> Result<(), Error> {
        let mut last = Error::ReadError;
        for _ in 0..IO_ATTEMPTS {
            let mut bus = self.select()?;
            let response = bus.command(CMD17, address)?;
            if response != R1_READY_STATE {
                return Err(Error::Response(response));
            }
            match bus.read_data(buffer) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_data_error() => {
                    warn!("block read failed, retrying: {:?}", e);
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    fn read_blocks(&mut self, buffer: &mut [u8], start: u32, step: u32) -> Result<(), Error> {
        let count = buffer.len() / BLOCK_LEN;
        let mut done = 0;
        let mut attempts = 0;

        while done < count {
            let mut bus = self.select()?;
            let response = bus.command(CMD18, start + done as u32 * step)?;
            if response != R1_READY_STATE {
                return Err(Error::Response(response));
            }

            let mut failure = None;
            while done < count {
                match bus.read_data(block_mut(buffer, done)) {
                    Ok(()) => {
                        done += 1;
                        // A run of good blocks earns the budget back.
                        attempts = 0;
                    }
                    Err(e) if e.is_data_error() => {
                        attempts += 1;
                        failure = Some(e);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }

            bus.command(CMD12, 0)?;
            if done < count {
                // The card chews on CMD12 for a while when the stream is
                // cut short.
                bus.wait_ready(READY_TIMEOUT_MS)?;
            }
            drop(bus);

            if let Some(e) = failure {
                if attempts >= IO_ATTEMPTS {
                    return Err(e);
                }
                warn!("block stream broke after {} blocks, retrying: {:?}", done, e);
            }
        }
        Ok(())
    }

    fn write_block(&mut self, buffer: &[u8], address: u32) -> Result<(), Error> {
        for _ in 0..IO_ATTEMPTS {
            let token = {
                let mut bus = self.select()?;
                let response = bus.command(CMD24, address)?;
                if response != R1_READY_STATE {
                    return Err(Error::Response(response));
                }
                bus.write_data(DATA_START_BLOCK, buffer)?
                // Deselecting here is what starts the card's internal
                // programming.
            };

            match token {
                DATA_RES_ACCEPTED => return self.verify_programming(),
                DATA_RES_CRC_ERROR => warn!("block write rejected on CRC, retrying"),
                _ => return Err(Error::WriteError),
            }
        }
        Err(Error::WriteError)
    }

    fn write_blocks(&mut self, buffer: &[u8], start: u32, step: u32) -> Result<(), Error> {
        let count = buffer.len() / BLOCK_LEN;
        let kind = self.card_kind();

        if kind != CardKind::Mmc {
            // Pre-erase hint; speeds up the stream but is not load bearing.
            let response = self.acommand_transaction(ACMD23, count as u32)?;
            if response != R1_READY_STATE {
                debug!("pre-erase hint refused: {:x}", response);
            }
        }

        let mut done = 0;
        let mut attempts = 0;

        while done < count {
            let stream_start = done;
            let mut bus = self.select()?;
            let response = bus.command(CMD25, start + done as u32 * step)?;
            if response != R1_READY_STATE {
                return Err(Error::Response(response));
            }

            let mut token = DATA_RES_ACCEPTED;
            while done < count {
                token = bus.write_data(WRITE_MULTIPLE_TOKEN, block_ref(buffer, done))?;
                if token != DATA_RES_ACCEPTED {
                    attempts += 1;
                    break;
                }
                done += 1;
            }

            bus.wait_ready(READY_TIMEOUT_MS)?;

            if token == DATA_RES_ACCEPTED {
                // Every block went out; close the stream and let the card
                // program the tail.
                bus.send(STOP_TRAN_TOKEN)?;
                bus.wait_ready(READY_TIMEOUT_MS)?;
                drop(bus);
                return self.verify_programming();
            }

            // The stream broke; abort it before any recovery.
            bus.command(CMD12, 0)?;
            bus.wait_ready(READY_TIMEOUT_MS)?;
            drop(bus);

            if token != DATA_RES_CRC_ERROR || kind == CardKind::Mmc || attempts >= IO_ATTEMPTS {
                return Err(Error::WriteError);
            }

            // SD cards can report how much of the stream actually landed,
            // so the retry picks up right after it.
            let written = self.well_written_blocks()? as usize;
            warn!(
                "write stream rejected block {}, {} well written, retrying",
                done, written
            );
            done = stream_start + written.min(count - stream_start);
        }
        Ok(())
    }

    /// CMD13 after programming: both status bytes must be clean.
    fn verify_programming(&mut self) -> Result<(), Error> {
        let (r1, r2) = self.read_card_status()?;
        if r1 != R1_READY_STATE || r2 != 0 {
            warn!("programming failed, card status {:x} {:x}", r1, r2);
            return Err(Error::WriteError);
        }
        Ok(())
    }

    /// ACMD22: the number of blocks of the last write stream that made it
    /// into flash, delivered as a 4-byte data block.
    fn well_written_blocks(&mut self) -> Result<u32, Error> {
        let mut bus = self.select()?;
        let response = bus.acommand(ACMD22, 0)?;
        if response != R1_READY_STATE {
            return Err(Error::Response(response));
        }
        let mut reply = [0u8; 4];
        bus.read_data(&mut reply)?;
        Ok(u32::from_be_bytes(reply))
    }

    fn read_csd(&mut self) -> Result<[u8; 16], Error> {
        let mut bus = self.select()?;
        let response = bus.command(CMD9, 0)?;
        if response != R1_READY_STATE {
            return Err(Error::Response(response));
        }
        let mut csd = [0u8; 16];
        bus.read_data(&mut csd)?;
        Ok(csd)
    }
}

fn block_mut(buffer: &mut [u8], index: usize) -> &mut [u8] {
    &mut buffer[index * BLOCK_LEN..(index + 1) * BLOCK_LEN]
}

fn block_ref(buffer: &[u8], index: usize) -> &[u8] {
    &buffer[index * BLOCK_LEN..(index + 1) * BLOCK_LEN]
}
