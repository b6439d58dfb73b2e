use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::digital::v2::OutputPin;

#[cfg(feature = "log")]
use log::{trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{trace, warn};

use super::proto::*;
use super::Error;
use crate::bus::{FrameWidth, SdSpi};

/// How many reads the card gets to produce an R1 after a command frame.
const RESPONSE_WINDOW: usize = 8;
/// A command answered with a CRC error is retransmitted up to this often.
const COMMAND_ATTEMPTS: u8 = 3;

/// Exclusive access to a selected card.
///
/// Constructing a handle asserts chip-select and waits for the card to
/// report ready; dropping it deasserts chip-select and clocks the one extra
/// byte the card needs to release its data-out line. All command and data
/// traffic goes through a handle, so nothing can talk to the card while it
/// is deselected.
pub struct BusHandle<'a, SPI, CS, D>
where
    SPI: SdSpi,
    CS: OutputPin,
    D: DelayMs<u32>,
{
    spi: &'a mut SPI,
    cs: &'a mut CS,
    delay: &'a mut D,
    use_crc: bool,
    wide_frames: bool,
}

impl<'a, SPI, CS, D> Drop for BusHandle<'a, SPI, CS, D>
where
    SPI: SdSpi,
    CS: OutputPin,
    D: DelayMs<u32>,
{
    fn drop(&mut self) {
        self.cs.set_high().ok();
        // One more clock so the card releases data-out; after a write this
        // is also what starts the card's internal programming.
        self.spi.transfer(0xFF).ok();
    }
}

impl<'a, SPI, CS, D> BusHandle<'a, SPI, CS, D>
where
    SPI: SdSpi,
    CS: OutputPin,
    D: DelayMs<u32>,
{
    /// Select the card and wait for it to report ready.
    ///
    /// The card holds data-out low while a previous operation (typically
    /// block programming) is still running, so this can legitimately take
    /// hundreds of milliseconds.
    pub fn select(
        spi: &'a mut SPI,
        cs: &'a mut CS,
        delay: &'a mut D,
        use_crc: bool,
        wide_frames: bool,
    ) -> Result<Self, Error> {
        let mut bus = BusHandle {
            spi,
            cs,
            delay,
            use_crc,
            wide_frames,
        };
        bus.cs.set_low().map_err(|_| Error::Gpio)?;
        // Dummy clock to enable the card's data-out driver.
        bus.receive()?;
        bus.wait_ready(READY_TIMEOUT_MS)?;
        Ok(bus)
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, Error> {
        self.spi.transfer(byte).map_err(|_| Error::Transport)
    }

    /// Clock one 0xFF byte out and return what the card sent back.
    pub fn receive(&mut self) -> Result<u8, Error> {
        self.transfer(0xFF)
    }

    /// Send one byte, discarding whatever the card returns.
    pub fn send(&mut self, byte: u8) -> Result<(), Error> {
        self.transfer(byte)?;
        Ok(())
    }

    /// Clock until the card answers 0xFF, sampling roughly once per
    /// millisecond up to `timeout_ms`.
    pub fn wait_ready(&mut self, timeout_ms: u32) -> Result<(), Error> {
        for _ in 0..timeout_ms {
            if self.receive()? == 0xFF {
                return Ok(());
            }
            self.delay.delay_ms(1);
        }
        Err(Error::TimeoutWaitNotBusy)
    }

    /// Issue one command and return its R1 response.
    ///
    /// The returned byte can still carry card-side error bits; the caller
    /// decides which of those are fatal. A response that never arrives or
    /// that keeps failing the command CRC is an `Err`.
    pub fn command(&mut self, cmd: u8, arg: u32) -> Result<u8, Error> {
        let mut frame = [
            cmd,
            (arg >> 24) as u8,
            (arg >> 16) as u8,
            (arg >> 8) as u8,
            arg as u8,
            0,
        ];
        // The card validates CMD0 and CMD8 before CRC mode is negotiated,
        // so those two always carry a real checksum.
        frame[5] = if self.use_crc || cmd == CMD0 || cmd == CMD8 {
            (crc7(&frame[..5]) << 1) | 1
        } else {
            0x01
        };

        trace!("CMD{} arg {:x}", cmd & 0x3F, arg);

        for _ in 0..COMMAND_ATTEMPTS {
            for byte in frame.iter() {
                self.send(*byte)?;
            }

            // CMD12 is answered one stuff byte late.
            if cmd == CMD12 {
                self.receive()?;
            }

            let mut response = 0xFF;
            for _ in 0..RESPONSE_WINDOW {
                response = self.receive()?;
                if response & 0x80 == 0 {
                    break;
                }
            }

            if response == 0xFF {
                return Err(Error::TimeoutCommand(cmd & 0x3F));
            }
            if response & R1_CRC_ERROR != 0 {
                warn!("CMD{} rejected on CRC, resending", cmd & 0x3F);
                continue;
            }
            return Ok(response);
        }
        Err(Error::CommandCrc(cmd & 0x3F))
    }

    /// Issue an application-specific command (CMD55 prefix included).
    ///
    /// A CMD55 answered with anything beyond the idle bit is returned
    /// verbatim so the caller sees why the prefix was refused.
    pub fn acommand(&mut self, cmd: u8, arg: u32) -> Result<u8, Error> {
        let response = self.command(CMD55, 0)?;
        if response & !R1_IDLE_STATE != 0 {
            return Ok(response);
        }
        // Some cards want one extra clock between the prefix and the
        // command proper.
        self.receive()?;
        self.command(cmd, arg)
    }

    /// Read the four trailing big-endian bytes of an R3 or R7 response.
    pub fn read_extended(&mut self) -> Result<u32, Error> {
        let mut value = 0u32;
        for _ in 0..4 {
            value = (value << 8) | u32::from(self.receive()?);
        }
        Ok(value)
    }

    /// Receive one data block into `buffer`.
    ///
    /// Waits for the data-start token, moves the payload (in 16-bit frames
    /// when large-frame mode is on), and checks the CRC16 trailer when CRC
    /// checking is enabled.
    pub fn read_data(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        let token = self.wait_data_token()?;
        if token != DATA_START_BLOCK {
            warn!("expected data start, card sent {:x}", token);
            return Err(Error::ReadError);
        }

        let crc = if self.wide_frames {
            self.with_wide_frames(|spi| {
                for chunk in buffer.chunks_exact_mut(2) {
                    let word = spi.transfer16(0xFFFF).map_err(|_| Error::Transport)?;
                    chunk[0] = (word >> 8) as u8;
                    chunk[1] = word as u8;
                }
                spi.transfer16(0xFFFF).map_err(|_| Error::Transport)
            })?
        } else {
            for byte in buffer.iter_mut() {
                *byte = self.receive()?;
            }
            let mut crc = u16::from(self.receive()?) << 8;
            crc |= u16::from(self.receive()?);
            crc
        };

        if self.use_crc {
            let computed = crc16(buffer);
            if crc != computed {
                return Err(Error::DataCrc(crc, computed));
            }
        }
        Ok(())
    }

    /// Send one data block prefixed with `token` and return the card's
    /// data-response token (low five bits).
    pub fn write_data(&mut self, token: u8, buffer: &[u8]) -> Result<u8, Error> {
        let crc = if self.use_crc { crc16(buffer) } else { 0xFFFF };

        self.wait_ready(READY_TIMEOUT_MS)?;
        self.send(token)?;

        if self.wide_frames {
            self.with_wide_frames(|spi| {
                for chunk in buffer.chunks_exact(2) {
                    let word = (u16::from(chunk[0]) << 8) | u16::from(chunk[1]);
                    spi.transfer16(word).map_err(|_| Error::Transport)?;
                }
                spi.transfer16(crc).map_err(|_| Error::Transport)
            })?;
        } else {
            for byte in buffer.iter() {
                self.send(*byte)?;
            }
            self.send((crc >> 8) as u8)?;
            self.send(crc as u8)?;
        }

        Ok(self.receive()? & DATA_RES_MASK)
    }

    fn wait_data_token(&mut self) -> Result<u8, Error> {
        for _ in 0..DATA_TOKEN_TIMEOUT_MS {
            let byte = self.receive()?;
            if byte != 0xFF {
                return Ok(byte);
            }
            self.delay.delay_ms(1);
        }
        Err(Error::TimeoutReadBuffer)
    }

    /// Run `f` with the bus in 16-bit frames, restoring 8-bit frames on
    /// every exit path. Payloads moved here are always an even number of
    /// bytes.
    fn with_wide_frames<R>(
        &mut self,
        f: impl FnOnce(&mut SPI) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.spi
            .set_frame_width(FrameWidth::Bits16)
            .map_err(|_| Error::Transport)?;
        let result = f(&mut *self.spi);
        let restored = self.spi.set_frame_width(FrameWidth::Bits8);
        let value = result?;
        restored.map_err(|_| Error::Transport)?;
        Ok(value)
    }
}
