//! sdmmc-disk - SPI bus access
//!
//! The hardware access the driver needs from its SPI peripheral. The
//! `embedded-hal` transfer traits cover the data path but have no notion of
//! reconfiguring a live bus, and this driver has to do both: initialization
//! runs at a slow clock before switching to the full rate, and data payloads
//! can optionally move in 16-bit frames.

/// SPI frame width.
///
/// The driver runs commands and tokens in 8-bit frames and may move data
/// payloads in 16-bit frames when large-frame mode is enabled.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameWidth {
    /// One byte per frame.
    Bits8,
    /// One big-endian word per frame.
    Bits16,
}

/// Full-duplex SPI access with runtime clock and frame-width control.
pub trait SdSpi {
    /// The error the peripheral can produce. Must be debug formattable.
    type Error: core::fmt::Debug;

    /// Send one byte while receiving one byte.
    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error>;

    /// Send one 16-bit word while receiving one. Only called while the bus
    /// is configured for [`FrameWidth::Bits16`].
    fn transfer16(&mut self, word: u16) -> Result<u16, Self::Error>;

    /// Reconfigure the bus clock, in Hz.
    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error>;

    /// Reconfigure the frame width.
    fn set_frame_width(&mut self, width: FrameWidth) -> Result<(), Self::Error>;
}

impl<T> SdSpi for &mut T
where
    T: SdSpi,
{
    type Error = T::Error;

    fn transfer(&mut self, byte: u8) -> Result<u8, Self::Error> {
        (*self).transfer(byte)
    }

    fn transfer16(&mut self, word: u16) -> Result<u16, Self::Error> {
        (*self).transfer16(word)
    }

    fn set_frequency(&mut self, hz: u32) -> Result<(), Self::Error> {
        (*self).set_frequency(hz)
    }

    fn set_frame_width(&mut self, width: FrameWidth) -> Result<(), Self::Error> {
        (*self).set_frame_width(width)
    }
}
