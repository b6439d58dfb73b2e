//! # sdmmc-disk
//!
//! > An SPI-mode SD/MMC card driver written in Embedded Rust
//!
//! This crate drives SD and MMC memory cards over a plain SPI bus and
//! presents them as the block device a FAT file-system layer expects:
//! initialize, status, sector read/write, sync and sector count. It is
//! written in pure Rust, is `#![no_std]` and does not use `alloc`; all data
//! buffers are caller-owned.
//!
//! The driver handles socket presence tracking (including an ejection
//! latched from the card-detect interrupt), the cold-initialization
//! decision tree across MMC, SD v1, SD v2 and SDHC cards, optional CRC
//! checking on commands and data, optional 16-bit data frames, and
//! multiple-block streams with the abort/rollback recovery the cards
//! provide.
//!
//! ## Using the crate
//!
//! You will need an SPI peripheral implementing [`SdSpi`], two GPIOs
//! (chip-select output, card-detect input) and a millisecond delay:
//!
//! ```rust,ignore
//! let mut disk = sdmmc_disk::SdMmcDisk::new(spi, cs, card_detect, delay);
//! let status = disk.disk_initialize();
//! if status == sdmmc_disk::Status::empty() {
//!     let mut sector = [0u8; 512];
//!     disk.disk_read(&mut sector, 0, 1)?;
//! }
//! ```
//!
//! ## Features
//!
//! * `log` (default): route driver diagnostics through the `log` crate.
//! * `defmt-log`: route them through `defmt` instead.
//!
//! Make sure that exactly one of the two logging features is enabled.

#![cfg_attr(not(test), no_std)]


pub mod bus;
pub mod diskio;
pub mod sdmmc;

pub use crate::bus::{FrameWidth, SdSpi};
pub use crate::diskio::{DiskError, Status};
pub use crate::sdmmc::{CardKind, Error as SdMmcError, Options, SdMmcDisk, SocketSwitch};
