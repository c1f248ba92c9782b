//! Receive-only SPI capture for FTDI chips running in MPSSE mode.
//!
//! The FTDI H-series chips (FT232H, FT2232H, FT4232H) contain a multi-protocol
//! synchronous serial engine. This crate puts that engine into SPI master mode,
//! clocks fixed-width samples in from a streaming peripheral in large batches,
//! and writes every sample out as bit-string text.
//!
//! The device is driven directly over USB with [nusb]; no vendor library is needed.
//!
//! # Quickstart
//!
//! * Linux users only: Add [udev rules].
//!
//! ```no_run
//! use mpsse_capture::{Config, DeviceSelector, Session, capture, sink};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! config.validate()?;
//! let mut session = Session::open(&DeviceSelector::Index(0), &config.usb)?;
//! session.bring_up(&config.spi, &config.timing)?;
//! let mut sink = sink::open_files(
//!     "output.txt",
//!     config.capture.counter.map(|field| ("CounterOutput.txt", field)),
//!     config.spi.sample_width,
//! )?;
//! let report = capture::run(&mut session, &config.capture, &mut sink)?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//!
//! * Receive only: the engine never drives data on MOSI.
//! * Limited device support: FT232H, FT2232H, FT4232H (60MHz reference clock).
//! * Capture is single threaded; [`sink::BoundedSink`] can move file writing to a second thread.
//!
//! [udev rules]: https://github.com/probe-rs/webpage/blob/master/src/static/files/69-probe-rs.rules

#![forbid(unsafe_code)]

pub mod capture;
pub mod config;
pub mod delay;
mod error;
pub mod ftdaye;
mod list;
pub mod mpsse;
mod mpsse_cmd;
pub mod retry;
pub mod session;
pub mod sink;
pub mod spi;
pub mod transport;

pub use config::Config;
pub use error::{Error, Step};
pub use list::{DeviceSelector, FtdiDeviceInfo, enumerate, select};
pub use session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    Am,
    Bm,
    FT2232D,
    R,
    FT2232H,
    FT4232H,
    FT232H,
    FT230X,
}
impl ChipType {
    /// Detect the chip from `bcdDevice`, the way libftdi does.
    pub(crate) const fn from_device_version(version: u16, has_serial: bool) -> Option<Self> {
        match version {
            0x400 => Some(ChipType::Bm),
            0x200 if !has_serial => Some(ChipType::Bm),
            0x200 => Some(ChipType::Am),
            0x500 => Some(ChipType::FT2232D),
            0x600 => Some(ChipType::R),
            0x700 => Some(ChipType::FT2232H),
            0x800 => Some(ChipType::FT4232H),
            0x900 => Some(ChipType::FT232H),
            0x1000 => Some(ChipType::FT230X),
            _ => None,
        }
    }
    pub(crate) const fn mpsse_list(self) -> &'static [Interface] {
        match self {
            ChipType::FT232H => &[Interface::A],
            ChipType::FT2232H | ChipType::FT4232H => &[Interface::A, Interface::B],
            _ => &[],
        }
    }
    /// MPSSE reference clock with clock-divide-by-5 disabled.
    ///
    /// Only the H-series chips have a 60MHz reference; the FT2232D is fixed at 12MHz
    /// and has no divide-by-5 switch, so its divisor math differs and it is not supported.
    pub const fn reference_clock_hz(self) -> Option<u32> {
        match self {
            ChipType::FT232H | ChipType::FT2232H | ChipType::FT4232H => Some(60_000_000),
            _ => None,
        }
    }
    pub(crate) const fn max_packet_size(self) -> usize {
        match self {
            ChipType::FT232H | ChipType::FT2232H | ChipType::FT4232H => 512,
            _ => 64,
        }
    }
}
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Interface {
    A = 1,
    B = 2,
}

impl Interface {
    pub(crate) const fn read_ep(self) -> u8 {
        match self {
            Interface::A => 0x81,
            Interface::B => 0x83,
        }
    }

    pub(crate) const fn write_ep(self) -> u8 {
        match self {
            Interface::A => 0x02,
            Interface::B => 0x04,
        }
    }

    pub(crate) const fn index(self) -> u16 {
        self as u16
    }

    pub(crate) const fn interface_number(self) -> u8 {
        (self as u8) - 1
    }
}
/// A lower-byte (ADBUS) pin. The upper byte is never used for SPI capture.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Pin(pub usize);
impl Pin {
    pub const fn mask(self) -> u8 {
        1 << self.0
    }
}
