//! The control surface of an FTDI device, as seen by the capture engine.
//!
//! This mirrors the small subset of the D2XX API that the engine needs. Once the
//! chip is in MPSSE mode everything else travels as opcodes over [`Transport::write`]
//! and [`Transport::read`].

#[cfg(test)]
pub(crate) mod mock;

use crate::Error;
use std::time::Duration;

/// Largest USB transfer size accepted by [`Transport::set_usb_parameters`].
pub const MAX_USB_TRANSFER: usize = 65536;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BitMode {
    Reset = 0,
    Mpsse = 2,
}

/// Which on-chip queues to discard.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Purge {
    Rx,
    Tx,
    Both,
}

pub trait Transport {
    /// Reset the SIO state of the chip.
    fn reset(&mut self) -> Result<(), Error>;
    fn set_bitmode(&mut self, mask: u8, mode: BitMode) -> Result<(), Error>;
    /// Inbound and outbound USB transfer sizes, each at most [`MAX_USB_TRANSFER`].
    fn set_usb_parameters(&mut self, in_size: usize, out_size: usize) -> Result<(), Error>;
    /// `None` disables the character.
    fn set_chars(&mut self, event: Option<u8>, error: Option<u8>) -> Result<(), Error>;
    fn set_latency_timer(&mut self, latency: Duration) -> Result<(), Error>;
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<(), Error>;
    fn purge(&mut self, purge: Purge) -> Result<(), Error>;
    /// Number of bytes that can be read without blocking.
    fn queue_status(&mut self) -> Result<usize, Error>;
    /// Blocking write; returns the number of bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize, Error>;
    /// Blocking read; returns early with fewer bytes when the read timeout expires.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn reset(&mut self) -> Result<(), Error> {
        (**self).reset()
    }
    fn set_bitmode(&mut self, mask: u8, mode: BitMode) -> Result<(), Error> {
        (**self).set_bitmode(mask, mode)
    }
    fn set_usb_parameters(&mut self, in_size: usize, out_size: usize) -> Result<(), Error> {
        (**self).set_usb_parameters(in_size, out_size)
    }
    fn set_chars(&mut self, event: Option<u8>, error: Option<u8>) -> Result<(), Error> {
        (**self).set_chars(event, error)
    }
    fn set_latency_timer(&mut self, latency: Duration) -> Result<(), Error> {
        (**self).set_latency_timer(latency)
    }
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<(), Error> {
        (**self).set_timeouts(read, write)
    }
    fn purge(&mut self, purge: Purge) -> Result<(), Error> {
        (**self).purge(purge)
    }
    fn queue_status(&mut self) -> Result<usize, Error> {
        (**self).queue_status()
    }
    fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        (**self).write(data)
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).read(buf)
    }
}

/// Read and throw away everything currently queued on the inbound side.
///
/// Returns the bytes that were discarded.
pub fn drain_and_discard(transport: &mut impl Transport) -> Result<Vec<u8>, Error> {
    let mut discarded = Vec::new();
    loop {
        let queued = transport.queue_status()?;
        if queued == 0 {
            return Ok(discarded);
        }
        let start = discarded.len();
        discarded.resize(start + queued, 0);
        let read = transport.read(&mut discarded[start..])?;
        discarded.truncate(start + read);
        if read == 0 {
            return Ok(discarded);
        }
    }
}
