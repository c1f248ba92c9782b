//! A simulated FT232H that interprets the MPSSE command stream.

use super::{BitMode, Purge, Transport};
use crate::Error;
use std::{collections::VecDeque, time::Duration};

/// Control requests seen by the simulated chip, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Control {
    Reset,
    BitMode(u8, BitMode),
    UsbParameters(usize, usize),
    Chars(Option<u8>, Option<u8>),
    Latency(Duration),
    Timeouts(Duration, Duration),
    Purge(Purge),
}

pub(crate) struct SimulatedChip {
    pub(crate) controls: Vec<Control>,
    pub(crate) writes: Vec<Vec<u8>>,
    rx: VecDeque<u8>,
    mode: BitMode,
    /// Bytes answered per bad-command probe; the real chip answers two.
    pub(crate) echo_len: usize,
    /// Total sample bytes the peripheral will ever produce.
    pub(crate) byte_budget: Option<usize>,
    /// At most this many bytes show up per `queue_status` call.
    pub(crate) trickle: Option<usize>,
    /// Fail the n-th write (0-based).
    pub(crate) fail_write: Option<usize>,
    /// Fail the n-th read (0-based).
    pub(crate) fail_read: Option<usize>,
    reads: usize,
    /// Bytes left in the queue before the session was opened.
    pub(crate) stale: Vec<u8>,
    produced: usize,
    pending: VecDeque<u8>,
}

impl Default for SimulatedChip {
    fn default() -> Self {
        Self {
            controls: Vec::new(),
            writes: Vec::new(),
            rx: VecDeque::new(),
            mode: BitMode::Reset,
            echo_len: 2,
            byte_budget: None,
            trickle: None,
            fail_write: None,
            fail_read: None,
            reads: 0,
            stale: Vec::new(),
            produced: 0,
            pending: VecDeque::new(),
        }
    }
}

impl SimulatedChip {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Byte `n` of the peripheral's output stream.
    pub(crate) fn stream_byte(n: usize) -> u8 {
        (n.wrapping_mul(7).wrapping_add(n / 251) ^ 0x5a) as u8
    }

    pub(crate) fn mode(&self) -> BitMode {
        self.mode
    }

    /// Everything written after bring-up, concatenated.
    pub(crate) fn written_since(&self, write_index: usize) -> Vec<u8> {
        self.writes[write_index..].concat()
    }

    fn produce(&mut self, len: usize) {
        let len = match self.byte_budget {
            Some(budget) => len.min(budget.saturating_sub(self.produced)),
            None => len,
        };
        for _ in 0..len {
            self.pending.push_back(Self::stream_byte(self.produced));
            self.produced += 1;
        }
    }

    fn interpret(&mut self, data: &[u8]) {
        let mut i = 0;
        while i < data.len() {
            let op = data[i];
            i += match op {
                0x80 | 0x82 | 0x86 => 3,
                0x84 | 0x85 | 0x87 | 0x8a | 0x8b | 0x8c | 0x8d | 0x96 | 0x97 => 1,
                0x20 | 0x24 | 0x28 | 0x2c => {
                    let len = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize + 1;
                    self.produce(len);
                    3
                }
                _ => {
                    let echo = [0xFA, op];
                    for n in 0..self.echo_len {
                        self.pending.push_back(echo[n % 2]);
                    }
                    1
                }
            };
        }
    }

    fn deliver(&mut self) {
        let n = self.trickle.unwrap_or(usize::MAX).min(self.pending.len());
        self.rx.extend(self.pending.drain(..n));
    }
}

impl Transport for SimulatedChip {
    fn reset(&mut self) -> Result<(), Error> {
        self.controls.push(Control::Reset);
        // stale bytes survive a SIO reset until purged or drained
        let stale = std::mem::take(&mut self.stale);
        self.rx.extend(stale);
        Ok(())
    }
    fn set_bitmode(&mut self, mask: u8, mode: BitMode) -> Result<(), Error> {
        self.controls.push(Control::BitMode(mask, mode));
        self.mode = mode;
        Ok(())
    }
    fn set_usb_parameters(&mut self, in_size: usize, out_size: usize) -> Result<(), Error> {
        self.controls.push(Control::UsbParameters(in_size, out_size));
        Ok(())
    }
    fn set_chars(&mut self, event: Option<u8>, error: Option<u8>) -> Result<(), Error> {
        self.controls.push(Control::Chars(event, error));
        Ok(())
    }
    fn set_latency_timer(&mut self, latency: Duration) -> Result<(), Error> {
        self.controls.push(Control::Latency(latency));
        Ok(())
    }
    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<(), Error> {
        self.controls.push(Control::Timeouts(read, write));
        Ok(())
    }
    fn purge(&mut self, purge: Purge) -> Result<(), Error> {
        self.controls.push(Control::Purge(purge));
        Ok(())
    }
    fn queue_status(&mut self) -> Result<usize, Error> {
        self.deliver();
        Ok(self.rx.len())
    }
    fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        if self.fail_write == Some(self.writes.len()) {
            self.writes.push(Vec::new());
            return Err(Error::Usb(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            )));
        }
        self.writes.push(data.to_vec());
        if self.mode == BitMode::Mpsse {
            self.interpret(data);
        }
        Ok(data.len())
    }
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let index = self.reads;
        self.reads += 1;
        if self.fail_read == Some(index) {
            return Err(Error::Usb(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "simulated read failure",
            )));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
