//! [`Transport`] for a real FTDI chip, driven over nusb.

use crate::{
    ChipType, Error, Interface,
    transport::{BitMode, MAX_USB_TRANSFER, Purge, Transport},
};
use futures_lite::future::block_on;
use nusb::transfer::{Control, ControlType, Recipient, RequestBuffer};
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

const SIO_RESET_REQUEST: u8 = 0x00;
const SIO_SET_EVENT_CHAR_REQUEST: u8 = 0x06;
const SIO_SET_ERROR_CHAR_REQUEST: u8 = 0x07;
const SIO_SET_LATENCY_TIMER_REQUEST: u8 = 0x09;
const SIO_SET_BITMODE_REQUEST: u8 = 0x0B;

const SIO_RESET_SIO: u16 = 0;
const SIO_RESET_PURGE_RX: u16 = 1;
const SIO_RESET_PURGE_TX: u16 = 2;

/// Every inbound USB packet starts with this many modem-status bytes.
const MODEM_STATUS_LEN: usize = 2;

pub struct FtdiContext {
    /// USB device handle
    handle: nusb::Interface,
    /// FTDI device interface
    interface: Interface,
    write_ep: u8,
    read_ep: u8,
    max_packet_size: usize,
    in_transfer_size: usize,
    out_transfer_size: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    /// Payload received but not yet read, modem status already removed.
    rx: VecDeque<u8>,
}

impl FtdiContext {
    /// Open `usb_device` and claim `interface`, detaching any kernel driver.
    pub fn open(
        usb_device: &nusb::DeviceInfo,
        interface: Interface,
        chip_type: ChipType,
    ) -> Result<Self, Error> {
        if !chip_type.mpsse_list().contains(&interface) {
            return Err(Error::OpenFailed(format!(
                "{chip_type:?} do not support MPSSE on Interface::{interface:?}"
            )));
        }
        let handle = usb_device
            .open()
            .map_err(|e| Error::OpenFailed(e.to_string()))?;
        let max_packet_size = handle
            .active_configuration()
            .ok()
            .and_then(|config| {
                config
                    .interface_alt_settings()
                    .find(|alt| alt.interface_number() == interface.interface_number())
                    .and_then(|alt| alt.endpoints().next().map(|ep| ep.max_packet_size()))
            })
            .unwrap_or(chip_type.max_packet_size());
        let handle = handle
            .detach_and_claim_interface(interface.interface_number())
            .map_err(|e| Error::OpenFailed(format!("claim Interface::{interface:?}: {e}")))?;
        log::debug!("Claimed Interface::{interface:?}, max packet size {max_packet_size}");

        Ok(Self {
            handle,
            interface,
            write_ep: interface.write_ep(),
            read_ep: interface.read_ep(),
            max_packet_size,
            in_transfer_size: MAX_USB_TRANSFER,
            out_transfer_size: MAX_USB_TRANSFER,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            rx: VecDeque::new(),
        })
    }

    fn sio_write(&mut self, request: u8, value: u16) -> Result<(), Error> {
        self.handle
            .control_out_blocking(
                Control {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index: self.interface.index(),
                },
                &[],
                self.write_timeout,
            )
            .map_err(std::io::Error::from)?;

        Ok(())
    }

    fn set_char(&mut self, request: u8, char: Option<u8>) -> Result<(), Error> {
        let value = match char {
            Some(c) => u16::from_le_bytes([c, 1]),
            None => 0,
        };
        self.sio_write(request, value)
    }

    /// One bulk IN transfer. The chip answers within the latency timer even when idle.
    fn poll(&mut self) -> Result<usize, Error> {
        let len = self.in_transfer_size.next_multiple_of(self.max_packet_size);
        let data = block_on(self.handle.bulk_in(self.read_ep, RequestBuffer::new(len)))
            .into_result()
            .map_err(std::io::Error::from)?;
        Ok(strip_modem_status(&data, self.max_packet_size, &mut self.rx))
    }
}

/// Append the payload of each `max_packet_size` packet in `data` to `rx`.
///
/// Returns the number of payload bytes appended.
pub(crate) fn strip_modem_status(
    data: &[u8],
    max_packet_size: usize,
    rx: &mut VecDeque<u8>,
) -> usize {
    let before = rx.len();
    for packet in data.chunks(max_packet_size) {
        if let Some(payload) = packet.get(MODEM_STATUS_LEN..) {
            rx.extend(payload);
        }
    }
    rx.len() - before
}

impl Transport for FtdiContext {
    fn reset(&mut self) -> Result<(), Error> {
        self.sio_write(SIO_RESET_REQUEST, SIO_RESET_SIO)
    }

    fn set_bitmode(&mut self, mask: u8, mode: BitMode) -> Result<(), Error> {
        self.sio_write(
            SIO_SET_BITMODE_REQUEST,
            u16::from_le_bytes([mask, mode as u8]),
        )
    }

    fn set_usb_parameters(&mut self, in_size: usize, out_size: usize) -> Result<(), Error> {
        self.in_transfer_size = in_size.clamp(self.max_packet_size, MAX_USB_TRANSFER);
        self.out_transfer_size = out_size.clamp(1, MAX_USB_TRANSFER);
        Ok(())
    }

    fn set_chars(&mut self, event: Option<u8>, error: Option<u8>) -> Result<(), Error> {
        self.set_char(SIO_SET_EVENT_CHAR_REQUEST, event)?;
        self.set_char(SIO_SET_ERROR_CHAR_REQUEST, error)
    }

    fn set_latency_timer(&mut self, latency: Duration) -> Result<(), Error> {
        let ms = latency.as_millis().clamp(1, 255) as u16;
        self.sio_write(SIO_SET_LATENCY_TIMER_REQUEST, ms)
    }

    fn set_timeouts(&mut self, read: Duration, write: Duration) -> Result<(), Error> {
        self.read_timeout = read;
        self.write_timeout = write;
        Ok(())
    }

    fn purge(&mut self, purge: Purge) -> Result<(), Error> {
        if matches!(purge, Purge::Rx | Purge::Both) {
            self.sio_write(SIO_RESET_REQUEST, SIO_RESET_PURGE_RX)?;
            self.rx.clear();
        }
        if matches!(purge, Purge::Tx | Purge::Both) {
            self.sio_write(SIO_RESET_REQUEST, SIO_RESET_PURGE_TX)?;
        }
        Ok(())
    }

    fn queue_status(&mut self) -> Result<usize, Error> {
        self.poll()?;
        Ok(self.rx.len())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        for chunk in data.chunks(self.out_transfer_size) {
            block_on(self.handle.bulk_out(self.write_ep, chunk.to_vec()))
                .into_result()
                .map_err(std::io::Error::from)?;
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let deadline = Instant::now() + self.read_timeout;
        let mut filled = 0;
        loop {
            let n = self.rx.len().min(buf.len() - filled);
            for (slot, byte) in buf[filled..filled + n].iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            filled += n;
            if filled == buf.len() || Instant::now() >= deadline {
                return Ok(filled);
            }
            self.poll()?;
        }
    }
}
