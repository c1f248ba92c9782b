//! An open FTDI device owned by the capture engine.

use crate::{
    Error, Interface, Step,
    config::UsbConfig,
    delay::Delay,
    ftdaye::FtdiContext,
    list::{self, DeviceSelector},
    mpsse::MpsseState,
    mpsse_cmd::MpsseCmdBuilder,
    spi::SpiConfig,
    transport::{self, BitMode, Purge, Transport},
};
use eh1::delay::DelayNs;

/// Default command buffer capacity in bytes.
pub const DEFAULT_COMMAND_CAPACITY: usize = 32768;

/// One open device, its buffers, and where it is in the MPSSE bring-up.
///
/// All waits go through the `D` clock so the whole engine can run against a fake.
/// Dropping a session returns the chip to reset bit mode.
pub struct Session<T: Transport, D: DelayNs = Delay> {
    pub(crate) transport: T,
    pub(crate) delay: D,
    pub(crate) state: MpsseState,
    pub(crate) bitmode: BitMode,
    pub(crate) spi: Option<SpiConfig>,
    pub(crate) command: MpsseCmdBuilder,
    pub(crate) command_capacity: usize,
    pub(crate) response: Vec<u8>,
    device: Option<(usize, String)>,
    usb: UsbConfig,
}

impl Session<FtdiContext, Delay> {
    /// Find a device, open it and run [`Session::setup`] on it.
    pub fn open(selector: &DeviceSelector, usb: &UsbConfig) -> Result<Self, Error> {
        let devices = list::enumerate()?;
        log::info!("Found {} FTDI device(s)", devices.len());
        let info = list::select(&devices, selector)?;
        let chip_type = info.chip_type;
        if chip_type.reference_clock_hz().is_none()
            || !chip_type.mpsse_list().contains(&Interface::A)
        {
            return Err(Error::UnsupportedChip(chip_type));
        }
        let context = FtdiContext::open(&info.usb_device, Interface::A, chip_type)?;
        log::info!(
            "Opened device {} '{}' ({chip_type:?})",
            info.index,
            info.description
        );
        let mut session = Self::setup(context, Delay, usb)?;
        session.device = Some((info.index, info.description.clone()));
        Ok(session)
    }
}

impl<T: Transport, D: DelayNs> Session<T, D> {
    /// Prepare an opened transport for MPSSE bring-up.
    ///
    /// Stale bytes from an earlier session are discarded before anything is configured.
    pub fn setup(mut transport: T, delay: D, usb: &UsbConfig) -> Result<Self, Error> {
        usb.validate()?;
        transport.reset().map_err(Error::at(Step::Reset))?;
        transport
            .purge(Purge::Both)
            .map_err(Error::at(Step::Purge))?;
        let stale = transport::drain_and_discard(&mut transport).map_err(Error::at(Step::Purge))?;
        if !stale.is_empty() {
            log::debug!("Discarded {} stale bytes", stale.len());
        }
        transport
            .set_usb_parameters(usb.in_transfer_size, usb.out_transfer_size)
            .map_err(Error::at(Step::UsbParameters))?;
        transport
            .set_chars(None, None)
            .map_err(Error::at(Step::Chars))?;
        transport
            .set_timeouts(usb.read_timeout, usb.write_timeout)
            .map_err(Error::at(Step::Timeouts))?;
        transport
            .set_latency_timer(usb.latency_timer)
            .map_err(Error::at(Step::LatencyTimer))?;

        Ok(Self {
            transport,
            delay,
            state: MpsseState::Reset,
            bitmode: BitMode::Reset,
            spi: None,
            command: MpsseCmdBuilder::with_capacity(DEFAULT_COMMAND_CAPACITY),
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            response: Vec::new(),
            device: None,
            usb: usb.clone(),
        })
    }

    /// Change the command buffer capacity; batches that would not fit are rejected.
    pub fn set_command_capacity(&mut self, capacity: usize) {
        self.command_capacity = capacity;
        let additional = capacity.saturating_sub(self.command.len());
        self.command.reserve(additional);
    }

    pub fn command_capacity(&self) -> usize {
        self.command_capacity
    }

    pub fn state(&self) -> MpsseState {
        self.state
    }

    pub fn bitmode(&self) -> BitMode {
        self.bitmode
    }

    /// Clock divisor programmed during bring-up.
    pub fn clock_divisor(&self) -> Option<u16> {
        self.spi.map(|spi| spi.clock_divisor)
    }

    pub fn usb_config(&self) -> &UsbConfig {
        &self.usb
    }

    /// Enumeration index and description, when opened through [`Session::open`].
    pub fn device(&self) -> Option<(usize, &str)> {
        self.device
            .as_ref()
            .map(|(index, description)| (*index, description.as_str()))
    }

    /// Return the chip to reset bit mode and release the device.
    pub fn close(mut self) -> Result<(), Error> {
        self.reset_bitmode()
    }

    fn reset_bitmode(&mut self) -> Result<(), Error> {
        if self.bitmode == BitMode::Reset {
            return Ok(());
        }
        self.transport.set_bitmode(0, BitMode::Reset)?;
        self.bitmode = BitMode::Reset;
        self.state = MpsseState::Reset;
        log::debug!("Bit mode reset");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub(crate) fn delay(&self) -> &D {
        &self.delay
    }
}

impl<T: Transport, D: DelayNs> Drop for Session<T, D> {
    fn drop(&mut self) {
        if let Err(e) = self.reset_bitmode() {
            log::warn!("Failed to reset bit mode on close: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::Session;
    use crate::{
        Error, Step,
        config::UsbConfig,
        delay::test::CountingDelay,
        transport::{
            BitMode, Purge, Transport,
            mock::{Control, SimulatedChip},
        },
    };
    use std::time::Duration;

    #[test]
    fn setup_order_and_parameters() {
        let mut chip = SimulatedChip::new();
        let session = Session::setup(&mut chip, CountingDelay::default(), &UsbConfig::default())
            .unwrap();
        drop(session);
        assert_eq!(
            chip.controls,
            [
                Control::Reset,
                Control::Purge(Purge::Both),
                Control::UsbParameters(65536, 65536),
                Control::Chars(None, None),
                Control::Timeouts(Duration::from_secs(5), Duration::from_secs(5)),
                Control::Latency(Duration::from_millis(2)),
            ]
        );
    }

    #[test]
    fn stale_bytes_are_discarded() {
        let mut chip = SimulatedChip::new();
        chip.stale = vec![0xde, 0xad, 0xbe, 0xef];
        let mut session =
            Session::setup(&mut chip, CountingDelay::default(), &UsbConfig::default()).unwrap();
        assert_eq!(session.transport.queue_status().unwrap(), 0);
    }

    #[test]
    fn invalid_usb_config_rejected_before_io() {
        let mut chip = SimulatedChip::new();
        let usb = UsbConfig {
            in_transfer_size: 1 << 20,
            ..Default::default()
        };
        let err = Session::setup(&mut chip, CountingDelay::default(), &usb).err();
        assert!(matches!(err, Some(Error::InvalidConfig(_))));
        assert!(chip.controls.is_empty());
    }

    #[test]
    fn close_resets_bitmode() {
        let mut chip = SimulatedChip::new();
        let mut session =
            Session::setup(&mut chip, CountingDelay::default(), &UsbConfig::default()).unwrap();
        session
            .bring_up(&Default::default(), &Default::default())
            .unwrap();
        assert_eq!(session.bitmode(), BitMode::Mpsse);
        session.close().unwrap();
        assert_eq!(chip.mode(), BitMode::Reset);
        assert_eq!(
            chip.controls.last(),
            Some(&Control::BitMode(0, BitMode::Reset))
        );
    }

    #[test]
    fn configuration_failure_names_the_step() {
        let err = Error::at(Step::Timeouts)(Error::DeviceNotFound);
        assert_eq!(err.to_string(), "Configuration failed at step 'set timeouts'");
    }
}
