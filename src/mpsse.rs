//! MPSSE bring-up: from a freshly set-up session to a configured SPI master.

use crate::{
    Error, Step,
    config::BringUpTiming,
    delay::wait,
    mpsse_cmd::{BAD_COMMAND_ECHO, SYNC_PROBES},
    session::Session,
    spi::SpiConfig,
    transport::{self, BitMode, Transport},
};
use eh1::delay::DelayNs;

/// Where a session is in the bring-up sequence.
///
/// Data-clocking opcodes are only valid in [`MpsseState::Configured`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpsseState {
    Reset,
    BitbangMpsse,
    Synchronized,
    Configured,
}

impl<T: Transport, D: DelayNs> Session<T, D> {
    /// Run the whole bring-up sequence.
    ///
    /// Always starts over from reset bit mode, so it may be called again on a
    /// configured session to change SPI settings.
    pub fn bring_up(&mut self, spi: &SpiConfig, timing: &BringUpTiming) -> Result<(), Error> {
        spi.validate()?;
        self.enter_mpsse(timing)?;
        self.synchronize(timing)?;
        self.configure(spi, timing)?;
        Ok(())
    }

    fn enter_mpsse(&mut self, timing: &BringUpTiming) -> Result<(), Error> {
        self.state = MpsseState::Reset;
        self.spi = None;
        self.transport
            .set_bitmode(0, BitMode::Reset)
            .map_err(Error::at(Step::BitModeReset))?;
        self.bitmode = BitMode::Reset;
        self.transport
            .set_bitmode(0, BitMode::Mpsse)
            .map_err(Error::at(Step::BitModeMpsse))?;
        self.bitmode = BitMode::Mpsse;
        wait(&mut self.delay, timing.settle);
        self.transition(MpsseState::BitbangMpsse);
        Ok(())
    }

    /// Flush the command parser with two bad-command probes.
    ///
    /// Whatever the chip answers is discarded, but the writes and the drains must
    /// succeed: an echo left in the queue would shift every sample that follows.
    fn synchronize(&mut self, timing: &BringUpTiming) -> Result<(), Error> {
        for probe in SYNC_PROBES {
            self.command.clear().bad_command(probe);
            self.write_command().map_err(Error::at(Step::Synchronize))?;
            wait(&mut self.delay, timing.probe_wait);
            let echo = transport::drain_and_discard(&mut self.transport)
                .map_err(Error::at(Step::Synchronize))?;
            if echo.windows(2).any(|w| w == [BAD_COMMAND_ECHO, probe]) {
                log::debug!("Probe {probe:#04x} echoed");
            } else {
                log::debug!("Probe {probe:#04x}: {} byte(s), no echo", echo.len());
            }
        }
        self.transition(MpsseState::Synchronized);
        Ok(())
    }

    fn configure(&mut self, spi: &SpiConfig, timing: &BringUpTiming) -> Result<(), Error> {
        self.command
            .clear()
            .disable_clock_divide_by_5()
            .disable_adaptive_clocking()
            .disable_3phase_data_clocking();
        self.write_command()
            .map_err(Error::at(Step::ClockFeatures))?;

        self.command
            .clear()
            .set_clock(spi.clock_divisor)
            .set_gpio_lower(spi.gpio_idle_value(), spi.gpio_direction())
            .set_gpio_upper(0, 0);
        self.write_command()
            .map_err(Error::at(Step::ClockAndGpio))?;
        wait(&mut self.delay, timing.gpio_settle);
        log::info!(
            "Frequency set to {}Hz, {:?}",
            spi.bit_clock_hz(),
            spi.mode.polarity
        );

        self.command.clear().disable_loopback();
        self.write_command().map_err(Error::at(Step::Loopback))?;
        wait(&mut self.delay, timing.loopback_settle);

        self.spi = Some(*spi);
        self.transition(MpsseState::Configured);
        Ok(())
    }

    /// Send the queued command buffer in one write.
    pub(crate) fn write_command(&mut self) -> Result<(), Error> {
        let cmd = self.command.as_slice();
        log::trace!("write {cmd:02x?}");
        let written = self.transport.write(cmd)?;
        if written != cmd.len() {
            return Err(Error::Usb(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short write: {written} of {} bytes", cmd.len()),
            )));
        }
        Ok(())
    }

    fn transition(&mut self, next: MpsseState) {
        log::debug!("MPSSE {:?} -> {next:?}", self.state);
        self.state = next;
    }
}
