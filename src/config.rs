//! Every tunable of a capture run, with the defaults of the FT232H reader.

use crate::{
    Error,
    retry::RetryPolicy,
    session::DEFAULT_COMMAND_CAPACITY,
    sink::BitField,
    spi::SpiConfig,
    transport::MAX_USB_TRANSFER,
};
use std::time::Duration;

/// USB-level parameters applied during [`Session::setup`](crate::Session::setup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbConfig {
    pub in_transfer_size: usize,
    pub out_transfer_size: usize,
    pub latency_timer: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            in_transfer_size: MAX_USB_TRANSFER,
            out_transfer_size: MAX_USB_TRANSFER,
            latency_timer: Duration::from_millis(2),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }
}

impl UsbConfig {
    pub fn validate(&self) -> Result<(), Error> {
        for (name, size) in [
            ("in", self.in_transfer_size),
            ("out", self.out_transfer_size),
        ] {
            if size == 0 || size > MAX_USB_TRANSFER {
                return Err(Error::InvalidConfig(format!(
                    "{name} transfer size {size} is outside 1..={MAX_USB_TRANSFER}"
                )));
            }
        }
        let latency = self.latency_timer.as_millis();
        if !(1..=255).contains(&latency) {
            return Err(Error::InvalidConfig(format!(
                "latency timer {latency}ms is outside 1..=255ms"
            )));
        }
        Ok(())
    }
}

/// Blocking waits between bring-up steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BringUpTiming {
    /// After entering MPSSE mode.
    pub settle: Duration,
    /// After each bad-command probe, before draining its echo.
    pub probe_wait: Duration,
    /// After programming the clock divisor and GPIO.
    pub gpio_settle: Duration,
    /// After disabling loopback.
    pub loopback_settle: Duration,
}

impl Default for BringUpTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(50),
            probe_wait: Duration::from_millis(10),
            gpio_settle: Duration::from_millis(20),
            loopback_settle: Duration::from_millis(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub total_samples: usize,
    pub batch_size: usize,
    /// Command buffer capacity in bytes.
    pub command_capacity: usize,
    /// Derived stream written next to the raw samples.
    pub counter: Option<BitField>,
    pub retry: RetryPolicy,
    /// Log progress every this many batches; 0 disables progress lines.
    pub progress_every: usize,
    pub stop_on_shortfall: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            total_samples: 10_000,
            batch_size: 2000,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            counter: Some(BitField {
                start: 124,
                width: 24,
            }),
            retry: RetryPolicy::default(),
            progress_every: 1,
            stop_on_shortfall: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub usb: UsbConfig,
    pub spi: SpiConfig,
    pub timing: BringUpTiming,
    pub capture: CaptureConfig,
}

impl Config {
    /// Check every parameter before the device is touched.
    pub fn validate(&self) -> Result<(), Error> {
        self.usb.validate()?;
        self.spi.validate()?;
        let capture = &self.capture;
        if capture.total_samples == 0 || capture.batch_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "total samples ({}) and batch size ({}) must be positive",
                capture.total_samples, capture.batch_size
            )));
        }
        let required = capture.batch_size * self.spi.opcode_bytes_per_sample() + 1;
        if required > capture.command_capacity {
            return Err(Error::BufferOverflow {
                required,
                capacity: capture.command_capacity,
            });
        }
        if let Some(field) = capture.counter {
            field.check(self.spi.sample_width * 8)?;
        }
        let fill_time = self.batch_fill_time();
        if self.usb.read_timeout <= fill_time {
            return Err(Error::InvalidConfig(format!(
                "read timeout {:?} does not cover one batch ({fill_time:?} at {}Hz)",
                self.usb.read_timeout,
                self.spi.bit_clock_hz()
            )));
        }
        Ok(())
    }

    /// Time the bus needs to clock in one full batch.
    pub fn batch_fill_time(&self) -> Duration {
        let bits = (self.capture.batch_size as u128) * (self.spi.sample_width as u128) * 8;
        let nanos = bits * 1_000_000_000 / u128::from(self.spi.bit_clock_hz());
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod test {
    use super::{CaptureConfig, Config, UsbConfig};
    use crate::{
        Error,
        sink::BitField,
        spi::{ChipSelect, SpiConfig},
    };
    use std::time::Duration;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.spi.bit_clock_hz(), 6_000_000);
        // 2000 * 160 bits at 6MHz
        assert_eq!(config.batch_fill_time(), Duration::from_nanos(53_333_333));
    }

    #[test]
    fn latency_bounds() {
        for ms in [0, 256] {
            let usb = UsbConfig {
                latency_timer: Duration::from_millis(ms),
                ..Default::default()
            };
            assert!(matches!(usb.validate(), Err(Error::InvalidConfig(_))));
        }
    }

    #[test]
    fn batch_must_fit_command_buffer() {
        let mut config = Config::default();
        // 10922 * 3 + 1 = 32767
        config.capture.batch_size = 10922;
        config.validate().unwrap();
        config.capture.batch_size = 10923;
        assert!(matches!(
            config.validate(),
            Err(Error::BufferOverflow {
                required: 32770,
                capacity: 32768
            })
        ));
    }

    #[test]
    fn per_sample_chip_select_costs_capacity() {
        let config = Config {
            spi: SpiConfig {
                chip_select: ChipSelect::PerSample {
                    pin: 3,
                    active_high: false,
                },
                ..Default::default()
            },
            capture: CaptureConfig {
                batch_size: 4000,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::BufferOverflow { required: 36001, .. })
        ));
    }

    #[test]
    fn counter_must_fit_sample() {
        let mut config = Config::default();
        config.capture.counter = Some(BitField {
            start: 150,
            width: 24,
        });
        assert!(matches!(
            config.validate(),
            Err(Error::FieldOutOfRange {
                sample_bits: 160,
                ..
            })
        ));
        config.capture.counter = None;
        config.validate().unwrap();
    }

    #[test]
    fn zero_counts_rejected() {
        let mut config = Config::default();
        config.capture.total_samples = 0;
        assert!(config.validate().is_err());
        let mut config = Config::default();
        config.capture.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn read_timeout_must_cover_a_batch() {
        let mut config = Config::default();
        config.spi.clock_divisor = u16::MAX;
        config.capture.batch_size = 1000;
        // 160000 bits at 457Hz is about 350s
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig(_))
        ));
        config.usb.read_timeout = Duration::from_secs(400);
        config.validate().unwrap();
    }
}
