//! SPI bus personality of the MPSSE: clock rate, mode, pins and chip select.

use crate::{Error, Pin, mpsse_cmd};
use eh1::spi::{MODE_0, Mode, Phase, Polarity};

const SCK_MASK: u8 = Pin(0).mask();
const MOSI_MASK: u8 = Pin(1).mask();

/// MPSSE reference clock of the H-series chips with divide-by-5 disabled.
pub const REFERENCE_CLOCK_HZ: u32 = 60_000_000;

/// Bit clock produced by `divisor`: `60MHz / ((1 + divisor) * 2)`.
pub const fn bit_clock_hz(divisor: u16) -> u32 {
    REFERENCE_CLOCK_HZ / ((1 + divisor as u32) * 2)
}

/// Smallest divisor whose bit clock does not exceed `frequency_hz`.
///
/// Frequencies above 30MHz clamp to divisor 0, frequencies below ~458Hz clamp to `u16::MAX`.
pub fn divisor_for(frequency_hz: u32) -> u16 {
    let max_frequency = REFERENCE_CLOCK_HZ / 2;
    if frequency_hz == 0 {
        return u16::MAX;
    }
    let divisor = max_frequency.div_ceil(frequency_hz).saturating_sub(1);
    u16::try_from(divisor).unwrap_or(u16::MAX)
}

/// Clock idle level and capture edge, derived together from one SPI mode.
///
/// The GPIO idle level of SCK and the clock-in opcode must agree, or every
/// sample is shifted by one clock. Both are read from this one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiTiming {
    idle_high: bool,
    sample_on_falling: bool,
}

impl SpiTiming {
    pub fn from_mode(mode: Mode) -> Self {
        let idle_high = mode.polarity == Polarity::IdleHigh;
        let second_edge = mode.phase == Phase::CaptureOnSecondTransition;
        // first edge is rising when idling low, falling when idling high
        Self {
            idle_high,
            sample_on_falling: idle_high != second_edge,
        }
    }
    pub fn idle_high(self) -> bool {
        self.idle_high
    }
    pub fn sample_on_falling(self) -> bool {
        self.sample_on_falling
    }
    /// Clock-in opcode matching the capture edge.
    pub fn read_opcode(self) -> u8 {
        mpsse_cmd::clock_bytes_in_opcode(self.sample_on_falling)
    }
    fn sck_value(self) -> u8 {
        if self.idle_high { SCK_MASK } else { 0 }
    }
}

/// How the chip-select line frames samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipSelect {
    /// No chip-select pin is driven.
    None,
    /// Driven to its asserted level once and held; the peripheral streams
    /// continuously and frames samples itself.
    Held { pin: usize, active_high: bool },
    /// Asserted before and deasserted after every sample read.
    PerSample { pin: usize, active_high: bool },
}

impl Default for ChipSelect {
    fn default() -> Self {
        ChipSelect::Held {
            pin: 3,
            active_high: false,
        }
    }
}

impl ChipSelect {
    fn pin(self) -> Option<(Pin, bool)> {
        match self {
            ChipSelect::None => None,
            ChipSelect::Held { pin, active_high } | ChipSelect::PerSample { pin, active_high } => {
                Some((Pin(pin), active_high))
            }
        }
    }
    fn level(active_high: bool, asserted: bool) -> bool {
        active_high == asserted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    pub clock_divisor: u16,
    pub mode: Mode,
    pub chip_select: ChipSelect,
    /// Bytes clocked in per sample.
    pub sample_width: usize,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            // 6MHz
            clock_divisor: 4,
            mode: MODE_0,
            chip_select: ChipSelect::default(),
            sample_width: 20,
        }
    }
}

impl SpiConfig {
    pub fn timing(&self) -> SpiTiming {
        SpiTiming::from_mode(self.mode)
    }

    pub fn bit_clock_hz(&self) -> u32 {
        bit_clock_hz(self.clock_divisor)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_width == 0 || self.sample_width > mpsse_cmd::MAX_BYTES_SHIFT {
            return Err(Error::InvalidConfig(format!(
                "sample width {} is outside 1..={}",
                self.sample_width,
                mpsse_cmd::MAX_BYTES_SHIFT
            )));
        }
        if let Some((pin, _)) = self.chip_select.pin() {
            if pin.0 < 3 || pin.0 > 7 {
                return Err(Error::InvalidConfig(format!(
                    "chip select pin AD{} is not free (AD0-AD2 carry SCK/MOSI/MISO)",
                    pin.0
                )));
            }
        }
        Ok(())
    }

    /// GPIO direction of the lower byte: SCK and MOSI out, MISO in, CS out when used.
    pub(crate) fn gpio_direction(&self) -> u8 {
        let cs = self.chip_select.pin().map_or(0, |(pin, _)| pin.mask());
        SCK_MASK | MOSI_MASK | cs
    }

    /// GPIO value of the lower byte with the chip select in the given state.
    pub(crate) fn gpio_value(&self, cs_asserted: bool) -> u8 {
        let cs = match self.chip_select.pin() {
            Some((pin, active_high)) if ChipSelect::level(active_high, cs_asserted) => pin.mask(),
            _ => 0,
        };
        self.timing().sck_value() | cs
    }

    /// GPIO value written at configuration time.
    pub(crate) fn gpio_idle_value(&self) -> u8 {
        match self.chip_select {
            ChipSelect::Held { .. } => self.gpio_value(true),
            ChipSelect::None | ChipSelect::PerSample { .. } => self.gpio_value(false),
        }
    }

    /// Command bytes queued for every sample in a batch.
    pub fn opcode_bytes_per_sample(&self) -> usize {
        match self.chip_select {
            ChipSelect::PerSample { .. } => {
                mpsse_cmd::SHIFT_CMD_LEN + 2 * mpsse_cmd::GPIO_CMD_LEN
            }
            ChipSelect::None | ChipSelect::Held { .. } => mpsse_cmd::SHIFT_CMD_LEN,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ChipSelect, SpiConfig, SpiTiming, bit_clock_hz, divisor_for};
    use eh1::spi::{MODE_0, MODE_1, MODE_2, MODE_3};

    #[test]
    fn divisor_formula() {
        assert_eq!(bit_clock_hz(4), 6_000_000);
        assert_eq!(bit_clock_hz(0), 30_000_000);
        assert_eq!(bit_clock_hz(u16::MAX), 457);
    }

    #[test]
    fn divisor_never_exceeds_request() {
        assert_eq!(divisor_for(6_000_000), 4);
        assert_eq!(divisor_for(30_000_000), 0);
        assert_eq!(divisor_for(100_000_000), 0);
        assert_eq!(divisor_for(7_000_000), 4);
        assert_eq!(divisor_for(1), u16::MAX);
        for f in [1_000u32, 123_456, 5_000_000, 29_999_999] {
            assert!(bit_clock_hz(divisor_for(f)) <= f);
        }
    }

    #[test]
    fn mode_selects_idle_level_and_edge_together() {
        let t = SpiTiming::from_mode(MODE_0);
        assert_eq!((t.idle_high(), t.read_opcode()), (false, 0x20));
        let t = SpiTiming::from_mode(MODE_1);
        assert_eq!((t.idle_high(), t.read_opcode()), (false, 0x24));
        let t = SpiTiming::from_mode(MODE_2);
        assert_eq!((t.idle_high(), t.read_opcode()), (true, 0x24));
        let t = SpiTiming::from_mode(MODE_3);
        assert_eq!((t.idle_high(), t.read_opcode()), (true, 0x20));
    }

    #[test]
    fn default_gpio_matches_continuous_reader() {
        let spi = SpiConfig::default();
        assert_eq!(spi.gpio_direction(), 0x0b);
        assert_eq!(spi.gpio_idle_value(), 0x00);
        assert_eq!(spi.opcode_bytes_per_sample(), 3);
    }

    #[test]
    fn per_sample_chip_select_levels() {
        let spi = SpiConfig {
            mode: MODE_2,
            chip_select: ChipSelect::PerSample {
                pin: 3,
                active_high: false,
            },
            ..Default::default()
        };
        assert_eq!(spi.gpio_idle_value(), 0x09);
        assert_eq!(spi.gpio_value(true), 0x01);
        assert_eq!(spi.opcode_bytes_per_sample(), 9);

        let spi = SpiConfig {
            chip_select: ChipSelect::PerSample {
                pin: 4,
                active_high: true,
            },
            ..Default::default()
        };
        assert_eq!(spi.gpio_direction(), 0x13);
        assert_eq!(spi.gpio_idle_value(), 0x00);
        assert_eq!(spi.gpio_value(true), 0x10);
    }

    #[test]
    fn no_chip_select_leaves_pin_alone() {
        let spi = SpiConfig {
            chip_select: ChipSelect::None,
            ..Default::default()
        };
        assert_eq!(spi.gpio_direction(), 0x03);
        assert_eq!(spi.gpio_value(true), 0x00);
    }

    #[test]
    fn validation() {
        assert!(SpiConfig::default().validate().is_ok());
        let bad_width = SpiConfig {
            sample_width: 0,
            ..Default::default()
        };
        assert!(bad_width.validate().is_err());
        let bad_pin = SpiConfig {
            chip_select: ChipSelect::Held {
                pin: 2,
                active_high: false,
            },
            ..Default::default()
        };
        assert!(bad_pin.validate().is_err());
    }
}
