//! MPSSE command stream construction.
//!
//! Opcode values and data-shift bit layout follow FTDI AN108.

/// MPSSE opcodes.
///
/// Data clocking commands are built by [`MpsseShiftCmd`].
#[repr(u8)]
#[derive(Debug, Copy, Clone)]
enum MpsseCmd {
    /// Used by [`MpsseCmdBuilder::set_gpio_lower`].
    SetDataBitsLowbyte = 0x80,
    /// Used by [`MpsseCmdBuilder::set_gpio_upper`].
    SetDataBitsHighbyte = 0x82,
    /// Used by [`MpsseCmdBuilder::disable_loopback`].
    DisableLoopback = 0x85,
    /// Used by [`MpsseCmdBuilder::set_clock`].
    SetClockFrequency = 0x86,
    /// Used by [`MpsseCmdBuilder::send_immediate`].
    SendImmediate = 0x87,
    /// Used by [`MpsseCmdBuilder::disable_clock_divide_by_5`].
    DisableClockDivideBy5 = 0x8A,
    /// Used by [`MpsseCmdBuilder::disable_3phase_data_clocking`].
    Disable3PhaseClocking = 0x8D,
    /// Used by [`MpsseCmdBuilder::disable_adaptive_clocking`].
    DisableAdaptiveClocking = 0x97,
}

/// Opcode the chip answers when it receives a command it does not know.
pub(crate) const BAD_COMMAND_ECHO: u8 = 0xFA;

/// Probe bytes used to resynchronize the command stream. Neither is a valid opcode.
pub(crate) const SYNC_PROBES: [u8; 2] = [0xAA, 0xAB];

/// Command for data shift of the FTDI device.
///
/// Only the read half is used here: data is clocked in on TDO/DI (AD2) and
/// nothing is driven on TDI/DO.
#[bitfield_struct::bitfield(u8, order = Lsb)]
struct MpsseShiftCmd {
    is_tdi_neg_write: bool,
    #[bits(default = true)]
    is_bit_mode: bool,
    is_tdo_neg_read: bool,
    #[bits(default = true)]
    is_lsb: bool,
    is_tdi_write: bool,
    is_tdo_read: bool,
    #[bits(default = false)] // tms is never clocked for SPI
    is_tms_write: bool,
    #[bits(default = false)]
    _const_0: bool,
}
impl MpsseShiftCmd {
    /// Clock-in opcode. `sample_on_falling` selects the edge the input is latched on.
    fn read(sample_on_falling: bool, is_bit_mode: bool, is_lsb: bool) -> u8 {
        MpsseShiftCmd::new()
            .with_is_bit_mode(is_bit_mode)
            .with_is_tdo_neg_read(sample_on_falling)
            .with_is_lsb(is_lsb)
            .with_is_tdo_read(true)
            .into()
    }
}

/// Opcode that clocks whole bytes in, MSB first.
pub(crate) fn clock_bytes_in_opcode(sample_on_falling: bool) -> u8 {
    MpsseShiftCmd::read(sample_on_falling, false, false)
}

/// Largest byte count a single clock-in command can carry.
pub(crate) const MAX_BYTES_SHIFT: usize = 65536;

/// Bytes emitted by one [`MpsseCmdBuilder::shift_bytes_in`] command.
pub(crate) const SHIFT_CMD_LEN: usize = 3;

/// Bytes emitted by one [`MpsseCmdBuilder::set_gpio_lower`] command.
pub(crate) const GPIO_CMD_LEN: usize = 3;

/// FTDI Multi-Protocol Synchronous Serial Engine (MPSSE) command builder.
///
/// For details about the MPSSE read the [FTDI MPSSE Basics].
///
/// This structure is a `Vec<u8>` that the methods push bytewise commands onto,
/// plus a count of the bytes the chip will answer with. Commands that need to
/// run back to back (a chip-select write, a read, another chip-select write)
/// should go out in one write, since individual USB transfers are expensive.
///
/// [FTDI MPSSE Basics]: https://www.ftdichip.com/Support/Documents/AppNotes/AN_135_MPSSE_Basics.pdf
#[derive(Default)]
pub(crate) struct MpsseCmdBuilder {
    cmd: Vec<u8>,
    read_len: usize,
}
impl MpsseCmdBuilder {
    pub(crate) fn with_capacity(capacity: usize) -> MpsseCmdBuilder {
        MpsseCmdBuilder {
            cmd: Vec::with_capacity(capacity),
            read_len: 0,
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.cmd
    }

    pub(crate) fn len(&self) -> usize {
        self.cmd.len()
    }

    /// Number of bytes the queued commands will produce.
    pub(crate) fn read_len(&self) -> usize {
        self.read_len
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.cmd.reserve(additional);
    }

    /// Drop queued commands, keeping the allocation.
    pub(crate) fn clear(&mut self) -> &mut Self {
        self.cmd.clear();
        self.read_len = 0;
        self
    }

    /// Set the MPSSE clock divisor.
    ///
    /// The bit clock is the reference clock divided by `(1 + divisor) * 2`.
    pub(crate) fn set_clock(&mut self, divisor: u16) -> &mut Self {
        let [lo, hi] = divisor.to_le_bytes();
        self.cmd
            .extend_from_slice(&[MpsseCmd::SetClockFrequency as u8, lo, hi]);
        self
    }

    /// Keep the 60MHz reference; the divide-by-5 path would give 12MHz.
    ///
    /// This is only available on FTx232H devices.
    pub(crate) fn disable_clock_divide_by_5(&mut self) -> &mut Self {
        self.cmd.push(MpsseCmd::DisableClockDivideBy5 as u8);
        self
    }

    /// Disconnect the internal TDI/DO to TDO/DI loopback.
    pub(crate) fn disable_loopback(&mut self) -> &mut Self {
        self.cmd.push(MpsseCmd::DisableLoopback as u8);
        self
    }

    /// Clock data on a single edge with no extra half period.
    ///
    /// This is only available on FTx232H devices.
    pub(crate) fn disable_3phase_data_clocking(&mut self) -> &mut Self {
        self.cmd.push(MpsseCmd::Disable3PhaseClocking as u8);
        self
    }

    pub(crate) fn disable_adaptive_clocking(&mut self) -> &mut Self {
        self.cmd.push(MpsseCmd::DisableAdaptiveClocking as u8);
        self
    }

    /// Set the pin direction and state of the lower byte (0-7) GPIO pins on the
    /// MPSSE interface.
    ///
    /// * On the FT232H this will control the AD0-AD7 pins.
    ///
    /// # Arguments
    ///
    /// * `state` - GPIO state mask, `0` is low (or input pin), `1` is high.
    /// * `direction` - GPIO direction mask, `0` is input, `1` is output.
    pub(crate) fn set_gpio_lower(&mut self, state: u8, direction: u8) -> &mut Self {
        self.cmd
            .extend_from_slice(&[MpsseCmd::SetDataBitsLowbyte as u8, state, direction]);
        self
    }

    /// Set the pin direction and state of the upper byte (8-15) GPIO pins on
    /// the MPSSE interface.
    pub(crate) fn set_gpio_upper(&mut self, state: u8, direction: u8) -> &mut Self {
        self.cmd
            .extend_from_slice(&[MpsseCmd::SetDataBitsHighbyte as u8, state, direction]);
        self
    }

    /// Send the preceding commands immediately.
    pub(crate) fn send_immediate(&mut self) -> &mut Self {
        self.cmd.push(MpsseCmd::SendImmediate as u8);
        self
    }

    /// Queue a byte that is not a valid opcode. The chip answers with
    /// [`BAD_COMMAND_ECHO`] followed by the byte.
    pub(crate) fn bad_command(&mut self, probe: u8) -> &mut Self {
        self.cmd.push(probe);
        self
    }

    /// Clock data in.
    ///
    /// This will clock in `len` bytes on TDO/DI, MSB first.
    /// No data is clocked out of the device on TDI/DO.
    ///
    /// # Arguments
    ///
    /// * `sample_on_falling` - latch input on the falling edge instead of the rising one.
    /// * `len` - Number of bytes to clock in.
    ///   This will panic for values greater than `u16::MAX + 1`.
    pub(crate) fn shift_bytes_in(&mut self, sample_on_falling: bool, mut len: usize) -> &mut Self {
        if len == 0 {
            return self;
        }
        assert!(
            len <= MAX_BYTES_SHIFT,
            "data length should be less than {MAX_BYTES_SHIFT}"
        );
        self.read_len += len;
        len -= 1;
        self.cmd.extend_from_slice(&[
            clock_bytes_in_opcode(sample_on_falling),
            (len & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
        ]);
        self
    }
}

#[cfg(test)]
mod test {
    use super::{MpsseCmdBuilder, MpsseShiftCmd, clock_bytes_in_opcode};

    #[test]
    fn mpsse_read_cmd_white_box_test() {
        // AN108 3.3, 3.4
        assert_eq!(0x20u8, MpsseShiftCmd::read(false, false, false));
        assert_eq!(0x24u8, MpsseShiftCmd::read(true, false, false));
        assert_eq!(0x22u8, MpsseShiftCmd::read(false, true, false));
        assert_eq!(0x26u8, MpsseShiftCmd::read(true, true, false));
        assert_eq!(0x28u8, MpsseShiftCmd::read(false, false, true));
        assert_eq!(0x2cu8, MpsseShiftCmd::read(true, false, true));
        assert_eq!(0x2au8, MpsseShiftCmd::read(false, true, true));
        assert_eq!(0x2eu8, MpsseShiftCmd::read(true, true, true));
    }

    #[test]
    fn clock_bytes_in_is_msb_first() {
        assert_eq!(clock_bytes_in_opcode(false), 0x20);
        assert_eq!(clock_bytes_in_opcode(true), 0x24);
    }

    #[test]
    fn length_field_is_little_endian_minus_one() {
        let mut cmd = MpsseCmdBuilder::default();
        cmd.shift_bytes_in(false, 20)
            .shift_bytes_in(true, 1)
            .shift_bytes_in(false, 0x1234 + 1)
            .shift_bytes_in(false, 0);
        assert_eq!(
            cmd.as_slice(),
            [0x20, 19, 0, 0x24, 0, 0, 0x20, 0x34, 0x12]
        );
        assert_eq!(cmd.read_len(), 20 + 1 + 0x1235);
    }

    #[test]
    fn clock_setup_sequence() {
        let mut cmd = MpsseCmdBuilder::default();
        cmd.disable_3phase_data_clocking()
            .disable_adaptive_clocking()
            .disable_clock_divide_by_5()
            .set_clock(4)
            .set_gpio_lower(0x00, 0x0b)
            .set_gpio_upper(0, 0)
            .disable_loopback()
            .send_immediate();
        assert_eq!(
            cmd.as_slice(),
            [
                0x8d, 0x97, 0x8a, 0x86, 0x04, 0x00, 0x80, 0x00, 0x0b, 0x82, 0x00, 0x00, 0x85,
                0x87
            ]
        );
        assert_eq!(cmd.read_len(), 0);
        cmd.clear();
        assert_eq!(cmd.len(), 0);
    }

    #[test]
    fn max_length_shift() {
        let mut cmd = MpsseCmdBuilder::default();
        cmd.shift_bytes_in(false, super::MAX_BYTES_SHIFT);
        assert_eq!(cmd.as_slice(), [0x20, 0xff, 0xff]);
    }

    #[test]
    #[should_panic]
    fn oversized_shift_panics() {
        let mut cmd = MpsseCmdBuilder::default();
        cmd.shift_bytes_in(false, super::MAX_BYTES_SHIFT + 1);
    }
}
