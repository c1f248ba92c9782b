use crate::ChipType;

/// Bring-up and setup steps, reported by [`Error::ConfigurationFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Reset,
    Purge,
    UsbParameters,
    Chars,
    Timeouts,
    LatencyTimer,
    BitModeReset,
    BitModeMpsse,
    Synchronize,
    ClockFeatures,
    ClockAndGpio,
    Loopback,
}

impl core::fmt::Display for Step {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Step::Reset => "reset device",
            Step::Purge => "purge queues",
            Step::UsbParameters => "set USB parameters",
            Step::Chars => "disable event/error characters",
            Step::Timeouts => "set timeouts",
            Step::LatencyTimer => "set latency timer",
            Step::BitModeReset => "reset bit mode",
            Step::BitModeMpsse => "enable MPSSE",
            Step::Synchronize => "synchronize MPSSE",
            Step::ClockFeatures => "disable clock features",
            Step::ClockAndGpio => "set clock divisor and GPIO",
            Step::Loopback => "disable loopback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("A USB transport error occurred.")]
    ///
    /// This variant is used for all errors reported by the operating system when performing a USB
    /// operation. It may indicate that the USB device was unplugged, that another application or an
    /// operating system driver is currently using it, or that the current user does not have
    /// permission to access it.
    Usb(#[from] std::io::Error),

    #[error("No matching FTDI device found")]
    DeviceNotFound,

    #[error("Open failed: {0}")]
    /// Error occurs when open.
    OpenFailed(String),

    #[error("Unsupported chip type: {0:?}")]
    /// The connected device is not supported by the driver.
    UnsupportedChip(ChipType),

    #[error("Configuration failed at step '{step}'")]
    ConfigurationFailed {
        step: Step,
        #[source]
        source: Box<Error>,
    },

    #[error("MPSSE is not configured, no data transfer may be issued")]
    NotConfigured,

    #[error("Transfer shortfall: requested {requested} samples, received {received}")]
    TransferShortfall { requested: usize, received: usize },

    #[error("Command buffer overflow: batch needs {required} bytes, capacity is {capacity}")]
    /// Raised before anything is written to the device.
    BufferOverflow { required: usize, capacity: usize },

    #[error("Writing samples failed")]
    /// The sample sink reported an I/O error; the device is not involved.
    Sink(#[source] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid bit string: {0}")]
    InvalidBitString(String),

    #[error("Bit field {field} does not fit in a {sample_bits}-bit sample")]
    FieldOutOfRange {
        field: crate::sink::BitField,
        sample_bits: usize,
    },
}

impl Error {
    /// Wrap an error raised while running a setup or bring-up step.
    pub(crate) fn at(step: Step) -> impl FnOnce(Error) -> Error {
        move |source| Error::ConfigurationFailed {
            step,
            source: Box::new(source),
        }
    }
}
