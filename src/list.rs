use nusb::DeviceInfo;

use crate::{ChipType, Error};

/// Known properties associated to particular FTDI chip types.
#[derive(Debug, Clone, Copy)]
struct FtdiDevice {
    /// The (VID, PID) pair of this device.
    id: (u16, u16),

    /// FTDI chip type to use if the device is not recognized.
    ///
    /// "FTDI compatible" devices may use the same VID/PID pair as an FTDI device, but
    /// they may be implemented by a completely third party solution. In this case,
    /// we still try the same `bcdDevice` based detection, but if it fails, we fall back
    /// to this chip type.
    fallback_chip_type: ChipType,
}

/// Known FTDI device variants.
static FTDI_COMPAT_DEVICES: &[FtdiDevice] = &[
    //
    // --- FTDI VID/PID pairs ---
    //
    // FTDI Ltd. FT2232C/D/H Dual UART/FIFO IC
    FtdiDevice {
        id: (0x0403, 0x6010),
        fallback_chip_type: ChipType::FT2232H,
    },
    // FTDI Ltd. FT4232H Quad HS USB-UART/FIFO IC
    FtdiDevice {
        id: (0x0403, 0x6011),
        fallback_chip_type: ChipType::FT4232H,
    },
    // FTDI Ltd. FT232H Single HS USB-UART/FIFO IC
    FtdiDevice {
        id: (0x0403, 0x6014),
        fallback_chip_type: ChipType::FT232H,
    },
    //
    // --- Third-party VID/PID pairs ---
    //
    // Olimex Ltd. ARM-USB-OCD
    FtdiDevice {
        id: (0x15ba, 0x0003),
        fallback_chip_type: ChipType::FT2232D,
    },
    // Olimex Ltd. ARM-USB-TINY
    FtdiDevice {
        id: (0x15ba, 0x0004),
        fallback_chip_type: ChipType::FT2232D,
    },
    // Olimex Ltd. ARM-USB-TINY-H
    FtdiDevice {
        id: (0x15ba, 0x002a),
        fallback_chip_type: ChipType::FT2232H,
    },
    // Olimex Ltd. ARM-USB-OCD-H
    FtdiDevice {
        id: (0x15ba, 0x002b),
        fallback_chip_type: ChipType::FT2232H,
    },
];

/// One FTDI-compatible device found on the bus.
#[derive(Debug)]
pub struct FtdiDeviceInfo {
    /// Position in enumeration order.
    pub index: usize,
    /// USB product string, empty when the device has none.
    pub description: String,
    pub serial: String,
    pub chip_type: ChipType,
    pub usb_device: DeviceInfo,
}

/// List every FTDI-compatible device, in bus enumeration order.
pub fn enumerate() -> Result<Vec<FtdiDeviceInfo>, Error> {
    let devices = nusb::list_devices()?
        .filter_map(|info| {
            let device = FTDI_COMPAT_DEVICES
                .iter()
                .find(|device| (info.vendor_id(), info.product_id()) == device.id)?;
            let serial = info.serial_number().unwrap_or_default().to_string();
            let chip_type =
                ChipType::from_device_version(info.device_version(), !serial.is_empty())
                    .unwrap_or(device.fallback_chip_type);
            log::debug!(
                "Find {chip_type:?}:[{:#06x?},{:#06x?}]",
                device.id.0,
                device.id.1
            );
            Some((chip_type, serial, info))
        })
        .enumerate()
        .map(|(index, (chip_type, serial, info))| FtdiDeviceInfo {
            index,
            description: info.product_string().unwrap_or_default().to_string(),
            serial,
            chip_type,
            usb_device: info,
        })
        .collect();
    Ok(devices)
}

/// How to pick one device out of [`enumerate`]'s list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(usize),
    /// Substring of the product description, e.g. `"FT232H"`.
    Description(String),
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Index(0)
    }
}

impl DeviceSelector {
    pub fn matches(&self, index: usize, description: &str) -> bool {
        match self {
            DeviceSelector::Index(wanted) => *wanted == index,
            DeviceSelector::Description(needle) => description.contains(needle.as_str()),
        }
    }
}

/// First device the selector matches.
pub fn select<'a>(
    devices: &'a [FtdiDeviceInfo],
    selector: &DeviceSelector,
) -> Result<&'a FtdiDeviceInfo, Error> {
    first_match(
        devices.iter().map(|d| (d.index, d.description.as_str())),
        selector,
    )
    .map(|position| &devices[position])
}

/// Position of the first `(index, description)` pair the selector matches.
fn first_match<'a>(
    candidates: impl IntoIterator<Item = (usize, &'a str)>,
    selector: &DeviceSelector,
) -> Result<usize, Error> {
    candidates
        .into_iter()
        .position(|(index, description)| selector.matches(index, description))
        .ok_or(Error::DeviceNotFound)
}
