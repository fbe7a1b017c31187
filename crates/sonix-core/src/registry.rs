//! Static table of supported bootloader variants.
//!
//! Every Sonix part shows up under the same vendor ID while in ROM bootloader
//! mode; the product ID selects the flash layout.

use std::fmt;

use crate::protocol::constants::{
    MAX_FIRMWARE_SN32F240, MAX_FIRMWARE_SN32F260, PID_SN32F248, PID_SN32F248B, PID_SN32F268F,
    SONIX_VENDOR_ID,
};

/// A supported device model in bootloader mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub description: &'static str,
    /// Byte offset in flash where the application image is loaded.
    pub qmk_offset: u32,
    /// Total flash available to the image plus its load offset.
    pub size_limit: u32,
}

impl DeviceDescriptor {
    /// Largest image accepted once the load offset is accounted for.
    pub fn max_image_len(&self) -> u32 {
        self.size_limit.saturating_sub(self.qmk_offset)
    }

    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x})",
            self.description, self.vendor_id, self.product_id
        )
    }
}

/// All bootloaders this tool knows how to talk to.
pub const SUPPORTED_DEVICES: &[DeviceDescriptor] = &[
    DeviceDescriptor {
        vendor_id: SONIX_VENDOR_ID,
        product_id: PID_SN32F268F,
        description: "SN32F268F (bootloader)",
        qmk_offset: 0x200,
        size_limit: MAX_FIRMWARE_SN32F260,
    },
    DeviceDescriptor {
        vendor_id: SONIX_VENDOR_ID,
        product_id: PID_SN32F248B,
        description: "SN32F248B (bootloader)",
        qmk_offset: 0x0,
        size_limit: MAX_FIRMWARE_SN32F240,
    },
    DeviceDescriptor {
        vendor_id: SONIX_VENDOR_ID,
        product_id: PID_SN32F248,
        description: "SN32F248 (bootloader)",
        qmk_offset: 0x0,
        size_limit: MAX_FIRMWARE_SN32F240,
    },
];

/// Find the descriptor for a VID/PID pair.
pub fn lookup(vendor_id: u16, product_id: u16) -> Option<&'static DeviceDescriptor> {
    SUPPORTED_DEVICES
        .iter()
        .find(|d| d.matches(vendor_id, product_id))
}

/// Parse a `VID:PID` pair written in hex, e.g. `0c45:7040`.
pub fn parse_device_id(s: &str) -> Option<(u16, u16)> {
    let (vid, pid) = s.split_once(':')?;
    let parse = |part: &str| {
        let part = part.trim();
        let part = part
            .strip_prefix("0x")
            .or_else(|| part.strip_prefix("0X"))
            .unwrap_or(part);
        u16::from_str_radix(part, 16).ok()
    };
    Some((parse(vid)?, parse(pid)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_models() {
        let f268 = lookup(0x0c45, 0x7010).unwrap();
        assert_eq!(f268.qmk_offset, 0x200);
        assert_eq!(f268.size_limit, 30 * 1024);

        let f248b = lookup(0x0c45, 0x7040).unwrap();
        assert_eq!(f248b.qmk_offset, 0);
        assert_eq!(f248b.size_limit, 64 * 1024);

        assert_eq!(lookup(0x0c45, 0x7900).unwrap().size_limit, 64 * 1024);
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(lookup(0x0c45, 0x1234).is_none());
        assert!(lookup(0x8086, 0x7040).is_none());
    }

    #[test]
    fn test_max_image_len() {
        let f268 = lookup(0x0c45, 0x7010).unwrap();
        assert_eq!(f268.max_image_len(), 30 * 1024 - 0x200);
    }

    #[test]
    fn test_parse_device_id() {
        assert_eq!(parse_device_id("0c45:7040"), Some((0x0c45, 0x7040)));
        assert_eq!(parse_device_id("0x0C45:0x7900"), Some((0x0c45, 0x7900)));
        assert_eq!(parse_device_id("0c45"), None);
        assert_eq!(parse_device_id("zz:7040"), None);
    }

    #[test]
    fn test_display() {
        let d = lookup(0x0c45, 0x7040).unwrap();
        assert_eq!(d.to_string(), "SN32F248B (bootloader) (0c45:7040)");
    }
}
