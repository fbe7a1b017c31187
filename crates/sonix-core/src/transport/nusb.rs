//! nusb-based HID transport implementation.
//!
//! Feature reports are plain HID class control transfers on the bootloader's
//! single interface, so no HID-specific backend is needed:
//! - SET_REPORT (0x09) / GET_REPORT (0x01)
//! - wValue = report type (Feature = 3) << 8 | report ID
//! - wIndex = interface number

use std::time::Duration;

use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient, TransferError};
use nusb::{DeviceInfo, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument};

use super::traits::{HidTransport, TransportError};
use crate::protocol::constants::CONTROL_TIMEOUT_MS;
use crate::registry::{self, DeviceDescriptor};

const HID_INTERFACE: u8 = 0;
const HID_GET_REPORT: u8 = 0x01;
const HID_SET_REPORT: u8 = 0x09;
const HID_REPORT_TYPE_FEATURE: u16 = 0x03;

/// nusb-based HID transport.
///
/// Created closed; the interface is claimed on first `open`.
pub struct NusbTransport {
    device_info: DeviceInfo,
    interface: Option<Interface>,
    disconnected: bool,
    vid: u16,
    pid: u16,
}

impl NusbTransport {
    /// Find the first attached device that matches a supported bootloader.
    #[instrument(level = "info")]
    pub fn find() -> Result<(Self, &'static DeviceDescriptor), TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        for device_info in devices {
            if let Some(descriptor) =
                registry::lookup(device_info.vendor_id(), device_info.product_id())
            {
                info!(device = %descriptor, "Found bootloader");
                return Ok((Self::from_device_info(device_info), descriptor));
            }
        }

        Err(TransportError::DeviceNotFound { vid: 0, pid: 0 })
    }

    /// Find a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn find_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        Ok(Self::from_device_info(device_info))
    }

    fn from_device_info(device_info: DeviceInfo) -> Self {
        let vid = device_info.vendor_id();
        let pid = device_info.product_id();
        Self {
            device_info,
            interface: None,
            disconnected: false,
            vid,
            pid,
        }
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface
            .as_ref()
            .ok_or_else(|| TransportError::OpenFailed("device not open".into()))
    }

    fn report_value(report_id: u8) -> u16 {
        (HID_REPORT_TYPE_FEATURE << 8) | u16::from(report_id)
    }

    fn timeout() -> Duration {
        Duration::from_millis(CONTROL_TIMEOUT_MS)
    }

    fn map_transfer_error(&mut self, e: TransferError, write: bool) -> TransportError {
        match e {
            TransferError::Disconnected => {
                self.disconnected = true;
                TransportError::Disconnected
            }
            other if write => TransportError::WriteFailed(other.to_string()),
            other => TransportError::ReadFailed(other.to_string()),
        }
    }
}

impl HidTransport for NusbTransport {
    fn is_open(&self) -> bool {
        self.interface.is_some()
    }

    #[instrument(skip(self), fields(vid = format!("{:04X}", self.vid), pid = format!("{:04X}", self.pid)))]
    fn open(&mut self) -> Result<(), TransportError> {
        if self.interface.is_some() {
            return Ok(());
        }

        let device = self
            .device_info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        // The kernel HID driver owns the interface until we detach it.
        let interface = device
            .detach_and_claim_interface(HID_INTERFACE)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface: HID_INTERFACE,
                message: e.to_string(),
            })?;

        info!("Device opened successfully");
        self.interface = Some(interface);
        Ok(())
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn set_feature_report(&mut self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        let result = self
            .interface()?
            .control_out(
                ControlOut {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_SET_REPORT,
                    value: Self::report_value(report_id),
                    index: u16::from(HID_INTERFACE),
                    data,
                },
                Self::timeout(),
            )
            .wait();

        result.map_err(|e| self.map_transfer_error(e, true))?;
        debug!(bytes_written = data.len(), "SET_REPORT complete");
        Ok(())
    }

    #[instrument(skip(self))]
    fn get_feature_report(
        &mut self,
        report_id: u8,
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let length = u16::try_from(len)
            .map_err(|_| TransportError::ReadFailed(format!("report length {len} too large")))?;

        let result = self
            .interface()?
            .control_in(
                ControlIn {
                    control_type: ControlType::Class,
                    recipient: Recipient::Interface,
                    request: HID_GET_REPORT,
                    value: Self::report_value(report_id),
                    index: u16::from(HID_INTERFACE),
                    length,
                },
                Self::timeout(),
            )
            .wait();

        let data = result.map_err(|e| self.map_transfer_error(e, false))?;
        debug!(bytes_read = data.len(), "GET_REPORT complete");
        Ok(data)
    }

    fn is_connected(&self) -> bool {
        // nusb has no cheap liveness probe; rely on the last transfer result.
        !self.disconnected
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}
