//! HID transport layer abstraction.
//!
//! Defines the `HidTransport` trait for feature-report traffic,
//! allowing different implementations (nusb, mock, etc.).

use thiserror::Error;
use tracing::trace;

use crate::protocol::constants::{REPORT_ID, REPORT_SIZE};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Report must be at most {max} bytes, got {len}")]
    OversizedReport { len: usize, max: usize },

    #[error("Short read: got response of length {actual}, expected {expected}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Abstract HID device handle speaking feature reports.
///
/// Implementations only move bytes; report sizing and lazy opening live in
/// the provided `send_report` / `receive_report` methods.
pub trait HidTransport: Send {
    /// Whether the handle has been opened.
    fn is_open(&self) -> bool;

    /// Open the device. Must be a no-op when already open.
    fn open(&mut self) -> Result<(), TransportError>;

    /// Write one feature report.
    fn set_feature_report(&mut self, report_id: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Read one feature report of up to `len` bytes.
    fn get_feature_report(&mut self, report_id: u8, len: usize)
    -> Result<Vec<u8>, TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    fn vendor_id(&self) -> u16;

    fn product_id(&self) -> u16;

    /// Send a payload as a zero-padded 64-byte feature report (id 0).
    fn send_report(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > REPORT_SIZE {
            return Err(TransportError::OversizedReport {
                len: payload.len(),
                max: REPORT_SIZE,
            });
        }
        if !self.is_open() {
            self.open()?;
        }
        let mut report = payload.to_vec();
        report.resize(REPORT_SIZE, 0);
        trace!(len = payload.len(), "Sending feature report");
        self.set_feature_report(REPORT_ID, &report)
    }

    /// Read exactly one 64-byte feature report (id 0).
    fn receive_report(&mut self) -> Result<Vec<u8>, TransportError> {
        let report = self.get_feature_report(REPORT_ID, REPORT_SIZE)?;
        if report.len() != REPORT_SIZE {
            return Err(TransportError::ShortRead {
                expected: REPORT_SIZE,
                actual: report.len(),
            });
        }
        Ok(report)
    }
}
