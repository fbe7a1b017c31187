//! Protocol constants for the Sonix SN32F2xx ROM bootloader.
//!
//! These values are fixed by the mask ROM and cannot be negotiated.

// ============================================================================
// Device Identification
// ============================================================================

/// Sonix Technology Co., Ltd.
pub const SONIX_VENDOR_ID: u16 = 0x0C45;

/// SN32F268F in bootloader mode (30K class)
pub const PID_SN32F268F: u16 = 0x7010;
/// SN32F248B in bootloader mode (64K class)
pub const PID_SN32F248B: u16 = 0x7040;
/// SN32F248 in bootloader mode (64K class)
pub const PID_SN32F248: u16 = 0x7900;

// ============================================================================
// Size Constants
// ============================================================================

/// Every feature report, in either direction, is exactly this long.
pub const REPORT_SIZE: usize = 64;
/// Firmware is streamed in report-sized chunks.
pub const CHUNK_SIZE: usize = 64;
/// Feature report ID used for all traffic.
pub const REPORT_ID: u8 = 0x00;

pub const MAX_FIRMWARE_SN32F260: u32 = 30 * 1024;
/// Also covers the 240B.
pub const MAX_FIRMWARE_SN32F240: u32 = 64 * 1024;

/// Smallest image that can hold a vector table plus a handler.
pub const MIN_FIRMWARE_SIZE: usize = 0x100;

// ============================================================================
// Commands (Host -> Device)
// ============================================================================

pub const CMD_BASE: u32 = 0x0055_AA00;
pub const CMD_INIT: u32 = CMD_BASE + 1;
pub const CMD_PREPARE: u32 = CMD_BASE + 5;
pub const CMD_REBOOT: u32 = CMD_BASE + 7;

// ============================================================================
// Responses (Device -> Host)
// ============================================================================

/// Status word returned by INIT and PREPARE on success.
pub const EXPECTED_STATUS: u32 = 0xFAFA_FAFA;

// ============================================================================
// Firmware Layout
// ============================================================================

/// Initial stack pointer must land in SRAM.
pub const SRAM_START: u32 = 0x2000_0000;
pub const SRAM_END: u32 = 0x2000_0800;

/// Bytes of the vector table inspected by the validator.
pub const VECTOR_TABLE_PROBE_LEN: usize = 16;

// ============================================================================
// Timing
// ============================================================================

/// Time the device needs to reset and re-enumerate after REBOOT.
pub const REBOOT_SETTLE_MS: u64 = 5000;

/// Timeout applied to every HID control transfer.
pub const CONTROL_TIMEOUT_MS: u64 = 1000;
