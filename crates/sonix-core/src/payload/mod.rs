//! Payload handling module.
//!
//! Provides loading, validation and chunking for firmware images.

pub mod firmware;

pub use firmware::{FirmwareImage, ValidationError, VectorTable, validate_firmware};
