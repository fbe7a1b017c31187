//! Sonix-Core: firmware update protocol for Sonix SN32F2xx HID bootloaders.
//!
//! Keyboards built on SN32F24x/26x parts expose a ROM bootloader that speaks
//! only vendor-defined 64-byte HID feature reports. This crate implements
//! that protocol on the host side.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Registry**: Supported bootloader models and their flash layout
//! - **Protocol**: Constants, word codec, command/response frames
//! - **Transport**: HID feature report abstraction (nusb, mock)
//! - **Payload**: Firmware image loading and structural validation
//! - **State**: Update state machine yielding progress as an iterator
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use sonix_core::session::{FlashConfig, FlashSession};
//!
//! let config = FlashConfig {
//!     firmware_path: Some("keyboard.bin".to_string()),
//!     ..Default::default()
//! };
//!
//! let mut session = FlashSession::new(config);
//! session.run().expect("flash failed");
//! ```

pub mod error;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use error::UpdateError;
pub use events::{
    FlashEvent, FlashObserver, LogLevel, NullObserver, ProgressEvent, TracingObserver,
    UpdatePhase,
};
pub use payload::{FirmwareImage, ValidationError, VectorTable, validate_firmware};
pub use protocol::{CodecError, MismatchField, ProtocolMismatch, Step};
pub use registry::{DeviceDescriptor, SUPPORTED_DEVICES, lookup};
pub use session::{FlashConfig, FlashSession};
pub use state::{CancelToken, UpdateSession, UpdateState, run_update};
pub use transport::{HidTransport, MockTransport, NusbTransport, TransportError};
