//! Protocol module - Sonix bootloader wire format.

pub mod codec;
pub mod constants;
pub mod frame;

pub use codec::{CodecError, pack, pad, unpack};
pub use constants::*;
pub use frame::{CommandFrame, MismatchField, ProtocolMismatch, ResponseFrame, Step};
