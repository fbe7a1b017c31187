//! Errors surfaced by an update run.

use thiserror::Error;

use crate::payload::ValidationError;
use crate::protocol::{CodecError, ProtocolMismatch};
use crate::state::UpdateState;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error(transparent)]
    Transport(TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolMismatch),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Device lost while {during}")]
    DeviceLost { during: UpdateState },

    #[error("Update cancelled after {bytes_sent} bytes")]
    Cancelled { bytes_sent: usize },
}

impl UpdateError {
    /// Attribute a transport failure to the state it happened in.
    pub(crate) fn transport(e: TransportError, during: UpdateState) -> Self {
        match e {
            TransportError::Disconnected => UpdateError::DeviceLost { during },
            other => UpdateError::Transport(other),
        }
    }

    pub fn is_device_lost(&self) -> bool {
        matches!(self, UpdateError::DeviceLost { .. })
    }
}
