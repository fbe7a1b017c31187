//! Per-phase device exchanges used by the update state machine.

use tracing::{debug, trace};

use super::machine::UpdateState;
use crate::error::UpdateError;
use crate::protocol::constants::{CMD_REBOOT, REPORT_SIZE};
use crate::protocol::{CommandFrame, ResponseFrame, Step};
use crate::transport::{HidTransport, TransportError};

/// Send a command and check the echoed command and status words.
pub(crate) fn handshake<T: HidTransport + ?Sized>(
    device: &mut T,
    frame: &CommandFrame,
    step: Step,
    during: UpdateState,
) -> Result<(), UpdateError> {
    device
        .send_report(&frame.to_bytes())
        .map_err(|e| UpdateError::transport(e, during))?;

    let report = device
        .receive_report()
        .map_err(|e| UpdateError::transport(e, during))?;
    let response = ResponseFrame::parse(&report).ok_or_else(|| {
        UpdateError::transport(
            TransportError::ShortRead {
                expected: REPORT_SIZE,
                actual: report.len(),
            },
            during,
        )
    })?;

    debug!(
        step = %step,
        cmd = %format!("{:#010x}", response.command()),
        status = %format!("{:#010x}", response.status()),
        "Handshake response"
    );
    response.expect(step, frame.command())?;
    Ok(())
}

/// Write one raw firmware chunk. The bootloader does not acknowledge it.
pub(crate) fn send_chunk<T: HidTransport + ?Sized>(
    device: &mut T,
    chunk: &[u8],
    during: UpdateState,
) -> Result<(), UpdateError> {
    trace!(len = chunk.len(), "Sending chunk");
    device
        .send_report(chunk)
        .map_err(|e| UpdateError::transport(e, during))
}

/// Ask the device to jump to the new application. No response follows.
pub(crate) fn send_reboot<T: HidTransport + ?Sized>(
    device: &mut T,
    during: UpdateState,
) -> Result<(), UpdateError> {
    debug!("Sending REBOOT");
    device
        .send_report(&CommandFrame::new(CMD_REBOOT).to_bytes())
        .map_err(|e| UpdateError::transport(e, during))
}
