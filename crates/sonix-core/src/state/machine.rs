//! Update state machine.
//!
//! `UpdateSession` is an iterator: every call to `next` performs at most one
//! blocking step against the device and yields the progress reached. The
//! sequence is finite, fused and cannot be restarted; the first error ends it.

use std::fmt;
use std::iter::FusedIterator;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::handlers::{handshake, send_chunk, send_reboot};
use crate::error::UpdateError;
use crate::events::{ProgressEvent, UpdatePhase};
use crate::payload::{FirmwareImage, ValidationError};
use crate::protocol::constants::{CHUNK_SIZE, CMD_INIT, CMD_PREPARE, REBOOT_SETTLE_MS};
use crate::protocol::{CommandFrame, Step};
use crate::registry::DeviceDescriptor;
use crate::transport::HidTransport;

/// Internal state of the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateState {
    #[default]
    Idle,
    Initializing,
    Preparing,
    Flashing,
    Rebooting,
    Complete,
    Failed,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Idle => write!(f, "IDLE"),
            UpdateState::Initializing => write!(f, "INITIALIZING"),
            UpdateState::Preparing => write!(f, "PREPARING"),
            UpdateState::Flashing => write!(f, "FLASHING"),
            UpdateState::Rebooting => write!(f, "REBOOTING"),
            UpdateState::Complete => write!(f, "COMPLETE"),
            UpdateState::Failed => write!(f, "FAILED"),
        }
    }
}

impl UpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpdateState::Complete | UpdateState::Failed)
    }
}

/// Cooperative cancellation flag, checked before every chunk write.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One firmware update against one device handle.
pub struct UpdateSession<'a, T: HidTransport + ?Sized> {
    descriptor: DeviceDescriptor,
    device: &'a mut T,
    /// Unpadded length, used only for the size guard.
    original_len: usize,
    image: FirmwareImage,
    state: UpdateState,
    bytes_sent: usize,
    settle_delay: Duration,
    cancel: Option<CancelToken>,
}

/// Start an update. Nothing touches the device until the iterator is polled.
pub fn run_update<'a, T: HidTransport + ?Sized>(
    descriptor: &DeviceDescriptor,
    device: &'a mut T,
    image: impl Into<FirmwareImage>,
) -> UpdateSession<'a, T> {
    let image = image.into();
    UpdateSession {
        descriptor: *descriptor,
        device,
        original_len: image.len(),
        image: image.padded(),
        state: UpdateState::Idle,
        bytes_sent: 0,
        settle_delay: Duration::from_millis(REBOOT_SETTLE_MS),
        cancel: None,
    }
}

impl<'a, T: HidTransport + ?Sized> UpdateSession<'a, T> {
    /// Override the post-reboot wait.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    /// Bytes of firmware written so far.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Length announced to the device in PREPARE.
    pub fn padded_len(&self) -> usize {
        self.image.len()
    }

    /// Once flashing has begun the application area can no longer be trusted.
    pub fn device_state_undefined(&self) -> bool {
        self.bytes_sent > 0
    }

    fn goto_state(&mut self, new_state: UpdateState) {
        info!(from = %self.state, to = %new_state, "State transition");
        self.state = new_state;
    }

    fn step(&mut self) -> Result<Option<ProgressEvent>, UpdateError> {
        match self.state {
            UpdateState::Idle => {
                if self.original_len > self.descriptor.size_limit as usize {
                    return Err(ValidationError::ImageTooLarge {
                        got: self.original_len,
                        max_allowed: self.descriptor.size_limit as usize,
                    }
                    .into());
                }
                self.goto_state(UpdateState::Initializing);
                Ok(Some(ProgressEvent::new(UpdatePhase::Initialize, 0.0)))
            }
            UpdateState::Initializing => {
                if !self.device.is_open() {
                    self.device
                        .open()
                        .map_err(|e| UpdateError::transport(e, self.state))?;
                }
                handshake(
                    &mut *self.device,
                    &CommandFrame::new(CMD_INIT),
                    Step::Initialize,
                    self.state,
                )?;
                self.goto_state(UpdateState::Preparing);
                Ok(Some(ProgressEvent::new(UpdatePhase::Prepare, 0.0)))
            }
            UpdateState::Preparing => {
                let frame = CommandFrame::new(CMD_PREPARE)
                    .arg(self.descriptor.qmk_offset)
                    .arg(self.image.len() as u32);
                debug!(
                    offset = %format!("0x{:X}", self.descriptor.qmk_offset),
                    len = self.image.len(),
                    "Preparing flash"
                );
                handshake(&mut *self.device, &frame, Step::Prepare, self.state)?;
                self.goto_state(UpdateState::Flashing);
                Ok(Some(ProgressEvent::new(UpdatePhase::Flash, 0.0)))
            }
            UpdateState::Flashing => {
                let total = self.image.len();
                if self.bytes_sent >= total {
                    self.goto_state(UpdateState::Rebooting);
                    return Ok(Some(ProgressEvent::new(UpdatePhase::Reboot, 1.0)));
                }
                if let Some(token) = &self.cancel
                    && token.is_cancelled()
                {
                    warn!(bytes_sent = self.bytes_sent, "Update cancelled");
                    return Err(UpdateError::Cancelled {
                        bytes_sent: self.bytes_sent,
                    });
                }
                let end = (self.bytes_sent + CHUNK_SIZE).min(total);
                let chunk = &self.image.raw_data()[self.bytes_sent..end];
                send_chunk(&mut *self.device, chunk, self.state)?;
                self.bytes_sent = end;
                Ok(Some(ProgressEvent::new(
                    UpdatePhase::Flash,
                    self.bytes_sent as f64 / total as f64,
                )))
            }
            UpdateState::Rebooting => {
                send_reboot(&mut *self.device, self.state)?;
                debug!(
                    delay_ms = self.settle_delay.as_millis() as u64,
                    "Waiting for device to reset"
                );
                thread::sleep(self.settle_delay);
                self.goto_state(UpdateState::Complete);
                Ok(Some(ProgressEvent::new(UpdatePhase::Complete, 1.0)))
            }
            UpdateState::Complete | UpdateState::Failed => Ok(None),
        }
    }
}

impl<'a, T: HidTransport + ?Sized> Iterator for UpdateSession<'a, T> {
    type Item = Result<ProgressEvent, UpdateError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(event) => event.map(Ok),
            Err(e) => {
                warn!(state = %self.state, error = %e, "Update failed");
                self.goto_state(UpdateState::Failed);
                Some(Err(e))
            }
        }
    }
}

impl<'a, T: HidTransport + ?Sized> FusedIterator for UpdateSession<'a, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{pack, unpack};
    use crate::protocol::constants::*;
    use crate::protocol::{MismatchField, ProtocolMismatch};
    use crate::registry::lookup;
    use crate::transport::MockTransport;

    fn ready_mock() -> MockTransport {
        let mock = MockTransport::new();
        mock.queue_response(CMD_INIT, EXPECTED_STATUS);
        mock.queue_response(CMD_PREPARE, EXPECTED_STATUS);
        mock
    }

    fn image(len: usize) -> Vec<u8> {
        let mut data = pack(&[0x2000_0400, 0x101, 0x103, 0x105]);
        data.resize(len, 0x5A);
        data
    }

    fn f248b() -> &'static DeviceDescriptor {
        lookup(0x0c45, 0x7040).unwrap()
    }

    fn collect<T: HidTransport + ?Sized>(
        session: UpdateSession<'_, T>,
    ) -> Vec<Result<ProgressEvent, UpdateError>> {
        session.with_settle_delay(Duration::ZERO).collect()
    }

    #[test]
    fn test_progress_sequence_for_small_image() {
        let mut mock = ready_mock();
        let events: Vec<ProgressEvent> = collect(run_update(f248b(), &mut mock, image(200)))
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let expected = vec![
            ProgressEvent::new(UpdatePhase::Initialize, 0.0),
            ProgressEvent::new(UpdatePhase::Prepare, 0.0),
            ProgressEvent::new(UpdatePhase::Flash, 0.0),
            ProgressEvent::new(UpdatePhase::Flash, 0.25),
            ProgressEvent::new(UpdatePhase::Flash, 0.5),
            ProgressEvent::new(UpdatePhase::Flash, 0.75),
            ProgressEvent::new(UpdatePhase::Flash, 1.0),
            ProgressEvent::new(UpdatePhase::Reboot, 1.0),
            ProgressEvent::new(UpdatePhase::Complete, 1.0),
        ];
        assert_eq!(events, expected);

        let chunk_fractions: Vec<f64> = events
            .iter()
            .filter(|e| e.phase == UpdatePhase::Flash && e.fraction > 0.0)
            .map(|e| e.fraction)
            .collect();
        assert_eq!(chunk_fractions, vec![0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_wire_traffic() {
        let mut mock = ready_mock();
        let data = image(200);
        for r in collect(run_update(f248b(), &mut mock, data.clone())) {
            r.unwrap();
        }

        let writes = mock.get_writes();
        // INIT, PREPARE, 4 chunks, REBOOT
        assert_eq!(writes.len(), 7);
        assert!(writes.iter().all(|(id, w)| *id == REPORT_ID && w.len() == 64));

        assert_eq!(unpack(&writes[0].1[..4]).unwrap(), vec![CMD_INIT]);
        assert!(writes[0].1[4..].iter().all(|&b| b == 0));

        // PREPARE carries the padded length, not the original 200.
        assert_eq!(
            unpack(&writes[1].1[..12]).unwrap(),
            vec![CMD_PREPARE, 0x0, 256]
        );

        // Chunks go out verbatim, in order, zero-padded at the tail.
        assert_eq!(&writes[2].1[..], &data[..64]);
        assert_eq!(&writes[5].1[..8], &data[192..200]);
        assert!(writes[5].1[8..].iter().all(|&b| b == 0));

        assert_eq!(unpack(&writes[6].1[..4]).unwrap(), vec![CMD_REBOOT]);
        assert_eq!(mock.open_count(), 1);
    }

    #[test]
    fn test_prepare_uses_load_offset() {
        let f268 = lookup(0x0c45, 0x7010).unwrap();
        let mut mock = ready_mock();
        for r in collect(run_update(f268, &mut mock, image(256))) {
            r.unwrap();
        }
        let writes = mock.get_writes();
        assert_eq!(
            unpack(&writes[1].1[..12]).unwrap(),
            vec![CMD_PREPARE, 0x200, 256]
        );
    }

    #[test]
    fn test_init_command_mismatch_stops_update() {
        let mut mock = MockTransport::new();
        mock.queue_response(0x0055_AA02, EXPECTED_STATUS);
        let results = collect(run_update(f248b(), &mut mock, image(256)));

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(UpdateError::Protocol(ProtocolMismatch {
                step,
                field,
                expected,
                actual,
            })) => {
                assert_eq!(*step, Step::Initialize);
                assert_eq!(*field, MismatchField::Command);
                assert_eq!(*expected, CMD_INIT);
                assert_eq!(*actual, 0x0055_AA02);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        let message = results[1].as_ref().unwrap_err().to_string();
        assert!(message.contains("0x0055aa01"));
        assert!(message.contains("0x0055aa02"));

        // Only INIT was ever written.
        assert_eq!(mock.get_writes().len(), 1);
    }

    #[test]
    fn test_prepare_status_mismatch() {
        let mut mock = MockTransport::new();
        mock.queue_response(CMD_INIT, EXPECTED_STATUS);
        mock.queue_response(CMD_PREPARE, 0);
        let mut session = run_update(f248b(), &mut mock, image(256));

        assert!(session.next().unwrap().is_ok());
        assert!(session.next().unwrap().is_ok());
        let err = session.next().unwrap().unwrap_err();
        assert!(matches!(
            err,
            UpdateError::Protocol(ProtocolMismatch {
                step: Step::Prepare,
                field: MismatchField::Status,
                ..
            })
        ));
        assert_eq!(session.state(), UpdateState::Failed);
        assert!(session.state().is_terminal());
        assert!(session.next().is_none());
        assert!(!session.device_state_undefined());
    }

    #[test]
    fn test_short_init_response() {
        let mut mock = MockTransport::new();
        mock.queue_report(&pack(&[CMD_INIT, EXPECTED_STATUS]));
        let results = collect(run_update(f248b(), &mut mock, image(256)));
        assert!(matches!(
            results.last(),
            Some(Err(UpdateError::Transport(
                crate::transport::TransportError::ShortRead { actual: 8, .. }
            )))
        ));
    }

    #[test]
    fn test_nothing_sent_before_first_poll() {
        let mut mock = ready_mock();
        let session = run_update(f248b(), &mut mock, image(256));
        assert_eq!(session.state(), UpdateState::Idle);
        assert!(!session.state().is_terminal());
        drop(session);
        assert!(mock.get_writes().is_empty());
        assert!(!mock.is_open());
    }

    #[test]
    fn test_end_to_end_64k() {
        let descriptor = DeviceDescriptor {
            vendor_id: 0x0c45,
            product_id: 0x7040,
            description: "SN32F248B (bootloader)",
            qmk_offset: 0x0,
            size_limit: 65536,
        };
        let data = image(64 * 1024);
        assert!(crate::payload::validate_firmware(&descriptor, &data).is_ok());

        let mut mock = ready_mock();
        let events: Vec<ProgressEvent> = collect(run_update(&descriptor, &mut mock, data))
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        let chunk_events: Vec<&ProgressEvent> = events
            .iter()
            .filter(|e| e.phase == UpdatePhase::Flash && e.fraction > 0.0)
            .collect();
        assert_eq!(chunk_events.len(), 1024);
        assert!(chunk_events.windows(2).all(|w| w[0].fraction < w[1].fraction));
        assert_eq!(chunk_events.last().unwrap().fraction, 1.0);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::new(UpdatePhase::Complete, 1.0))
        );
        assert_eq!(mock.get_writes().len(), 2 + 1024 + 1);
    }

    #[test]
    fn test_oversized_image_rejected_before_io() {
        let f268 = lookup(0x0c45, 0x7010).unwrap();
        let mut mock = ready_mock();
        let results = collect(run_update(f268, &mut mock, image(30 * 1024 + 1)));
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(UpdateError::Validation(ValidationError::ImageTooLarge { .. }))
        ));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_disconnect_mid_flash() {
        let mut mock = ready_mock();
        // INIT, PREPARE, then two chunks before the device vanishes.
        mock.disconnect_after(4);
        let mut session = run_update(f248b(), &mut mock, image(512));

        let mut last = None;
        for r in session.by_ref() {
            last = Some(r);
        }
        match last {
            Some(Err(UpdateError::DeviceLost { during })) => {
                assert_eq!(during, UpdateState::Flashing)
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(session.bytes_sent(), 128);
        assert!(session.device_state_undefined());
    }

    #[test]
    fn test_cancel_between_chunks() {
        let mut mock = ready_mock();
        let token = CancelToken::new();
        let mut session =
            run_update(f248b(), &mut mock, image(512)).with_cancel_token(token.clone());

        // initialize, prepare, flash 0%, first chunk
        for _ in 0..4 {
            session.next().unwrap().unwrap();
        }
        token.cancel();
        let err = session.next().unwrap().unwrap_err();
        assert!(matches!(err, UpdateError::Cancelled { bytes_sent: 64 }));
        assert!(session.next().is_none());
        assert!(session.device_state_undefined());
    }
}
