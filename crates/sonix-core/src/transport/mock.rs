//! Mock HID transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{HidTransport, TransportError};
use crate::protocol::codec::{pack, pad};
use crate::protocol::constants::{PID_SN32F248B, REPORT_SIZE, SONIX_VENDOR_ID};

/// Mock transport for unit testing the update state machine.
///
/// Clones share state, so a test can keep a handle for inspection while the
/// session holds another.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued reports to return on read.
    response_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured writes as (report_id, data).
    write_log: Arc<Mutex<Vec<(u8, Vec<u8>)>>>,
    /// Simulated VID/PID.
    vid: u16,
    pid: u16,
    opened: Arc<Mutex<bool>>,
    open_count: Arc<Mutex<usize>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Disconnect after this many successful writes.
    disconnect_after: Arc<Mutex<Option<usize>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            response_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            vid: SONIX_VENDOR_ID,
            pid: PID_SN32F248B,
            opened: Arc::new(Mutex::new(false)),
            open_count: Arc::new(Mutex::new(0)),
            connected: Arc::new(Mutex::new(true)),
            disconnect_after: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue a raw report to be returned on next read.
    pub fn queue_report(&self, report: &[u8]) {
        self.response_queue
            .lock()
            .unwrap()
            .push_back(report.to_vec());
    }

    /// Queue a full-size response echoing `command` with `status`.
    pub fn queue_response(&self, command: u32, status: u32) {
        self.queue_report(&pad(&pack(&[command, status]), REPORT_SIZE));
    }

    /// Get all captured writes.
    pub fn get_writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// How many times `open` actually opened the device.
    pub fn open_count(&self) -> usize {
        *self.open_count.lock().unwrap()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }

    /// Drop off the bus once `writes` reports have gone out.
    pub fn disconnect_after(&self, writes: usize) {
        *self.disconnect_after.lock().unwrap() = Some(writes);
    }

    pub fn set_ids(&mut self, vid: u16, pid: u16) {
        self.vid = vid;
        self.pid = pid;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HidTransport for MockTransport {
    fn is_open(&self) -> bool {
        *self.opened.lock().unwrap()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut opened = self.opened.lock().unwrap();
        if !*opened {
            *opened = true;
            *self.open_count.lock().unwrap() += 1;
        }
        Ok(())
    }

    fn set_feature_report(&mut self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut log = self.write_log.lock().unwrap();
        log.push((report_id, data.to_vec()));
        if let Some(limit) = *self.disconnect_after.lock().unwrap()
            && log.len() >= limit
        {
            *self.connected.lock().unwrap() = false;
        }
        Ok(())
    }

    fn get_feature_report(
        &mut self,
        _report_id: u8,
        _len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.response_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 1000 })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;

    #[test]
    fn test_mock_response_queue() {
        let mut mock = MockTransport::new();
        mock.queue_response(CMD_INIT, EXPECTED_STATUS);
        mock.queue_report(&[0u8; 10]);

        let report = mock.receive_report().unwrap();
        assert_eq!(report.len(), REPORT_SIZE);
        assert_eq!(&report[..4], &[0x01, 0xAA, 0x55, 0x00]);

        let short = mock.receive_report();
        assert!(matches!(
            short,
            Err(TransportError::ShortRead {
                expected: 64,
                actual: 10
            })
        ));

        // Queue is empty now
        assert!(mock.receive_report().is_err());
    }

    #[test]
    fn test_send_report_pads_and_opens() {
        let mut mock = MockTransport::new();
        assert!(!mock.is_open());

        mock.send_report(b"Hello").unwrap();
        mock.send_report(b"World").unwrap();
        assert!(mock.is_open());
        assert_eq!(mock.open_count(), 1);

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].0, REPORT_ID);
        assert_eq!(writes[0].1.len(), REPORT_SIZE);
        assert_eq!(&writes[0].1[..5], b"Hello");
        assert!(writes[0].1[5..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_send_report_empty_payload_is_full_report() {
        let mut mock = MockTransport::new();
        mock.send_report(&[]).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, vec![0u8; REPORT_SIZE]);

        mock.clear_writes();
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_send_report_rejects_oversized() {
        let mut mock = MockTransport::new();
        let err = mock.send_report(&[0u8; 65]).unwrap_err();
        assert!(matches!(
            err,
            TransportError::OversizedReport { len: 65, max: 64 }
        ));
        assert!(mock.get_writes().is_empty());

        // Exactly one report's worth is fine.
        mock.send_report(&[0u8; 64]).unwrap();
    }

    #[test]
    fn test_mock_disconnect() {
        let mut mock = MockTransport::new();
        assert!(mock.is_connected());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(matches!(
            mock.send_report(b"test"),
            Err(TransportError::Disconnected)
        ));

        mock.reconnect();
        assert!(mock.send_report(b"test").is_ok());
    }

    #[test]
    fn test_disconnect_after_writes() {
        let mut mock = MockTransport::new();
        mock.disconnect_after(2);
        mock.send_report(b"a").unwrap();
        mock.send_report(b"b").unwrap();
        assert!(mock.send_report(b"c").is_err());
    }
}
