//! Event system for UI decoupling.
//!
//! The update state machine yields `ProgressEvent`s to whoever drives it;
//! the session layer fans those out, together with connection and packet
//! notices, to a `FlashObserver`.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Update phases as reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Initialize,
    Prepare,
    Flash,
    Reboot,
    Complete,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePhase::Initialize => write!(f, "initialize"),
            UpdatePhase::Prepare => write!(f, "prepare"),
            UpdatePhase::Flash => write!(f, "flash"),
            UpdatePhase::Reboot => write!(f, "reboot"),
            UpdatePhase::Complete => write!(f, "complete"),
        }
    }
}

/// Progress within a phase, `fraction` in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressEvent {
    pub phase: UpdatePhase,
    pub fraction: f64,
}

impl ProgressEvent {
    pub fn new(phase: UpdatePhase, fraction: f64) -> Self {
        Self { phase, fraction }
    }

    pub fn percent(&self) -> u8 {
        (self.fraction.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}%", self.phase, self.percent())
    }
}

/// Events emitted by a flash session.
#[derive(Debug, Clone)]
pub enum FlashEvent {
    /// Device found and about to be used.
    DeviceConnected { vid: u16, pid: u16 },
    /// Device dropped off the bus mid-update.
    DeviceDisconnected,
    /// Phase changed.
    PhaseChanged {
        from: Option<UpdatePhase>,
        to: UpdatePhase,
    },
    /// Progress update from the state machine.
    Progress(ProgressEvent),
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Error occurred.
    Error {
        message: String,
        device_state_undefined: bool,
    },
    /// Feature report sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Update finished and the device rebooted.
    Complete,
}

/// Report direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Host -> Device
    Rx, // Device -> Host
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving flash events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait FlashObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &FlashEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl FlashObserver for NullObserver {
    fn on_event(&self, _event: &FlashEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl FlashObserver for TracingObserver {
    fn on_event(&self, event: &FlashEvent) {
        match event {
            FlashEvent::DeviceConnected { vid, pid } => {
                tracing::info!(
                    vid = %format!("{:04X}", vid),
                    pid = %format!("{:04X}", pid),
                    "Device connected"
                );
            }
            FlashEvent::DeviceDisconnected => {
                tracing::warn!("Device disconnected");
            }
            FlashEvent::PhaseChanged { from, to } => match from {
                Some(from) => tracing::info!(from = %from, to = %to, "Phase changed"),
                None => tracing::info!(to = %to, "Phase started"),
            },
            FlashEvent::Progress(progress) => {
                tracing::debug!(
                    phase = %progress.phase,
                    progress = %format!("{}%", progress.percent()),
                    "Progress"
                );
            }
            FlashEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            FlashEvent::Error {
                message,
                device_state_undefined,
            } => {
                tracing::error!(device_state_undefined, "Error: {}", message);
            }
            FlashEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "HID report");
            }
            FlashEvent::Complete => {
                tracing::info!("Update complete");
            }
        }
    }
}
