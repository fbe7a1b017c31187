//! Flash session - high-level orchestrator for one firmware update.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::events::{FlashEvent, FlashObserver, LogLevel, PacketDirection, TracingObserver};
use crate::payload::FirmwareImage;
use crate::protocol::constants::REBOOT_SETTLE_MS;
use crate::registry::{self, DeviceDescriptor};
use crate::state::{CancelToken, run_update};
use crate::transport::{HidTransport, NusbTransport, TransportError};

/// Configuration for a flash session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    /// Path to the raw firmware binary.
    pub firmware_path: Option<String>,
    /// Restrict to one VID; needs `product_id` too.
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Wait after REBOOT before reporting completion.
    pub settle_delay_ms: u64,
    /// How long to poll for a bootloader to appear.
    pub wait_timeout_secs: u64,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            firmware_path: None,
            vendor_id: None,
            product_id: None,
            settle_delay_ms: REBOOT_SETTLE_MS,
            wait_timeout_secs: 10,
        }
    }
}

impl FlashConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FlashConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Descriptor pinned by the config, if any.
    pub fn descriptor(&self) -> Result<Option<&'static DeviceDescriptor>> {
        match (self.vendor_id, self.product_id) {
            (Some(vid), Some(pid)) => registry::lookup(vid, pid)
                .map(Some)
                .ok_or_else(|| anyhow!("Unsupported device {:04x}:{:04x}", vid, pid)),
            (None, None) => Ok(None),
            _ => bail!("vendor_id and product_id must be given together"),
        }
    }
}

/// Flash session - finds the device, validates, and drives the update.
pub struct FlashSession<O: FlashObserver> {
    config: FlashConfig,
    observer: Arc<O>,
    cancel: CancelToken,
}

impl FlashSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: FlashConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: FlashObserver + 'static> FlashSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: FlashConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            cancel: CancelToken::new(),
        }
    }

    /// Token that aborts the transfer before the next chunk.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn emit(&self, event: FlashEvent) {
        self.observer.on_event(&event);
    }

    /// Run the complete update against the first matching bootloader.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<()> {
        let path = self
            .config
            .firmware_path
            .clone()
            .ok_or_else(|| anyhow!("No firmware path configured"))?;
        info!(path = %path, "Loading firmware");
        let image =
            FirmwareImage::load(&path).with_context(|| format!("Failed to read {path}"))?;

        let (mut transport, descriptor) = self.wait_for_device()?;
        self.flash_with(&mut transport, descriptor, image)
    }

    fn wait_for_device(&self) -> Result<(NusbTransport, &'static DeviceDescriptor)> {
        info!("Waiting for device...");
        let pinned = self.config.descriptor()?;
        let timeout = Duration::from_secs(self.config.wait_timeout_secs);
        let start = Instant::now();
        let mut poll_count = 0u64;

        loop {
            poll_count += 1;

            let found = match pinned {
                Some(d) => NusbTransport::find_with_ids(d.vendor_id, d.product_id).map(|t| (t, d)),
                None => NusbTransport::find(),
            };

            match found {
                Ok((t, d)) => {
                    info!(device = %d, "Device found after {} polls", poll_count);
                    return Ok((t, d));
                }
                Err(TransportError::DeviceNotFound { .. }) => {
                    if start.elapsed() >= timeout {
                        return Err(anyhow!(
                            "No bootloader found after {}s; put the keyboard in bootloader mode",
                            timeout.as_secs()
                        ));
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Validate `image` for `descriptor` and flash it through `transport`.
    pub fn flash_with<T: HidTransport + ?Sized>(
        &self,
        transport: &mut T,
        descriptor: &DeviceDescriptor,
        image: FirmwareImage,
    ) -> Result<()> {
        self.emit(FlashEvent::DeviceConnected {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });

        if let Err(e) = image.validate(descriptor) {
            self.emit(FlashEvent::Error {
                message: e.to_string(),
                device_state_undefined: false,
            });
            return Err(e.into());
        }
        self.emit(FlashEvent::Log {
            level: LogLevel::Info,
            message: format!("Flashing {} bytes to {}", image.len(), descriptor),
        });

        let mut observed = ObservableTransport {
            inner: transport,
            observer: self.observer.as_ref(),
        };
        let mut session = run_update(descriptor, &mut observed, image)
            .with_settle_delay(Duration::from_millis(self.config.settle_delay_ms))
            .with_cancel_token(self.cancel.clone());

        let mut phase = None;
        while let Some(result) = session.next() {
            match result {
                Ok(progress) => {
                    if phase != Some(progress.phase) {
                        self.emit(FlashEvent::PhaseChanged {
                            from: phase,
                            to: progress.phase,
                        });
                        phase = Some(progress.phase);
                    }
                    self.emit(FlashEvent::Progress(progress));
                }
                Err(e) => {
                    if e.is_device_lost() {
                        self.emit(FlashEvent::DeviceDisconnected);
                    }
                    let undefined = session.device_state_undefined();
                    if undefined {
                        warn!("Flash was interrupted; the keyboard may not boot until reflashed");
                    }
                    self.emit(FlashEvent::Error {
                        message: e.to_string(),
                        device_state_undefined: undefined,
                    });
                    return Err(e.into());
                }
            }
        }

        self.emit(FlashEvent::Complete);
        Ok(())
    }
}

/// Transport wrapper that emits packet events.
struct ObservableTransport<'a, T: HidTransport + ?Sized, O: FlashObserver + ?Sized> {
    inner: &'a mut T,
    observer: &'a O,
}

impl<'a, T: HidTransport + ?Sized, O: FlashObserver + ?Sized> HidTransport
    for ObservableTransport<'a, T, O>
{
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn open(&mut self) -> Result<(), TransportError> {
        self.inner.open()
    }

    fn set_feature_report(&mut self, report_id: u8, data: &[u8]) -> Result<(), TransportError> {
        let res = self.inner.set_feature_report(report_id, data);
        if res.is_ok() {
            self.observer.on_event(&FlashEvent::Packet {
                direction: PacketDirection::Tx,
                length: data.len(),
                data: Some(data.iter().take(16).cloned().collect()),
            });
        }
        res
    }

    fn get_feature_report(
        &mut self,
        report_id: u8,
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.get_feature_report(report_id, len);
        if let Ok(data) = &res
            && !data.is_empty()
        {
            self.observer.on_event(&FlashEvent::Packet {
                direction: PacketDirection::Rx,
                length: data.len(),
                data: Some(data.iter().take(16).cloned().collect()),
            });
        }
        res
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }
}
