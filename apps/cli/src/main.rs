use std::io::Write;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use sonix_core::events::{FlashEvent, FlashObserver, TracingObserver, UpdatePhase};
use sonix_core::registry::{self, SUPPORTED_DEVICES};
use sonix_core::session::{FlashConfig, FlashSession};
use sonix_core::{FirmwareImage, validate_firmware};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Sonix SN32F2xx bootloader flasher (Pure Rust)", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List supported bootloaders
    List,
    /// Check a firmware image without touching any device
    Validate {
        /// Path to firmware binary (.bin)
        #[arg(long)]
        firmware: String,

        /// Target device as VID:PID in hex, e.g. 0c45:7040
        #[arg(long)]
        device: String,
    },
    /// Flash a firmware image to a keyboard in bootloader mode
    Flash {
        /// Path to firmware binary (.bin)
        #[arg(long)]
        firmware: Option<String>,

        /// Only use this device (VID:PID in hex)
        #[arg(long)]
        device: Option<String>,

        /// TOML config file; flags override its values
        #[arg(long)]
        config: Option<String>,

        /// Milliseconds to wait for the device to reboot
        #[arg(long)]
        settle_ms: Option<u64>,
    },
}

/// Prints a progress line to stderr and forwards everything to tracing.
struct CliObserver;

impl FlashObserver for CliObserver {
    fn on_event(&self, event: &FlashEvent) {
        if let FlashEvent::Progress(progress) = event {
            let label = match progress.phase {
                UpdatePhase::Initialize => "Initializing",
                UpdatePhase::Prepare => "Preparing",
                UpdatePhase::Flash => "Flashing",
                UpdatePhase::Reboot => "Rebooting",
                UpdatePhase::Complete => "Complete",
            };
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "\r{:<12} {:>3}%", label, progress.percent());
            if progress.phase == UpdatePhase::Complete {
                let _ = writeln!(stderr);
            }
            let _ = stderr.flush();
        }
        if let FlashEvent::Error {
            device_state_undefined: true,
            ..
        } = event
        {
            eprintln!();
            eprintln!("WARNING: flashing was interrupted. The keyboard is still in an");
            eprintln!("undefined state; re-enter the bootloader and flash again.");
        }
        TracingObserver.on_event(event);
    }
}

fn parse_device(s: &str) -> Result<(u16, u16)> {
    registry::parse_device_id(s).ok_or_else(|| anyhow!("Expected VID:PID in hex, got '{s}'"))
}

fn list() {
    for d in SUPPORTED_DEVICES {
        println!(
            "{:04x}:{:04x}  {:<24} offset=0x{:X} max={} bytes",
            d.vendor_id,
            d.product_id,
            d.description,
            d.qmk_offset,
            d.max_image_len()
        );
    }
}

fn validate(firmware: &str, device: &str) -> Result<()> {
    let (vid, pid) = parse_device(device)?;
    let descriptor = registry::lookup(vid, pid)
        .ok_or_else(|| anyhow!("Unsupported device {vid:04x}:{pid:04x}"))?;
    let image = FirmwareImage::load(firmware)?;
    validate_firmware(descriptor, image.raw_data())?;
    info!(device = %descriptor, len = image.len(), "Firmware looks valid");
    println!("OK: {} bytes fit {}", image.len(), descriptor);
    Ok(())
}

fn flash(
    firmware: Option<String>,
    device: Option<String>,
    config: Option<String>,
    settle_ms: Option<u64>,
) -> Result<()> {
    let mut cfg = match config {
        Some(path) => FlashConfig::load_from_file(path)?,
        None => FlashConfig::default(),
    };
    if let Some(firmware) = firmware {
        cfg.firmware_path = Some(firmware);
    }
    if let Some(device) = device {
        let (vid, pid) = parse_device(&device)?;
        cfg.vendor_id = Some(vid);
        cfg.product_id = Some(pid);
    }
    if let Some(ms) = settle_ms {
        cfg.settle_delay_ms = ms;
    }

    let mut session = FlashSession::with_observer(cfg, Arc::new(CliObserver));
    session.run()
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let result = match args.command {
        Command::List => {
            list();
            Ok(())
        }
        Command::Validate { firmware, device } => validate(&firmware, &device),
        Command::Flash {
            firmware,
            device,
            config,
            settle_ms,
        } => {
            info!("Starting sonix-flash (nusb backend)...");
            flash(firmware, device, config, settle_ms)
        }
    };

    if let Err(e) = result {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}
