//! AOA-KVM host application entry point.
//!
//! Loads the configuration, wires the libusb bus, the Annex-B decoder and the
//! renderer into the connection state machine, then runs it until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config / validate
//!  └─ ConnectionStateMachine::new()
//!  └─ spawn_blocking(run)            -- scan, handshake, stream, teardown
//!       └─ decode thread             -- one per connection
//!  └─ ctrl_c task                    -- sets the shutdown flag
//!  └─ state watch task               -- logs every published state
//! ```
//!
//! # Threads and the runtime (for beginners)
//!
//! USB transfers and decoding block, so the state machine runs on a
//! blocking worker rather than an async task.  The Tokio runtime only hosts
//! the small async pieces: waiting for Ctrl-C and following the state
//! channel.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aoakvm_core::FrameRing;
use aoakvm_host::application::handshake::AccessoryHandshake;
use aoakvm_host::application::session::{ConnectionContext, ConnectionStateMachine};
use aoakvm_host::application::transport::UsbBus;
use aoakvm_host::infrastructure::render::HeadlessRenderer;
use aoakvm_host::infrastructure::storage::config::{load_config, load_config_from, AppConfig};
use aoakvm_host::infrastructure::usb::RusbBus;
use aoakvm_host::infrastructure::video::AnnexBDecoderFactory;

#[derive(Debug, Parser)]
#[command(name = "aoakvm", version, about = "Show and control an Android device over USB accessory mode")]
struct Cli {
    /// Configuration file; defaults to the platform config directory.
    #[arg(long, env = "AOAKVM_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset; overrides the configured level.
    #[arg(long)]
    log_level: Option<String>,

    /// Print attached USB devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };
    let level = cli
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)))
        .init();

    let config = loaded.context("cannot load configuration")?;
    config.validate().context("invalid configuration")?;

    let bus = Arc::new(RusbBus::new().context("cannot initialise libusb")?);

    if cli.list_devices {
        return list_devices(bus.as_ref());
    }

    info!("AOA-KVM host starting");
    run(config, bus).await
}

async fn run(config: AppConfig, bus: Arc<RusbBus>) -> anyhow::Result<()> {
    let frames = FrameRing::with_capacity(config.video.frame_queue_capacity)
        .context("cannot allocate the frame queue")?;
    let context = Arc::new(ConnectionContext::new(Arc::new(frames)));

    let mut machine = ConnectionStateMachine::new(
        AccessoryHandshake::new(bus, config.handshake_settings()),
        AnnexBDecoderFactory::new(config.decoder_settings()),
        HeadlessRenderer::new(config.screens.clone(), config.window.clone()),
        Arc::clone(&context),
        config.session_settings(),
    );

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_signal.store(true, Ordering::Release);
        }
    });

    // ── State change notifications ────────────────────────────────────────────
    let mut states = context.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            if state.is_streaming() {
                info!("device connected, streaming");
            } else {
                info!(%state, "connection state");
            }
        }
    });

    let result = tokio::task::spawn_blocking(move || machine.run(&shutdown))
        .await
        .context("connection state machine task failed")?;

    result.context("connection state machine stopped")?;
    info!("AOA-KVM host stopped");
    Ok(())
}

fn list_devices(bus: &RusbBus) -> anyhow::Result<()> {
    let devices = bus.devices().context("cannot enumerate USB devices")?;
    if devices.is_empty() {
        println!("no USB devices found");
    }
    for device in devices {
        let mode = if device.is_accessory() {
            "accessory mode".to_string()
        } else if device.device_class == 0 {
            "candidate".to_string()
        } else {
            format!("ignored (class {:02x})", device.device_class)
        };
        println!("{device}  {mode}");
    }
    Ok(())
}
