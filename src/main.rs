//! Surface GW - control surface input gateway
//!
//! Turns Stream Deck and HTTP inputs into triggers for an automation
//! controller and renders its feedback back onto the hardware.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use surface_gw::api::{self, ApiState};
use surface_gw::config::AppConfig;
use surface_gw::device::streamdeck::tcp_proxy::{ConnectionManager, NetworkFactory};
use surface_gw::device::streamdeck::virtual_deck::{VirtualBackend, VirtualConnectionManager, VirtualDeck};
use surface_gw::device::{build_device, event_channel, Backends, Device, DeviceContext, DeviceEvent, DeviceEventKind};
use surface_gw::feedback::Feedback;
use surface_gw::render::RenderPipeline;

/// Delay before exiting after a failed startup, so the log can be read
const INIT_FAILURE_GRACE: Duration = Duration::from_secs(5);

/// Surface GW - Stream Deck / HTTP trigger gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write a daily rotated log file into this directory
    #[arg(long, env = "LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Controller API port (overrides the configuration)
    #[arg(long)]
    api_port: Option<u16>,

    /// Attach the built-in virtual Stream Deck instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Render the feedback in this JSON file to a PNG and exit
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Output file for --preview
    #[arg(long, default_value = "preview.png")]
    preview_out: PathBuf,

    #[arg(long, default_value = "72")]
    preview_width: u32,

    #[arg(long, default_value = "72")]
    preview_height: u32,

    /// Render the preview in its pressed state
    #[arg(long)]
    pressed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_guard = init_logging(&args.log_level, args.log_dir.as_deref())?;

    info!("Starting Surface GW v{}...", env!("CARGO_PKG_VERSION"));

    if let Some(feedback_path) = &args.preview {
        return render_preview(&args, feedback_path).await;
    }

    let mut initialized = Vec::new();
    match start(&args, &mut initialized).await {
        Ok(gateway) => run(gateway).await,
        Err(e) => {
            unwind_startup(&e, &initialized).await;
            error!("Exiting in {}s", INIT_FAILURE_GRACE.as_secs());
            tokio::time::sleep(INIT_FAILURE_GRACE).await;
            // exit() skips destructors; flush the file log first
            drop(log_guard);
            std::process::exit(1);
        }
    }

    info!("Surface GW shutdown complete");
    Ok(())
}

/// A started gateway: devices initialized and the API listening
struct Gateway {
    devices: Vec<Arc<dyn Device>>,
    events_rx: mpsc::Receiver<DeviceEvent>,
    broadcast_tx: broadcast::Sender<DeviceEvent>,
    api: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

/// Load the configuration, initialize every device, bind the API.
///
/// Devices that initialized are pushed to `initialized` as they come up, so
/// the caller can tear them down when a later step fails.
async fn start(args: &Args, initialized: &mut Vec<Arc<dyn Device>>) -> Result<Gateway> {
    info!("Configuration file: {}", args.config.display());
    let config = AppConfig::load(&args.config).await?;
    info!("Configuration loaded: {} device(s)", config.devices.len());

    let render = RenderPipeline::init(&config.render.font_paths).await;
    info!("✅ Renderer ready");

    let (events_tx, events_rx) = event_channel();
    let ctx = DeviceContext {
        events: events_tx,
        render,
        backends: backends(args.simulate),
    };

    let devices: Vec<Arc<dyn Device>> = config
        .devices
        .iter()
        .map(|device| build_device(device, &ctx))
        .collect();
    drop(ctx);

    for device in &devices {
        info!("Initializing device {}...", device.id());
        device
            .init()
            .await
            .with_context(|| format!("Device {} failed to initialize", device.id()))?;
        initialized.push(Arc::clone(device));
        info!("✅ Device {} ready", device.id());
    }
    info!("All devices initialized");

    let (broadcast_tx, _) = broadcast::channel::<DeviceEvent>(256);
    let api = if config.api.enabled {
        let listener = api::bind(args.api_port.unwrap_or(config.api.port)).await?;
        let state = Arc::new(ApiState {
            devices: devices.clone(),
            events_tx: broadcast_tx.clone(),
        });
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = api::serve(listener, state, shutdown).await {
                error!("Controller API stopped: {:#}", e);
            }
        });
        Some((shutdown_tx, task))
    } else {
        info!("Controller API disabled");
        None
    };

    Ok(Gateway {
        devices,
        events_rx,
        broadcast_tx,
        api,
    })
}

/// Report a failed startup and release what was already brought up
async fn unwind_startup(error: &anyhow::Error, initialized: &[Arc<dyn Device>]) {
    error!("❌ Startup failed: {:#}", error);
    for device in initialized.iter().rev() {
        device.destroy().await;
        debug!("Device {} destroyed", device.id());
    }
}

async fn run(mut gateway: Gateway) {
    info!("Ready to process device events!");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = gateway.events_rx.recv() => {
                log_event(&event);
                // No subscribers is fine
                let _ = gateway.broadcast_tx.send(event);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    for device in &gateway.devices {
        device.destroy().await;
        debug!("Device {} destroyed", device.id());
    }
    info!("All devices shut down");

    if let Some((shutdown_tx, task)) = gateway.api {
        let _ = shutdown_tx.send(());
        if let Err(e) = task.await {
            warn!("Controller API task ended abnormally: {}", e);
        }
    }
}

/// Transports available to the devices
fn backends(simulate: bool) -> Backends {
    if !simulate {
        warn!("No hardware backend compiled in; Stream Deck devices need --simulate");
        return Backends::default();
    }

    info!("🧪 Simulation mode: attaching virtual Stream Deck+ panels");
    let usb_deck = Arc::new(VirtualDeck::plus());
    let network: NetworkFactory = Arc::new(|| {
        let deck = Arc::new(VirtualDeck::plus().networked());
        Arc::new(VirtualConnectionManager::auto_connect(deck)) as Arc<dyn ConnectionManager>
    });
    Backends {
        usb: Some(Arc::new(VirtualBackend::single(usb_deck))),
        network: Some(network),
    }
}

fn log_event(event: &DeviceEvent) {
    match &event.kind {
        DeviceEventKind::Trigger { trigger_id, arguments } => match arguments {
            Some(arguments) => debug!("📥 {} {} {:?}", event.device_id, trigger_id, arguments),
            None => debug!("📥 {} {}", event.device_id, trigger_id),
        },
        DeviceEventKind::Error { error } => warn!("⚠️  {}: {}", event.device_id, error),
    }
}

/// `--preview`: render one feedback JSON file to a PNG
async fn render_preview(args: &Args, feedback_path: &Path) -> Result<()> {
    let json = tokio::fs::read_to_string(feedback_path)
        .await
        .with_context(|| format!("Failed to read feedback file: {}", feedback_path.display()))?;
    let feedback: Option<Feedback> = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse feedback JSON: {}", feedback_path.display()))?;

    let render = RenderPipeline::init(&[]).await;
    let pixels = render.render(feedback.as_ref(), args.preview_width, args.preview_height, args.pressed)?;
    pixels.save_png(&args.preview_out)?;

    info!(
        "✅ Preview {}x{} written to {}",
        pixels.width(),
        pixels.height(),
        args.preview_out.display()
    );
    Ok(())
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "surface-gw.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file_layer)
        .init();

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args_for(config: &Path) -> Args {
        Args::parse_from(["surface-gw", "--config", config.to_str().unwrap()])
    }

    fn config_file(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_missing_config_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let mut initialized = Vec::new();

        let err = start(&args_for(&dir.path().join("nope.yaml")), &mut initialized)
            .await
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
        assert!(initialized.is_empty());
    }

    #[tokio::test]
    async fn test_device_init_failure_keeps_earlier_devices_for_unwind() {
        let file = config_file(
            "api:\n  enabled: false\ndevices:\n  - id: web\n    type: http\n    options: {port: 0}\n  - id: desk\n    type: stream_deck\n    options: {}\n",
        );
        let mut initialized = Vec::new();

        let err = start(&args_for(file.path()), &mut initialized).await.err().unwrap();
        assert!(format!("{:#}", err).contains("Device desk failed to initialize"));
        assert_eq!(initialized.len(), 1);
        assert_eq!(initialized[0].id(), "web");

        unwind_startup(&err, &initialized).await;
    }

    #[tokio::test]
    async fn test_taken_api_port_fails_start() {
        let taken = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let file = config_file(&format!(
            "api:\n  port: {}\ndevices:\n  - id: web\n    type: http\n    options: {{port: 0}}\n",
            port
        ));
        let mut initialized = Vec::new();

        let err = start(&args_for(file.path()), &mut initialized).await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to bind API server"));
        assert_eq!(initialized.len(), 1);

        unwind_startup(&err, &initialized).await;
    }
}
