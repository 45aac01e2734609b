use anyhow::Context;
use ble_discovery::domain::models::ScanningMode;
use ble_discovery::domain::settings::{Settings, SettingsService};
use ble_discovery::infrastructure::bluetooth::radio::RadioStack;
use ble_discovery::infrastructure::bluetooth::scanner::ScanSession;
use ble_discovery::infrastructure::bluetooth::simulated::{Scenario, SimulatedRadio};
use ble_discovery::infrastructure::bluetooth::DiscoveryService;
use ble_discovery::infrastructure::logging;
use ble_discovery::infrastructure::report_sink::{ConsoleSink, ReportSink};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long to wait for the radio to confirm a stop before giving up
const STOP_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

/// Discover nearby BLE peripherals and list their GATT services and
/// characteristics.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run against a simulated radio described by a JSON scenario
    #[arg(long, value_name = "SCENARIO")]
    simulate: Option<PathBuf>,

    /// Only report devices advertising this exact local name
    #[arg(long)]
    name_filter: Option<String>,

    /// Only report devices advertising this service UUID
    #[arg(long)]
    service_filter: Option<String>,

    /// Request scan responses (active scanning)
    #[arg(long)]
    active: bool,

    /// Maximum number of devices enumerated at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Per-call GATT timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log level filter, e.g. "debug" or "ble_discovery=trace"
    #[arg(long)]
    log_level: Option<String>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(name) = &self.name_filter {
            settings.scan.name_filter = name.clone();
        }
        if let Some(service) = &self.service_filter {
            settings.scan.service_filter = service.clone();
        }
        if self.active {
            settings.scan.scanning_mode = ScanningMode::Active;
        }
        if let Some(max) = self.max_concurrent {
            settings.discovery.max_concurrent_enumerations = max;
        }
        if let Some(timeout) = self.timeout_ms {
            settings.discovery.enumeration_timeout_ms = timeout;
        }
        if let Some(level) = &self.log_level {
            settings.log_settings.level = level.clone();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = match &cli.config {
        Some(path) => SettingsService::from_path(path.clone()),
        None => SettingsService::new()?,
    };
    cli.apply(settings_service.get_mut());

    let logging_guard = logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting BLE discovery");
    if let Some(reason) = settings_service.load_error() {
        if logging_guard.is_some() {
            warn!("{}", reason);
        } else {
            eprintln!("{}", reason);
        }
    }

    if cli.save_config {
        settings_service.save()?;
        info!("Saved settings to {}", settings_service.path().display());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    let result = runtime.block_on(run(cli, settings_service.get().clone()));

    // The stdin reader may still be parked in a blocking read
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

async fn run(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    let filter = settings.scan.to_filter()?;

    let (radio, replay): (Arc<dyn RadioStack>, Option<(Arc<SimulatedRadio>, Scenario)>) =
        match &cli.simulate {
            Some(path) => {
                let scenario = Scenario::load(path)?;
                info!(
                    "Using simulated radio with {} device(s) from {}",
                    scenario.devices.len(),
                    path.display()
                );
                let radio = Arc::new(SimulatedRadio::from_scenario(&scenario));
                (radio.clone(), Some((radio, scenario)))
            }
            None => (native_radio()?, None),
        };

    let sink: Arc<dyn ReportSink> = Arc::new(ConsoleSink::stdout());
    let discovery = DiscoveryService::new(radio.clone(), sink.clone(), settings.discovery.clone());
    let (session, events) = ScanSession::new(radio.clone(), filter);

    let worker = tokio::spawn(async move { discovery.run(events).await });

    session.start().await.context("Failed to start BLE scan")?;
    sink.emit("scan started");

    if let Some((simulated, scenario)) = replay {
        tokio::spawn(async move { scenario.replay(&simulated).await });
    }

    sink.emit("Press enter to exit the program...");
    wait_for_exit().await;

    if let Err(e) = session.stop().await {
        warn!("Failed to stop scan cleanly: {}", e);
    }
    drop(session);

    let wait = STOP_CONFIRM_TIMEOUT + settings.discovery.shutdown_grace();
    match tokio::time::timeout(wait, worker).await {
        Ok(Ok(summary)) => info!(
            "Discovery finished: {} device(s) seen, {} enumeration(s) abandoned",
            summary.devices_seen, summary.abandoned
        ),
        Ok(Err(e)) => error!("Discovery task failed: {}", e),
        Err(_) => warn!(
            "Scan did not confirm stop within {}ms, exiting anyway",
            wait.as_millis()
        ),
    }

    radio.shutdown().await;
    Ok(())
}

#[cfg(windows)]
fn native_radio() -> anyhow::Result<Arc<dyn RadioStack>> {
    use ble_discovery::infrastructure::bluetooth::winrt::WinRtRadio;
    Ok(Arc::new(WinRtRadio::new()))
}

#[cfg(not(windows))]
fn native_radio() -> anyhow::Result<Arc<dyn RadioStack>> {
    anyhow::bail!(
        "No native Bluetooth backend on this platform; run with --simulate <scenario.json>"
    )
}

/// Block until the user presses enter (or closes stdin) or sends Ctrl-C
async fn wait_for_exit() {
    let enter = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    });

    tokio::select! {
        _ = enter => info!("Exit requested"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Interrupted, exiting"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        },
    }
}
