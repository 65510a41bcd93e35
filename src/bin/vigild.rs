//! vigild - camera monitoring daemon
//!
//! This daemon:
//! 1. Loads configuration (JSON file plus VIGIL_* environment overrides)
//! 2. Starts one capture pipeline per registered camera
//! 3. Buffers frames per camera in bounded ring buffers
//! 4. Runs motion and face detection with per-camera cooldowns
//! 5. Dispatches photo and clip alerts from a single dispatch thread
//! 6. Shuts every pipeline down cleanly on SIGINT/SIGTERM

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use vigil_core::notify::{LogNotifier, Notifier};
use vigil_core::{AlertDestination, AlertDispatcher, AuthorizeOutcome, PipelineSupervisor, VigilConfig};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);
const MAIN_LOOP_TICK: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(author, version, about = "Camera monitoring daemon")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    /// Authorize this alert destination at startup. Without it, the first
    /// runtime authorization wins and alerts are dropped until then.
    #[arg(long, env = "VIGIL_ALERT_DESTINATION")]
    alert_destination: Option<String>,

    /// Start with detection disabled; frames still buffer for snapshots
    /// and clips.
    #[arg(long, env = "VIGIL_MONITORING_DISABLED")]
    monitoring_disabled: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = VigilConfig::load_from(args.config.as_deref()).context("load configuration")?;
    log::info!(
        "vigild {} starting (registry {}, backend {}, {} fps)",
        env!("CARGO_PKG_VERSION"),
        config.registry_path.display(),
        config.detection.face_backend,
        config.capture.target_fps
    );

    let destination = Arc::new(AlertDestination::new());
    if let Some(id) = &args.alert_destination {
        match destination.authorize(id) {
            AuthorizeOutcome::Granted => log::info!("alert destination authorized at startup"),
            AuthorizeOutcome::AlreadyAuthorized | AuthorizeOutcome::Denied => {}
        }
    }

    let notifier = build_notifier(&config)?;
    let dispatcher = AlertDispatcher::new(destination, notifier, &config.notify.artifact_dir);
    let (alert_tx, alert_rx) = mpsc::channel();
    let dispatch_handle = dispatcher.spawn(alert_rx)?;

    let mut supervisor = PipelineSupervisor::new(config, alert_tx);
    if args.monitoring_disabled {
        supervisor.set_all_monitoring(false);
    }
    let started = supervisor.boot();
    log::info!("{} camera pipeline(s) started", started);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("install signal handler")?;
    }

    let mut last_health_log = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
            let tuning = supervisor.tuning();
            log::info!(
                "health: {} pipeline(s) running, motion {} (threshold {})",
                supervisor.running_count(),
                if tuning.motion_enabled { "on" } else { "off" },
                tuning.motion_threshold
            );
            last_health_log = Instant::now();
        }
        std::thread::sleep(MAIN_LOOP_TICK);
    }

    log::info!("shutdown requested, stopping pipelines");
    supervisor.stop_all();
    // Dropping the supervisor drops the last alert sender; the dispatch
    // thread drains and exits.
    drop(supervisor);
    dispatch_handle.join()?;
    log::info!("vigild stopped");
    Ok(())
}

#[cfg(feature = "notify-http")]
fn build_notifier(config: &VigilConfig) -> Result<Arc<dyn Notifier>> {
    use vigil_core::notify::HttpNotifier;
    match &config.notify.webhook_url {
        Some(url) => {
            log::info!("alerts will be delivered via webhook");
            Ok(Arc::new(HttpNotifier::new(url)?))
        }
        None => Ok(Arc::new(LogNotifier::new())),
    }
}

#[cfg(not(feature = "notify-http"))]
fn build_notifier(config: &VigilConfig) -> Result<Arc<dyn Notifier>> {
    if config.notify.webhook_url.is_some() {
        log::warn!("webhook_url is set but the notify-http feature is disabled; logging alerts");
    }
    Ok(Arc::new(LogNotifier::new()))
}
