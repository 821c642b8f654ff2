use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use wlgrab_capture::CaptureSource;
use wlgrab_core::SourceConfig;
use wlgrab_renderer::StatsImporter;

/// Render loop back-off while there is nothing to capture.
const IDLE_BACKOFF: Duration = Duration::from_millis(16);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Capture loop of `wlgrab-probe`.
///
/// # Flow
/// 1. Load `SourceConfig` (argv[1] or `WLGRAB_CONFIG`, then `WLGRAB_*` overrides)
/// 2. Connect a `CaptureSource` backed by a `StatsImporter`
/// 3. Render thread: `render()` back to back, paced by the compositor
/// 4. This task: SIGHUP reloads the config and reconnects, Ctrl-C stops
pub async fn run() -> Result<()> {
    let config_path = config_path();
    let config = load_config(config_path.as_ref())?;
    info!(
        "Capturing output '{}' on display '{}' (cursor {})",
        config.output,
        if config.display.is_empty() { "$WAYLAND_DISPLAY" } else { config.display.as_str() },
        if config.show_cursor { "on" } else { "off" }
    );

    let importer = Arc::new(StatsImporter::new());
    let source = Arc::new(CaptureSource::new(config, importer.clone()));
    for target in source.targets() {
        info!(
            "  output {} {} {}",
            target.id,
            target.name.as_deref().unwrap_or("(unnamed)"),
            target.description.as_deref().unwrap_or("")
        );
    }

    // ── Render thread ─────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let render_thread = {
        let source = Arc::clone(&source);
        let running = Arc::clone(&running);
        thread::Builder::new()
            .name("wlgrab-render".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    if !source.render() {
                        thread::sleep(IDLE_BACKOFF);
                    }
                }
            })
            .context("spawning render thread")?
    };

    // ── Configuration side ────────────────────────────────────────────────
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let mut stats_tick = tokio::time::interval(STATS_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, stopping.");
                break;
            }
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading configuration.");
                let source = Arc::clone(&source);
                let path = config_path.clone();
                let reload = tokio::task::spawn_blocking(move || -> Result<()> {
                    let config = load_config(path.as_ref())?;
                    source.update(config).context("reconnecting capture source")?;
                    Ok(())
                });
                match reload.await {
                    Ok(Ok(())) => info!("Capture source reconfigured."),
                    Ok(Err(e)) => warn!("Reload failed: {:#}", e),
                    Err(e) => warn!("Reload task panicked: {e}"),
                }
            }
            _ = stats_tick.tick() => {
                let stats = importer.snapshot();
                let (completed, cancelled) = source.counts();
                info!(
                    "{} @ {:.0} fps | frames {} cancelled {} | imported {} drawn {} destroyed {} live {}",
                    stats.size, stats.fps, completed, cancelled,
                    stats.imported, stats.drawn, stats.destroyed, stats.live
                );
            }
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    running.store(false, Ordering::Release);
    let source_for_join = Arc::clone(&source);
    tokio::task::spawn_blocking(move || {
        if render_thread.join().is_err() {
            warn!("Render thread panicked");
        }
        source_for_join.shutdown();
    })
    .await
    .context("joining render thread")?;

    let stats = importer.snapshot();
    info!(
        "Final: imported {} destroyed {} drawn {}",
        stats.imported, stats.destroyed, stats.drawn
    );
    Ok(())
}

fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("WLGRAB_CONFIG"))
        .map(PathBuf::from)
}

fn load_config(path: Option<&PathBuf>) -> Result<SourceConfig> {
    let mut config = match path {
        Some(path) => SourceConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => SourceConfig::default(),
    };
    config.apply_env().context("applying WLGRAB_* overrides")?;
    Ok(config)
}
