//! `wlgrab-probe`: captures one output through wlr-export-dmabuf and reports
//! frame and texture statistics until interrupted.
//!
//! ```text
//! wlgrab-probe [CONFIG.json]
//! ```
//!
//! The config path may also come from `WLGRAB_CONFIG`. `WLGRAB_DISPLAY`,
//! `WLGRAB_OUTPUT` and `WLGRAB_SHOW_CURSOR` override the file. Send SIGHUP to
//! reload and reconnect, Ctrl-C to stop.

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG=wlgrab_capture=debug traces each metadata/plane/ready/cancel event
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_names(true)
        .init();

    info!(
        "wlgrab-probe {} (pid {}): SIGHUP reloads, Ctrl-C stops",
        env!("CARGO_PKG_VERSION"),
        std::process::id()
    );

    if let Err(e) = app::run().await {
        error!("Capture aborted: {:#}", e);
        return Err(e);
    }
    info!("All frames, textures and plane fds released.");
    Ok(())
}
