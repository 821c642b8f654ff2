//! `CaptureSource`: thread-safe handle tying a capture session to a render
//! thread and a configuration thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info};
use wlgrab_core::{CaptureError, SourceConfig};
use wlgrab_renderer::GraphicsImporter;

use crate::gate::SettleGate;
use crate::outputs::TargetInfo;
use crate::pump::RenderPump;
use crate::session::ProtocolSession;

/// Opens a session for a configuration. Every session must build its exchange
/// on the gate it is handed.
pub type Connector<S> = Box<
    dyn Fn(&SourceConfig, Arc<dyn GraphicsImporter>, Arc<SettleGate>) -> Result<S, CaptureError>
        + Send
        + Sync,
>;

struct SourceState<S: ProtocolSession> {
    pump:   RenderPump<S>,
    config: SourceConfig,
}

/// Captures one output of one display.
///
/// [`render`](Self::render) belongs to the render thread and blocks at
/// compositor pace. [`update`](Self::update) and [`shutdown`](Self::shutdown)
/// belong to the configuration side: they wait for the in-flight frame to
/// settle before touching the session.
pub struct CaptureSource<S: ProtocolSession> {
    importer:  Arc<dyn GraphicsImporter>,
    gate:      Arc<SettleGate>,
    connect:   Connector<S>,
    paused:    AtomicBool,
    /// Exchange counters as of the last pass, readable without the state lock.
    completed: AtomicU64,
    cancelled: AtomicU64,
    state:     Mutex<SourceState<S>>,
}

#[cfg(all(target_os = "linux", feature = "wayland"))]
impl CaptureSource<crate::wayland::WaylandSession> {
    /// A source on a Wayland display. A failed connection is logged and leaves
    /// the source rendering nothing until the next `update`.
    pub fn new(config: SourceConfig, importer: Arc<dyn GraphicsImporter>) -> Self {
        Self::with_connector(
            config,
            importer,
            Box::new(|config, importer, gate| {
                crate::wayland::WaylandSession::connect(&config.display, importer, gate)
            }),
        )
    }
}

impl<S: ProtocolSession> CaptureSource<S> {
    pub fn with_connector(
        config: SourceConfig,
        importer: Arc<dyn GraphicsImporter>,
        connect: Connector<S>,
    ) -> Self {
        let gate = Arc::new(SettleGate::new());
        let mut pump = RenderPump::new(Arc::clone(&gate));
        match connect(&config, Arc::clone(&importer), Arc::clone(&gate)) {
            Ok(session) => {
                pump.attach(session);
                pump.select(&config.output, config.show_cursor);
            }
            Err(e) => error!("Capture source unavailable: {e}"),
        }
        Self {
            importer,
            gate,
            connect,
            paused: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            state: Mutex::new(SourceState { pump, config }),
        }
    }

    /// Apply a new configuration: wait for the current frame to settle, tear
    /// the session down, reconnect and re-resolve the output.
    pub fn update(&self, config: SourceConfig) -> Result<(), CaptureError> {
        let mut state = self.quiesce();
        state.pump.teardown();
        info!(
            "Reconnecting capture source (display='{}', output='{}')",
            config.display, config.output
        );

        let result = (self.connect)(&config, Arc::clone(&self.importer), Arc::clone(&self.gate))
            .map(|session| {
                state.pump.attach(session);
                state.pump.select(&config.output, config.show_cursor);
            });
        state.config = config;
        self.publish(&state.pump);
        drop(state);
        self.paused.store(false, Ordering::Release);
        result
    }

    /// One render pass. Returns `true` if a frame was drawn.
    pub fn render(&self) -> bool {
        if self.paused.load(Ordering::Acquire) {
            return false;
        }
        let mut state = self.lock();
        let drawn = state.pump.render();
        self.publish(&state.pump);
        drawn
    }

    /// `true` while a frame request is in flight.
    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn width(&self) -> u32 {
        self.lock().pump.width()
    }

    pub fn height(&self) -> u32 {
        self.lock().pump.height()
    }

    /// `(completed, cancelled)` exchanges since the last connect. Never waits
    /// on a render pass.
    pub fn counts(&self) -> (u64, u64) {
        (self.completed.load(Ordering::Relaxed), self.cancelled.load(Ordering::Relaxed))
    }

    pub fn targets(&self) -> Vec<TargetInfo> {
        self.lock().pump.targets()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().pump.is_connected()
    }

    pub fn config(&self) -> SourceConfig {
        self.lock().config.clone()
    }

    /// Release everything. Later renders draw nothing. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.quiesce();
        state.pump.teardown();
        self.publish(&state.pump);
        drop(state);
        self.paused.store(false, Ordering::Release);
    }

    fn publish(&self, pump: &RenderPump<S>) {
        let (completed, cancelled) = pump.counts();
        self.completed.store(completed, Ordering::Relaxed);
        self.cancelled.store(cancelled, Ordering::Relaxed);
    }

    /// Keep the render thread out, wait for the in-flight frame, then take
    /// the state lock.
    fn quiesce(&self) -> MutexGuard<'_, SourceState<S>> {
        self.paused.store(true, Ordering::Release);
        self.gate.wait_settled();
        self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, SourceState<S>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
