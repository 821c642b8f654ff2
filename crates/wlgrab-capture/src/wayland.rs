//! `WaylandSession`: wlr-export-dmabuf over a wayland-client connection.
//!
//! ```text
//! wl_registry ──► wl_output (≤4) ──► zxdg_output_v1 (name, description)
//!             ──► zxdg_output_manager_v1 (≤3)
//!             ──► zwlr_export_dmabuf_manager_v1 (≤1)
//!                       │ capture_output(cursor, wl_output)
//!                       ▼
//!             zwlr_export_dmabuf_frame_v1 ── frame / object / ready / cancel ──► FrameExchange
//! ```

use std::ffi::OsString;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};
use wayland_client::protocol::{wl_output, wl_registry};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum};
use wayland_protocols::xdg::xdg_output::zv1::client::{zxdg_output_manager_v1, zxdg_output_v1};
use wayland_protocols_wlr::export_dmabuf::v1::client::{
    zwlr_export_dmabuf_frame_v1, zwlr_export_dmabuf_manager_v1,
};
use wlgrab_core::{CaptureError, Fourcc, FrameMetadata, Modifier, PlaneInfo};
use wlgrab_renderer::GraphicsImporter;

use crate::exchange::{CancelReason, EventOutcome, FrameEvent, FrameExchange};
use crate::gate::SettleGate;
use crate::lease::FrameObject;
use crate::outputs::{OutputRegistry, TargetId, TargetInfo};
use crate::session::ProtocolSession;

use zwlr_export_dmabuf_frame_v1::ZwlrExportDmabufFrameV1 as DmabufFrame;
use zwlr_export_dmabuf_manager_v1::ZwlrExportDmabufManagerV1 as DmabufManager;
use zxdg_output_manager_v1::ZxdgOutputManagerV1 as XdgOutputManager;

const WL_OUTPUT_VERSION: u32 = 4;
const XDG_OUTPUT_MANAGER_VERSION: u32 = 3;
const DMABUF_MANAGER_VERSION: u32 = 1;

impl FrameObject for DmabufFrame {
    fn release(&self) {
        self.destroy();
    }
}

// ── Output handle ─────────────────────────────────────────────────────────────

/// Protocol objects bound for one output. Released on drop.
pub struct WaylandOutput {
    wl_output: wl_output::WlOutput,
    xdg_output: Option<zxdg_output_v1::ZxdgOutputV1>,
}

impl Drop for WaylandOutput {
    fn drop(&mut self) {
        if let Some(xdg) = self.xdg_output.take() {
            xdg.destroy();
        }
        if self.wl_output.version() >= 3 {
            self.wl_output.release();
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

struct SessionState {
    outputs:        OutputRegistry<WaylandOutput>,
    xdg_manager:    Option<XdgOutputManager>,
    dmabuf_manager: Option<DmabufManager>,
    exchange:       FrameExchange<DmabufFrame>,
    _registry:      wl_registry::WlRegistry,
}

/// One connection to a Wayland display with the export-dmabuf manager bound.
pub struct WaylandSession {
    conn:   Connection,
    queue:  EventQueue<SessionState>,
    state:  SessionState,
    closed: bool,
}

impl WaylandSession {
    /// Connect to `display` (empty selects `$WAYLAND_DISPLAY`) and discover
    /// outputs. Fails if the compositor lacks wlr-export-dmabuf.
    pub fn connect(
        display: &str,
        importer: Arc<dyn GraphicsImporter>,
        gate: Arc<SettleGate>,
    ) -> Result<Self, CaptureError> {
        let conn = open_connection(display)?;
        let mut queue = conn.new_event_queue();
        let qh = queue.handle();
        let registry = conn.display().get_registry(&qh, ());

        let mut state = SessionState {
            outputs: OutputRegistry::new(),
            xdg_manager: None,
            dmabuf_manager: None,
            exchange: FrameExchange::new(importer, gate),
            _registry: registry,
        };

        // First roundtrip binds globals, the second collects output names.
        queue.roundtrip(&mut state).map_err(dispatch_error)?;
        queue.roundtrip(&mut state).map_err(dispatch_error)?;

        if state.dmabuf_manager.is_none() {
            return Err(CaptureError::ProtocolUnavailable {
                interface: "zwlr_export_dmabuf_manager_v1",
            });
        }
        if state.xdg_manager.is_none() {
            warn!("Compositor lacks zxdg_output_manager_v1, using wl_output names");
        }

        let label = display_label(display);
        info!("Wayland display '{}' connected, {} output(s)", label, state.outputs.len());
        Ok(Self { conn, queue, state, closed: false })
    }
}

impl ProtocolSession for WaylandSession {
    type Frame = DmabufFrame;

    fn exchange(&self) -> &FrameExchange<DmabufFrame> {
        &self.state.exchange
    }

    fn exchange_mut(&mut self) -> &mut FrameExchange<DmabufFrame> {
        &mut self.state.exchange
    }

    fn targets(&self) -> Vec<TargetInfo> {
        self.state.outputs.list()
    }

    fn has_target(&self, target: TargetId) -> bool {
        self.state.outputs.contains(target)
    }

    fn resolve(&self, name: &str) -> Option<TargetId> {
        self.state.outputs.resolve(name)
    }

    fn request_frame(&mut self, target: TargetId, overlay_cursor: bool) -> Result<(), CaptureError> {
        let qh = self.queue.handle();
        let state = &mut self.state;
        let output = state
            .outputs
            .get(target)
            .map(|e| e.handle.wl_output.clone())
            .ok_or(CaptureError::TargetGone)?;
        let manager = state.dmabuf_manager.clone().ok_or(CaptureError::ProtocolUnavailable {
            interface: "zwlr_export_dmabuf_manager_v1",
        })?;

        state
            .exchange
            .request_frame(|| Ok(manager.capture_output(i32::from(overlay_cursor), &output, &qh, ())))
    }

    fn dispatch_once(&mut self) -> Result<(), CaptureError> {
        if self.closed {
            return Err(CaptureError::ConnectionFailed { reason: "session closed".into() });
        }
        self.queue
            .blocking_dispatch(&mut self.state)
            .map(|_| ())
            .map_err(dispatch_error)
    }

    fn teardown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.state.exchange.teardown();
        self.state.outputs.clear();
        if let Some(manager) = self.state.xdg_manager.take() {
            manager.destroy();
        }
        if let Some(manager) = self.state.dmabuf_manager.take() {
            manager.destroy();
        }
        if let Err(e) = self.conn.flush() {
            debug!("Flush on teardown failed: {e}");
        }
        info!("Wayland session closed");
    }
}

impl Drop for WaylandSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

impl Dispatch<wl_registry::WlRegistry, ()> for SessionState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global { name, interface, version } => {
                state.on_global(registry, name, &interface, version, qh);
            }
            wl_registry::Event::GlobalRemove { name } => {
                state.outputs.remove(TargetId(name));
            }
            _ => {}
        }
    }
}

impl SessionState {
    fn on_global(
        &mut self,
        registry: &wl_registry::WlRegistry,
        name: u32,
        interface: &str,
        version: u32,
        qh: &QueueHandle<Self>,
    ) {
        if interface == wl_output::WlOutput::interface().name {
            let id = TargetId(name);
            let wl_output: wl_output::WlOutput =
                registry.bind(name, version.min(WL_OUTPUT_VERSION), qh, id);
            let xdg_output = self
                .xdg_manager
                .as_ref()
                .map(|m| m.get_xdg_output(&wl_output, qh, id));
            self.outputs.insert(id, WaylandOutput { wl_output, xdg_output });
        } else if interface == XdgOutputManager::interface().name {
            let manager: XdgOutputManager =
                registry.bind(name, version.min(XDG_OUTPUT_MANAGER_VERSION), qh, ());
            // Outputs announced before the manager still need their xdg half.
            for (id, entry) in self.outputs.iter_mut() {
                if entry.handle.xdg_output.is_none() {
                    entry.handle.xdg_output =
                        Some(manager.get_xdg_output(&entry.handle.wl_output, qh, id));
                }
            }
            self.xdg_manager = Some(manager);
        } else if interface == DmabufManager::interface().name {
            debug!("Binding {} v{}", interface, version.min(DMABUF_MANAGER_VERSION));
            self.dmabuf_manager =
                Some(registry.bind(name, version.min(DMABUF_MANAGER_VERSION), qh, ()));
        }
    }
}

impl Dispatch<wl_output::WlOutput, TargetId> for SessionState {
    fn event(
        state: &mut Self,
        _: &wl_output::WlOutput,
        event: wl_output::Event,
        id: &TargetId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_output::Event::Name { name } = event {
            state.outputs.set_fallback_name(*id, name);
        }
    }
}

impl Dispatch<zxdg_output_v1::ZxdgOutputV1, TargetId> for SessionState {
    fn event(
        state: &mut Self,
        _: &zxdg_output_v1::ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        id: &TargetId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            zxdg_output_v1::Event::Name { name } => state.outputs.set_name(*id, name),
            zxdg_output_v1::Event::Description { description } => {
                state.outputs.set_description(*id, description)
            }
            _ => {}
        }
    }
}

impl Dispatch<DmabufFrame, ()> for SessionState {
    fn event(
        state: &mut Self,
        frame: &DmabufFrame,
        event: zwlr_export_dmabuf_frame_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(event) = translate(event) else { return };
        let is_cancel = matches!(event, FrameEvent::Cancel { .. });
        let outcome = state.exchange.handle(frame, event);
        if is_cancel && outcome == EventOutcome::Stray {
            // Nobody holds this object; cancel is its final event.
            frame.destroy();
        }
    }
}

delegate_noop!(SessionState: XdgOutputManager);
delegate_noop!(SessionState: DmabufManager);

fn translate(event: zwlr_export_dmabuf_frame_v1::Event) -> Option<FrameEvent> {
    use zwlr_export_dmabuf_frame_v1::Event;

    Some(match event {
        Event::Frame { width, height, format, mod_high, mod_low, num_objects, .. } => {
            FrameEvent::Metadata(FrameMetadata {
                format: Fourcc(format),
                width,
                height,
                plane_count: num_objects,
                modifier: Modifier::from_hi_lo(mod_high, mod_low),
            })
        }
        Event::Object { index, fd, size, offset, stride, plane_index } => {
            FrameEvent::Plane(PlaneInfo { index, fd, size, offset, stride, plane_index })
        }
        Event::Ready { tv_sec_hi, tv_sec_lo, tv_nsec } => FrameEvent::Ready {
            tv_sec: ((tv_sec_hi as u64) << 32) | tv_sec_lo as u64,
            tv_nsec,
        },
        Event::Cancel { reason } => FrameEvent::Cancel { reason: cancel_reason(reason) },
        _ => return None,
    })
}

fn cancel_reason(reason: WEnum<zwlr_export_dmabuf_frame_v1::CancelReason>) -> CancelReason {
    use zwlr_export_dmabuf_frame_v1::CancelReason as Wire;

    match reason {
        WEnum::Value(Wire::Temporary) => CancelReason::Temporary,
        WEnum::Value(Wire::Permanent) => CancelReason::Permanent,
        WEnum::Value(Wire::Resizing) => CancelReason::Resizing,
        #[allow(unreachable_patterns)]
        WEnum::Value(other) => CancelReason::Unknown(other.into()),
        WEnum::Unknown(raw) => CancelReason::Unknown(raw),
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

fn open_connection(display: &str) -> Result<Connection, CaptureError> {
    let conn = if display.is_empty() {
        Connection::connect_to_env()
    } else {
        let path = socket_path(display, std::env::var_os("XDG_RUNTIME_DIR"))?;
        let stream = UnixStream::connect(&path).map_err(|e| CaptureError::ConnectionFailed {
            reason: format!("{}: {e}", path.display()),
        })?;
        Connection::from_socket(stream)
    };
    conn.map_err(|e| CaptureError::ConnectionFailed { reason: e.to_string() })
}

/// Resolve a display name the way libwayland does: absolute paths are used as
/// is, anything else is relative to `$XDG_RUNTIME_DIR`.
fn socket_path(display: &str, runtime_dir: Option<OsString>) -> Result<PathBuf, CaptureError> {
    let path = PathBuf::from(display);
    if path.is_absolute() {
        return Ok(path);
    }
    let runtime_dir = runtime_dir.ok_or_else(|| CaptureError::ConnectionFailed {
        reason: "XDG_RUNTIME_DIR is not set".into(),
    })?;
    Ok(PathBuf::from(runtime_dir).join(path))
}

/// Name to log for a display setting; empty means the environment decides.
fn display_label(display: &str) -> &str {
    if display.is_empty() {
        "$WAYLAND_DISPLAY"
    } else {
        display
    }
}

fn dispatch_error(e: impl std::fmt::Display) -> CaptureError {
    CaptureError::Dispatch { reason: e.to_string() }
}
