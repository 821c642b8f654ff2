//! `RenderPump`: per-draw-tick frame acquisition for the render thread.

use std::sync::Arc;

use tracing::{debug, error, info, warn};
use wlgrab_core::CaptureError;

use crate::buffer::CapturedFrame;
use crate::exchange::ExchangePhase;
use crate::gate::SettleGate;
use crate::outputs::{TargetId, TargetInfo};
use crate::session::ProtocolSession;

/// Couples the host's draw cadence to the compositor's delivery cadence: each
/// tick acquires at most one new frame, blocking in the session pump until the
/// exchange settles.
pub struct RenderPump<S: ProtocolSession> {
    session:     Option<S>,
    selector:    String,
    target:      Option<TargetId>,
    show_cursor: bool,
    gate:        Arc<SettleGate>,
}

impl<S: ProtocolSession> RenderPump<S> {
    /// `gate` must be the gate the attached sessions' exchanges were built with.
    pub fn new(gate: Arc<SettleGate>) -> Self {
        Self {
            session: None,
            selector: String::new(),
            target: None,
            show_cursor: true,
            gate,
        }
    }

    /// Take ownership of a connected session. Any previous session is torn
    /// down first. The selector is re-resolved against the new output list.
    pub fn attach(&mut self, session: S) {
        self.teardown();
        self.session = Some(session);
        self.resolve();
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_mut(&mut self) -> Option<&mut S> {
        self.session.as_mut()
    }

    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    /// Choose the output to capture by name. An empty selector captures
    /// nothing.
    pub fn select(&mut self, selector: &str, show_cursor: bool) {
        self.selector = selector.to_owned();
        self.show_cursor = show_cursor;
        self.resolve();
    }

    fn resolve(&mut self) {
        let previous = self.target;
        self.target = match &self.session {
            Some(session) if !self.selector.is_empty() => session.resolve(&self.selector),
            _ => None,
        };
        match (self.target, self.session.is_some()) {
            (Some(id), _) if previous != Some(id) => {
                info!("Capturing output '{}' ({})", self.selector, id);
            }
            (None, true) if !self.selector.is_empty() => {
                warn!("No output named '{}'", self.selector);
            }
            _ => {}
        }
    }

    /// Acquire the next frame and return the current one.
    ///
    /// Returns `None` immediately when nothing is selected or the session is
    /// gone. Otherwise issues a request if none is in flight and pumps the
    /// session until the busy flag clears or the target disappears.
    pub fn render_tick(&mut self) -> Option<&CapturedFrame<S::Frame>> {
        let target = self.target?;
        let session = self.session.as_mut()?;

        match acquire(session, target, self.show_cursor) {
            Ok(true) => {}
            Ok(false) => self.target = None,
            Err(e) => {
                error!("Capture session failed: {e}");
                self.teardown();
                return None;
            }
        }
        self.current()
    }

    /// One full render pass: tick, draw `current`, then wake configuration
    /// waiters. Returns `true` if something was drawn.
    pub fn render(&mut self) -> bool {
        let drawn = self.render_tick().is_some_and(|frame| frame.draw());
        self.gate.notify_settled();
        drawn
    }

    pub fn current(&self) -> Option<&CapturedFrame<S::Frame>> {
        self.session.as_ref()?.exchange().buffer().current()
    }

    /// Width of the current frame, 0 without one.
    pub fn width(&self) -> u32 {
        self.current().map_or(0, |f| f.resolution().width)
    }

    /// Height of the current frame, 0 without one.
    pub fn height(&self) -> u32 {
        self.current().map_or(0, |f| f.resolution().height)
    }

    /// `(completed, cancelled)` exchanges on the attached session.
    pub fn counts(&self) -> (u64, u64) {
        self.session.as_ref().map_or((0, 0), |s| s.exchange().counts())
    }

    pub fn targets(&self) -> Vec<TargetInfo> {
        self.session.as_ref().map(|s| s.targets()).unwrap_or_default()
    }

    /// Drop the session and everything it owns. Must not race a blocked
    /// `render_tick`; callers wait on the settle gate first. Idempotent.
    pub fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!("Tearing down capture session");
            session.teardown();
        }
        self.target = None;
    }
}

/// Run one exchange for `target` to completion. `Ok(false)` means the target
/// vanished and the in-flight request was abandoned.
fn acquire<S: ProtocolSession>(
    session: &mut S,
    target: TargetId,
    show_cursor: bool,
) -> Result<bool, CaptureError> {
    if !session.has_target(target) {
        info!("Output {} is gone, dropping selection", target);
        session.exchange_mut().abort();
        return Ok(false);
    }

    if !session.exchange().is_busy() {
        if let Err(e) = session.request_frame(target, show_cursor) {
            warn!("Frame request for {} failed: {e}", target);
            return Ok(true);
        }
    }

    session.pump_while(|s| s.exchange().is_busy() && s.has_target(target))?;

    if !session.has_target(target) {
        info!("Output {} disappeared mid-frame", target);
        session.exchange_mut().abort();
        return Ok(false);
    }

    match session.exchange_mut().take_outcome() {
        ExchangePhase::Cancelled => debug!("Tick ended without a new frame"),
        ExchangePhase::Completed => {}
        other => debug!("Tick ended in {:?}", other),
    }
    Ok(true)
}

impl<S: ProtocolSession> Drop for RenderPump<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}
