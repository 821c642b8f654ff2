//! `FrameExchange`: the export-dmabuf request/response state machine.
//!
//! # States
//!
//! ```text
//!            request_frame            metadata            ready
//!   Idle ───────────────► Requested ──────────► Accumulating ─────► Completed
//!    ▲                        │                   │    ▲  plane        │
//!    │                        │ cancel            │    └──────┘        │
//!    │                        ▼                   ▼ cancel             │
//!    └──────────────────── Cancelled ◄────────────┘                    │
//!    └────────────────────────── take_outcome ◄────────────────────────┘
//! ```
//!
//! Events are matched against the protocol object of the pending request and
//! of the current frame. Anything else is a stray and leaves both frames alone.

use std::sync::Arc;

use tracing::{debug, info, warn};
use wlgrab_core::{CaptureError, DescriptorShell, FrameMetadata, PlaneInfo};
use wlgrab_renderer::{GraphicsImporter, ImportedTexture};

use crate::buffer::{CapturedFrame, DoubleBuffer};
use crate::gate::SettleGate;
use crate::lease::FrameObject;

// ── Events ────────────────────────────────────────────────────────────────────

/// Why the compositor gave up on a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Transient failure, the next request may succeed.
    Temporary,
    /// The output is gone or capture is no longer allowed.
    Permanent,
    /// The output is being resized.
    Resizing,
    Unknown(u32),
}

/// One protocol event addressed to a frame object.
#[derive(Debug)]
pub enum FrameEvent {
    Metadata(FrameMetadata),
    Plane(PlaneInfo),
    /// Presentation time, acknowledged but otherwise unused.
    Ready { tv_sec: u64, tv_nsec: u32 },
    Cancel { reason: CancelReason },
}

// ── Phase / outcome ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangePhase {
    #[default]
    Idle,
    Requested,
    Accumulating,
    Completed,
    Cancelled,
}

impl ExchangePhase {
    pub fn in_flight(&self) -> bool {
        matches!(self, Self::Requested | Self::Accumulating)
    }
}

/// What handling one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Metadata or plane stored on the pending frame.
    Progress,
    /// The pending frame became current.
    Completed { textured: bool },
    /// The pending frame was discarded.
    Cancelled,
    /// The compositor cancelled the object behind the current frame.
    ReleasedCurrent,
    /// The event matched neither frame. The caller owns the stray object.
    Stray,
}

// ── FrameExchange ─────────────────────────────────────────────────────────────

/// Drives one capture request at a time into a [`DoubleBuffer`].
pub struct FrameExchange<F: FrameObject> {
    phase:     ExchangePhase,
    importer:  Arc<dyn GraphicsImporter>,
    buffer:    DoubleBuffer<F>,
    completed: u64,
    cancelled: u64,
}

impl<F: FrameObject> FrameExchange<F> {
    pub fn new(importer: Arc<dyn GraphicsImporter>, gate: Arc<SettleGate>) -> Self {
        Self {
            phase: ExchangePhase::Idle,
            importer,
            buffer: DoubleBuffer::new(gate),
            completed: 0,
            cancelled: 0,
        }
    }

    pub fn phase(&self) -> ExchangePhase {
        self.phase
    }

    pub fn buffer(&self) -> &DoubleBuffer<F> {
        &self.buffer
    }

    pub fn is_busy(&self) -> bool {
        self.buffer.is_busy()
    }

    /// `(completed, cancelled)` exchanges since creation.
    pub fn counts(&self) -> (u64, u64) {
        (self.completed, self.cancelled)
    }

    /// Start a request. `issue` sends it and returns the new protocol object;
    /// it runs only after the busy flag was taken. A pending frame orphaned by
    /// a stray cancel is discarded first.
    pub fn request_frame(
        &mut self,
        issue: impl FnOnce() -> Result<F, CaptureError>,
    ) -> Result<(), CaptureError> {
        self.buffer.begin_pending()?;
        match issue() {
            Ok(object) => {
                debug!("Requested frame {:?}", object);
                self.buffer.attach_pending(object);
                self.phase = ExchangePhase::Requested;
                Ok(())
            }
            Err(e) => {
                self.buffer.abort_pending();
                self.phase = ExchangePhase::Idle;
                Err(e)
            }
        }
    }

    /// Feed one event for `object`.
    pub fn handle(&mut self, object: &F, event: FrameEvent) -> EventOutcome {
        // Once busy is cleared the pending frame is orphaned and no longer
        // drives the phase.
        let is_pending = self.buffer.is_busy()
            && self.buffer.pending().is_some_and(|p| p.lease.matches(object));
        if !is_pending {
            return self.handle_foreign(object, event);
        }

        match event {
            FrameEvent::Metadata(meta) => self.on_metadata(meta),
            FrameEvent::Plane(plane) => self.on_plane(plane),
            FrameEvent::Ready { .. } => self.on_ready(),
            FrameEvent::Cancel { reason } => {
                debug!("Frame {:?} cancelled ({:?})", object, reason);
                self.cancel_pending()
            }
        }
    }

    /// Report a finished exchange once and return to `Idle`. Other phases are
    /// returned unchanged.
    pub fn take_outcome(&mut self) -> ExchangePhase {
        match self.phase {
            ExchangePhase::Completed | ExchangePhase::Cancelled => {
                std::mem::take(&mut self.phase)
            }
            other => other,
        }
    }

    /// Give up on the in-flight request (target gone, transport error).
    pub fn abort(&mut self) {
        if self.buffer.pending().is_some() || self.phase.in_flight() {
            info!("Abandoning in-flight frame request");
        }
        self.buffer.abort_pending();
        self.phase = ExchangePhase::Idle;
    }

    /// Drop every frame and protocol object. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.buffer.teardown();
        self.phase = ExchangePhase::Idle;
    }

    fn on_metadata(&mut self, meta: FrameMetadata) -> EventOutcome {
        match DescriptorShell::new(meta) {
            Ok(shell) => {
                debug!(
                    "Frame metadata: {}×{} {} planes={} modifier={:#x}",
                    meta.width, meta.height, meta.format, meta.plane_count, meta.modifier.0
                );
                if let Some(pending) = self.buffer.pending_mut() {
                    if pending.shell.is_some() {
                        warn!("Metadata repeated for pending frame, restarting descriptor");
                    }
                    pending.shell = Some(shell);
                }
                self.phase = ExchangePhase::Accumulating;
                EventOutcome::Progress
            }
            Err(e) => {
                warn!("Unusable frame metadata: {e}");
                self.cancel_pending()
            }
        }
    }

    fn on_plane(&mut self, plane: PlaneInfo) -> EventOutcome {
        let Some(shell) = self.buffer.pending_mut().and_then(|p| p.shell.as_mut()) else {
            warn!("Plane {} arrived before frame metadata, dropping", plane.index);
            return EventOutcome::Progress;
        };
        if let Err(e) = shell.insert(plane) {
            warn!("Dropping plane: {e}");
        }
        EventOutcome::Progress
    }

    fn on_ready(&mut self) -> EventOutcome {
        let Some(pending) = self.buffer.take_pending() else {
            return self.cancel_pending();
        };
        let descriptor = match pending.shell {
            Some(shell) => shell.finish(),
            None => Err(wlgrab_core::DescriptorError::NoMetadata),
        };
        let descriptor = match descriptor {
            Ok(descriptor) => descriptor,
            Err(e) => {
                // `pending.lease` drops here and releases the object.
                warn!("Ready frame is incomplete: {e}");
                return self.cancel_pending();
            }
        };

        let texture = match ImportedTexture::import(&self.importer, &descriptor) {
            Ok(texture) => Some(texture),
            Err(e) => {
                warn!("Texture import failed, frame will not be drawn: {e}");
                None
            }
        };
        let textured = texture.is_some();
        self.buffer.promote(CapturedFrame::new(texture, descriptor, pending.lease));
        self.phase = ExchangePhase::Completed;
        self.completed += 1;
        EventOutcome::Completed { textured }
    }

    fn cancel_pending(&mut self) -> EventOutcome {
        self.buffer.abort_pending();
        self.phase = ExchangePhase::Cancelled;
        self.cancelled += 1;
        EventOutcome::Cancelled
    }

    fn handle_foreign(&mut self, object: &F, event: FrameEvent) -> EventOutcome {
        let is_current = self
            .buffer
            .current()
            .and_then(|c| c.object())
            .is_some_and(|o| o == object);

        let is_orphan = self.buffer.pending().is_some_and(|p| p.lease.matches(object));

        match event {
            FrameEvent::Cancel { reason } if is_orphan => {
                debug!("Orphaned pending frame {:?} cancelled ({:?})", object, reason);
                self.buffer.abort_pending();
                EventOutcome::Cancelled
            }
            FrameEvent::Cancel { reason } if is_current => {
                debug!("Compositor cancelled current frame {:?} ({:?})", object, reason);
                self.buffer.release_current_object();
                EventOutcome::ReleasedCurrent
            }
            FrameEvent::Cancel { reason } => {
                debug!("Cancel for unknown frame {:?} ({:?})", object, reason);
                self.buffer.clear_busy();
                if self.phase.in_flight() {
                    self.phase = ExchangePhase::Cancelled;
                }
                EventOutcome::Stray
            }
            other => {
                // Plane fds carried by `other` close on drop.
                debug!("Ignoring {:?} for non-pending frame {:?}", kind(&other), object);
                EventOutcome::Stray
            }
        }
    }
}

fn kind(event: &FrameEvent) -> &'static str {
    match event {
        FrameEvent::Metadata(_) => "metadata",
        FrameEvent::Plane(_) => "plane",
        FrameEvent::Ready { .. } => "ready",
        FrameEvent::Cancel { .. } => "cancel",
    }
}
