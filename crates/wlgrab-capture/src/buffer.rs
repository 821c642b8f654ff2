//! Double buffer: the frame being drawn and the frame being built.

use std::sync::Arc;

use tracing::{debug, warn};
use wlgrab_core::{BufferDescriptor, CaptureError, DescriptorShell, Resolution};
use wlgrab_renderer::ImportedTexture;

use crate::gate::SettleGate;
use crate::lease::{FrameLease, FrameObject};

// ── CapturedFrame ─────────────────────────────────────────────────────────────

/// A completed frame.
///
/// Fields drop in declaration order: the texture is destroyed before the plane
/// fds close, and both go before the protocol object is released.
#[derive(Debug)]
pub struct CapturedFrame<F: FrameObject> {
    texture:    Option<ImportedTexture>,
    descriptor: BufferDescriptor,
    lease:      FrameLease<F>,
}

impl<F: FrameObject> CapturedFrame<F> {
    pub fn new(
        texture: Option<ImportedTexture>,
        descriptor: BufferDescriptor,
        lease: FrameLease<F>,
    ) -> Self {
        Self { texture, descriptor, lease }
    }

    /// `None` when the import failed; such a frame is skipped at draw time.
    pub fn texture(&self) -> Option<&ImportedTexture> {
        self.texture.as_ref()
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    pub fn resolution(&self) -> Resolution {
        self.descriptor.resolution()
    }

    pub fn object(&self) -> Option<&F> {
        self.lease.object()
    }

    /// Draw through the importer. Returns `false` for a textureless frame.
    pub fn draw(&self) -> bool {
        match &self.texture {
            Some(texture) => {
                texture.draw();
                true
            }
            None => false,
        }
    }
}

// ── PendingFrame ──────────────────────────────────────────────────────────────

/// The in-flight request: its protocol object and, once metadata arrived, the
/// descriptor being filled.
#[derive(Debug)]
pub struct PendingFrame<F: FrameObject> {
    pub(crate) shell: Option<DescriptorShell>,
    pub(crate) lease: FrameLease<F>,
}

impl<F: FrameObject> PendingFrame<F> {
    pub fn shell(&self) -> Option<&DescriptorShell> {
        self.shell.as_ref()
    }

    pub fn object(&self) -> Option<&F> {
        self.lease.object()
    }
}

// ── DoubleBuffer ──────────────────────────────────────────────────────────────

/// Holds at most one drawable frame and one in-flight frame.
///
/// `pending` is set only between [`begin_pending`](Self::begin_pending) and
/// [`promote`](Self::promote) / [`abort_pending`](Self::abort_pending), which
/// bracket the busy flag on the shared [`SettleGate`].
#[derive(Debug)]
pub struct DoubleBuffer<F: FrameObject> {
    current: Option<CapturedFrame<F>>,
    pending: Option<PendingFrame<F>>,
    gate:    Arc<SettleGate>,
}

impl<F: FrameObject> DoubleBuffer<F> {
    pub fn new(gate: Arc<SettleGate>) -> Self {
        Self { current: None, pending: None, gate }
    }

    pub fn current(&self) -> Option<&CapturedFrame<F>> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingFrame<F>> {
        self.pending.as_ref()
    }

    pub(crate) fn pending_mut(&mut self) -> Option<&mut PendingFrame<F>> {
        self.pending.as_mut()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }

    pub fn gate(&self) -> &Arc<SettleGate> {
        &self.gate
    }

    /// Mark a request in flight. A pending frame left behind by an earlier
    /// exchange that is no longer waited on is discarded first.
    pub fn begin_pending(&mut self) -> Result<(), CaptureError> {
        self.gate.try_begin()?;
        if let Some(stale) = self.pending.take() {
            warn!("Discarding abandoned pending frame {:?}", stale.object());
        }
        Ok(())
    }

    /// Attach the protocol object of the request issued after `begin_pending`.
    pub fn attach_pending(&mut self, object: F) {
        debug_assert!(self.gate.is_busy(), "attach_pending without begin_pending");
        self.pending = Some(PendingFrame { shell: None, lease: FrameLease::new(object) });
    }

    /// Detach the pending frame for completion. The busy flag stays set until
    /// `promote` or `abort_pending`.
    pub(crate) fn take_pending(&mut self) -> Option<PendingFrame<F>> {
        self.pending.take()
    }

    /// Make `frame` current. The previous current frame is torn down first:
    /// texture, then plane fds, then protocol object.
    pub fn promote(&mut self, frame: CapturedFrame<F>) {
        self.pending = None;
        if let Some(previous) = self.current.take() {
            drop(previous);
        }
        self.current = Some(frame);
        self.gate.clear();
    }

    /// Discard the pending frame, closing any planes received so far and
    /// releasing its protocol object. `current` is untouched.
    pub fn abort_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!("Aborting pending frame {:?}", pending.object());
        }
        self.gate.clear();
    }

    /// Release the protocol object behind `current` while keeping its texture
    /// and planes for drawing.
    pub fn release_current_object(&mut self) {
        if let Some(current) = self.current.as_mut() {
            current.lease.release();
        }
    }

    /// Clear the busy flag without touching either frame.
    pub fn clear_busy(&mut self) {
        self.gate.clear();
    }

    /// Drop both frames. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.current = None;
        self.pending = None;
        self.gate.clear();
    }
}

impl<F: FrameObject> Drop for DoubleBuffer<F> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor_with_peers, peer_closed, Ledger, MockFrame, MockImporter};
    use wlgrab_renderer::GraphicsImporter;

    fn frame(
        id: u32,
        ledger: &Arc<Ledger>,
        importer: &Arc<dyn GraphicsImporter>,
    ) -> (CapturedFrame<MockFrame>, Vec<std::os::unix::net::UnixStream>) {
        let (descriptor, peers) = descriptor_with_peers(2);
        let texture = ImportedTexture::import(importer, &descriptor).ok();
        let lease = FrameLease::new(MockFrame::new(id, ledger));
        (CapturedFrame::new(texture, descriptor, lease), peers)
    }

    #[test]
    fn begin_twice_is_already_busy() {
        let mut buffer = DoubleBuffer::<MockFrame>::new(Arc::new(SettleGate::new()));
        buffer.begin_pending().unwrap();
        assert!(matches!(buffer.begin_pending(), Err(CaptureError::AlreadyBusy)));
    }

    #[test]
    fn promote_tears_down_previous_in_order() {
        let ledger = Ledger::new();
        let importer: Arc<dyn GraphicsImporter> = MockImporter::new(&ledger);
        let mut buffer = DoubleBuffer::new(Arc::new(SettleGate::new()));

        buffer.begin_pending().unwrap();
        let (first, first_peers) = frame(1, &ledger, &importer);
        let first_tex = first.texture().unwrap().id();
        buffer.promote(first);
        assert!(!buffer.is_busy());
        assert_eq!(ledger.destroys(), 0);

        buffer.begin_pending().unwrap();
        let (second, second_peers) = frame(2, &ledger, &importer);
        buffer.promote(second);

        assert_eq!(ledger.destroys_of(first_tex), 1);
        assert_eq!(ledger.releases_of(1), 1);
        assert!(first_peers.iter().all(peer_closed));
        assert!(!second_peers.iter().any(peer_closed));
        assert_eq!(
            ledger.order_for(1, first_tex),
            vec!["destroy", "release"],
            "texture must go before the protocol object"
        );

        buffer.teardown();
        buffer.teardown();
        assert!(second_peers.iter().all(peer_closed));
        assert_eq!(ledger.releases_of(2), 1);
        assert_eq!(ledger.destroys(), 2);
    }

    #[test]
    fn abort_leaves_current_alone() {
        let ledger = Ledger::new();
        let importer: Arc<dyn GraphicsImporter> = MockImporter::new(&ledger);
        let mut buffer = DoubleBuffer::new(Arc::new(SettleGate::new()));

        buffer.begin_pending().unwrap();
        let (first, peers) = frame(1, &ledger, &importer);
        buffer.promote(first);

        buffer.begin_pending().unwrap();
        buffer.attach_pending(MockFrame::new(2, &ledger));
        buffer.abort_pending();

        assert!(!buffer.is_busy());
        assert!(buffer.pending().is_none());
        assert_eq!(ledger.releases_of(2), 1);
        assert_eq!(ledger.releases_of(1), 0);
        assert!(!peers.iter().any(peer_closed));
        assert!(buffer.current().is_some());
    }

    #[test]
    fn textureless_frame_still_closes_planes() {
        let ledger = Ledger::new();
        let importer: Arc<dyn GraphicsImporter> = MockImporter::failing(&ledger);
        let mut buffer = DoubleBuffer::new(Arc::new(SettleGate::new()));

        buffer.begin_pending().unwrap();
        let (first, peers) = frame(1, &ledger, &importer);
        assert!(first.texture().is_none());
        assert!(!first.draw());
        buffer.promote(first);
        buffer.teardown();

        assert!(peers.iter().all(peer_closed));
        assert_eq!(ledger.destroys(), 0);
        assert_eq!(ledger.releases_of(1), 1);
    }
}
