//! Test doubles: a recording importer, fake protocol objects and a scripted
//! session.

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};

use wlgrab_core::{
    BufferDescriptor, CaptureError, Fourcc, FrameMetadata, Modifier, Plane, PlaneInfo,
};
use wlgrab_renderer::{GraphicsImporter, ImportError, TextureId};

use crate::exchange::{FrameEvent, FrameExchange};
use crate::gate::SettleGate;
use crate::lease::FrameObject;
use crate::outputs::{OutputRegistry, TargetId, TargetInfo};
use crate::session::ProtocolSession;

// ── Ledger ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Import(TextureId),
    Destroy(TextureId),
    Draw(TextureId),
    Release(u32),
}

/// Ordered record of every collaborator call.
#[derive(Debug, Default)]
pub struct Ledger {
    entries: Mutex<Vec<Entry>>,
    objects: Mutex<Vec<u32>>,
}

impl Ledger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, entry: Entry) {
        self.entries.lock().unwrap().push(entry);
    }

    fn count(&self, f: impl Fn(&Entry) -> bool) -> usize {
        self.entries.lock().unwrap().iter().filter(|e| f(e)).count()
    }

    pub fn releases_of(&self, id: u32) -> usize {
        self.count(|e| *e == Entry::Release(id))
    }

    pub fn destroys_of(&self, tex: TextureId) -> usize {
        self.count(|e| *e == Entry::Destroy(tex))
    }

    pub fn destroys(&self) -> usize {
        self.count(|e| matches!(e, Entry::Destroy(_)))
    }

    pub fn draws(&self) -> usize {
        self.count(|e| matches!(e, Entry::Draw(_)))
    }

    /// "destroy"/"release" entries touching texture `tex` or object `id`, in order.
    pub fn order_for(&self, id: u32, tex: TextureId) -> Vec<&'static str> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Entry::Destroy(t) if *t == tex => Some("destroy"),
                Entry::Release(o) if *o == id => Some("release"),
                _ => None,
            })
            .collect()
    }

    pub fn every_texture_destroyed_once(&self) -> bool {
        let entries = self.entries.lock().unwrap();
        let mut destroyed: HashMap<TextureId, usize> = HashMap::new();
        for e in entries.iter() {
            if let Entry::Destroy(t) = e {
                *destroyed.entry(*t).or_default() += 1;
            }
        }
        entries.iter().all(|e| match e {
            Entry::Import(t) => destroyed.get(t) == Some(&1),
            _ => true,
        }) && destroyed.values().all(|n| *n == 1)
    }

    pub fn every_object_released_once(&self) -> bool {
        let objects = self.objects.lock().unwrap().clone();
        objects.iter().all(|id| self.releases_of(*id) == 1)
    }
}

// ── MockFrame ─────────────────────────────────────────────────────────────────

/// Protocol object stand-in. Equality is by id.
#[derive(Clone)]
pub struct MockFrame {
    pub id: u32,
    ledger: Arc<Ledger>,
}

impl MockFrame {
    /// A newly created protocol object; expected to be released exactly once.
    pub fn new(id: u32, ledger: &Arc<Ledger>) -> Self {
        ledger.objects.lock().unwrap().push(id);
        Self::handle(id, ledger)
    }

    /// Another reference to an existing object (as delivered with an event).
    pub fn handle(id: u32, ledger: &Arc<Ledger>) -> Self {
        Self { id, ledger: Arc::clone(ledger) }
    }
}

impl std::fmt::Debug for MockFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockFrame({})", self.id)
    }
}

impl PartialEq for MockFrame {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl FrameObject for MockFrame {
    fn release(&self) {
        self.ledger.push(Entry::Release(self.id));
    }
}

// ── MockImporter ──────────────────────────────────────────────────────────────

pub struct MockImporter {
    ledger:  Arc<Ledger>,
    next:    AtomicU64,
    failing: AtomicBool,
}

impl MockImporter {
    pub fn new(ledger: &Arc<Ledger>) -> Arc<Self> {
        Arc::new(Self {
            ledger:  Arc::clone(ledger),
            next:    AtomicU64::new(100),
            failing: AtomicBool::new(false),
        })
    }

    pub fn failing(ledger: &Arc<Ledger>) -> Arc<Self> {
        let importer = Self::new(ledger);
        importer.set_failing(true);
        importer
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

impl GraphicsImporter for MockImporter {
    fn import(&self, _descriptor: &BufferDescriptor) -> Result<TextureId, ImportError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(ImportError::Failed("mock".into()));
        }
        let id = TextureId(self.next.fetch_add(1, Ordering::Relaxed));
        self.ledger.push(Entry::Import(id));
        Ok(id)
    }

    fn destroy(&self, texture: TextureId) {
        self.ledger.push(Entry::Destroy(texture));
    }

    fn draw(&self, texture: TextureId) {
        self.ledger.push(Entry::Draw(texture));
    }
}

// ── Builders ──────────────────────────────────────────────────────────────────

pub fn metadata(width: u32, height: u32, planes: u32) -> FrameMetadata {
    FrameMetadata {
        format: Fourcc::XRGB8888,
        width,
        height,
        plane_count: planes,
        modifier: Modifier::LINEAR,
    }
}

/// A plane event backed by a real socket; the returned peer observes closure.
pub fn plane_event(index: u32) -> (PlaneInfo, UnixStream) {
    let (ours, peer) = UnixStream::pair().unwrap();
    let info = PlaneInfo {
        index,
        fd: OwnedFd::from(ours),
        size: 4096,
        offset: 0,
        stride: 256,
        plane_index: index,
    };
    (info, peer)
}

pub fn descriptor_with_peers(planes: u32) -> (BufferDescriptor, Vec<UnixStream>) {
    let mut peers = Vec::new();
    let planes = (0..planes)
        .map(|i| {
            let (ours, peer) = UnixStream::pair().unwrap();
            peers.push(peer);
            Plane {
                fd: OwnedFd::from(ours),
                size: 4096,
                offset: 0,
                stride: 256,
                plane_index: i,
                modifier: Modifier::LINEAR,
            }
        })
        .collect();
    let descriptor = BufferDescriptor { format: Fourcc::XRGB8888, width: 64, height: 64, planes };
    (descriptor, peers)
}

/// `true` once the other end of the socket pair has been closed.
pub fn peer_closed(peer: &UnixStream) -> bool {
    peer.set_nonblocking(true).unwrap();
    let mut buf = [0u8; 1];
    matches!((&*peer).read(&mut buf), Ok(0))
}

// ── MockSession ───────────────────────────────────────────────────────────────

/// Which protocol object a scripted event is addressed to.
#[derive(Debug, Clone, Copy)]
pub enum To {
    /// The object returned by the most recent request.
    Latest,
    Object(u32),
}

#[derive(Debug)]
pub enum Step {
    Event(To, FrameEvent),
    RemoveTarget(TargetId),
}

/// Metadata, planes in reverse order, then ready, all for the latest request.
pub fn frame_batch(width: u32, height: u32, planes: u32) -> (Vec<Step>, Vec<UnixStream>) {
    let mut batch = vec![Step::Event(To::Latest, FrameEvent::Metadata(metadata(width, height, planes)))];
    let mut peers = Vec::new();
    for index in (0..planes).rev() {
        let (p, peer) = plane_event(index);
        peers.push(peer);
        batch.push(Step::Event(To::Latest, FrameEvent::Plane(p)));
    }
    batch.push(Step::Event(To::Latest, FrameEvent::Ready { tv_sec: 0, tv_nsec: 0 }));
    (batch, peers)
}

/// A session whose `dispatch_once` replays one scripted batch per call.
pub struct MockSession {
    exchange:   FrameExchange<MockFrame>,
    ledger:     Arc<Ledger>,
    outputs:    OutputRegistry<()>,
    script:     VecDeque<Vec<Step>>,
    feed:       Option<Receiver<Vec<Step>>>,
    next_id:    u32,
    pub requests:   Vec<(TargetId, bool)>,
    pub dispatches: usize,
    pub torn_down:  usize,
    closed:     bool,
}

impl MockSession {
    pub fn new(
        ledger: &Arc<Ledger>,
        importer: Arc<dyn GraphicsImporter>,
        gate: Arc<SettleGate>,
    ) -> Self {
        Self {
            exchange: FrameExchange::new(importer, gate),
            ledger: Arc::clone(ledger),
            outputs: OutputRegistry::new(),
            script: VecDeque::new(),
            feed: None,
            next_id: 1,
            requests: Vec::new(),
            dispatches: 0,
            torn_down: 0,
            closed: false,
        }
    }

    pub fn with_output(mut self, id: u32, name: &str) -> Self {
        self.outputs.insert(TargetId(id), ());
        self.outputs.set_name(TargetId(id), name.to_owned());
        self
    }

    /// Once the script runs dry, block on `feed` for the next batch, the way a
    /// real dispatch blocks on the compositor.
    pub fn with_feed(mut self, feed: Receiver<Vec<Step>>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn push_batch(&mut self, batch: Vec<Step>) {
        self.script.push_back(batch);
    }

    /// Script a complete exchange for the next request: metadata, planes in
    /// reverse order, ready. Returns the plane peers.
    pub fn push_frame(&mut self, width: u32, height: u32, planes: u32) -> Vec<UnixStream> {
        let (batch, peers) = frame_batch(width, height, planes);
        self.push_batch(batch);
        peers
    }

    /// Simulate the compositor hanging up: every later dispatch fails.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn latest_id(&self) -> u32 {
        self.next_id - 1
    }
}

impl ProtocolSession for MockSession {
    type Frame = MockFrame;

    fn exchange(&self) -> &FrameExchange<MockFrame> {
        &self.exchange
    }

    fn exchange_mut(&mut self) -> &mut FrameExchange<MockFrame> {
        &mut self.exchange
    }

    fn targets(&self) -> Vec<TargetInfo> {
        self.outputs.list()
    }

    fn has_target(&self, target: TargetId) -> bool {
        self.outputs.contains(target)
    }

    fn request_frame(&mut self, target: TargetId, overlay_cursor: bool) -> Result<(), CaptureError> {
        if !self.outputs.contains(target) {
            return Err(CaptureError::TargetGone);
        }
        let (id, ledger) = (self.next_id, &self.ledger);
        self.exchange.request_frame(|| Ok(MockFrame::new(id, ledger)))?;
        self.next_id += 1;
        self.requests.push((target, overlay_cursor));
        Ok(())
    }

    fn dispatch_once(&mut self) -> Result<(), CaptureError> {
        if self.closed {
            return Err(CaptureError::ConnectionFailed { reason: "closed".into() });
        }
        self.dispatches += 1;
        let batch = match (self.script.pop_front(), &self.feed) {
            (Some(batch), _) => batch,
            (None, Some(feed)) => feed.recv().expect("feed hung up while dispatching"),
            (None, None) => panic!("dispatch_once with nothing scripted would block forever"),
        };
        for step in batch {
            match step {
                Step::Event(to, event) => {
                    let id = match to {
                        To::Latest => self.latest_id(),
                        To::Object(id) => id,
                    };
                    let object = MockFrame::handle(id, &self.ledger);
                    self.exchange.handle(&object, event);
                }
                Step::RemoveTarget(target) => {
                    self.outputs.remove(target);
                }
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if self.torn_down > 0 {
            return;
        }
        self.closed = true;
        self.torn_down += 1;
        self.exchange.teardown();
        self.outputs.clear();
    }
}
