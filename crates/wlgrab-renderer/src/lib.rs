use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};
use wlgrab_core::{BufferDescriptor, Fourcc, Modifier, Resolution};

// MARK: - GraphicsImporter trait

/// Opaque handle to a texture owned by a [`GraphicsImporter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Turns exported buffers into drawable textures.
///
/// Implementations must not keep the descriptor's fds past `import`: the
/// capture side closes them independently once the texture is destroyed.
///
/// Implementations:
/// - [`PlaceholderImporter`]: imports nothing, every frame is drawn as a no-op
/// - [`StatsImporter`]: hands out ids and tracks frame rate, used by `wlgrab-app`
pub trait GraphicsImporter: Send + Sync {
    fn import(&self, descriptor: &BufferDescriptor) -> Result<TextureId, ImportError>;

    fn destroy(&self, texture: TextureId);

    fn draw(&self, texture: TextureId);
}

// MARK: - ImportError

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImportError {
    #[error("Unsupported buffer: format {format}, modifier {modifier:#x}")]
    Unsupported { format: Fourcc, modifier: u64 },

    #[error("Texture import failed: {0}")]
    Failed(String),
}

// MARK: - ImportedTexture

/// A texture that is destroyed through its importer exactly once, on drop.
pub struct ImportedTexture {
    id: TextureId,
    importer: Arc<dyn GraphicsImporter>,
}

impl ImportedTexture {
    pub fn import(
        importer: &Arc<dyn GraphicsImporter>,
        descriptor: &BufferDescriptor,
    ) -> Result<Self, ImportError> {
        let id = importer.import(descriptor)?;
        Ok(Self { id, importer: Arc::clone(importer) })
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn draw(&self) {
        self.importer.draw(self.id);
    }
}

impl Drop for ImportedTexture {
    fn drop(&mut self) {
        self.importer.destroy(self.id);
    }
}

impl std::fmt::Debug for ImportedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ImportedTexture").field(&self.id).finish()
    }
}

// MARK: - PlaceholderImporter

/// Importer for hosts without a graphics backend. Import always fails, so
/// frames complete without a texture and are skipped at draw time.
pub struct PlaceholderImporter;

impl GraphicsImporter for PlaceholderImporter {
    fn import(&self, _descriptor: &BufferDescriptor) -> Result<TextureId, ImportError> {
        Err(ImportError::Failed("PlaceholderImporter: no graphics backend".into()))
    }
    fn destroy(&self, _texture: TextureId) {}
    fn draw(&self, _texture: TextureId) {}
}

// MARK: - StatsImporter

/// Importer that validates descriptors and hands out texture ids without
/// touching the GPU. Keeps counters and a one-second frame-rate window.
pub struct StatsImporter {
    next_id:   AtomicU64,
    imported:  AtomicU64,
    destroyed: AtomicU64,
    drawn:     AtomicU64,
    inner:     Mutex<StatsWindow>,
}

#[derive(Default)]
struct StatsWindow {
    live:        HashSet<TextureId>,
    draw_times:  VecDeque<Instant>,
    last_size:   Resolution,
    last_format: Option<(Fourcc, Modifier, usize)>,
    last_report: Option<Instant>,
}

/// Point-in-time view of a [`StatsImporter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportStats {
    pub imported:  u64,
    pub destroyed: u64,
    pub drawn:     u64,
    pub live:      usize,
    pub fps:       f64,
    pub size:      Resolution,
}

impl Default for StatsImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsImporter {
    pub fn new() -> Self {
        Self {
            next_id:   AtomicU64::new(1),
            imported:  AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            drawn:     AtomicU64::new(0),
            inner:     Mutex::new(StatsWindow::default()),
        }
    }

    pub fn snapshot(&self) -> ImportStats {
        let w = self.lock();
        ImportStats {
            imported:  self.imported.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            drawn:     self.drawn.load(Ordering::Relaxed),
            live:      w.live.len(),
            fps:       w.draw_times.len() as f64,
            size:      w.last_size,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsWindow> {
        // Counters stay meaningful even if a holder panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl GraphicsImporter for StatsImporter {
    fn import(&self, descriptor: &BufferDescriptor) -> Result<TextureId, ImportError> {
        if descriptor.planes.is_empty() || descriptor.resolution().is_empty() {
            return Err(ImportError::Failed(format!(
                "empty buffer ({} plane(s), {})",
                descriptor.plane_count(),
                descriptor.resolution()
            )));
        }
        if descriptor.modifier() == Modifier::INVALID {
            return Err(ImportError::Unsupported {
                format: descriptor.format,
                modifier: descriptor.modifier().0,
            });
        }

        let id = TextureId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.imported.fetch_add(1, Ordering::Relaxed);

        let mut w = self.lock();
        let layout = (descriptor.format, descriptor.modifier(), descriptor.plane_count());
        if w.last_format != Some(layout) || w.last_size != descriptor.resolution() {
            info!(
                "Buffer layout: {} {} modifier={:#x} planes={}",
                descriptor.resolution(),
                descriptor.format,
                descriptor.modifier().0,
                descriptor.plane_count()
            );
            w.last_format = Some(layout);
            w.last_size = descriptor.resolution();
        }
        w.live.insert(id);
        Ok(id)
    }

    fn destroy(&self, texture: TextureId) {
        if !self.lock().live.remove(&texture) {
            warn!("destroy of unknown texture {:?}", texture);
            return;
        }
        self.destroyed.fetch_add(1, Ordering::Relaxed);
    }

    fn draw(&self, texture: TextureId) {
        let now = Instant::now();
        let mut w = self.lock();
        if !w.live.contains(&texture) {
            warn!("draw of unknown texture {:?}", texture);
            return;
        }
        self.drawn.fetch_add(1, Ordering::Relaxed);

        w.draw_times.push_back(now);
        while w
            .draw_times
            .front()
            .map_or(false, |t| now.duration_since(*t).as_secs_f64() > 1.0)
        {
            w.draw_times.pop_front();
        }

        let due = w.last_report.map_or(true, |t| now.duration_since(t).as_secs() >= 1);
        if due {
            debug!("{} @ {} fps", w.last_size, w.draw_times.len());
            w.last_report = Some(now);
        }
    }
}
