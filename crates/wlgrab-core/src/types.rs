use std::fmt;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use crate::errors::DescriptorError;

/// Upper bound on planes per exported buffer.
pub const MAX_PLANES: usize = 4;

// MARK: - Resolution

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const ZERO: Self = Self { width: 0, height: 0 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// MARK: - Fourcc

/// DRM fourcc pixel format code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl Fourcc {
    pub const ARGB8888: Self = Self::from_chars(*b"AR24");
    pub const XRGB8888: Self = Self::from_chars(*b"XR24");
    pub const ABGR8888: Self = Self::from_chars(*b"AB24");
    pub const XBGR8888: Self = Self::from_chars(*b"XB24");
    pub const NV12: Self = Self::from_chars(*b"NV12");

    pub const fn from_chars(c: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(c))
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_le_bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fourcc({self} / {:#010x})", self.0)
    }
}

// MARK: - Modifier

/// DRM format modifier (tiling / compression tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Modifier(pub u64);

impl Modifier {
    pub const LINEAR: Self = Self(0);
    pub const INVALID: Self = Self(0x00ff_ffff_ffff_ffff);

    /// Combine the high/low halves reported by the export protocol.
    pub fn from_hi_lo(hi: u32, lo: u32) -> Self {
        Self(((hi as u64) << 32) | lo as u64)
    }
}

// MARK: - FrameMetadata

/// Frame-wide attributes reported before any plane is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMetadata {
    pub format: Fourcc,
    pub width: u32,
    pub height: u32,
    pub plane_count: u32,
    pub modifier: Modifier,
}

// MARK: - PlaneInfo

/// One plane as reported by the protocol. `index` is the descriptor slot.
#[derive(Debug)]
pub struct PlaneInfo {
    pub index: u32,
    pub fd: OwnedFd,
    pub size: u32,
    pub offset: u32,
    pub stride: u32,
    pub plane_index: u32,
}

// MARK: - Plane

/// One plane of a completed descriptor. The fd closes when the plane drops.
#[derive(Debug)]
pub struct Plane {
    pub fd: OwnedFd,
    pub size: u32,
    pub offset: u32,
    pub stride: u32,
    pub plane_index: u32,
    pub modifier: Modifier,
}

impl Plane {
    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

// MARK: - BufferDescriptor

/// Layout of one exported frame across 1..=4 planes.
///
/// Owns the plane fds. Importers borrow them for the duration of the import
/// call only; the descriptor keeps them open until it is dropped.
#[derive(Debug)]
pub struct BufferDescriptor {
    pub format: Fourcc,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<Plane>,
}

impl BufferDescriptor {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// The protocol reports a single modifier per frame, so every plane carries
    /// the same value.
    pub fn modifier(&self) -> Modifier {
        self.planes.first().map_or(Modifier::INVALID, |p| p.modifier)
    }
}

// MARK: - DescriptorShell

/// A descriptor under construction. Planes may arrive in any order; the slot
/// index is authoritative.
#[derive(Debug)]
pub struct DescriptorShell {
    meta: FrameMetadata,
    slots: [Option<PlaneInfo>; MAX_PLANES],
}

impl DescriptorShell {
    pub fn new(meta: FrameMetadata) -> Result<Self, DescriptorError> {
        if meta.plane_count == 0 || meta.plane_count as usize > MAX_PLANES {
            return Err(DescriptorError::PlaneCount(meta.plane_count));
        }
        Ok(Self { meta, slots: Default::default() })
    }

    pub fn metadata(&self) -> &FrameMetadata {
        &self.meta
    }

    /// Store one plane at its slot. A repeated index replaces (and closes) the
    /// earlier fd; an out-of-range index is rejected and its fd closed.
    pub fn insert(&mut self, plane: PlaneInfo) -> Result<(), DescriptorError> {
        if plane.index >= self.meta.plane_count {
            return Err(DescriptorError::PlaneIndex {
                index: plane.index,
                count: self.meta.plane_count,
            });
        }
        let slot = plane.index as usize;
        if self.slots[slot].is_some() {
            tracing::warn!("Plane {} described twice, keeping the latest", plane.index);
        }
        self.slots[slot] = Some(plane);
        Ok(())
    }

    /// Number of planes received so far.
    pub fn received(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Freeze into a descriptor. On error every received fd is closed.
    pub fn finish(self) -> Result<BufferDescriptor, DescriptorError> {
        let Self { meta, mut slots } = self;
        if meta.width == 0 || meta.height == 0 {
            return Err(DescriptorError::ZeroDimensions);
        }
        let count = meta.plane_count as usize;
        if let Some(missing) = slots[..count].iter().position(Option::is_none) {
            return Err(DescriptorError::MissingPlane(missing as u32));
        }
        let planes = slots[..count]
            .iter_mut()
            .filter_map(Option::take)
            .map(|p| Plane {
                fd: p.fd,
                size: p.size,
                offset: p.offset,
                stride: p.stride,
                plane_index: p.plane_index,
                modifier: meta.modifier,
            })
            .collect();
        Ok(BufferDescriptor {
            format: meta.format,
            width: meta.width,
            height: meta.height,
            planes,
        })
    }
}
