//! wlgrab-capture: zero-copy frame acquisition from a Wayland compositor.
//!
//! Frames are requested through `zwlr_export_dmabuf_manager_v1`. The compositor
//! answers asynchronously with metadata, one event per plane (in any order)
//! and finally `ready` or `cancel`. The planes are collected into a
//! [`BufferDescriptor`](wlgrab_core::BufferDescriptor), imported as a texture
//! and promoted to the drawable frame.
//!
//! # Architecture
//!
//! ```text
//!  render thread                                   configuration thread
//!  ─────────────                                   ────────────────────
//!  CaptureSource::render                           CaptureSource::update
//!        │                                                │
//!        ▼                                                ▼
//!  RenderPump::render_tick ──► request_frame        SettleGate::wait_settled
//!        │                         │                      │
//!        ▼                         ▼                      ▼
//!  ProtocolSession::pump_while ◄─ busy flag ──────► teardown + reconnect
//!        │
//!        ▼  metadata / plane / ready / cancel
//!  FrameExchange ──► DescriptorShell ──► GraphicsImporter ──► DoubleBuffer
//!                                                              (promote)
//! ```
//!
//! Only `pump_while` blocks. Every protocol object, fd and texture has one
//! owner and is reclaimed exactly once when that owner drops.

pub mod buffer;
pub mod exchange;
pub mod gate;
pub mod lease;
pub mod outputs;
pub mod pump;
pub mod session;
pub mod source;

#[cfg(all(target_os = "linux", feature = "wayland"))]
pub mod wayland;

#[cfg(test)]
mod testing;

pub use buffer::{CapturedFrame, DoubleBuffer, PendingFrame};
pub use exchange::{CancelReason, EventOutcome, ExchangePhase, FrameEvent, FrameExchange};
pub use gate::SettleGate;
pub use lease::{FrameLease, FrameObject};
pub use outputs::{OutputRegistry, TargetId, TargetInfo};
pub use pump::RenderPump;
pub use session::ProtocolSession;
pub use source::{CaptureSource, Connector};

#[cfg(all(target_os = "linux", feature = "wayland"))]
pub use wayland::WaylandSession;
