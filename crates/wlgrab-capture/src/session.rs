//! Transport boundary for the frame exchange.

use wlgrab_core::CaptureError;

use crate::exchange::FrameExchange;
use crate::lease::FrameObject;
use crate::outputs::{TargetId, TargetInfo};

/// A connection to the capture protocol that delivers frame events into its
/// [`FrameExchange`].
///
/// Events are only processed inside [`dispatch_once`](Self::dispatch_once);
/// every protocol object is created and destroyed on the thread that calls it.
pub trait ProtocolSession {
    type Frame: FrameObject;

    fn exchange(&self) -> &FrameExchange<Self::Frame>;

    fn exchange_mut(&mut self) -> &mut FrameExchange<Self::Frame>;

    fn targets(&self) -> Vec<TargetInfo>;

    fn has_target(&self, target: TargetId) -> bool;

    fn resolve(&self, name: &str) -> Option<TargetId> {
        self.targets()
            .into_iter()
            .find(|t| t.name.as_deref() == Some(name))
            .map(|t| t.id)
    }

    /// Send a capture request for `target` through the exchange.
    fn request_frame(&mut self, target: TargetId, overlay_cursor: bool) -> Result<(), CaptureError>;

    /// Process one round of incoming traffic, blocking until some arrives.
    fn dispatch_once(&mut self) -> Result<(), CaptureError>;

    /// Dispatch until `keep_going` turns false. The only blocking call in the
    /// capture path.
    fn pump_while(&mut self, mut keep_going: impl FnMut(&Self) -> bool) -> Result<(), CaptureError>
    where
        Self: Sized,
    {
        while keep_going(self) {
            self.dispatch_once()?;
        }
        Ok(())
    }

    /// Release frames, listeners and the connection. Idempotent.
    fn teardown(&mut self);
}
