//! Busy flag + "frame settled" signal shared by the render and configuration
//! threads.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use wlgrab_core::CaptureError;

/// Guards the single outstanding frame request.
///
/// The render thread sets the flag when it issues a request and clears it when
/// the exchange completes or is cancelled. A configuration thread that needs to
/// reconnect waits on [`SettleGate::wait_settled`] instead of polling.
#[derive(Debug, Default)]
pub struct SettleGate {
    busy: Mutex<bool>,
    settled: Condvar,
}

impl SettleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a request in flight. Fails if one already is.
    pub fn try_begin(&self) -> Result<(), CaptureError> {
        let mut busy = self.lock();
        if *busy {
            return Err(CaptureError::AlreadyBusy);
        }
        *busy = true;
        Ok(())
    }

    pub fn clear(&self) {
        *self.lock() = false;
        self.settled.notify_all();
    }

    pub fn is_busy(&self) -> bool {
        *self.lock()
    }

    /// Wake waiters after a render pass finished.
    pub fn notify_settled(&self) {
        let _busy = self.lock();
        self.settled.notify_all();
    }

    /// Block until no request is in flight.
    pub fn wait_settled(&self) {
        let busy = self.lock();
        let _idle = self
            .settled
            .wait_while(busy, |busy| *busy)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Like [`wait_settled`](Self::wait_settled) with an upper bound. Returns
    /// `true` if the gate settled in time.
    pub fn wait_settled_timeout(&self, timeout: Duration) -> bool {
        let busy = self.lock();
        let (_busy, result) = self
            .settled
            .wait_timeout_while(busy, timeout, |busy| *busy)
            .unwrap_or_else(|e| e.into_inner());
        !result.timed_out()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.busy.lock().unwrap_or_else(|e| e.into_inner())
    }
}
