//! Boundary interception: the entry/exit protocol around monitored library
//! functions.
//!
//! The original mechanism is a machine-level prologue/epilogue that
//! rearranges the two saved return addresses on the stack so a wrapped
//! function returns into the stub's epilogue. Here that indirection is
//! isolated behind the portable [`LibraryBoundary::call_through`]
//! abstraction: invoke the wrapped function, notify the monitor on entry and
//! exit, and hand back the resume address the monitor wrote into a
//! caller-owned slot. The graph and resolver code stays entirely free of
//! architecture detail.
//!
//! Per-invocation correlation data (the caller's return address on enter,
//! the slot receiving the corrected return address on exit) lives on the
//! calling thread's own stack. There is deliberately no process-wide slot
//! for in-flight return addresses: many threads can be inside the same
//! wrapped function concurrently, and keeping the state frame-local makes
//! the protocol race-free without locks.

pub mod protocol;

use thiserror::Error;

use crate::model::{Addr, CodeRange};

/// Error type for monitor notifications.
///
/// Monitor-side failures never fail the wrapped call; the calling thread
/// proceeds regardless of the observer.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("monitoring channel is not open")]
    ChannelClosed,
    #[error("monitor rejected the request: {0}")]
    Rejected(i32),
}

/// The privileged observer seam.
///
/// Two request kinds over a single open channel: `lib_enter` carries the
/// return address of the call into the wrapped function; `lib_exit` hands
/// the monitor a mutable slot to write the address execution should resume
/// at; the eventual return address may not fit safely through a narrow
/// integer return channel, so the monitor writes the slot directly.
pub trait Monitor {
    fn lib_enter(&self, return_address: Addr) -> Result<(), NotifyError>;
    fn lib_exit(&self, resume: &mut Addr) -> Result<(), NotifyError>;
}

/// Why a given invocation is or is not notified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// Entry from monitored target code; both notifications fire.
    Monitored,
    /// The immediate caller is outside the target's code range: a nested
    /// call from one piece of library code into another, already observed
    /// indirectly. Skipped to avoid double-counting.
    NestedCall,
    /// Monitoring channel not open; zero-overhead pass-through.
    Disabled,
}

/// Wrapper state shared by every monitored entry point of one target:
/// the target's code-address bounds and the (possibly absent) monitor
/// channel. Holds no per-invocation state.
#[derive(Debug)]
pub struct LibraryBoundary<M> {
    target: CodeRange,
    monitor: Option<M>,
}

impl<M: Monitor> LibraryBoundary<M> {
    /// Boundary with monitoring disabled.
    pub fn new(target: CodeRange) -> Self {
        Self { target, monitor: None }
    }

    pub fn with_monitor(target: CodeRange, monitor: M) -> Self {
        Self { target, monitor: Some(monitor) }
    }

    pub fn target_range(&self) -> CodeRange {
        self.target
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitor.is_some()
    }

    pub fn monitor(&self) -> Option<&M> {
        self.monitor.as_ref()
    }

    /// Provenance and enablement checks for one invocation. The range test
    /// is half-open: a return address equal to the lower bound is in range,
    /// one equal to the upper bound is not.
    pub fn classify(&self, caller_return: Addr) -> Crossing {
        if !self.target.contains(caller_return) {
            Crossing::NestedCall
        } else if self.monitor.is_none() {
            Crossing::Disabled
        } else {
            Crossing::Monitored
        }
    }

    /// Invoke the wrapped function with entry/exit notification.
    ///
    /// Returns the function's value and the address execution should resume
    /// at: the monitor-written one for a monitored crossing, the caller's
    /// own return address otherwise (and whenever the exit notification
    /// fails; the thread proceeds regardless of the observer).
    pub fn call_through<R>(&self, caller_return: Addr, f: impl FnOnce() -> R) -> (R, Addr) {
        let monitor = match &self.monitor {
            Some(m) if self.target.contains(caller_return) => m,
            _ => return (f(), caller_return),
        };

        let _ = monitor.lib_enter(caller_return);
        let value = f();

        // The resume slot lives in this frame; the monitor writes the
        // corrected address directly into it.
        let mut resume = caller_return;
        if monitor.lib_exit(&mut resume).is_err() {
            resume = caller_return;
        }
        (value, resume)
    }
}
