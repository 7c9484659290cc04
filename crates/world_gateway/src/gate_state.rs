//! Per-world gating flags for travel through the gateway dimension.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Plain copy of the three persisted flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateFlags {
    pub entered: bool,
    pub stabilized: bool,
    pub final_event_completed: bool,
}

impl GateFlags {
    pub fn travel_unstable(self) -> bool {
        self.entered && !self.stabilized
    }
}

/// Flags are written by the simulation thread and read by the save thread,
/// so every field is atomic. Each mutation marks the state dirty.
#[derive(Debug, Default)]
pub struct GatewayGateState {
    entered: AtomicBool,
    stabilized: AtomicBool,
    final_event_completed: AtomicBool,
    dirty: AtomicBool,
}

impl GatewayGateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loaded state starts clean.
    pub fn from_flags(flags: GateFlags) -> Self {
        Self {
            entered: AtomicBool::new(flags.entered),
            stabilized: AtomicBool::new(flags.stabilized),
            final_event_completed: AtomicBool::new(flags.final_event_completed),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn flags(&self) -> GateFlags {
        GateFlags {
            entered: self.entered(),
            stabilized: self.stabilized(),
            final_event_completed: self.final_event_completed(),
        }
    }

    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    pub fn stabilized(&self) -> bool {
        self.stabilized.load(Ordering::SeqCst)
    }

    pub fn final_event_completed(&self) -> bool {
        self.final_event_completed.load(Ordering::SeqCst)
    }

    pub fn travel_unstable(&self) -> bool {
        self.entered() && !self.stabilized()
    }

    /// First arrival re-arms instability. Returns whether this call was the
    /// first arrival; later calls change nothing.
    pub fn mark_entered(&self) -> bool {
        if self
            .entered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.stabilized.store(false, Ordering::SeqCst);
        self.mark_dirty();
        info!("gateway dimension entered for the first time; travel is now unstable");
        true
    }

    pub fn mark_stabilized(&self) {
        self.stabilized.store(true, Ordering::SeqCst);
        self.mark_dirty();
        info!("gateway travel stabilized");
    }

    /// Permanent; there is no path back to `false`.
    pub fn mark_final_event_completed(&self) {
        self.final_event_completed.store(true, Ordering::SeqCst);
        self.mark_dirty();
        info!("gateway final event completed");
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}
