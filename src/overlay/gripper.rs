//! Edge-triggered gripper state.

use serde::{Deserialize, Serialize};

/// Gap thresholds with hysteresis: close below `close`, reopen above `open`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GripperThresholds {
    pub close: f64,
    pub open: f64,
}

impl Default for GripperThresholds {
    fn default() -> Self {
        Self {
            close: 0.01,
            open: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GripperTransition {
    Close,
    Open,
}

/// Open/closed latch. Starts open.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GripperLatch {
    thresholds: GripperThresholds,
    closed: bool,
}

impl GripperLatch {
    #[must_use]
    pub fn new(thresholds: GripperThresholds) -> Self {
        Self {
            thresholds,
            closed: false,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Feed one gap sample, returning the transition it triggers, if any.
    pub fn step(&mut self, gap: f64) -> Option<GripperTransition> {
        if !self.closed && gap < self.thresholds.close {
            self.closed = true;
            Some(GripperTransition::Close)
        } else if self.closed && gap > self.thresholds.open {
            self.closed = false;
            Some(GripperTransition::Open)
        } else {
            None
        }
    }
}
