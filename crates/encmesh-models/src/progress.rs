//! Task progress model.
//!
//! Progress is counted in task units (seconds for audio, frames for video)
//! within the current pass. A new pass restarts the unit window at zero.

use serde::{Deserialize, Serialize};

use crate::task::Unit;

/// Lifecycle flag of a task's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    /// Task was never started
    #[default]
    NotStarted,
    /// Task is encoding
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed or was cancelled; counters are reset
    Failed,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::NotStarted => "not_started",
            ProgressState::Running => "running",
            ProgressState::Completed => "completed",
            ProgressState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressState::Completed | ProgressState::Failed)
    }
}

/// Progress of a single task.
///
/// Invariants: `units <= unit_count` and `1 <= current_step <= step_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Lifecycle flag
    pub state: ProgressState,
    /// Current pass, 1-based
    pub current_step: u32,
    /// Total number of passes
    pub step_count: u32,
    /// Units done in the current pass
    pub units: u64,
    /// Units in a full pass
    pub unit_count: u64,
    /// Kind of unit counted
    pub unit: Unit,
}

impl Progress {
    pub fn new(step_count: u32, unit_count: u64, unit: Unit) -> Self {
        Self {
            state: ProgressState::NotStarted,
            current_step: 1,
            step_count: step_count.max(1),
            units: 0,
            unit_count,
            unit,
        }
    }

    /// Mark the task as running from the first pass.
    pub fn start(&mut self) {
        self.state = ProgressState::Running;
        self.current_step = 1;
        self.units = 0;
    }

    /// Record the unit position reported by the encoder.
    ///
    /// Positions are clamped to `unit_count` and never move backwards within
    /// a pass.
    pub fn update(&mut self, units: u64) {
        let units = units.min(self.unit_count);
        if units > self.units {
            self.units = units;
        }
    }

    /// Close the current pass.
    ///
    /// Moves to the next pass with an empty unit window, or fills the unit
    /// window when the last pass completes.
    pub fn complete_step(&mut self) {
        if self.current_step < self.step_count {
            self.current_step += 1;
            self.units = 0;
        } else {
            self.units = self.unit_count;
        }
    }

    pub fn complete(&mut self) {
        self.state = ProgressState::Completed;
        self.current_step = self.step_count;
        self.units = self.unit_count;
    }

    pub fn reset(&mut self) {
        self.state = ProgressState::Failed;
        self.current_step = 1;
        self.units = 0;
    }

    /// Overall completion across all passes, in percent.
    pub fn percent(&self) -> f64 {
        if self.unit_count == 0 {
            return if self.state == ProgressState::Completed { 100.0 } else { 0.0 };
        }
        let total = self.unit_count as f64 * self.step_count as f64;
        let done = (self.current_step - 1) as f64 * self.unit_count as f64 + self.units as f64;
        ((done / total) * 100.0).min(100.0)
    }
}
