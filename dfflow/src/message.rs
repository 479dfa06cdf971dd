//! Messages exchanged between the admission point, the relay and the monitor.

use serde::{Deserialize, Serialize};

/// Sequence number carried by every trigger decision.
pub type TriggerNumber = u64;

/// Run number attached to messages for bookkeeping only.
pub type RunNumber = u32;

/// A trigger decision admitted into the pipeline.
///
/// Only `trigger_number` is interpreted by this crate; it is assumed to be
/// non-decreasing across a stream but that is never enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionMessage {
    pub trigger_number: TriggerNumber,
    #[serde(default)]
    pub run_number: RunNumber,
}

impl DecisionMessage {
    pub fn new(trigger_number: TriggerNumber) -> Self {
        Self {
            trigger_number,
            run_number: 0,
        }
    }

    pub fn with_run(mut self, run_number: RunNumber) -> Self {
        self.run_number = run_number;
        self
    }
}

/// Busy/Free backpressure signal sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InhibitMessage {
    pub busy: bool,
    #[serde(default)]
    pub run_number: RunNumber,
}

impl InhibitMessage {
    pub fn busy() -> Self {
        Self {
            busy: true,
            run_number: 0,
        }
    }

    pub fn free() -> Self {
        Self {
            busy: false,
            run_number: 0,
        }
    }

    pub fn state(&self) -> FlowState {
        if self.busy {
            FlowState::Busy
        } else {
            FlowState::Free
        }
    }
}

/// Flow state announced to the admission point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    #[default]
    Free,
    Busy,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Busy => "busy",
        }
    }

    /// The inhibit message announcing this state.
    pub fn to_message(self, run_number: RunNumber) -> InhibitMessage {
        InhibitMessage {
            busy: self == Self::Busy,
            run_number,
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
