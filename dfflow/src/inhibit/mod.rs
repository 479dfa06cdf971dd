//! Trigger inhibit monitoring.
//!
//! - `progress`: lock-free admitted/completed/threshold counters
//! - `controller`: Busy/Free hysteresis, pending vs. applied state, resend interval
//! - `monitor`: the background worker and its lifecycle

mod controller;
mod monitor;
mod progress;

pub use controller::FlowController;
pub use monitor::{InhibitMonitor, MonitorInfo, MonitorSummary};
pub use progress::{Progress, ProgressCounters, ProgressHandle};
