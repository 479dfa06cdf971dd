//! dfflow: trigger-inhibit flow control for data-acquisition pipelines.
//!
//! Two components sit on bounded message channels:
//! - [`DecisionRelay`] forwards trigger decisions downstream, push-driven.
//! - [`InhibitMonitor`] watches admitted vs. completed trigger numbers and
//!   emits rate-limited Busy/Free messages upstream.

pub mod channel;
pub mod config;
mod error;
pub mod inhibit;
pub mod message;
pub mod module;
pub mod relay;

pub use channel::{ChannelError, Receiver, Sender, SharedReceiver, SharedSender, shared_receiver};
pub use config::{MonitorConf, RelayConf, StartParams};
pub use error::{FlowError, Result};
pub use inhibit::{InhibitMonitor, MonitorInfo, MonitorSummary, ProgressHandle};
pub use message::{DecisionMessage, FlowState, InhibitMessage, RunNumber, TriggerNumber};
pub use module::{Command, Module, dispatch};
pub use relay::{DecisionRelay, RelayInfo};

/// Library version from Cargo.toml.
pub const DFFLOW_VERSION: &str = env!("CARGO_PKG_VERSION");
