//! DecisionRelay - forwards trigger decisions from one channel to another.
//!
//! Delivery is push-style: `start` registers the relay as the input's
//! callback and every arriving decision is forwarded once, with a bounded
//! send. A send that times out drops that decision and dispatch carries on.
//! A closed output is fatal and ends dispatch; `stop` reports it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::channel::callback::{CallbackHandle, MessageHandler, add_callback};
use crate::channel::{ChannelError, SharedReceiver, SharedSender};
use crate::config::RelayConf;
use crate::error::{FlowError, Result};
use crate::message::{DecisionMessage, RunNumber};

/// Counter snapshot for a metrics collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayInfo {
    pub run_number: RunNumber,
    pub forwarded_count: u64,
    pub dropped_count: u64,
}

/// The part of the relay that runs on the dispatcher task.
struct Forwarder {
    name: String,
    output: SharedSender<DecisionMessage>,
    queue_timeout_ms: AtomicU64,
    run_number: AtomicU32,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl Forwarder {
    fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms.load(Ordering::Acquire))
    }

    async fn forward(&self, decision: DecisionMessage) -> std::result::Result<(), ChannelError> {
        let timeout = self.queue_timeout();
        match self.output.send(decision, timeout).await {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::AcqRel);
                tracing::trace!(
                    name = %self.name,
                    trigger_number = decision.trigger_number,
                    "Forwarded trigger decision"
                );
                Ok(())
            }
            Err(e) if e.is_timeout() => {
                self.dropped.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(
                    name = %self.name,
                    trigger_number = decision.trigger_number,
                    timeout = ?timeout,
                    "Dropped trigger decision: output queue full"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn info(&self) -> RelayInfo {
        RelayInfo {
            run_number: self.run_number.load(Ordering::Acquire),
            forwarded_count: self.forwarded.load(Ordering::Acquire),
            dropped_count: self.dropped.load(Ordering::Acquire),
        }
    }
}

#[async_trait]
impl MessageHandler<DecisionMessage> for Forwarder {
    async fn on_message(&self, msg: DecisionMessage) -> std::result::Result<(), ChannelError> {
        self.forward(msg).await
    }
}

pub struct DecisionRelay {
    forwarder: Arc<Forwarder>,
    input: SharedReceiver<DecisionMessage>,
    registration: Mutex<Option<CallbackHandle>>,
}

impl DecisionRelay {
    pub fn new(
        name: impl Into<String>,
        input: SharedReceiver<DecisionMessage>,
        output: SharedSender<DecisionMessage>,
    ) -> Self {
        Self {
            forwarder: Arc::new(Forwarder {
                name: name.into(),
                output,
                queue_timeout_ms: AtomicU64::new(RelayConf::default().general_queue_timeout),
                run_number: AtomicU32::new(0),
                forwarded: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            input,
            registration: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.forwarder.name
    }

    pub fn configure(&self, conf: &RelayConf) -> Result<()> {
        conf.validate()?;
        self.forwarder
            .queue_timeout_ms
            .store(conf.general_queue_timeout, Ordering::Release);
        tracing::debug!(name = %self.name(), queue_timeout_ms = conf.general_queue_timeout, "Configured");
        Ok(())
    }

    /// Forward one decision, as the input's callback does for each arrival.
    pub async fn on_message_available(&self, decision: DecisionMessage) -> Result<()> {
        Ok(self.forwarder.forward(decision).await?)
    }

    /// Register with the input and begin relaying. Counters restart from zero.
    pub async fn start(&self, run_number: RunNumber) -> Result<()> {
        let mut registration = self.registration.lock().await;
        if registration.is_some() {
            return Err(FlowError::AlreadyRunning(self.name().to_string()));
        }

        self.forwarder.forwarded.store(0, Ordering::Release);
        self.forwarder.dropped.store(0, Ordering::Release);
        self.forwarder.run_number.store(run_number, Ordering::Release);

        let handler: Arc<dyn MessageHandler<DecisionMessage>> = self.forwarder.clone();
        *registration = Some(add_callback(
            Arc::clone(&self.input),
            handler,
            self.forwarder.queue_timeout(),
        ));

        tracing::info!(name = %self.name(), run_number, "Successfully started");
        Ok(())
    }

    /// Deregister from the input. A no-op when not running.
    ///
    /// Returns the final counters, or the fatal error that ended relaying.
    pub async fn stop(&self) -> Result<RelayInfo> {
        let Some(handle) = self.registration.lock().await.take() else {
            return Ok(self.info());
        };

        let outcome = handle.remove().await;
        let info = self.info();
        match outcome {
            Ok(_) => {
                tracing::info!(
                    name = %self.name(),
                    forwarded = info.forwarded_count,
                    dropped = info.dropped_count,
                    "Successfully stopped"
                );
                Ok(info)
            }
            Err(e) => {
                tracing::error!(name = %self.name(), error = %e, "Relaying ended on a fatal error");
                Err(e.into())
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.registration
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    pub fn info(&self) -> RelayInfo {
        self.forwarder.info()
    }
}
