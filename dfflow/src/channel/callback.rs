//! Push-style delivery: a dispatcher task pulls from a receiver and hands
//! every message to a registered handler.
//!
//! One dispatcher per registration, so a handler sees messages in arrival
//! order and never concurrently with itself. Registrations on the same
//! receiver take turns, each message going to exactly one of them.
//! Deregistration is cooperative: the dispatcher notices it after its current
//! bounded receive returns, or at once while it is waiting for its turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ChannelError, SharedReceiver};

/// Receives messages pushed by a dispatcher.
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync + 'static {
    /// Handle one message. An error stops the dispatcher.
    async fn on_message(&self, msg: T) -> Result<(), ChannelError>;
}

/// Live registration returned by [`add_callback`].
pub struct CallbackHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<u64, ChannelError>>,
}

impl CallbackHandle {
    /// Whether the dispatcher has already stopped (deregistered or failed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Deregister the handler and wait for the dispatcher to exit.
    ///
    /// Returns the number of messages delivered, or the error that ended
    /// dispatch early.
    pub async fn remove(self) -> Result<u64, ChannelError> {
        self.cancel.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(ChannelError::Transport(format!(
                "callback dispatcher failed: {e}"
            ))),
        }
    }
}

/// Start delivering messages from `receiver` to `handler`.
///
/// `poll_timeout` bounds each receive and therefore how long deregistration
/// can take to be noticed.
pub fn add_callback<T>(
    receiver: SharedReceiver<T>,
    handler: Arc<dyn MessageHandler<T>>,
    poll_timeout: Duration,
) -> CallbackHandle
where
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut delivered = 0u64;

        while !token.is_cancelled() {
            // Locked per receive so several registrations can share one receiver.
            let received = {
                let mut rx = tokio::select! {
                    _ = token.cancelled() => break,
                    rx = receiver.lock() => rx,
                };
                rx.receive(poll_timeout).await
            };
            let msg = match received {
                Ok(msg) => msg,
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    tracing::error!(error = %e, delivered, "Callback input failed, stopping dispatch");
                    return Err(e);
                }
            };

            if let Err(e) = handler.on_message(msg).await {
                tracing::error!(error = %e, delivered, "Callback handler failed, stopping dispatch");
                return Err(e);
            }
            delivered += 1;
        }

        tracing::debug!(delivered, "Callback removed");
        Ok(delivered)
    });

    CallbackHandle { cancel, task }
}
