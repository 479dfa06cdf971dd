//! Bounded message channels with timeout-capable send and receive.
//!
//! # Architecture
//!
//! - **queue**: in-process bounded queue (tokio mpsc)
//! - **framed**: length-delimited JSON frames over any AsyncRead/AsyncWrite
//! - **callback**: push-style delivery, drives a handler from a receiver
//!
//! A timeout is a normal outcome and is reported as [`ChannelError::Timeout`],
//! distinct from a closed channel or a transport failure.

pub mod callback;
pub mod framed;
pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("channel closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

impl ChannelError {
    /// Timeouts are expected under backpressure and never escalate.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Producing end of a bounded channel.
#[async_trait]
pub trait Sender<T: Send + 'static>: Send + Sync {
    /// Send `msg`, giving up after `timeout`. On timeout the message is dropped.
    async fn send(&self, msg: T, timeout: Duration) -> Result<(), ChannelError>;
}

/// Consuming end of a bounded channel.
#[async_trait]
pub trait Receiver<T: Send + 'static>: Send {
    /// Wait at most `timeout` for the next message.
    async fn receive(&mut self, timeout: Duration) -> Result<T, ChannelError>;
}

/// A receiver that can be handed from one consumer to the next across
/// start/stop cycles. Only one consumer holds the lock at a time.
pub type SharedReceiver<T> = Arc<tokio::sync::Mutex<Box<dyn Receiver<T>>>>;

/// A sender shared by everything producing onto one channel.
pub type SharedSender<T> = Arc<dyn Sender<T>>;

/// Wrap a receiver so it can be registered with a component.
pub fn shared_receiver<T, R>(receiver: R) -> SharedReceiver<T>
where
    T: Send + 'static,
    R: Receiver<T> + 'static,
{
    let receiver: Box<dyn Receiver<T>> = Box::new(receiver);
    Arc::new(tokio::sync::Mutex::new(receiver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeout_is_timeout() {
        assert!(ChannelError::Timeout(Duration::from_millis(5)).is_timeout());
        assert!(!ChannelError::Closed.is_timeout());
        assert!(!ChannelError::Transport("boom".to_string()).is_timeout());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ChannelError::Timeout(Duration::from_millis(100)).to_string(),
            "timed out after 100ms"
        );
        assert_eq!(ChannelError::Closed.to_string(), "channel closed");
    }
}
