//! In-process bounded queue backed by a tokio mpsc channel.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ChannelError, Receiver, Sender};

/// Create a bounded queue holding at most `capacity` messages.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    /// Free slots left in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl<T: Send + 'static> Sender<T> for QueueSender<T> {
    async fn send(&self, msg: T, timeout: Duration) -> Result<(), ChannelError> {
        match self.tx.send_timeout(msg, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(ChannelError::Timeout(timeout)),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(ChannelError::Closed),
        }
    }
}

pub struct QueueReceiver<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    /// Take a message without waiting, if one is queued.
    pub fn try_receive(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[async_trait]
impl<T: Send + 'static> Receiver<T> for QueueReceiver<T> {
    async fn receive(&mut self, timeout: Duration) -> Result<T, ChannelError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(ChannelError::Closed),
            Err(_) => Err(ChannelError::Timeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn send_then_receive_in_order() {
        let (tx, mut rx) = bounded(4);
        for i in 0..3u64 {
            tx.send(i, TIMEOUT).await.unwrap();
        }
        for i in 0..3u64 {
            assert_eq!(rx.receive(TIMEOUT).await.unwrap(), i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn receive_on_empty_queue_times_out() {
        let (_tx, mut rx) = bounded::<u64>(1);
        let err = rx.receive(TIMEOUT).await.unwrap_err();
        assert_eq!(err, ChannelError::Timeout(TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn send_on_full_queue_times_out() {
        let (tx, _rx) = bounded(1);
        tx.send(1u64, TIMEOUT).await.unwrap();
        assert_eq!(tx.capacity(), 0);

        let err = tx.send(2u64, TIMEOUT).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn receive_after_senders_dropped_is_closed() {
        let (tx, mut rx) = bounded::<u64>(1);
        drop(tx);
        assert_eq!(rx.receive(TIMEOUT).await.unwrap_err(), ChannelError::Closed);
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_is_closed() {
        let (tx, rx) = bounded::<u64>(1);
        drop(rx);
        assert!(tx.is_closed());
        assert_eq!(tx.send(1, TIMEOUT).await.unwrap_err(), ChannelError::Closed);
    }

    #[tokio::test]
    async fn try_receive_does_not_wait() {
        let (tx, mut rx) = bounded(2);
        assert!(rx.try_receive().is_none());
        tx.send(9u64, TIMEOUT).await.unwrap();
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_receive(), Some(9));
        assert!(rx.is_empty());
    }
}
