//! Channels over byte streams, one JSON frame per message.
//!
//! Lets the relay and the monitor talk to peers in other processes over
//! sockets or pipes with the same bounded-time semantics as the in-process
//! queue. Each frame is a 4-byte big-endian length followed by the JSON body.
//!
//! Back-pressure comes from the underlying stream: a peer that stops reading
//! eventually makes `send` time out. A timed-out send leaves nothing behind,
//! so the message is really gone. If the stream had already taken part of the
//! frame, the framing is lost and the sender reports a transport error from
//! then on.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::bytes::Bytes;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use super::{ChannelError, Receiver, Sender};

/// Frames larger than this are refused on both ends.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

const LENGTH_FIELD_LENGTH: usize = 4;

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_FIELD_LENGTH)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

fn transport_error(e: std::io::Error) -> ChannelError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::UnexpectedEof => ChannelError::Closed,
        _ => ChannelError::Transport(e.to_string()),
    }
}

struct Writer<W> {
    frames: FramedWrite<W, LengthDelimitedCodec>,
    /// Set once the stream can no longer be trusted to be frame-aligned.
    broken: Option<ChannelError>,
}

impl<W> Writer<W> {
    fn fail(&mut self, e: ChannelError) -> ChannelError {
        self.broken = Some(e.clone());
        e
    }
}

pub struct FramedSender<W, T> {
    writer: Mutex<Writer<W>>,
    _message: std::marker::PhantomData<fn(T)>,
}

impl<W: AsyncWrite + Unpin, T: Serialize> FramedSender<W, T> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(Writer {
                frames: FramedWrite::new(writer, frame_codec()),
                broken: None,
            }),
            _message: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<W, T> Sender<T> for FramedSender<W, T>
where
    W: AsyncWrite + Unpin + Send + 'static,
    T: Serialize + Send + 'static,
{
    async fn send(&self, msg: T, timeout: Duration) -> Result<(), ChannelError> {
        let body = serde_json::to_vec(&msg).map_err(|e| ChannelError::Transport(e.to_string()))?;
        if body.len() > MAX_FRAME_LENGTH {
            return Err(ChannelError::Transport(format!(
                "frame of {} bytes exceeds the {MAX_FRAME_LENGTH} byte limit",
                body.len()
            )));
        }
        let frame_len = LENGTH_FIELD_LENGTH + body.len();

        // Waiting for the writer lock counts against the same deadline.
        let deadline = Instant::now() + timeout;
        let Ok(mut writer) = tokio::time::timeout_at(deadline, self.writer.lock()).await else {
            return Err(ChannelError::Timeout(timeout));
        };
        if let Some(e) = &writer.broken {
            return Err(e.clone());
        }

        // The write buffer is empty here: every earlier send either flushed
        // it or cleared it.
        if let Err(e) = writer.frames.feed(Bytes::from(body)).await {
            let e = transport_error(e);
            return Err(writer.fail(e));
        }

        match tokio::time::timeout_at(deadline, SinkExt::<Bytes>::flush(&mut writer.frames)).await {
            Ok(Ok(())) => {
                tracing::trace!(frame_len, "Wrote frame");
                Ok(())
            }
            Ok(Err(e)) => {
                let e = transport_error(e);
                Err(writer.fail(e))
            }
            Err(_) => {
                let untouched = writer.frames.write_buffer().len() == frame_len;
                writer.frames.write_buffer_mut().clear();
                if untouched {
                    Err(ChannelError::Timeout(timeout))
                } else {
                    tracing::error!(frame_len, "Frame partially written before timeout");
                    Err(writer.fail(ChannelError::Transport(
                        "frame partially written before timeout".to_string(),
                    )))
                }
            }
        }
    }
}

pub struct FramedReceiver<R, T> {
    frames: FramedRead<R, LengthDelimitedCodec>,
    _message: std::marker::PhantomData<fn() -> T>,
}

impl<R: AsyncRead + Unpin, T: DeserializeOwned> FramedReceiver<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            frames: FramedRead::new(reader, frame_codec()),
            _message: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<R, T> Receiver<T> for FramedReceiver<R, T>
where
    R: AsyncRead + Unpin + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    async fn receive(&mut self, timeout: Duration) -> Result<T, ChannelError> {
        let frame = match tokio::time::timeout(timeout, self.frames.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => return Err(transport_error(e)),
            Ok(None) => return Err(ChannelError::Closed),
            Err(_) => return Err(ChannelError::Timeout(timeout)),
        };
        serde_json::from_slice(&frame).map_err(|e| ChannelError::Transport(format!("bad frame: {e}")))
    }
}
