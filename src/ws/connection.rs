//! Transport-agnostic duplex connection halves.
//!
//! A session runs its read loop and write loop concurrently, so the
//! connection is modelled as two independently owned halves:
//! [`FrameReader`] and [`FrameWriter`]. [`split_websocket`] adapts an axum
//! [`WebSocket`]; tests use in-memory channel pairs.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::error::ConnectionError;

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The session was unregistered or the server is shutting down.
    Normal,
    /// Nothing was written within the idle window.
    IdleTimeout,
}

impl CloseReason {
    /// Reason text carried in the close frame.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "",
            Self::IdleTimeout => "timeout",
        }
    }
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Reads the next data frame. Returns `Ok(None)` once the peer has
    /// closed the connection.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] if the connection broke.
    async fn read_frame(&mut self) -> Result<Option<Bytes>, ConnectionError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] if the connection broke.
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), ConnectionError>;

    /// Sends a close frame and shuts the outbound half.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectionError`] if the connection broke.
    async fn close(&mut self, reason: CloseReason) -> Result<(), ConnectionError>;
}

/// Read half of an axum WebSocket.
#[derive(Debug)]
pub struct WsFrameReader(SplitStream<WebSocket>);

/// Write half of an axum WebSocket.
#[derive(Debug)]
pub struct WsFrameWriter(SplitSink<WebSocket, Message>);

/// Splits an upgraded socket into frame halves.
#[must_use]
pub fn split_websocket(socket: WebSocket) -> (WsFrameReader, WsFrameWriter) {
    let (sink, stream) = socket.split();
    (WsFrameReader(stream), WsFrameWriter(sink))
}

#[async_trait]
impl FrameReader for WsFrameReader {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Bytes::copy_from_slice(text.as_str().as_bytes())));
                }
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }
}

#[async_trait]
impl FrameWriter for WsFrameWriter {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), ConnectionError> {
        let message = if let Ok(text) = std::str::from_utf8(&frame) {
            Message::text(text)
        } else {
            Message::Binary(frame)
        };
        self.0.send(message).await?;
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), ConnectionError> {
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: reason.as_str().into(),
        };
        self.0.send(Message::Close(Some(frame))).await?;
        self.0.close().await?;
        Ok(())
    }
}
