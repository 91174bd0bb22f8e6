// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapts the axum WebSocket transport to the uniform read/write contract
//! used by [`crate::client::Client`]. Deadlines are modeled with
//! `tokio::time::timeout` rather than socket-level deadlines, since axum's
//! `WebSocket` exposes an async `Sink`/`Stream` rather than a blocking
//! file descriptor.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time::error::Elapsed;

/// A single frame read off the wire, with control frames distinguished so the
/// caller doesn't need to inspect axum's `Message` variants directly.
#[derive(Debug)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(u16),
}

/// RFC 6455's "no status received" code, used when a peer closes without
/// sending a close frame at all.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Terminal outcome of a read, distinguishing a deadline timeout from a hard
/// transport error so the caller can tell a stale-but-alive connection apart
/// from one that has actually failed.
#[derive(Debug)]
pub enum ReadError {
    Timeout,
    Closed,
    Transport(axum::Error),
}

impl From<Elapsed> for ReadError {
    fn from(_: Elapsed) -> Self {
        Self::Timeout
    }
}

/// Read half of the connection. Owned exclusively by the client's read pump.
pub struct ConnectionReader {
    stream: SplitStream<WebSocket>,
}

/// Write half of the connection. Owned exclusively by the client's write pump,
/// so it never needs internal locking.
pub struct ConnectionWriter {
    sink: SplitSink<WebSocket, Message>,
}

/// Split a raw upgraded socket into read/write halves.
pub fn split(socket: WebSocket) -> (ConnectionReader, ConnectionWriter) {
    let (sink, stream) = socket.split();
    (ConnectionReader { stream }, ConnectionWriter { sink })
}

impl ConnectionReader {
    /// Read one frame, bounded by `deadline`. A deadline breach returns
    /// `ReadError::Timeout`, distinguishable from a hard transport failure so
    /// the read pump can treat it as "no pong handler fired in time" rather
    /// than a connection error.
    pub async fn read_message(&mut self, deadline: Duration) -> Result<Frame, ReadError> {
        let next = tokio::time::timeout(deadline, self.stream.next()).await?;
        match next {
            None => Err(ReadError::Closed),
            Some(Err(e)) => Err(ReadError::Transport(e)),
            Some(Ok(msg)) => Ok(match msg {
                Message::Text(text) => Frame::Text(text.to_string()),
                Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
                Message::Ping(bytes) => Frame::Ping(bytes.to_vec()),
                Message::Pong(bytes) => Frame::Pong(bytes.to_vec()),
                Message::Close(frame) => Frame::Close(frame.map_or(NO_STATUS_RECEIVED, |f| f.code)),
            }),
        }
    }
}

impl ConnectionWriter {
    /// Write a text data frame, bounded by `deadline`.
    pub async fn write_message(&mut self, text: String, deadline: Duration) -> Result<(), ReadError> {
        tokio::time::timeout(deadline, self.sink.send(Message::Text(text.into())))
            .await?
            .map_err(ReadError::Transport)
    }

    /// Write a ping control frame. Control frames share the same writer, so
    /// serialization with data frames is automatic — there is exactly one
    /// writer task per client.
    pub async fn write_ping(&mut self, deadline: Duration) -> Result<(), ReadError> {
        tokio::time::timeout(deadline, self.sink.send(Message::Ping(Vec::new().into())))
            .await?
            .map_err(ReadError::Transport)
    }

    /// Write a pong reply to a client-initiated ping.
    pub async fn write_pong(&mut self, payload: Vec<u8>, deadline: Duration) -> Result<(), ReadError> {
        tokio::time::timeout(deadline, self.sink.send(Message::Pong(payload.into())))
            .await?
            .map_err(ReadError::Transport)
    }

    /// Write a normal-closure close frame and flush, bounded by `deadline`.
    pub async fn write_close(&mut self, deadline: Duration) -> Result<(), ReadError> {
        let close = Message::Close(Some(axum::extract::ws::CloseFrame {
            code: 1000,
            reason: "ok".into(),
        }));
        let _ = tokio::time::timeout(deadline, self.sink.send(close)).await;
        let _ = tokio::time::timeout(deadline, self.sink.close()).await;
        Ok(())
    }
}

/// Classify a close code: 1000/1001/1006 are routine, the rest should be
/// logged at warning level by the caller.
pub fn is_routine_close_code(code: u16) -> bool {
    matches!(code, 1000 | 1001 | 1006)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routine_close_codes_are_recognized() {
        assert!(is_routine_close_code(1000));
        assert!(is_routine_close_code(1001));
        assert!(is_routine_close_code(1006));
        assert!(!is_routine_close_code(1011));
    }
}
