//! Newline-delimited JSON framing over a local Unix socket.
//!
//! Every frame is one JSON value followed by `\n`. The host binds in the
//! server role and the bridge connects in the client role; both sides use
//! [`FramedConnection`] to read lines and [`FrameSender`] to write them.
//!
//! Writes go through an unbounded channel drained by a per-connection
//! writer task. Once the connection is closed a send logs a warning and is
//! dropped instead of failing the caller.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use bytes::{Buf, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::error::TransportError;

/// Size of a single socket read
const READ_CHUNK: usize = 8192;

/// Reassembles newline-terminated lines from arbitrary byte chunks.
///
/// A chunk can hold zero, one or many complete lines plus a trailing partial
/// line. The partial tail stays buffered until the rest of it arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Bytes of `buf` already searched for a newline
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete, non-blank line in it.
    ///
    /// Lines are decoded lossily so that invalid UTF-8 still reaches the
    /// JSON parser and is reported as a parse error.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let pos = self.scanned + offset;
            self.scanned = 0;
            let raw = self.buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&raw[..pos]);
            if line.trim().is_empty() {
                continue;
            }
            lines.push(line.trim_end_matches('\r').to_string());
        }
        self.scanned = self.buf.len();
        lines
    }

    /// Number of buffered bytes that do not yet form a complete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.advance(self.buf.len());
        self.scanned = 0;
    }
}

/// Per-connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            _ => Self::Closed,
        }
    }
}

#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Cloneable write handle for one connection.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<String>,
    state: Arc<SharedState>,
    peer: Arc<str>,
}

impl FrameSender {
    /// Serialize `message` and queue it as one frame.
    ///
    /// Returns `false` if the frame was dropped because the connection is
    /// no longer writable or the message could not be encoded.
    pub fn send<T: Serialize>(&self, message: &T) -> bool {
        if self.state.get() == ConnectionState::Closed {
            warn!(peer = %self.peer, "connection closed, dropping outgoing frame");
            return false;
        }

        let line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(e) => {
                warn!(peer = %self.peer, "failed to encode outgoing frame: {e}");
                return false;
            }
        };

        if self.tx.send(line).is_err() {
            self.state.set(ConnectionState::Closed);
            warn!(peer = %self.peer, "writer gone, dropping outgoing frame");
            return false;
        }
        true
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_open(&self) -> bool {
        self.state.get() == ConnectionState::Open
    }
}

/// Read side of a framed connection plus its writer task.
pub struct FramedConnection {
    reader: OwnedReadHalf,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    sender: FrameSender,
}

impl FramedConnection {
    /// Wrap an accepted or connected stream. Spawns the writer task.
    pub fn new(stream: UnixStream, peer: impl Into<Arc<str>>) -> Self {
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(SharedState(AtomicU8::new(ConnectionState::Open as u8)));
        let peer = peer.into();

        tokio::spawn(write_frames(writer, rx, state.clone(), peer.clone()));

        Self {
            reader,
            buffer: LineBuffer::new(),
            ready: VecDeque::new(),
            sender: FrameSender { tx, state, peer },
        }
    }

    /// Connect to `path` in the client role.
    pub async fn connect(path: &Path) -> Result<Self, TransportError> {
        debug!(path = %path.display(), state = ?ConnectionState::Connecting, "connecting");
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| TransportError::Connect {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::new(stream, path.display().to_string()))
    }

    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Next complete, non-blank line, or `None` once the peer hung up.
    ///
    /// Cancel safe: the only await point is a single socket read.
    pub async fn next_line(&mut self) -> Result<Option<String>, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(Some(line));
            }

            let n = match self.reader.read(&mut chunk).await {
                Ok(n) => n,
                Err(e) => {
                    self.close();
                    return Err(e.into());
                }
            };
            if n == 0 {
                if self.buffer.pending() > 0 {
                    debug!(
                        peer = %self.sender.peer,
                        bytes = self.buffer.pending(),
                        "discarding unterminated trailing data"
                    );
                }
                self.close();
                return Ok(None);
            }
            self.ready.extend(self.buffer.push(&chunk[..n]));
        }
    }

    /// Mark the connection closed and release buffered input.
    pub fn close(&mut self) {
        self.sender.state.set(ConnectionState::Closed);
        self.buffer.clear();
        self.ready.clear();
    }
}

async fn write_frames(
    writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
    state: Arc<SharedState>,
    peer: Arc<str>,
) {
    let mut writer = BufWriter::with_capacity(READ_CHUNK, writer);
    while let Some(line) = rx.recv().await {
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;

        if let Err(e) = result {
            warn!(peer = %peer, "socket write failed, closing writer: {e}");
            break;
        }
    }
    state.set(ConnectionState::Closed);
    let _ = writer.shutdown().await;
}

/// Bind the server socket, removing a stale socket file first.
pub fn bind(path: &Path) -> Result<UnixListener, TransportError> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "could not remove stale socket file: {e}"),
    }

    UnixListener::bind(path).map_err(|source| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_line_is_held_until_completed() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(br#"{"a":"#).is_empty());
        assert_eq!(buffer.pending(), 5);

        let lines = buffer.push(b"1}\n{\"b\":2}\n{\"c\"");
        assert_eq!(lines, vec![r#"{"a":1}"#, r#"{"b":2}"#]);
        assert_eq!(buffer.pending(), 4);
    }

    #[test]
    fn long_line_is_only_scanned_once() {
        let mut buffer = LineBuffer::new();
        for _ in 0..100 {
            assert!(buffer.push(&[b'a'; 64]).is_empty());
            assert_eq!(buffer.scanned, buffer.pending());
        }

        let lines = buffer.push(b"\n{\"next\"");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 6400);
        assert_eq!(buffer.pending(), 8);
        assert_eq!(buffer.scanned, 8);

        buffer.clear();
        assert_eq!(buffer.scanned, 0);
        assert_eq!(buffer.push(b":1}\n"), vec![":1}"]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"\n   \n{\"x\":1}\n\t\n");
        assert_eq!(lines, vec![r#"{"x":1}"#]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn invalid_utf8_still_produces_a_line() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(&[0xff, 0xfe, b'\n']);
        assert_eq!(lines.len(), 1);
        assert!(serde_json::from_str::<serde_json::Value>(&lines[0]).is_err());
    }

    #[tokio::test]
    async fn send_after_peer_close_is_a_logged_no_op() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut connection = FramedConnection::new(a, "test");
        let sender = connection.sender();
        drop(b);

        assert_eq!(connection.next_line().await.unwrap(), None);
        assert_eq!(sender.state(), ConnectionState::Closed);
        assert!(!sender.send(&serde_json::json!({"late": true})));
    }

    #[tokio::test]
    async fn frames_cross_a_socket_pair() {
        let (a, b) = UnixStream::pair().unwrap();
        let left = FramedConnection::new(a, "left");
        let mut right = FramedConnection::new(b, "right");

        assert!(left.sender().send(&serde_json::json!({"n": 1})));
        assert!(left.sender().send(&serde_json::json!({"n": 2})));

        assert_eq!(right.next_line().await.unwrap().as_deref(), Some(r#"{"n":1}"#));
        assert_eq!(right.next_line().await.unwrap().as_deref(), Some(r#"{"n":2}"#));
    }

    #[tokio::test]
    async fn bind_replaces_a_stale_socket_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.sock");
        std::fs::write(&path, b"leftover").unwrap();

        let listener = bind(&path).unwrap();
        drop(listener);
    }
}
