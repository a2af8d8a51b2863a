mod naws;

use crate::codec::{CR, LF, OPT_NAWS, Reader, Verb, Writer};
use crate::error::{TelnetError, TelnetResult};
use crate::line::{self, DataRead, DataWrite};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use naws::WindowSize;

pub const DEFAULT_NAWS_TIMEOUT: Duration = Duration::from_secs(2);

/// Bidirectional byte stream a session runs over (TCP, TLS or in-memory).
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxTransport = Box<dyn Transport>;

/// One TELNET connection as seen by a handler.
///
/// Reads return decoded application data only; writes are escaped. Every I/O
/// call races the lifecycle token and fails with `Cancelled` once it fires.
pub struct Session {
    id: Uuid,
    peer: String,
    token: CancellationToken,
    reader: Reader<ReadHalf<BoxTransport>>,
    writer: Writer<WriteHalf<BoxTransport>>,
    line_discipline: bool,
    naws_timeout: Duration,
    window_size: Option<WindowSize>,
}

impl Session {
    pub fn new(transport: BoxTransport, peer: impl Into<String>, token: CancellationToken) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);
        Self {
            id: Uuid::new_v4(),
            peer: peer.into(),
            token,
            reader: Reader::new(read_half),
            writer: Writer::new(write_half),
            line_discipline: false,
            naws_timeout: DEFAULT_NAWS_TIMEOUT,
            window_size: None,
        }
    }

    pub fn with_line_discipline(mut self, enabled: bool) -> Self {
        self.line_discipline = enabled;
        self
    }

    pub fn with_naws_timeout(mut self, timeout: Duration) -> Self {
        self.naws_timeout = timeout;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn window_size(&self) -> Option<WindowSize> {
        self.window_size
    }

    pub fn has_window_size(&self) -> bool {
        self.window_size.is_some_and(|size| size.is_complete())
    }

    /// Enables LF to CRLF rewriting on outbound data. There is no terminal
    /// mode negotiation, so this is a coarse stand-in for a PTY.
    pub fn set_line_discipline(&mut self, enabled: bool) {
        self.line_discipline = enabled;
    }

    pub fn line_discipline(&self) -> bool {
        self.line_discipline
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> TelnetResult<usize> {
        guarded(&self.token, self.reader.read(buf)).await
    }

    /// Writes application data. With line discipline enabled the returned
    /// count never exceeds `data.len()`, even though more bytes hit the wire.
    pub async fn write(&mut self, data: &[u8]) -> TelnetResult<usize> {
        if !self.line_discipline {
            return guarded(&self.token, self.writer.write(data)).await;
        }
        let normalized = normalize_newlines(data);
        let written = guarded(&self.token, self.writer.write(&normalized)).await?;
        Ok(written.min(data.len()))
    }

    pub async fn write_command(&mut self, verb: Verb, option: u8) -> TelnetResult<usize> {
        guarded(&self.token, self.writer.write_command(verb, option)).await
    }

    pub async fn read_line(&mut self) -> TelnetResult<String> {
        line::read_line(self).await
    }

    pub async fn write_line(&mut self, parts: &[&str]) -> TelnetResult<usize> {
        line::write_line(self, parts).await
    }

    /// Sends `IAC DO NAWS` and waits up to the NAWS timeout for the answer.
    ///
    /// A peer that refuses, stays silent, closes, or sends data instead is
    /// not an error: the result is `Ok(None)`. Must complete before the
    /// handler starts ordinary reads on this session.
    pub async fn request_window_size(&mut self) -> TelnetResult<Option<WindowSize>> {
        self.write_command(Verb::Do, OPT_NAWS).await?;

        let peer = self.peer.as_str();
        let wait = tokio::time::timeout(self.naws_timeout, naws::await_reply(&mut self.reader));
        let reply = guarded(&self.token, async {
            match wait.await {
                Ok(reply) => reply,
                Err(_) => {
                    tracing::debug!(peer = %peer, "No NAWS reply before timeout");
                    Ok(None)
                }
            }
        })
        .await?;

        if let Some(size) = reply {
            tracing::debug!(peer = %self.peer, cols = size.cols, rows = size.rows, "Window size negotiated");
            self.window_size = Some(size);
        }
        Ok(reply)
    }

    /// Shuts down the write side. Dropping the session closes the transport.
    pub async fn close(mut self) -> TelnetResult<()> {
        self.writer.shutdown().await
    }
}

#[async_trait]
impl DataRead for Session {
    async fn read(&mut self, buf: &mut [u8]) -> TelnetResult<usize> {
        Session::read(self, buf).await
    }
}

#[async_trait]
impl DataWrite for Session {
    async fn write(&mut self, data: &[u8]) -> TelnetResult<usize> {
        Session::write(self, data).await
    }
}

async fn guarded<T>(
    token: &CancellationToken,
    operation: impl Future<Output = TelnetResult<T>>,
) -> TelnetResult<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(TelnetError::cancelled()),
        result = operation => result,
    }
}

/// Prefixes CR to every LF that does not already follow one.
fn normalize_newlines(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 8);
    let mut previous = None;
    for &byte in data {
        if byte == LF && previous != Some(CR) {
            out.push(CR);
        }
        out.push(byte);
        previous = Some(byte);
    }
    out
}
