//! Client end of a TELNET connection.

use crate::codec::{Reader, Verb, Writer, write_fully};
use crate::error::{CodedError, ErrorCode, TelnetResult};
use crate::line::{self, DataRead, DataWrite};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub const DEFAULT_ADDR: &str = "127.0.0.1:23";

/// How long [`call`] keeps printing server output after its input ends.
const LINGER: Duration = Duration::from_millis(500);

pub struct Connection {
    reader: Reader<OwnedReadHalf>,
    writer: Writer<OwnedWriteHalf>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl Connection {
    /// Connects over TCP. `None` or an empty address dials [`DEFAULT_ADDR`].
    pub async fn dial(addr: Option<&str>) -> TelnetResult<Self> {
        let addr = match addr {
            Some(addr) if !addr.is_empty() => addr,
            _ => DEFAULT_ADDR,
        };
        let stream = TcpStream::connect(addr).await.map_err(|err| {
            CodedError::new(ErrorCode::IoError, "Failed to connect")
                .with_details(format!("{addr}: {err}"))
        })?;
        tracing::debug!(addr = %addr, "Connected to telnet server");
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> TelnetResult<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: Reader::new(read_half),
            writer: Writer::new(write_half),
            peer_addr,
            local_addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> TelnetResult<usize> {
        self.reader.read(buf).await
    }

    pub async fn write(&mut self, data: &[u8]) -> TelnetResult<usize> {
        self.writer.write(data).await
    }

    pub async fn write_command(&mut self, verb: Verb, option: u8) -> TelnetResult<usize> {
        self.writer.write_command(verb, option).await
    }

    pub async fn read_line(&mut self) -> TelnetResult<String> {
        line::read_line(&mut self.reader).await
    }

    pub async fn write_line(&mut self, parts: &[&str]) -> TelnetResult<usize> {
        line::write_line(&mut self.writer, parts).await
    }

    /// Half-closes the connection; the server sees end of stream.
    pub async fn close(mut self) -> TelnetResult<()> {
        self.writer.shutdown().await
    }

    pub fn into_split(self) -> (Reader<OwnedReadHalf>, Writer<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl DataRead for Connection {
    async fn read(&mut self, buf: &mut [u8]) -> TelnetResult<usize> {
        self.reader.read(buf).await
    }
}

#[async_trait]
impl DataWrite for Connection {
    async fn write(&mut self, data: &[u8]) -> TelnetResult<usize> {
        self.writer.write(data).await
    }
}

/// Interactive caller: copies decoded server data to `output` while sending
/// every line of `input` terminated with CRLF.
///
/// Returns when the server closes, or shortly after `input` ends.
pub async fn call<I, O>(connection: Connection, input: I, output: O) -> TelnetResult<()>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = connection.into_split();
    let mut printer = tokio::spawn(async move {
        let mut output = output;
        let mut buf = [0u8; 1024];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, crate::error::TelnetError>(());
            }
            write_fully(&mut output, &buf[..n]).await?;
        }
    });

    let mut lines = input.lines();
    loop {
        tokio::select! {
            finished = &mut printer => return flatten(finished),
            line = lines.next_line() => match line? {
                Some(line) => {
                    writer.write(format!("{line}\r\n").as_bytes()).await?;
                }
                None => break,
            },
        }
    }

    writer.shutdown().await?;
    match tokio::time::timeout(LINGER, &mut printer).await {
        Ok(finished) => flatten(finished),
        Err(_) => {
            printer.abort();
            Ok(())
        }
    }
}

/// [`call`] over the process's stdin and stdout.
pub async fn call_stdio(connection: Connection) -> TelnetResult<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    call(connection, stdin, tokio::io::stdout()).await
}

fn flatten(
    finished: Result<TelnetResult<()>, tokio::task::JoinError>,
) -> TelnetResult<()> {
    finished.map_err(|err| {
        CodedError::new(ErrorCode::IoError, "Output task failed").with_details(err.to_string())
    })?
}
