//! Line oriented helpers over any decoded TELNET stream.
//!
//! `read_line` pulls one byte at a time until LF, so it never reads past the
//! end of a line. It cannot return a prompt that lacks a trailing newline.

use crate::codec::{CR, LF, Reader, Writer};
use crate::error::{TelnetError, TelnetResult};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Source of decoded application data.
#[async_trait]
pub trait DataRead: Send {
    async fn read(&mut self, buf: &mut [u8]) -> TelnetResult<usize>;
}

/// Sink for application data; implementors escape IAC.
#[async_trait]
pub trait DataWrite: Send {
    async fn write(&mut self, data: &[u8]) -> TelnetResult<usize>;
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> DataRead for Reader<R> {
    async fn read(&mut self, buf: &mut [u8]) -> TelnetResult<usize> {
        Reader::read(self, buf).await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> DataWrite for Writer<W> {
    async fn write(&mut self, data: &[u8]) -> TelnetResult<usize> {
        Writer::write(self, data).await
    }
}

/// Reads through the next LF. A trailing CRLF is removed, a bare LF is kept.
/// End of stream before LF is `RemoteClosed` and the partial line is lost.
pub async fn read_line<R: DataRead + ?Sized>(reader: &mut R) -> TelnetResult<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = reader.read(&mut byte).await?;
        if n == 0 {
            return Err(TelnetError::remote_closed());
        }
        line.push(byte[0]);
        if byte[0] == LF {
            break;
        }
    }
    if line.ends_with(&[CR, LF]) {
        line.truncate(line.len() - 2);
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Concatenates `parts` and sends them as a single write. No newline is added.
pub async fn write_line<W: DataWrite + ?Sized>(writer: &mut W, parts: &[&str]) -> TelnetResult<usize> {
    let text = parts.concat();
    writer.write(text.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DO, IAC, OPT_NAWS};
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn read_line_strips_crlf_only() {
        let wire = b"first\r\nsecond\nthird\r\r\n";
        let mut reader = Reader::new(&wire[..]);
        assert_eq!(read_line(&mut reader).await.unwrap(), "first");
        assert_eq!(read_line(&mut reader).await.unwrap(), "second\n");
        assert_eq!(read_line(&mut reader).await.unwrap(), "third\r");
    }

    #[tokio::test]
    async fn read_line_skips_negotiation() {
        let wire = [b'l', IAC, DO, OPT_NAWS, b's', b'\r', b'\n'];
        let mut reader = Reader::new(&wire[..]);
        assert_eq!(read_line(&mut reader).await.unwrap(), "ls");
    }

    #[tokio::test]
    async fn read_line_without_newline_reports_close() {
        let wire = b"login: ";
        let mut reader = Reader::new(&wire[..]);
        let err = read_line(&mut reader).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::RemoteClosed);
    }

    #[tokio::test]
    async fn write_line_concatenates_once() {
        let mut writer = Writer::new(Vec::new());
        let n = write_line(&mut writer, &["cmd", ": command not found\n"])
            .await
            .unwrap();
        assert_eq!(n, 23);
        assert_eq!(writer.get_ref().as_slice(), b"cmd: command not found\n");
    }
}
