use super::{Command, Verb, escape_iac};
use crate::error::TelnetResult;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// One outbound unit. Data is escaped, commands go out verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound<'a> {
    Data(&'a [u8]),
    Command(Command),
}

/// Escaping writer over the transport's write half.
///
/// Every call writes and flushes its whole wire encoding before returning, so
/// a command can never land in the middle of a data write.
pub struct Writer<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Returns the number of input bytes consumed: `data.len()` for data
    /// regardless of how many IAC bytes were doubled, 3 for a command.
    pub async fn send(&mut self, item: Outbound<'_>) -> TelnetResult<usize> {
        match item {
            Outbound::Data(data) => {
                if data.is_empty() {
                    return Ok(0);
                }
                let wire = escape_iac(data);
                write_fully(&mut self.inner, &wire).await?;
                Ok(data.len())
            }
            Outbound::Command(command) => {
                let wire = command.to_bytes();
                write_fully(&mut self.inner, &wire).await?;
                Ok(wire.len())
            }
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> TelnetResult<usize> {
        self.send(Outbound::Data(data)).await
    }

    pub async fn write_command(&mut self, verb: Verb, option: u8) -> TelnetResult<usize> {
        self.send(Outbound::Command(Command::new(verb, option)))
            .await
    }

    pub async fn shutdown(&mut self) -> TelnetResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Writes all of `bytes`, retrying short writes, then flushes. Fails only when
/// the transport errors or stops accepting bytes.
pub async fn write_fully<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    bytes: &[u8],
) -> TelnetResult<()> {
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IAC, OPT_ECHO, WILL};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[tokio::test]
    async fn writer_escapes_data() {
        let cases: Vec<(&[u8], &[u8])> = vec![
            (b"", b""),
            (b"apple", b"apple"),
            (b"apple banana cherry", b"apple banana cherry"),
            (b"\xff", b"\xff\xff"),
            (b"\xff\xff", b"\xff\xff\xff\xff"),
            (b"\xff\xff\xff", b"\xff\xff\xff\xff\xff\xff"),
            (b"apple\xffbanana\xffcherry", b"apple\xff\xffbanana\xff\xffcherry"),
            (
                b"\xffapple\xffbanana\xffcherry\xff",
                b"\xff\xffapple\xff\xffbanana\xff\xffcherry\xff\xff",
            ),
        ];

        for (index, (input, expected)) in cases.into_iter().enumerate() {
            let mut writer = Writer::new(Vec::new());
            let n = writer.write(input).await.expect("write");
            assert_eq!(n, input.len(), "case #{index}");
            assert_eq!(writer.get_ref().as_slice(), expected, "case #{index}");
        }
    }

    #[tokio::test]
    async fn writer_emits_raw_command() {
        let mut writer = Writer::new(Vec::new());
        let n = writer.write_command(Verb::Will, OPT_ECHO).await.unwrap();
        assert_eq!(n, 3);
        assert_eq!(writer.get_ref().as_slice(), &[IAC, WILL, OPT_ECHO]);
    }

    #[tokio::test]
    async fn command_and_data_stay_separate() {
        let mut writer = Writer::new(Vec::new());
        writer.send(Outbound::Data(&[IAC, IAC, IAC, IAC])).await.unwrap();
        writer
            .send(Outbound::Command(Command::new(Verb::Will, OPT_ECHO)))
            .await
            .unwrap();
        let mut expected = vec![IAC; 8];
        expected.extend([IAC, WILL, OPT_ECHO]);
        assert_eq!(writer.into_inner(), expected);
    }

    /// Accepts at most one byte per call.
    struct Trickle(Vec<u8>);

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            match buf.first() {
                Some(&byte) => {
                    self.0.push(byte);
                    Poll::Ready(Ok(1))
                }
                None => Poll::Ready(Ok(0)),
            }
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn short_writes_are_retried() {
        let mut writer = Writer::new(Trickle(Vec::new()));
        let n = writer.write(b"ab\xffcd").await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(writer.into_inner().0, b"ab\xff\xffcd");
    }

    /// Never accepts a byte.
    struct Stuck;

    impl AsyncWrite for Stuck {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn write_without_progress_fails() {
        let mut writer = Writer::new(Stuck);
        let err = writer.write(b"data").await.unwrap_err();
        match err {
            crate::error::TelnetError::Io(err) => assert_eq!(err.kind(), io::ErrorKind::WriteZero),
            other => panic!("unexpected error {other}"),
        }
    }
}
