use super::decoder::{Decoder, Frame};
use crate::error::{TelnetError, TelnetResult};
use std::collections::VecDeque;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Decodes application data from a TELNET wire stream.
///
/// Negotiation commands and subnegotiations are consumed and dropped by
/// [`Reader::read`]. Callers that need them (window size negotiation) pull
/// whole frames through [`Reader::next_frame`], which shares the same buffer
/// and decoder state.
///
/// When bytes were already decoded before an error occurs, `read` returns
/// those bytes and reports the error on the following call. A corrupted
/// stream stays corrupted: every later call fails with the same error.
pub struct Reader<R> {
    inner: BufReader<R>,
    decoder: Decoder,
    pending: VecDeque<u8>,
    deferred: Option<TelnetError>,
    poisoned: Option<TelnetError>,
}

impl<R: AsyncRead + Unpin> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            decoder: Decoder::new(),
            pending: VecDeque::new(),
            deferred: None,
            poisoned: None,
        }
    }

    /// Waits for at least one data byte. `Ok(0)` means the peer closed the
    /// stream between sequences.
    pub async fn read(&mut self, buf: &mut [u8]) -> TelnetResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let mut n = 0;
        while n < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }

        while n < buf.len() {
            if n > 0 && self.inner.buffer().is_empty() {
                break;
            }
            let available = match self.inner.fill_buf().await {
                Ok(bytes) => bytes,
                Err(err) => return defer(&mut self.deferred, n, err.into()),
            };
            if available.is_empty() {
                if self.decoder.is_idle() {
                    break;
                }
                return defer(&mut self.deferred, n, truncated_sequence());
            }

            let mut used = 0;
            let mut corrupt = None;
            for &byte in available {
                used += 1;
                match self.decoder.push(byte) {
                    Ok(Some(Frame::Data(value))) => {
                        buf[n] = value;
                        n += 1;
                        if n == buf.len() {
                            break;
                        }
                    }
                    Ok(Some(frame)) => {
                        tracing::trace!(?frame, "Discarding telnet negotiation");
                    }
                    Ok(None) => {}
                    Err(value) => {
                        corrupt = Some(value);
                        break;
                    }
                }
            }
            self.inner.consume(used);

            if let Some(value) = corrupt {
                let err = TelnetError::corrupted(value);
                self.poisoned = Some(err.duplicate());
                return defer(&mut self.deferred, n, err);
            }
        }

        Ok(n)
    }

    /// Next decoded frame, data included, in wire order. `None` at a clean end
    /// of stream.
    pub async fn next_frame(&mut self) -> TelnetResult<Option<Frame>> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        if let Some(byte) = self.pending.pop_front() {
            return Ok(Some(Frame::Data(byte)));
        }

        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if self.decoder.is_idle() {
                    return Ok(None);
                }
                return Err(truncated_sequence());
            }

            let mut used = 0;
            let mut outcome = None;
            for &byte in available {
                used += 1;
                match self.decoder.push(byte) {
                    Ok(Some(frame)) => {
                        outcome = Some(Ok(frame));
                        break;
                    }
                    Ok(None) => {}
                    Err(value) => {
                        outcome = Some(Err(value));
                        break;
                    }
                }
            }
            self.inner.consume(used);

            match outcome {
                Some(Ok(frame)) => return Ok(Some(frame)),
                Some(Err(value)) => {
                    let err = TelnetError::corrupted(value);
                    self.poisoned = Some(err.duplicate());
                    return Err(err);
                }
                None => {}
            }
        }
    }

    /// Returns a data byte taken by [`Reader::next_frame`] so the next read
    /// delivers it first.
    pub fn unread(&mut self, byte: u8) {
        self.pending.push_front(byte);
    }

    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    fn take_failure(&mut self) -> Option<TelnetError> {
        if let Some(err) = self.deferred.take() {
            return Some(err);
        }
        self.poisoned.as_ref().map(TelnetError::duplicate)
    }
}

fn defer(slot: &mut Option<TelnetError>, n: usize, err: TelnetError) -> TelnetResult<usize> {
    if n > 0 {
        *slot = Some(err);
        Ok(n)
    } else {
        Err(err)
    }
}

fn truncated_sequence() -> TelnetError {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "stream ended inside a telnet command",
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Command, DO, IAC, OPT_ECHO, OPT_NAWS, SB, SE, Verb, WILL, escape_iac};
    use tokio::io::AsyncReadExt;

    async fn read_to_end<R: AsyncRead + Unpin>(reader: &mut Reader<R>) -> TelnetResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn escaped_data_round_trips() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![IAC],
            vec![IAC; 2],
            vec![IAC; 3],
            vec![IAC; 4],
            vec![IAC; 5],
            b"apple\xffbanana\xffcherry".to_vec(),
            b"\xff\xffapple\xff\xffbanana\xff\xffcherry\xff\xff".to_vec(),
            (0u8..=255).collect(),
        ];
        for case in cases {
            let wire = escape_iac(&case);
            let mut reader = Reader::new(&wire[..]);
            let decoded = read_to_end(&mut reader).await.expect("decode");
            assert_eq!(decoded, case);
        }
    }

    #[tokio::test]
    async fn negotiation_is_stripped_in_order() {
        let wire = [
            b'h', IAC, DO, OPT_ECHO, b'e', b'l', IAC, DO, OPT_NAWS, b'l', b'o', IAC, WILL, 3,
        ];
        let mut reader = Reader::new(&wire[..]);
        assert_eq!(read_to_end(&mut reader).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn subnegotiation_with_doubled_iac_is_stripped() {
        let wire = [b'a', IAC, SB, 24, 1, IAC, IAC, 2, IAC, SE, b'b', b'c'];
        let mut reader = Reader::new(&wire[..]);
        assert_eq!(read_to_end(&mut reader).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn sequences_split_across_reads_are_reassembled() {
        let first = [b'a', IAC];
        let second = [IAC, b'b', IAC, SB, OPT_NAWS, 0];
        let third = [80, 0, 24, IAC, SE, b'c'];
        let stream = (&first[..]).chain(&second[..]).chain(&third[..]);
        let mut reader = Reader::new(stream);
        assert_eq!(read_to_end(&mut reader).await.unwrap(), vec![b'a', IAC, b'b', b'c']);
    }

    #[tokio::test]
    async fn corruption_is_terminal() {
        let wire = [IAC, 0x01, b'x'];
        let mut reader = Reader::new(&wire[..]);
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.is_corrupted());
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.is_corrupted());
    }

    #[tokio::test]
    async fn corruption_after_data_is_deferred() {
        let wire = [b'o', b'k', IAC, 0x01, b'x'];
        let mut reader = Reader::new(&wire[..]);
        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ok");
        let err = reader.read(&mut buf).await.unwrap_err();
        assert!(err.is_corrupted());
    }

    #[tokio::test]
    async fn truncated_command_is_an_error() {
        let wire = [b'a', IAC, DO];
        let mut reader = Reader::new(&wire[..]);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        match reader.read(&mut buf).await.unwrap_err() {
            TelnetError::Io(err) => assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn next_frame_yields_commands_and_unread_restores_data() {
        let wire = [IAC, WILL, OPT_NAWS, b'q'];
        let mut reader = Reader::new(&wire[..]);
        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some(Frame::Negotiation(Command::new(Verb::Will, OPT_NAWS)))
        );
        let frame = reader.next_frame().await.unwrap();
        assert_eq!(frame, Some(Frame::Data(b'q')));
        reader.unread(b'q');
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], b'q');
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }
}
