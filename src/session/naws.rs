use crate::codec::{Command, Frame, OPT_NAWS, Reader, Verb};
use crate::error::{CodedError, ErrorCode, TelnetResult};
use tokio::io::AsyncRead;

/// Client terminal size reported through NAWS (RFC 1073).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl WindowSize {
    /// Decodes `<width hi> <width lo> <height hi> <height lo>`.
    pub fn from_payload(payload: &[u8]) -> TelnetResult<Self> {
        match payload {
            [w_hi, w_lo, h_hi, h_lo] => Ok(Self {
                cols: u16::from_be_bytes([*w_hi, *w_lo]),
                rows: u16::from_be_bytes([*h_hi, *h_lo]),
            }),
            _ => Err(CodedError::new(
                ErrorCode::ProtocolCorrupted,
                "invalid NAWS subnegotiation",
            )
            .with_details(format!("expected 4 payload bytes, got {}", payload.len()))
            .into()),
        }
    }

    /// Both dimensions known. Some clients report 0 for an unknown axis.
    pub fn is_complete(&self) -> bool {
        self.cols > 0 && self.rows > 0
    }
}

/// Consumes frames until the peer answers the DO NAWS request.
///
/// `None` means the peer does not report a size: it refused, closed the
/// stream or started sending data. A data byte is pushed back for the next
/// ordinary read.
pub(super) async fn await_reply<R: AsyncRead + Unpin>(
    reader: &mut Reader<R>,
) -> TelnetResult<Option<WindowSize>> {
    loop {
        let Some(frame) = reader.next_frame().await? else {
            tracing::debug!("Stream ended while waiting for NAWS");
            return Ok(None);
        };
        match frame {
            Frame::Negotiation(Command {
                verb: Verb::Wont,
                option: OPT_NAWS,
            }) => {
                tracing::debug!("Peer refused NAWS");
                return Ok(None);
            }
            Frame::Negotiation(command) => {
                tracing::trace!(?command, "Ignoring negotiation while waiting for NAWS");
            }
            Frame::Subnegotiation {
                option: OPT_NAWS,
                payload,
            } => return WindowSize::from_payload(&payload).map(Some),
            Frame::Subnegotiation { option, .. } => {
                tracing::trace!(option, "Skipping unrelated subnegotiation");
            }
            Frame::Data(byte) => {
                reader.unread(byte);
                return Ok(None);
            }
        }
    }
}
