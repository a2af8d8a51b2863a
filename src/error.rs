use std::fmt;
use std::io;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    IoError,
    RemoteClosed,
    ProtocolCorrupted,
    Cancelled,
    TlsError,
    AlreadyServing,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl CodedError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum TelnetError {
    #[error("{0}")]
    Coded(CodedError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<CodedError> for TelnetError {
    fn from(value: CodedError) -> Self {
        Self::Coded(value)
    }
}

impl TelnetError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TelnetError::Coded(err) => err.error_code,
            TelnetError::Io(_) => ErrorCode::IoError,
            TelnetError::Regex(_) => ErrorCode::InvalidArgument,
        }
    }

    pub fn corrupted(byte: u8) -> Self {
        CodedError::new(ErrorCode::ProtocolCorrupted, "corrupted telnet stream")
            .with_details(format!("unexpected byte {byte} after IAC"))
            .into()
    }

    pub fn cancelled() -> Self {
        CodedError::new(ErrorCode::Cancelled, "connection cancelled").into()
    }

    pub fn remote_closed() -> Self {
        CodedError::new(ErrorCode::RemoteClosed, "connection closed by peer").into()
    }

    pub fn is_corrupted(&self) -> bool {
        self.code() == ErrorCode::ProtocolCorrupted
    }

    pub fn is_cancelled(&self) -> bool {
        self.code() == ErrorCode::Cancelled
    }

    /// Reproduces this error for readers that must keep reporting it.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            TelnetError::Coded(err) => TelnetError::Coded(err.clone()),
            TelnetError::Io(err) => TelnetError::Io(io::Error::new(err.kind(), err.to_string())),
            TelnetError::Regex(err) => TelnetError::Regex(err.clone()),
        }
    }
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::RemoteClosed => "REMOTE_CLOSED",
            ErrorCode::ProtocolCorrupted => "PROTOCOL_CORRUPTED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::TlsError => "TLS_ERROR",
            ErrorCode::AlreadyServing => "ALREADY_SERVING",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type TelnetResult<T> = Result<T, TelnetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_io_code() {
        let err: TelnetError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(err.code(), ErrorCode::IoError);
    }

    #[test]
    fn coded_error_display_includes_details() {
        let err = CodedError::new(ErrorCode::TlsError, "handshake failed").with_details("bad cert");
        assert_eq!(err.to_string(), "TLS_ERROR: handshake failed (bad cert)");
    }

    #[test]
    fn duplicate_preserves_code() {
        let err = TelnetError::corrupted(1);
        assert!(err.duplicate().is_corrupted());
    }
}
