//! Client errors and the numeric codes surfaced to binding layers

use std::fmt;

use thiserror::Error;

use crate::codec::{ActivationCode, CodecError, NackCode};

/// Result type alias for DoIP client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error codes surfaced across the binding boundary.
///
/// The numbering is stable; bindings compare against these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    InvalidArgument = 1,
    ConnectFailed = 2,
    UnexpectedResponse = 3,
    Io = 4,
    ConvertError = 5,
    InvalidClientLogicalAddr = 6,
    InternalError = 7,
    ParseError = 8,
    DiagnosticMessageNegativeAck = 9,
    RoutingActivationDenied = 10,
    RoutingActivationWithDifferentClientAddress = 11,
    Eof = 12,
    Timeout = 13,
    NullPointerPassed = 14,
}

impl TryFrom<u8> for ErrorCode {
    type Error = ClientError;

    fn try_from(value: u8) -> Result<Self> {
        let code = match value {
            0 => Self::Ok,
            1 => Self::InvalidArgument,
            2 => Self::ConnectFailed,
            3 => Self::UnexpectedResponse,
            4 => Self::Io,
            5 => Self::ConvertError,
            6 => Self::InvalidClientLogicalAddr,
            7 => Self::InternalError,
            8 => Self::ParseError,
            9 => Self::DiagnosticMessageNegativeAck,
            10 => Self::RoutingActivationDenied,
            11 => Self::RoutingActivationWithDifferentClientAddress,
            12 => Self::Eof,
            13 => Self::Timeout,
            14 => Self::NullPointerPassed,
            other => {
                return Err(ClientError::Convert(format!(
                    "no error code with value {}",
                    other
                )))
            }
        };
        Ok(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as u8)
    }
}

/// Errors returned by the DoIP client
///
/// Transport failures carry their cause as a string so one failure can be
/// fanned out to every pending exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Rejected before any I/O was attempted
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// TCP connect failed or the engine is not running
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    /// The gateway answered with something the operation did not expect
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// A numeric value could not be converted into a protocol type
    #[error("Conversion error: {0}")]
    Convert(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// A frame received from the gateway could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Diagnostic message negative acknowledge: {0}")]
    DiagnosticMessageNegativeAck(NackCode),

    #[error("Routing activation denied: {0}")]
    RoutingActivationDenied(ActivationCode),

    #[error(
        "Routing activation answered for client 0x{actual:04X}, expected 0x{expected:04X}"
    )]
    RoutingActivationWithDifferentClientAddress { expected: u16, actual: u16 },

    /// The gateway closed the connection
    #[error("Connection closed by peer")]
    Eof,

    #[error("Operation timed out")]
    Timeout,
}

impl ClientError {
    /// The boundary code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::ConnectFailed(_) => ErrorCode::ConnectFailed,
            Self::UnexpectedResponse(_) => ErrorCode::UnexpectedResponse,
            Self::Io(_) => ErrorCode::Io,
            Self::Convert(_) => ErrorCode::ConvertError,
            Self::Internal(_) => ErrorCode::InternalError,
            Self::Parse(_) => ErrorCode::ParseError,
            Self::DiagnosticMessageNegativeAck(_) => ErrorCode::DiagnosticMessageNegativeAck,
            Self::RoutingActivationDenied(_) => ErrorCode::RoutingActivationDenied,
            Self::RoutingActivationWithDifferentClientAddress { .. } => {
                ErrorCode::RoutingActivationWithDifferentClientAddress
            }
            Self::Eof => ErrorCode::Eof,
            Self::Timeout => ErrorCode::Timeout,
        }
    }

    /// Whether the session is unusable after this error
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Eof | Self::ConnectFailed(_))
    }

    pub(crate) fn engine_stopped() -> Self {
        Self::ConnectFailed("background engine is not running".to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::Eof,
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_numbering_is_stable() {
        assert_eq!(ErrorCode::Ok as u8, 0);
        assert_eq!(ErrorCode::DiagnosticMessageNegativeAck as u8, 9);
        assert_eq!(ErrorCode::Eof as u8, 12);
        assert_eq!(ErrorCode::NullPointerPassed as u8, 14);

        for value in 0..=14u8 {
            let code = ErrorCode::try_from(value).unwrap();
            assert_eq!(code as u8, value);
        }
        assert!(matches!(
            ErrorCode::try_from(15),
            Err(ClientError::Convert(_))
        ));
    }

    #[test]
    fn test_client_error_codes() {
        assert_eq!(ClientError::Timeout.code(), ErrorCode::Timeout);
        assert_eq!(ClientError::Eof.code(), ErrorCode::Eof);
        assert_eq!(
            ClientError::RoutingActivationWithDifferentClientAddress {
                expected: 0x0E00,
                actual: 0x0E01
            }
            .code(),
            ErrorCode::RoutingActivationWithDifferentClientAddress
        );
        assert_eq!(
            ClientError::DiagnosticMessageNegativeAck(NackCode(0x03)).code(),
            ErrorCode::DiagnosticMessageNegativeAck
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(ClientError::from(eof), ClientError::Eof);

        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(ClientError::from(reset), ClientError::Io(_)));
    }

    #[test]
    fn test_terminal_errors() {
        assert!(ClientError::Eof.is_terminal());
        assert!(ClientError::Io("broken pipe".into()).is_terminal());
        assert!(!ClientError::Timeout.is_terminal());
        assert!(!ClientError::DiagnosticMessageNegativeAck(NackCode(0x02)).is_terminal());
    }
}
