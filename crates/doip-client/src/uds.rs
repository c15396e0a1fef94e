//! UDS payload helpers
//!
//! The engine only needs to recognise negative responses, in particular
//! "response pending" (NRC 0x78). Everything else about UDS service data is
//! left to the caller.

use std::fmt;

use crate::codec::DIAGNOSTIC_PREFIX_LEN;

/// Service identifier of a UDS negative response
pub const NEGATIVE_RESPONSE_SID: u8 = 0x7F;

/// Offset added to a request SID in its positive response
pub const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// UDS Negative Response Codes the client reports by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    GeneralReject,
    ServiceNotSupported,
    SubFunctionNotSupported,
    IncorrectMessageLengthOrFormat,
    BusyRepeatRequest,
    ConditionsNotCorrect,
    RequestSequenceError,
    RequestOutOfRange,
    SecurityAccessDenied,
    InvalidKey,
    ExceededNumberOfAttempts,
    RequiredTimeDelayNotExpired,
    ResponsePending,
    SubFunctionNotSupportedInActiveSession,
    ServiceNotSupportedInActiveSession,
    Unknown(u8),
}

impl From<u8> for NegativeResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLengthOrFormat,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceededNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x78 => Self::ResponsePending,
            0x7E => Self::SubFunctionNotSupportedInActiveSession,
            0x7F => Self::ServiceNotSupportedInActiveSession,
            other => Self::Unknown(other),
        }
    }
}

impl From<NegativeResponseCode> for u8 {
    fn from(nrc: NegativeResponseCode) -> Self {
        match nrc {
            NegativeResponseCode::GeneralReject => 0x10,
            NegativeResponseCode::ServiceNotSupported => 0x11,
            NegativeResponseCode::SubFunctionNotSupported => 0x12,
            NegativeResponseCode::IncorrectMessageLengthOrFormat => 0x13,
            NegativeResponseCode::BusyRepeatRequest => 0x21,
            NegativeResponseCode::ConditionsNotCorrect => 0x22,
            NegativeResponseCode::RequestSequenceError => 0x24,
            NegativeResponseCode::RequestOutOfRange => 0x31,
            NegativeResponseCode::SecurityAccessDenied => 0x33,
            NegativeResponseCode::InvalidKey => 0x35,
            NegativeResponseCode::ExceededNumberOfAttempts => 0x36,
            NegativeResponseCode::RequiredTimeDelayNotExpired => 0x37,
            NegativeResponseCode::ResponsePending => 0x78,
            NegativeResponseCode::SubFunctionNotSupportedInActiveSession => 0x7E,
            NegativeResponseCode::ServiceNotSupportedInActiveSession => 0x7F,
            NegativeResponseCode::Unknown(v) => v,
        }
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let desc = match self {
            Self::GeneralReject => "General reject",
            Self::ServiceNotSupported => "Service not supported",
            Self::SubFunctionNotSupported => "Sub-function not supported",
            Self::IncorrectMessageLengthOrFormat => "Incorrect message length or format",
            Self::BusyRepeatRequest => "Busy, repeat request",
            Self::ConditionsNotCorrect => "Conditions not correct",
            Self::RequestSequenceError => "Request sequence error",
            Self::RequestOutOfRange => "Request out of range",
            Self::SecurityAccessDenied => "Security access denied",
            Self::InvalidKey => "Invalid key",
            Self::ExceededNumberOfAttempts => "Exceeded number of attempts",
            Self::RequiredTimeDelayNotExpired => "Required time delay not expired",
            Self::ResponsePending => "Response pending",
            Self::SubFunctionNotSupportedInActiveSession => {
                "Sub-function not supported in active session"
            }
            Self::ServiceNotSupportedInActiveSession => "Service not supported in active session",
            Self::Unknown(code) => return write!(f, "Unknown NRC 0x{:02X}", code),
        };
        f.write_str(desc)
    }
}

/// A parsed negative response: `7F <sid> <nrc>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegativeResponse {
    pub service_id: u8,
    pub nrc: NegativeResponseCode,
}

impl NegativeResponse {
    pub fn parse(uds: &[u8]) -> Option<Self> {
        match uds {
            [NEGATIVE_RESPONSE_SID, service_id, nrc, ..] => Some(Self {
                service_id: *service_id,
                nrc: NegativeResponseCode::from(*nrc),
            }),
            _ => None,
        }
    }
}

/// Whether a UDS payload is an interim "response pending" answer
pub fn is_response_pending(uds: &[u8]) -> bool {
    NegativeResponse::parse(uds)
        .is_some_and(|resp| resp.nrc == NegativeResponseCode::ResponsePending)
}

/// Strip the 12-byte DoIP prefix from a received diagnostic frame
pub fn uds_payload(frame: &[u8]) -> &[u8] {
    frame.get(DIAGNOSTIC_PREFIX_LEN..).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_pending_detection() {
        assert!(is_response_pending(&[0x7F, 0x31, 0x78]));
        assert!(!is_response_pending(&[0x7F, 0x31, 0x22]));
        assert!(!is_response_pending(&[0x71, 0x01, 0xFF, 0x00]));
        assert!(!is_response_pending(&[0x7F, 0x31]));
    }

    #[test]
    fn test_negative_response_parse() {
        let resp = NegativeResponse::parse(&[0x7F, 0x27, 0x35]).unwrap();
        assert_eq!(resp.service_id, 0x27);
        assert_eq!(resp.nrc, NegativeResponseCode::InvalidKey);
        assert_eq!(u8::from(resp.nrc), 0x35);
        assert_eq!(NegativeResponse::parse(&[0x62, 0xF1, 0x90]), None);
    }

    #[test]
    fn test_uds_payload_strips_prefix() {
        let frame = [
            0x02, 0xFD, 0x80, 0x01, 0x00, 0x00, 0x00, 0x07, 0x06, 0x80, 0x0E, 0x00, 0x50, 0x03,
            0x00,
        ];
        assert_eq!(uds_payload(&frame), &[0x50, 0x03, 0x00]);
        assert!(uds_payload(&frame[..6]).is_empty());
    }

    #[test]
    fn test_unknown_nrc_display() {
        assert_eq!(
            NegativeResponseCode::from(0xF3).to_string(),
            "Unknown NRC 0xF3"
        );
    }
}
