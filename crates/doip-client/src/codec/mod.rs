//! DoIP wire codec (ISO 13400-2)
//!
//! Every DoIP message starts with an 8-byte generic header:
//!
//! ```text
//! | version | !version | payload_type (u16) | payload_length (u32) | payload ... |
//! ```
//!
//! Diagnostic messages carry source and target logical addresses at the
//! start of the payload, so a received diagnostic frame has a fixed 12-byte
//! prefix in front of the UDS data.

mod error;
mod frame;
mod payload;

pub use error::CodecError;
pub use frame::{
    DoIpFrame, FrameDecoder, Header, DEFAULT_MAX_PAYLOAD_LEN, DEFAULT_PROTOCOL_VERSION,
    DIAGNOSTIC_PREFIX_LEN, GENERIC_HEADER_LEN,
};
pub use payload::{
    payload_type, ActivationCode, ActivationType, DiagnosticAck, DiagnosticMessage, NackCode,
    Payload, RoutingActivationRequest, RoutingActivationResponse,
};
