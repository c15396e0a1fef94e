//! Codec errors

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Version byte and its inverse do not complement each other
    #[error("Invalid protocol version pattern: 0x{version:02X}/0x{inverse:02X}")]
    InvalidVersion { version: u8, inverse: u8 },

    #[error("Payload length {length} exceeds limit of {max} bytes")]
    PayloadTooLarge { length: u32, max: u32 },

    #[error(
        "Payload type 0x{payload_type:04X} needs at least {expected} bytes, got {actual}"
    )]
    Truncated {
        payload_type: u16,
        expected: usize,
        actual: usize,
    },

    #[error("Unknown activation type 0x{0:02X}")]
    UnknownActivationType(u8),
}

impl CodecError {
    /// Header errors leave the byte stream unsynchronised; payload errors
    /// only affect the one frame.
    pub fn is_header_error(&self) -> bool {
        matches!(self, Self::InvalidVersion { .. } | Self::PayloadTooLarge { .. })
    }
}
