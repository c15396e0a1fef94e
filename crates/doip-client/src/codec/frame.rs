//! Generic header and frame reassembly

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{CodecError, Payload};

/// Length of the generic DoIP header
pub const GENERIC_HEADER_LEN: usize = 8;

/// Generic header plus source and target address of a diagnostic message
pub const DIAGNOSTIC_PREFIX_LEN: usize = GENERIC_HEADER_LEN + 4;

/// ISO 13400-2:2012
pub const DEFAULT_PROTOCOL_VERSION: u8 = 0x02;

pub const DEFAULT_MAX_PAYLOAD_LEN: u32 = 0x0040_0000;

/// DoIP generic header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub protocol_version: u8,
    pub payload_type: u16,
    pub payload_length: u32,
}

impl Header {
    /// Parse the first [`GENERIC_HEADER_LEN`] bytes of `buf`.
    ///
    /// The caller guarantees that `buf` holds at least a full header.
    pub fn parse(mut buf: &[u8]) -> Result<Self, CodecError> {
        let version = buf.get_u8();
        let inverse = buf.get_u8();
        if version != !inverse {
            return Err(CodecError::InvalidVersion { version, inverse });
        }
        Ok(Self {
            protocol_version: version,
            payload_type: buf.get_u16(),
            payload_length: buf.get_u32(),
        })
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u8(self.protocol_version);
        dst.put_u8(!self.protocol_version);
        dst.put_u16(self.payload_type);
        dst.put_u32(self.payload_length);
    }
}

/// A complete DoIP message: header plus raw payload bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoIpFrame {
    pub header: Header,
    pub payload: Bytes,
}

impl DoIpFrame {
    /// Build a frame for a typed payload
    pub fn new(protocol_version: u8, payload: &Payload) -> Self {
        let mut body = BytesMut::new();
        payload.encode(&mut body);
        Self {
            header: Header {
                protocol_version,
                payload_type: payload.payload_type(),
                // Callers bound payloads by the negotiated maximum first
                payload_length: u32::try_from(body.len()).unwrap_or(u32::MAX),
            },
            payload: body.freeze(),
        }
    }

    /// Decode the typed payload
    pub fn decode_payload(&self) -> Result<Payload, CodecError> {
        Payload::decode(self.header.payload_type, self.payload.clone())
    }

    /// Serialise header and payload into one buffer
    pub fn encode(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(GENERIC_HEADER_LEN + self.payload.len());
        self.header.write(&mut dst);
        dst.extend_from_slice(&self.payload);
        dst.freeze()
    }
}

/// Reassembles frames from a byte stream.
///
/// Incomplete input is left in the buffer until more bytes arrive, so the
/// decoder can be fed from a cancel-safe `read_buf` loop.
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    max_payload_len: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD_LEN)
    }
}

impl FrameDecoder {
    pub fn new(max_payload_len: u32) -> Self {
        Self { max_payload_len }
    }

    /// Take the next complete frame out of `buf`, if there is one
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<DoIpFrame>, CodecError> {
        if buf.len() < GENERIC_HEADER_LEN {
            return Ok(None);
        }

        let header = Header::parse(&buf[..GENERIC_HEADER_LEN])?;
        if header.payload_length > self.max_payload_len {
            return Err(CodecError::PayloadTooLarge {
                length: header.payload_length,
                max: self.max_payload_len,
            });
        }

        let frame_len = GENERIC_HEADER_LEN + header.payload_length as usize;
        if buf.len() < frame_len {
            buf.reserve(frame_len - buf.len());
            return Ok(None);
        }

        buf.advance(GENERIC_HEADER_LEN);
        let payload = buf.split_to(header.payload_length as usize).freeze();
        Ok(Some(DoIpFrame { header, payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{payload_type, DiagnosticMessage};
    use pretty_assertions::assert_eq;

    fn diagnostic(source: u16, target: u16, data: &[u8]) -> Payload {
        Payload::DiagnosticMessage(DiagnosticMessage {
            source_address: source,
            target_address: target,
            user_data: Bytes::copy_from_slice(data),
        })
    }

    #[test]
    fn test_diagnostic_frame_layout() {
        let frame = DoIpFrame::new(0x02, &diagnostic(0x0E00, 0x0680, &[0x22, 0xF1, 0x90]));
        let bytes = frame.encode();

        assert_eq!(
            bytes.as_ref(),
            &[
                0x02, 0xFD, // version, inverse
                0x80, 0x01, // diagnostic message
                0x00, 0x00, 0x00, 0x07, // length
                0x0E, 0x00, // source
                0x06, 0x80, // target
                0x22, 0xF1, 0x90,
            ]
        );
        assert_eq!(&bytes[DIAGNOSTIC_PREFIX_LEN..], &[0x22, 0xF1, 0x90]);
    }

    #[test]
    fn test_header_rejects_bad_inverse() {
        let err = Header::parse(&[0x02, 0xFC, 0x80, 0x01, 0, 0, 0, 4]).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidVersion {
                version: 0x02,
                inverse: 0xFC
            }
        );
        assert!(err.is_header_error());
    }

    #[test]
    fn test_decoder_waits_for_complete_frame() {
        let decoder = FrameDecoder::default();
        let bytes = DoIpFrame::new(0x02, &diagnostic(0x0680, 0x0E00, &[0x62, 0xF1, 0x90, 0x41]))
            .encode();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bytes[..5]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&bytes[5..10]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&bytes[10..]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.payload_type, payload_type::DIAGNOSTIC_MESSAGE);
        assert_eq!(frame.header.payload_length, 8);
        assert!(buf.is_empty());
        assert_eq!(frame.encode(), bytes);
    }

    #[test]
    fn test_decoder_splits_back_to_back_frames() {
        let decoder = FrameDecoder::default();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&DoIpFrame::new(0x02, &Payload::AliveCheckRequest).encode());
        buf.extend_from_slice(&DoIpFrame::new(0x02, &diagnostic(1, 2, &[0x50, 0x03])).encode());

        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.header.payload_type, payload_type::ALIVE_CHECK_REQUEST);
        assert!(first.payload.is_empty());

        let second = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.header.payload_type, payload_type::DIAGNOSTIC_MESSAGE);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decoder_enforces_payload_limit() {
        let decoder = FrameDecoder::new(16);
        let mut buf = BytesMut::from(&[0x02, 0xFD, 0x80, 0x01, 0x00, 0x00, 0x01, 0x00][..]);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(err, CodecError::PayloadTooLarge { length: 256, max: 16 });
    }
}
