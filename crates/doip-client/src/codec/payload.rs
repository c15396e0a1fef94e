//! Typed DoIP payloads

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::CodecError;

/// Payload type identifiers (ISO 13400-2, Table 17)
pub mod payload_type {
    pub const GENERIC_NACK: u16 = 0x0000;
    pub const ROUTING_ACTIVATION_REQUEST: u16 = 0x0005;
    pub const ROUTING_ACTIVATION_RESPONSE: u16 = 0x0006;
    pub const ALIVE_CHECK_REQUEST: u16 = 0x0007;
    pub const ALIVE_CHECK_RESPONSE: u16 = 0x0008;
    pub const DIAGNOSTIC_MESSAGE: u16 = 0x8001;
    pub const DIAGNOSTIC_MESSAGE_ACK: u16 = 0x8002;
    pub const DIAGNOSTIC_MESSAGE_NACK: u16 = 0x8003;
}

/// Routing activation type (ISO 13400-2, Table 47)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ActivationType {
    #[default]
    Default = 0x00,
    DiagnosticRequiredByRegulation = 0x01,
    CentralSecurity = 0xE0,
    OtaMode = 0xE1,
}

impl TryFrom<u8> for ActivationType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Default),
            0x01 => Ok(Self::DiagnosticRequiredByRegulation),
            0xE0 => Ok(Self::CentralSecurity),
            0xE1 => Ok(Self::OtaMode),
            other => Err(CodecError::UnknownActivationType(other)),
        }
    }
}

/// Routing activation response code (ISO 13400-2, Table 48)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivationCode(pub u8);

impl ActivationCode {
    pub const SUCCESS: Self = Self(0x10);
    pub const CONFIRMATION_REQUIRED: Self = Self(0x11);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS || self == Self::CONFIRMATION_REQUIRED
    }

    pub fn description(self) -> &'static str {
        match self.0 {
            0x00 => "unknown source address",
            0x01 => "all TCP sockets registered and active",
            0x02 => "source address differs from the one registered on this socket",
            0x03 => "source address already registered on a different socket",
            0x04 => "missing authentication",
            0x05 => "rejected confirmation",
            0x06 => "unsupported routing activation type",
            0x07 => "encrypted TLS connection required",
            0x10 => "routing successfully activated",
            0x11 => "routing will be activated, confirmation required",
            _ => "reserved",
        }
    }
}

impl fmt::Display for ActivationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.0, self.description())
    }
}

/// Diagnostic message negative acknowledge code (ISO 13400-2, Table 29)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NackCode(pub u8);

impl NackCode {
    pub fn description(self) -> &'static str {
        match self.0 {
            0x02 => "invalid source address",
            0x03 => "unknown target address",
            0x04 => "diagnostic message too large",
            0x05 => "out of memory",
            0x06 => "target unreachable",
            0x07 => "unknown network",
            0x08 => "transport protocol error",
            _ => "reserved",
        }
    }
}

impl fmt::Display for NackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.0, self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingActivationRequest {
    pub source_address: u16,
    pub activation_type: ActivationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingActivationResponse {
    /// Client address echoed by the gateway
    pub tester_address: u16,
    pub entity_address: u16,
    pub code: ActivationCode,
    pub oem_specific: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticMessage {
    pub source_address: u16,
    pub target_address: u16,
    pub user_data: Bytes,
}

/// Positive or negative diagnostic message acknowledge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticAck {
    pub source_address: u16,
    pub target_address: u16,
    pub code: u8,
    /// Echo of the acknowledged message, possibly empty
    pub previous: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    GenericNack { code: u8 },
    RoutingActivationRequest(RoutingActivationRequest),
    RoutingActivationResponse(RoutingActivationResponse),
    AliveCheckRequest,
    AliveCheckResponse { source_address: u16 },
    DiagnosticMessage(DiagnosticMessage),
    DiagnosticAck(DiagnosticAck),
    DiagnosticNack(DiagnosticAck),
    /// Any payload type the client has no use for
    Unsupported { payload_type: u16, data: Bytes },
}

impl Payload {
    pub fn payload_type(&self) -> u16 {
        match self {
            Self::GenericNack { .. } => payload_type::GENERIC_NACK,
            Self::RoutingActivationRequest(_) => payload_type::ROUTING_ACTIVATION_REQUEST,
            Self::RoutingActivationResponse(_) => payload_type::ROUTING_ACTIVATION_RESPONSE,
            Self::AliveCheckRequest => payload_type::ALIVE_CHECK_REQUEST,
            Self::AliveCheckResponse { .. } => payload_type::ALIVE_CHECK_RESPONSE,
            Self::DiagnosticMessage(_) => payload_type::DIAGNOSTIC_MESSAGE,
            Self::DiagnosticAck(_) => payload_type::DIAGNOSTIC_MESSAGE_ACK,
            Self::DiagnosticNack(_) => payload_type::DIAGNOSTIC_MESSAGE_NACK,
            Self::Unsupported { payload_type, .. } => *payload_type,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Self::GenericNack { code } => dst.put_u8(*code),
            Self::RoutingActivationRequest(req) => {
                dst.put_u16(req.source_address);
                dst.put_u8(req.activation_type as u8);
                dst.put_u32(0); // reserved by ISO
            }
            Self::RoutingActivationResponse(resp) => {
                dst.put_u16(resp.tester_address);
                dst.put_u16(resp.entity_address);
                dst.put_u8(resp.code.0);
                dst.put_u32(0);
                if let Some(oem) = resp.oem_specific {
                    dst.put_u32(oem);
                }
            }
            Self::AliveCheckRequest => {}
            Self::AliveCheckResponse { source_address } => dst.put_u16(*source_address),
            Self::DiagnosticMessage(msg) => {
                dst.put_u16(msg.source_address);
                dst.put_u16(msg.target_address);
                dst.extend_from_slice(&msg.user_data);
            }
            Self::DiagnosticAck(ack) | Self::DiagnosticNack(ack) => {
                dst.put_u16(ack.source_address);
                dst.put_u16(ack.target_address);
                dst.put_u8(ack.code);
                dst.extend_from_slice(&ack.previous);
            }
            Self::Unsupported { data, .. } => dst.extend_from_slice(data),
        }
    }

    pub fn decode(payload_type: u16, mut data: Bytes) -> Result<Self, CodecError> {
        let payload = match payload_type {
            payload_type::GENERIC_NACK => {
                ensure_len(payload_type, &data, 1)?;
                Self::GenericNack {
                    code: data.get_u8(),
                }
            }
            payload_type::ROUTING_ACTIVATION_REQUEST => {
                ensure_len(payload_type, &data, 7)?;
                let source_address = data.get_u16();
                let activation_type = ActivationType::try_from(data.get_u8())?;
                Self::RoutingActivationRequest(RoutingActivationRequest {
                    source_address,
                    activation_type,
                })
            }
            payload_type::ROUTING_ACTIVATION_RESPONSE => {
                ensure_len(payload_type, &data, 9)?;
                let tester_address = data.get_u16();
                let entity_address = data.get_u16();
                let code = ActivationCode(data.get_u8());
                data.advance(4);
                let oem_specific = (data.remaining() >= 4).then(|| data.get_u32());
                Self::RoutingActivationResponse(RoutingActivationResponse {
                    tester_address,
                    entity_address,
                    code,
                    oem_specific,
                })
            }
            payload_type::ALIVE_CHECK_REQUEST => Self::AliveCheckRequest,
            payload_type::ALIVE_CHECK_RESPONSE => {
                ensure_len(payload_type, &data, 2)?;
                Self::AliveCheckResponse {
                    source_address: data.get_u16(),
                }
            }
            payload_type::DIAGNOSTIC_MESSAGE => {
                ensure_len(payload_type, &data, 4)?;
                let source_address = data.get_u16();
                let target_address = data.get_u16();
                Self::DiagnosticMessage(DiagnosticMessage {
                    source_address,
                    target_address,
                    user_data: data,
                })
            }
            payload_type::DIAGNOSTIC_MESSAGE_ACK | payload_type::DIAGNOSTIC_MESSAGE_NACK => {
                ensure_len(payload_type, &data, 5)?;
                let ack = DiagnosticAck {
                    source_address: data.get_u16(),
                    target_address: data.get_u16(),
                    code: data.get_u8(),
                    previous: data,
                };
                if payload_type == payload_type::DIAGNOSTIC_MESSAGE_ACK {
                    Self::DiagnosticAck(ack)
                } else {
                    Self::DiagnosticNack(ack)
                }
            }
            other => Self::Unsupported {
                payload_type: other,
                data,
            },
        };
        Ok(payload)
    }
}

fn ensure_len(payload_type: u16, data: &Bytes, expected: usize) -> Result<(), CodecError> {
    if data.len() < expected {
        return Err(CodecError::Truncated {
            payload_type,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_routing_activation_request_encoding() {
        let mut buf = BytesMut::new();
        Payload::RoutingActivationRequest(RoutingActivationRequest {
            source_address: 0x0E00,
            activation_type: ActivationType::CentralSecurity,
        })
        .encode(&mut buf);
        assert_eq!(buf.as_ref(), &[0x0E, 0x00, 0xE0, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_routing_activation_response_with_oem_field() {
        let data = Bytes::from_static(&[
            0x0E, 0x00, 0x06, 0x80, 0x10, 0x00, 0x00, 0x00, 0x00, 0xDE, 0xAD, 0xBE, 0xEF,
        ]);
        let payload = Payload::decode(payload_type::ROUTING_ACTIVATION_RESPONSE, data).unwrap();
        assert_eq!(
            payload,
            Payload::RoutingActivationResponse(RoutingActivationResponse {
                tester_address: 0x0E00,
                entity_address: 0x0680,
                code: ActivationCode::SUCCESS,
                oem_specific: Some(0xDEADBEEF),
            })
        );
    }

    #[test]
    fn test_truncated_activation_response() {
        let err = Payload::decode(
            payload_type::ROUTING_ACTIVATION_RESPONSE,
            Bytes::from_static(&[0x0E, 0x00, 0x06]),
        )
        .unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated {
                payload_type: payload_type::ROUTING_ACTIVATION_RESPONSE,
                expected: 9,
                actual: 3,
            }
        );
        assert!(!err.is_header_error());
    }

    #[test]
    fn test_diagnostic_nack_decoding() {
        let payload = Payload::decode(
            payload_type::DIAGNOSTIC_MESSAGE_NACK,
            Bytes::from_static(&[0x06, 0x80, 0x0E, 0x00, 0x03, 0x22]),
        )
        .unwrap();
        match payload {
            Payload::DiagnosticNack(ack) => {
                assert_eq!(ack.source_address, 0x0680);
                assert_eq!(ack.target_address, 0x0E00);
                assert_eq!(NackCode(ack.code).description(), "unknown target address");
                assert_eq!(ack.previous.as_ref(), &[0x22]);
            }
            other => panic!("Expected DiagnosticNack, got {:?}", other),
        }
    }

    #[test]
    fn test_activation_type_values() {
        assert_eq!(ActivationType::OtaMode as u8, 0xE1);
        assert_eq!(
            ActivationType::try_from(0x01).unwrap(),
            ActivationType::DiagnosticRequiredByRegulation
        );
        assert_eq!(
            ActivationType::try_from(0x02),
            Err(CodecError::UnknownActivationType(0x02))
        );
    }

    #[test]
    fn test_activation_codes() {
        assert!(ActivationCode(0x10).is_success());
        assert!(ActivationCode(0x11).is_success());
        assert!(!ActivationCode(0x06).is_success());
        assert_eq!(
            ActivationCode(0x07).to_string(),
            "0x07 (encrypted TLS connection required)"
        );
    }
}
