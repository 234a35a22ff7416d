//! Control message encoding
//!
//! Control messages travel as UDP payloads on [`qlrn_core::CONTROL_PORT`].
//! Each message is one type-tag byte followed by a postcard-encoded body:
//!
//! | Tag | Message |
//! |-----|---------|
//! | 1 | [`Hello`] |
//! | 2 | [`HelloAck`] |
//!
//! Both bodies carry an optional `cost`, the sender's learned score for
//! the link. Route selection consumes it; nothing here interprets it.

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use qlrn_core::ProtocolError;
use serde::{Deserialize, Serialize};

/// Control message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Hello = 1,
    HelloAck = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::Hello),
            2 => Ok(Self::HelloAck),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Neighbor announcement, broadcast with TTL 1
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Sender's interface address
    pub origin: Ipv4Addr,
    /// Sender's own sequence number
    pub seq_no: u32,
    /// How long receivers should consider the sender a neighbor
    pub lifetime_ms: u32,
    /// Whether receivers should answer with a [`HelloAck`]
    pub ack_requested: bool,
    /// Sender's learned cost for this link
    pub cost: Option<u32>,
}

impl Hello {
    /// Advertised neighbor lifetime
    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(u64::from(self.lifetime_ms))
    }
}

/// Unicast answer to a [`Hello`], proving the link works both ways
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloAck {
    /// Acknowledging node's interface address
    pub origin: Ipv4Addr,
    /// Sequence number of the hello being acknowledged
    pub seq_no: u32,
    /// Acknowledging node's learned cost for this link
    pub cost: Option<u32>,
}

/// A decoded control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Hello(Hello),
    HelloAck(HelloAck),
}

impl ControlMessage {
    /// Type tag of this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Hello(_) => MessageType::Hello,
            Self::HelloAck(_) => MessageType::HelloAck,
        }
    }

    /// Originating address carried in the body
    pub fn origin(&self) -> Ipv4Addr {
        match self {
            Self::Hello(hello) => hello.origin,
            Self::HelloAck(ack) => ack.origin,
        }
    }

    /// Encode to wire format
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let body = match self {
            Self::Hello(hello) => postcard::to_allocvec(hello),
            Self::HelloAck(ack) => postcard::to_allocvec(ack),
        }
        .map_err(|e| ProtocolError::InvalidMessageFormat(e.to_string()))?;

        let mut buf = BytesMut::with_capacity(1 + body.len());
        buf.put_u8(self.message_type() as u8);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Decode from wire format
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&tag, body) = bytes.split_first().ok_or(ProtocolError::EmptyMessage)?;
        let invalid = |e: postcard::Error| ProtocolError::InvalidMessageFormat(e.to_string());
        match MessageType::try_from(tag)? {
            MessageType::Hello => postcard::from_bytes(body).map(Self::Hello).map_err(invalid),
            MessageType::HelloAck => postcard::from_bytes(body)
                .map(Self::HelloAck)
                .map_err(invalid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hello() -> Hello {
        Hello {
            origin: Ipv4Addr::new(10, 0, 0, 1),
            seq_no: 7,
            lifetime_ms: 4000,
            ack_requested: true,
            cost: Some(12),
        }
    }

    #[test]
    fn test_tag_byte_leads() {
        let bytes = ControlMessage::Hello(make_hello()).encode().unwrap();
        assert_eq!(bytes[0], MessageType::Hello as u8);

        let ack = ControlMessage::HelloAck(HelloAck {
            origin: Ipv4Addr::new(10, 0, 0, 2),
            seq_no: 7,
            cost: None,
        });
        let bytes = ack.encode().unwrap();
        assert_eq!(bytes[0], MessageType::HelloAck as u8);
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), ack);
    }

    #[test]
    fn test_hello_fields_survive() {
        let bytes = ControlMessage::Hello(make_hello()).encode().unwrap();
        let ControlMessage::Hello(hello) = ControlMessage::decode(&bytes).unwrap() else {
            panic!("expected hello");
        };
        assert_eq!(hello.lifetime(), Duration::from_secs(4));
        assert_eq!(hello.cost, Some(12));
        assert!(hello.ack_requested);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            ControlMessage::decode(&[]),
            Err(ProtocolError::EmptyMessage)
        ));
        assert!(matches!(
            ControlMessage::decode(&[9, 0, 0]),
            Err(ProtocolError::UnknownMessageType(9))
        ));
        assert!(matches!(
            ControlMessage::decode(&[1, 10]),
            Err(ProtocolError::InvalidMessageFormat(_))
        ));
    }
}
