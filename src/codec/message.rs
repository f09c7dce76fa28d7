//! Non-telemetry frames: faults, warnings, info, bootloader acks
//!
//! Message packets share the data wire layout; what changes is the packet
//! kind in the schema and where the decoded result is routed. The parser
//! distills each frame into a typed [`Message`](super::Message) carrying the
//! owning board and packet name so sinks need no schema access.

use std::sync::Arc;

use serde::Serialize;

use super::{value, ByteReader, Message, Value};
use crate::error::{GatewayError, Result};
use crate::schema::{PacketKind, Schema};

/// Structured body shared by fault, warning and info messages
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub id: u16,
    pub name: String,
    pub board: String,
    pub values: std::collections::HashMap<String, Value>,
}

/// Interprets message-kind frames into typed messages
#[derive(Clone)]
pub struct MessageParser {
    schema: Arc<Schema>,
}

impl MessageParser {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Decode one message frame
    ///
    /// Returns `KindMismatch` for data/order ids; the vehicle demux should
    /// not have routed those here.
    pub fn parse(&self, frame: &[u8]) -> Result<Message> {
        let id = frame
            .get(..2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .ok_or(GatewayError::TooShort {
                id: 0,
                needed: 2,
                got: frame.len(),
            })?;

        let packet = self
            .schema
            .packet(id)
            .ok_or(GatewayError::UnknownId { id })?;

        if packet.kind == PacketKind::BlcuAck {
            return Ok(Message::BlcuAck { id });
        }

        let mut reader = ByteReader::new(id, frame);
        reader.take(2)?;
        let values = value::decode_values(packet, &mut reader)?;

        let notice = Notice {
            id,
            name: packet.name.clone(),
            board: self
                .schema
                .board_for(id)
                .unwrap_or_default()
                .to_string(),
            values,
        };

        match packet.kind {
            PacketKind::Fault => Ok(Message::Fault(notice)),
            PacketKind::Warning => Ok(Message::Warning(notice)),
            PacketKind::Info => Ok(Message::Info(notice)),
            _ => Err(GatewayError::KindMismatch {
                id,
                expected: "a message packet",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::{board, numeric, test_schema};
    use crate::schema::{NumWidth, PacketDesc};

    #[test]
    fn test_parse_fault_notice() {
        let parser = MessageParser::new(Arc::new(test_schema()));

        // id 0x300 LE || code = 0x0102 (u16)
        let msg = parser.parse(&[0x00, 0x03, 0x02, 0x01]).unwrap();
        match msg {
            Message::Fault(notice) => {
                assert_eq!(notice.id, 0x300);
                assert_eq!(notice.name, "bcu_fault");
                assert_eq!(notice.board, "bcu");
                assert_eq!(notice.values["code"], Value::Numeric(258.0));
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_blcu_ack_ignores_body() {
        let blcu = board(
            "blcu",
            vec![PacketDesc {
                id: 0x700,
                name: "blcu_ack".into(),
                kind: PacketKind::BlcuAck,
                fields: vec![],
            }],
        );
        let schema = Schema::build(vec![blcu]).unwrap();
        let parser = MessageParser::new(Arc::new(schema));

        let msg = parser.parse(&[0x00, 0x07]).unwrap();
        assert_eq!(msg, Message::BlcuAck { id: 0x700 });
    }

    #[test]
    fn test_parse_rejects_data_id() {
        let parser = MessageParser::new(Arc::new(test_schema()));
        let err = parser
            .parse(&[0x00, 0x01, 0x2A, 0x00, 0x00, 0x00, 0x80, 0x3F, 0x01])
            .unwrap_err();
        assert!(matches!(err, GatewayError::KindMismatch { id: 0x100, .. }));
    }

    #[test]
    fn test_parse_truncated_notice() {
        let parser = MessageParser::new(Arc::new(test_schema()));
        let err = parser.parse(&[0x00, 0x03, 0x02]).unwrap_err();
        assert!(matches!(err, GatewayError::TooShort { id: 0x300, .. }));
    }

    #[test]
    fn test_warning_kind_maps_to_warning_variant() {
        let b = board(
            "pcu",
            vec![PacketDesc {
                id: 0x400,
                name: "pcu_overtemp".into(),
                kind: PacketKind::Warning,
                fields: vec![numeric("celsius", NumWidth::U8)],
            }],
        );
        let schema = Schema::build(vec![b]).unwrap();
        let parser = MessageParser::new(Arc::new(schema));

        let msg = parser.parse(&[0x00, 0x04, 80]).unwrap();
        assert!(matches!(msg, Message::Warning(_)));
    }
}
