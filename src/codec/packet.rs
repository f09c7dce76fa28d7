//! Frame-level parser: id dispatch plus the typed field pass
//!
//! The packet id (u16 LE at offset 0) is the framing discriminator; each TCP
//! read delivers exactly one frame. Data frames are the field section alone,
//! order frames append the enabled mask. Trailing bytes after the schema'd
//! layout are ignored; truncation is a per-frame parse error.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use super::{bitarray, value, ByteReader, DataPayload, OrderPayload, Value};
use crate::error::{GatewayError, Result};
use crate::schema::{PacketDesc, PacketKind, Schema};

/// Schema-driven encoder/decoder for data and order frames
#[derive(Clone)]
pub struct PacketParser {
    schema: Arc<Schema>,
}

impl PacketParser {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Peek the packet id of a frame, if it is long enough to carry one
    pub fn packet_id(frame: &[u8]) -> Option<u16> {
        frame
            .get(..2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Decode a telemetry frame into its typed values
    ///
    /// The returned payload keeps the full frame for hex display.
    pub fn decode_data(&self, frame: Bytes) -> Result<(u16, DataPayload)> {
        let (packet, mut reader) = self.open(&frame, PacketKind::Data, "a data packet")?;
        let values = value::decode_values(packet, &mut reader)?;
        Ok((
            packet.id,
            DataPayload {
                values,
                raw: frame.clone(),
            },
        ))
    }

    /// Decode an order frame: typed values plus the enabled mask
    pub fn decode_order(&self, frame: &[u8]) -> Result<(u16, OrderPayload)> {
        let (packet, mut reader) = self.open(frame, PacketKind::Order, "an order packet")?;
        let values = value::decode_values(packet, &mut reader)?;
        let mask = bitarray::decode_mask(packet.fields.len(), &mut reader)?;

        let enabled = packet
            .fields
            .iter()
            .zip(mask)
            .map(|(field, bit)| (field.name.clone(), bit))
            .collect();

        Ok((packet.id, OrderPayload { values, enabled }))
    }

    /// Encode a telemetry frame (id plus fields in schema order)
    pub fn encode_data(&self, id: u16, values: &HashMap<String, Value>) -> Result<Vec<u8>> {
        let packet = self.expect_kind(id, PacketKind::Data, "a data packet")?;
        let mut out = Vec::with_capacity(2 + packet.values_size());
        out.extend_from_slice(&id.to_le_bytes());
        value::encode_values(packet, values, &mut out)?;
        Ok(out)
    }

    /// Encode an order frame: id, fields in schema order, enabled mask
    ///
    /// Fields absent from the enabled map encode as disabled.
    pub fn encode_order(&self, id: u16, payload: &OrderPayload) -> Result<Vec<u8>> {
        let packet = self.expect_kind(id, PacketKind::Order, "an order packet")?;
        let mut out = Vec::with_capacity(2 + packet.values_size() + packet.mask_size());
        out.extend_from_slice(&id.to_le_bytes());
        value::encode_values(packet, &payload.values, &mut out)?;

        let flags: Vec<bool> = packet
            .fields
            .iter()
            .map(|field| payload.enabled.get(&field.name).copied().unwrap_or(false))
            .collect();
        bitarray::encode_mask(&flags, &mut out);
        Ok(out)
    }

    fn open<'a>(
        &'a self,
        frame: &'a [u8],
        kind: PacketKind,
        expected: &'static str,
    ) -> Result<(&'a PacketDesc, ByteReader<'a>)> {
        let id = Self::packet_id(frame).ok_or(GatewayError::TooShort {
            id: 0,
            needed: 2,
            got: frame.len(),
        })?;
        let packet = self.expect_kind(id, kind, expected)?;
        let mut reader = ByteReader::new(id, frame);
        reader.take(2)?; // id already consumed
        Ok((packet, reader))
    }

    fn expect_kind(
        &self,
        id: u16,
        kind: PacketKind,
        expected: &'static str,
    ) -> Result<&PacketDesc> {
        let packet = self
            .schema
            .packet(id)
            .ok_or(GatewayError::UnknownId { id })?;
        if packet.kind != kind {
            return Err(GatewayError::KindMismatch { id, expected });
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::fixtures::test_schema;

    fn parser() -> PacketParser {
        PacketParser::new(Arc::new(test_schema()))
    }

    #[test]
    fn test_decode_data_frame() {
        // id 0x100 LE || x = 42 (u16) || y = 1.0 (f32) || flag = true
        let frame = Bytes::from_static(&[0x00, 0x01, 0x2A, 0x00, 0x00, 0x00, 0x80, 0x3F, 0x01]);
        let (id, payload) = parser().decode_data(frame.clone()).unwrap();

        assert_eq!(id, 0x100);
        assert_eq!(payload.values["x"], Value::Numeric(42.0));
        assert_eq!(payload.values["y"], Value::Numeric(1.0));
        assert_eq!(payload.values["flag"], Value::Boolean(true));
        assert_eq!(payload.raw, frame);
    }

    #[test]
    fn test_decode_data_ignores_trailing_bytes() {
        let frame = Bytes::from_static(&[
            0x00, 0x01, 0x2A, 0x00, 0x00, 0x00, 0x80, 0x3F, 0x01, 0xDE, 0xAD,
        ]);
        let (_, payload) = parser().decode_data(frame).unwrap();
        assert_eq!(payload.values.len(), 3);
    }

    #[test]
    fn test_decode_truncated_data_is_too_short() {
        let frame = Bytes::from_static(&[0x00, 0x01, 0x2A, 0x00, 0x00]);
        let err = parser().decode_data(frame).unwrap_err();
        assert!(matches!(err, GatewayError::TooShort { id: 0x100, .. }));
    }

    #[test]
    fn test_decode_unknown_id() {
        let frame = Bytes::from_static(&[0x99, 0x09, 0x00]);
        let err = parser().decode_data(frame).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownId { id: 0x999 }));
    }

    #[test]
    fn test_decode_data_rejects_order_id() {
        let frame = Bytes::from_static(&[0x00, 0x02, 0x07, 0x00, 0x01, 0xC0]);
        let err = parser().decode_data(frame).unwrap_err();
        assert!(matches!(err, GatewayError::KindMismatch { id: 0x200, .. }));
    }

    #[test]
    fn test_encode_order_with_mask() {
        // a = 7 enabled, b = false enabled, c = ON disabled
        let payload = OrderPayload {
            values: HashMap::from([
                ("a".to_string(), Value::Numeric(7.0)),
                ("b".to_string(), Value::Boolean(false)),
                ("c".to_string(), Value::Enum("ON".to_string())),
            ]),
            enabled: HashMap::from([
                ("a".to_string(), true),
                ("b".to_string(), true),
                ("c".to_string(), false),
            ]),
        };

        let bytes = parser().encode_order(0x200, &payload).unwrap();
        assert_eq!(bytes, vec![0x00, 0x02, 0x07, 0x00, 0x01, 0b1100_0000]);
    }

    #[test]
    fn test_order_roundtrip() {
        let payload = OrderPayload {
            values: HashMap::from([
                ("a".to_string(), Value::Numeric(255.0)),
                ("b".to_string(), Value::Boolean(true)),
                ("c".to_string(), Value::Enum("OFF".to_string())),
            ]),
            enabled: HashMap::from([
                ("a".to_string(), false),
                ("b".to_string(), true),
                ("c".to_string(), true),
            ]),
        };

        let parser = parser();
        let bytes = parser.encode_order(0x200, &payload).unwrap();
        let (id, decoded) = parser.decode_order(&bytes).unwrap();

        assert_eq!(id, 0x200);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_data_roundtrip() {
        let values = HashMap::from([
            ("x".to_string(), Value::Numeric(1000.0)),
            ("y".to_string(), Value::Numeric(-2.5)),
            ("flag".to_string(), Value::Boolean(false)),
        ]);

        let parser = parser();
        let bytes = parser.encode_data(0x100, &values).unwrap();
        let (id, decoded) = parser.decode_data(Bytes::from(bytes)).unwrap();

        assert_eq!(id, 0x100);
        assert_eq!(decoded.values, values);
    }

    #[test]
    fn test_encode_order_missing_field_is_an_error() {
        let payload = OrderPayload {
            values: HashMap::from([("a".to_string(), Value::Numeric(1.0))]),
            enabled: HashMap::new(),
        };
        let err = parser().encode_order(0x200, &payload).unwrap_err();
        assert!(matches!(err, GatewayError::UnknownField { .. }));
    }

    #[test]
    fn test_packet_id_of_short_frame() {
        assert_eq!(PacketParser::packet_id(&[0x01]), None);
        assert_eq!(PacketParser::packet_id(&[0x01, 0x02]), Some(0x0201));
    }
}
