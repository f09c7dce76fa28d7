//! Packet schema: the immutable description of boards, packets and fields
//!
//! The schema is built once at startup from an external source (see
//! [`source`]) and never mutated afterwards. Every other component is driven
//! by it: the codec walks field descriptors in declaration order, the unit
//! converter picks up per-field conversion specs, and routing maps packet ids
//! back to the board that owns them.

mod source;
pub mod units;

pub use source::{SchemaSource, TomlSchemaSource};
pub use units::{Conversion, UnitConverter};

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{GatewayError, Result};

// =============================================================================
// Field model
// =============================================================================

/// Wire width of a numeric field
///
/// Determines byte count and interpretation: little-endian, two's complement
/// for signed integers, IEEE-754 for floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumWidth {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl NumWidth {
    /// Size in bytes on the wire
    pub const fn size(&self) -> usize {
        match self {
            NumWidth::I8 | NumWidth::U8 => 1,
            NumWidth::I16 | NumWidth::U16 => 2,
            NumWidth::I32 | NumWidth::U32 | NumWidth::F32 => 4,
            NumWidth::I64 | NumWidth::U64 | NumWidth::F64 => 8,
        }
    }

    /// Parse a schema type name ("uint8", "float32", ...)
    ///
    /// Short forms ("u8", "f32") are accepted as well.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "int8" | "i8" => Some(NumWidth::I8),
            "int16" | "i16" => Some(NumWidth::I16),
            "int32" | "i32" => Some(NumWidth::I32),
            "int64" | "i64" => Some(NumWidth::I64),
            "uint8" | "u8" => Some(NumWidth::U8),
            "uint16" | "u16" => Some(NumWidth::U16),
            "uint32" | "u32" => Some(NumWidth::U32),
            "uint64" | "u64" => Some(NumWidth::U64),
            "float32" | "f32" => Some(NumWidth::F32),
            "float64" | "f64" => Some(NumWidth::F64),
            _ => None,
        }
    }
}

/// Kind of a schema field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Numeric value of a declared wire width
    Numeric(NumWidth),
    /// One byte, 0 = false, non-zero = true
    Boolean,
    /// One byte, unsigned index into the variant list
    Enum(Vec<String>),
}

impl FieldKind {
    /// Size in bytes on the wire
    pub fn wire_size(&self) -> usize {
        match self {
            FieldKind::Numeric(width) => width.size(),
            FieldKind::Boolean | FieldKind::Enum(_) => 1,
        }
    }
}

/// One field of a packet, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDesc {
    pub name: String,
    pub kind: FieldKind,
    /// SI → pod-units transform; the pipeline applies its inverse inbound
    pub pod_units: Option<Conversion>,
    /// SI → display-units transform, applied forward inbound
    pub display_units: Option<Conversion>,
}

// =============================================================================
// Packet model
// =============================================================================

/// What a packet id means to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Telemetry snapshot emitted by a board
    Data,
    /// Command accepted by a board; carries the enabled mask
    Order,
    /// Protection notice, non-critical
    Warning,
    /// Protection notice, critical
    Fault,
    /// Informational message
    Info,
    /// Bootloader acknowledge
    BlcuAck,
}

impl PacketKind {
    /// Parse a schema kind name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "data" => Some(PacketKind::Data),
            "order" => Some(PacketKind::Order),
            "warning" => Some(PacketKind::Warning),
            "fault" => Some(PacketKind::Fault),
            "info" => Some(PacketKind::Info),
            "blcu_ack" => Some(PacketKind::BlcuAck),
            _ => None,
        }
    }

    /// True for the kinds the message parser interprets
    pub fn is_message(&self) -> bool {
        matches!(
            self,
            PacketKind::Warning | PacketKind::Fault | PacketKind::Info | PacketKind::BlcuAck
        )
    }
}

/// Schema description of one packet
#[derive(Debug, Clone, PartialEq)]
pub struct PacketDesc {
    pub id: u16,
    pub name: String,
    pub kind: PacketKind,
    /// Declaration order drives the wire layout
    pub fields: Vec<FieldDesc>,
}

impl PacketDesc {
    /// Orders carry a trailing enabled mask, one bit per field
    pub fn has_enabled_mask(&self) -> bool {
        self.kind == PacketKind::Order
    }

    /// Byte count of the field section (excluding id and mask)
    pub fn values_size(&self) -> usize {
        self.fields.iter().map(|f| f.kind.wire_size()).sum()
    }

    /// Byte count of the enabled mask (0 unless this is an order)
    pub fn mask_size(&self) -> usize {
        if self.has_enabled_mask() {
            self.fields.len().div_ceil(8)
        } else {
            0
        }
    }
}

// =============================================================================
// Board and schema
// =============================================================================

/// One embedded controller: a distinct IP and the packets it owns
#[derive(Debug, Clone)]
pub struct Board {
    pub name: String,
    pub ip: String,
    pub packets: HashMap<u16, Arc<PacketDesc>>,
}

/// Immutable schema, built once at startup
///
/// Cheap to share (`Arc<Schema>`); no component mutates it at runtime.
#[derive(Debug, Default)]
pub struct Schema {
    boards: HashMap<String, Board>,
    packets: HashMap<u16, Arc<PacketDesc>>,
    board_by_packet: HashMap<u16, String>,
}

impl Schema {
    /// Assemble and validate a schema from board descriptions
    ///
    /// Rejects duplicate packet ids across boards and enums with no variants
    /// or more variants than one byte can index.
    pub fn build(boards: Vec<Board>) -> Result<Self> {
        let mut schema = Schema::default();

        for board in boards {
            for (id, packet) in &board.packets {
                if schema.packets.contains_key(id) {
                    return Err(GatewayError::SchemaValidation {
                        reason: format!("duplicate packet id {:#06x}", id),
                    });
                }
                for field in &packet.fields {
                    if let FieldKind::Enum(variants) = &field.kind {
                        if variants.is_empty() {
                            return Err(GatewayError::SchemaValidation {
                                reason: format!("enum field {} has no variants", field.name),
                            });
                        }
                        if variants.len() > u8::MAX as usize + 1 {
                            return Err(GatewayError::SchemaValidation {
                                reason: format!(
                                    "enum field {} has {} variants, max is 256",
                                    field.name,
                                    variants.len()
                                ),
                            });
                        }
                    }
                }
                schema.packets.insert(*id, packet.clone());
                schema.board_by_packet.insert(*id, board.name.clone());
            }
            schema.boards.insert(board.name.clone(), board);
        }

        Ok(schema)
    }

    /// Look up a packet description by id
    pub fn packet(&self, id: u16) -> Option<&PacketDesc> {
        self.packets.get(&id).map(Arc::as_ref)
    }

    /// Board that owns the given packet id
    pub fn board_for(&self, id: u16) -> Option<&str> {
        self.board_by_packet.get(&id).map(String::as_str)
    }

    /// Routing table: packet id → board name
    pub fn routing(&self) -> &HashMap<u16, String> {
        &self.board_by_packet
    }

    /// Look up a board by name
    pub fn board(&self, name: &str) -> Option<&Board> {
        self.boards.get(name)
    }

    /// All boards
    pub fn boards(&self) -> impl Iterator<Item = &Board> {
        self.boards.values()
    }

    /// Per-board catalogue of order packets, for console enumeration
    pub fn orders_by_board(&self) -> HashMap<&str, Vec<&PacketDesc>> {
        let mut catalogue: HashMap<&str, Vec<&PacketDesc>> = HashMap::new();
        for board in self.boards.values() {
            let mut orders: Vec<&PacketDesc> = board
                .packets
                .values()
                .filter(|p| p.kind == PacketKind::Order)
                .map(Arc::as_ref)
                .collect();
            orders.sort_by_key(|p| p.id);
            catalogue.insert(board.name.as_str(), orders);
        }
        catalogue
    }

    /// Build the pod- and display-side unit converters from the field specs
    pub fn unit_converters(&self) -> (UnitConverter, UnitConverter) {
        let mut pod = UnitConverter::default();
        let mut display = UnitConverter::default();
        for packet in self.packets.values() {
            for field in &packet.fields {
                if let Some(conv) = &field.pod_units {
                    pod.register(&field.name, conv.clone());
                }
                if let Some(conv) = &field.display_units {
                    display.register(&field.name, conv.clone());
                }
            }
        }
        (pod, display)
    }
}

// =============================================================================
// Test fixtures
// =============================================================================


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_num_width_sizes() {
        assert_eq!(NumWidth::I8.size(), 1);
        assert_eq!(NumWidth::U16.size(), 2);
        assert_eq!(NumWidth::F32.size(), 4);
        assert_eq!(NumWidth::U64.size(), 8);
        assert_eq!(NumWidth::F64.size(), 8);
    }

    #[test]
    fn test_num_width_parse_long_and_short_names() {
        assert_eq!(NumWidth::parse("uint16"), Some(NumWidth::U16));
        assert_eq!(NumWidth::parse("u16"), Some(NumWidth::U16));
        assert_eq!(NumWidth::parse("float64"), Some(NumWidth::F64));
        assert_eq!(NumWidth::parse("bool"), None);
    }

    #[test]
    fn test_packet_sizes() {
        let schema = test_schema();

        let data = schema.packet(0x100).unwrap();
        assert_eq!(data.values_size(), 2 + 4 + 1);
        assert_eq!(data.mask_size(), 0);
        assert!(!data.has_enabled_mask());

        let order = schema.packet(0x200).unwrap();
        assert_eq!(order.values_size(), 1 + 1 + 1);
        assert_eq!(order.mask_size(), 1);
        assert!(order.has_enabled_mask());
    }

    #[test]
    fn test_mask_size_rounds_up_to_byte() {
        let order = PacketDesc {
            id: 1,
            name: "wide".into(),
            kind: PacketKind::Order,
            fields: (0..9).map(|i| boolean(&format!("b{}", i))).collect(),
        };
        assert_eq!(order.mask_size(), 2);
    }

    #[test]
    fn test_routing_built_from_boards() {
        let schema = test_schema();
        assert_eq!(schema.board_for(0x100), Some("vcu"));
        assert_eq!(schema.board_for(0x300), Some("bcu"));
        assert_eq!(schema.board_for(0x999), None);
    }

    #[test]
    fn test_build_rejects_duplicate_ids() {
        let a = board(
            "a",
            vec![PacketDesc {
                id: 7,
                name: "a_status".into(),
                kind: PacketKind::Data,
                fields: vec![],
            }],
        );
        let b = board(
            "b",
            vec![PacketDesc {
                id: 7,
                name: "b_status".into(),
                kind: PacketKind::Data,
                fields: vec![],
            }],
        );
        assert!(Schema::build(vec![a, b]).is_err());
    }

    #[test]
    fn test_build_rejects_empty_enum() {
        let bad = board(
            "a",
            vec![PacketDesc {
                id: 7,
                name: "a_mode".into(),
                kind: PacketKind::Data,
                fields: vec![enumeration("mode", &[])],
            }],
        );
        assert!(Schema::build(vec![bad]).is_err());
    }

    #[test]
    fn test_orders_by_board_lists_only_orders() {
        let schema = test_schema();
        let catalogue = schema.orders_by_board();
        assert_eq!(catalogue["vcu"].len(), 1);
        assert_eq!(catalogue["vcu"][0].id, 0x200);
        assert!(catalogue["bcu"].is_empty());
    }
}
