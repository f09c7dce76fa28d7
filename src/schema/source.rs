//! Schema loading
//!
//! The production schema comes from the documentation spreadsheet through an
//! external exporter; the gateway only consumes the exported file. The
//! [`SchemaSource`] trait keeps that front-end swappable (tests build schemas
//! directly, deployments point at a TOML export).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::{Board, Conversion, FieldDesc, FieldKind, NumWidth, PacketDesc, PacketKind, Schema};
use crate::error::{GatewayError, Result};

/// Produces the immutable schema at startup
pub trait SchemaSource {
    fn load(&self) -> Result<Schema>;
}

// =============================================================================
// TOML-backed source
// =============================================================================

/// Schema source reading a TOML export
pub struct TomlSchemaSource {
    path: PathBuf,
}

impl TomlSchemaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SchemaSource for TomlSchemaSource {
    fn load(&self) -> Result<Schema> {
        let content = fs::read_to_string(&self.path).map_err(|e| GatewayError::SchemaRead {
            path: self.path.clone(),
            source: e,
        })?;

        let file: SchemaFile =
            toml::from_str(&content).map_err(|e| GatewayError::SchemaValidation {
                reason: format!("{}: {}", self.path.display(), e),
            })?;

        build_schema(file)
    }
}

// =============================================================================
// File representation
// =============================================================================

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    boards: Vec<BoardSpec>,
}

#[derive(Debug, Deserialize)]
struct BoardSpec {
    name: String,
    ip: String,
    #[serde(default)]
    packets: Vec<PacketSpec>,
}

#[derive(Debug, Deserialize)]
struct PacketSpec {
    id: u16,
    name: String,
    kind: String,
    #[serde(default)]
    fields: Vec<FieldSpec>,
}

#[derive(Debug, Deserialize)]
struct FieldSpec {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    pod_units: Option<String>,
    display_units: Option<String>,
}

fn build_schema(file: SchemaFile) -> Result<Schema> {
    let mut boards = Vec::with_capacity(file.boards.len());

    for board in file.boards {
        let mut packets = HashMap::with_capacity(board.packets.len());
        for packet in board.packets {
            let kind =
                PacketKind::parse(&packet.kind).ok_or_else(|| GatewayError::SchemaValidation {
                    reason: format!("packet {}: unknown kind {:?}", packet.name, packet.kind),
                })?;

            let mut fields = Vec::with_capacity(packet.fields.len());
            for field in packet.fields {
                fields.push(build_field(&packet.name, field)?);
            }

            packets.insert(
                packet.id,
                Arc::new(PacketDesc {
                    id: packet.id,
                    name: packet.name,
                    kind,
                    fields,
                }),
            );
        }
        boards.push(Board {
            name: board.name,
            ip: board.ip,
            packets,
        });
    }

    Schema::build(boards)
}

fn build_field(packet: &str, spec: FieldSpec) -> Result<FieldDesc> {
    let kind = parse_field_type(&spec.field_type).ok_or_else(|| GatewayError::SchemaValidation {
        reason: format!(
            "packet {}, field {}: unknown type {:?}",
            packet, spec.name, spec.field_type
        ),
    })?;

    let pod_units = spec.pod_units.as_deref().map(Conversion::parse).transpose()?;
    let display_units = spec
        .display_units
        .as_deref()
        .map(Conversion::parse)
        .transpose()?;

    Ok(FieldDesc {
        name: spec.name,
        kind,
        pod_units,
        display_units,
    })
}

/// Field type column: a numeric width, `bool`, or `ENUM(A,B,C)`
fn parse_field_type(field_type: &str) -> Option<FieldKind> {
    let field_type = field_type.trim();

    if let Some(width) = NumWidth::parse(field_type) {
        return Some(FieldKind::Numeric(width));
    }
    if field_type == "bool" || field_type == "boolean" {
        return Some(FieldKind::Boolean);
    }
    enum_variants(field_type).map(FieldKind::Enum)
}

/// Extract variant names from an `ENUM(A,B,C)` expression
fn enum_variants(expr: &str) -> Option<Vec<String>> {
    let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let rest = compact
        .strip_prefix("ENUM(")
        .or_else(|| compact.strip_prefix("enum("))?;
    let inner = rest.strip_suffix(')')?;
    if inner.is_empty() {
        return Some(Vec::new());
    }
    Some(inner.split(',').map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[boards]]
name = "vcu"
ip = "192.168.0.10"

[[boards.packets]]
id = 256
name = "vcu_status"
kind = "data"

[[boards.packets.fields]]
name = "pressure"
type = "float32"
pod_units = "*0.01"
display_units = "*1.5"

[[boards.packets.fields]]
name = "mode"
type = "ENUM(IDLE, RUN)"

[[boards.packets.fields]]
name = "armed"
type = "bool"

[[boards.packets]]
id = 512
name = "vcu_brake"
kind = "order"

[[boards.packets.fields]]
name = "force"
type = "uint16"
"#;

    fn load_sample(content: &str) -> Result<Schema> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        TomlSchemaSource::new(file.path()).load()
    }

    #[test]
    fn test_load_sample_schema() {
        let schema = load_sample(SAMPLE).unwrap();

        let status = schema.packet(256).unwrap();
        assert_eq!(status.kind, PacketKind::Data);
        assert_eq!(status.fields.len(), 3);
        assert_eq!(
            status.fields[1].kind,
            FieldKind::Enum(vec!["IDLE".into(), "RUN".into()])
        );
        assert_eq!(status.fields[2].kind, FieldKind::Boolean);
        assert!(status.fields[0].pod_units.is_some());

        let brake = schema.packet(512).unwrap();
        assert!(brake.has_enabled_mask());
        assert_eq!(schema.board_for(512), Some("vcu"));
    }

    #[test]
    fn test_unknown_field_type_is_rejected() {
        let bad = SAMPLE.replace("type = \"uint16\"", "type = \"uint24\"");
        assert!(load_sample(&bad).is_err());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let bad = SAMPLE.replace("kind = \"order\"", "kind = \"command\"");
        assert!(load_sample(&bad).is_err());
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        let err = TomlSchemaSource::new("/nonexistent/schema.toml")
            .load()
            .unwrap_err();
        assert!(matches!(err, GatewayError::SchemaRead { .. }));
    }

    #[test]
    fn test_enum_variant_extraction_trims_whitespace() {
        assert_eq!(
            enum_variants("ENUM( OFF , ON )"),
            Some(vec!["OFF".to_string(), "ON".to_string()])
        );
        assert_eq!(enum_variants("uint8"), None);
    }
}
