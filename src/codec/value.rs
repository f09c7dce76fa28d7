//! Typed field section of a frame
//!
//! Walks the schema's field descriptors in declaration order, reading or
//! writing each at its declared width. All numerics travel as `f64` inside
//! the gateway; the declared width only matters on the wire.

use std::collections::HashMap;

use super::{ByteReader, Value};
use crate::error::{GatewayError, Result};
use crate::schema::{FieldDesc, FieldKind, NumWidth, PacketDesc};

/// Decode every field of `packet` from the reader, in schema order
pub(crate) fn decode_values(
    packet: &PacketDesc,
    reader: &mut ByteReader<'_>,
) -> Result<HashMap<String, Value>> {
    let mut values = HashMap::with_capacity(packet.fields.len());
    for field in &packet.fields {
        values.insert(field.name.clone(), decode_field(field, reader)?);
    }
    Ok(values)
}

/// Encode every field of `packet` into `out`, in schema order
///
/// Every schema field must be present in `values` with a matching variant.
pub(crate) fn encode_values(
    packet: &PacketDesc,
    values: &HashMap<String, Value>,
    out: &mut Vec<u8>,
) -> Result<()> {
    for field in &packet.fields {
        let value = values
            .get(&field.name)
            .ok_or_else(|| GatewayError::UnknownField {
                id: packet.id,
                field: field.name.clone(),
            })?;
        encode_field(field, value, out)?;
    }
    Ok(())
}

fn decode_field(field: &FieldDesc, reader: &mut ByteReader<'_>) -> Result<Value> {
    match &field.kind {
        FieldKind::Numeric(width) => Ok(Value::Numeric(decode_numeric(*width, reader)?)),
        FieldKind::Boolean => {
            let byte = reader.take(1)?[0];
            Ok(Value::Boolean(byte != 0))
        }
        FieldKind::Enum(variants) => {
            let index = reader.take(1)?[0];
            let variant =
                variants
                    .get(index as usize)
                    .ok_or_else(|| GatewayError::InvalidEnum {
                        field: field.name.clone(),
                        index,
                        variants: variants.len(),
                    })?;
            Ok(Value::Enum(variant.clone()))
        }
    }
}

fn decode_numeric(width: NumWidth, reader: &mut ByteReader<'_>) -> Result<f64> {
    // take() guarantees the exact width, so the array conversions cannot fail
    let bytes = reader.take(width.size())?;
    let value = match width {
        NumWidth::I8 => i8::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::I16 => i16::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::I32 => i32::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::I64 => i64::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::U8 => u8::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::U16 => u16::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::U32 => u32::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::U64 => u64::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::F32 => f32::from_le_bytes(bytes.try_into().unwrap()) as f64,
        NumWidth::F64 => f64::from_le_bytes(bytes.try_into().unwrap()),
    };
    Ok(value)
}

fn encode_field(field: &FieldDesc, value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match (&field.kind, value) {
        (FieldKind::Numeric(width), Value::Numeric(v)) => {
            encode_numeric(*width, *v, out);
            Ok(())
        }
        (FieldKind::Boolean, Value::Boolean(v)) => {
            out.push(u8::from(*v));
            Ok(())
        }
        (FieldKind::Enum(variants), Value::Enum(v)) => {
            let index = variants.iter().position(|variant| variant == v).ok_or_else(|| {
                GatewayError::ValueMismatch {
                    field: field.name.clone(),
                    expected: "a declared enum variant",
                }
            })?;
            out.push(index as u8);
            Ok(())
        }
        (kind, _) => Err(GatewayError::ValueMismatch {
            field: field.name.clone(),
            expected: match kind {
                FieldKind::Numeric(_) => "a numeric value",
                FieldKind::Boolean => "a boolean value",
                FieldKind::Enum(_) => "an enum variant",
            },
        }),
    }
}

fn encode_numeric(width: NumWidth, v: f64, out: &mut Vec<u8>) {
    match width {
        NumWidth::I8 => out.extend_from_slice(&(v as i8).to_le_bytes()),
        NumWidth::I16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
        NumWidth::I32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
        NumWidth::I64 => out.extend_from_slice(&(v as i64).to_le_bytes()),
        NumWidth::U8 => out.extend_from_slice(&(v as u8).to_le_bytes()),
        NumWidth::U16 => out.extend_from_slice(&(v as u16).to_le_bytes()),
        NumWidth::U32 => out.extend_from_slice(&(v as u32).to_le_bytes()),
        NumWidth::U64 => out.extend_from_slice(&(v as u64).to_le_bytes()),
        NumWidth::F32 => out.extend_from_slice(&(v as f32).to_le_bytes()),
        NumWidth::F64 => out.extend_from_slice(&v.to_le_bytes()),
    }
}
