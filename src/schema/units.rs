//! Unit conversion between wire, SI and display scales
//!
//! Each field may declare a conversion spec in the schema. Two converter
//! instances coexist: the *pod* converter (wire ↔ SI) and the *display*
//! converter (SI ↔ UI units). Inbound the pipeline applies `pod.revert` then
//! `display.convert`; outbound the exact inverse, `display.revert` then
//! `pod.convert`.
//!
//! Specs are either an operation chain (`"*0.001+4"`, applied left to right)
//! or a polynomial (`"poly:c0,c1,c2"`). Operation chains invert exactly by
//! applying the reversed inverse steps; polynomials invert only up to degree
//! one, higher degrees pass values through unchanged on revert.

use std::collections::HashMap;

use crate::codec::Value;
use crate::error::{GatewayError, Result};

/// One affine step of an operation chain
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    Add(f64),
    Sub(f64),
    Mul(f64),
    Div(f64),
}

impl Op {
    fn apply(&self, v: f64) -> f64 {
        match self {
            Op::Add(x) => v + x,
            Op::Sub(x) => v - x,
            Op::Mul(x) => v * x,
            Op::Div(x) => v / x,
        }
    }

    fn invert(&self, v: f64) -> f64 {
        match self {
            Op::Add(x) => v - x,
            Op::Sub(x) => v + x,
            Op::Mul(x) => v / x,
            Op::Div(x) => v * x,
        }
    }
}

/// Numeric transform declared by a schema field
#[derive(Debug, Clone, PartialEq)]
pub enum Conversion {
    Identity,
    /// Affine steps applied left to right
    Ops(Vec<Op>),
    /// Coefficients low to high: c0 + c1·x + c2·x² + ...
    Polynomial(Vec<f64>),
}

impl Conversion {
    /// Parse a schema conversion spec
    ///
    /// Accepts the empty string (identity), `"poly:c0,c1,..."`, or an
    /// operation chain such as `"*0.001+4"`. Scaling by zero is rejected
    /// because it cannot be inverted.
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Ok(Conversion::Identity);
        }

        if let Some(coeffs) = spec.strip_prefix("poly:") {
            let coeffs = coeffs
                .split(',')
                .map(|c| c.trim().parse::<f64>())
                .collect::<std::result::Result<Vec<f64>, _>>()
                .map_err(|e| GatewayError::SchemaValidation {
                    reason: format!("bad polynomial spec {:?}: {}", spec, e),
                })?;
            if coeffs.is_empty() {
                return Err(GatewayError::SchemaValidation {
                    reason: format!("polynomial spec {:?} has no coefficients", spec),
                });
            }
            return Ok(Conversion::Polynomial(coeffs));
        }

        let ops = parse_ops(spec)?;
        Ok(Conversion::Ops(ops))
    }

    /// Forward transform
    pub fn apply(&self, v: f64) -> f64 {
        match self {
            Conversion::Identity => v,
            Conversion::Ops(ops) => ops.iter().fold(v, |acc, op| op.apply(acc)),
            Conversion::Polynomial(coeffs) => {
                // Horner, high to low
                coeffs.iter().rev().fold(0.0, |acc, c| acc * v + c)
            }
        }
    }

    /// Inverse transform
    ///
    /// Polynomials of degree two or higher have no general inverse; the
    /// value passes through unchanged.
    pub fn invert(&self, v: f64) -> f64 {
        match self {
            Conversion::Identity => v,
            Conversion::Ops(ops) => ops.iter().rev().fold(v, |acc, op| op.invert(acc)),
            Conversion::Polynomial(coeffs) => match coeffs.len() {
                // Only the affine case has a general inverse
                2 => (v - coeffs[0]) / coeffs[1],
                _ => v,
            },
        }
    }
}

/// Scan an operation chain: op character followed by a float literal
fn parse_ops(spec: &str) -> Result<Vec<Op>> {
    let bad = |reason: String| GatewayError::SchemaValidation { reason };

    let mut ops = Vec::new();
    let mut chars = spec.char_indices().peekable();

    while let Some((start, op_char)) = chars.next() {
        if !matches!(op_char, '+' | '-' | '*' | '/') {
            return Err(bad(format!(
                "bad conversion spec {:?}: expected operator at byte {}",
                spec, start
            )));
        }

        let num_start = start + op_char.len_utf8();
        let mut num_end = num_start;
        let mut prev_exponent = false;
        while let Some(&(i, c)) = chars.peek() {
            let part_of_number =
                c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || (prev_exponent && (c == '+' || c == '-'));
            if !part_of_number {
                break;
            }
            prev_exponent = c == 'e' || c == 'E';
            num_end = i + c.len_utf8();
            chars.next();
        }

        let operand: f64 = spec[num_start..num_end].parse().map_err(|_| {
            bad(format!(
                "bad conversion spec {:?}: no operand after {:?}",
                spec, op_char
            ))
        })?;

        let op = match op_char {
            '+' => Op::Add(operand),
            '-' => Op::Sub(operand),
            '*' => Op::Mul(operand),
            _ => Op::Div(operand),
        };
        if matches!(op, Op::Mul(x) | Op::Div(x) if x == 0.0) {
            return Err(bad(format!(
                "bad conversion spec {:?}: scale by zero is not invertible",
                spec
            )));
        }
        ops.push(op);
    }

    Ok(ops)
}

// =============================================================================
// UnitConverter
// =============================================================================

/// Forward/inverse transforms keyed by field name
///
/// Fields without a registered conversion pass through unchanged; boolean
/// and enum values are never touched.
#[derive(Debug, Default, Clone)]
pub struct UnitConverter {
    conversions: HashMap<String, Conversion>,
}

impl UnitConverter {
    /// Register the conversion for a field name
    pub fn register(&mut self, field: &str, conversion: Conversion) {
        self.conversions.insert(field.to_string(), conversion);
    }

    /// Apply the forward transform to every registered numeric field
    pub fn convert(&self, values: &mut HashMap<String, Value>) {
        for (name, value) in values.iter_mut() {
            if let (Value::Numeric(v), Some(conv)) = (&mut *value, self.conversions.get(name)) {
                *v = conv.apply(*v);
            }
        }
    }

    /// Apply the inverse transform to every registered numeric field
    pub fn revert(&self, values: &mut HashMap<String, Value>) {
        for (name, value) in values.iter_mut() {
            if let (Value::Numeric(v), Some(conv)) = (&mut *value, self.conversions.get(name)) {
                *v = conv.invert(*v);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    #[test]
    fn test_parse_op_chain() {
        let conv = Conversion::parse("*0.001+4").unwrap();
        assert_eq!(conv, Conversion::Ops(vec![Op::Mul(0.001), Op::Add(4.0)]));
        assert!((conv.apply(2000.0) - 6.0).abs() < EPSILON);
    }

    #[test]
    fn test_parse_exponent_operand() {
        let conv = Conversion::parse("*1e-3").unwrap();
        assert!((conv.apply(500.0) - 0.5).abs() < EPSILON);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Conversion::parse("abc").is_err());
        assert!(Conversion::parse("*").is_err());
        assert!(Conversion::parse("*0").is_err());
        assert!(Conversion::parse("/0.0").is_err());
        assert!(Conversion::parse("poly:").is_err());
    }

    #[test]
    fn test_empty_spec_is_identity() {
        let conv = Conversion::parse("  ").unwrap();
        assert_eq!(conv, Conversion::Identity);
        assert_eq!(conv.apply(42.0), 42.0);
        assert_eq!(conv.invert(42.0), 42.0);
    }

    #[test]
    fn test_ops_roundtrip_within_epsilon() {
        let conv = Conversion::parse("*0.3-7/2.5").unwrap();
        for v in [-1000.0, -0.5, 0.0, 0.25, 3.0, 1e6] {
            assert!((conv.invert(conv.apply(v)) - v).abs() < EPSILON);
            assert!((conv.apply(conv.invert(v)) - v).abs() < EPSILON);
        }
    }

    #[test]
    fn test_polynomial_forward_uses_horner() {
        // 1 + 2x + 3x^2 at x = 2 -> 17
        let conv = Conversion::parse("poly:1,2,3").unwrap();
        assert!((conv.apply(2.0) - 17.0).abs() < EPSILON);
    }

    #[test]
    fn test_linear_polynomial_roundtrips() {
        let conv = Conversion::parse("poly:4,0.5").unwrap();
        assert!((conv.invert(conv.apply(12.0)) - 12.0).abs() < EPSILON);
    }

    #[test]
    fn test_quadratic_polynomial_revert_is_passthrough() {
        let conv = Conversion::parse("poly:1,2,3").unwrap();
        assert_eq!(conv.invert(5.0), 5.0);
    }

    #[test]
    fn test_nan_and_inf_pass_through_as_values() {
        let conv = Conversion::parse("/0.5").unwrap();
        assert!(conv.apply(f64::NAN).is_nan());
        assert!(conv.apply(f64::INFINITY).is_infinite());
    }

    #[test]
    fn test_converter_only_touches_registered_numerics() {
        let mut converter = UnitConverter::default();
        converter.register("temp", Conversion::parse("*2").unwrap());

        let mut values = HashMap::from([
            ("temp".to_string(), Value::Numeric(10.0)),
            ("raw".to_string(), Value::Numeric(10.0)),
            ("on".to_string(), Value::Boolean(true)),
            ("mode".to_string(), Value::Enum("IDLE".to_string())),
        ]);

        converter.convert(&mut values);
        assert_eq!(values["temp"], Value::Numeric(20.0));
        assert_eq!(values["raw"], Value::Numeric(10.0));
        assert_eq!(values["on"], Value::Boolean(true));
        assert_eq!(values["mode"], Value::Enum("IDLE".to_string()));

        converter.revert(&mut values);
        assert_eq!(values["temp"], Value::Numeric(10.0));
    }
}
