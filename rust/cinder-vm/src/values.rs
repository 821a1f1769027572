//! Slot values and pointer encoding for the Cinder VM.
//!
//! Memory is a sequence of slots, one [`Value`] per scalar. A pointer packs
//! the region it points into in its top byte and the slot index in the rest,
//! so pointer arithmetic on slot indices stays plain integer arithmetic.

use cinder_compiler::compiler::lir::ScalarKind;
use serde::{Deserialize, Serialize};
use std::fmt;

const TAG_SHIFT: u32 = 56;
const INDEX_MASK: u64 = (1 << TAG_SHIFT) - 1;

/// Memory region a pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    /// Not backed by VM memory; `0` is the null pointer.
    Raw,
    Global,
    Stack,
}

/// Decoded pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub region: Region,
    pub index: u64,
}

impl Address {
    pub fn global(index: u64) -> Self {
        Self { region: Region::Global, index }
    }

    pub fn stack(index: u64) -> Self {
        Self { region: Region::Stack, index }
    }

    pub fn encode(self) -> u64 {
        let tag = match self.region {
            Region::Raw => 0u64,
            Region::Global => 1,
            Region::Stack => 2,
        };
        (tag << TAG_SHIFT) | (self.index & INDEX_MASK)
    }

    pub fn decode(bits: u64) -> Self {
        let region = match bits >> TAG_SHIFT {
            1 => Region::Global,
            2 => Region::Stack,
            _ => return Self { region: Region::Raw, index: bits },
        };
        Self { region, index: bits & INDEX_MASK }
    }

    /// Moves by `delta` slots, keeping the region.
    pub fn offset(self, delta: i64) -> Self {
        let index = (self.index as i64).wrapping_add(delta) as u64 & INDEX_MASK;
        Self { region: self.region, index }
    }
}

/// Runtime value held in one memory slot or on the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Void,
    /// Every integer kind, `bool` and `char`, stored sign-extended or
    /// zero-extended to 64 bits.
    Int(i64),
    Float(f64),
    Ptr(u64),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Void => false,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Ptr(p) => *p != 0,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Value::Void => 0,
            Value::Int(n) => *n,
            Value::Float(f) => *f as i64,
            Value::Ptr(p) => *p as i64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Void => 0.0,
            Value::Int(n) => *n as f64,
            Value::Float(f) => *f,
            Value::Ptr(p) => *p as f64,
        }
    }

    pub fn as_bits(&self) -> u64 {
        match self {
            Value::Float(f) => f.to_bits(),
            other => other.as_i64() as u64,
        }
    }

    /// Converts to `to`, interpreting integers as values of kind `from`.
    pub fn convert(self, from: ScalarKind, to: ScalarKind) -> Value {
        match (self, from) {
            (Value::Int(n), ScalarKind::U64) if to.is_float() => {
                Value::Float(n as u64 as f64).coerce(to)
            }
            _ => self.coerce(to),
        }
    }

    /// Converts to `kind` based on the value's own representation.
    pub fn coerce(self, kind: ScalarKind) -> Value {
        match kind {
            ScalarKind::Dyn => self,
            ScalarKind::Bool => Value::Int(self.is_truthy() as i64),
            ScalarKind::F64 => Value::Float(self.as_f64()),
            ScalarKind::F32 => Value::Float(self.as_f64() as f32 as f64),
            ScalarKind::Ptr => Value::Ptr(match self {
                Value::Float(f) => f as u64,
                other => other.as_i64() as u64,
            }),
            int => {
                let raw = match self {
                    Value::Float(f) if int.is_unsigned() => f as u64 as i64,
                    other => other.as_i64(),
                };
                Value::Int(int.wrap(raw))
            }
        }
    }

    pub fn address(&self) -> Address {
        Address::decode(self.as_i64() as u64)
    }

    /// Name of the natural C type of the value's representation.
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Int(_) => "long",
            Value::Float(_) => "double",
            Value::Ptr(_) => "void *",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Ptr(0) => write!(f, "nullptr"),
            Value::Ptr(p) => write!(f, "0x{:x}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_round_trip_through_bits() {
        let a = Address::global(12);
        assert_eq!(Address::decode(a.encode()), a);
        let s = Address::stack(3).offset(4);
        assert_eq!(Address::decode(s.encode()), Address::stack(7));
        assert_eq!(Address::decode(0).region, Region::Raw);
    }

    #[test]
    fn coercion_follows_c_conversions() {
        assert_eq!(Value::Float(3.9).coerce(ScalarKind::I32), Value::Int(3));
        assert_eq!(Value::Int(300).coerce(ScalarKind::U8), Value::Int(44));
        assert_eq!(Value::Int(2).coerce(ScalarKind::Bool), Value::Int(1));
        assert_eq!(Value::Int(0).coerce(ScalarKind::F64), Value::Float(0.0));
        assert_eq!(Value::Float(0.1).coerce(ScalarKind::F32), Value::Float(0.1f32 as f64));
        assert_eq!(
            Value::Int(-1).convert(ScalarKind::U64, ScalarKind::F64),
            Value::Float(u64::MAX as f64)
        );
    }

    #[test]
    fn display_matches_value_printer_bodies() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Ptr(0).to_string(), "nullptr");
        assert_eq!(Value::Ptr(255).to_string(), "0xff");
    }
}
