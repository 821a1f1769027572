//! Arithmetic, comparison and increment operations for the VM.

use cinder_compiler::compiler::lir::{BinaryOp, ScalarKind, UnaryOp};

use super::VmError;
use crate::values::{Address, Value};

/// Kind to compute in when the static type was not known.
fn dynamic_kind(a: Value, b: Value) -> ScalarKind {
    match (a, b) {
        (Value::Float(_), _) | (_, Value::Float(_)) => ScalarKind::F64,
        (Value::Ptr(_), _) | (_, Value::Ptr(_)) => ScalarKind::Ptr,
        _ => ScalarKind::I64,
    }
}

fn is_comparison(op: BinaryOp) -> bool {
    matches!(
        op,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne
    )
}

fn compare<T: PartialOrd>(op: BinaryOp, a: T, b: T) -> bool {
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        BinaryOp::Ge => a >= b,
        BinaryOp::Eq => a == b,
        _ => a != b,
    }
}

fn invalid(op: BinaryOp, kind: ScalarKind) -> VmError {
    VmError::Runtime(format!("invalid operands to {:?} on {:?}", op, kind))
}

pub(crate) fn binary(op: BinaryOp, kind: ScalarKind, a: Value, b: Value) -> Result<Value, VmError> {
    let kind = if kind == ScalarKind::Dyn { dynamic_kind(a, b) } else { kind };

    if is_comparison(op) {
        let result = match kind {
            ScalarKind::F32 | ScalarKind::F64 => compare(op, a.as_f64(), b.as_f64()),
            ScalarKind::Ptr => compare(op, a.as_bits(), b.as_bits()),
            k if k.is_unsigned() => compare(op, a.as_i64() as u64, b.as_i64() as u64),
            _ => compare(op, a.as_i64(), b.as_i64()),
        };
        return Ok(Value::Int(result as i64));
    }

    match kind {
        ScalarKind::F32 | ScalarKind::F64 => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let r = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Rem => x % y,
                _ => return Err(invalid(op, kind)),
            };
            Ok(Value::Float(r).coerce(kind))
        }
        ScalarKind::Ptr => {
            let r = match op {
                BinaryOp::BitAnd => a.as_bits() & b.as_bits(),
                BinaryOp::BitOr => a.as_bits() | b.as_bits(),
                _ => return Err(invalid(op, kind)),
            };
            Ok(Value::Ptr(r))
        }
        _ => integer(op, kind, a.as_i64(), b.as_i64()).map(Value::Int),
    }
}

fn integer(op: BinaryOp, kind: ScalarKind, x: i64, y: i64) -> Result<i64, VmError> {
    let unsigned = kind.is_unsigned();
    let r = match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Div | BinaryOp::Rem if y == 0 => return Err(VmError::DivisionByZero),
        BinaryOp::Div if unsigned => ((x as u64) / (y as u64)) as i64,
        BinaryOp::Div => x.wrapping_div(y),
        BinaryOp::Rem if unsigned => ((x as u64) % (y as u64)) as i64,
        BinaryOp::Rem => x.wrapping_rem(y),
        BinaryOp::Shl => x.wrapping_shl((y & 63) as u32),
        BinaryOp::Shr if unsigned => ((x as u64) >> (y & 63)) as i64,
        BinaryOp::Shr => x >> (y & 63),
        BinaryOp::BitAnd => x & y,
        BinaryOp::BitOr => x | y,
        BinaryOp::BitXor => x ^ y,
        _ => return Err(invalid(op, kind)),
    };
    Ok(kind.wrap(r))
}

pub(crate) fn unary(op: UnaryOp, kind: ScalarKind, v: Value) -> Result<Value, VmError> {
    let kind = if kind == ScalarKind::Dyn { dynamic_kind(v, Value::Int(0)) } else { kind };
    match op {
        UnaryOp::Not => Ok(Value::Int(!v.is_truthy() as i64)),
        UnaryOp::Neg if kind.is_float() => Ok(Value::Float(-v.as_f64()).coerce(kind)),
        UnaryOp::Neg if kind != ScalarKind::Ptr => {
            Ok(Value::Int(kind.wrap(v.as_i64().wrapping_neg())))
        }
        UnaryOp::BitNot if kind.is_integer() => Ok(Value::Int(kind.wrap(!v.as_i64()))),
        _ => Err(VmError::Runtime(format!("invalid operand to {:?} on {:?}", op, kind))),
    }
}

/// `old + amount` for `++`/`--`; pointer amounts are already in slots.
pub(crate) fn step(kind: ScalarKind, old: Value, amount: i64) -> Value {
    match (kind, old) {
        (ScalarKind::Ptr, _) | (ScalarKind::Dyn, Value::Ptr(_)) => {
            Value::Ptr(Address::decode(old.as_bits()).offset(amount).encode())
        }
        (ScalarKind::Dyn, Value::Float(f)) => Value::Float(f + amount as f64),
        (ScalarKind::Dyn, _) => Value::Int(old.as_i64().wrapping_add(amount)),
        (k, _) if k.is_float() => Value::Float(old.as_f64() + amount as f64).coerce(k),
        (k, _) => Value::Int(k.wrap(old.as_i64().wrapping_add(amount))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: BinaryOp, kind: ScalarKind, a: Value, b: Value) -> Value {
        binary(op, kind, a, b).unwrap()
    }

    #[test]
    fn signed_and_unsigned_division_differ() {
        let minus_one = Value::Int(ScalarKind::U32.wrap(-1));
        let two = Value::Int(2);
        assert_eq!(eval(BinaryOp::Div, ScalarKind::U32, minus_one, two), Value::Int(0x7fff_ffff));
        assert_eq!(eval(BinaryOp::Div, ScalarKind::I32, Value::Int(-7), two), Value::Int(-3));
        assert!(matches!(
            binary(BinaryOp::Rem, ScalarKind::I32, Value::Int(1), Value::Int(0)),
            Err(VmError::DivisionByZero)
        ));
    }

    #[test]
    fn integer_overflow_wraps_to_the_kind() {
        let max = Value::Int(i32::MAX as i64);
        assert_eq!(
            eval(BinaryOp::Add, ScalarKind::I32, max, Value::Int(1)),
            Value::Int(i32::MIN as i64)
        );
    }

    #[test]
    fn unsigned_comparison_uses_unsigned_order() {
        let big = Value::Int(ScalarKind::U64.wrap(-1));
        assert_eq!(eval(BinaryOp::Gt, ScalarKind::U64, big, Value::Int(1)), Value::Int(1));
        assert_eq!(eval(BinaryOp::Gt, ScalarKind::I64, big, Value::Int(1)), Value::Int(0));
    }

    #[test]
    fn dynamic_operands_pick_their_kind_at_run_time() {
        assert_eq!(
            eval(BinaryOp::Add, ScalarKind::Dyn, Value::Int(1), Value::Float(0.5)),
            Value::Float(1.5)
        );
        let product = eval(BinaryOp::Mul, ScalarKind::Dyn, Value::Int(6), Value::Int(7));
        assert_eq!(product, Value::Int(42));
        assert_eq!(
            unary(UnaryOp::Neg, ScalarKind::Dyn, Value::Float(2.0)).unwrap(),
            Value::Float(-2.0)
        );
    }

    #[test]
    fn float_bit_operations_are_rejected() {
        let (a, b) = (Value::Float(1.0), Value::Float(2.0));
        assert!(binary(BinaryOp::BitAnd, ScalarKind::F64, a, b).is_err());
    }

    #[test]
    fn step_moves_pointers_by_slots() {
        let p = Value::Ptr(Address::global(10).encode());
        assert_eq!(step(ScalarKind::Ptr, p, 3), Value::Ptr(Address::global(13).encode()));
        assert_eq!(step(ScalarKind::U8, Value::Int(255), 1), Value::Int(0));
    }
}
