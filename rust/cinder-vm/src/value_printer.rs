//! Rendering of interactive results as `(type) value`.

use cinder_compiler::compiler::lir::{PrintShape, ScalarKind};
use serde::Serialize;

use crate::values::{Address, Value};
use crate::vm::{Vm, VmError};

/// A value printed at the end of an input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintedValue {
    pub text: String,
    pub value: Value,
}

/// Renders `value` laid out as `shape`. Aggregates are passed by address.
pub fn render(vm: &Vm, shape: &PrintShape, value: Value) -> Result<String, VmError> {
    match shape {
        PrintShape::Dynamic if value == Value::Void => Ok("(void)".to_string()),
        PrintShape::Dynamic => Ok(format!("({}) {}", value.type_label(), body(vm, shape, value)?)),
        _ => Ok(format!("({}) {}", label(shape), body(vm, shape, value)?)),
    }
}

fn label(shape: &PrintShape) -> &str {
    match shape {
        PrintShape::Scalar { label, .. }
        | PrintShape::Char { label, .. }
        | PrintShape::CString { label }
        | PrintShape::Pointer { label }
        | PrintShape::Array { label, .. }
        | PrintShape::Record { label, .. }
        | PrintShape::Enum { label } => label,
        PrintShape::Dynamic => "auto",
    }
}

fn body(vm: &Vm, shape: &PrintShape, value: Value) -> Result<String, VmError> {
    Ok(match shape {
        PrintShape::Scalar { kind, .. } => scalar(*kind, value),
        PrintShape::Char { .. } => format!("'{}'", escape(&[value.as_i64() as u8], '\'')),
        PrintShape::CString { .. } if value.as_bits() == 0 => "nullptr".to_string(),
        PrintShape::CString { .. } => match vm.read_c_string(value) {
            Ok(s) => format!("\"{}\"", escape(s.as_bytes(), '"')),
            Err(_) => format!("0x{:x}", value.as_bits()),
        },
        PrintShape::Pointer { .. } => value.coerce(ScalarKind::Ptr).to_string(),
        PrintShape::Enum { .. } => value.as_i64().to_string(),
        PrintShape::Dynamic => value.to_string(),
        PrintShape::Array { elem, len, stride, .. } => {
            let base = Address::decode(value.as_bits());
            if let PrintShape::Char { .. } = **elem {
                let mut bytes = Vec::new();
                for i in 0..*len as i64 {
                    let c = vm.read(base.offset(i).encode())?.as_i64() as u8;
                    if c == 0 {
                        break;
                    }
                    bytes.push(c);
                }
                return Ok(format!("\"{}\"", escape(&bytes, '"')));
            }
            let mut items = Vec::with_capacity(*len as usize);
            for i in 0..*len as i64 {
                let addr = base.offset(i * *stride as i64);
                items.push(body(vm, elem, element(vm, elem, addr)?)?);
            }
            braced(items)
        }
        PrintShape::Record { fields, .. } => {
            let base = Address::decode(value.as_bits());
            let mut items = Vec::with_capacity(fields.len());
            for (name, offset, field) in fields {
                let v = element(vm, field, base.offset(*offset as i64))?;
                items.push(format!(".{} = {}", name, body(vm, field, v)?));
            }
            braced(items)
        }
    })
}

/// Loads the member at `addr`; aggregates stay addresses.
fn element(vm: &Vm, shape: &PrintShape, addr: Address) -> Result<Value, VmError> {
    if shape.is_aggregate() {
        return Ok(Value::Ptr(addr.encode()));
    }
    let raw = vm.read(addr.encode())?;
    Ok(match shape {
        PrintShape::Scalar { kind, .. } | PrintShape::Char { kind, .. } => raw.coerce(*kind),
        PrintShape::CString { .. } | PrintShape::Pointer { .. } => raw.coerce(ScalarKind::Ptr),
        PrintShape::Enum { .. } => raw.coerce(ScalarKind::I32),
        _ => raw,
    })
}

fn scalar(kind: ScalarKind, value: Value) -> String {
    match kind {
        ScalarKind::Bool => (if value.is_truthy() { "true" } else { "false" }).to_string(),
        ScalarKind::F32 => format!("{:?}", value.as_f64() as f32),
        ScalarKind::F64 => format!("{:?}", value.as_f64()),
        ScalarKind::Ptr => value.coerce(ScalarKind::Ptr).to_string(),
        ScalarKind::Dyn => value.to_string(),
        k => k.wrap(value.as_i64()).to_string(),
    }
}

fn braced(items: Vec<String>) -> String {
    if items.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", items.join(", "))
    }
}

fn escape(bytes: &[u8], quote: char) -> String {
    let mut out = String::new();
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b'\\' => out.push_str("\\\\"),
            0 => out.push_str("\\0"),
            b if b as char == quote => {
                out.push('\\');
                out.push(quote);
            }
            b if b.is_ascii_graphic() || b == b' ' => out.push(b as char),
            b => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_compiler::compiler::lir::{LirConst, LirGlobal, LirModule};

    fn scalar_shape(label: &str, kind: ScalarKind) -> PrintShape {
        PrintShape::Scalar { label: label.into(), kind }
    }

    #[test]
    fn scalars_carry_their_type_label() {
        let vm = Vm::new();
        let int = scalar_shape("int", ScalarKind::I32);
        assert_eq!(render(&vm, &int, Value::Int(4)).unwrap(), "(int) 4");
        let double = scalar_shape("double", ScalarKind::F64);
        assert_eq!(render(&vm, &double, Value::Float(2.0)).unwrap(), "(double) 2.0");
        let bool_ = scalar_shape("bool", ScalarKind::Bool);
        assert_eq!(render(&vm, &bool_, Value::Int(1)).unwrap(), "(bool) true");
        let c = PrintShape::Char { label: "char".into(), kind: ScalarKind::I8 };
        assert_eq!(render(&vm, &c, Value::Int(b'\n' as i64)).unwrap(), "(char) '\\n'");
        assert_eq!(render(&vm, &PrintShape::Dynamic, Value::Float(1.5)).unwrap(), "(double) 1.5");
    }

    #[test]
    fn aggregates_are_read_through_memory() {
        let mut vm = Vm::new();
        let module = LirModule {
            globals: vec![
                LirGlobal {
                    name: "a".into(),
                    slots: 3,
                    init: vec![(0, LirConst::Int(1)), (1, LirConst::Int(2)), (2, LirConst::Int(3))],
                },
                LirGlobal {
                    name: "p".into(),
                    slots: 2,
                    init: vec![(0, LirConst::Int(1)), (1, LirConst::Float(2.5))],
                },
                LirGlobal { name: "s".into(), slots: 1, init: vec![(0, LirConst::Str(0))] },
            ],
            strings: vec!["hi\n".into()],
            ..Default::default()
        };
        vm.link(module).unwrap();

        let array = PrintShape::Array {
            label: "int[3]".into(),
            elem: Box::new(scalar_shape("int", ScalarKind::I32)),
            len: 3,
            stride: 1,
        };
        let a = Value::Ptr(vm.global_address("a").unwrap());
        assert_eq!(render(&vm, &array, a).unwrap(), "(int[3]) { 1, 2, 3 }");

        let record = PrintShape::Record {
            label: "Point".into(),
            fields: vec![
                ("x".into(), 0, scalar_shape("int", ScalarKind::I32)),
                ("y".into(), 1, scalar_shape("double", ScalarKind::F64)),
            ],
        };
        let p = Value::Ptr(vm.global_address("p").unwrap());
        assert_eq!(render(&vm, &record, p).unwrap(), "(Point) { .x = 1, .y = 2.5 }");

        let s = vm.read(vm.global_address("s").unwrap()).unwrap();
        let cstr = PrintShape::CString { label: "const char *".into() };
        assert_eq!(render(&vm, &cstr, s).unwrap(), "(const char *) \"hi\\n\"");
        assert_eq!(render(&vm, &cstr, Value::Ptr(0)).unwrap(), "(const char *) nullptr");
    }
}
