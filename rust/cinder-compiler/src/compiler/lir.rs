//! LIR (Cinder Intermediate Representation) data types.
//! Stack-machine bytecode over slot-addressed memory.

use serde::{Deserialize, Serialize};
use strum::{EnumString, IntoStaticStr};

/// Machine-level shape of a scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    Bool,
    F32,
    F64,
    Ptr,
    /// Runtime-typed value produced by dynamic evaluation.
    Dyn,
}

impl ScalarKind {
    pub fn is_float(self) -> bool {
        matches!(self, ScalarKind::F32 | ScalarKind::F64)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, ScalarKind::U8 | ScalarKind::U16 | ScalarKind::U32 | ScalarKind::U64)
    }

    pub fn is_integer(self) -> bool {
        !self.is_float() && !matches!(self, ScalarKind::Ptr | ScalarKind::Dyn)
    }

    /// Truncates `value` to this kind's width, sign-extending for signed kinds.
    pub fn wrap(self, value: i64) -> i64 {
        match self {
            ScalarKind::I8 => value as i8 as i64,
            ScalarKind::I16 => value as i16 as i64,
            ScalarKind::I32 => value as i32 as i64,
            ScalarKind::U8 => value as u8 as i64,
            ScalarKind::U16 => value as u16 as i64,
            ScalarKind::U32 => value as u32 as i64,
            ScalarKind::Bool => (value != 0) as i64,
            _ => value,
        }
    }
}

/// Functions provided by the runtime rather than by user code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, IntoStaticStr,
)]
pub enum Builtin {
    #[strum(serialize = "printf")]
    Printf,
    #[strum(serialize = "puts")]
    Puts,
    #[strum(serialize = "putchar")]
    Putchar,
    #[strum(serialize = "abs")]
    Abs,
    #[strum(serialize = "labs")]
    Labs,
    #[strum(serialize = "fabs")]
    Fabs,
    #[strum(serialize = "sqrt")]
    Sqrt,
    #[strum(serialize = "pow")]
    Pow,
    #[strum(serialize = "floor")]
    Floor,
    #[strum(serialize = "ceil")]
    Ceil,
    #[strum(serialize = "strlen")]
    Strlen,
    /// `__cinder_eval(session, template, addresses...)`
    #[strum(serialize = "__cinder_eval")]
    Eval,
    #[strum(serialize = "__cinder_print_value")]
    PrintValue,
    #[strum(serialize = "__cinder_set_result")]
    SetResult,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Entry points that only exist once the session runtime is installed.
    pub fn is_runtime_hook(self) -> bool {
        matches!(self, Builtin::Eval | Builtin::PrintValue | Builtin::SetResult)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

/// How a printed value is laid out in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrintShape {
    Scalar { label: String, kind: ScalarKind },
    Char { label: String, kind: ScalarKind },
    CString { label: String },
    Pointer { label: String },
    Array { label: String, elem: Box<PrintShape>, len: u64, stride: u64 },
    Record { label: String, fields: Vec<(String, u64, PrintShape)> },
    Enum { label: String },
    Dynamic,
}

impl PrintShape {
    /// True for shapes read through an address instead of a value.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, PrintShape::Array { .. } | PrintShape::Record { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    PushInt(i64),
    PushFloat(f64),
    PushPtr(u64),
    /// Address of string literal `n` of the owning module.
    PushStr(u32),
    LocalAddr(u32),
    GlobalAddr(String),
    Load(ScalarKind),
    /// Pops value then address, stores, pushes the stored value.
    Store(ScalarKind),
    /// Pops source then destination address and copies `n` slots.
    CopySlots(u32),
    Dup,
    Pop,
    Convert { from: ScalarKind, to: ScalarKind },
    Binary { op: BinaryOp, kind: ScalarKind },
    Unary { op: UnaryOp, kind: ScalarKind },
    /// Pops an integer then a pointer and advances the pointer by `stride` slots per unit.
    PtrAdd(i64),
    PtrDiff(i64),
    /// Pops an address, adds `amount`, stores, pushes the old (`post`) or new value.
    IncDec { kind: ScalarKind, amount: i64, post: bool },
    Jump(usize),
    JumpIfFalse(usize),
    JumpIfTrue(usize),
    Call { name: String, argc: u32 },
    Builtin { builtin: Builtin, argc: u32 },
    PrintValue(PrintShape),
    Return,
    ReturnVoid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LirFunction {
    pub name: String,
    pub params: Vec<ScalarKind>,
    pub ret: Option<ScalarKind>,
    pub frame_slots: u32,
    pub code: Vec<Instr>,
}

/// Constant stored into a global slot at link time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LirConst {
    Int(i64),
    Float(f64),
    Ptr(u64),
    Str(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LirGlobal {
    pub name: String,
    pub slots: u32,
    pub init: Vec<(u32, LirConst)>,
}

/// Everything one fragment contributes to the running program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LirModule {
    pub globals: Vec<LirGlobal>,
    pub functions: Vec<LirFunction>,
    pub strings: Vec<String>,
    /// Functions to call once after linking, in order.
    pub initializers: Vec<String>,
}

impl LirModule {
    pub fn intern_string(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.strings.iter().position(|existing| existing == s) {
            return idx as u32;
        }
        self.strings.push(s.to_string());
        (self.strings.len() - 1) as u32
    }

    pub fn function(&self, name: &str) -> Option<&LirFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty() && self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn wrap_truncates_to_width() {
        assert_eq!(ScalarKind::I8.wrap(200), -56);
        assert_eq!(ScalarKind::U8.wrap(-1), 255);
        assert_eq!(ScalarKind::I32.wrap(1 << 32), 0);
        assert_eq!(ScalarKind::Bool.wrap(7), 1);
    }

    #[test]
    fn builtin_names_round_trip() {
        assert_eq!(Builtin::from_str("printf").unwrap(), Builtin::Printf);
        assert_eq!(Builtin::Eval.name(), "__cinder_eval");
        assert!(Builtin::from_str("malloc").is_err());
    }

    #[test]
    fn module_interns_strings_once() {
        let mut module = LirModule::default();
        assert_eq!(module.intern_string("hi"), 0);
        assert_eq!(module.intern_string("there"), 1);
        assert_eq!(module.intern_string("hi"), 0);
    }
}
