//! C types, record layouts and declarator printing.

use serde::{Deserialize, Serialize};

use crate::compiler::lir::ScalarKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntRank {
    Char,
    Short,
    Int,
    Long,
    LongLong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntKind {
    pub rank: IntRank,
    pub signed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CType {
    Void,
    Bool,
    Int(IntKind),
    Float,
    Double,
    Pointer(Box<CType>),
    /// `None` length until deduced from an initializer.
    Array(Box<CType>, Option<u64>),
    Record(RecordId),
    Enum(String),
    /// Depends on a name that only resolves at run time.
    Dependent,
    /// Value whose type is only known at run time.
    Dynamic,
}

impl CType {
    pub const INT: CType = CType::Int(IntKind { rank: IntRank::Int, signed: true });
    pub const UINT: CType = CType::Int(IntKind { rank: IntRank::Int, signed: false });
    pub const LONG: CType = CType::Int(IntKind { rank: IntRank::Long, signed: true });
    pub const ULONG: CType = CType::Int(IntKind { rank: IntRank::Long, signed: false });
    pub const CHAR: CType = CType::Int(IntKind { rank: IntRank::Char, signed: true });

    pub fn int(rank: IntRank, signed: bool) -> CType {
        CType::Int(IntKind { rank, signed })
    }

    pub fn pointer_to(ty: CType) -> CType {
        CType::Pointer(Box::new(ty))
    }

    pub fn char_ptr() -> CType {
        CType::pointer_to(CType::CHAR)
    }

    pub fn void_ptr() -> CType {
        CType::pointer_to(CType::Void)
    }

    pub fn is_void(&self) -> bool { matches!(self, CType::Void) }
    pub fn is_dependent(&self) -> bool { matches!(self, CType::Dependent) }
    pub fn is_dynamic(&self) -> bool { matches!(self, CType::Dynamic) }
    pub fn is_record(&self) -> bool { matches!(self, CType::Record(_)) }
    pub fn is_array(&self) -> bool { matches!(self, CType::Array(..)) }
    pub fn is_pointer(&self) -> bool { matches!(self, CType::Pointer(_)) }

    pub fn is_integer(&self) -> bool {
        matches!(self, CType::Bool | CType::Int(_) | CType::Enum(_))
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, CType::Float | CType::Double)
    }

    pub fn is_arithmetic(&self) -> bool {
        self.is_integer() || self.is_floating()
    }

    /// Pointers and arrays both behave as addresses in value contexts.
    pub fn is_pointer_like(&self) -> bool {
        matches!(self, CType::Pointer(_) | CType::Array(..))
    }

    pub fn is_scalar(&self) -> bool {
        self.is_arithmetic() || self.is_pointer_like() || self.is_dynamic()
    }

    pub fn is_char(&self) -> bool {
        matches!(self, CType::Int(IntKind { rank: IntRank::Char, .. }))
    }

    /// Element or pointee type.
    pub fn pointee(&self) -> Option<&CType> {
        match self {
            CType::Pointer(inner) | CType::Array(inner, _) => Some(inner),
            _ => None,
        }
    }

    /// Array-to-pointer decay.
    pub fn decay(&self) -> CType {
        match self {
            CType::Array(inner, _) => CType::Pointer(inner.clone()),
            other => other.clone(),
        }
    }

    /// Integer promotion.
    pub fn promote(&self) -> CType {
        match self {
            CType::Bool | CType::Enum(_) => CType::INT,
            CType::Int(k) if k.rank < IntRank::Int => CType::INT,
            other => other.clone(),
        }
    }

    /// Usual arithmetic conversions.
    pub fn common(a: &CType, b: &CType) -> CType {
        if a.is_dynamic() || b.is_dynamic() {
            return CType::Dynamic;
        }
        if matches!(a, CType::Double) || matches!(b, CType::Double) {
            return CType::Double;
        }
        if matches!(a, CType::Float) || matches!(b, CType::Float) {
            return CType::Float;
        }
        match (a.promote(), b.promote()) {
            (CType::Int(x), CType::Int(y)) => {
                let rank = x.rank.max(y.rank);
                let signed = if x.rank == y.rank {
                    x.signed && y.signed
                } else if x.rank > y.rank {
                    x.signed
                } else {
                    y.signed
                };
                CType::Int(IntKind { rank, signed })
            }
            (x, _) => x,
        }
    }

    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        Some(match self {
            CType::Bool => ScalarKind::Bool,
            CType::Int(IntKind { rank, signed }) => match (rank, signed) {
                (IntRank::Char, true) => ScalarKind::I8,
                (IntRank::Char, false) => ScalarKind::U8,
                (IntRank::Short, true) => ScalarKind::I16,
                (IntRank::Short, false) => ScalarKind::U16,
                (IntRank::Int, true) => ScalarKind::I32,
                (IntRank::Int, false) => ScalarKind::U32,
                (_, true) => ScalarKind::I64,
                (_, false) => ScalarKind::U64,
            },
            CType::Enum(_) => ScalarKind::I32,
            CType::Float => ScalarKind::F32,
            CType::Double => ScalarKind::F64,
            CType::Pointer(_) | CType::Array(..) => ScalarKind::Ptr,
            CType::Dynamic => ScalarKind::Dyn,
            CType::Void | CType::Record(_) | CType::Dependent => return None,
        })
    }
}

// ── Records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: CType,
    /// Offset in slots from the start of the record.
    pub slot: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDef {
    pub name: String,
    pub fields: Vec<Field>,
    pub complete: bool,
}

impl RecordDef {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Arena of record definitions, indexed by [`RecordId`].
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    records: Vec<RecordDef>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record(&mut self, def: RecordDef) -> RecordId {
        self.records.push(def);
        RecordId((self.records.len() - 1) as u32)
    }

    pub fn record(&self, id: RecordId) -> Option<&RecordDef> {
        self.records.get(id.0 as usize)
    }

    pub fn record_mut(&mut self, id: RecordId) -> Option<&mut RecordDef> {
        self.records.get_mut(id.0 as usize)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn truncate_records(&mut self, len: usize) {
        self.records.truncate(len);
    }

    /// Number of value slots an object of `ty` occupies.
    pub fn slots(&self, ty: &CType) -> u64 {
        match ty {
            CType::Array(inner, n) => self.slots(inner) * n.unwrap_or(0),
            CType::Record(id) => self
                .record(*id)
                .map(|r| r.fields.iter().map(|f| self.slots(&f.ty)).sum())
                .unwrap_or(0),
            CType::Void => 0,
            _ => 1,
        }
    }

    /// `sizeof` in bytes, `None` for incomplete types.
    pub fn size_of(&self, ty: &CType) -> Option<u64> {
        Some(match ty {
            CType::Void | CType::Dependent => return None,
            CType::Bool => 1,
            CType::Int(k) => match k.rank {
                IntRank::Char => 1,
                IntRank::Short => 2,
                IntRank::Int => 4,
                IntRank::Long | IntRank::LongLong => 8,
            },
            CType::Enum(_) | CType::Float => 4,
            CType::Double | CType::Pointer(_) | CType::Dynamic => 8,
            CType::Array(inner, n) => self.size_of(inner)? * (*n)?,
            CType::Record(id) => {
                let rec = self.record(*id)?;
                if !rec.complete {
                    return None;
                }
                let mut offset = 0u64;
                let mut align = 1u64;
                for field in &rec.fields {
                    let a = self.align_of(&field.ty);
                    align = align.max(a);
                    offset = offset.div_ceil(a) * a + self.size_of(&field.ty)?;
                }
                offset.div_ceil(align) * align
            }
        })
    }

    pub fn align_of(&self, ty: &CType) -> u64 {
        match ty {
            CType::Array(inner, _) => self.align_of(inner),
            CType::Record(id) => self
                .record(*id)
                .map(|r| r.fields.iter().map(|f| self.align_of(&f.ty)).max().unwrap_or(1))
                .unwrap_or(1),
            other => self.size_of(other).unwrap_or(1).max(1),
        }
    }

    pub fn is_complete(&self, ty: &CType) -> bool {
        match ty {
            CType::Void => false,
            CType::Array(inner, n) => n.is_some() && self.is_complete(inner),
            CType::Record(id) => self.record(*id).map(|r| r.complete).unwrap_or(false),
            _ => true,
        }
    }

    /// Abstract type name, as used in casts: `int *`, `int [3]`.
    pub fn name(&self, ty: &CType) -> String {
        self.declare(ty, "")
    }

    /// Declaration text for `name` of type `ty`: `int *p`, `char s[4]`.
    pub fn declare(&self, ty: &CType, name: &str) -> String {
        match ty {
            CType::Pointer(inner) => {
                let decl = format!("*{}", name);
                if inner.is_array() {
                    self.declare(inner, &format!("({})", decl))
                } else {
                    self.declare(inner, &decl)
                }
            }
            CType::Array(inner, n) => {
                let dim = n.map(|n| n.to_string()).unwrap_or_default();
                self.declare(inner, &format!("{}[{}]", name, dim))
            }
            base => {
                let base = self.base_name(base);
                if name.is_empty() { base } else { format!("{} {}", base, name) }
            }
        }
    }

    fn base_name(&self, ty: &CType) -> String {
        match ty {
            CType::Void => "void".into(),
            CType::Bool => "bool".into(),
            CType::Int(IntKind { rank, signed }) => {
                let base = match rank {
                    IntRank::Char => "char",
                    IntRank::Short => "short",
                    IntRank::Int => "int",
                    IntRank::Long => "long",
                    IntRank::LongLong => "long long",
                };
                if *signed { base.to_string() } else { format!("unsigned {}", base) }
            }
            CType::Float => "float".into(),
            CType::Double => "double".into(),
            CType::Record(id) => {
                self.record(*id).map(|r| r.name.clone()).unwrap_or_else(|| "<record>".into())
            }
            CType::Enum(name) => name.clone(),
            CType::Dependent => "<dependent type>".into(),
            CType::Dynamic => "<dynamic>".into(),
            CType::Pointer(_) | CType::Array(..) => self.declare(ty, ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(table: &mut TypeTable) -> CType {
        let id = table.add_record(RecordDef {
            name: "Point".into(),
            fields: vec![
                Field { name: "x".into(), ty: CType::INT, slot: 0 },
                Field { name: "y".into(), ty: CType::Double, slot: 1 },
            ],
            complete: true,
        });
        CType::Record(id)
    }

    #[test]
    fn declarator_printing() {
        let t = TypeTable::new();
        assert_eq!(t.declare(&CType::Array(Box::new(CType::INT), Some(3)), "a"), "int a[3]");
        assert_eq!(t.declare(&CType::char_ptr(), "s"), "char *s");
        assert_eq!(t.name(&CType::pointer_to(CType::char_ptr())), "char **");
        let m = CType::Array(Box::new(CType::Array(Box::new(CType::INT), Some(3))), Some(2));
        assert_eq!(t.declare(&m, "m"), "int m[2][3]");
        let row = CType::Array(Box::new(CType::INT), Some(3));
        assert_eq!(t.name(&CType::pointer_to(row)), "int (*)[3]");
        assert_eq!(t.name(&CType::ULONG), "unsigned long");
    }

    #[test]
    fn record_layout() {
        let mut t = TypeTable::new();
        let p = point(&mut t);
        assert_eq!(t.slots(&p), 2);
        assert_eq!(t.size_of(&p), Some(16));
        assert_eq!(t.declare(&p, "origin"), "Point origin");
        assert_eq!(t.slots(&CType::Array(Box::new(p), Some(4))), 8);
    }

    #[test]
    fn arithmetic_conversions() {
        assert_eq!(CType::common(&CType::CHAR, &CType::CHAR), CType::INT);
        assert_eq!(CType::common(&CType::INT, &CType::UINT), CType::UINT);
        assert_eq!(CType::common(&CType::LONG, &CType::UINT), CType::LONG);
        assert_eq!(CType::common(&CType::INT, &CType::Float), CType::Float);
        assert_eq!(CType::common(&CType::Float, &CType::Double), CType::Double);
    }
}
