//! Name resolution and type checking for the C subset.
//!
//! Declarations are staged: every change to the global namespace is
//! journaled so that a failed fragment can be rolled back, and a successful
//! one committed. Names that cannot be found are offered to an optional
//! [`UnresolvedNameHandler`] before an error is reported.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compiler::ast::*;
use crate::compiler::dynamic_lookup::{Recovery, UnresolvedNameHandler};
use crate::compiler::lir::Builtin;
use crate::compiler::tokens::{IntSuffix, Span};
use crate::compiler::types::{CType, Field, IntRank, RecordDef, RecordId, TypeTable};

/// Compile-time value of a constant expression or initializer slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ptr(u64),
}

impl Constant {
    pub fn truthy(&self) -> bool {
        match self {
            Constant::Int(v) => *v != 0,
            Constant::Float(f) => *f != 0.0,
            Constant::Bool(b) => *b,
            Constant::Ptr(p) => *p != 0,
            Constant::Str(_) => true,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Constant::Int(v) => Some(*v),
            Constant::Bool(b) => Some(*b as i64),
            Constant::Float(f) => Some(*f as i64),
            Constant::Ptr(_) | Constant::Str(_) => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Constant::Int(v) => Some(*v as f64),
            Constant::Bool(b) => Some(*b as i64 as f64),
            Constant::Float(f) => Some(*f),
            Constant::Ptr(_) | Constant::Str(_) => None,
        }
    }

    /// Converts to the representation of `ty`, as an implicit or explicit
    /// conversion would.
    pub fn coerce(self, ty: &CType) -> Option<Constant> {
        match ty {
            CType::Bool => Some(Constant::Bool(self.truthy())),
            t if t.is_integer() => {
                let kind = t.scalar_kind()?;
                Some(Constant::Int(kind.wrap(self.as_i64()?)))
            }
            CType::Float => Some(Constant::Float(self.as_f64()? as f32 as f64)),
            CType::Double => Some(Constant::Float(self.as_f64()?)),
            CType::Pointer(_) => match self {
                Constant::Ptr(p) => Some(Constant::Ptr(p)),
                Constant::Int(v) => Some(Constant::Ptr(v as u64)),
                Constant::Str(s) => Some(Constant::Str(s)),
                _ => None,
            },
            CType::Array(..) => match self {
                Constant::Str(s) => Some(Constant::Str(s)),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct SemaError {
    pub message: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub ret: CType,
    pub params: Vec<CType>,
    pub variadic: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Symbol {
    Var { ty: CType, link_name: String, defined: bool },
    Function { sig: FunctionSig, defined: bool },
    Typedef(CType),
    EnumConst { value: i64, ty: CType },
}

#[derive(Debug, Clone, PartialEq)]
enum Tag {
    Record(RecordId),
    Enum,
}

#[derive(Debug, Clone)]
enum LocalSymbol {
    Var { ty: CType, binding: Binding },
    Typedef(CType),
    EnumConst { value: i64, ty: CType },
}

#[derive(Debug)]
enum JournalEntry {
    Global(String, Option<Symbol>),
    Tag(String, Option<Tag>),
    Record(RecordId, RecordDef),
}

struct FunctionContext {
    name: String,
    ret: CType,
    next_slot: u32,
    loop_depth: usize,
}

/// Signature of a runtime builtin. The value-printing and result hooks take
/// one argument of any type and have no fixed signature.
pub fn builtin_signature(builtin: Builtin) -> Option<FunctionSig> {
    let sig = |ret: CType, params: Vec<CType>, variadic: bool| {
        Some(FunctionSig { ret, params, variadic })
    };
    match builtin {
        Builtin::Printf => sig(CType::INT, vec![CType::char_ptr()], true),
        Builtin::Puts => sig(CType::INT, vec![CType::char_ptr()], false),
        Builtin::Putchar | Builtin::Abs => sig(CType::INT, vec![CType::INT], false),
        Builtin::Labs => sig(CType::LONG, vec![CType::LONG], false),
        Builtin::Fabs | Builtin::Sqrt | Builtin::Floor | Builtin::Ceil => {
            sig(CType::Double, vec![CType::Double], false)
        }
        Builtin::Pow => sig(CType::Double, vec![CType::Double, CType::Double], false),
        Builtin::Strlen => sig(CType::ULONG, vec![CType::char_ptr()], false),
        Builtin::Eval => sig(CType::Dynamic, vec![CType::void_ptr(), CType::char_ptr()], true),
        Builtin::PrintValue | Builtin::SetResult => None,
    }
}

pub struct Sema {
    types: TypeTable,
    globals: HashMap<String, Symbol>,
    tags: HashMap<String, Tag>,
    journal: Vec<JournalEntry>,
    records_mark: Option<usize>,
    scopes: Vec<HashMap<String, LocalSymbol>>,
    function: Option<FunctionContext>,
    handler: Option<Box<dyn UnresolvedNameHandler>>,
    runtime_universe: bool,
    errors: Vec<SemaError>,
    synthesized: Vec<Decl>,
}

impl Default for Sema {
    fn default() -> Self {
        Self::new()
    }
}

impl Sema {
    pub fn new() -> Self {
        Self {
            types: TypeTable::new(),
            globals: HashMap::new(),
            tags: HashMap::new(),
            journal: Vec::new(),
            records_mark: None,
            scopes: Vec::new(),
            function: None,
            handler: None,
            runtime_universe: false,
            errors: Vec::new(),
            synthesized: Vec::new(),
        }
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn global(&self, name: &str) -> Option<&Symbol> {
        self.globals.get(name)
    }

    /// Type of the global variable `name`, if one is declared.
    pub fn global_var(&self, name: &str) -> Option<&CType> {
        match self.globals.get(name) {
            Some(Symbol::Var { ty, .. }) => Some(ty),
            _ => None,
        }
    }

    pub fn function_sig(&self, name: &str) -> Option<&FunctionSig> {
        match self.globals.get(name) {
            Some(Symbol::Function { sig, .. }) => Some(sig),
            _ => None,
        }
    }

    /// Identifiers that currently name a type, for the parser.
    pub fn type_names(&self) -> HashSet<String> {
        let mut names: HashSet<String> = self
            .globals
            .iter()
            .filter(|(_, sym)| matches!(sym, Symbol::Typedef(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.extend(self.tags.keys().cloned());
        names
    }

    /// Replaces the unresolved-name handler, returning the previous one.
    pub fn set_handler(
        &mut self,
        handler: Option<Box<dyn UnresolvedNameHandler>>,
    ) -> Option<Box<dyn UnresolvedNameHandler>> {
        std::mem::replace(&mut self.handler, handler)
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Makes the `__cinder_*` runtime entry points visible to user code.
    pub fn install_runtime_universe(&mut self) {
        self.runtime_universe = true;
    }

    pub fn has_runtime_universe(&self) -> bool {
        self.runtime_universe
    }

    /// Declarations made up while resolving names through the handler.
    pub fn take_synthesized(&mut self) -> Vec<Decl> {
        std::mem::take(&mut self.synthesized)
    }

    pub fn has_staged(&self) -> bool {
        !self.journal.is_empty() || self.records_mark.is_some()
    }

    // ── Staging ──

    pub fn commit(&mut self) {
        self.journal.clear();
        self.records_mark = None;
    }

    pub fn rollback(&mut self) {
        while let Some(entry) = self.journal.pop() {
            match entry {
                JournalEntry::Global(name, prev) => match prev {
                    Some(sym) => {
                        self.globals.insert(name, sym);
                    }
                    None => {
                        self.globals.remove(&name);
                    }
                },
                JournalEntry::Tag(name, prev) => match prev {
                    Some(tag) => {
                        self.tags.insert(name, tag);
                    }
                    None => {
                        self.tags.remove(&name);
                    }
                },
                JournalEntry::Record(id, def) => {
                    if let Some(slot) = self.types.record_mut(id) {
                        *slot = def;
                    }
                }
            }
        }
        if let Some(mark) = self.records_mark.take() {
            self.types.truncate_records(mark);
        }
        self.synthesized.clear();
        self.scopes.clear();
        self.function = None;
    }

    fn set_global(&mut self, name: &str, sym: Symbol) {
        let prev = self.globals.insert(name.to_string(), sym);
        self.journal.push(JournalEntry::Global(name.to_string(), prev));
    }

    fn set_tag(&mut self, name: &str, tag: Tag) {
        let prev = self.tags.insert(name.to_string(), tag);
        self.journal.push(JournalEntry::Tag(name.to_string(), prev));
    }

    fn new_record(&mut self, name: &str) -> RecordId {
        if self.records_mark.is_none() {
            self.records_mark = Some(self.types.record_count());
        }
        let id = self.types.add_record(RecordDef {
            name: name.to_string(),
            fields: Vec::new(),
            complete: false,
        });
        self.set_tag(name, Tag::Record(id));
        id
    }

    fn update_record(&mut self, id: RecordId, def: RecordDef) {
        if let Some(slot) = self.types.record_mut(id) {
            let prev = std::mem::replace(slot, def);
            self.journal.push(JournalEntry::Record(id, prev));
        }
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.errors.push(SemaError { message: message.into(), span });
    }

    fn type_name(&self, ty: &CType) -> String {
        self.types.name(ty)
    }

    // ── Declarations ──

    /// Analyses one top-level declaration group in place.
    pub fn analyze_top_level(&mut self, group: &mut DeclGroup) -> Result<(), Vec<SemaError>> {
        self.errors.clear();
        let spec = group.spec.clone();
        for decl in &mut group.decls {
            self.declaration(&spec, decl);
        }
        self.scopes.clear();
        self.function = None;
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    fn declaration(&mut self, spec: &DeclSpec, decl: &mut Decl) {
        let span = decl.span;
        match &mut decl.kind {
            DeclKind::Var(v) => self.var_decl(spec, v, span),
            DeclKind::Function(f) => self.function_decl(spec, f, span),
            DeclKind::Record(r) => self.record_decl(r, span),
            DeclKind::Enum(e) => self.enum_decl(e, span),
            DeclKind::Typedef(t) => self.typedef_decl(spec, t, span),
        }
    }

    fn lookup_type_name(&self, name: &str) -> Option<CType> {
        for scope in self.scopes.iter().rev() {
            if let Some(LocalSymbol::Typedef(ty)) = scope.get(name) {
                return Some(ty.clone());
            }
        }
        if let Some(Symbol::Typedef(ty)) = self.globals.get(name) {
            return Some(ty.clone());
        }
        match self.tags.get(name) {
            Some(Tag::Record(id)) => Some(CType::Record(*id)),
            Some(Tag::Enum) => Some(CType::Enum(name.to_string())),
            None => None,
        }
    }

    fn resolve_base(&mut self, spec: &DeclSpec) -> CType {
        match &spec.base {
            BaseType::Void => CType::Void,
            BaseType::Bool => CType::Bool,
            BaseType::Int { rank, signed } => CType::int(*rank, *signed),
            BaseType::Float => CType::Float,
            BaseType::Double => CType::Double,
            BaseType::Auto => {
                self.error("'auto' not allowed here", spec.span);
                CType::Dependent
            }
            BaseType::Named(name) => match self.lookup_type_name(name) {
                Some(ty) => ty,
                None => {
                    self.error(format!("unknown type name '{}'", name), spec.span);
                    CType::Dependent
                }
            },
            BaseType::Record { name, .. } => match self.tags.get(name).cloned() {
                Some(Tag::Record(id)) => CType::Record(id),
                Some(Tag::Enum) => {
                    self.error(
                        format!(
                            "use of '{}' with tag type that does not match previous declaration",
                            name
                        ),
                        spec.span,
                    );
                    CType::Dependent
                }
                None => CType::Record(self.new_record(name)),
            },
            BaseType::Enum(name) => match self.tags.get(name) {
                Some(Tag::Enum) => CType::Enum(name.clone()),
                _ => {
                    self.error(format!("use of undeclared enum '{}'", name), spec.span);
                    CType::Dependent
                }
            },
        }
    }

    /// Wraps `base` in the declarator's pointers and array dimensions.
    fn apply_declarator(&mut self, base: CType, d: &mut Declarator) -> CType {
        let mut ty = base;
        for _ in 0..d.pointers {
            ty = CType::pointer_to(ty);
        }
        let span = d.span;
        for suffix in d.suffixes.iter_mut().rev() {
            match suffix {
                Suffix::Array(size) => {
                    let len = match size {
                        Some(e) => self.array_dim(e),
                        None => None,
                    };
                    ty = CType::Array(Box::new(ty), len);
                }
                Suffix::Function { .. } => {
                    self.error("function type is not allowed here", span);
                    return CType::Dependent;
                }
            }
        }
        ty
    }

    fn array_dim(&mut self, e: &mut Expr) -> Option<u64> {
        self.expr(e);
        if !e.ty.is_integer() {
            if !e.ty.is_dependent() {
                let message =
                    format!("size of array has non-integer type '{}'", self.type_name(&e.ty));
                self.error(message, e.span);
            }
            return None;
        }
        match self.const_eval(e) {
            Some(Constant::Int(n)) if n >= 0 => Some(n as u64),
            Some(_) => {
                self.error("array size is negative", e.span);
                None
            }
            None => {
                self.error("variable length arrays are not supported", e.span);
                None
            }
        }
    }

    fn var_decl(&mut self, spec: &DeclSpec, v: &mut VarDecl, span: Span) {
        let is_auto = spec.base == BaseType::Auto;
        let mut ty = if is_auto {
            let init = match &mut v.init {
                Some(Initializer::Expr(e)) => Some(e),
                Some(Initializer::Construct(args, _)) if args.len() == 1 => args.first_mut(),
                _ => None,
            };
            let Some(init) = init else {
                self.error(
                    format!(
                        "declaration of variable '{}' with deduced type 'auto' requires an initializer",
                        v.name
                    ),
                    span,
                );
                return;
            };
            self.expr(init);
            if init.ty.is_dependent() {
                self.error(
                    format!(
                        "cannot deduce the type of '{}' from an initializer resolved at run time",
                        v.name
                    ),
                    init.span,
                );
                return;
            }
            init.ty.decay()
        } else {
            let base = self.resolve_base(spec);
            self.apply_declarator(base, &mut v.declarator)
        };

        if ty.is_dependent() {
            return;
        }
        if ty.is_void() {
            self.error("variable has incomplete type 'void'", v.declarator.span);
            return;
        }
        if !is_auto {
            if let Some(init) = &mut v.init {
                self.check_initializer(&mut ty, init);
            }
        }
        let is_extern = spec.storage == Storage::Extern;
        if !is_extern && !self.types.is_complete(&ty) {
            let message = if matches!(ty, CType::Array(_, None)) {
                "definition of variable with array type needs an explicit size or an initializer"
                    .to_string()
            } else {
                format!("variable has incomplete type '{}'", self.type_name(&ty))
            };
            self.error(message, v.declarator.span);
            return;
        }

        v.ty = ty.clone();
        v.is_extern = is_extern;

        if self.function.is_some() && !is_extern {
            self.local_var(spec, v);
            return;
        }

        v.storage = VarStorage::Global;
        v.link_name = v.name.clone();
        if v.is_definition() {
            v.constant_init = self.constant_initializer(&ty, v.init.as_ref());
        }
        match self.globals.get(&v.name) {
            Some(Symbol::Var { ty: prev, defined, .. }) => {
                if prev != &ty {
                    let message = format!(
                        "redefinition of '{}' with a different type: '{}' vs '{}'",
                        v.name,
                        self.type_name(&ty),
                        self.type_name(prev)
                    );
                    self.error(message, v.declarator.span);
                    return;
                }
                if *defined && v.is_definition() {
                    self.error(format!("redefinition of '{}'", v.name), v.declarator.span);
                    return;
                }
            }
            Some(_) => {
                self.error(
                    format!("redefinition of '{}' as different kind of symbol", v.name),
                    v.declarator.span,
                );
                return;
            }
            None => {}
        }
        let defined = v.is_definition();
        let symbol = Symbol::Var { ty, link_name: v.link_name.clone(), defined };
        self.set_global(&v.name.clone(), symbol);
    }

    fn local_var(&mut self, spec: &DeclSpec, v: &mut VarDecl) {
        if self.scopes.last().is_some_and(|s| s.contains_key(&v.name)) {
            self.error(format!("redefinition of '{}'", v.name), v.declarator.span);
            return;
        }
        let Some(ctx) = self.function.as_mut() else { return };
        let binding = if spec.storage == Storage::Static {
            v.storage = VarStorage::Static;
            v.link_name = format!("__cinder_static_{}_{}", ctx.name, v.name);
            v.constant_init = self.constant_initializer(&v.ty, v.init.as_ref());
            if v.constant_init.is_none() {
                let span = v.init.as_ref().map(|i| i.span()).unwrap_or(v.declarator.span);
                self.error("initializer element is not a compile-time constant", span);
            }
            Binding::Global { link_name: v.link_name.clone() }
        } else {
            let slot = ctx.next_slot;
            ctx.next_slot += self.types.slots(&v.ty).max(1) as u32;
            v.storage = VarStorage::Local { slot };
            v.constant_init = self.constant_initializer(&v.ty, v.init.as_ref());
            Binding::Local { slot }
        };
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(v.name.clone(), LocalSymbol::Var { ty: v.ty.clone(), binding });
        }
    }

    fn function_decl(&mut self, spec: &DeclSpec, f: &mut FunctionDecl, span: Span) {
        let mut ret = self.resolve_base(spec);
        for _ in 0..f.declarator.pointers {
            ret = CType::pointer_to(ret);
        }
        if f.declarator.suffixes.len() > 1 {
            self.error("function cannot return array type", f.declarator.span);
            return;
        }
        let Some(Suffix::Function { params: decls, variadic }) = f.declarator.suffixes.first_mut()
        else {
            return;
        };
        let variadic = *variadic;
        let mut params = Vec::with_capacity(decls.len());
        for (i, p) in decls.iter_mut().enumerate() {
            let base = self.resolve_base(&p.spec);
            let ty = self.apply_declarator(base, &mut p.declarator).decay();
            if ty.is_void() {
                self.error("parameter has incomplete type 'void'", p.span);
            }
            params.push(Param { name: p.declarator.name.clone(), ty, slot: i as u32 });
        }
        f.ret = ret.clone();
        f.params = params.clone();
        f.variadic = variadic;

        let sig = FunctionSig {
            ret: ret.clone(),
            params: params.iter().map(|p| p.ty.clone()).collect(),
            variadic,
        };
        let has_body = f.body.is_some();
        match self.globals.get(&f.name) {
            Some(Symbol::Function { sig: prev, defined }) => {
                if prev != &sig {
                    self.error(format!("conflicting types for '{}'", f.name), f.declarator.span);
                    return;
                }
                if *defined && has_body {
                    self.error(format!("redefinition of '{}'", f.name), f.declarator.span);
                    return;
                }
                let defined = *defined || has_body;
                self.set_global(&f.name.clone(), Symbol::Function { sig, defined });
            }
            Some(_) => {
                self.error(
                    format!("redefinition of '{}' as different kind of symbol", f.name),
                    f.declarator.span,
                );
                return;
            }
            None => self.set_global(&f.name.clone(), Symbol::Function { sig, defined: has_body }),
        }

        let Some(body) = f.body.as_mut() else { return };
        if !ret.is_void() && !self.types.is_complete(&ret) {
            let message = format!(
                "incomplete result type '{}' in function definition",
                self.type_name(&ret)
            );
            self.error(message, span);
            return;
        }
        self.function = Some(FunctionContext {
            name: f.name.clone(),
            ret,
            next_slot: params.len() as u32,
            loop_depth: 0,
        });
        let mut scope = HashMap::new();
        for p in &params {
            if let Some(name) = &p.name {
                let binding = Binding::Local { slot: p.slot };
                scope.insert(name.clone(), LocalSymbol::Var { ty: p.ty.clone(), binding });
            }
        }
        self.scopes.push(scope);
        self.stmt(body);
        self.scopes.pop();
        if let Some(ctx) = self.function.take() {
            f.frame_slots = ctx.next_slot;
        }
    }

    fn record_decl(&mut self, r: &mut RecordDecl, span: Span) {
        let id = match self.tags.get(&r.name).cloned() {
            Some(Tag::Record(id)) => id,
            Some(Tag::Enum) => {
                self.error(format!("'{}' was previously declared as an enum", r.name), span);
                return;
            }
            None => self.new_record(&r.name),
        };
        r.id = Some(id);
        let Some(field_decls) = r.fields.as_mut() else { return };
        if self.types.record(id).is_some_and(|rec| rec.complete) {
            self.error(format!("redefinition of '{}'", r.name), span);
            return;
        }

        let mut fields: Vec<Field> = Vec::new();
        let mut slot = 0u64;
        for fd in field_decls.iter_mut() {
            let base = self.resolve_base(&fd.spec);
            for d in fd.declarators.iter_mut() {
                let ty = self.apply_declarator(base.clone(), d);
                let name = d.name_or_empty().to_string();
                if ty.is_dependent() {
                    continue;
                }
                if !self.types.is_complete(&ty) {
                    let message = format!("field has incomplete type '{}'", self.type_name(&ty));
                    self.error(message, d.span);
                    continue;
                }
                if fields.iter().any(|f| f.name == name) {
                    self.error(format!("duplicate member '{}'", name), d.span);
                    continue;
                }
                let size = self.types.slots(&ty);
                fields.push(Field { name, ty, slot });
                slot += size;
            }
        }
        self.update_record(id, RecordDef { name: r.name.clone(), fields, complete: true });
    }

    fn enum_decl(&mut self, e: &mut EnumDecl, span: Span) {
        let ty = match &e.name {
            Some(name) => {
                if self.tags.contains_key(name) {
                    self.error(format!("redefinition of '{}'", name), span);
                    return;
                }
                self.set_tag(&name.clone(), Tag::Enum);
                CType::Enum(name.clone())
            }
            None => CType::INT,
        };
        let mut next = 0i64;
        for variant in e.variants.iter_mut() {
            let value = match &mut variant.value {
                Some(expr) => {
                    self.expr(expr);
                    match self.const_eval(expr).and_then(|c| c.as_i64()) {
                        Some(v) => v,
                        None => {
                            self.error(
                                "expression is not an integral constant expression",
                                expr.span,
                            );
                            next
                        }
                    }
                }
                None => next,
            };
            variant.resolved = value;
            next = value.wrapping_add(1);
            if self.function.is_some() {
                if let Some(scope) = self.scopes.last_mut() {
                    let symbol = LocalSymbol::EnumConst { value, ty: ty.clone() };
                    scope.insert(variant.name.clone(), symbol);
                }
            } else if self.globals.contains_key(&variant.name) {
                self.error(format!("redefinition of '{}'", variant.name), variant.span);
            } else {
                self.set_global(&variant.name.clone(), Symbol::EnumConst { value, ty: ty.clone() });
            }
        }
    }

    fn typedef_decl(&mut self, spec: &DeclSpec, t: &mut TypedefDecl, span: Span) {
        let base = self.resolve_base(spec);
        let ty = self.apply_declarator(base, &mut t.declarator);
        t.ty = ty.clone();
        if self.function.is_some() {
            if let Some(scope) = self.scopes.last_mut() {
                scope.insert(t.name.clone(), LocalSymbol::Typedef(ty));
            }
            return;
        }
        match self.globals.get(&t.name) {
            Some(Symbol::Typedef(prev)) if prev == &ty => {}
            Some(Symbol::Typedef(prev)) => {
                let message = format!(
                    "typedef redefinition with different types ('{}' vs '{}')",
                    self.type_name(&ty),
                    self.type_name(prev)
                );
                self.error(message, span);
            }
            Some(_) => self.error(
                format!("redefinition of '{}' as different kind of symbol", t.name),
                span,
            ),
            None => self.set_global(&t.name.clone(), Symbol::Typedef(ty)),
        }
    }

    // ── Initializers ──

    fn check_initializer(&mut self, ty: &mut CType, init: &mut Initializer) {
        match init {
            Initializer::Expr(e) => {
                if let CType::Array(elem, len) = ty {
                    if let ExprKind::StrLit(s) = &e.kind {
                        if elem.is_char() {
                            let needed = s.len() as u64;
                            match *len {
                                None => *len = Some(needed + 1),
                                Some(n) if needed > n => {
                                    self.error(
                                        "initializer-string for char array is too long",
                                        e.span,
                                    )
                                }
                                Some(_) => {}
                            }
                            self.expr(e);
                            return;
                        }
                    }
                    self.error(
                        "array initializer must be an initializer list or string literal",
                        e.span,
                    );
                    return;
                }
                self.expr(e);
                self.check_assignable(ty, e, "initializing");
            }
            Initializer::List(items, span) => {
                let span = *span;
                if let CType::Array(elem, len) = ty {
                    match *len {
                        Some(n) if items.len() as u64 > n => {
                            self.error("excess elements in array initializer", span);
                            return;
                        }
                        Some(_) => {}
                        None => *len = Some(items.len() as u64),
                    }
                    for item in items.iter_mut() {
                        let mut elem_ty = (**elem).clone();
                        self.check_initializer(&mut elem_ty, item);
                    }
                    return;
                }
                if let CType::Record(id) = *ty {
                    let fields = match self.types.record(id) {
                        Some(rec) if rec.complete => rec.fields.clone(),
                        _ => {
                            let message =
                                format!("variable has incomplete type '{}'", self.type_name(ty));
                            self.error(message, span);
                            return;
                        }
                    };
                    if items.len() > fields.len() {
                        self.error("excess elements in struct initializer", span);
                        return;
                    }
                    for (field, item) in fields.iter().zip(items.iter_mut()) {
                        let mut field_ty = field.ty.clone();
                        self.check_initializer(&mut field_ty, item);
                    }
                    return;
                }
                if items.len() > 1 {
                    self.error("excess elements in scalar initializer", span);
                    return;
                }
                if let Some(item) = items.first_mut() {
                    self.check_initializer(ty, item);
                }
            }
            Initializer::Construct(args, span) => {
                if args.is_empty() {
                    return;
                }
                if ty.is_record() || ty.is_array() {
                    let message = format!(
                        "no matching constructor for initialization of '{}'",
                        self.type_name(ty)
                    );
                    self.error(message, *span);
                    return;
                }
                if args.len() > 1 {
                    self.error("excess elements in scalar initializer", *span);
                    return;
                }
                let arg = &mut args[0];
                self.expr(arg);
                self.check_assignable(ty, arg, "initializing");
            }
        }
    }

    /// Slot-by-slot constant image of an initializer, or `None` if any part
    /// needs code to run. Unlisted slots are zero.
    pub fn constant_initializer(
        &self,
        ty: &CType,
        init: Option<&Initializer>,
    ) -> Option<Vec<(u64, Constant)>> {
        let mut out = Vec::new();
        if let Some(init) = init {
            self.collect_constants(ty, init, 0, &mut out)?;
        }
        Some(out)
    }

    fn collect_constants(
        &self,
        ty: &CType,
        init: &Initializer,
        base: u64,
        out: &mut Vec<(u64, Constant)>,
    ) -> Option<()> {
        match (ty, init) {
            (CType::Array(elem, _), Initializer::Expr(Expr { kind: ExprKind::StrLit(s), .. }))
                if elem.is_char() =>
            {
                let kind = elem.scalar_kind()?;
                for (i, b) in s.bytes().enumerate() {
                    out.push((base + i as u64, Constant::Int(kind.wrap(b as i64))));
                }
            }
            (CType::Array(elem, _), Initializer::List(items, _)) => {
                let stride = self.types.slots(elem);
                for (i, item) in items.iter().enumerate() {
                    self.collect_constants(elem, item, base + i as u64 * stride, out)?;
                }
            }
            (CType::Record(id), Initializer::List(items, _)) => {
                let rec = self.types.record(*id)?;
                for (field, item) in rec.fields.iter().zip(items) {
                    self.collect_constants(&field.ty, item, base + field.slot, out)?;
                }
            }
            (_, Initializer::List(items, _)) => {
                if let Some(first) = items.first() {
                    self.collect_constants(ty, first, base, out)?;
                }
            }
            (_, Initializer::Construct(args, _)) => match args.first() {
                None => {}
                Some(arg) if ty.is_scalar() => out.push((base, self.const_eval(arg)?.coerce(ty)?)),
                Some(_) => return None,
            },
            (_, Initializer::Expr(e)) if ty.is_scalar() && !ty.is_dynamic() => {
                out.push((base, self.const_eval(e)?.coerce(ty)?));
            }
            _ => return None,
        }
        Some(())
    }

    // ── Statements ──

    fn stmt(&mut self, s: &mut Stmt) {
        let span = s.span;
        match &mut s.kind {
            StmtKind::Null => {}
            StmtKind::Break => self.loop_jump("break", span),
            StmtKind::Continue => self.loop_jump("continue", span),
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Decl(group) => {
                let spec = group.spec.clone();
                for decl in &mut group.decls {
                    self.declaration(&spec, decl);
                }
            }
            StmtKind::Compound(stmts) => {
                self.scopes.push(HashMap::new());
                for stmt in stmts {
                    self.stmt(stmt);
                }
                self.scopes.pop();
            }
            StmtKind::If { cond, then, els } => {
                self.condition(cond);
                self.stmt(then);
                if let Some(els) = els {
                    self.stmt(els);
                }
            }
            StmtKind::While { cond, body } => {
                self.condition(cond);
                self.loop_body(body);
            }
            StmtKind::DoWhile { body, cond } => {
                self.loop_body(body);
                self.condition(cond);
            }
            StmtKind::For { init, cond, step, body } => {
                self.scopes.push(HashMap::new());
                if let Some(init) = init {
                    self.stmt(init);
                }
                if let Some(cond) = cond {
                    self.condition(cond);
                }
                if let Some(step) = step {
                    self.expr(step);
                }
                self.loop_body(body);
                self.scopes.pop();
            }
            StmtKind::Return(value) => self.return_stmt(value.as_mut(), span),
        }
    }

    fn loop_jump(&mut self, word: &str, span: Span) {
        if !matches!(self.function.as_ref(), Some(ctx) if ctx.loop_depth > 0) {
            self.error(format!("'{}' statement not in loop statement", word), span);
        }
    }

    fn loop_body(&mut self, body: &mut Stmt) {
        if let Some(ctx) = self.function.as_mut() {
            ctx.loop_depth += 1;
        }
        self.stmt(body);
        if let Some(ctx) = self.function.as_mut() {
            ctx.loop_depth -= 1;
        }
    }

    fn condition(&mut self, e: &mut Expr) {
        self.expr(e);
        if !e.ty.is_scalar() && !e.ty.is_dependent() {
            let message = format!(
                "statement requires expression of scalar type ('{}' invalid)",
                self.type_name(&e.ty)
            );
            self.error(message, e.span);
        }
    }

    fn return_stmt(&mut self, value: Option<&mut Expr>, span: Span) {
        let Some(ctx) = self.function.as_ref() else { return };
        let ret = ctx.ret.clone();
        let name = ctx.name.clone();
        match value {
            Some(e) => {
                self.expr(e);
                if ret.is_void() {
                    if !e.ty.is_void() {
                        let message = format!("void function '{}' should not return a value", name);
                        self.error(message, e.span);
                    }
                } else {
                    self.check_assignable(&ret, e, "returning");
                }
            }
            None if !ret.is_void() => {
                self.error(format!("non-void function '{}' should return a value", name), span);
            }
            None => {}
        }
    }

    // ── Expressions ──

    fn lookup_local(&self, name: &str) -> Option<LocalSymbol> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).cloned())
    }

    fn visible_builtin(&self, name: &str) -> Option<Builtin> {
        let builtin = Builtin::from_str(name).ok()?;
        if builtin.is_runtime_hook() && !self.runtime_universe {
            return None;
        }
        Some(builtin)
    }

    /// Binds a name that the handler resolved to a host value as a new global.
    fn bind_host_value(&mut self, name: &str, ty: CType, value: Constant, span: Span) -> Binding {
        let decl = Decl {
            kind: DeclKind::Var(VarDecl {
                name: name.to_string(),
                declarator: Declarator {
                    name: Some(name.to_string()),
                    pointers: 0,
                    suffixes: Vec::new(),
                    span,
                },
                init: None,
                ty: ty.clone(),
                storage: VarStorage::Global,
                link_name: name.to_string(),
                is_extern: false,
                constant_init: Some(vec![(0, value)]),
            }),
            span,
        };
        self.set_global(name, Symbol::Var { ty, link_name: name.to_string(), defined: true });
        self.synthesized.push(decl);
        Binding::Global { link_name: name.to_string() }
    }

    /// Asks the handler about `name`. Returns the binding and type on recovery.
    fn recover(&mut self, name: &str, span: Span) -> Option<(Binding, CType)> {
        let recovery = self.handler.as_mut()?.lookup_unqualified(name, span)?;
        Some(match recovery {
            Recovery::Dependent => (Binding::Placeholder, CType::Dependent),
            Recovery::Bind { ty, value } => {
                let binding = self.bind_host_value(name, ty.clone(), value, span);
                (binding, ty)
            }
        })
    }

    fn resolve_ident(&mut self, name: &str, span: Span) -> (Binding, CType) {
        if let Some(sym) = self.lookup_local(name) {
            return match sym {
                LocalSymbol::Var { ty, binding } => (binding, ty),
                LocalSymbol::EnumConst { value, ty } => (Binding::EnumConst(value), ty),
                LocalSymbol::Typedef(_) => {
                    let message = format!("unexpected type name '{}': expected expression", name);
                    self.error(message, span);
                    (Binding::Unresolved, CType::Dependent)
                }
            };
        }
        match self.globals.get(name).cloned() {
            Some(Symbol::Var { ty, link_name, .. }) => return (Binding::Global { link_name }, ty),
            Some(Symbol::EnumConst { value, ty }) => return (Binding::EnumConst(value), ty),
            Some(Symbol::Function { .. }) => {
                self.error(format!("reference to function '{}' must be called", name), span);
                return (Binding::Function, CType::Dependent);
            }
            Some(Symbol::Typedef(_)) => {
                self.error(format!("unexpected type name '{}': expected expression", name), span);
                return (Binding::Unresolved, CType::Dependent);
            }
            None => {}
        }
        if self.visible_builtin(name).is_some() {
            self.error(format!("builtin function '{}' must be called", name), span);
            return (Binding::Unresolved, CType::Dependent);
        }
        if let Some(found) = self.recover(name, span) {
            return found;
        }
        self.error(format!("use of undeclared identifier '{}'", name), span);
        (Binding::Unresolved, CType::Dependent)
    }

    pub(crate) fn expr(&mut self, e: &mut Expr) {
        let span = e.span;
        let ty = match &mut e.kind {
            ExprKind::IntLit(v, suffix) => int_literal_type(*v, *suffix),
            ExprKind::FloatLit(_, single) => if *single { CType::Float } else { CType::Double },
            ExprKind::CharLit(_) => CType::CHAR,
            ExprKind::StrLit(s) => CType::Array(Box::new(CType::CHAR), Some(s.len() as u64 + 1)),
            ExprKind::BoolLit(_) => CType::Bool,
            ExprKind::Null => CType::void_ptr(),
            ExprKind::Ident(name, binding) => {
                let (b, ty) = self.resolve_ident(name, span);
                *binding = b;
                ty
            }
            ExprKind::Unary(op, operand) => {
                self.expr(operand);
                self.unary_type(*op, operand, span)
            }
            ExprKind::Binary(op, lhs, rhs) => {
                self.expr(lhs);
                self.expr(rhs);
                self.binary_type(*op, lhs, rhs, span)
            }
            ExprKind::Assign(op, lhs, rhs) => {
                self.expr(lhs);
                self.expr(rhs);
                self.assign_type(*op, lhs, rhs, span)
            }
            ExprKind::Conditional(cond, then, els) => {
                self.expr(cond);
                self.expr(then);
                self.expr(els);
                self.conditional_type(cond, then, els, span)
            }
            ExprKind::Call(callee, args) => self.call(callee, args, span),
            ExprKind::Index(base, index) => {
                self.expr(base);
                self.expr(index);
                self.index_type(base, index, span)
            }
            ExprKind::Member { base, field, arrow } => {
                self.expr(base);
                self.member_type(base, field, *arrow, span)
            }
            ExprKind::Cast(target, operand) => {
                let base = self.resolve_base(&target.spec);
                target.resolved = self.apply_declarator(base, &mut target.declarator);
                self.expr(operand);
                self.cast_type(&target.resolved, operand, span)
            }
            ExprKind::SizeofType(target) => {
                let base = self.resolve_base(&target.spec);
                target.resolved = self.apply_declarator(base, &mut target.declarator);
                self.sizeof_check(&target.resolved.clone(), span)
            }
            ExprKind::SizeofExpr(operand) => {
                self.expr(operand);
                if operand.ty.is_dependent() || operand.ty.is_dynamic() {
                    self.error(
                        "invalid application of 'sizeof' to an expression resolved at run time",
                        span,
                    );
                    CType::Dependent
                } else {
                    self.sizeof_check(&operand.ty.clone(), span)
                }
            }
            ExprKind::Comma(lhs, rhs) => {
                self.expr(lhs);
                self.expr(rhs);
                if lhs.ty.is_dependent() || rhs.ty.is_dependent() {
                    CType::Dependent
                } else {
                    rhs.ty.clone()
                }
            }
        };
        e.ty = ty;
    }

    fn sizeof_check(&mut self, ty: &CType, span: Span) -> CType {
        if ty.is_dependent() {
            return CType::Dependent;
        }
        if self.types.size_of(ty).is_none() {
            let message = format!(
                "invalid application of 'sizeof' to an incomplete type '{}'",
                self.type_name(ty)
            );
            self.error(message, span);
            return CType::Dependent;
        }
        CType::ULONG
    }

    fn unary_type(&mut self, op: UnaryOp, operand: &Expr, span: Span) -> CType {
        let ty = operand.ty.decay();
        if ty.is_dependent() {
            return CType::Dependent;
        }
        let invalid = |this: &mut Self| {
            let message = format!(
                "invalid argument type '{}' to unary expression",
                this.type_name(&operand.ty)
            );
            this.error(message, span);
            CType::Dependent
        };
        match op {
            UnaryOp::Neg | UnaryOp::Plus => {
                if ty.is_dynamic() {
                    CType::Dynamic
                } else if ty.is_arithmetic() {
                    ty.promote()
                } else {
                    invalid(self)
                }
            }
            UnaryOp::BitNot => {
                if ty.is_dynamic() {
                    CType::Dynamic
                } else if ty.is_integer() {
                    ty.promote()
                } else {
                    invalid(self)
                }
            }
            UnaryOp::Not => {
                if ty.is_scalar() {
                    CType::Bool
                } else {
                    invalid(self)
                }
            }
            UnaryOp::Deref => match ty {
                CType::Pointer(inner) if !inner.is_void() => *inner,
                CType::Pointer(_) => {
                    self.error(
                        "indirection requires pointer to complete type ('void *' invalid)",
                        span,
                    );
                    CType::Dependent
                }
                other => {
                    let message = format!(
                        "indirection requires pointer operand ('{}' invalid)",
                        self.type_name(&other)
                    );
                    self.error(message, span);
                    CType::Dependent
                }
            },
            UnaryOp::AddrOf => {
                if !is_lvalue(operand) {
                    self.error("cannot take the address of an rvalue", span);
                    return CType::Dependent;
                }
                CType::pointer_to(operand.ty.clone())
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                if !is_lvalue(operand) || operand.ty.is_array() {
                    self.error("expression is not assignable", span);
                    return CType::Dependent;
                }
                if !ty.is_arithmetic() && !ty.is_pointer() && !ty.is_dynamic() {
                    return invalid(self);
                }
                operand.ty.clone()
            }
        }
    }

    fn invalid_operands(&mut self, a: &CType, b: &CType, span: Span) -> CType {
        let message = format!(
            "invalid operands to binary expression ('{}' and '{}')",
            self.type_name(a),
            self.type_name(b)
        );
        self.error(message, span);
        CType::Dependent
    }

    fn binary_type(&mut self, op: BinOp, a: &Expr, b: &Expr, span: Span) -> CType {
        let (ta, tb) = (a.ty.decay(), b.ty.decay());
        if ta.is_dependent() || tb.is_dependent() {
            return CType::Dependent;
        }
        if op.is_logical() {
            if ta.is_scalar() && tb.is_scalar() {
                return CType::Bool;
            }
            return self.invalid_operands(&a.ty, &b.ty, span);
        }
        if ta.is_dynamic() || tb.is_dynamic() {
            let numeric = |t: &CType| t.is_arithmetic() || t.is_dynamic();
            if numeric(&ta) && numeric(&tb) {
                return if op.is_comparison() { CType::Bool } else { CType::Dynamic };
            }
            return self.invalid_operands(&a.ty, &b.ty, span);
        }
        if op.is_comparison() {
            let ok = (ta.is_arithmetic() && tb.is_arithmetic())
                || (ta.is_pointer() && tb.is_pointer())
                || (ta.is_pointer() && self.is_null_constant(b))
                || (tb.is_pointer() && self.is_null_constant(a));
            return if ok { CType::Bool } else { self.invalid_operands(&a.ty, &b.ty, span) };
        }
        let arith = ta.is_arithmetic() && tb.is_arithmetic();
        let integers = ta.is_integer() && tb.is_integer();
        match op {
            BinOp::Add if arith => CType::common(&ta, &tb),
            BinOp::Add if ta.is_pointer() && tb.is_integer() => ta,
            BinOp::Add if ta.is_integer() && tb.is_pointer() => tb,
            BinOp::Sub if arith => CType::common(&ta, &tb),
            BinOp::Sub if ta.is_pointer() && tb.is_integer() => ta,
            BinOp::Sub if ta.is_pointer() && tb.is_pointer() => CType::LONG,
            BinOp::Mul | BinOp::Div if arith => CType::common(&ta, &tb),
            BinOp::Rem | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor if integers => {
                CType::common(&ta, &tb)
            }
            BinOp::Shl | BinOp::Shr if integers => ta.promote(),
            _ => self.invalid_operands(&a.ty, &b.ty, span),
        }
    }

    fn assign_type(&mut self, op: Option<BinOp>, lhs: &Expr, rhs: &Expr, span: Span) -> CType {
        if lhs.ty.is_dependent() {
            return CType::Dependent;
        }
        if !is_lvalue(lhs) {
            self.error("expression is not assignable", lhs.span);
            return CType::Dependent;
        }
        if lhs.ty.is_array() {
            let message = format!("array type '{}' is not assignable", self.type_name(&lhs.ty));
            self.error(message, lhs.span);
            return CType::Dependent;
        }
        match op {
            Some(op) => {
                self.binary_type(op, lhs, rhs, span);
            }
            None => self.check_assignable(&lhs.ty, rhs, "assigning to"),
        }
        lhs.ty.clone()
    }

    fn conditional_type(&mut self, cond: &Expr, then: &Expr, els: &Expr, span: Span) -> CType {
        let (ta, tb) = (then.ty.decay(), els.ty.decay());
        if cond.ty.is_dependent() || ta.is_dependent() || tb.is_dependent() {
            return CType::Dependent;
        }
        if !cond.ty.is_scalar() {
            self.error("used type where arithmetic or pointer type is required", cond.span);
            return CType::Dependent;
        }
        if ta.is_dynamic() || tb.is_dynamic() {
            return CType::Dynamic;
        }
        if ta.is_arithmetic() && tb.is_arithmetic() {
            return CType::common(&ta, &tb);
        }
        if ta == tb {
            return ta;
        }
        if ta.is_pointer() && (tb.is_pointer() || self.is_null_constant(els)) {
            return ta;
        }
        if tb.is_pointer() && self.is_null_constant(then) {
            return tb;
        }
        let message = format!(
            "incompatible operand types ('{}' and '{}')",
            self.type_name(&then.ty),
            self.type_name(&els.ty)
        );
        self.error(message, span);
        CType::Dependent
    }

    fn call(&mut self, callee: &mut Expr, args: &mut [Expr], span: Span) -> CType {
        let ExprKind::Ident(name, binding) = &mut callee.kind else {
            self.expr(callee);
            for arg in args.iter_mut() {
                self.expr(arg);
            }
            self.error(
                "called object is not a function; function pointers are not supported",
                callee.span,
            );
            return CType::Dependent;
        };
        let name = name.clone();
        let target = self.resolve_callee(&name, callee.span);
        *binding = target.0;
        callee.ty = CType::Void;
        for arg in args.iter_mut() {
            self.expr(arg);
        }
        match target.1 {
            Callee::Dependent => CType::Dependent,
            Callee::Invalid => CType::Dependent,
            Callee::Function(sig) => self.check_call(&name, &sig, args, span),
            Callee::Builtin(builtin) => match builtin_signature(builtin) {
                Some(sig) => self.check_call(&name, &sig, args, span),
                None => {
                    if args.len() != 1 {
                        self.error(format!("'{}' takes exactly one argument", name), span);
                        return CType::Dependent;
                    }
                    let arg = &args[0];
                    if builtin == Builtin::SetResult
                        && !arg.ty.is_scalar()
                        && !arg.ty.is_dependent()
                    {
                        self.error(format!("'{}' requires a scalar argument", name), arg.span);
                    }
                    if arg.ty.is_void() {
                        self.error("argument type 'void' is incomplete", arg.span);
                    }
                    CType::Void
                }
            },
        }
    }

    fn resolve_callee(&mut self, name: &str, span: Span) -> (Binding, Callee) {
        if let Some(sym) = self.lookup_local(name) {
            let ty = match sym {
                LocalSymbol::Var { ty, .. } | LocalSymbol::EnumConst { ty, .. } => ty,
                LocalSymbol::Typedef(ty) => ty,
            };
            let message = format!("called object type '{}' is not a function", self.type_name(&ty));
            self.error(message, span);
            return (Binding::Unresolved, Callee::Invalid);
        }
        match self.globals.get(name).cloned() {
            Some(Symbol::Function { sig, .. }) => return (Binding::Function, Callee::Function(sig)),
            Some(Symbol::Var { ty, .. })
            | Some(Symbol::EnumConst { ty, .. })
            | Some(Symbol::Typedef(ty)) => {
                let message =
                    format!("called object type '{}' is not a function", self.type_name(&ty));
                self.error(message, span);
                return (Binding::Unresolved, Callee::Invalid);
            }
            None => {}
        }
        if let Some(builtin) = self.visible_builtin(name) {
            return (Binding::Builtin(builtin), Callee::Builtin(builtin));
        }
        match self.recover(name, span) {
            Some((Binding::Placeholder, _)) => (Binding::Placeholder, Callee::Dependent),
            Some((_, ty)) => {
                let message =
                    format!("called object type '{}' is not a function", self.type_name(&ty));
                self.error(message, span);
                (Binding::Unresolved, Callee::Invalid)
            }
            None => {
                self.error(format!("use of undeclared identifier '{}'", name), span);
                (Binding::Unresolved, Callee::Invalid)
            }
        }
    }

    fn check_call(&mut self, name: &str, sig: &FunctionSig, args: &[Expr], span: Span) -> CType {
        if args.len() < sig.params.len() {
            self.error(
                format!(
                    "too few arguments to function call '{}', expected {}, have {}",
                    name,
                    sig.params.len(),
                    args.len()
                ),
                span,
            );
            return sig.ret.clone();
        }
        if args.len() > sig.params.len() && !sig.variadic {
            self.error(
                format!(
                    "too many arguments to function call '{}', expected {}, have {}",
                    name,
                    sig.params.len(),
                    args.len()
                ),
                span,
            );
            return sig.ret.clone();
        }
        for (param, arg) in sig.params.iter().zip(args) {
            self.check_assignable(param, arg, "passing");
        }
        for arg in args.iter().skip(sig.params.len()) {
            if arg.ty.is_record() {
                self.error("cannot pass a structure through variadic arguments", arg.span);
            }
        }
        sig.ret.clone()
    }

    fn index_type(&mut self, base: &Expr, index: &Expr, span: Span) -> CType {
        if base.ty.is_dependent() || index.ty.is_dependent() {
            return CType::Dependent;
        }
        let (ptr, idx) = if base.ty.is_pointer_like() {
            (base, index)
        } else if index.ty.is_pointer_like() {
            (index, base)
        } else {
            self.error("subscripted value is not an array or pointer", span);
            return CType::Dependent;
        };
        if !idx.ty.is_integer() && !idx.ty.is_dynamic() {
            self.error("array subscript is not an integer", idx.span);
            return CType::Dependent;
        }
        match ptr.ty.pointee() {
            Some(inner) if !inner.is_void() => inner.clone(),
            _ => {
                self.error("subscript of pointer to incomplete type 'void'", span);
                CType::Dependent
            }
        }
    }

    fn member_type(&mut self, base: &Expr, field: &str, arrow: bool, span: Span) -> CType {
        if base.ty.is_dependent() {
            return CType::Dependent;
        }
        let record = if arrow {
            match base.ty.decay() {
                CType::Pointer(inner) => *inner,
                other => {
                    let message = format!(
                        "member reference type '{}' is not a pointer",
                        self.type_name(&other)
                    );
                    self.error(message, span);
                    return CType::Dependent;
                }
            }
        } else {
            if base.ty.is_pointer() {
                let message = format!(
                    "member reference type '{}' is a pointer; did you mean to use '->'?",
                    self.type_name(&base.ty)
                );
                self.error(message, span);
                return CType::Dependent;
            }
            base.ty.clone()
        };
        let CType::Record(id) = record else {
            let message = format!(
                "member reference base type '{}' is not a structure",
                self.type_name(&record)
            );
            self.error(message, span);
            return CType::Dependent;
        };
        match self.types.record(id).and_then(|r| r.field(field)) {
            Some(f) => f.ty.clone(),
            None => {
                let message =
                    format!("no member named '{}' in '{}'", field, self.type_name(&record));
                self.error(message, span);
                CType::Dependent
            }
        }
    }

    fn cast_type(&mut self, target: &CType, operand: &Expr, span: Span) -> CType {
        if target.is_dependent() {
            return CType::Dependent;
        }
        if operand.ty.is_dependent() || target.is_void() {
            return target.clone();
        }
        let from = operand.ty.decay();
        if !target.is_scalar() {
            let message = format!(
                "used type '{}' where arithmetic or pointer type is required",
                self.type_name(target)
            );
            self.error(message, span);
            return CType::Dependent;
        }
        if !from.is_scalar() {
            let message = format!(
                "operand of type '{}' where arithmetic or pointer type is required",
                self.type_name(&from)
            );
            self.error(message, span);
            return CType::Dependent;
        }
        if (target.is_pointer() && from.is_floating())
            || (target.is_floating() && from.is_pointer())
        {
            let message = format!(
                "cannot cast from '{}' to '{}'",
                self.type_name(&from),
                self.type_name(target)
            );
            self.error(message, span);
            return CType::Dependent;
        }
        target.clone()
    }

    fn is_null_constant(&self, e: &Expr) -> bool {
        matches!(e.kind, ExprKind::Null)
            || (e.ty.is_integer() && matches!(self.const_eval(e), Some(Constant::Int(0))))
    }

    fn check_assignable(&mut self, target: &CType, value: &Expr, context: &str) {
        let from = value.ty.decay();
        if target.is_dependent()
            || from.is_dependent()
            || target.is_dynamic()
            || from.is_dynamic()
        {
            return;
        }
        let ok = match target {
            CType::Bool => from.is_scalar(),
            t if t.is_arithmetic() => from.is_arithmetic(),
            CType::Pointer(_) => from.is_pointer() || self.is_null_constant(value),
            CType::Record(id) => from == CType::Record(*id),
            _ => false,
        };
        if ok {
            return;
        }
        let (to_name, from_name) = (self.type_name(target), self.type_name(&value.ty));
        let message = if target.is_pointer() && from.is_integer() {
            format!(
                "incompatible integer to pointer conversion {} '{}' from '{}'",
                context, to_name, from_name
            )
        } else if target.is_integer() && from.is_pointer() {
            format!(
                "incompatible pointer to integer conversion {} '{}' from '{}'",
                context, to_name, from_name
            )
        } else {
            format!("{} '{}' from incompatible type '{}'", context, to_name, from_name)
        };
        self.error(message, value.span);
    }

    // ── Constant evaluation ──

    /// Folds `e` if it is a constant expression. Expects `e` to be analysed.
    pub fn const_eval(&self, e: &Expr) -> Option<Constant> {
        let value = match &e.kind {
            ExprKind::IntLit(v, _) => Constant::Int(*v as i64),
            ExprKind::CharLit(c) => Constant::Int(*c),
            ExprKind::BoolLit(b) => Constant::Bool(*b),
            ExprKind::FloatLit(f, _) => Constant::Float(*f),
            ExprKind::Null => Constant::Ptr(0),
            ExprKind::StrLit(s) => Constant::Str(s.clone()),
            ExprKind::Ident(_, Binding::EnumConst(v)) => Constant::Int(*v),
            ExprKind::SizeofType(t) => Constant::Int(self.types.size_of(&t.resolved)? as i64),
            ExprKind::SizeofExpr(inner) => Constant::Int(self.types.size_of(&inner.ty)? as i64),
            ExprKind::Unary(op, inner) => {
                let v = self.const_eval(inner)?;
                match op {
                    UnaryOp::Plus => v,
                    UnaryOp::Neg => match v {
                        Constant::Float(f) => Constant::Float(-f),
                        other => Constant::Int(other.as_i64()?.wrapping_neg()),
                    },
                    UnaryOp::Not => Constant::Bool(!v.truthy()),
                    UnaryOp::BitNot => Constant::Int(!v.as_i64()?),
                    _ => return None,
                }
            }
            ExprKind::Binary(op, a, b) => self.fold_binary(*op, a, b)?,
            ExprKind::Cast(target, inner) => {
                return self.const_eval(inner)?.coerce(&target.resolved);
            }
            ExprKind::Conditional(cond, then, els) => {
                let branch = if self.const_eval(cond)?.truthy() { then } else { els };
                self.const_eval(branch)?
            }
            _ => return None,
        };
        value.coerce(&e.ty)
    }

    fn fold_binary(&self, op: BinOp, a: &Expr, b: &Expr) -> Option<Constant> {
        let lhs = self.const_eval(a)?;
        if op.is_logical() {
            let l = lhs.truthy();
            if (op == BinOp::And && !l) || (op == BinOp::Or && l) {
                return Some(Constant::Bool(l));
            }
            return Some(Constant::Bool(self.const_eval(b)?.truthy()));
        }
        let rhs = self.const_eval(b)?;
        let (ta, tb) = (a.ty.decay(), b.ty.decay());
        if !ta.is_arithmetic() || !tb.is_arithmetic() {
            return None;
        }
        let common = match op {
            BinOp::Shl | BinOp::Shr => ta.promote(),
            _ => CType::common(&ta, &tb),
        };
        if common.is_floating() {
            let (x, y) = (lhs.as_f64()?, rhs.as_f64()?);
            return Some(match op {
                BinOp::Add => Constant::Float(x + y),
                BinOp::Sub => Constant::Float(x - y),
                BinOp::Mul => Constant::Float(x * y),
                BinOp::Div => Constant::Float(x / y),
                BinOp::Lt => Constant::Bool(x < y),
                BinOp::Gt => Constant::Bool(x > y),
                BinOp::Le => Constant::Bool(x <= y),
                BinOp::Ge => Constant::Bool(x >= y),
                BinOp::Eq => Constant::Bool(x == y),
                BinOp::Ne => Constant::Bool(x != y),
                _ => return None,
            });
        }
        let kind = common.scalar_kind()?;
        let (x, y) = (kind.wrap(lhs.as_i64()?), kind.wrap(rhs.as_i64()?));
        let unsigned = kind.is_unsigned();
        let cmp = |f: fn(&i64, &i64) -> bool, g: fn(&u64, &u64) -> bool| {
            Constant::Bool(if unsigned { g(&(x as u64), &(y as u64)) } else { f(&x, &y) })
        };
        Some(match op {
            BinOp::Add => Constant::Int(x.wrapping_add(y)),
            BinOp::Sub => Constant::Int(x.wrapping_sub(y)),
            BinOp::Mul => Constant::Int(x.wrapping_mul(y)),
            BinOp::Div | BinOp::Rem if y == 0 => return None,
            BinOp::Div if unsigned => Constant::Int(((x as u64) / (y as u64)) as i64),
            BinOp::Div => Constant::Int(x.wrapping_div(y)),
            BinOp::Rem if unsigned => Constant::Int(((x as u64) % (y as u64)) as i64),
            BinOp::Rem => Constant::Int(x.wrapping_rem(y)),
            BinOp::Shl => Constant::Int(x.wrapping_shl(y as u32)),
            BinOp::Shr if unsigned => Constant::Int(((x as u64).wrapping_shr(y as u32)) as i64),
            BinOp::Shr => Constant::Int(x.wrapping_shr(y as u32)),
            BinOp::BitAnd => Constant::Int(x & y),
            BinOp::BitOr => Constant::Int(x | y),
            BinOp::BitXor => Constant::Int(x ^ y),
            BinOp::Lt => cmp(i64::lt, u64::lt),
            BinOp::Gt => cmp(i64::gt, u64::gt),
            BinOp::Le => cmp(i64::le, u64::le),
            BinOp::Ge => cmp(i64::ge, u64::ge),
            BinOp::Eq => Constant::Bool(x == y),
            BinOp::Ne => Constant::Bool(x != y),
            BinOp::And | BinOp::Or => return None,
        })
    }
}

enum Callee {
    Function(FunctionSig),
    Builtin(Builtin),
    Dependent,
    Invalid,
}

fn int_literal_type(value: u64, suffix: IntSuffix) -> CType {
    match suffix {
        IntSuffix::None if value <= i32::MAX as u64 => CType::INT,
        IntSuffix::None if value <= i64::MAX as u64 => CType::LONG,
        IntSuffix::None => CType::ULONG,
        IntSuffix::U if value <= u32::MAX as u64 => CType::UINT,
        IntSuffix::U => CType::ULONG,
        IntSuffix::L if value <= i64::MAX as u64 => CType::LONG,
        IntSuffix::LL if value <= i64::MAX as u64 => CType::int(IntRank::LongLong, true),
        IntSuffix::L | IntSuffix::UL => CType::ULONG,
        IntSuffix::LL | IntSuffix::ULL => CType::int(IntRank::LongLong, false),
    }
}

pub fn is_lvalue(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Ident(_, binding) => binding.is_variable(),
        ExprKind::Unary(UnaryOp::Deref, _) | ExprKind::Index(..) => true,
        ExprKind::Member { base, arrow, .. } => *arrow || is_lvalue(base),
        _ => e.ty.is_dependent(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;

    fn analyze(sema: &mut Sema, src: &str) -> Result<Vec<DeclGroup>, Vec<SemaError>> {
        let tokens = Lexer::new(src, 0, 0).tokenize().unwrap();
        let mut parser = Parser::new(tokens, sema.type_names());
        let mut out = Vec::new();
        while let Some(mut group) = parser.parse_top_level().unwrap() {
            sema.analyze_top_level(&mut group)?;
            out.push(group);
        }
        Ok(out)
    }

    fn first_error(src: &str) -> String {
        let mut sema = Sema::new();
        match analyze(&mut sema, src) {
            Ok(_) => panic!("expected an error for {:?}", src),
            Err(errors) => errors[0].message.clone(),
        }
    }

    #[test]
    fn globals_get_constant_images() {
        let mut sema = Sema::new();
        let source = "int a[3] = {1, 2}; char s[] = \"hi\"; double d = 1 + 2;";
        let groups = analyze(&mut sema, source).unwrap();
        let a = groups[0].decls[0].as_var().unwrap();
        assert_eq!(a.constant_init, Some(vec![(0, Constant::Int(1)), (1, Constant::Int(2))]));
        let s = groups[1].decls[0].as_var().unwrap();
        assert_eq!(s.ty, CType::Array(Box::new(CType::CHAR), Some(3)));
        let d = groups[2].decls[0].as_var().unwrap();
        assert_eq!(d.constant_init, Some(vec![(0, Constant::Float(3.0))]));
    }

    #[test]
    fn locals_get_monotonic_slots() {
        let mut sema = Sema::new();
        let source = "int f(int x) { int a[2]; { int b; } int c; return c; }";
        let groups = analyze(&mut sema, source).unwrap();
        let f = groups[0].decls[0].as_function().unwrap();
        assert_eq!(f.frame_slots, 5);
    }

    #[test]
    fn reports_clang_style_errors() {
        assert_eq!(first_error("int x = y;"), "use of undeclared identifier 'y'");
        assert_eq!(
            first_error("int* p = 3.5;"),
            "initializing 'int *' from incompatible type 'double'"
        );
        assert_eq!(
            first_error("int* p = 3;"),
            "incompatible integer to pointer conversion initializing 'int *' from 'int'"
        );
        assert_eq!(first_error("int x; int x;"), "redefinition of 'x'");
        assert_eq!(first_error("void f() { break; }"), "'break' statement not in loop statement");
        assert_eq!(
            first_error("struct P { int x; }; struct P p; int z = p.y;"),
            "no member named 'y' in 'P'"
        );
    }

    #[test]
    fn rollback_forgets_staged_declarations() {
        let mut sema = Sema::new();
        analyze(&mut sema, "int kept = 1;").unwrap();
        sema.commit();
        analyze(&mut sema, "struct Tmp { int v; }; int dropped;").unwrap();
        assert!(sema.global("dropped").is_some());
        sema.rollback();
        assert!(sema.global("dropped").is_none());
        assert!(!sema.type_names().contains("Tmp"));
        assert_eq!(sema.types().record_count(), 0);
        assert!(sema.global("kept").is_some());
    }

    #[test]
    fn comparisons_yield_bool_and_literals_widen() {
        let mut sema = Sema::new();
        let groups = analyze(&mut sema, "bool b = 1 < 2; long big = 3000000000;").unwrap();
        let b = groups[0].decls[0].as_var().unwrap();
        assert_eq!(b.constant_init, Some(vec![(0, Constant::Bool(true))]));
        assert_eq!(int_literal_type(3_000_000_000, IntSuffix::None), CType::LONG);
        assert_eq!(int_literal_type(1, IntSuffix::U), CType::UINT);
    }

    #[test]
    fn runtime_hooks_are_hidden_until_installed() {
        assert_eq!(
            first_error("void f() { __cinder_print_value(1); }"),
            "use of undeclared identifier '__cinder_print_value'"
        );
        let mut sema = Sema::new();
        sema.install_runtime_universe();
        assert!(analyze(&mut sema, "void f() { __cinder_print_value(1); }").is_ok());
    }

    #[test]
    fn enums_and_static_locals() {
        let mut sema = Sema::new();
        let groups = analyze(
            &mut sema,
            "enum Color { Red, Green = 5, Blue }; int counter() { static int n = 0; return ++n; }",
        )
        .unwrap();
        let blue = Symbol::EnumConst { value: 6, ty: CType::Enum("Color".into()) };
        assert_eq!(sema.global("Blue"), Some(&blue));
        let f = groups[1].decls[0].as_function().unwrap();
        let Some(Stmt { kind: StmtKind::Compound(body), .. }) = &f.body else { panic!() };
        let StmtKind::Decl(g) = &body[0].kind else { panic!() };
        let n = g.decls[0].as_var().unwrap();
        assert_eq!(n.storage, VarStorage::Static);
        assert_eq!(n.link_name, "__cinder_static_counter_n");
    }
}
