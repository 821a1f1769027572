//! Lowering from the analysed AST to LIR.
//!
//! Memory is slot addressed: every scalar occupies one slot, arrays and
//! records occupy the slots of their elements. Expressions of aggregate type
//! evaluate to their address.

use thiserror::Error;

use crate::compiler::ast::*;
use crate::compiler::lir::{
    BinaryOp, Builtin, Instr, LirConst, LirFunction, LirGlobal, LirModule, PrintShape, ScalarKind,
    UnaryOp as LirUnary,
};
use crate::compiler::sema::{builtin_signature, Constant, FunctionSig, Sema};
use crate::compiler::tokens::Span;
use crate::compiler::types::{CType, TypeTable};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodegenError {
    #[error("{what} is not supported")]
    Unsupported { what: String, span: Span },
    #[error("cannot generate code: {message}")]
    Internal { message: String, span: Span },
}

impl CodegenError {
    pub fn span(&self) -> Span {
        match self {
            CodegenError::Unsupported { span, .. } | CodegenError::Internal { span, .. } => *span,
        }
    }
}

fn unsupported(what: impl Into<String>, span: Span) -> CodegenError {
    CodegenError::Unsupported { what: what.into(), span }
}

fn internal(message: impl Into<String>, span: Span) -> CodegenError {
    CodegenError::Internal { message: message.into(), span }
}

/// Lowers one analysed declaration group into `module`.
pub fn lower_group(
    group: &DeclGroup,
    sema: &Sema,
    module: &mut LirModule,
) -> Result<(), CodegenError> {
    for decl in &group.decls {
        match &decl.kind {
            DeclKind::Var(v) if v.is_definition() => lower_global(v, decl.span, sema, module)?,
            DeclKind::Function(f) if f.body.is_some() => {
                let function = FunctionLowerer::new(sema, module, f).lower(f)?;
                module.functions.push(function);
            }
            _ => {}
        }
    }
    Ok(())
}

fn lower_global(
    v: &VarDecl,
    span: Span,
    sema: &Sema,
    module: &mut LirModule,
) -> Result<(), CodegenError> {
    let types = sema.types();
    let slots = types.slots(&v.ty).max(1) as u32;
    match &v.constant_init {
        Some(image) => {
            let init = constant_image(image, module);
            module.globals.push(LirGlobal { name: v.link_name.clone(), slots, init });
        }
        None => {
            module.globals.push(LirGlobal { name: v.link_name.clone(), slots, init: Vec::new() });
            let Some(init) = &v.init else { return Ok(()) };
            let name = format!("__cinder_init_{}", v.link_name);
            let mut lw = FunctionLowerer::bare(sema, module);
            lw.initialize(&Place::Global(v.link_name.clone()), &v.ty, init, span)?;
            lw.emit(Instr::ReturnVoid);
            let code = std::mem::take(&mut lw.code);
            module.functions.push(LirFunction {
                name: name.clone(),
                params: Vec::new(),
                ret: None,
                frame_slots: 0,
                code,
            });
            module.initializers.push(name);
        }
    }
    Ok(())
}

fn constant_image(image: &[(u64, Constant)], module: &mut LirModule) -> Vec<(u32, LirConst)> {
    image
        .iter()
        .map(|(slot, c)| {
            let value = match c {
                Constant::Int(v) => LirConst::Int(*v),
                Constant::Bool(b) => LirConst::Int(*b as i64),
                Constant::Float(f) => LirConst::Float(*f),
                Constant::Ptr(p) => LirConst::Ptr(*p),
                Constant::Str(s) => LirConst::Str(module.intern_string(s)),
            };
            (*slot as u32, value)
        })
        .collect()
}

/// Layout description used by the value printer.
pub fn print_shape(types: &TypeTable, ty: &CType) -> PrintShape {
    let label = types.name(ty);
    match ty {
        CType::Dynamic | CType::Dependent | CType::Void => PrintShape::Dynamic,
        CType::Enum(_) => PrintShape::Enum { label },
        CType::Pointer(inner) if inner.is_char() => PrintShape::CString { label },
        CType::Pointer(_) => PrintShape::Pointer { label },
        CType::Array(elem, len) => PrintShape::Array {
            label,
            elem: Box::new(print_shape(types, elem)),
            len: len.unwrap_or(0),
            stride: types.slots(elem),
        },
        CType::Record(id) => {
            let fields = types
                .record(*id)
                .map(|r| {
                    r.fields
                        .iter()
                        .map(|f| (f.name.clone(), f.slot, print_shape(types, &f.ty)))
                        .collect()
                })
                .unwrap_or_default();
            PrintShape::Record { label, fields }
        }
        t if t.is_char() => {
            PrintShape::Char { label, kind: t.scalar_kind().unwrap_or(ScalarKind::I8) }
        }
        t => PrintShape::Scalar { label, kind: t.scalar_kind().unwrap_or(ScalarKind::I64) },
    }
}

fn kind_of(ty: &CType) -> Option<ScalarKind> {
    ty.decay().scalar_kind()
}

fn is_aggregate(ty: &CType) -> bool {
    ty.is_array() || ty.is_record()
}

fn binary_op(op: BinOp) -> Option<BinaryOp> {
    Some(match op {
        BinOp::Add => BinaryOp::Add,
        BinOp::Sub => BinaryOp::Sub,
        BinOp::Mul => BinaryOp::Mul,
        BinOp::Div => BinaryOp::Div,
        BinOp::Rem => BinaryOp::Rem,
        BinOp::Shl => BinaryOp::Shl,
        BinOp::Shr => BinaryOp::Shr,
        BinOp::BitAnd => BinaryOp::BitAnd,
        BinOp::BitOr => BinaryOp::BitOr,
        BinOp::BitXor => BinaryOp::BitXor,
        BinOp::Lt => BinaryOp::Lt,
        BinOp::Le => BinaryOp::Le,
        BinOp::Gt => BinaryOp::Gt,
        BinOp::Ge => BinaryOp::Ge,
        BinOp::Eq => BinaryOp::Eq,
        BinOp::Ne => BinaryOp::Ne,
        BinOp::And | BinOp::Or => return None,
    })
}

/// Where an object being initialised lives.
enum Place {
    Local(u32),
    Global(String),
}

#[derive(Default)]
struct LoopLabels {
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct FunctionLowerer<'a> {
    sema: &'a Sema,
    types: &'a TypeTable,
    module: &'a mut LirModule,
    code: Vec<Instr>,
    loops: Vec<LoopLabels>,
    ret: CType,
}

impl<'a> FunctionLowerer<'a> {
    fn new(sema: &'a Sema, module: &'a mut LirModule, f: &FunctionDecl) -> Self {
        Self {
            sema,
            types: sema.types(),
            module,
            code: Vec::new(),
            loops: Vec::new(),
            ret: f.ret.clone(),
        }
    }

    fn bare(sema: &'a Sema, module: &'a mut LirModule) -> Self {
        Self {
            sema,
            types: sema.types(),
            module,
            code: Vec::new(),
            loops: Vec::new(),
            ret: CType::Void,
        }
    }

    fn lower(mut self, f: &FunctionDecl) -> Result<LirFunction, CodegenError> {
        let span = f.declarator.span;
        let mut params = Vec::with_capacity(f.params.len());
        for p in &f.params {
            match p.ty.scalar_kind() {
                Some(kind) => params.push(kind),
                None => return Err(unsupported("passing structures by value", span)),
            }
        }
        let ret = if f.ret.is_void() {
            None
        } else {
            let kind = f.ret.scalar_kind();
            Some(kind.ok_or_else(|| unsupported("returning structures by value", span))?)
        };
        if let Some(body) = &f.body {
            self.stmt(body)?;
        }
        match ret {
            None => {
                self.emit(Instr::ReturnVoid);
            }
            Some(kind) => {
                self.emit(Instr::PushInt(0));
                self.emit(Instr::Convert { from: ScalarKind::I64, to: kind });
                self.emit(Instr::Return);
            }
        }
        Ok(LirFunction {
            name: f.name.clone(),
            params,
            ret,
            frame_slots: f.frame_slots,
            code: self.code,
        })
    }

    // ── Emission helpers ──

    fn emit(&mut self, instr: Instr) -> usize {
        self.code.push(instr);
        self.code.len() - 1
    }

    fn here(&self) -> usize {
        self.code.len()
    }

    fn patch(&mut self, at: usize, target: usize) {
        match &mut self.code[at] {
            Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) => *t = target,
            _ => {}
        }
    }

    fn convert(&mut self, from: &CType, to: &CType) {
        if let (Some(f), Some(t)) = (kind_of(from), kind_of(to)) {
            if f != t {
                self.emit(Instr::Convert { from: f, to: t });
            }
        }
    }

    fn stride(&self, pointee: &CType) -> i64 {
        self.types.slots(pointee).max(1) as i64
    }

    fn push_place(&mut self, place: &Place, offset: u64) {
        match place {
            Place::Local(slot) => {
                self.emit(Instr::LocalAddr(slot + offset as u32));
            }
            Place::Global(name) => {
                self.emit(Instr::GlobalAddr(name.clone()));
                if offset > 0 {
                    self.emit(Instr::PushInt(offset as i64));
                    self.emit(Instr::PtrAdd(1));
                }
            }
        }
    }

    // ── Statements ──

    fn stmt(&mut self, s: &Stmt) -> Result<(), CodegenError> {
        match &s.kind {
            StmtKind::Null => {}
            StmtKind::Expr(e) => self.discard(e)?,
            StmtKind::Decl(group) => {
                for decl in &group.decls {
                    if let DeclKind::Var(v) = &decl.kind {
                        self.local_decl(v, decl.span)?;
                    }
                }
            }
            StmtKind::Compound(stmts) => {
                for stmt in stmts {
                    self.stmt(stmt)?;
                }
            }
            StmtKind::If { cond, then, els } => {
                self.rvalue(cond)?;
                let skip = self.emit(Instr::JumpIfFalse(0));
                self.stmt(then)?;
                match els {
                    Some(els) => {
                        let end = self.emit(Instr::Jump(0));
                        let target = self.here();
                        self.patch(skip, target);
                        self.stmt(els)?;
                        let target = self.here();
                        self.patch(end, target);
                    }
                    None => {
                        let target = self.here();
                        self.patch(skip, target);
                    }
                }
            }
            StmtKind::While { cond, body } => {
                let top = self.here();
                self.rvalue(cond)?;
                let exit = self.emit(Instr::JumpIfFalse(0));
                self.loop_body(body, top)?;
                self.emit(Instr::Jump(top));
                let end = self.here();
                self.patch(exit, end);
                self.close_loop(end);
            }
            StmtKind::DoWhile { body, cond } => {
                let top = self.here();
                self.loops.push(LoopLabels::default());
                self.stmt(body)?;
                let cont = self.here();
                self.rvalue(cond)?;
                self.emit(Instr::JumpIfTrue(top));
                let end = self.here();
                if let Some(labels) = self.loops.last() {
                    for at in labels.continues.clone() {
                        self.patch(at, cont);
                    }
                }
                self.close_loop(end);
            }
            StmtKind::For { init, cond, step, body } => {
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                let top = self.here();
                let exit = match cond {
                    Some(cond) => {
                        self.rvalue(cond)?;
                        Some(self.emit(Instr::JumpIfFalse(0)))
                    }
                    None => None,
                };
                self.loops.push(LoopLabels::default());
                self.stmt(body)?;
                let cont = self.here();
                if let Some(step) = step {
                    self.discard(step)?;
                }
                self.emit(Instr::Jump(top));
                let end = self.here();
                if let Some(exit) = exit {
                    self.patch(exit, end);
                }
                if let Some(labels) = self.loops.last() {
                    for at in labels.continues.clone() {
                        self.patch(at, cont);
                    }
                }
                self.close_loop(end);
            }
            StmtKind::Break => {
                let at = self.emit(Instr::Jump(0));
                match self.loops.last_mut() {
                    Some(labels) => labels.breaks.push(at),
                    None => return Err(internal("'break' outside of a loop", s.span)),
                }
            }
            StmtKind::Continue => {
                let at = self.emit(Instr::Jump(0));
                match self.loops.last_mut() {
                    Some(labels) => labels.continues.push(at),
                    None => return Err(internal("'continue' outside of a loop", s.span)),
                }
            }
            StmtKind::Return(Some(e)) => {
                self.rvalue(e)?;
                let ret = self.ret.clone();
                self.convert(&e.ty, &ret);
                self.emit(Instr::Return);
            }
            StmtKind::Return(None) => {
                self.emit(Instr::ReturnVoid);
            }
        }
        Ok(())
    }

    fn loop_body(&mut self, body: &Stmt, cont: usize) -> Result<(), CodegenError> {
        self.loops.push(LoopLabels::default());
        self.stmt(body)?;
        if let Some(labels) = self.loops.last() {
            for at in labels.continues.clone() {
                self.patch(at, cont);
            }
        }
        Ok(())
    }

    fn close_loop(&mut self, end: usize) {
        if let Some(labels) = self.loops.pop() {
            for at in labels.breaks {
                self.patch(at, end);
            }
        }
    }

    fn local_decl(&mut self, v: &VarDecl, span: Span) -> Result<(), CodegenError> {
        match v.storage {
            VarStorage::Static => {
                let slots = self.types.slots(&v.ty).max(1) as u32;
                let image = v.constant_init.as_deref().unwrap_or(&[]);
                let init = constant_image(image, self.module);
                self.module.globals.push(LirGlobal { name: v.link_name.clone(), slots, init });
            }
            VarStorage::Local { slot } => {
                if let Some(init) = &v.init {
                    self.initialize(&Place::Local(slot), &v.ty, init, span)?;
                }
            }
            VarStorage::Global => {}
        }
        Ok(())
    }

    /// Stores `init` into the object of type `ty` at `place`.
    fn initialize(
        &mut self,
        place: &Place,
        ty: &CType,
        init: &Initializer,
        span: Span,
    ) -> Result<(), CodegenError> {
        let string_array = ty.is_array()
            && matches!(init, Initializer::Expr(Expr { kind: ExprKind::StrLit(_), .. }));
        if matches!(init, Initializer::List(..)) || string_array {
            for slot in 0..self.types.slots(ty) {
                self.push_place(place, slot);
                self.emit(Instr::PushInt(0));
                self.emit(Instr::Store(ScalarKind::I64));
                self.emit(Instr::Pop);
            }
        }
        self.init_at(place, 0, ty, init, span)
    }

    fn init_at(
        &mut self,
        place: &Place,
        offset: u64,
        ty: &CType,
        init: &Initializer,
        span: Span,
    ) -> Result<(), CodegenError> {
        match init {
            Initializer::List(items, _) => match ty {
                CType::Array(elem, _) => {
                    let stride = self.types.slots(elem);
                    for (i, item) in items.iter().enumerate() {
                        self.init_at(place, offset + i as u64 * stride, elem, item, span)?;
                    }
                }
                CType::Record(id) => {
                    let fields =
                        self.types.record(*id).map(|r| r.fields.clone()).unwrap_or_default();
                    for (field, item) in fields.iter().zip(items) {
                        self.init_at(place, offset + field.slot, &field.ty, item, span)?;
                    }
                }
                _ => {
                    if let Some(first) = items.first() {
                        self.init_at(place, offset, ty, first, span)?;
                    }
                }
            },
            Initializer::Construct(args, _) => {
                if let Some(arg) = args.first() {
                    self.store_expr(place, offset, ty, arg)?;
                }
            }
            Initializer::Expr(e) => {
                if let (CType::Array(elem, _), ExprKind::StrLit(s)) = (ty, &e.kind) {
                    let kind = elem.scalar_kind().unwrap_or(ScalarKind::I8);
                    for (i, b) in s.bytes().enumerate() {
                        self.push_place(place, offset + i as u64);
                        self.emit(Instr::PushInt(kind.wrap(b as i64)));
                        self.emit(Instr::Store(kind));
                        self.emit(Instr::Pop);
                    }
                } else {
                    self.store_expr(place, offset, ty, e)?;
                }
            }
        }
        Ok(())
    }

    fn store_expr(
        &mut self,
        place: &Place,
        offset: u64,
        ty: &CType,
        e: &Expr,
    ) -> Result<(), CodegenError> {
        self.push_place(place, offset);
        self.rvalue(e)?;
        if ty.is_record() {
            self.emit(Instr::CopySlots(self.types.slots(ty) as u32));
        } else {
            self.convert(&e.ty, ty);
            let kind =
                kind_of(ty).ok_or_else(|| internal("initializer of non-scalar type", e.span))?;
            self.emit(Instr::Store(kind));
        }
        self.emit(Instr::Pop);
        Ok(())
    }

    // ── Expressions ──

    /// Evaluates `e` for its side effects only.
    fn discard(&mut self, e: &Expr) -> Result<(), CodegenError> {
        self.rvalue(e)?;
        if !e.ty.is_void() {
            self.emit(Instr::Pop);
        }
        Ok(())
    }

    /// Pushes the address of an lvalue.
    fn lvalue(&mut self, e: &Expr) -> Result<(), CodegenError> {
        match &e.kind {
            ExprKind::Ident(_, Binding::Local { slot }) => {
                self.emit(Instr::LocalAddr(*slot));
            }
            ExprKind::Ident(_, Binding::Global { link_name }) => {
                self.emit(Instr::GlobalAddr(link_name.clone()));
            }
            ExprKind::Unary(UnaryOp::Deref, operand) => self.rvalue(operand)?,
            ExprKind::Index(base, index) => self.element_addr(base, index, &e.ty)?,
            ExprKind::Member { base, field, arrow } => {
                self.member_addr(base, field, *arrow, e.span)?
            }
            ExprKind::StrLit(s) => {
                let idx = self.module.intern_string(s);
                self.emit(Instr::PushStr(idx));
            }
            _ => return Err(internal("expression is not addressable", e.span)),
        }
        Ok(())
    }

    /// Loads from the address on the stack unless `ty` is an aggregate.
    fn load(&mut self, ty: &CType, span: Span) -> Result<(), CodegenError> {
        if is_aggregate(ty) {
            return Ok(());
        }
        let kind = kind_of(ty)
            .ok_or_else(|| internal(format!("load of type '{}'", self.types.name(ty)), span))?;
        self.emit(Instr::Load(kind));
        Ok(())
    }

    fn element_addr(
        &mut self,
        base: &Expr,
        index: &Expr,
        elem: &CType,
    ) -> Result<(), CodegenError> {
        let (ptr, idx) = if base.ty.is_pointer_like() { (base, index) } else { (index, base) };
        self.rvalue(ptr)?;
        self.rvalue(idx)?;
        self.convert(&idx.ty, &CType::LONG);
        let stride = self.stride(elem);
        self.emit(Instr::PtrAdd(stride));
        Ok(())
    }

    fn member_addr(
        &mut self,
        base: &Expr,
        field: &str,
        arrow: bool,
        span: Span,
    ) -> Result<(), CodegenError> {
        let record = if arrow {
            self.rvalue(base)?;
            base.ty.decay().pointee().cloned()
        } else {
            self.lvalue(base)?;
            Some(base.ty.clone())
        };
        let Some(CType::Record(id)) = record else {
            return Err(internal("member access on a non-record", span));
        };
        let slot = self
            .types
            .record(id)
            .and_then(|r| r.field(field))
            .map(|f| f.slot)
            .ok_or_else(|| internal(format!("unknown member '{}'", field), span))?;
        if slot > 0 {
            self.emit(Instr::PushInt(slot as i64));
            self.emit(Instr::PtrAdd(1));
        }
        Ok(())
    }

    /// Pushes the value of `e`; aggregates push their address.
    fn rvalue(&mut self, e: &Expr) -> Result<(), CodegenError> {
        let span = e.span;
        match &e.kind {
            ExprKind::IntLit(v, _) => {
                let kind = kind_of(&e.ty).unwrap_or(ScalarKind::I64);
                self.emit(Instr::PushInt(kind.wrap(*v as i64)));
            }
            ExprKind::FloatLit(f, single) => {
                self.emit(Instr::PushFloat(if *single { *f as f32 as f64 } else { *f }));
            }
            ExprKind::CharLit(c) => {
                self.emit(Instr::PushInt(*c));
            }
            ExprKind::BoolLit(b) => {
                self.emit(Instr::PushInt(*b as i64));
            }
            ExprKind::Null => {
                self.emit(Instr::PushPtr(0));
            }
            ExprKind::StrLit(_) => self.lvalue(e)?,
            ExprKind::Ident(name, binding) => match binding {
                Binding::Local { .. } | Binding::Global { .. } => {
                    self.lvalue(e)?;
                    self.load(&e.ty, span)?;
                }
                Binding::EnumConst(v) => {
                    self.emit(Instr::PushInt(*v));
                }
                _ => return Err(internal(format!("unresolved name '{}'", name), span)),
            },
            ExprKind::Unary(op, operand) => self.unary(*op, operand, e)?,
            ExprKind::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs, &e.ty, span)?,
            ExprKind::Assign(op, lhs, rhs) => self.assign(*op, lhs, rhs, span)?,
            ExprKind::Conditional(cond, then, els) => {
                self.rvalue(cond)?;
                let skip = self.emit(Instr::JumpIfFalse(0));
                self.branch(then, &e.ty)?;
                let end = self.emit(Instr::Jump(0));
                let target = self.here();
                self.patch(skip, target);
                self.branch(els, &e.ty)?;
                let target = self.here();
                self.patch(end, target);
            }
            ExprKind::Call(callee, args) => self.call(callee, args, span)?,
            ExprKind::Index(base, index) => {
                self.element_addr(base, index, &e.ty)?;
                self.load(&e.ty, span)?;
            }
            ExprKind::Member { base, field, arrow } => {
                self.member_addr(base, field, *arrow, span)?;
                self.load(&e.ty, span)?;
            }
            ExprKind::Cast(target, operand) => {
                if target.resolved.is_void() {
                    self.discard(operand)?;
                } else {
                    self.rvalue(operand)?;
                    self.convert(&operand.ty, &target.resolved);
                }
            }
            ExprKind::SizeofType(target) => {
                let size = self.types.size_of(&target.resolved).unwrap_or(0);
                self.emit(Instr::PushInt(size as i64));
            }
            ExprKind::SizeofExpr(operand) => {
                let size = self.types.size_of(&operand.ty).unwrap_or(0);
                self.emit(Instr::PushInt(size as i64));
            }
            ExprKind::Comma(lhs, rhs) => {
                self.discard(lhs)?;
                self.rvalue(rhs)?;
            }
        }
        Ok(())
    }

    fn branch(&mut self, e: &Expr, ty: &CType) -> Result<(), CodegenError> {
        if ty.is_void() {
            return self.discard(e);
        }
        self.rvalue(e)?;
        self.convert(&e.ty, ty);
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, e: &Expr) -> Result<(), CodegenError> {
        match op {
            UnaryOp::Plus => {
                self.rvalue(operand)?;
                self.convert(&operand.ty, &e.ty);
            }
            UnaryOp::Neg | UnaryOp::BitNot => {
                self.rvalue(operand)?;
                self.convert(&operand.ty, &e.ty);
                let kind = kind_of(&e.ty).ok_or_else(|| internal("unary operand", e.span))?;
                let op = if op == UnaryOp::Neg { LirUnary::Neg } else { LirUnary::BitNot };
                self.emit(Instr::Unary { op, kind });
            }
            UnaryOp::Not => {
                self.rvalue(operand)?;
                let kind = kind_of(&operand.ty).ok_or_else(|| internal("unary operand", e.span))?;
                self.emit(Instr::Unary { op: LirUnary::Not, kind });
            }
            UnaryOp::Deref => {
                self.rvalue(operand)?;
                self.load(&e.ty, e.span)?;
            }
            UnaryOp::AddrOf => self.lvalue(operand)?,
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                self.lvalue(operand)?;
                let step = match operand.ty.pointee() {
                    Some(inner) if operand.ty.is_pointer() => self.stride(inner),
                    _ => 1,
                };
                let amount =
                    if matches!(op, UnaryOp::PreInc | UnaryOp::PostInc) { step } else { -step };
                let post = matches!(op, UnaryOp::PostInc | UnaryOp::PostDec);
                let kind =
                    kind_of(&operand.ty).ok_or_else(|| internal("increment operand", e.span))?;
                self.emit(Instr::IncDec { kind, amount, post });
            }
        }
        Ok(())
    }

    fn binary(
        &mut self,
        op: BinOp,
        a: &Expr,
        b: &Expr,
        result: &CType,
        span: Span,
    ) -> Result<(), CodegenError> {
        if op.is_logical() {
            self.rvalue(a)?;
            let short = if op == BinOp::And {
                self.emit(Instr::JumpIfFalse(0))
            } else {
                self.emit(Instr::JumpIfTrue(0))
            };
            self.rvalue(b)?;
            let other = if op == BinOp::And {
                self.emit(Instr::JumpIfFalse(0))
            } else {
                self.emit(Instr::JumpIfTrue(0))
            };
            let (fallthrough, shortcut) = if op == BinOp::And { (1, 0) } else { (0, 1) };
            self.emit(Instr::PushInt(fallthrough));
            let end = self.emit(Instr::Jump(0));
            let target = self.here();
            self.patch(short, target);
            self.patch(other, target);
            self.emit(Instr::PushInt(shortcut));
            let target = self.here();
            self.patch(end, target);
            return Ok(());
        }

        let (ta, tb) = (a.ty.decay(), b.ty.decay());
        let lir_op = binary_op(op).ok_or_else(|| internal("logical operator", span))?;
        if !ta.is_dynamic() && !tb.is_dynamic() {
            match op {
                BinOp::Add | BinOp::Sub if ta.is_pointer() && tb.is_integer() => {
                    self.rvalue(a)?;
                    self.rvalue(b)?;
                    self.convert(&tb, &CType::LONG);
                    if op == BinOp::Sub {
                        self.emit(Instr::Unary { op: LirUnary::Neg, kind: ScalarKind::I64 });
                    }
                    let stride = ta.pointee().map(|p| self.stride(p)).unwrap_or(1);
                    self.emit(Instr::PtrAdd(stride));
                    return Ok(());
                }
                BinOp::Add if ta.is_integer() && tb.is_pointer() => {
                    self.rvalue(b)?;
                    self.rvalue(a)?;
                    self.convert(&ta, &CType::LONG);
                    let stride = tb.pointee().map(|p| self.stride(p)).unwrap_or(1);
                    self.emit(Instr::PtrAdd(stride));
                    return Ok(());
                }
                BinOp::Sub if ta.is_pointer() && tb.is_pointer() => {
                    self.rvalue(a)?;
                    self.rvalue(b)?;
                    let stride = ta.pointee().map(|p| self.stride(p)).unwrap_or(1);
                    self.emit(Instr::PtrDiff(stride));
                    return Ok(());
                }
                _ => {}
            }
        }

        let operand_ty = if op.is_comparison() {
            if ta.is_pointer() || tb.is_pointer() {
                CType::void_ptr()
            } else {
                CType::common(&ta, &tb)
            }
        } else {
            result.clone()
        };
        self.rvalue(a)?;
        self.convert(&ta, &operand_ty);
        self.rvalue(b)?;
        self.convert(&tb, &operand_ty);
        let kind = kind_of(&operand_ty).ok_or_else(|| internal("binary operand", span))?;
        self.emit(Instr::Binary { op: lir_op, kind });
        Ok(())
    }

    fn assign(
        &mut self,
        op: Option<BinOp>,
        lhs: &Expr,
        rhs: &Expr,
        span: Span,
    ) -> Result<(), CodegenError> {
        let target = lhs.ty.clone();
        if target.is_record() {
            if op.is_some() {
                return Err(internal("compound assignment to a structure", span));
            }
            self.lvalue(lhs)?;
            self.rvalue(rhs)?;
            self.emit(Instr::CopySlots(self.types.slots(&target) as u32));
            return Ok(());
        }
        let kind = kind_of(&target).ok_or_else(|| internal("assignment target", span))?;
        self.lvalue(lhs)?;
        match op {
            None => {
                self.rvalue(rhs)?;
                self.convert(&rhs.ty, &target);
            }
            Some(op) => {
                self.emit(Instr::Dup);
                self.emit(Instr::Load(kind));
                let tb = rhs.ty.decay();
                if target.is_pointer() {
                    self.rvalue(rhs)?;
                    self.convert(&tb, &CType::LONG);
                    if op == BinOp::Sub {
                        self.emit(Instr::Unary { op: LirUnary::Neg, kind: ScalarKind::I64 });
                    }
                    let stride = target.pointee().map(|p| self.stride(p)).unwrap_or(1);
                    self.emit(Instr::PtrAdd(stride));
                } else {
                    let common = match op {
                        BinOp::Shl | BinOp::Shr => target.promote(),
                        _ => CType::common(&target, &tb),
                    };
                    self.convert(&target, &common);
                    self.rvalue(rhs)?;
                    self.convert(&tb, &common);
                    let lir_op = binary_op(op)
                        .ok_or_else(|| internal("logical compound assignment", span))?;
                    let common_kind =
                        kind_of(&common).ok_or_else(|| internal("compound operand", span))?;
                    self.emit(Instr::Binary { op: lir_op, kind: common_kind });
                    self.convert(&common, &target);
                }
            }
        }
        self.emit(Instr::Store(kind));
        Ok(())
    }

    fn push_args(&mut self, sig: &FunctionSig, args: &[Expr]) -> Result<(), CodegenError> {
        for (i, arg) in args.iter().enumerate() {
            if arg.ty.is_record() {
                return Err(unsupported("passing structures by value", arg.span));
            }
            self.rvalue(arg)?;
            match sig.params.get(i) {
                Some(param) => self.convert(&arg.ty, param),
                None => {
                    let promoted = match arg.ty.decay() {
                        CType::Float => CType::Double,
                        t if t.is_integer() => t.promote(),
                        t => t,
                    };
                    self.convert(&arg.ty, &promoted);
                }
            }
        }
        Ok(())
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Result<(), CodegenError> {
        let ExprKind::Ident(name, binding) = &callee.kind else {
            return Err(unsupported("calling through a function pointer", span));
        };
        match binding {
            Binding::Function => {
                let sig = self
                    .sema
                    .function_sig(name)
                    .cloned()
                    .ok_or_else(|| internal(format!("no signature for '{}'", name), span))?;
                self.push_args(&sig, args)?;
                self.emit(Instr::Call { name: name.clone(), argc: args.len() as u32 });
            }
            Binding::Builtin(Builtin::PrintValue) => {
                let arg = args
                    .first()
                    .ok_or_else(|| internal("value printing without a value", span))?;
                self.rvalue(arg)?;
                let shape = print_shape(self.types, &arg.ty);
                self.emit(Instr::PrintValue(shape));
            }
            Binding::Builtin(Builtin::SetResult) => {
                let arg =
                    args.first().ok_or_else(|| internal("result hook without a value", span))?;
                self.rvalue(arg)?;
                self.emit(Instr::Builtin { builtin: Builtin::SetResult, argc: 1 });
            }
            Binding::Builtin(builtin) => {
                let sig = builtin_signature(*builtin)
                    .ok_or_else(|| internal(format!("no signature for '{}'", name), span))?;
                self.push_args(&sig, args)?;
                self.emit(Instr::Builtin { builtin: *builtin, argc: args.len() as u32 });
            }
            _ => return Err(internal(format!("call to unresolved function '{}'", name), span)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;

    fn compile(src: &str) -> LirModule {
        let tokens = Lexer::new(src, 0, 0).tokenize().unwrap();
        let mut sema = Sema::new();
        sema.install_runtime_universe();
        let mut parser = Parser::new(tokens, sema.type_names());
        let mut module = LirModule::default();
        while let Some(mut group) = parser.parse_top_level().unwrap() {
            sema.analyze_top_level(&mut group).unwrap();
            lower_group(&group, &sema, &mut module).unwrap();
        }
        module
    }

    #[test]
    fn constant_globals_become_data() {
        let module =
            compile("int x = 5; double d = 1.5; const char *s = \"hi\"; int a[3] = {1, 2};");
        assert_eq!(
            module.globals[0],
            LirGlobal { name: "x".into(), slots: 1, init: vec![(0, LirConst::Int(5))] }
        );
        assert_eq!(module.globals[1].init, vec![(0, LirConst::Float(1.5))]);
        assert_eq!(module.globals[2].init, vec![(0, LirConst::Str(0))]);
        assert_eq!(module.strings, vec!["hi".to_string()]);
        assert_eq!(module.globals[3].slots, 3);
        assert!(module.initializers.is_empty());
    }

    #[test]
    fn dynamic_global_initializers_get_init_functions() {
        let module = compile("int f() { return 2; } int y = f() + 1;");
        assert_eq!(module.initializers, vec!["__cinder_init_y".to_string()]);
        let init = module.function("__cinder_init_y").unwrap();
        assert!(init.code.contains(&Instr::Call { name: "f".into(), argc: 0 }));
        assert_eq!(init.code.last(), Some(&Instr::ReturnVoid));
    }

    #[test]
    fn functions_record_params_and_frames() {
        let module = compile("long add(int a, long b) { int t = a; return t + b; }");
        let f = module.function("add").unwrap();
        assert_eq!(f.params, vec![ScalarKind::I32, ScalarKind::I64]);
        assert_eq!(f.ret, Some(ScalarKind::I64));
        assert_eq!(f.frame_slots, 3);
        assert!(f.code.contains(&Instr::Convert { from: ScalarKind::I32, to: ScalarKind::I64 }));
    }

    #[test]
    fn falling_off_a_function_returns_by_its_type() {
        let module = compile("int counter; void tick() { counter += 1; } int zero() { }");
        let tick = module.function("tick").unwrap();
        assert_eq!(tick.ret, None);
        assert_eq!(tick.code.last(), Some(&Instr::ReturnVoid));
        let zero = module.function("zero").unwrap();
        assert_eq!(zero.ret, Some(ScalarKind::I32));
        assert_ne!(zero.code.last(), Some(&Instr::ReturnVoid));
    }

    #[test]
    fn loops_patch_their_jumps() {
        let module = compile(
            "int sum(int n) { int s = 0; \
             for (int i = 0; i < n; ++i) { if (i == 2) continue; s += i; } return s; }",
        );
        let f = module.function("sum").unwrap();
        for instr in &f.code {
            if let Instr::Jump(t) | Instr::JumpIfFalse(t) | Instr::JumpIfTrue(t) = instr {
                assert!(*t > 0 && *t <= f.code.len(), "unpatched jump in {:?}", f.code);
            }
        }
    }

    #[test]
    fn value_printing_uses_the_static_shape() {
        let module = compile(
            "struct P { int x; double y; }; struct P p; void show() { __cinder_print_value(p); }",
        );
        let f = module.function("show").unwrap();
        let shape = f.code.iter().find_map(|i| match i {
            Instr::PrintValue(shape) => Some(shape.clone()),
            _ => None,
        });
        match shape {
            Some(PrintShape::Record { label, fields }) => {
                assert_eq!(label, "P");
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[1].1, 1);
            }
            other => panic!("expected record shape, got {:?}", other),
        }
    }

    #[test]
    fn structures_by_value_are_rejected() {
        let source = "struct Q { int a; }; int take(struct Q q) { return q.a; }";
        let tokens = Lexer::new(source, 0, 0).tokenize().unwrap();
        let mut sema = Sema::new();
        let mut parser = Parser::new(tokens, sema.type_names());
        let mut module = LirModule::default();
        let mut first = parser.parse_top_level().unwrap().unwrap();
        sema.analyze_top_level(&mut first).unwrap();
        let mut second = parser.parse_top_level().unwrap().unwrap();
        sema.analyze_top_level(&mut second).unwrap();
        let err = lower_group(&second, &sema, &mut module).unwrap_err();
        assert_eq!(err.to_string(), "passing structures by value is not supported");
    }
}
