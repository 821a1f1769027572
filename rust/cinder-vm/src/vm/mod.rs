//! Stack VM executing LIR over slot-addressed memory.
//!
//! Globals and string literals live in the global region, frames in the
//! stack region. Calls push a [`CallFrame`] and are run by one loop; a
//! builtin that calls back into the VM (dynamic evaluation) nests another
//! `run_until` on the same frame stack.

mod intrinsics;
mod ops;

use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use cinder_compiler::compiler::lir::{
    Builtin, Instr, LirConst, LirFunction, LirGlobal, LirModule, ScalarKind,
};
use thiserror::Error;

use crate::value_printer::{self, PrintedValue};
use crate::values::{Address, Region, Value};

pub use intrinsics::format_printf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub ip: usize,
}

#[derive(Debug, Clone, Error)]
pub enum VmError {
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("undefined function '{0}'")]
    UndefinedFunction(String),
    #[error("undefined symbol '{0}'")]
    UndefinedSymbol(String),
    #[error("function '{0}' is already defined")]
    DuplicateFunction(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("null pointer dereference")]
    NullDereference,
    #[error("invalid memory access at 0x{0:x}")]
    InvalidAddress(u64),
    #[error("instruction limit exceeded: {0}")]
    InstructionLimitExceeded(u64),
    #[error("out of global memory: {requested} more slots requested, limit is {limit}")]
    GlobalMemoryExhausted { requested: u64, limit: u64 },
    #[error("cannot resolve at run time: {0}")]
    Unresolved(String),
    #[error("no runtime host is installed for dynamic evaluation")]
    NoHost,
    #[error("{message}\nStack trace (most recent call last):{stack_trace}")]
    WithStackTrace {
        message: String,
        stack_trace: String,
        frames: Vec<StackFrame>,
    },
}

impl VmError {
    /// Attach stack trace to error, returning a new WithStackTrace variant.
    /// If frames is empty, returns self unchanged.
    pub fn with_stack_trace(self, frames: Vec<StackFrame>) -> Self {
        if frames.is_empty() || matches!(self, VmError::WithStackTrace { .. }) {
            return self;
        }
        let message = self.to_string();
        let mut stack_trace = String::new();
        for (i, frame) in frames.iter().rev().enumerate() {
            stack_trace.push_str(&format!(
                "\n  #{}: {} (instruction {})",
                i, frame.function, frame.ip
            ));
        }
        VmError::WithStackTrace { message, stack_trace, frames }
    }

    /// The error without its stack trace.
    pub fn message(&self) -> String {
        match self {
            VmError::WithStackTrace { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// True when a dynamically resolved name could not be found.
    pub fn is_unresolved(&self) -> bool {
        match self {
            VmError::Unresolved(_) | VmError::UndefinedSymbol(_) => true,
            VmError::WithStackTrace { message, .. } => {
                message.starts_with("cannot resolve at run time")
                    || message.starts_with("undefined symbol")
            }
            _ => false,
        }
    }

    pub fn stack_frames(&self) -> &[StackFrame] {
        match self {
            VmError::WithStackTrace { frames, .. } => frames,
            _ => &[],
        }
    }
}

/// Services the VM needs from the embedding session.
pub trait RuntimeHost {
    /// Evaluates `template` with each `@` standing for the next address in
    /// `addrs`. Called for `__cinder_eval`.
    fn evaluate_dynamic(
        &self,
        vm: &mut Vm,
        handle: u64,
        template: &str,
        addrs: &[u64],
    ) -> Result<Value, VmError>;
}

const MAX_CALL_DEPTH: usize = 512;
const DEFAULT_MAX_INSTRUCTIONS: u64 = 100_000_000;
const DEFAULT_MAX_GLOBAL_SLOTS: u64 = 1 << 24;

/// Call frame on the VM stack.
#[derive(Debug, Clone)]
struct CallFrame {
    function: Rc<LirFunction>,
    ip: usize,
    /// First stack slot of the frame.
    base: usize,
    operand_base: usize,
}

#[derive(Debug, Clone, Copy)]
struct GlobalSlot {
    base: u64,
    slots: u32,
}

/// The Cinder stack VM.
pub struct Vm {
    globals: Vec<Value>,
    global_names: HashMap<String, GlobalSlot>,
    strings: HashMap<String, u64>,
    functions: HashMap<String, Rc<LirFunction>>,
    stack: Vec<Value>,
    operands: Vec<Value>,
    frames: Vec<CallFrame>,
    host: Option<Rc<dyn RuntimeHost>>,
    /// Values handed over by `__cinder_set_result`.
    pub dynamic_results: Vec<Value>,
    printed: Vec<PrintedValue>,
    output: String,
    echo: bool,
    max_call_depth: usize,
    max_instructions: u64,
    instruction_count: u64,
    max_global_slots: u64,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self {
            globals: Vec::new(),
            global_names: HashMap::new(),
            strings: HashMap::new(),
            functions: HashMap::new(),
            stack: Vec::new(),
            operands: Vec::new(),
            frames: Vec::new(),
            host: None,
            dynamic_results: Vec::new(),
            printed: Vec::new(),
            output: String::new(),
            echo: false,
            max_call_depth: MAX_CALL_DEPTH,
            max_instructions: DEFAULT_MAX_INSTRUCTIONS,
            instruction_count: 0,
            max_global_slots: DEFAULT_MAX_GLOBAL_SLOTS,
        }
    }

    pub fn set_host(&mut self, host: Rc<dyn RuntimeHost>) {
        self.host = Some(host);
    }

    /// Also write program output to stdout as it is produced.
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    pub fn set_instruction_limit(&mut self, max_instructions: u64) {
        self.max_instructions = max_instructions;
    }

    /// Caps the global region, strings included, at `slots` values.
    pub fn set_global_memory_limit(&mut self, slots: u64) {
        self.max_global_slots = slots;
    }

    pub fn set_max_call_depth(&mut self, depth: usize) {
        self.max_call_depth = depth;
    }

    // ── Linking ──

    /// Adds a module's strings, globals and functions. Returns the names of
    /// the initializer functions still to be run, in order.
    pub fn link(&mut self, module: LirModule) -> Result<Vec<String>, VmError> {
        let LirModule { globals, functions, strings, initializers } = module;
        if let Some(dup) = functions.iter().find(|f| self.functions.contains_key(&f.name)) {
            return Err(VmError::DuplicateFunction(dup.name.clone()));
        }
        self.reserve_globals(&globals, &strings)?;
        let string_addrs: Vec<u64> = strings.iter().map(|s| self.intern_string(s)).collect();
        for global in globals {
            self.define_global(global, &string_addrs)?;
        }
        for function in functions {
            let function = self.patch(function, &string_addrs)?;
            tracing::trace!(function = %function.name, "linked function");
            self.functions.insert(function.name.clone(), Rc::new(function));
        }
        Ok(initializers)
    }

    /// Fails before anything is linked when the new globals would not fit.
    fn reserve_globals(
        &mut self,
        globals: &[LirGlobal],
        strings: &[String],
    ) -> Result<(), VmError> {
        let mut requested: u64 = strings
            .iter()
            .filter(|s| !self.strings.contains_key(s.as_str()))
            .map(|s| s.len() as u64 + 1)
            .sum();
        for global in globals {
            match self.global_names.get(&global.name) {
                Some(existing) if existing.slots == global.slots => {}
                _ => requested += u64::from(global.slots),
            }
        }
        let limit = self.max_global_slots;
        let exhausted = VmError::GlobalMemoryExhausted { requested, limit };
        if self.globals.len() as u64 + requested > limit {
            return Err(exhausted);
        }
        let additional = usize::try_from(requested).map_err(|_| exhausted.clone())?;
        self.globals.try_reserve(additional).map_err(|_| exhausted)
    }

    fn intern_string(&mut self, s: &str) -> u64 {
        if let Some(addr) = self.strings.get(s) {
            return *addr;
        }
        let base = self.globals.len() as u64;
        self.globals.extend(s.bytes().map(|b| Value::Int(ScalarKind::I8.wrap(b as i64))));
        self.globals.push(Value::Int(0));
        let addr = Address::global(base).encode();
        self.strings.insert(s.to_string(), addr);
        addr
    }

    fn define_global(&mut self, global: LirGlobal, strings: &[u64]) -> Result<(), VmError> {
        let base = match self.global_names.get(&global.name) {
            Some(existing) if existing.slots == global.slots => existing.base,
            _ => {
                let base = self.globals.len() as u64;
                self.globals.resize(self.globals.len() + global.slots as usize, Value::Int(0));
                let slot = GlobalSlot { base, slots: global.slots };
                self.global_names.insert(global.name.clone(), slot);
                base
            }
        };
        for slot in 0..global.slots as u64 {
            self.globals[(base + slot) as usize] = Value::Int(0);
        }
        for (slot, constant) in global.init {
            if slot >= global.slots {
                let message = format!("initializer of '{}' is out of range", global.name);
                return Err(VmError::Runtime(message));
            }
            let value = match constant {
                LirConst::Int(v) => Value::Int(v),
                LirConst::Float(f) => Value::Float(f),
                LirConst::Ptr(p) => Value::Ptr(p),
                LirConst::Str(idx) => Value::Ptr(string_address(strings, idx)?),
            };
            self.globals[(base + slot as u64) as usize] = value;
        }
        Ok(())
    }

    fn patch(&self, mut function: LirFunction, strings: &[u64]) -> Result<LirFunction, VmError> {
        for instr in &mut function.code {
            match instr {
                Instr::PushStr(idx) => *instr = Instr::PushPtr(string_address(strings, *idx)?),
                Instr::GlobalAddr(name) => {
                    if let Some(slot) = self.global_names.get(name.as_str()) {
                        *instr = Instr::PushPtr(Address::global(slot.base).encode());
                    }
                }
                _ => {}
            }
        }
        Ok(function)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn remove_function(&mut self, name: &str) -> bool {
        self.functions.remove(name).is_some()
    }

    /// Address of the global `name`.
    pub fn global_address(&self, name: &str) -> Option<u64> {
        self.global_names.get(name).map(|g| Address::global(g.base).encode())
    }

    // ── Memory ──

    pub fn read(&self, bits: u64) -> Result<Value, VmError> {
        let addr = Address::decode(bits);
        let slot = match addr.region {
            Region::Global => self.globals.get(addr.index as usize),
            Region::Stack => self.stack.get(addr.index as usize),
            Region::Raw => None,
        };
        slot.copied().ok_or(if bits == 0 {
            VmError::NullDereference
        } else {
            VmError::InvalidAddress(bits)
        })
    }

    pub fn write(&mut self, bits: u64, value: Value) -> Result<(), VmError> {
        let addr = Address::decode(bits);
        let slot = match addr.region {
            Region::Global => self.globals.get_mut(addr.index as usize),
            Region::Stack => self.stack.get_mut(addr.index as usize),
            Region::Raw => None,
        };
        match slot {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None if bits == 0 => Err(VmError::NullDereference),
            None => Err(VmError::InvalidAddress(bits)),
        }
    }

    /// Reads a NUL-terminated string of char slots.
    pub fn read_c_string(&self, ptr: Value) -> Result<String, VmError> {
        let mut addr = Address::decode(ptr.as_bits());
        let mut bytes = Vec::new();
        loop {
            let c = self.read(addr.encode())?.as_i64();
            if c == 0 {
                break;
            }
            bytes.push(c as u8);
            addr = addr.offset(1);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    // ── Output ──

    pub(crate) fn write_output(&mut self, text: &str) {
        self.output.push_str(text);
        if self.echo {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        }
    }

    /// Program output produced since the last call.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }

    /// Values printed by `__cinder_print_value` since the last call.
    pub fn take_printed(&mut self) -> Vec<PrintedValue> {
        std::mem::take(&mut self.printed)
    }

    // ── Execution ──

    /// Calls `name` with `args` and runs it to completion.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, VmError> {
        let function = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::UndefinedFunction(name.into()))?;
        let depth = self.frames.len();
        let (stack_len, operand_len) = (self.stack.len(), self.operands.len());
        if depth == 0 {
            self.instruction_count = 0;
        }
        let result = self
            .push_frame(Rc::clone(&function), args.to_vec())
            .and_then(|_| self.run_until(depth));
        match result {
            Ok(()) => Ok(if function.ret.is_some() { self.operands.pop() } else { None }),
            Err(err) => {
                let frames = self.capture_stack_trace(depth);
                self.frames.truncate(depth);
                self.stack.truncate(stack_len);
                self.operands.truncate(operand_len);
                Err(err.with_stack_trace(frames))
            }
        }
    }

    fn capture_stack_trace(&self, from: usize) -> Vec<StackFrame> {
        self.frames
            .iter()
            .skip(from)
            .map(|f| StackFrame { function: f.function.name.clone(), ip: f.ip.saturating_sub(1) })
            .collect()
    }

    fn push_frame(&mut self, function: Rc<LirFunction>, args: Vec<Value>) -> Result<(), VmError> {
        if self.frames.len() >= self.max_call_depth {
            return Err(VmError::StackOverflow(self.max_call_depth));
        }
        if args.len() != function.params.len() {
            return Err(VmError::Runtime(format!(
                "function '{}' expects {} arguments, got {}",
                function.name,
                function.params.len(),
                args.len()
            )));
        }
        let base = self.stack.len();
        let slots = (function.frame_slots as usize).max(function.params.len());
        self.stack.resize(base + slots, Value::Int(0));
        for (i, (arg, kind)) in args.into_iter().zip(&function.params).enumerate() {
            self.stack[base + i] = arg.coerce(*kind);
        }
        self.frames.push(CallFrame { function, ip: 0, base, operand_base: self.operands.len() });
        Ok(())
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.stack.truncate(frame.base);
            self.operands.truncate(frame.operand_base);
        }
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.operands.pop().ok_or_else(|| VmError::Runtime("operand stack underflow".into()))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, VmError> {
        if self.operands.len() < n {
            return Err(VmError::Runtime("operand stack underflow".into()));
        }
        Ok(self.operands.split_off(self.operands.len() - n))
    }

    fn set_ip(&mut self, ip: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = ip;
        }
    }

    fn run_until(&mut self, limit: usize) -> Result<(), VmError> {
        loop {
            if self.frames.len() <= limit {
                return Ok(());
            }
            let (function, ip, base) = match self.frames.last() {
                Some(frame) => (Rc::clone(&frame.function), frame.ip, frame.base),
                None => return Ok(()),
            };
            let Some(instr) = function.code.get(ip) else {
                let message = format!("function '{}' ran past its end", function.name);
                return Err(VmError::Runtime(message));
            };
            self.set_ip(ip + 1);
            self.instruction_count += 1;
            if self.instruction_count > self.max_instructions {
                return Err(VmError::InstructionLimitExceeded(self.max_instructions));
            }

            match instr {
                Instr::PushInt(v) => self.operands.push(Value::Int(*v)),
                Instr::PushFloat(f) => self.operands.push(Value::Float(*f)),
                Instr::PushPtr(p) => self.operands.push(Value::Ptr(*p)),
                Instr::PushStr(idx) => {
                    return Err(VmError::Runtime(format!("unlinked string literal #{}", idx)));
                }
                Instr::LocalAddr(slot) => {
                    let addr = Address::stack((base + *slot as usize) as u64).encode();
                    self.operands.push(Value::Ptr(addr));
                }
                Instr::GlobalAddr(name) => {
                    let addr = self
                        .global_address(name)
                        .ok_or_else(|| VmError::UndefinedSymbol(name.clone()))?;
                    self.operands.push(Value::Ptr(addr));
                }
                Instr::Load(kind) => {
                    let addr = self.pop()?;
                    let value = self.read(addr.as_bits())?.coerce(*kind);
                    self.operands.push(value);
                }
                Instr::Store(kind) => {
                    let value = self.pop()?.coerce(*kind);
                    let addr = self.pop()?;
                    self.write(addr.as_bits(), value)?;
                    self.operands.push(value);
                }
                Instr::CopySlots(n) => {
                    let src = Address::decode(self.pop()?.as_bits());
                    let dst = self.pop()?;
                    let dst_addr = Address::decode(dst.as_bits());
                    let values = (0..*n as i64)
                        .map(|i| self.read(src.offset(i).encode()))
                        .collect::<Result<Vec<_>, _>>()?;
                    for (i, value) in values.into_iter().enumerate() {
                        self.write(dst_addr.offset(i as i64).encode(), value)?;
                    }
                    self.operands.push(dst);
                }
                Instr::Dup => {
                    let top = *self
                        .operands
                        .last()
                        .ok_or_else(|| VmError::Runtime("operand stack underflow".into()))?;
                    self.operands.push(top);
                }
                Instr::Pop => {
                    self.pop()?;
                }
                Instr::Convert { from, to } => {
                    let value = self.pop()?;
                    self.operands.push(value.convert(*from, *to));
                }
                Instr::Binary { op, kind } => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.operands.push(ops::binary(*op, *kind, lhs, rhs)?);
                }
                Instr::Unary { op, kind } => {
                    let value = self.pop()?;
                    self.operands.push(ops::unary(*op, *kind, value)?);
                }
                Instr::PtrAdd(stride) => {
                    let n = self.pop()?.as_i64();
                    let ptr = Address::decode(self.pop()?.as_bits());
                    self.operands.push(Value::Ptr(ptr.offset(n.wrapping_mul(*stride)).encode()));
                }
                Instr::PtrDiff(stride) => {
                    let rhs = Address::decode(self.pop()?.as_bits());
                    let lhs = Address::decode(self.pop()?.as_bits());
                    let diff = lhs.index as i64 - rhs.index as i64;
                    self.operands.push(Value::Int(diff / (*stride).max(1)));
                }
                Instr::IncDec { kind, amount, post } => {
                    let addr = self.pop()?.as_bits();
                    let old = self.read(addr)?.coerce(*kind);
                    let new = ops::step(*kind, old, *amount);
                    self.write(addr, new)?;
                    self.operands.push(if *post { old } else { new });
                }
                Instr::Jump(target) => self.set_ip(*target),
                Instr::JumpIfFalse(target) => {
                    if !self.pop()?.is_truthy() {
                        self.set_ip(*target);
                    }
                }
                Instr::JumpIfTrue(target) => {
                    if self.pop()?.is_truthy() {
                        self.set_ip(*target);
                    }
                }
                Instr::Call { name, argc } => {
                    let callee = self
                        .functions
                        .get(name)
                        .cloned()
                        .ok_or_else(|| VmError::UndefinedFunction(name.clone()))?;
                    let args = self.pop_n(*argc as usize)?;
                    self.push_frame(callee, args)?;
                }
                Instr::Builtin { builtin, argc } => {
                    let args = self.pop_n(*argc as usize)?;
                    match builtin {
                        Builtin::Eval => {
                            let value = self.eval_dynamic(&args)?;
                            self.operands.push(value);
                        }
                        Builtin::SetResult => {
                            self.dynamic_results.push(args.first().copied().unwrap_or_default());
                        }
                        other => {
                            if let Some(value) = intrinsics::call(self, *other, &args)? {
                                self.operands.push(value);
                            }
                        }
                    }
                }
                Instr::PrintValue(shape) => {
                    let value = self.pop()?;
                    let text = value_printer::render(self, shape, value)?;
                    self.write_output(&format!("{}\n", text));
                    self.printed.push(PrintedValue { text, value });
                }
                Instr::Return => {
                    let value = self.pop()?;
                    let value = match function.ret {
                        Some(kind) => value.coerce(kind),
                        None => value,
                    };
                    self.pop_frame();
                    self.operands.push(value);
                }
                Instr::ReturnVoid => self.pop_frame(),
            }
        }
    }

    fn eval_dynamic(&mut self, args: &[Value]) -> Result<Value, VmError> {
        let host = self.host.clone().ok_or(VmError::NoHost)?;
        let handle = args.first().map(Value::as_bits).unwrap_or(0);
        let template = self.read_c_string(args.get(1).copied().unwrap_or(Value::Ptr(0)))?;
        let addrs: Vec<u64> = args.iter().skip(2).map(Value::as_bits).collect();
        tracing::debug!(template = %template, captured = addrs.len(), "dynamic evaluation");
        host.evaluate_dynamic(self, handle, &template, &addrs)
    }
}

fn string_address(strings: &[u64], idx: u32) -> Result<u64, VmError> {
    strings
        .get(idx as usize)
        .copied()
        .ok_or_else(|| VmError::Runtime(format!("string literal #{} is missing", idx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_compiler::compiler::lir::BinaryOp;

    fn function(
        name: &str,
        ret: Option<ScalarKind>,
        frame_slots: u32,
        code: Vec<Instr>,
    ) -> LirFunction {
        LirFunction { name: name.into(), params: Vec::new(), ret, frame_slots, code }
    }

    #[test]
    fn runs_arithmetic_and_returns() {
        let mut vm = Vm::new();
        let code = vec![
            Instr::PushInt(6),
            Instr::PushInt(7),
            Instr::Binary { op: BinaryOp::Mul, kind: ScalarKind::I32 },
            Instr::Return,
        ];
        let f = function("f", Some(ScalarKind::I32), 0, code);
        vm.link(LirModule { functions: vec![f], ..Default::default() }).unwrap();
        assert_eq!(vm.call("f", &[]).unwrap(), Some(Value::Int(42)));
    }

    #[test]
    fn globals_are_initialised_and_strings_interned() {
        let mut vm = Vm::new();
        let module = LirModule {
            globals: vec![
                LirGlobal { name: "n".into(), slots: 1, init: vec![(0, LirConst::Int(5))] },
                LirGlobal { name: "s".into(), slots: 1, init: vec![(0, LirConst::Str(0))] },
            ],
            strings: vec!["hi".into()],
            ..Default::default()
        };
        vm.link(module).unwrap();
        let n = vm.global_address("n").unwrap();
        assert_eq!(vm.read(n).unwrap(), Value::Int(5));
        let s = vm.read(vm.global_address("s").unwrap()).unwrap();
        assert_eq!(vm.read_c_string(s).unwrap(), "hi");
    }

    #[test]
    fn duplicate_functions_are_rejected() {
        let mut vm = Vm::new();
        let f = function("f", None, 0, vec![Instr::ReturnVoid]);
        vm.link(LirModule { functions: vec![f.clone()], ..Default::default() }).unwrap();
        let err = vm.link(LirModule { functions: vec![f], ..Default::default() }).unwrap_err();
        assert!(matches!(err, VmError::DuplicateFunction(name) if name == "f"));
    }

    #[test]
    fn null_dereference_is_reported_and_state_recovers() {
        let mut vm = Vm::new();
        let null_load = vec![Instr::PushPtr(0), Instr::Load(ScalarKind::I32), Instr::Return];
        let bad = function("bad", Some(ScalarKind::I32), 0, null_load);
        let good =
            function("good", Some(ScalarKind::I32), 0, vec![Instr::PushInt(1), Instr::Return]);
        vm.link(LirModule { functions: vec![bad, good], ..Default::default() }).unwrap();
        let err = vm.call("bad", &[]).unwrap_err();
        assert_eq!(err.message(), "null pointer dereference");
        assert_eq!(err.stack_frames()[0].function, "bad");
        assert_eq!(vm.call("good", &[]).unwrap(), Some(Value::Int(1)));
    }

    #[test]
    fn runaway_recursion_overflows() {
        let mut vm = Vm::new();
        let code =
            vec![Instr::Call { name: "loop_forever".into(), argc: 0 }, Instr::ReturnVoid];
        let f = function("loop_forever", None, 0, code);
        vm.link(LirModule { functions: vec![f], ..Default::default() }).unwrap();
        vm.set_max_call_depth(16);
        let err = vm.call("loop_forever", &[]).unwrap_err();
        assert_eq!(err.message(), "stack overflow: call depth exceeded 16");
    }

    #[test]
    fn instruction_limit_stops_infinite_loops() {
        let mut vm = Vm::new();
        vm.set_instruction_limit(1000);
        let f = function("spin", None, 0, vec![Instr::Jump(0)]);
        vm.link(LirModule { functions: vec![f], ..Default::default() }).unwrap();
        assert_eq!(vm.call("spin", &[]).unwrap_err().message(), "instruction limit exceeded: 1000");
    }

    #[test]
    fn oversized_globals_are_rejected_before_linking() {
        let mut vm = Vm::new();
        vm.set_global_memory_limit(64);
        let global = |name: &str, slots| LirGlobal { name: name.into(), slots, init: Vec::new() };
        let oversized =
            LirModule { globals: vec![global("big", 2_000_000_000)], ..Default::default() };
        let err = vm.link(oversized).unwrap_err();
        assert!(matches!(
            err,
            VmError::GlobalMemoryExhausted { requested: 2_000_000_000, limit: 64 }
        ));
        assert!(vm.global_names.is_empty());

        vm.link(LirModule { globals: vec![global("small", 8)], ..Default::default() }).unwrap();
        assert_eq!(vm.global_names["small"].slots, 8);
    }

    #[test]
    fn eval_without_host_fails() {
        let mut vm = Vm::new();
        let code = vec![
            Instr::PushPtr(0),
            Instr::PushStr(0),
            Instr::Builtin { builtin: Builtin::Eval, argc: 2 },
            Instr::Return,
        ];
        let module = LirModule {
            functions: vec![function("dyn", Some(ScalarKind::Dyn), 0, code)],
            strings: vec!["x".into()],
            ..Default::default()
        };
        vm.link(module).unwrap();
        assert_eq!(
            vm.call("dyn", &[]).unwrap_err().message(),
            "no runtime host is installed for dynamic evaluation"
        );
    }
}
