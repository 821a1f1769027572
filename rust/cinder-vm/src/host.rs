//! Runtime side of dynamic name lookup.
//!
//! Code compiled with unresolved names calls `__cinder_eval(gCinder,
//! template, &captured...)`. The session host substitutes the captured
//! addresses into the template, compiles it as a throwaway function with
//! host-provided bindings in scope, runs it on the calling VM and returns its
//! value.

use std::rc::{Rc, Weak};

use cinder_compiler::compiler::dynamic_lookup::{Recovery, UnresolvedNameHandler};
use cinder_compiler::compiler::incremental::CodegenConsumer;
use cinder_compiler::compiler::sema::Constant;
use cinder_compiler::compiler::tokens::Span;
use cinder_compiler::compiler::types::CType;
use parking_lot::ReentrantMutex;

use crate::session::SessionCore;
use crate::values::Value;
use crate::vm::{RuntimeHost, Vm, VmError};

/// A value the embedding application binds to a name at run time.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Long(i64),
    Double(f64),
    Bool(bool),
    Str(String),
    Ptr(u64),
}

impl HostValue {
    fn binding(self) -> Recovery {
        let (ty, value) = match self {
            HostValue::Long(v) => (CType::LONG, Constant::Int(v)),
            HostValue::Double(v) => (CType::Double, Constant::Float(v)),
            HostValue::Bool(v) => (CType::Bool, Constant::Bool(v)),
            HostValue::Str(s) => (CType::char_ptr(), Constant::Str(s)),
            HostValue::Ptr(p) => (CType::void_ptr(), Constant::Ptr(p)),
        };
        Recovery::Bind { ty, value }
    }
}

/// Hooks the embedding application can install on a session.
pub trait InterpreterCallbacks {
    /// Resolves a name the compiled code does not know.
    fn lookup_object(&self, _name: &str) -> Option<HostValue> {
        None
    }

    /// Observes each runtime evaluation before it is compiled.
    fn on_dynamic_eval(&self, _template: &str, _addrs: &[u64]) {}
}

/// Resolves names through the installed callbacks only.
struct HostBindingHandler {
    callbacks: Option<Rc<dyn InterpreterCallbacks>>,
}

impl UnresolvedNameHandler for HostBindingHandler {
    fn lookup_unqualified(&mut self, name: &str, _span: Span) -> Option<Recovery> {
        let value = self.callbacks.as_ref()?.lookup_object(name)?;
        tracing::debug!(name, "bound host value");
        Some(value.binding())
    }
}

pub(crate) struct SessionHost {
    core: Weak<ReentrantMutex<SessionCore>>,
    handle: u64,
}

impl SessionHost {
    pub(crate) fn new(core: Weak<ReentrantMutex<SessionCore>>, handle: u64) -> Self {
        Self { core, handle }
    }
}

impl RuntimeHost for SessionHost {
    fn evaluate_dynamic(
        &self,
        vm: &mut Vm,
        handle: u64,
        template: &str,
        addrs: &[u64],
    ) -> Result<Value, VmError> {
        if handle != self.handle {
            return Err(VmError::Runtime(format!("unknown session handle 0x{:x}", handle)));
        }
        let core =
            self.core.upgrade().ok_or_else(|| VmError::Runtime("session was dropped".into()))?;
        let core = core.lock();

        let callbacks = core.callbacks();
        if let Some(cb) = &callbacks {
            cb.on_dynamic_eval(template, addrs);
        }
        let expr = substitute(template, addrs)?;
        let name = format!("__cinder_dyn_{}", core.next_dynamic_id());
        let source = format!("void {}() {{ __cinder_set_result({}); }}", name, expr);
        tracing::debug!(source = %source, "compiling runtime evaluation");

        let module = {
            let mut parser = core
                .parser
                .try_borrow_mut()
                .map_err(|_| {
                    VmError::Runtime("runtime evaluation while the parser is busy".into())
                })?;
            let mut consumer = CodegenConsumer::new();
            let handler = HostBindingHandler { callbacks };
            let parsed = parser.with_handler(Some(Box::new(handler)), |p| {
                p.with_suppressed_diagnostics(|p| p.parse(&source, &mut consumer))
            });
            parser.rollback();
            if let Err(failure) = parsed {
                tracing::warn!(template, error = %failure, "runtime evaluation failed to resolve");
                return Err(VmError::Unresolved(failure.to_string()));
            }
            consumer.into_module()
        };

        let results_before = vm.dynamic_results.len();
        let initializers = vm.link(module)?;
        let mut outcome = Ok(None);
        for init in initializers.iter().chain(std::iter::once(&name)) {
            outcome = vm.call(init, &[]);
            if outcome.is_err() {
                break;
            }
        }
        for init in &initializers {
            vm.remove_function(init);
        }
        vm.remove_function(&name);
        outcome?;

        let value = if vm.dynamic_results.len() > results_before {
            vm.dynamic_results.pop()
        } else {
            None
        };
        Ok(value.unwrap_or_default())
    }
}

/// Replaces each `@` outside literals with the next address.
fn substitute(template: &str, addrs: &[u64]) -> Result<String, VmError> {
    let mut out = String::with_capacity(template.len() + addrs.len() * 18);
    let mut next = addrs.iter();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in template.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                out.push(c);
            }
            None if c == '@' => {
                let addr = next.next().ok_or_else(|| {
                    VmError::Runtime(format!(
                        "template '{}' has more captures than addresses",
                        template
                    ))
                })?;
                out.push_str(&format!("0x{:x}", addr));
            }
            None => out.push(c),
        }
    }
    if next.next().is_some() {
        let message = format!("template '{}' has fewer captures than addresses", template);
        return Err(VmError::Runtime(message));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_replace_placeholders_in_order() {
        let out = substitute("(*(int *)@) + (*(long *)@)", &[0x10, 0x2f]).unwrap();
        assert_eq!(out, "(*(int *)0x10) + (*(long *)0x2f)");
    }

    #[test]
    fn placeholders_inside_literals_are_kept() {
        let out = substitute("printf(\"@%d\", (*(int *)@))", &[7]).unwrap();
        assert_eq!(out, "printf(\"@%d\", (*(int *)0x7))");
    }

    #[test]
    fn capture_count_must_match() {
        assert!(substitute("@ + @", &[1]).is_err());
        assert!(substitute("x", &[1]).is_err());
    }

    #[test]
    fn host_values_bind_with_their_c_type() {
        assert_eq!(
            HostValue::Long(3).binding(),
            Recovery::Bind { ty: CType::LONG, value: Constant::Int(3) }
        );
        assert!(matches!(
            HostValue::Str("s".into()).binding(),
            Recovery::Bind { ty, .. } if ty == CType::char_ptr()
        ));
    }
}
