//! Execution driver: links compiled fragments into the VM and runs them.

use cinder_compiler::compiler::lir::LirModule;

use crate::error::CinderError;
use crate::translation::{DeclRecord, TranslationState};
use crate::values::Value;
use crate::vm::{Vm, VmError};

/// Output of the code generator for one input.
#[derive(Debug, Clone, Default)]
pub struct CompiledFragment {
    pub module: LirModule,
    /// Top-level declarations the input contributes.
    pub decls: Vec<DeclRecord>,
    /// Wrapper function to call, if the input produced one.
    pub entry: Option<String>,
}

pub struct ExecutionDriver<'a> {
    vm: &'a mut Vm,
    translation: &'a mut TranslationState,
}

impl<'a> ExecutionDriver<'a> {
    pub fn new(vm: &'a mut Vm, translation: &'a mut TranslationState) -> Self {
        Self { vm, translation }
    }

    /// Links `fragment`, commits its declarations and runs the dynamic
    /// initializers of its globals. Returns the entry to execute.
    pub fn run(&mut self, fragment: CompiledFragment) -> Result<Option<String>, CinderError> {
        let CompiledFragment { module, decls, entry } = fragment;
        let initializers = self.vm.link(module).map_err(|err| match err {
            VmError::DuplicateFunction(name) => {
                tracing::error!(symbol = %name, "function symbol defined twice");
                CinderError::Internal(format!("symbol collision: '{}' is already defined", name))
            }
            other => CinderError::from(other),
        })?;
        let added = decls.len();
        self.translation.commit(decls);
        tracing::debug!(declarations = added, initializers = initializers.len(), "fragment linked");

        for init in &initializers {
            let result = self.vm.call(init, &[]);
            self.vm.remove_function(init);
            result?;
        }
        Ok(entry)
    }

    /// Calls `entry`. An entry the fragment never defined is a no-op.
    pub fn execute(&mut self, entry: &str) -> Result<Option<Value>, CinderError> {
        if !self.vm.has_function(entry) {
            tracing::debug!(entry, "no entry point to execute");
            return Ok(None);
        }
        tracing::trace!(entry, "executing");
        Ok(self.vm.call(entry, &[])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::DeclCategory;
    use cinder_compiler::compile;

    fn fragment(src: &str, entry: Option<&str>) -> CompiledFragment {
        let decls = vec![DeclRecord {
            name: "g".into(),
            category: DeclCategory::Variable,
            text: src.into(),
            fragment: "input_line_0".into(),
        }];
        CompiledFragment { module: compile(src).unwrap(), decls, entry: entry.map(String::from) }
    }

    #[test]
    fn run_commits_and_initialises() {
        let (mut vm, mut translation) = (Vm::new(), TranslationState::new());
        let mut driver = ExecutionDriver::new(&mut vm, &mut translation);
        let source = "int seed() { return 41; } int g = seed() + 1;";
        let entry = driver.run(fragment(source, None)).unwrap();
        assert_eq!(entry, None);
        assert_eq!(translation.last().map(|d| d.name.as_str()), Some("g"));
        let addr = vm.global_address("g").unwrap();
        assert_eq!(vm.read(addr).unwrap(), Value::Int(42));
    }

    #[test]
    fn missing_entry_is_a_no_op() {
        let (mut vm, mut translation) = (Vm::new(), TranslationState::new());
        let mut driver = ExecutionDriver::new(&mut vm, &mut translation);
        assert_eq!(driver.execute("__cinder_input_line_9").unwrap(), None);
    }

    #[test]
    fn redefined_functions_are_internal_errors() {
        let (mut vm, mut translation) = (Vm::new(), TranslationState::new());
        let mut driver = ExecutionDriver::new(&mut vm, &mut translation);
        driver.run(fragment("void f() {}", Some("f"))).unwrap();
        let err = driver.run(fragment("void f() {}", Some("f"))).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(translation.len(), 1);
    }
}
