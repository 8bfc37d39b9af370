use phpeval_core::ast::FunctionDef;
use phpeval_core::value::Value;
use phpeval_core::{Arg, Callable, Runtime, RuntimeError};

use super::stmt::{exec_block, Flow};
use crate::semantics;

/// A user function run by walking its body
#[derive(Debug, Clone)]
pub struct InterpretedFunction {
    def: FunctionDef,
}

impl InterpretedFunction {
    pub fn new(def: FunctionDef) -> Self {
        Self { def }
    }

    pub fn def(&self) -> &FunctionDef {
        &self.def
    }

    fn bind_params(&self, rt: &mut dyn Runtime, args: Vec<Arg>) -> Result<(), RuntimeError> {
        let params = &self.def.params;
        let passed = args.len();
        let required = params
            .iter()
            .rposition(|p| p.default.is_none())
            .map_or(0, |i| i + 1);
        let mut args = args.into_iter();
        for param in params {
            match args.next() {
                Some(arg) if param.by_ref => rt.bind_alias(&param.name, arg.into_cell()),
                Some(arg) => rt.set_value(&param.name, arg.value().copy()),
                None => {
                    let value = semantics::missing_argument(
                        rt,
                        &self.def.name,
                        param.default.as_ref(),
                        required,
                        passed,
                        params.len(),
                    )?;
                    rt.set_value(&param.name, value);
                }
            }
        }
        Ok(())
    }
}

impl Callable for InterpretedFunction {
    fn name(&self) -> &str {
        &self.def.name
    }

    fn param_by_ref(&self, index: usize) -> bool {
        self.def.params.get(index).is_some_and(|p| p.by_ref)
    }

    fn call(
        &self,
        rt: &mut dyn Runtime,
        this: Option<Value>,
        args: Vec<Arg>,
    ) -> Result<Value, RuntimeError> {
        rt.push_frame(this)?;
        let result = self
            .bind_params(rt, args)
            .and_then(|()| exec_block(&self.def.body, rt));
        rt.pop_frame();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Null),
        }
    }
}
