//! Statement execution

use phpeval_core::ast::{Expr, Stmt};
use phpeval_core::value::Value;
use phpeval_core::{Runtime, RuntimeError};

use super::Evaluate;
use crate::semantics;

/// How a statement completed
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Normal,
    /// `break n`, counting the loops still to leave
    Break(u32),
    Continue(u32),
    Return(Value),
}

/// What a loop does after its body completed with a given flow
enum Next {
    Iterate,
    Exit,
    Propagate(Flow),
}

fn after_body(flow: Flow) -> Next {
    match flow {
        Flow::Normal | Flow::Continue(0..=1) => Next::Iterate,
        Flow::Break(0..=1) => Next::Exit,
        Flow::Break(n) => Next::Propagate(Flow::Break(n - 1)),
        Flow::Continue(n) => Next::Propagate(Flow::Continue(n - 1)),
        Flow::Return(value) => Next::Propagate(Flow::Return(value)),
    }
}

pub fn exec_block(stmts: &[Stmt], rt: &mut dyn Runtime) -> Result<Flow, RuntimeError> {
    for stmt in stmts {
        let flow = exec_stmt(stmt, rt)?;
        if flow != Flow::Normal {
            return Ok(flow);
        }
    }
    Ok(Flow::Normal)
}

fn exec_stmt(stmt: &Stmt, rt: &mut dyn Runtime) -> Result<Flow, RuntimeError> {
    match stmt {
        Stmt::Expr(e) => {
            e.eval_value(rt)?;
        }
        Stmt::Echo(exprs) => {
            for e in exprs {
                let text = e.eval_string(rt)?;
                rt.echo(&text);
            }
        }
        Stmt::Block(stmts) => return exec_block(stmts, rt),
        Stmt::If {
            test,
            then,
            otherwise,
        } => {
            return if test.eval_bool(rt)? {
                exec_block(then, rt)
            } else {
                exec_block(otherwise, rt)
            };
        }
        Stmt::While { test, body } => {
            while test.eval_bool(rt)? {
                match after_body(exec_block(body, rt)?) {
                    Next::Iterate => {}
                    Next::Exit => break,
                    Next::Propagate(flow) => return Ok(flow),
                }
            }
        }
        Stmt::DoWhile { body, test } => loop {
            match after_body(exec_block(body, rt)?) {
                Next::Iterate => {}
                Next::Exit => break,
                Next::Propagate(flow) => return Ok(flow),
            }
            if !test.eval_bool(rt)? {
                break;
            }
        },
        Stmt::For {
            init,
            test,
            step,
            body,
        } => {
            for e in init {
                e.eval_value(rt)?;
            }
            loop {
                if !for_test(test, rt)? {
                    break;
                }
                match after_body(exec_block(body, rt)?) {
                    Next::Iterate => {}
                    Next::Exit => break,
                    Next::Propagate(flow) => return Ok(flow),
                }
                for e in step {
                    e.eval_value(rt)?;
                }
            }
        }
        Stmt::Foreach {
            subject,
            key,
            value,
            by_ref,
            body,
        } => {
            return if *by_ref {
                foreach_ref(subject, key.as_ref(), value, body, rt)
            } else {
                foreach_value(subject, key.as_ref(), value, body, rt)
            };
        }
        Stmt::Break { depth } => return Ok(Flow::Break((*depth).max(1))),
        Stmt::Continue { depth } => return Ok(Flow::Continue((*depth).max(1))),
        Stmt::Return(value) => {
            let value = match value {
                Some(e) => e.eval_value(rt)?,
                None => Value::Null,
            };
            return Ok(Flow::Return(value));
        }
        Stmt::Unset(targets) => {
            for target in targets {
                target.unset(rt)?;
            }
        }
        Stmt::Global(names) => {
            for name in names {
                let cell = rt.global_cell(name);
                rt.bind_alias(name, cell);
            }
        }
    }
    Ok(Flow::Normal)
}

/// All `for` tests run; the last one decides
fn for_test(tests: &[Expr], rt: &mut dyn Runtime) -> Result<bool, RuntimeError> {
    let Some((last, rest)) = tests.split_last() else {
        return Ok(true);
    };
    for e in rest {
        e.eval_value(rt)?;
    }
    last.eval_bool(rt)
}

fn foreach_value(
    subject: &Expr,
    key: Option<&Expr>,
    value: &Expr,
    body: &[Stmt],
    rt: &mut dyn Runtime,
) -> Result<Flow, RuntimeError> {
    let iterated = subject.eval_value(rt)?;
    let items = semantics::iteration_items(rt, &iterated, subject.line)?;
    for (k, v) in items {
        value.assign(rt, v)?;
        if let Some(key) = key {
            key.assign(rt, k)?;
        }
        match after_body(exec_block(body, rt)?) {
            Next::Iterate => {}
            Next::Exit => break,
            Next::Propagate(flow) => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

fn foreach_ref(
    subject: &Expr,
    key: Option<&Expr>,
    value: &Expr,
    body: &[Stmt],
    rt: &mut dyn Runtime,
) -> Result<Flow, RuntimeError> {
    let cell = subject.eval_ref(rt)?;
    let keys = semantics::iteration_keys(rt, &cell, subject.line)?;
    for k in keys {
        let Some(element) = semantics::element_ref(&cell, &k) else {
            continue;
        };
        value.assign_ref(rt, element)?;
        if let Some(key) = key {
            key.assign(rt, k.to_value())?;
        }
        match after_body(exec_block(body, rt)?) {
            Next::Iterate => {}
            Next::Exit => break,
            Next::Propagate(flow) => return Ok(flow),
        }
    }
    Ok(Flow::Normal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use phpeval_core::{Env, ExprFactory};

    #[test]
    fn test_nested_break_leaves_both_loops() {
        // while (true) { while (true) { $n++; break 2; } $n = 100; }
        let mut f = ExprFactory::new();
        let mut env = Env::new();
        let n = f.var("n");
        let zero = f.long(0);
        exec_block(&[Stmt::Expr(f.assign(n, zero))], &mut env).unwrap();

        let n = f.var("n");
        let inner = Stmt::While {
            test: f.bool(true),
            body: vec![Stmt::Expr(f.post_inc(n)), Stmt::Break { depth: 2 }],
        };
        let n = f.var("n");
        let hundred = f.long(100);
        let outer = Stmt::While {
            test: f.bool(true),
            body: vec![inner, Stmt::Expr(f.assign(n, hundred))],
        };
        assert_eq!(exec_block(&[outer], &mut env).unwrap(), Flow::Normal);
        assert_eq!(env.global_value("n"), Some(Value::Long(1)));
    }

    #[test]
    fn test_foreach_by_value_iterates_snapshot() {
        // foreach ($a as $v) { $a[] = $v; }
        let mut f = ExprFactory::new();
        let mut env = Env::new();
        let one = f.long(1);
        let two = f.long(2);
        let literal = f.list_array(vec![one, two]);
        let a = f.var("a");
        let init = Stmt::Expr(f.assign(a, literal));

        let a = f.var("a");
        let tail = f.array_tail(a);
        let v = f.var("v");
        let push = Stmt::Expr(f.assign(tail, v));
        let foreach = Stmt::Foreach {
            subject: f.var("a"),
            key: None,
            value: f.var("v"),
            by_ref: false,
            body: vec![push],
        };
        exec_block(&[init, foreach], &mut env).unwrap();
        let a = env.global_value("a").unwrap();
        assert_eq!(a.as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_foreach_by_reference_writes_elements() {
        // foreach ($a as $k => &$v) { $v = $v * 10; }
        let mut f = ExprFactory::new();
        let mut env = Env::new();
        let one = f.long(1);
        let two = f.long(2);
        let literal = f.list_array(vec![one, two]);
        let a = f.var("a");
        let init = Stmt::Expr(f.assign(a, literal));

        let v = f.var("v");
        let ten = f.long(10);
        let product = f.mul(v, ten);
        let v = f.var("v");
        let foreach = Stmt::Foreach {
            subject: f.var("a"),
            key: Some(f.var("k")),
            value: f.var("v"),
            by_ref: true,
            body: vec![Stmt::Expr(f.assign(v, product))],
        };
        exec_block(&[init, foreach], &mut env).unwrap();

        let a = env.global_value("a").unwrap();
        assert_eq!(a.as_array().unwrap().values(), vec![Value::Long(10), Value::Long(20)]);
        assert_eq!(env.global_value("k"), Some(Value::Long(1)));
    }

    #[test]
    fn test_return_stops_the_block() {
        let mut f = ExprFactory::new();
        let mut env = Env::new();
        let stmts = vec![
            Stmt::Return(Some(f.long(3))),
            Stmt::Echo(vec![f.string("unreachable")]),
        ];
        assert_eq!(exec_block(&stmts, &mut env).unwrap(), Flow::Return(Value::Long(3)));
        assert_eq!(env.output(), "");
    }

    #[test]
    fn test_for_loop_with_continue() {
        // for ($i = 0; $i < 4; $i++) { if ($i < 2) continue; echo $i; }
        let mut f = ExprFactory::new();
        let mut env = Env::new();
        let i = f.var("i");
        let zero = f.long(0);
        let init = f.assign(i, zero);
        let i = f.var("i");
        let four = f.long(4);
        let test = f.lt(i, four);
        let i = f.var("i");
        let step = f.post_inc(i);
        let i = f.var("i");
        let two = f.long(2);
        let skip = f.lt(i, two);
        let body = vec![
            Stmt::If {
                test: skip,
                then: vec![Stmt::Continue { depth: 1 }],
                otherwise: vec![],
            },
            Stmt::Echo(vec![f.var("i")]),
        ];
        let stmt = Stmt::For {
            init: vec![init],
            test: vec![test],
            step: vec![step],
            body,
        };
        exec_block(&[stmt], &mut env).unwrap();
        assert_eq!(env.output(), "23");
    }
}
