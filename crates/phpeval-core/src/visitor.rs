//! Read-only traversal of statement and expression trees
//!
//! Default implementations traverse child nodes. Override specific methods
//! to perform actions at those nodes.

use crate::ast::{Expr, ExprKind, FunctionDef, Program, Stmt};

/// Trait for visiting nodes
pub trait Visitor<'a> {
    /// Called for each expression. Return `true` to continue traversal into children.
    fn visit_expr(&mut self, _expr: &'a Expr) -> bool {
        true
    }

    /// Called for each statement. Return `true` to continue traversal into children.
    fn visit_stmt(&mut self, _stmt: &'a Stmt) -> bool {
        true
    }

    /// Visit a whole program, functions first
    fn visit_program(&mut self, program: &'a Program) {
        for function in &program.functions {
            self.visit_function(function);
        }
        self.traverse_block(&program.main);
    }

    fn visit_function(&mut self, function: &'a FunctionDef) {
        self.traverse_block(&function.body);
    }

    fn traverse_block(&mut self, stmts: &'a [Stmt]) {
        for stmt in stmts {
            self.traverse_stmt(stmt);
        }
    }

    /// Traverse a statement and its children
    fn traverse_stmt(&mut self, stmt: &'a Stmt) {
        if !self.visit_stmt(stmt) {
            return;
        }

        for expr in stmt.exprs() {
            self.traverse_expr(expr);
        }
        for body in stmt.bodies() {
            self.traverse_block(body);
        }
    }

    /// Traverse an expression and its children
    fn traverse_expr(&mut self, expr: &'a Expr) {
        if !self.visit_expr(expr) {
            return;
        }

        for child in expr.children() {
            self.traverse_expr(child);
        }
    }
}

/// Convenience function to visit a program
pub fn visit<'a, V: Visitor<'a>>(visitor: &mut V, program: &'a Program) {
    visitor.visit_program(program);
}

/// Collects the names of functions called by name
#[derive(Debug, Default)]
pub struct CallCollector<'a> {
    pub calls: Vec<&'a str>,
}

impl<'a> Visitor<'a> for CallCollector<'a> {
    fn visit_expr(&mut self, expr: &'a Expr) -> bool {
        if let ExprKind::Call { name, .. } = &expr.kind {
            if !self.calls.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                self.calls.push(name);
            }
        }
        true
    }
}

/// Counts expression nodes
#[derive(Debug, Default)]
pub struct NodeCounter {
    pub exprs: usize,
    pub stmts: usize,
}

impl<'a> Visitor<'a> for NodeCounter {
    fn visit_expr(&mut self, _expr: &'a Expr) -> bool {
        self.exprs += 1;
        true
    }

    fn visit_stmt(&mut self, _stmt: &'a Stmt) -> bool {
        self.stmts += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ExprFactory;

    #[test]
    fn test_call_collector_dedupes_case_insensitively() {
        let mut f = ExprFactory::new();
        let one = f.call("foo", vec![]);
        let two = f.call("FOO", vec![]);
        let three = f.call("bar", vec![]);
        let sum = f.add(one, two);
        let function = FunctionDef::new(
            "main",
            vec![],
            vec![Stmt::Expr(sum), Stmt::Echo(vec![three])],
        );

        let mut collector = CallCollector::default();
        collector.visit_function(&function);
        assert_eq!(collector.calls, vec!["foo", "bar"]);
    }

    #[test]
    fn test_node_counter() {
        let mut f = ExprFactory::new();
        let a = f.var("a");
        let one = f.long(1);
        let assign = f.assign(a, one);
        let program = Program::new(vec![], vec![Stmt::Block(vec![Stmt::Expr(assign)])]);

        let mut counter = NodeCounter::default();
        visit(&mut counter, &program);
        assert_eq!(counter.exprs, 3);
        assert_eq!(counter.stmts, 2);
    }
}
