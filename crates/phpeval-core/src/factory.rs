//! Node construction with fresh ids

use crate::ast::{
    AppendChain, ArrayItem, BinaryOp, CastKind, Expr, ExprKind, ListHead, ListItem, Literal,
    NodeId, UnaryOp,
};

/// Builds expression nodes, numbering each one
///
/// Concatenations are folded as they are built, so `"a" . "b" . "c"` yields a
/// single-operand chain.
#[derive(Debug)]
pub struct ExprFactory {
    next: u32,
    line: u32,
}

impl Default for ExprFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprFactory {
    pub fn new() -> Self {
        Self { next: 1, line: 0 }
    }

    /// Continue numbering after ids already handed out
    pub fn starting_at(next: u32) -> Self {
        Self { next, line: 0 }
    }

    /// Line recorded on subsequently built nodes
    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    pub fn node(&mut self, kind: ExprKind) -> Expr {
        let id = NodeId(self.next);
        self.next += 1;
        Expr {
            id,
            line: self.line,
            kind,
        }
    }

    pub fn literal(&mut self, literal: Literal) -> Expr {
        self.node(ExprKind::Literal(literal))
    }

    pub fn null(&mut self) -> Expr {
        self.literal(Literal::Null)
    }

    pub fn bool(&mut self, value: bool) -> Expr {
        self.literal(Literal::Bool(value))
    }

    pub fn long(&mut self, value: i64) -> Expr {
        self.literal(Literal::Long(value))
    }

    pub fn double(&mut self, value: f64) -> Expr {
        self.literal(Literal::Double(value))
    }

    pub fn string(&mut self, value: &str) -> Expr {
        self.literal(Literal::String(value.to_string()))
    }

    pub fn binary_string(&mut self, value: &[u8]) -> Expr {
        self.literal(Literal::Binary(value.to_vec()))
    }

    pub fn var(&mut self, name: &str) -> Expr {
        self.node(ExprKind::Var(name.to_string()))
    }

    pub fn var_var(&mut self, name: Expr) -> Expr {
        self.node(ExprKind::VarVar(Box::new(name)))
    }

    pub fn this(&mut self) -> Expr {
        self.node(ExprKind::This)
    }

    pub fn binary(&mut self, op: BinaryOp, left: Expr, right: Expr) -> Expr {
        if op == BinaryOp::Concat {
            return self.concat(left, right);
        }
        self.node(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn add(&mut self, left: Expr, right: Expr) -> Expr {
        self.binary(BinaryOp::Add, left, right)
    }

    pub fn sub(&mut self, left: Expr, right: Expr) -> Expr {
        self.binary(BinaryOp::Sub, left, right)
    }

    pub fn mul(&mut self, left: Expr, right: Expr) -> Expr {
        self.binary(BinaryOp::Mul, left, right)
    }

    pub fn lt(&mut self, left: Expr, right: Expr) -> Expr {
        self.binary(BinaryOp::Lt, left, right)
    }

    pub fn and(&mut self, left: Expr, right: Expr) -> Expr {
        self.binary(BinaryOp::And, left, right)
    }

    pub fn or(&mut self, left: Expr, right: Expr) -> Expr {
        self.binary(BinaryOp::Or, left, right)
    }

    pub fn unary(&mut self, op: UnaryOp, expr: Expr) -> Expr {
        self.node(ExprKind::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    pub fn not(&mut self, expr: Expr) -> Expr {
        self.unary(UnaryOp::Not, expr)
    }

    /// `left . right`, extending `left` when it already is a chain
    pub fn concat(&mut self, left: Expr, right: Expr) -> Expr {
        match left.kind {
            ExprKind::Concat(mut chain) => {
                chain.push(right);
                Expr {
                    id: left.id,
                    line: left.line,
                    kind: ExprKind::Concat(chain),
                }
            }
            kind => {
                let head = Expr {
                    id: left.id,
                    line: left.line,
                    kind,
                };
                let chain = AppendChain::new().with(head).with(right);
                self.node(ExprKind::Concat(chain))
            }
        }
    }

    pub fn array(&mut self, items: Vec<ArrayItem>) -> Expr {
        self.node(ExprKind::ArrayLiteral(items))
    }

    /// Positional array literal `[a, b, ...]`
    pub fn list_array(&mut self, values: Vec<Expr>) -> Expr {
        let items = values
            .into_iter()
            .map(|value| ArrayItem {
                key: None,
                value,
                by_ref: false,
            })
            .collect();
        self.array(items)
    }

    pub fn array_get(&mut self, base: Expr, index: Expr) -> Expr {
        self.node(ExprKind::ArrayGet {
            base: Box::new(base),
            index: Box::new(index),
        })
    }

    pub fn array_tail(&mut self, base: Expr) -> Expr {
        self.node(ExprKind::ArrayTail {
            base: Box::new(base),
        })
    }

    pub fn field(&mut self, base: Expr, name: &str) -> Expr {
        self.node(ExprKind::FieldGet {
            base: Box::new(base),
            name: name.to_string(),
        })
    }

    pub fn method_call(&mut self, receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
        self.node(ExprKind::MethodCall {
            receiver: Box::new(receiver),
            name: name.to_string(),
            args,
        })
    }

    pub fn call(&mut self, name: &str, args: Vec<Expr>) -> Expr {
        self.node(ExprKind::Call {
            name: name.to_string(),
            args,
        })
    }

    pub fn assign(&mut self, target: Expr, value: Expr) -> Expr {
        self.node(ExprKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn assign_ref(&mut self, target: Expr, value: Expr) -> Expr {
        self.node(ExprKind::AssignRef {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn assign_op(&mut self, op: BinaryOp, target: Expr, value: Expr) -> Expr {
        self.node(ExprKind::AssignOp {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn conditional(&mut self, test: Expr, then: Expr, otherwise: Expr) -> Expr {
        self.node(ExprKind::Conditional {
            test: Box::new(test),
            then: Some(Box::new(then)),
            otherwise: Box::new(otherwise),
        })
    }

    /// `test ?: otherwise`
    pub fn short_conditional(&mut self, test: Expr, otherwise: Expr) -> Expr {
        self.node(ExprKind::Conditional {
            test: Box::new(test),
            then: None,
            otherwise: Box::new(otherwise),
        })
    }

    /// `list(a, b, ...) = value`; `None` skips a position
    pub fn list(&mut self, targets: Vec<Option<Expr>>, value: Expr) -> Expr {
        let head = ListHead {
            items: targets
                .into_iter()
                .map(|t| t.map(|target| ListItem { key: None, target }))
                .collect(),
        };
        self.node(ExprKind::List {
            head,
            value: Box::new(value),
        })
    }

    fn inc_dec(&mut self, target: Expr, increment: bool, prefix: bool) -> Expr {
        self.node(ExprKind::IncDec {
            target: Box::new(target),
            increment,
            prefix,
        })
    }

    pub fn pre_inc(&mut self, target: Expr) -> Expr {
        self.inc_dec(target, true, true)
    }

    pub fn post_inc(&mut self, target: Expr) -> Expr {
        self.inc_dec(target, true, false)
    }

    pub fn pre_dec(&mut self, target: Expr) -> Expr {
        self.inc_dec(target, false, true)
    }

    pub fn post_dec(&mut self, target: Expr) -> Expr {
        self.inc_dec(target, false, false)
    }

    pub fn suppress(&mut self, expr: Expr) -> Expr {
        self.node(ExprKind::Suppress(Box::new(expr)))
    }

    pub fn cast(&mut self, kind: CastKind, expr: Expr) -> Expr {
        self.node(ExprKind::Cast {
            kind,
            expr: Box::new(expr),
        })
    }

    pub fn isset(&mut self, exprs: Vec<Expr>) -> Expr {
        self.node(ExprKind::Isset(exprs))
    }

    pub fn empty(&mut self, expr: Expr) -> Expr {
        self.node(ExprKind::Empty(Box::new(expr)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_folds_adjacent_literals() {
        let mut f = ExprFactory::new();
        let a = f.string("a");
        let b = f.string("b");
        let ab = f.concat(a, b);
        let c = f.string("c");
        let abc = f.concat(ab, c);

        match &abc.kind {
            ExprKind::Concat(chain) => {
                assert_eq!(chain.len(), 1);
                assert_eq!(
                    chain.parts()[0].kind,
                    ExprKind::Literal(Literal::String("abc".to_string()))
                );
            }
            other => panic!("expected a chain, got {:?}", other),
        }
    }

    #[test]
    fn test_concat_keeps_variables_between_literals() {
        let mut f = ExprFactory::new();
        let a = f.string("a");
        let x = f.var("x");
        let ax = f.concat(a, x);
        let b = f.string("b");
        let axb = f.concat(ax, b);
        let c = f.string("c");
        let axbc = f.concat(axb, c);

        let ExprKind::Concat(chain) = &axbc.kind else {
            panic!("expected a chain");
        };
        assert_eq!(chain.len(), 3);
        assert_eq!(
            chain.parts()[2].kind,
            ExprKind::Literal(Literal::String("bc".to_string()))
        );
    }

    #[test]
    fn test_concat_never_merges_text_and_bytes() {
        let mut f = ExprFactory::new();
        let a = f.string("a");
        let b = f.binary_string(b"b");
        let ab = f.concat(a, b);

        let ExprKind::Concat(chain) = &ab.kind else {
            panic!("expected a chain");
        };
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_fresh_ids() {
        let mut f = ExprFactory::new();
        let a = f.var("a");
        let b = f.var("b");
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, NodeId(1));
    }
}
