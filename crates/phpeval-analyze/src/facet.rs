//! Type facets: the statically inferred value category of an expression
//!
//! A facet is either one of the four primitive categories or `Value`, the top
//! element, which says nothing about the runtime type. Code generation may
//! only take a typed path for a node whose facet is primitive.

use phpeval_core::ast::{BinaryOp, CastKind, Literal, UnaryOp};
use serde::Serialize;

/// Inferred value category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TypeFacet {
    Long,
    Double,
    Boolean,
    String,
    Value,
}

impl TypeFacet {
    /// Least upper bound; distinct facets join to `Value`
    pub fn join(self, other: TypeFacet) -> TypeFacet {
        if self == other {
            self
        } else {
            TypeFacet::Value
        }
    }

    pub fn is_primitive(self) -> bool {
        self != TypeFacet::Value
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, TypeFacet::Long | TypeFacet::Double)
    }

    pub fn of_literal(literal: &Literal) -> TypeFacet {
        match literal {
            Literal::Null => TypeFacet::Value,
            Literal::Bool(_) => TypeFacet::Boolean,
            Literal::Long(_) => TypeFacet::Long,
            Literal::Double(_) => TypeFacet::Double,
            Literal::String(_) | Literal::Binary(_) => TypeFacet::String,
        }
    }

    pub fn of_cast(kind: CastKind) -> TypeFacet {
        match kind {
            CastKind::Long => TypeFacet::Long,
            CastKind::Double => TypeFacet::Double,
            CastKind::Bool => TypeFacet::Boolean,
            CastKind::String | CastKind::Binary => TypeFacet::String,
            CastKind::Array | CastKind::Object | CastKind::Unset => TypeFacet::Value,
        }
    }

    /// Facet of `+`, `-` and `*`
    ///
    /// Long operands give `Value`: an overflowing result is a double.
    pub fn arithmetic(left: TypeFacet, right: TypeFacet) -> TypeFacet {
        match (left, right) {
            (TypeFacet::Long, TypeFacet::Long) => TypeFacet::Value,
            (l, r) if l.is_numeric() && r.is_numeric() => TypeFacet::Double,
            _ => TypeFacet::Value,
        }
    }

    /// Facet of a binary operation given its operand facets
    pub fn binary(op: BinaryOp, left: TypeFacet, right: TypeFacet) -> TypeFacet {
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => Self::arithmetic(left, right),
            BinaryOp::Div | BinaryOp::Pow => TypeFacet::Value,
            BinaryOp::Mod | BinaryOp::Shl | BinaryOp::Shr => TypeFacet::Long,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                // string & string works bytewise and yields a string
                if may_be_string(left) || may_be_string(right) {
                    TypeFacet::Value
                } else {
                    TypeFacet::Long
                }
            }
            BinaryOp::Concat => TypeFacet::String,
            BinaryOp::Spaceship => TypeFacet::Long,
            BinaryOp::Coalesce => left.join(right),
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Identical
            | BinaryOp::NotIdentical
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Xor => TypeFacet::Boolean,
        }
    }

    pub fn unary(op: UnaryOp, operand: TypeFacet) -> TypeFacet {
        match op {
            UnaryOp::Not => TypeFacet::Boolean,
            // -PHP_INT_MIN is a double
            UnaryOp::Neg => match operand {
                TypeFacet::Double => TypeFacet::Double,
                _ => TypeFacet::Value,
            },
            UnaryOp::Plus => match operand {
                TypeFacet::Long => TypeFacet::Long,
                TypeFacet::Double => TypeFacet::Double,
                _ => TypeFacet::Value,
            },
            UnaryOp::BitNot => match operand {
                TypeFacet::Long | TypeFacet::Double => TypeFacet::Long,
                _ => TypeFacet::Value,
            },
        }
    }

    /// Facet of `++`/`--` applied to an operand of facet `self`
    ///
    /// Stepping a long past either end yields a double.
    pub fn stepped(self) -> TypeFacet {
        match self {
            TypeFacet::Double => TypeFacet::Double,
            _ => TypeFacet::Value,
        }
    }
}

fn may_be_string(facet: TypeFacet) -> bool {
    matches!(facet, TypeFacet::String | TypeFacet::Value)
}

impl std::fmt::Display for TypeFacet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TypeFacet::Long => "long",
            TypeFacet::Double => "double",
            TypeFacet::Boolean => "boolean",
            TypeFacet::String => "string",
            TypeFacet::Value => "value",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(TypeFacet::Long.join(TypeFacet::Long), TypeFacet::Long);
        assert_eq!(TypeFacet::Long.join(TypeFacet::Double), TypeFacet::Value);
        assert_eq!(TypeFacet::Value.join(TypeFacet::String), TypeFacet::Value);
    }

    #[test]
    fn test_arithmetic_facets() {
        use TypeFacet::*;
        assert_eq!(TypeFacet::binary(BinaryOp::Add, Long, Long), Value);
        assert_eq!(TypeFacet::binary(BinaryOp::Mul, Long, Long), Value);
        assert_eq!(TypeFacet::binary(BinaryOp::Mul, Long, Double), Double);
        assert_eq!(TypeFacet::binary(BinaryOp::Sub, Double, Double), Double);
        assert_eq!(TypeFacet::binary(BinaryOp::Add, String, Long), Value);
        assert_eq!(TypeFacet::binary(BinaryOp::Div, Long, Long), Value);
        assert_eq!(TypeFacet::binary(BinaryOp::Pow, Long, Long), Value);
        assert_eq!(TypeFacet::binary(BinaryOp::Mod, String, Value), Long);
    }

    #[test]
    fn test_bitwise_facets() {
        use TypeFacet::*;
        assert_eq!(TypeFacet::binary(BinaryOp::BitAnd, Long, Boolean), Long);
        assert_eq!(TypeFacet::binary(BinaryOp::BitOr, Long, String), Value);
        assert_eq!(TypeFacet::binary(BinaryOp::BitXor, Value, Long), Value);
    }

    #[test]
    fn test_boolean_facets() {
        use TypeFacet::*;
        for op in [BinaryOp::Lt, BinaryOp::Identical, BinaryOp::And, BinaryOp::Xor] {
            assert_eq!(TypeFacet::binary(op, Value, Value), Boolean);
        }
        assert_eq!(TypeFacet::unary(UnaryOp::Not, Value), Boolean);
        assert_eq!(TypeFacet::binary(BinaryOp::Concat, Long, Long), String);
    }

    #[test]
    fn test_overflowing_long_operations_are_not_long() {
        use TypeFacet::*;
        assert_eq!(TypeFacet::unary(UnaryOp::Neg, Long), Value);
        assert_eq!(TypeFacet::unary(UnaryOp::Neg, Double), Double);
        assert_eq!(TypeFacet::unary(UnaryOp::Plus, Long), Long);
        assert_eq!(Long.stepped(), Value);
        assert_eq!(Double.stepped(), Double);
        assert_eq!(TypeFacet::binary(BinaryOp::Mod, Long, Long), Long);
        assert_eq!(TypeFacet::binary(BinaryOp::Shl, Long, Long), Long);
    }

    #[test]
    fn test_casts() {
        assert_eq!(TypeFacet::of_cast(CastKind::Binary), TypeFacet::String);
        assert_eq!(TypeFacet::of_cast(CastKind::Array), TypeFacet::Value);
        assert_eq!(TypeFacet::of_literal(&Literal::Null), TypeFacet::Value);
    }
}
