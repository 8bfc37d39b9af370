//! Runtime values with PHP semantics
//!
//! Arrays are copy-on-write: copying a value shares the array until one side
//! mutates it through [`Value::array_mut`]. Objects are handles, so copying
//! an object value copies the handle. Mutable locations that several names
//! share are [`AliasCell`]s.

mod alias;
mod array;
mod object;
mod string;

pub use alias::AliasCell;
pub use array::{ArrayKey, Entry, EntryMut, PhpArray};
pub use object::{ObjectRef, PhpObject};
pub use string::{double_to_long, Number, PhpString};

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::ast::{BinaryOp, CastKind, Literal};
use crate::error::RuntimeError;

/// A PHP value
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Long(i64),
    Double(f64),
    String(PhpString),
    Array(Rc<PhpArray>),
    Object(ObjectRef),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(PhpString::from(s))
    }

    pub fn bytes(b: &[u8]) -> Self {
        Value::String(PhpString::from(b))
    }

    pub fn array(array: PhpArray) -> Self {
        Value::Array(Rc::new(array))
    }

    pub fn empty_array() -> Self {
        Value::array(PhpArray::new())
    }

    pub fn from_literal(literal: &Literal) -> Self {
        match literal {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Long(n) => Value::Long(*n),
            Literal::Double(d) => Value::Double(*d),
            Literal::String(s) => Value::string(s),
            Literal::Binary(b) => Value::bytes(b),
        }
    }

    /// Type name as reported by `gettype`-style diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Long(_) => "int",
            Value::Double(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `isset` semantics: anything but null
    pub fn is_set(&self) -> bool {
        !self.is_null()
    }

    /// Logical copy for assignment
    ///
    /// Arrays share storage until mutated; objects copy the handle.
    pub fn copy(&self) -> Value {
        self.clone()
    }

    pub fn as_array(&self) -> Option<&PhpArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Unique access to an array, separating it from other copies first
    pub fn array_mut(&mut self) -> Option<&mut PhpArray> {
        match self {
            Value::Array(a) => Some(Rc::make_mut(a)),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    // ----- conversions -----

    pub fn to_bool(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Long(n) => *n != 0,
            Value::Double(d) => *d != 0.0,
            Value::String(s) => !(s.is_empty() || s.as_bytes() == b"0"),
            Value::Array(a) => !a.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn to_long(&self) -> i64 {
        match self {
            Value::Null => 0,
            Value::Bool(b) => *b as i64,
            Value::Long(n) => *n,
            Value::Double(d) => double_to_long(*d),
            Value::String(s) => s.leading_number().to_long(),
            Value::Array(a) => !a.is_empty() as i64,
            Value::Object(_) => 1,
        }
    }

    pub fn to_double(&self) -> f64 {
        match self {
            Value::Null => 0.0,
            Value::Bool(b) => *b as i64 as f64,
            Value::Long(n) => *n as f64,
            Value::Double(d) => *d,
            Value::String(s) => s.leading_number().to_double(),
            Value::Array(a) => !a.is_empty() as i64 as f64,
            Value::Object(_) => 1.0,
        }
    }

    pub fn to_php_string(&self) -> PhpString {
        match self {
            Value::String(s) => s.clone(),
            other => PhpString::from(other.to_display_string()),
        }
    }

    /// String conversion as text
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null | Value::Bool(false) => String::new(),
            Value::Bool(true) => "1".to_string(),
            Value::Long(n) => n.to_string(),
            Value::Double(d) => format_double(*d),
            Value::String(s) => s.to_str_lossy().into_owned(),
            Value::Array(_) => "Array".to_string(),
            Value::Object(o) => format!("Object({})", o.class_name()),
        }
    }

    /// Numeric interpretation used by arithmetic
    pub fn to_number(&self) -> Number {
        match self {
            Value::Long(n) => Number::Long(*n),
            Value::Double(d) => Number::Double(*d),
            Value::String(s) => s.leading_number(),
            other => Number::Long(other.to_long()),
        }
    }

    /// Array key for this value; arrays and objects are illegal offsets
    pub fn to_key(&self) -> Option<ArrayKey> {
        match self {
            Value::Null => Some(ArrayKey::Str(PhpString::empty())),
            Value::Bool(b) => Some(ArrayKey::Int(*b as i64)),
            Value::Long(n) => Some(ArrayKey::Int(*n)),
            Value::Double(d) => Some(ArrayKey::Int(double_to_long(*d))),
            Value::String(s) => Some(ArrayKey::from_string(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_array(&self) -> PhpArray {
        match self {
            Value::Null => PhpArray::new(),
            Value::Array(a) => (**a).clone(),
            Value::Object(o) => o.borrow().fields.clone(),
            scalar => std::iter::once(scalar.clone()).collect(),
        }
    }

    pub fn to_object(&self) -> ObjectRef {
        match self {
            Value::Object(o) => o.clone(),
            Value::Array(a) => ObjectRef::with_fields("stdClass", (**a).clone()),
            Value::Null => ObjectRef::std_class(),
            scalar => {
                let object = ObjectRef::std_class();
                object.set_field("scalar", scalar.clone());
                object
            }
        }
    }

    pub fn cast(&self, kind: CastKind) -> Value {
        match kind {
            CastKind::Long => Value::Long(self.to_long()),
            CastKind::Double => Value::Double(self.to_double()),
            CastKind::Bool => Value::Bool(self.to_bool()),
            CastKind::String => Value::String(self.to_php_string()),
            CastKind::Binary => Value::bytes(self.to_php_string().as_bytes()),
            CastKind::Array => match self {
                Value::Array(_) => self.clone(),
                other => Value::array(other.to_array()),
            },
            CastKind::Object => Value::Object(self.to_object()),
            CastKind::Unset => Value::Null,
        }
    }

    // ----- arithmetic -----

    fn unsupported(&self, op: BinaryOp, other: &Value) -> RuntimeError {
        RuntimeError::UnsupportedOperands {
            left: self.type_name(),
            op: op.symbol(),
            right: other.type_name(),
        }
    }

    fn numeric_operands(&self, op: BinaryOp, other: &Value) -> Result<(Number, Number), RuntimeError> {
        match (self, other) {
            (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
                Err(self.unsupported(op, other))
            }
            _ => Ok((self.to_number(), other.to_number())),
        }
    }

    fn arith(
        &self,
        op: BinaryOp,
        other: &Value,
        long_op: fn(i64, i64) -> Option<i64>,
        double_op: fn(f64, f64) -> f64,
    ) -> Result<Value, RuntimeError> {
        Ok(match self.numeric_operands(op, other)? {
            (Number::Long(a), Number::Long(b)) => match long_op(a, b) {
                Some(n) => Value::Long(n),
                None => Value::Double(double_op(a as f64, b as f64)),
            },
            (a, b) => Value::Double(double_op(a.to_double(), b.to_double())),
        })
    }

    pub fn add(&self, other: &Value) -> Result<Value, RuntimeError> {
        if let (Value::Array(a), Value::Array(b)) = (self, other) {
            return Ok(Value::array(a.union(b)));
        }
        self.arith(BinaryOp::Add, other, i64::checked_add, |a, b| a + b)
    }

    pub fn sub(&self, other: &Value) -> Result<Value, RuntimeError> {
        self.arith(BinaryOp::Sub, other, i64::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, other: &Value) -> Result<Value, RuntimeError> {
        self.arith(BinaryOp::Mul, other, i64::checked_mul, |a, b| a * b)
    }

    pub fn div(&self, other: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = self.numeric_operands(BinaryOp::Div, other)?;
        if b.to_double() == 0.0 {
            return Err(RuntimeError::DivisionByZero);
        }
        Ok(match (a, b) {
            (Number::Long(x), Number::Long(y)) if x.checked_rem(y) == Some(0) => {
                match x.checked_div(y) {
                    Some(q) => Value::Long(q),
                    None => Value::Double(x as f64 / y as f64),
                }
            }
            (x, y) => Value::Double(x.to_double() / y.to_double()),
        })
    }

    pub fn modulo(&self, other: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = self.numeric_operands(BinaryOp::Mod, other)?;
        let (a, b) = (a.to_long(), b.to_long());
        if b == 0 {
            return Err(RuntimeError::ModuloByZero);
        }
        Ok(Value::Long(a.wrapping_rem(b)))
    }

    pub fn pow(&self, other: &Value) -> Result<Value, RuntimeError> {
        Ok(match self.numeric_operands(BinaryOp::Pow, other)? {
            (Number::Long(a), Number::Long(b)) if b >= 0 => {
                match u32::try_from(b).ok().and_then(|e| a.checked_pow(e)) {
                    Some(n) => Value::Long(n),
                    None => Value::Double((a as f64).powf(b as f64)),
                }
            }
            (a, b) => Value::Double(a.to_double().powf(b.to_double())),
        })
    }

    pub fn concat(&self, other: &Value) -> PhpString {
        self.to_php_string().concat(&other.to_php_string())
    }

    fn bitwise(
        &self,
        op: BinaryOp,
        other: &Value,
        long_op: fn(i64, i64) -> i64,
        byte_op: fn(u8, u8) -> u8,
    ) -> Result<Value, RuntimeError> {
        if let (Value::String(a), Value::String(b)) = (self, other) {
            let (a, b) = (a.as_bytes(), b.as_bytes());
            let bytes: Vec<u8> = if op == BinaryOp::BitOr {
                let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
                long.iter()
                    .enumerate()
                    .map(|(i, x)| short.get(i).map_or(*x, |y| byte_op(*x, *y)))
                    .collect()
            } else {
                a.iter().zip(b).map(|(x, y)| byte_op(*x, *y)).collect()
            };
            return Ok(Value::bytes(&bytes));
        }
        let (a, b) = self.numeric_operands(op, other)?;
        Ok(Value::Long(long_op(a.to_long(), b.to_long())))
    }

    pub fn bit_and(&self, other: &Value) -> Result<Value, RuntimeError> {
        self.bitwise(BinaryOp::BitAnd, other, |a, b| a & b, |a, b| a & b)
    }

    pub fn bit_or(&self, other: &Value) -> Result<Value, RuntimeError> {
        self.bitwise(BinaryOp::BitOr, other, |a, b| a | b, |a, b| a | b)
    }

    pub fn bit_xor(&self, other: &Value) -> Result<Value, RuntimeError> {
        self.bitwise(BinaryOp::BitXor, other, |a, b| a ^ b, |a, b| a ^ b)
    }

    pub fn shl(&self, other: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = self.numeric_operands(BinaryOp::Shl, other)?;
        Ok(Value::Long(shift_left(a.to_long(), b.to_long())?))
    }

    pub fn shr(&self, other: &Value) -> Result<Value, RuntimeError> {
        let (a, b) = self.numeric_operands(BinaryOp::Shr, other)?;
        Ok(Value::Long(shift_right(a.to_long(), b.to_long())?))
    }

    pub fn neg(&self) -> Result<Value, RuntimeError> {
        Value::Long(-1).mul(self)
    }

    /// Unary plus: numeric conversion
    pub fn plus(&self) -> Result<Value, RuntimeError> {
        Value::Long(1).mul(self)
    }

    pub fn bit_not(&self) -> Result<Value, RuntimeError> {
        match self {
            Value::Long(n) => Ok(Value::Long(!n)),
            Value::Double(d) => Ok(Value::Long(!double_to_long(*d))),
            Value::String(s) => Ok(Value::bytes(
                &s.as_bytes().iter().map(|b| !b).collect::<Vec<_>>(),
            )),
            other => Err(RuntimeError::UnsupportedOperands {
                left: "",
                op: "~",
                right: other.type_name(),
            }),
        }
    }

    /// Apply a binary operator with full PHP semantics
    ///
    /// Short-circuit operators are applied to already evaluated operands.
    pub fn binary_op(&self, op: BinaryOp, other: &Value) -> Result<Value, RuntimeError> {
        Ok(match op {
            BinaryOp::Add => self.add(other)?,
            BinaryOp::Sub => self.sub(other)?,
            BinaryOp::Mul => self.mul(other)?,
            BinaryOp::Div => self.div(other)?,
            BinaryOp::Mod => self.modulo(other)?,
            BinaryOp::Pow => self.pow(other)?,
            BinaryOp::Concat => Value::String(self.concat(other)),
            BinaryOp::BitAnd => self.bit_and(other)?,
            BinaryOp::BitOr => self.bit_or(other)?,
            BinaryOp::BitXor => self.bit_xor(other)?,
            BinaryOp::Shl => self.shl(other)?,
            BinaryOp::Shr => self.shr(other)?,
            BinaryOp::Spaceship => Value::Long(self.spaceship(other)),
            BinaryOp::And => Value::Bool(self.to_bool() && other.to_bool()),
            BinaryOp::Or => Value::Bool(self.to_bool() || other.to_bool()),
            BinaryOp::Xor => Value::Bool(self.to_bool() ^ other.to_bool()),
            BinaryOp::Coalesce => {
                if self.is_set() {
                    self.clone()
                } else {
                    other.clone()
                }
            }
            cmp => Value::Bool(self.compare(cmp, other)),
        })
    }

    /// Evaluate a comparison operator
    pub fn compare(&self, op: BinaryOp, other: &Value) -> bool {
        match op {
            BinaryOp::Eq => self.loose_eq(other),
            BinaryOp::NotEq => !self.loose_eq(other),
            BinaryOp::Identical => self.strict_eq(other),
            BinaryOp::NotIdentical => !self.strict_eq(other),
            BinaryOp::Lt => self.loose_cmp(other) == Some(Ordering::Less),
            BinaryOp::Le => matches!(
                self.loose_cmp(other),
                Some(Ordering::Less | Ordering::Equal)
            ),
            BinaryOp::Gt => self.loose_cmp(other) == Some(Ordering::Greater),
            BinaryOp::Ge => matches!(
                self.loose_cmp(other),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            _ => false,
        }
    }

    pub fn increment(&self) -> Value {
        match self {
            Value::Null => Value::Long(1),
            Value::Long(n) => match n.checked_add(1) {
                Some(r) => Value::Long(r),
                None => Value::Double(*n as f64 + 1.0),
            },
            Value::Double(d) => Value::Double(d + 1.0),
            Value::String(s) if s.is_empty() => Value::string("1"),
            Value::String(s) => match s.to_numeric() {
                Some(Number::Long(n)) => Value::Long(n).increment(),
                Some(Number::Double(d)) => Value::Double(d + 1.0),
                None => Value::String(increment_string(s)),
            },
            other => other.clone(),
        }
    }

    pub fn decrement(&self) -> Value {
        match self {
            Value::Long(n) => match n.checked_sub(1) {
                Some(r) => Value::Long(r),
                None => Value::Double(*n as f64 - 1.0),
            },
            Value::Double(d) => Value::Double(d - 1.0),
            Value::String(s) if s.is_empty() => Value::Long(-1),
            Value::String(s) => match s.to_numeric() {
                Some(Number::Long(n)) => Value::Long(n).decrement(),
                Some(Number::Double(d)) => Value::Double(d - 1.0),
                None => self.clone(),
            },
            other => other.clone(),
        }
    }

    // ----- comparison -----

    /// `==`
    pub fn loose_eq(&self, other: &Value) -> bool {
        self.loose_cmp(other) == Some(Ordering::Equal)
    }

    /// `===`
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.len() == b.len()
                        && a.iter().zip(b.iter()).all(|((ka, ea), (kb, eb))| {
                            ka == kb && ea.value().strict_eq(&eb.value())
                        }))
            }
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Loose ordering; `None` when the operands are uncomparable
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        use Value::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Null, String(s)) => Some(if s.is_empty() {
                Ordering::Equal
            } else {
                Ordering::Less
            }),
            (String(_), Null) => other.loose_cmp(self).map(Ordering::reverse),
            (Bool(_) | Null, _) | (_, Bool(_) | Null) => {
                Some(self.to_bool().cmp(&other.to_bool()))
            }
            (Long(a), Long(b)) => Some(a.cmp(b)),
            (Long(_) | Double(_), Long(_) | Double(_)) => {
                compare_numbers(self.to_number(), other.to_number())
            }
            (String(a), String(b)) => match (a.to_numeric(), b.to_numeric()) {
                (Some(x), Some(y)) => compare_numbers(x, y),
                _ => Some(a.cmp(b)),
            },
            (String(s), Long(_) | Double(_)) => match s.to_numeric() {
                Some(n) => compare_numbers(n, other.to_number()),
                None => Some(s.cmp(&other.to_php_string())),
            },
            (Long(_) | Double(_), String(_)) => other.loose_cmp(self).map(Ordering::reverse),
            (Array(a), Array(b)) => compare_arrays(a, b),
            (Array(_), _) => Some(Ordering::Greater),
            (_, Array(_)) => Some(Ordering::Less),
            (Object(a), Object(b)) => {
                if a.ptr_eq(b) {
                    Some(Ordering::Equal)
                } else if a.class_name() == b.class_name() {
                    compare_arrays(&a.borrow().fields, &b.borrow().fields)
                } else {
                    None
                }
            }
            (Object(_), _) => Some(Ordering::Greater),
            (_, Object(_)) => Some(Ordering::Less),
        }
    }

    /// `<=>`
    pub fn spaceship(&self, other: &Value) -> i64 {
        match self.loose_cmp(other) {
            Some(Ordering::Less) => -1,
            Some(Ordering::Equal) => 0,
            Some(Ordering::Greater) | None => 1,
        }
    }
}

fn compare_numbers(a: Number, b: Number) -> Option<Ordering> {
    match (a, b) {
        (Number::Long(x), Number::Long(y)) => Some(x.cmp(&y)),
        (x, y) => x.to_double().partial_cmp(&y.to_double()),
    }
}

fn compare_arrays(a: &PhpArray, b: &PhpArray) -> Option<Ordering> {
    match a.len().cmp(&b.len()) {
        Ordering::Equal => {}
        unequal => return Some(unequal),
    }
    for (key, entry) in a.iter() {
        let theirs = b.get(key)?;
        match entry.value().loose_cmp(&theirs)? {
            Ordering::Equal => {}
            unequal => return Some(unequal),
        }
    }
    Some(Ordering::Equal)
}

/// `<<` with PHP's handling of wide shifts
pub fn shift_left(a: i64, b: i64) -> Result<i64, RuntimeError> {
    if b < 0 {
        return Err(RuntimeError::NegativeShift);
    }
    Ok(if b >= 64 { 0 } else { a.wrapping_shl(b as u32) })
}

/// `>>` with PHP's handling of wide shifts
pub fn shift_right(a: i64, b: i64) -> Result<i64, RuntimeError> {
    if b < 0 {
        return Err(RuntimeError::NegativeShift);
    }
    Ok(if b >= 64 {
        if a < 0 {
            -1
        } else {
            0
        }
    } else {
        a >> b
    })
}

/// Perl-style string increment: `"a"` → `"b"`, `"Az"` → `"Ba"`, `"zz"` → `"aaa"`
fn increment_string(s: &PhpString) -> PhpString {
    let mut bytes = s.as_bytes().to_vec();
    let mut i = bytes.len();
    loop {
        if i == 0 {
            let first = match bytes.first() {
                Some(b'0'..=b'9') => b'1',
                Some(b'A'..=b'Z') => b'A',
                _ => b'a',
            };
            bytes.insert(0, first);
            break;
        }
        i -= 1;
        match bytes[i] {
            b'z' => bytes[i] = b'a',
            b'Z' => bytes[i] = b'A',
            b'9' => bytes[i] = b'0',
            b'a'..=b'y' | b'A'..=b'Y' | b'0'..=b'8' => {
                bytes[i] += 1;
                break;
            }
            _ => break,
        }
    }
    if s.is_binary() {
        PhpString::from(bytes)
    } else {
        PhpString::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Format a double the way PHP's `echo` does (precision 14)
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        return "NAN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let scientific = format!("{:.13e}", d);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if !(-4..14).contains(&exponent) {
        let mut mantissa = trim_fraction(mantissa);
        if !mantissa.contains('.') {
            mantissa.push_str(".0");
        }
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}E{}{}", mantissa, sign, exponent.abs())
    } else {
        let decimals = (13 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, d))
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<PhpString> for Value {
    fn from(s: PhpString) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_long() {
        assert_eq!(Value::Null.to_long(), 0);
        assert_eq!(Value::Bool(true).to_long(), 1);
        assert_eq!(Value::Double(3.7).to_long(), 3);
        assert_eq!(Value::string("123").to_long(), 123);
        assert_eq!(Value::string("12abc").to_long(), 12);
        assert_eq!(Value::string("abc").to_long(), 0);
        assert_eq!(Value::string("1e3").to_long(), 1000);
    }

    #[test]
    fn test_to_bool() {
        assert!(!Value::Null.to_bool());
        assert!(!Value::Long(0).to_bool());
        assert!(!Value::string("").to_bool());
        assert!(!Value::string("0").to_bool());
        assert!(Value::string("0.0").to_bool());
        assert!(!Value::empty_array().to_bool());
    }

    #[test]
    fn test_double_formatting() {
        assert_eq!(format_double(3.5), "3.5");
        assert_eq!(format_double(1.0), "1");
        assert_eq!(format_double(0.1 + 0.2), "0.3");
        assert_eq!(format_double(1e14), "1.0E+14");
        assert_eq!(format_double(1e13), "10000000000000");
        assert_eq!(format_double(1.5e-7), "1.5E-7");
        assert_eq!(format_double(-2.25), "-2.25");
    }

    #[test]
    fn test_add_overflows_to_double() {
        assert_eq!(Value::Long(2).add(&Value::Long(3)), Ok(Value::Long(5)));
        assert_eq!(
            Value::Long(i64::MAX).add(&Value::Long(1)),
            Ok(Value::Double(i64::MAX as f64 + 1.0))
        );
        assert_eq!(Value::Double(1.5).add(&Value::Long(2)), Ok(Value::Double(3.5)));
        assert_eq!(Value::string("2").add(&Value::Long(2)), Ok(Value::Long(4)));
    }

    #[test]
    fn test_array_arithmetic_is_fatal_except_union() {
        let arr = Value::empty_array();
        assert!(matches!(
            arr.add(&Value::Long(1)),
            Err(RuntimeError::UnsupportedOperands { .. })
        ));
        assert!(arr.add(&Value::empty_array()).is_ok());
    }

    #[test]
    fn test_division() {
        assert_eq!(Value::Long(6).div(&Value::Long(3)), Ok(Value::Long(2)));
        assert_eq!(Value::Long(7).div(&Value::Long(2)), Ok(Value::Double(3.5)));
        assert_eq!(
            Value::Long(1).div(&Value::Long(0)),
            Err(RuntimeError::DivisionByZero)
        );
        assert_eq!(
            Value::Long(1).modulo(&Value::Long(0)),
            Err(RuntimeError::ModuloByZero)
        );
        assert_eq!(Value::Long(-7).modulo(&Value::Long(3)), Ok(Value::Long(-1)));
    }

    #[test]
    fn test_loose_comparison() {
        assert!(Value::Long(0).loose_eq(&Value::Bool(false)));
        assert!(Value::string("1").loose_eq(&Value::Long(1)));
        assert!(Value::string("1.0").loose_eq(&Value::string("1")));
        assert!(!Value::string("abc").loose_eq(&Value::Long(0)));
        assert!(Value::Null.loose_eq(&Value::string("")));
        assert!(Value::Null.loose_eq(&Value::empty_array()));
        assert!(Value::string("abc").compare(BinaryOp::Lt, &Value::string("abd")));
        assert_eq!(Value::Long(1).spaceship(&Value::Long(2)), -1);
    }

    #[test]
    fn test_strict_comparison() {
        assert!(!Value::Long(1).strict_eq(&Value::Double(1.0)));
        assert!(!Value::string("1").strict_eq(&Value::Long(1)));
        let a: PhpArray = vec![Value::Long(1)].into_iter().collect();
        let b: PhpArray = vec![Value::Long(1)].into_iter().collect();
        assert!(Value::array(a).strict_eq(&Value::array(b)));
    }

    #[test]
    fn test_increment() {
        assert_eq!(Value::Null.increment(), Value::Long(1));
        assert_eq!(Value::Long(5).increment(), Value::Long(6));
        assert_eq!(Value::string("a").increment(), Value::string("b"));
        assert_eq!(Value::string("Az").increment(), Value::string("Ba"));
        assert_eq!(Value::string("zz").increment(), Value::string("aaa"));
        assert_eq!(Value::string("9").increment(), Value::Long(10));
        assert_eq!(Value::Null.decrement(), Value::Null);
    }

    #[test]
    fn test_copy_on_write_arrays() {
        let mut a = Value::empty_array();
        if let Some(arr) = a.array_mut() {
            arr.push(Value::Long(1));
        }
        let b = a.copy();
        if let Some(arr) = a.array_mut() {
            arr.push(Value::Long(2));
        }
        assert_eq!(a.as_array().map(PhpArray::len), Some(2));
        assert_eq!(b.as_array().map(PhpArray::len), Some(1));
    }

    #[test]
    fn test_string_bitwise() {
        assert_eq!(
            Value::string("a").bit_or(&Value::string(" ")),
            Ok(Value::bytes(b"a"))
        );
        assert_eq!(Value::Long(6).bit_and(&Value::Long(3)), Ok(Value::Long(2)));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(shift_left(1, 3), Ok(8));
        assert_eq!(shift_left(1, 64), Ok(0));
        assert_eq!(shift_right(-8, 70), Ok(-1));
        assert_eq!(shift_left(1, -1), Err(RuntimeError::NegativeShift));
    }

    #[test]
    fn test_casts() {
        assert_eq!(Value::string("12").cast(CastKind::Long), Value::Long(12));
        assert_eq!(Value::Long(1).cast(CastKind::String), Value::string("1"));
        let arr = Value::Long(3).cast(CastKind::Array);
        assert_eq!(arr.as_array().map(PhpArray::len), Some(1));
        assert_eq!(Value::Long(3).cast(CastKind::Unset), Value::Null);
    }
}
