//! Text and byte strings with PHP numeric-string parsing

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A PHP string: either text or raw bytes
///
/// Both kinds compare and hash by their bytes; concatenation yields a byte
/// string when either side is one.
#[derive(Clone)]
pub enum PhpString {
    Text(Rc<str>),
    Bytes(Rc<[u8]>),
}

/// Result of numeric interpretation of a string
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Long(i64),
    Double(f64),
}

impl Number {
    pub fn to_double(self) -> f64 {
        match self {
            Number::Long(n) => n as f64,
            Number::Double(d) => d,
        }
    }

    pub fn to_long(self) -> i64 {
        match self {
            Number::Long(n) => n,
            Number::Double(d) => double_to_long(d),
        }
    }
}

/// PHP's float-to-int conversion: truncation, with NaN and infinities mapping to 0
pub fn double_to_long(d: f64) -> i64 {
    if !d.is_finite() {
        return 0;
    }
    if d >= i64::MAX as f64 || d < i64::MIN as f64 {
        // Out of range values wrap modulo 2^64
        let wrapped = d.trunc() % 18_446_744_073_709_551_616.0;
        return wrapped as i128 as i64;
    }
    d as i64
}

impl PhpString {
    pub fn empty() -> Self {
        PhpString::Text(Rc::from(""))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            PhpString::Text(s) => s.as_bytes(),
            PhpString::Bytes(b) => b,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, PhpString::Bytes(_))
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        match self {
            PhpString::Text(s) => Cow::Borrowed(s),
            PhpString::Bytes(b) => String::from_utf8_lossy(b),
        }
    }

    pub fn concat(&self, other: &PhpString) -> PhpString {
        match (self, other) {
            (PhpString::Text(a), PhpString::Text(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                PhpString::from(s)
            }
            _ => {
                let mut bytes = Vec::with_capacity(self.len() + other.len());
                bytes.extend_from_slice(self.as_bytes());
                bytes.extend_from_slice(other.as_bytes());
                PhpString::from(bytes)
            }
        }
    }

    /// The value if the whole string is numeric (surrounding whitespace allowed)
    pub fn to_numeric(&self) -> Option<Number> {
        let bytes = self.as_bytes();
        let (number, end) = scan_number(bytes)?;
        if bytes[end..].iter().all(|b| is_space(*b)) {
            Some(number)
        } else {
            None
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.to_numeric().is_some()
    }

    /// The leading numeric prefix, or 0 when there is none
    pub fn leading_number(&self) -> Number {
        scan_number(self.as_bytes())
            .map(|(n, _)| n)
            .unwrap_or(Number::Long(0))
    }

    /// Whether the string has a numeric prefix followed by other characters
    pub fn is_leading_numeric(&self) -> bool {
        scan_number(self.as_bytes()).is_some() && !self.is_numeric()
    }

    /// Canonical decimal integer form, as used for array keys
    pub fn as_canonical_int(&self) -> Option<i64> {
        let bytes = self.as_bytes();
        let digits = bytes.strip_prefix(b"-").unwrap_or(bytes);
        if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
            return None;
        }
        if digits.len() > 1 && digits[0] == b'0' {
            return None;
        }
        if bytes[0] == b'-' && digits == b"0" {
            return None;
        }
        std::str::from_utf8(bytes).ok()?.parse().ok()
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c')
}

/// Scan a number at the start of `bytes`, after leading whitespace
///
/// Returns the number and the index just past it.
fn scan_number(bytes: &[u8]) -> Option<(Number, usize)> {
    let mut i = 0;
    while i < bytes.len() && is_space(bytes[i]) {
        i += 1;
    }
    let start = i;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }

    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;

    let mut is_double = false;
    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        frac_digits = j - i - 1;
        if int_digits > 0 || frac_digits > 0 {
            is_double = true;
            i = j;
        }
    }

    if int_digits == 0 && frac_digits == 0 {
        return None;
    }

    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            is_double = true;
            i = j;
        }
    }

    let text = std::str::from_utf8(&bytes[start..i]).ok()?;
    if !is_double {
        if let Ok(n) = text.parse::<i64>() {
            return Some((Number::Long(n), i));
        }
    }
    text.parse::<f64>().ok().map(|d| (Number::Double(d), i))
}

impl PartialEq for PhpString {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for PhpString {}

impl Hash for PhpString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl PartialOrd for PhpString {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PhpString {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Debug for PhpString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhpString::Text(s) => write!(f, "{:?}", s),
            PhpString::Bytes(b) => write!(f, "b{:?}", String::from_utf8_lossy(b)),
        }
    }
}

impl fmt::Display for PhpString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str_lossy())
    }
}

impl From<&str> for PhpString {
    fn from(s: &str) -> Self {
        PhpString::Text(Rc::from(s))
    }
}

impl From<String> for PhpString {
    fn from(s: String) -> Self {
        PhpString::Text(Rc::from(s))
    }
}

impl From<Vec<u8>> for PhpString {
    fn from(bytes: Vec<u8>) -> Self {
        PhpString::Bytes(Rc::from(bytes))
    }
}

impl From<&[u8]> for PhpString {
    fn from(bytes: &[u8]) -> Self {
        PhpString::Bytes(Rc::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_strings() {
        assert_eq!(PhpString::from("42").to_numeric(), Some(Number::Long(42)));
        assert_eq!(PhpString::from(" 1.5 ").to_numeric(), Some(Number::Double(1.5)));
        assert_eq!(PhpString::from("1e3").to_numeric(), Some(Number::Double(1000.0)));
        assert_eq!(PhpString::from(".5").to_numeric(), Some(Number::Double(0.5)));
        assert_eq!(PhpString::from("12abc").to_numeric(), None);
        assert_eq!(PhpString::from("abc").to_numeric(), None);
        assert_eq!(PhpString::from("").to_numeric(), None);
        assert_eq!(PhpString::from(".").to_numeric(), None);
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(PhpString::from("12abc").leading_number(), Number::Long(12));
        assert_eq!(PhpString::from("abc").leading_number(), Number::Long(0));
        assert_eq!(PhpString::from("3.5kg").leading_number(), Number::Double(3.5));
        assert!(PhpString::from("12abc").is_leading_numeric());
        assert!(!PhpString::from("12").is_leading_numeric());
    }

    #[test]
    fn test_integer_overflow_becomes_double() {
        let n = PhpString::from("99999999999999999999").to_numeric();
        assert!(matches!(n, Some(Number::Double(_))));
    }

    #[test]
    fn test_canonical_int() {
        assert_eq!(PhpString::from("123").as_canonical_int(), Some(123));
        assert_eq!(PhpString::from("-7").as_canonical_int(), Some(-7));
        assert_eq!(PhpString::from("007").as_canonical_int(), None);
        assert_eq!(PhpString::from("-0").as_canonical_int(), None);
        assert_eq!(PhpString::from("1.0").as_canonical_int(), None);
        assert_eq!(PhpString::from(" 1").as_canonical_int(), None);
    }

    #[test]
    fn test_text_and_bytes_compare_by_content() {
        assert_eq!(PhpString::from("ab"), PhpString::from(b"ab".to_vec()));
        assert!(PhpString::from("a").concat(&PhpString::from(b"b".as_slice())).is_binary());
        assert!(!PhpString::from("a").concat(&PhpString::from("b")).is_binary());
    }

    #[test]
    fn test_double_to_long() {
        assert_eq!(double_to_long(3.9), 3);
        assert_eq!(double_to_long(-3.9), -3);
        assert_eq!(double_to_long(f64::NAN), 0);
        assert_eq!(double_to_long(f64::INFINITY), 0);
    }
}
