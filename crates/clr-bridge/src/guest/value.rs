//! Guest Value Representation
//!
//! `GuestValue` is what crosses the boundary on the guest side: immediate
//! primitives are carried by value, everything else is a [`GuestHandle`]
//! into the [`GuestHeap`](super::GuestHeap).
//!
//! A value holding handles returned from a bridge operation owns one
//! reference per handle; the caller gives it back with
//! [`Bridge::release`](crate::Bridge::release).

use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;

use super::heap::GuestHandle;

// ============================================================================
// GuestValue Enum
// ============================================================================

/// Any value the guest runtime can hand to, or receive from, the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum GuestValue {
    /// `None`
    None,

    /// `bool`
    Bool(bool),

    /// `int`
    Int(i64),

    /// `float`
    Float(f64),

    /// `str`
    Str(SmolStr),

    /// `tuple`
    Tuple(Vec<GuestValue>),

    /// `dict` snapshot (string keys only)
    Dict(IndexMap<SmolStr, GuestValue>),

    /// Heap object
    Object(GuestHandle),
}

impl GuestValue {
    /// Get the guest type name for this value
    pub fn type_name(&self) -> &'static str {
        match self {
            GuestValue::None => "NoneType",
            GuestValue::Bool(_) => "bool",
            GuestValue::Int(_) => "int",
            GuestValue::Float(_) => "float",
            GuestValue::Str(_) => "str",
            GuestValue::Tuple(_) => "tuple",
            GuestValue::Dict(_) => "dict",
            GuestValue::Object(_) => "object",
        }
    }

    /// Create a string value
    pub fn str(s: impl Into<SmolStr>) -> Self {
        GuestValue::Str(s.into())
    }

    /// Check if this value is None
    pub fn is_none(&self) -> bool {
        matches!(self, GuestValue::None)
    }

    /// Truthiness as the guest runtime defines it.
    ///
    /// Heap objects are always true.
    pub fn is_truthy(&self) -> bool {
        match self {
            GuestValue::None => false,
            GuestValue::Bool(b) => *b,
            GuestValue::Int(n) => *n != 0,
            GuestValue::Float(f) => *f != 0.0,
            GuestValue::Str(s) => !s.is_empty(),
            GuestValue::Tuple(items) => !items.is_empty(),
            GuestValue::Dict(items) => !items.is_empty(),
            GuestValue::Object(_) => true,
        }
    }

    /// Try to extract as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GuestValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to extract as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GuestValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Try to extract as a heap handle
    pub fn as_object(&self) -> Option<GuestHandle> {
        match self {
            GuestValue::Object(h) => Some(*h),
            _ => None,
        }
    }

    /// Collect every heap handle reachable from this value
    pub fn collect_handles(&self, out: &mut Vec<GuestHandle>) {
        match self {
            GuestValue::Object(h) => out.push(*h),
            GuestValue::Tuple(items) => {
                for item in items {
                    item.collect_handles(out);
                }
            }
            GuestValue::Dict(items) => {
                for item in items.values() {
                    item.collect_handles(out);
                }
            }
            _ => {}
        }
    }
}

impl Default for GuestValue {
    fn default() -> Self {
        GuestValue::None
    }
}

impl From<bool> for GuestValue {
    fn from(b: bool) -> Self {
        GuestValue::Bool(b)
    }
}

impl From<i64> for GuestValue {
    fn from(n: i64) -> Self {
        GuestValue::Int(n)
    }
}

impl From<f64> for GuestValue {
    fn from(f: f64) -> Self {
        GuestValue::Float(f)
    }
}

impl From<&str> for GuestValue {
    fn from(s: &str) -> Self {
        GuestValue::Str(SmolStr::new(s))
    }
}

impl From<GuestHandle> for GuestValue {
    fn from(h: GuestHandle) -> Self {
        GuestValue::Object(h)
    }
}

impl fmt::Display for GuestValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuestValue::None => write!(f, "None"),
            GuestValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            GuestValue::Int(n) => write!(f, "{}", n),
            GuestValue::Float(n) => write!(f, "{}", n),
            GuestValue::Str(s) => write!(f, "'{}'", s),
            GuestValue::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            GuestValue::Dict(items) => {
                write!(f, "{{")?;
                for (i, (k, v)) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {}", k, v)?;
                }
                write!(f, "}}")
            }
            GuestValue::Object(h) => write!(f, "<object {}>", h),
        }
    }
}

// ============================================================================
// Call Arguments
// ============================================================================

/// Positional and keyword arguments of a guest call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    /// Positional arguments in call order
    pub positional: Vec<GuestValue>,
    /// Keyword arguments in call order
    pub keywords: IndexMap<SmolStr, GuestValue>,
}

impl CallArgs {
    /// Create an empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from positional arguments only
    pub fn positional(args: impl IntoIterator<Item = GuestValue>) -> Self {
        Self {
            positional: args.into_iter().collect(),
            keywords: IndexMap::new(),
        }
    }

    /// Add a keyword argument
    pub fn with_keyword(mut self, name: impl Into<SmolStr>, value: GuestValue) -> Self {
        self.keywords.insert(name.into(), value);
        self
    }

    /// Total number of supplied arguments
    pub fn len(&self) -> usize {
        self.positional.len() + self.keywords.len()
    }

    /// Check if no arguments were supplied
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!GuestValue::None.is_truthy());
        assert!(!GuestValue::Int(0).is_truthy());
        assert!(GuestValue::str("x").is_truthy());
        assert!(GuestValue::Float(f64::NAN).is_truthy());
        assert!(!GuestValue::Float(-0.0).is_truthy());
        assert!(!GuestValue::Tuple(vec![]).is_truthy());
    }

    #[test]
    fn test_tuple_display() {
        let single = GuestValue::Tuple(vec![GuestValue::Int(1)]);
        assert_eq!(single.to_string(), "(1,)");

        let pair = GuestValue::Tuple(vec![GuestValue::Bool(true), GuestValue::str("a")]);
        assert_eq!(pair.to_string(), "(True, 'a')");
    }

    #[test]
    fn test_call_args_builder() {
        let args = CallArgs::positional([GuestValue::Int(1)]).with_keyword("height", GuestValue::Int(2));
        assert_eq!(args.len(), 2);
        assert!(!args.is_empty());
        assert_eq!(args.keywords.get("height"), Some(&GuestValue::Int(2)));
    }
}
