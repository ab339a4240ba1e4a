//! Dynamically typed values used as assertion subjects and arguments.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use regex::Regex;
use std::{fmt, rc::Rc};

/// A value inspected by the assertion engine.
///
/// Primitive variants and `Date` compare by value. The remaining variants
/// are reference values: clones of the same `Value` share an identity and
/// strict equality compares that identity, not the contents.
#[derive(Clone, Debug)]
pub enum Value {
    /// The absence of a value, e.g. a missing variable or argument.
    Undefined,
    /// An explicit empty value.
    Null,
    #[allow(missing_docs)]
    Bool(bool),
    /// A double precision number. `NaN` is a legal value.
    Number(f64),
    #[allow(missing_docs)]
    String(String),
    #[allow(missing_docs)]
    Date(DateTime<Utc>),
    #[allow(missing_docs)]
    Array(Rc<Vec<Value>>),
    /// An ordered map of named properties.
    Object(Rc<IndexMap<String, Value>>),
    /// A regular expression.
    Pattern(Rc<Regex>),
    #[allow(missing_docs)]
    Function(Func),
    /// An opaque value owned by an external collaborator.
    Host(Rc<dyn HostObject>),
}

/// Capabilities of values provided by external collaborators, such as spy
/// handles from a mocking library.
pub trait HostObject: fmt::Debug {
    /// The number of recorded calls, if this object tracks them.
    fn call_count(&self) -> Option<usize> {
        None
    }

    /// Custom deep-equality override used by `equals`.
    fn is_equal(&self, _other: &Value) -> Option<bool> {
        None
    }
}

/// A zero-argument function value.
///
/// Raising an error is modelled as returning `Err` or panicking.
#[derive(Clone)]
pub struct Func {
    name: Option<Rc<str>>,
    f: Rc<dyn Fn() -> anyhow::Result<Value>>,
}

impl Func {
    /// Wrap a closure as a function value.
    pub fn new<F, T>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + 'static,
        T: Into<Value>,
    {
        Self {
            name: None,
            f: Rc::new(move || f().map(Into::into)),
        }
    }

    /// Wrap a closure as a named function value.
    pub fn named<F, T>(name: &str, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + 'static,
        T: Into<Value>,
    {
        Self {
            name: Some(name.into()),
            ..Self::new(f)
        }
    }

    /// Return the name of this function, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Invoke the function.
    pub fn call(&self) -> anyhow::Result<Value> {
        (self.f)()
    }

    fn ptr(&self) -> *const u8 {
        Rc::as_ptr(&self.f) as *const u8
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func").field("name", &self.name).finish()
    }
}

impl Value {
    /// Create an array value.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Value::Array(Rc::new(items.into_iter().map(Into::into).collect()))
    }

    /// Create an object value from key/value pairs, keeping their order.
    pub fn object<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(Rc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Create a function value.
    pub fn function<F, T>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + 'static,
        T: Into<Value>,
    {
        Value::Function(Func::new(f))
    }

    /// The type name as reported by `of_type`.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Bool(..) => "boolean",
            Value::Number(..) => "number",
            Value::String(..) => "string",
            Value::Function(..) => "function",
            Value::Null
            | Value::Date(..)
            | Value::Array(..)
            | Value::Object(..)
            | Value::Pattern(..)
            | Value::Host(..) => "object",
        }
    }

    /// Truthiness coercion.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Whether this value is the numeric `NaN`.
    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    /// Whether this value is `Null` or `Undefined`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Return the string slice if this value is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Return the number if this value is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Strict equality without coercion. `NaN` is not equal to itself.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Pattern(a), Value::Pattern(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr() == b.ptr(),
            (Value::Host(a), Value::Host(b)) => {
                Rc::as_ptr(a) as *const u8 == Rc::as_ptr(b) as *const u8
            }
            _ => false,
        }
    }

    /// Deep structural equality.
    pub fn deep_equals(&self, other: &Value) -> bool {
        if self.strict_equals(other) {
            return true;
        }
        if self.type_name() != other.type_name() {
            return false;
        }
        if let Value::Host(host) = self {
            if let Some(eq) = host.is_equal(other) {
                return eq;
            }
        }
        if let Value::Host(host) = other {
            if let Some(eq) = host.is_equal(self) {
                return eq;
            }
        }
        match (self, other) {
            (Value::Date(a), Value::Date(b)) => a.timestamp_millis() == b.timestamp_millis(),
            (Value::Pattern(a), Value::Pattern(b)) => a.as_str() == b.as_str(),
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.deep_equals(y))
            }
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map_or(false, |w| v.deep_equals(w)))
            }
            _ => false,
        }
    }
}

fn fmt_number(n: f64, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => fmt_number(*n, f),
            Value::String(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Object(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Value::Pattern(re) => write!(f, "/{}/", re.as_str()),
            Value::Function(func) => match func.name() {
                Some(name) => write!(f, "function {}", name),
                None => f.write_str("function"),
            },
            Value::Host(host) => write!(f, "{:?}", host),
        }
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                #[inline]
                fn from(n: $t) -> Self {
                    Value::Number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

impl From<()> for Value {
    #[inline]
    fn from(_: ()) -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    #[inline]
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    #[inline]
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    #[inline]
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    #[inline]
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<&Value> for Value {
    #[inline]
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

impl From<DateTime<Utc>> for Value {
    #[inline]
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Regex> for Value {
    #[inline]
    fn from(re: Regex) -> Self {
        Value::Pattern(Rc::new(re))
    }
}

impl From<Func> for Value {
    #[inline]
    fn from(f: Func) -> Self {
        Value::Function(f)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<IndexMap<String, Value>> for Value {
    #[inline]
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Object(Rc::new(map))
    }
}

impl<H: HostObject + 'static> From<Rc<H>> for Value {
    #[inline]
    fn from(host: Rc<H>) -> Self {
        Value::Host(host)
    }
}
