#![forbid(unsafe_code)]

//! Dynamic values carried through deferred computations.
//!
//! Values and rejection reasons share one universe: anything a handler can
//! return it can also raise. Thenable detection is a shape test on
//! [`Object`]s ("has an invokable `then` member"), so values that never came
//! from this crate can still be adopted.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::deferred::Deferred;
use crate::error::Error;

/// Result of running a handler: `Err` carries a raised value.
pub type Outcome = Result<Value, Value>;

/// A dynamically typed value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(Rc<[Value]>),
    Object(Object),
    Function(Function),
    Deferred(Deferred),
    Error(Rc<Error>),
}

impl Value {
    /// Build a list value.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Deferred(_) => "deferred",
            Self::Error(_) => "error",
        }
    }

    /// Whether this is `undefined`, `null`, a boolean, a number or a string.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Undefined | Self::Null | Self::Bool(_) | Self::Number(_) | Self::Str(_)
        )
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Self::Deferred(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_error(&self) -> Option<&Error> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Host iteration protocol.
    ///
    /// Lists yield their items and strings yield one string per character.
    /// Every other value is not iterable.
    pub fn to_list(&self) -> Result<Vec<Value>, Error> {
        match self {
            Self::List(items) => Ok(items.to_vec()),
            Self::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
            other => Err(Error::NotIterable {
                type_name: other.type_name(),
            }),
        }
    }

    /// Call this value with `args`, raising `NotCallable` for non-functions.
    pub fn call(&self, args: &[Value]) -> Outcome {
        match self {
            Self::Function(f) => f.call(args),
            other => Err(Value::from(Error::NotCallable {
                type_name: other.type_name(),
            })),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Deferred(a), Self::Deferred(b)) => a.ptr_eq(b),
            (Self::Error(a), Self::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Self::Object(_) => f.write_str("[object Object]"),
            Self::Function(_) => f.write_str("[function]"),
            Self::Deferred(_) => f.write_str("[object Deferred]"),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(Rc::from(items))
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Self::Object(o)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl From<Deferred> for Value {
    fn from(d: Deferred) -> Self {
        Self::Deferred(d)
    }
}

impl From<Error> for Value {
    fn from(e: Error) -> Self {
        Self::Error(Rc::new(e))
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::list(iter)
    }
}

// ---------------------------------------------------------------------------
// Function
// ---------------------------------------------------------------------------

/// A shared callable.
///
/// Cloning a `Function` creates a new handle to the **same** closure; equality
/// is identity.
#[derive(Clone)]
pub struct Function {
    call: Rc<dyn Fn(&[Value]) -> Outcome>,
}

impl Function {
    pub fn new(f: impl Fn(&[Value]) -> Outcome + 'static) -> Self {
        Self { call: Rc::new(f) }
    }

    /// Invoke the closure. `Err` means the call raised.
    pub fn call(&self, args: &[Value]) -> Outcome {
        (self.call)(args)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function")
    }
}

/// First argument of a call, or `Undefined`.
#[must_use]
pub fn first_arg(args: &[Value]) -> Value {
    args.first().cloned().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// A single property slot.
#[derive(Debug, Clone)]
pub enum Property {
    /// Plain stored value.
    Data(Value),
    /// Computed on every read; the getter may raise.
    Accessor(Function),
}

/// A shared, mutable property bag.
///
/// Cloning an `Object` creates a new handle to the **same** properties.
#[derive(Clone, Default)]
pub struct Object {
    props: Rc<RefCell<BTreeMap<String, Property>>>,
}

impl Object {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`set`](Self::set).
    #[must_use]
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Builder form of [`define_getter`](Self::define_getter).
    #[must_use]
    pub fn with_getter(self, key: impl Into<String>, getter: Function) -> Self {
        self.define_getter(key, getter);
        self
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.props
            .borrow_mut()
            .insert(key.into(), Property::Data(value.into()));
    }

    pub fn define_getter(&self, key: impl Into<String>, getter: Function) {
        self.props
            .borrow_mut()
            .insert(key.into(), Property::Accessor(getter));
    }

    /// Read a property. Missing keys read as `Undefined`; accessors run here
    /// and may raise.
    pub fn get(&self, key: &str) -> Outcome {
        // Clone the slot out first: a getter may touch this object again.
        let slot = self.props.borrow().get(key).cloned();
        match slot {
            None => Ok(Value::Undefined),
            Some(Property::Data(value)) => Ok(value),
            Some(Property::Accessor(getter)) => getter.call(&[]),
        }
    }

    /// Read `key` and return it if it is invokable.
    pub fn callable(&self, key: &str) -> Result<Option<Function>, Value> {
        match self.get(key)? {
            Value::Function(f) => Ok(Some(f)),
            _ => Ok(None),
        }
    }

    /// Narrow capability test: does `key` hold an invokable member?
    pub fn has_callable(&self, key: &str) -> Result<bool, Value> {
        Ok(self.callable(key)?.is_some())
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.props.borrow().keys().cloned().collect()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.props, &other.props)
    }
}

impl fmt::Debug for Object {
    // Keys only: property values may refer back to this object.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object").field("keys", &self.keys()).finish()
    }
}
