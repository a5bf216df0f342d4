//! The value type flowing through ports, and the process-wide registry of
//! type/range predicates that validate it.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::sync::RwLock;

use smartstring::{LazyCompact, SmartString};

/// A value carried by a signal on a data port.
///
/// This is intentionally small and closed: the kernel only needs to move
/// values between ports and validate them against descriptors, not provide
/// a general-purpose dynamic type system.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit float.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// A boolean.
    Bool(bool),
}

impl Value {
    /// The type tag this value reports to the registry.
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Int(_) => TypeTag::new("int"),
            Value::Float(_) => TypeTag::new("float"),
            Value::Str(_) => TypeTag::new("str"),
            Value::Bool(_) => TypeTag::new("bool"),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// The name of a registered type, e.g. `"int"`. Unregistered tags always
/// pass validation (§4.1): the registry is opt-in, not a closed universe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeTag(SmartString<LazyCompact>);

impl TypeTag {
    /// Construct a tag from a name.
    pub fn new(name: &str) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A type predicate: does this value belong to the type this tag names?
pub type TypeChecker = fn(&Value) -> bool;

/// A range predicate: does this value fall within `[lo, hi]`?
pub type RangeChecker = fn(&Value, &Value, &Value) -> bool;

struct Registry {
    type_checkers: RwLock<HashMap<TypeTag, TypeChecker>>,
    range_checkers: RwLock<HashMap<TypeTag, RangeChecker>>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut type_checkers: HashMap<TypeTag, TypeChecker> = HashMap::new();
        type_checkers.insert(TypeTag::new("int"), (|v| matches!(v, Value::Int(_))) as TypeChecker);
        type_checkers.insert(TypeTag::new("float"), (|v| matches!(v, Value::Float(_))) as TypeChecker);
        type_checkers.insert(TypeTag::new("str"), (|v| matches!(v, Value::Str(_))) as TypeChecker);
        type_checkers.insert(TypeTag::new("bool"), (|v| matches!(v, Value::Bool(_))) as TypeChecker);

        let mut range_checkers: HashMap<TypeTag, RangeChecker> = HashMap::new();
        range_checkers.insert(TypeTag::new("int"), numeric_in_range as RangeChecker);
        range_checkers.insert(TypeTag::new("float"), numeric_in_range as RangeChecker);

        Registry {
            type_checkers: RwLock::new(type_checkers),
            range_checkers: RwLock::new(range_checkers),
        }
    })
}

fn numeric_in_range(v: &Value, lo: &Value, hi: &Value) -> bool {
    match (v.as_f64(), lo.as_f64(), hi.as_f64()) {
        (Some(v), Some(lo), Some(hi)) => lo <= v && v <= hi,
        _ => true,
    }
}

/// Register (or replace) the type checker for `tag`.
pub fn register_type_checker(tag: TypeTag, checker: TypeChecker) {
    registry()
        .type_checkers
        .write()
        .expect("type checker registry poisoned")
        .insert(tag, checker);
}

/// Register (or replace) the range checker for `tag`.
pub fn register_range_checker(tag: TypeTag, checker: RangeChecker) {
    registry()
        .range_checkers
        .write()
        .expect("range checker registry poisoned")
        .insert(tag, checker);
}

/// Error raised when a value fails its descriptor's type predicate.
#[derive(Debug, Clone)]
pub struct TypeCheckError {
    /// Name of the port the value was destined for.
    pub port: SmartString<LazyCompact>,
    /// The type tag the value was checked against.
    pub expected: TypeTag,
}

impl std::fmt::Display for TypeCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "value for port '{}' does not satisfy type '{}'",
            self.port, self.expected
        )
    }
}
impl std::error::Error for TypeCheckError {}

/// Error raised when a value fails its descriptor's range predicate.
#[derive(Debug, Clone)]
pub struct RangeCheckError {
    /// Name of the port the value was destined for.
    pub port: SmartString<LazyCompact>,
}

impl std::fmt::Display for RangeCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "value for port '{}' is out of range", self.port)
    }
}
impl std::error::Error for RangeCheckError {}

/// Either validation error a [`ValueDescriptor`] can raise.
#[derive(Debug, Clone)]
pub enum CheckError {
    /// See [`TypeCheckError`].
    Type(TypeCheckError),
    /// See [`RangeCheckError`].
    Range(RangeCheckError),
}

impl std::fmt::Display for CheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckError::Type(e) => e.fmt(f),
            CheckError::Range(e) => e.fmt(f),
        }
    }
}
impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckError::Type(e) => Some(e),
            CheckError::Range(e) => Some(e),
        }
    }
}

/// `{name, type?, range?, default?}` — describes what may flow through a
/// data port.
#[derive(Debug, Clone)]
pub struct ValueDescriptor {
    /// Port name this descriptor belongs to (used only for error messages).
    pub name: SmartString<LazyCompact>,
    /// Expected type tag, if any. No tag means any value is accepted.
    pub type_tag: Option<TypeTag>,
    /// Inclusive `(lo, hi)` range, if any.
    pub range: Option<(Value, Value)>,
    /// Default value substituted when no signal and no upstream cache is
    /// available (§4.1 `fetch_missing`).
    pub default: Option<Value>,
}

impl ValueDescriptor {
    /// An untyped, unranged, defaultless descriptor named `name`.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            type_tag: None,
            range: None,
            default: None,
        }
    }

    /// Set the type tag.
    pub fn with_type(mut self, tag: TypeTag) -> Self {
        self.type_tag = Some(tag);
        self
    }

    /// Set an inclusive range.
    pub fn with_range(mut self, lo: Value, hi: Value) -> Self {
        self.range = Some((lo, hi));
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Validate `value` against this descriptor's type and range.
    pub fn check(&self, value: &Value) -> Result<(), CheckError> {
        if let Some(tag) = &self.type_tag {
            let checkers = registry()
                .type_checkers
                .read()
                .expect("type checker registry poisoned");
            if let Some(checker) = checkers.get(tag) {
                if !checker(value) {
                    return Err(CheckError::Type(TypeCheckError {
                        port: self.name.clone(),
                        expected: tag.clone(),
                    }));
                }
            }
        }
        if let (Some(tag), Some((lo, hi))) = (&self.type_tag, &self.range) {
            let checkers = registry()
                .range_checkers
                .read()
                .expect("range checker registry poisoned");
            if let Some(checker) = checkers.get(tag) {
                if !checker(value, lo, hi) {
                    return Err(CheckError::Range(RangeCheckError {
                        port: self.name.clone(),
                    }));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_must_pass_its_own_descriptor() {
        let d = ValueDescriptor::new("a")
            .with_type(TypeTag::new("int"))
            .with_range(Value::Int(0), Value::Int(10))
            .with_default(Value::Int(5));
        assert!(d.check(d.default.as_ref().unwrap()).is_ok());
    }

    #[test]
    fn range_violation_is_rejected() {
        let d = ValueDescriptor::new("a")
            .with_type(TypeTag::new("int"))
            .with_range(Value::Int(0), Value::Int(10));
        assert!(matches!(
            d.check(&Value::Int(100)),
            Err(CheckError::Range(_))
        ));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let d = ValueDescriptor::new("a").with_type(TypeTag::new("int"));
        assert!(matches!(
            d.check(&Value::Str("x".into())),
            Err(CheckError::Type(_))
        ));
    }

    #[test]
    fn unregistered_type_always_passes() {
        let d = ValueDescriptor::new("a").with_type(TypeTag::new("widget"));
        assert!(d.check(&Value::Int(1)).is_ok());
    }
}
