//! Dynamic values and parameter types crossing the interception boundary.
//!
//! Intercepted calls carry their arguments as [`Value`]s described by
//! [`ParamType`]s. Shadow method lookup compares the call's parameter types
//! against each declared shadow signature through
//! [`ParamType::conversion_cost`]: an exact match is free, boxing, widening
//! and loose matches cost progressively more, and the cheapest candidate
//! wins.

use crate::binder::RealObject;
use crate::class::{RealClass, OBJECT, STRING};
use crate::result::{UmbraError, UmbraResult};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Cost of an identical parameter type
pub const COST_EXACT: u32 = 0;
/// Cost of boxing or unboxing a primitive
pub const COST_BOXING: u32 = 1;
/// Cost of primitive widening or subclass-to-superclass conversion
pub const COST_WIDENING: u32 = 2;
/// Cost of unboxing followed by widening
pub const COST_UNBOX_WIDEN: u32 = 3;
/// Cost of matching a loose (`Any`) declaration
pub const COST_LOOSE: u32 = 4;

/// Primitive value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
}

impl Primitive {
    /// Source-level name (`int`, `long`, ...)
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    /// Name of the boxed wrapper class
    #[must_use]
    pub const fn boxed_name(self) -> &'static str {
        match self {
            Self::Boolean => "java.lang.Boolean",
            Self::Byte => "java.lang.Byte",
            Self::Char => "java.lang.Character",
            Self::Short => "java.lang.Short",
            Self::Int => "java.lang.Integer",
            Self::Long => "java.lang.Long",
            Self::Float => "java.lang.Float",
            Self::Double => "java.lang.Double",
        }
    }

    /// Whether a value of `self` converts to `target` by primitive widening
    #[must_use]
    pub const fn widens_to(self, target: Self) -> bool {
        use Primitive::{Byte, Char, Double, Float, Int, Long, Short};
        matches!(
            (self, target),
            (Byte, Short | Int | Long | Float | Double)
                | (Short | Char, Int | Long | Float | Double)
                | (Int, Long | Float | Double)
                | (Long, Float | Double)
                | (Float, Double)
        )
    }
}

/// Declared type of a method parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Unboxed primitive
    Primitive(Primitive),
    /// Boxed primitive wrapper
    Boxed(Primitive),
    /// `java.lang.String`
    Str,
    /// Reference to a real class
    Object(RealClass),
    /// Loose parameter matching anything
    Any,
}

impl ParamType {
    pub const BOOLEAN: Self = Self::Primitive(Primitive::Boolean);
    pub const BYTE: Self = Self::Primitive(Primitive::Byte);
    pub const CHAR: Self = Self::Primitive(Primitive::Char);
    pub const SHORT: Self = Self::Primitive(Primitive::Short);
    pub const INT: Self = Self::Primitive(Primitive::Int);
    pub const LONG: Self = Self::Primitive(Primitive::Long);
    pub const FLOAT: Self = Self::Primitive(Primitive::Float);
    pub const DOUBLE: Self = Self::Primitive(Primitive::Double);

    /// Cost of passing an argument of type `self` to a parameter declared
    /// as `declared`, or `None` if the argument is not assignable.
    #[must_use]
    pub fn conversion_cost(self, declared: Self) -> Option<u32> {
        if self == declared {
            return Some(COST_EXACT);
        }
        match (self, declared) {
            (_, Self::Any) => Some(COST_LOOSE),
            (Self::Primitive(a), Self::Boxed(b)) | (Self::Boxed(a), Self::Primitive(b))
                if a == b =>
            {
                Some(COST_BOXING)
            }
            (Self::Primitive(a), Self::Primitive(b)) if a.widens_to(b) => Some(COST_WIDENING),
            (Self::Object(a), Self::Object(b)) if a.is_subclass_of(b) => Some(COST_WIDENING),
            (Self::Str, Self::Object(b)) if RealClass::of(&STRING).is_subclass_of(b) => {
                Some(COST_WIDENING)
            }
            (Self::Boxed(_), Self::Object(b)) if b == RealClass::of(&OBJECT) => {
                Some(COST_WIDENING)
            }
            (Self::Boxed(a), Self::Primitive(b)) if a.widens_to(b) => Some(COST_UNBOX_WIDEN),
            _ => None,
        }
    }

    /// Total cost of passing `actual` arguments to `declared` parameters
    #[must_use]
    pub fn call_cost(actual: &[Self], declared: &[Self]) -> Option<u32> {
        if actual.len() != declared.len() {
            return None;
        }
        actual
            .iter()
            .zip(declared)
            .try_fold(0, |total, (a, d)| Some(total + a.conversion_cost(*d)?))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => f.write_str(p.name()),
            Self::Boxed(p) => f.write_str(p.boxed_name()),
            Self::Str => f.write_str(STRING.name()),
            Self::Object(class) => f.write_str(class.name()),
            Self::Any => f.write_str("?"),
        }
    }
}

/// Declared return type of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReturnType {
    #[default]
    Void,
    Value(ParamType),
}

/// A dynamic argument or return value
#[derive(Clone)]
pub enum Value {
    Void,
    Null,
    Boolean(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Object(RealObject),
    /// Host value with no platform counterpart
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Default value for a return type: `false`/zero for primitives,
    /// `Null` for references, `Void` for void.
    #[must_use]
    pub fn default_for(returns: ReturnType) -> Self {
        match returns {
            ReturnType::Void => Self::Void,
            ReturnType::Value(ParamType::Primitive(p)) => match p {
                Primitive::Boolean => Self::Boolean(false),
                Primitive::Byte => Self::Byte(0),
                Primitive::Char => Self::Char('\0'),
                Primitive::Short => Self::Short(0),
                Primitive::Int => Self::Int(0),
                Primitive::Long => Self::Long(0),
                Primitive::Float => Self::Float(0.0),
                Primitive::Double => Self::Double(0.0),
            },
            ReturnType::Value(_) => Self::Null,
        }
    }

    /// Wrap an arbitrary host value
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(Arc::new(value))
    }

    /// Name of the dynamic type, for error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Byte(_) => "byte",
            Self::Char(_) => "char",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Str(_) => "java.lang.String",
            Self::Object(obj) => obj.class().name(),
            Self::Opaque(_) => "opaque",
        }
    }

    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Extract a typed value
    pub fn get<T: FromValue>(&self) -> UmbraResult<T> {
        T::from_value(self)
    }

    /// Borrow the real object, if this is one
    #[must_use]
    pub const fn as_object(&self) -> Option<&RealObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Borrow an opaque host value of type `T`
    #[must_use]
    pub fn as_opaque<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Opaque(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => f.write_str("Void"),
            Self::Null => f.write_str("Null"),
            Self::Boolean(v) => write!(f, "Boolean({v})"),
            Self::Byte(v) => write!(f, "Byte({v})"),
            Self::Char(v) => write!(f, "Char({v:?})"),
            Self::Short(v) => write!(f, "Short({v})"),
            Self::Int(v) => write!(f, "Int({v})"),
            Self::Long(v) => write!(f, "Long({v})"),
            Self::Float(v) => write!(f, "Float({v})"),
            Self::Double(v) => write!(f, "Double({v})"),
            Self::Str(v) => write!(f, "Str({v:?})"),
            Self::Object(obj) => write!(f, "Object({obj})"),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Void, Self::Void) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Byte(a), Self::Byte(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Short(a), Self::Short(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

value_from! {
    bool => Boolean,
    i8 => Byte,
    char => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => Str,
    RealObject => Object,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Void
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Typed extraction from a [`Value`], applying primitive widening.
pub trait FromValue: Sized {
    /// Convert, failing with [`UmbraError::TypeMismatch`]
    fn from_value(value: &Value) -> UmbraResult<Self>;
}

fn mismatch<T>(expected: &str, value: &Value) -> UmbraResult<T> {
    Err(UmbraError::type_mismatch(expected, value.type_name()))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for () {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Void => Ok(()),
            other => mismatch("void", other),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Boolean(v) => Ok(*v),
            other => mismatch("boolean", other),
        }
    }
}

impl FromValue for char {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Char(v) => Ok(*v),
            other => mismatch("char", other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Byte(v) => Ok(Self::from(*v)),
            Value::Short(v) => Ok(Self::from(*v)),
            Value::Char(v) => Ok(*v as Self),
            Value::Int(v) => Ok(*v),
            other => mismatch("int", other),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Long(v) => Ok(*v),
            other => i32::from_value(other)
                .map(Self::from)
                .or_else(|_| mismatch("long", other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Float(v) => Ok(*v),
            Value::Long(v) => Ok(*v as Self),
            other => i32::from_value(other)
                .map(|v| v as Self)
                .or_else(|_| mismatch("float", other)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Double(v) => Ok(*v),
            other => f32::from_value(other)
                .map(Self::from)
                .or_else(|_| mismatch("double", other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Str(v) => Ok(v.clone()),
            other => mismatch("java.lang.String", other),
        }
    }
}

impl FromValue for RealObject {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Object(obj) => Ok(obj.clone()),
            other => mismatch("object", other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> UmbraResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::class::ClassInfo;

    static VIEW: ClassInfo = ClassInfo::extends("android.view.View", &OBJECT);
    static TEXT_VIEW: ClassInfo = ClassInfo::extends("android.widget.TextView", &VIEW);

    // =========================================================================
    // Conversion costs
    // =========================================================================

    #[test]
    fn test_exact_is_cheapest() {
        assert_eq!(ParamType::INT.conversion_cost(ParamType::INT), Some(0));
    }

    #[test]
    fn test_boxing_beats_widening() {
        let boxing = ParamType::INT.conversion_cost(ParamType::Boxed(Primitive::Int));
        let widening = ParamType::INT.conversion_cost(ParamType::LONG);
        assert!(boxing.unwrap() < widening.unwrap());
    }

    #[test]
    fn test_narrowing_rejected() {
        assert_eq!(ParamType::LONG.conversion_cost(ParamType::INT), None);
        assert_eq!(ParamType::BOOLEAN.conversion_cost(ParamType::INT), None);
        assert_eq!(ParamType::CHAR.conversion_cost(ParamType::SHORT), None);
    }

    #[test]
    fn test_unbox_then_widen() {
        let cost = ParamType::Boxed(Primitive::Int).conversion_cost(ParamType::DOUBLE);
        assert_eq!(cost, Some(COST_UNBOX_WIDEN));
    }

    #[test]
    fn test_object_subclass() {
        let tv = ParamType::Object(RealClass::of(&TEXT_VIEW));
        let view = ParamType::Object(RealClass::of(&VIEW));
        assert_eq!(tv.conversion_cost(view), Some(COST_WIDENING));
        assert_eq!(view.conversion_cost(tv), None);
        assert_eq!(
            ParamType::Str.conversion_cost(ParamType::Object(RealClass::object())),
            Some(COST_WIDENING)
        );
    }

    #[test]
    fn test_loose_matches_everything_last() {
        assert_eq!(ParamType::Str.conversion_cost(ParamType::Any), Some(COST_LOOSE));
        assert_eq!(ParamType::INT.conversion_cost(ParamType::Any), Some(COST_LOOSE));
    }

    #[test]
    fn test_call_cost_sums_and_checks_arity() {
        let actual = [ParamType::INT, ParamType::Str];
        assert_eq!(
            ParamType::call_cost(&actual, &[ParamType::LONG, ParamType::Any]),
            Some(COST_WIDENING + COST_LOOSE)
        );
        assert_eq!(ParamType::call_cost(&actual, &[ParamType::INT]), None);
        assert_eq!(ParamType::call_cost(&[], &[]), Some(0));
    }

    #[test]
    fn test_display() {
        assert_eq!(ParamType::Boxed(Primitive::Char).to_string(), "java.lang.Character");
        assert_eq!(ParamType::Str.to_string(), "java.lang.String");
        assert_eq!(
            ParamType::Object(RealClass::of(&VIEW)).to_string(),
            "android.view.View"
        );
    }

    // =========================================================================
    // Values
    // =========================================================================

    #[test]
    fn test_default_for() {
        assert_eq!(Value::default_for(ReturnType::Void), Value::Void);
        assert_eq!(
            Value::default_for(ReturnType::Value(ParamType::BOOLEAN)),
            Value::Boolean(false)
        );
        assert_eq!(Value::default_for(ReturnType::Value(ParamType::LONG)), Value::Long(0));
        assert_eq!(Value::default_for(ReturnType::Value(ParamType::Str)), Value::Null);
    }

    #[test]
    fn test_from_value_widens() {
        assert_eq!(Value::Short(3).get::<i64>().unwrap(), 3);
        assert_eq!(Value::Int(2).get::<f64>().unwrap(), 2.0);
        assert_eq!(Value::Char('A').get::<i32>().unwrap(), 65);
        assert!(Value::Long(1).get::<i32>().is_err());
    }

    #[test]
    fn test_from_value_mismatch_names_types() {
        let err = Value::Str("x".into()).get::<bool>().unwrap_err();
        assert_eq!(err.to_string(), "Type mismatch: expected boolean, found java.lang.String");
    }

    #[test]
    fn test_option_maps_null() {
        assert_eq!(Value::Null.get::<Option<String>>().unwrap(), None);
        assert_eq!(
            Value::from("hi").get::<Option<String>>().unwrap(),
            Some("hi".to_string())
        );
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_opaque_identity() {
        let a = Value::opaque(vec![1u8, 2]);
        let b = a.clone();
        assert_eq!(a, b);
        assert_ne!(a, Value::opaque(vec![1u8, 2]));
        assert_eq!(a.as_opaque::<Vec<u8>>().unwrap(), &vec![1, 2]);
    }
}
