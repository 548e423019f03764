//! Method keys and method references.

use crate::class::RealClass;
use crate::result::UmbraError;
use crate::value::ParamType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Shadow method name observing construction
pub const CONSTRUCTOR_HOOK: &str = "__constructor__";
/// Shadow method name run once per class before first use
pub const STATIC_INITIALIZER: &str = "__staticInitializer__";
pub const EQUALS: &str = "equals";
pub const HASH_CODE: &str = "hashCode";
pub const TO_STRING: &str = "toString";

/// Whether `name` is one of the identity methods every object carries
#[must_use]
pub fn is_identity_method(name: &str) -> bool {
    matches!(name, EQUALS | HASH_CODE | TO_STRING)
}

/// Immutable lookup key for an intercepted method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    declaring: RealClass,
    name: String,
    params: Vec<ParamType>,
}

impl MethodKey {
    #[must_use]
    pub fn new(declaring: RealClass, name: impl Into<String>, params: &[ParamType]) -> Self {
        Self {
            declaring,
            name: name.into(),
            params: params.to_vec(),
        }
    }

    #[must_use]
    pub const fn declaring(&self) -> RealClass {
        self.declaring
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}(", self.declaring, self.name)?;
        write_params(f, &self.params)?;
        f.write_str(")")
    }
}

pub(crate) fn write_params(f: &mut fmt::Formatter<'_>, params: &[ParamType]) -> fmt::Result {
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{p}")?;
    }
    Ok(())
}

/// Textual `class#method` reference used by interceptors and configuration.
///
/// A method of `*` matches every method of the class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MethodRef {
    class_name: String,
    method: String,
}

impl MethodRef {
    /// Wildcard method name
    pub const ANY_METHOD: &'static str = "*";

    #[must_use]
    pub fn new(class_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            method: method.into(),
        }
    }

    /// Reference to every method of `class`
    #[must_use]
    pub fn all_methods(class: RealClass) -> Self {
        Self::new(class.name(), Self::ANY_METHOD)
    }

    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.method == Self::ANY_METHOD
    }

    /// Whether this reference covers `method` on `class_name`
    #[must_use]
    pub fn matches(&self, class_name: &str, method: &str) -> bool {
        self.class_name == class_name && (self.is_wildcard() || self.method == method)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.method)
    }
}

impl FromStr for MethodRef {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class_name, method) = s
            .split_once('#')
            .ok_or_else(|| UmbraError::config(format!("method reference '{s}' is missing '#'")))?;
        if class_name.is_empty() || method.is_empty() || method.contains('#') {
            return Err(UmbraError::config(format!(
                "method reference '{s}' must look like 'pkg.Class#method'"
            )));
        }
        Ok(Self::new(class_name, method))
    }
}

impl TryFrom<String> for MethodRef {
    type Error = UmbraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MethodRef> for String {
    fn from(value: MethodRef) -> Self {
        value.to_string()
    }
}
