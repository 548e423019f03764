//! Real class descriptors.
//!
//! Real classes are declared as `static` [`ClassInfo`] values so that the
//! inheritance chain is known at compile time and walking it never allocates.
//!
//! ```ignore
//! static VIEW: ClassInfo = ClassInfo::extends("android.view.View", &OBJECT);
//! static TEXT_VIEW: ClassInfo = ClassInfo::extends("android.widget.TextView", &VIEW);
//!
//! assert!(RealClass::of(&TEXT_VIEW).is_subclass_of(RealClass::of(&VIEW)));
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Root of every real class hierarchy
pub static OBJECT: ClassInfo = ClassInfo::root("java.lang.Object");

/// String class, used by [`crate::ParamType::Str`] conversions
pub static STRING: ClassInfo = ClassInfo::extends("java.lang.String", &OBJECT);

/// System class, target of the built-in clock interceptors
pub static SYSTEM: ClassInfo = ClassInfo::extends("java.lang.System", &OBJECT);

/// Static description of a real class and its superclass
#[derive(Debug)]
pub struct ClassInfo {
    name: &'static str,
    parent: Option<&'static ClassInfo>,
}

impl ClassInfo {
    /// Declare a class with no superclass
    #[must_use]
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Declare a class extending `parent`
    #[must_use]
    pub const fn extends(name: &'static str, parent: &'static ClassInfo) -> Self {
        Self {
            name,
            parent: Some(parent),
        }
    }

    /// Fully qualified class name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// Copyable handle to a real class.
///
/// Identity is the fully qualified name.
#[derive(Clone, Copy)]
pub struct RealClass(&'static ClassInfo);

impl RealClass {
    /// Handle for a declared class
    #[must_use]
    pub const fn of(info: &'static ClassInfo) -> Self {
        Self(info)
    }

    /// Handle for `java.lang.Object`
    #[must_use]
    pub fn object() -> Self {
        Self(&OBJECT)
    }

    /// Fully qualified class name
    #[must_use]
    pub const fn name(self) -> &'static str {
        self.0.name
    }

    /// Simple name (after the last `.`)
    #[must_use]
    pub fn simple_name(self) -> &'static str {
        self.0.name.rsplit('.').next().unwrap_or(self.0.name)
    }

    /// Direct superclass
    #[must_use]
    pub fn parent(self) -> Option<Self> {
        self.0.parent.map(Self)
    }

    /// This class followed by each superclass up to the root
    pub fn ancestors(self) -> Ancestors {
        Ancestors { next: Some(self) }
    }

    /// Whether `self` is `other` or inherits from it
    #[must_use]
    pub fn is_subclass_of(self, other: Self) -> bool {
        self.ancestors().any(|c| c == other)
    }

    /// Number of superclasses above this class
    #[must_use]
    pub fn depth(self) -> usize {
        self.ancestors().count() - 1
    }
}

impl PartialEq for RealClass {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0) || self.0.name == other.0.name
    }
}

impl Eq for RealClass {}

impl Hash for RealClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.name.hash(state);
    }
}

impl PartialOrd for RealClass {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RealClass {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.name.cmp(other.0.name)
    }
}

impl fmt::Debug for RealClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RealClass({})", self.0.name)
    }
}

impl fmt::Display for RealClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.name)
    }
}

/// Iterator over a class and its superclasses
#[derive(Debug, Clone)]
pub struct Ancestors {
    next: Option<RealClass>,
}

impl Iterator for Ancestors {
    type Item = RealClass;

    fn next(&mut self) -> Option<RealClass> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}
