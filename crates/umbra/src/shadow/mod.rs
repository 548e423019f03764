//! Shadow Classes
//!
//! A shadow class supplies fake behavior for one real class. It owns a state
//! type `S` (one value per real instance) and a table of handlers keyed by
//! method name and parameter types.
//!
//! ## Toyota Way Application
//!
//! - **Poka-Yoke**: duplicate declarations and mismatched shadow parents are
//!   rejected when the shadow class is built, not when a test calls them
//! - **Jidoka**: ambiguous overloads stop dispatch with an error instead of
//!   picking one silently
//!
//! ```ignore
//! #[derive(Default)]
//! struct ShadowView { width: i32 }
//!
//! let shadow = ShadowClass::builder::<ShadowView>("ShadowView", RealClass::of(&VIEW))
//!     .method("getWidth", &[], |s, _| Ok(Value::Int(s.width)))
//!     .method("setWidth", &[ParamType::INT], |s, inv| {
//!         s.width = inv.arg(0)?;
//!         Ok(Value::Void)
//!     })
//!     .build()?;
//! ```

mod instance;

pub use instance::ShadowInstance;

use crate::binder::Invocation;
use crate::class::RealClass;
use crate::result::{UmbraError, UmbraResult};
use crate::signature::{write_params, CONSTRUCTOR_HOOK, STATIC_INITIALIZER};
use crate::value::{ParamType, Value};
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handler bound to a shadow instance's state
pub type InstanceHandler =
    Arc<dyn Fn(&mut (dyn Any + Send), &Invocation<'_>) -> UmbraResult<Value> + Send + Sync>;

/// Handler with no shadow instance
pub type StaticHandler = Arc<dyn Fn(&Invocation<'_>) -> UmbraResult<Value> + Send + Sync>;

type StateFactory = Arc<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>;

static NEXT_SHADOW_CLASS_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a built shadow class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShadowClassId(u64);

impl ShadowClassId {
    fn next() -> Self {
        Self(NEXT_SHADOW_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Inclusive API-level range a shadow class or method applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SdkRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl SdkRange {
    /// Every API level
    pub const ALL: Self = Self {
        min: None,
        max: None,
    };

    #[must_use]
    pub const fn new(min: Option<u32>, max: Option<u32>) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn contains(self, level: u32) -> bool {
        self.min.map_or(true, |min| level >= min) && self.max.map_or(true, |max| level <= max)
    }

    #[must_use]
    pub fn overlaps(self, other: Self) -> bool {
        let lo = self.min.unwrap_or(0).max(other.min.unwrap_or(0));
        let hi = self.max.unwrap_or(u32::MAX).min(other.max.unwrap_or(u32::MAX));
        lo <= hi
    }
}

/// Declaration-level options, usually produced by `#[derive(Shadow)]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowOptions {
    /// Unshadowed methods run the real body (`true`) or do nothing (`false`)
    pub call_through_by_default: bool,
    pub min_sdk: Option<u32>,
    pub max_sdk: Option<u32>,
}

impl Default for ShadowOptions {
    fn default() -> Self {
        Self {
            call_through_by_default: true,
            min_sdk: None,
            max_sdk: None,
        }
    }
}

/// Shadow state types with static metadata
pub trait ShadowType: Any + Send + Default {
    /// Shadow class name
    fn shadow_name() -> &'static str;
    /// Real class this shadow applies to
    fn real_class() -> RealClass;
    fn options() -> ShadowOptions {
        ShadowOptions::default()
    }
}

/// Callable body of a shadow method
#[derive(Clone)]
pub enum MethodBody {
    /// Runs against the shadow instance's state
    Instance(InstanceHandler),
    /// Runs without a shadow instance
    Static(StaticHandler),
}

impl MethodBody {
    #[must_use]
    pub const fn is_static(&self) -> bool {
        matches!(self, Self::Static(_))
    }
}

impl fmt::Debug for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("MethodBody::Instance(..)"),
            Self::Static(_) => f.write_str("MethodBody::Static(..)"),
        }
    }
}

/// One declared shadow method
#[derive(Clone)]
pub struct ShadowMethod {
    name: String,
    params: Vec<ParamType>,
    body: MethodBody,
    sdk: SdkRange,
    declared_by: String,
}

impl ShadowMethod {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    #[must_use]
    pub const fn body(&self) -> &MethodBody {
        &self.body
    }

    #[must_use]
    pub const fn sdk(&self) -> SdkRange {
        self.sdk
    }

    /// Name of the shadow class that declared this method
    #[must_use]
    pub fn declared_by(&self) -> &str {
        &self.declared_by
    }
}

impl fmt::Display for ShadowMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.declared_by, self.name)?;
        write_params(f, &self.params)?;
        f.write_str(")")
    }
}

impl fmt::Debug for ShadowMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowMethod")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("static", &self.body.is_static())
            .field("sdk", &self.sdk)
            .field("declared_by", &self.declared_by)
            .finish()
    }
}

/// Methods declared by one shadow class in an inheritance chain
#[derive(Debug, Clone)]
pub struct ShadowLevel {
    shadow_name: String,
    methods: Vec<Arc<ShadowMethod>>,
}

impl ShadowLevel {
    #[must_use]
    pub fn shadow_name(&self) -> &str {
        &self.shadow_name
    }

    #[must_use]
    pub fn methods(&self) -> &[Arc<ShadowMethod>] {
        &self.methods
    }
}

/// A built, immutable shadow class
pub struct ShadowClass {
    id: ShadowClassId,
    name: String,
    shadows: RealClass,
    levels: Vec<ShadowLevel>,
    parent: Option<Arc<ShadowClass>>,
    factory: StateFactory,
    state_type: TypeId,
    state_type_name: &'static str,
    call_through_by_default: bool,
    sdk: SdkRange,
}

impl ShadowClass {
    /// Start declaring a shadow class with state `S`
    #[must_use]
    pub fn builder<S: Any + Send + Default>(
        name: impl Into<String>,
        shadows: RealClass,
    ) -> ShadowClassBuilder<S> {
        ShadowClassBuilder {
            name: name.into(),
            shadows,
            methods: Vec::new(),
            parent: None,
            factory: Arc::new(|| Box::<S>::default() as Box<dyn Any + Send>),
            call_through_by_default: true,
            sdk: SdkRange::ALL,
            pending_error: None,
            _state: PhantomData,
        }
    }

    /// Start declaring a shadow class from a [`ShadowType`]'s metadata
    #[must_use]
    pub fn of<S: ShadowType>() -> ShadowClassBuilder<S> {
        let options = S::options();
        Self::builder::<S>(S::shadow_name(), S::real_class())
            .call_through_by_default(options.call_through_by_default)
            .sdk(options.min_sdk, options.max_sdk)
    }

    #[must_use]
    pub const fn id(&self) -> ShadowClassId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Real class this shadow declares it shadows
    #[must_use]
    pub const fn shadows(&self) -> RealClass {
        self.shadows
    }

    /// Own methods first, then each shadow superclass's
    #[must_use]
    pub fn levels(&self) -> &[ShadowLevel] {
        &self.levels
    }

    /// Methods declared directly on this shadow class
    #[must_use]
    pub fn declared_methods(&self) -> &[Arc<ShadowMethod>] {
        self.levels.first().map(ShadowLevel::methods).unwrap_or_default()
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub const fn call_through_by_default(&self) -> bool {
        self.call_through_by_default
    }

    #[must_use]
    pub const fn sdk(&self) -> SdkRange {
        self.sdk
    }

    #[must_use]
    pub fn supports_sdk(&self, level: u32) -> bool {
        self.sdk.contains(level)
    }

    #[must_use]
    pub const fn state_type_name(&self) -> &'static str {
        self.state_type_name
    }

    /// Whether instances of this shadow class hold state of type `S`
    #[must_use]
    pub fn has_state<S: Any>(&self) -> bool {
        self.state_type == TypeId::of::<S>()
    }

    pub(crate) fn new_state(&self) -> Box<dyn Any + Send> {
        (self.factory)()
    }
}

impl fmt::Debug for ShadowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowClass")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("shadows", &self.shadows)
            .field("state", &self.state_type_name)
            .field("levels", &self.levels.len())
            .field("call_through_by_default", &self.call_through_by_default)
            .field("sdk", &self.sdk)
            .finish()
    }
}

impl fmt::Display for ShadowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (shadows {})", self.name, self.shadows)
    }
}

struct ParentLink {
    class: Arc<ShadowClass>,
    levels: Vec<ShadowLevel>,
}

/// Builder for [`ShadowClass`]
pub struct ShadowClassBuilder<S> {
    name: String,
    shadows: RealClass,
    methods: Vec<ShadowMethod>,
    parent: Option<ParentLink>,
    factory: StateFactory,
    call_through_by_default: bool,
    sdk: SdkRange,
    pending_error: Option<UmbraError>,
    _state: PhantomData<fn() -> S>,
}

fn wrap_instance<S, F>(f: F) -> InstanceHandler
where
    S: Any + Send,
    F: Fn(&mut S, &Invocation<'_>) -> UmbraResult<Value> + Send + Sync + 'static,
{
    Arc::new(move |state: &mut (dyn Any + Send), inv: &Invocation<'_>| {
        let state = state
            .downcast_mut::<S>()
            .ok_or_else(|| UmbraError::ShadowTypeMismatch {
                expected: type_name::<S>().to_string(),
                found: "another shadow state".to_string(),
            })?;
        f(state, inv)
    })
}

impl<S: Any + Send> ShadowClassBuilder<S> {
    fn push(mut self, name: impl Into<String>, params: &[ParamType], body: MethodBody, sdk: SdkRange) -> Self {
        self.methods.push(ShadowMethod {
            name: name.into(),
            params: params.to_vec(),
            body,
            sdk,
            declared_by: self.name.clone(),
        });
        self
    }

    /// Declare an instance method
    #[must_use]
    pub fn method<F>(self, name: impl Into<String>, params: &[ParamType], f: F) -> Self
    where
        F: Fn(&mut S, &Invocation<'_>) -> UmbraResult<Value> + Send + Sync + 'static,
    {
        self.push(name, params, MethodBody::Instance(wrap_instance(f)), SdkRange::ALL)
    }

    /// Declare an instance method applying only to an API-level range
    #[must_use]
    pub fn method_for_sdk<F>(
        self,
        name: impl Into<String>,
        params: &[ParamType],
        min: Option<u32>,
        max: Option<u32>,
        f: F,
    ) -> Self
    where
        F: Fn(&mut S, &Invocation<'_>) -> UmbraResult<Value> + Send + Sync + 'static,
    {
        self.push(name, params, MethodBody::Instance(wrap_instance(f)), SdkRange::new(min, max))
    }

    /// Declare a static method
    #[must_use]
    pub fn static_method<F>(self, name: impl Into<String>, params: &[ParamType], f: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> UmbraResult<Value> + Send + Sync + 'static,
    {
        self.push(name, params, MethodBody::Static(Arc::new(f)), SdkRange::ALL)
    }

    /// Observe construction with the given constructor parameters
    #[must_use]
    pub fn constructor<F>(self, params: &[ParamType], f: F) -> Self
    where
        F: Fn(&mut S, &Invocation<'_>) -> UmbraResult<Value> + Send + Sync + 'static,
    {
        self.method(CONSTRUCTOR_HOOK, params, f)
    }

    /// Run once per environment before the real class is first used
    #[must_use]
    pub fn static_initializer<F>(self, f: F) -> Self
    where
        F: Fn(&Invocation<'_>) -> UmbraResult<Value> + Send + Sync + 'static,
    {
        self.static_method(STATIC_INITIALIZER, &[], f)
    }

    /// Replace the default-state factory
    #[must_use]
    pub fn state_factory<F>(mut self, f: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.factory = Arc::new(move || Box::new(f()) as Box<dyn Any + Send>);
        self
    }

    #[must_use]
    pub fn call_through_by_default(mut self, call_through: bool) -> Self {
        self.call_through_by_default = call_through;
        self
    }

    /// Restrict the whole shadow class to an API-level range
    #[must_use]
    pub fn sdk(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.sdk = SdkRange::new(min, max);
        self
    }

    /// Inherit the methods of `parent`, whose state lives inside ours at
    /// `project(&mut S)`.
    #[must_use]
    pub fn extends<P: Any + Send>(mut self, parent: Arc<ShadowClass>, project: fn(&mut S) -> &mut P) -> Self {
        if !parent.has_state::<P>() {
            self.pending_error = Some(UmbraError::ShadowDefinition {
                shadow: self.name.clone(),
                message: format!(
                    "parent {} holds {}, not {}",
                    parent.name(),
                    parent.state_type_name(),
                    type_name::<P>()
                ),
            });
            return self;
        }
        let levels = parent
            .levels()
            .iter()
            .map(|level| ShadowLevel {
                shadow_name: level.shadow_name.clone(),
                methods: level
                    .methods
                    .iter()
                    .map(|m| Arc::new(project_method::<S, P>(m, project)))
                    .collect(),
            })
            .collect();
        self.parent = Some(ParentLink {
            class: parent,
            levels,
        });
        self
    }

    /// Validate and freeze the declaration
    pub fn build(self) -> UmbraResult<Arc<ShadowClass>> {
        if let Some(err) = self.pending_error {
            return Err(err);
        }
        if let Some(link) = &self.parent {
            if !self.shadows.is_subclass_of(link.class.shadows()) {
                return Err(UmbraError::ShadowDefinition {
                    shadow: self.name,
                    message: format!(
                        "parent {} shadows {}, which is not a superclass of {}",
                        link.class.name(),
                        link.class.shadows(),
                        self.shadows
                    ),
                });
            }
        }
        check_duplicates(&self.name, &self.methods)?;

        let own = ShadowLevel {
            shadow_name: self.name.clone(),
            methods: self.methods.into_iter().map(Arc::new).collect(),
        };
        let (parent, mut inherited) = match self.parent {
            Some(link) => (Some(link.class), link.levels),
            None => (None, Vec::new()),
        };
        let mut levels = Vec::with_capacity(inherited.len() + 1);
        levels.push(own);
        levels.append(&mut inherited);

        Ok(Arc::new(ShadowClass {
            id: ShadowClassId::next(),
            name: self.name,
            shadows: self.shadows,
            levels,
            parent,
            factory: self.factory,
            state_type: TypeId::of::<S>(),
            state_type_name: type_name::<S>(),
            call_through_by_default: self.call_through_by_default,
            sdk: self.sdk,
        }))
    }
}

impl<S> fmt::Debug for ShadowClassBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowClassBuilder")
            .field("name", &self.name)
            .field("shadows", &self.shadows)
            .field("methods", &self.methods.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

fn project_method<S: Any + Send, P: Any + Send>(
    method: &ShadowMethod,
    project: fn(&mut S) -> &mut P,
) -> ShadowMethod {
    let body = match &method.body {
        MethodBody::Static(h) => MethodBody::Static(Arc::clone(h)),
        MethodBody::Instance(h) => {
            let h = Arc::clone(h);
            MethodBody::Instance(Arc::new(
                move |state: &mut (dyn Any + Send), inv: &Invocation<'_>| {
                    let child = state.downcast_mut::<S>().ok_or_else(|| {
                        UmbraError::ShadowTypeMismatch {
                            expected: type_name::<S>().to_string(),
                            found: "another shadow state".to_string(),
                        }
                    })?;
                    h(project(child), inv)
                },
            ))
        }
    };
    ShadowMethod {
        body,
        ..method.clone()
    }
}

fn check_duplicates(shadow: &str, methods: &[ShadowMethod]) -> UmbraResult<()> {
    for (i, a) in methods.iter().enumerate() {
        for b in &methods[i + 1..] {
            if a.name == b.name && a.params == b.params && a.sdk.overlaps(b.sdk) {
                return Err(UmbraError::DuplicateBindingConflict {
                    shadow: shadow.to_string(),
                    method: a.to_string(),
                    candidates: vec![a.to_string(), b.to_string()],
                });
            }
        }
    }
    Ok(())
}
