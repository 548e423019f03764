//! Instance Binder / Interception Layer
//!
//! Real objects route every intercepted method through [`RealObject::invoke`]
//! (or [`RealObject::invoke_or`] when the call site has a real body to fall
//! back to). Dispatch order:
//!
//! 1. method interceptors registered for `class#method`
//! 2. the shadow class captured when the object was constructed, via the
//!    resolution cache
//! 3. the fallback body, the identity default for `equals`/`hashCode`/
//!    `toString`, or the permissive default, else `UnboundShadowMethod`
//!
//! `PartialEq`, `Hash` and `Display` on [`RealObject`] are identity-based and
//! never intercepted.

use crate::class::RealClass;
use crate::environment::ShadowEnvironment;
use crate::resolution::ResolvedTarget;
use crate::result::{UmbraError, UmbraResult};
use crate::scheduler::{ContextId, Scheduler};
use crate::shadow::{MethodBody, ShadowClass, ShadowInstance};
use crate::signature::{is_identity_method, MethodKey, EQUALS, HASH_CODE, TO_STRING};
use crate::value::{FromValue, ParamType, ReturnType, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// Identity of a real instance within an environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub(crate) u64);

impl InstanceId {
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

pub(crate) struct RealObjectInner {
    id: InstanceId,
    class: RealClass,
    env: ShadowEnvironment,
    shadow_class: Option<Arc<ShadowClass>>,
    shadow: OnceLock<Arc<ShadowInstance>>,
}

/// Handle to a real instance living in a [`ShadowEnvironment`]
#[derive(Clone)]
pub struct RealObject(Arc<RealObjectInner>);

impl RealObject {
    pub(crate) fn new(
        id: InstanceId,
        class: RealClass,
        env: ShadowEnvironment,
        shadow_class: Option<Arc<ShadowClass>>,
    ) -> Self {
        Self(Arc::new(RealObjectInner {
            id,
            class,
            env,
            shadow_class,
            shadow: OnceLock::new(),
        }))
    }

    pub(crate) const fn from_inner(inner: Arc<RealObjectInner>) -> Self {
        Self(inner)
    }

    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.0.id
    }

    #[must_use]
    pub fn class(&self) -> RealClass {
        self.0.class
    }

    #[must_use]
    pub fn env(&self) -> &ShadowEnvironment {
        &self.0.env
    }

    /// Shadow class bound when this instance was constructed
    #[must_use]
    pub fn shadow_class(&self) -> Option<&Arc<ShadowClass>> {
        self.0.shadow_class.as_ref()
    }

    /// The shadow instance for this object, created on first access
    pub fn shadow(&self) -> UmbraResult<Arc<ShadowInstance>> {
        let class = self
            .0
            .shadow_class
            .as_ref()
            .ok_or_else(|| UmbraError::NoShadowBound {
                class: self.0.class.name().to_string(),
            })?;
        let shadow = self.0.shadow.get_or_init(|| {
            trace!(class = %self.0.class, shadow = class.name(), id = %self.0.id, "creating shadow instance");
            Arc::new(ShadowInstance::new(
                Arc::clone(class),
                self.0.id,
                Arc::downgrade(&self.0),
            ))
        });
        Ok(Arc::clone(shadow))
    }

    /// Run `f` against this object's typed shadow state
    pub fn with_shadow<S: std::any::Any, R>(&self, f: impl FnOnce(&mut S) -> R) -> UmbraResult<R> {
        self.shadow()?.with(f)
    }

    /// Invoke an intercepted method with no real body
    pub fn invoke(&self, call: &Call) -> UmbraResult<Value> {
        self.dispatch(call, None::<fn() -> UmbraResult<Value>>)
    }

    /// Invoke an intercepted method, running `real` if no shadow handles it
    pub fn invoke_or<F>(&self, call: &Call, real: F) -> UmbraResult<Value>
    where
        F: FnOnce() -> UmbraResult<Value>,
    {
        self.dispatch(call, Some(real))
    }

    /// Invoke and extract a typed result
    pub fn call<T: FromValue>(&self, call: &Call) -> UmbraResult<T> {
        self.invoke(call)?.get()
    }

    /// Shadowable `equals`, defaulting to identity
    pub fn equals(&self, other: &Value) -> UmbraResult<bool> {
        let call = Call::new(EQUALS)
            .arg(ParamType::Object(RealClass::object()), other.clone())
            .returning(ParamType::BOOLEAN);
        let identity = other.as_object().is_some_and(|o| o == self);
        self.dispatch(&call, Some(|| Ok(Value::Boolean(identity))))?
            .get()
    }

    /// Shadowable `hashCode`, defaulting to an identity hash
    pub fn hash_code(&self) -> UmbraResult<i32> {
        let call = Call::new(HASH_CODE).returning(ParamType::INT);
        let identity = self.identity_hash();
        self.dispatch(&call, Some(|| Ok(Value::Int(identity))))?
            .get()
    }

    /// Shadowable `toString`, defaulting to `Class@id`
    pub fn string_repr(&self) -> UmbraResult<String> {
        let call = Call::new(TO_STRING).returning(ParamType::Str);
        let identity = self.to_string();
        self.dispatch(&call, Some(|| Ok(Value::Str(identity))))?
            .get()
    }

    fn identity_hash(&self) -> i32 {
        let id = self.0.id.0;
        (id ^ (id >> 32)) as i32
    }

    fn dispatch<F>(&self, call: &Call, real: Option<F>) -> UmbraResult<Value>
    where
        F: FnOnce() -> UmbraResult<Value>,
    {
        let env = &self.0.env;
        let inv = Invocation {
            call,
            this: Some(self),
            declaring: self.0.class,
            env,
        };
        if let Some(handler) = env.interceptors().find(self.0.class, call.name()) {
            return handler(&inv);
        }
        let target = match &self.0.shadow_class {
            Some(shadow) => env.resolution_cache().resolve(
                shadow,
                &call.key(self.0.class),
                env.api_level(),
            )?,
            None => ResolvedTarget::CallReal,
        };
        match target {
            ResolvedTarget::Shadow(method) => match method.body() {
                MethodBody::Instance(handler) => {
                    self.shadow()?.run(call.name(), |state| handler(state, &inv))
                }
                MethodBody::Static(handler) => handler(&inv),
            },
            ResolvedTarget::DoNothing if !is_identity_method(call.name()) => {
                Ok(Value::default_for(call.returns()))
            }
            ResolvedTarget::DoNothing | ResolvedTarget::CallReal => {
                env.call_real(self.0.class, call, real)
            }
        }
    }
}

impl PartialEq for RealObject {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for RealObject {}

impl Hash for RealObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for RealObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealObject")
            .field("id", &self.0.id)
            .field("class", &self.0.class)
            .field("shadow", &self.0.shadow_class.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}

impl fmt::Display for RealObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.0.class.name(), self.0.id)
    }
}

/// Description of one intercepted call
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    name: String,
    params: Vec<ParamType>,
    args: Vec<Value>,
    returns: ReturnType,
}

impl Call {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            args: Vec::new(),
            returns: ReturnType::Void,
        }
    }

    /// Constructor call; the name is ignored by construction
    #[must_use]
    pub fn constructor() -> Self {
        Self::new(crate::signature::CONSTRUCTOR_HOOK)
    }

    /// Append an argument with its declared parameter type
    #[must_use]
    pub fn arg(mut self, param: ParamType, value: impl Into<Value>) -> Self {
        self.params.push(param);
        self.args.push(value.into());
        self
    }

    #[must_use]
    pub fn boolean(self, value: bool) -> Self {
        self.arg(ParamType::BOOLEAN, value)
    }

    #[must_use]
    pub fn int(self, value: i32) -> Self {
        self.arg(ParamType::INT, value)
    }

    #[must_use]
    pub fn long(self, value: i64) -> Self {
        self.arg(ParamType::LONG, value)
    }

    #[must_use]
    pub fn double(self, value: f64) -> Self {
        self.arg(ParamType::DOUBLE, value)
    }

    #[must_use]
    pub fn str(self, value: impl Into<String>) -> Self {
        self.arg(ParamType::Str, Value::Str(value.into()))
    }

    /// Append a real-object argument typed as its own class
    #[must_use]
    pub fn object(self, value: &RealObject) -> Self {
        self.arg(ParamType::Object(value.class()), value.clone())
    }

    #[must_use]
    pub const fn returns_type(mut self, returns: ReturnType) -> Self {
        self.returns = returns;
        self
    }

    #[must_use]
    pub const fn returning(self, param: ParamType) -> Self {
        self.returns_type(ReturnType::Value(param))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    #[must_use]
    pub const fn returns(&self) -> ReturnType {
        self.returns
    }

    /// Lookup key for this call on `declaring`
    #[must_use]
    pub fn key(&self, declaring: RealClass) -> MethodKey {
        MethodKey::new(declaring, self.name.as_str(), &self.params)
    }
}

/// What a shadow handler sees of the call it is handling
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub(crate) call: &'a Call,
    pub(crate) this: Option<&'a RealObject>,
    pub(crate) declaring: RealClass,
    pub(crate) env: &'a ShadowEnvironment,
}

impl<'a> Invocation<'a> {
    #[must_use]
    pub const fn call(&self) -> &'a Call {
        self.call
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        self.call.name()
    }

    #[must_use]
    pub fn args(&self) -> &'a [Value] {
        self.call.args()
    }

    /// Typed argument at `index`
    pub fn arg<T: FromValue>(&self, index: usize) -> UmbraResult<T> {
        let value = self.call.args().get(index).ok_or_else(|| {
            UmbraError::type_mismatch(format!("argument {index}"), "missing argument")
        })?;
        T::from_value(value)
    }

    /// Receiver, `None` for static calls
    #[must_use]
    pub const fn this(&self) -> Option<&'a RealObject> {
        self.this
    }

    /// Class the call was made against
    #[must_use]
    pub const fn declaring(&self) -> RealClass {
        self.declaring
    }

    #[must_use]
    pub const fn env(&self) -> &'a ShadowEnvironment {
        self.env
    }

    /// Scheduler for `context` in the calling environment
    #[must_use]
    pub fn scheduler(&self, context: impl Into<ContextId>) -> Arc<Scheduler> {
        self.env.get_scheduler(context)
    }

    #[must_use]
    pub fn main_scheduler(&self) -> Arc<Scheduler> {
        self.env.main_scheduler()
    }
}
