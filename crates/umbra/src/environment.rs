//! Shadow Environment
//!
//! Owns every piece of sandbox state: bindings, the resolution cache,
//! interceptors and schedulers. Nothing is global; a test builds (or is
//! handed) an environment and either calls it directly or enters it on the
//! current thread so the free functions below can find it.
//!
//! ```ignore
//! let env = ShadowEnvironment::builder()
//!     .bind_default(RealClass::of(&VIEW), shadow_view)
//!     .build()?;
//! let _guard = env.enter();
//!
//! umbra::pause()?;
//! let view = env.new_instance(RealClass::of(&VIEW))?;
//! view.invoke(&Call::new("post").arg(ParamType::Any, Value::opaque(task)))?;
//! umbra::idle()?;
//! ```

use crate::binder::{Call, InstanceId, Invocation, RealObject};
use crate::class::RealClass;
use crate::config::SandboxConfig;
use crate::interceptor::Interceptors;
use crate::registry::ShadowRegistry;
use crate::resolution::{ResolutionCache, ResolvedTarget};
use crate::result::{UmbraError, UmbraResult};
use crate::scheduler::{ContextId, Scheduler, SchedulerRegistry};
use crate::shadow::{MethodBody, ShadowClass, ShadowInstance};
use crate::signature::{MethodKey, MethodRef, CONSTRUCTOR_HOOK, STATIC_INITIALIZER};
use crate::value::Value;
use dashmap::DashSet;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

thread_local! {
    static CURRENT: RefCell<Vec<ShadowEnvironment>> = const { RefCell::new(Vec::new()) };
}

struct EnvironmentInner {
    config: SandboxConfig,
    registry: ShadowRegistry,
    cache: ResolutionCache,
    interceptors: Interceptors,
    schedulers: SchedulerRegistry,
    next_instance: AtomicU64,
    initialized: DashSet<RealClass>,
}

/// Cheaply clonable handle to one sandbox
#[derive(Clone)]
pub struct ShadowEnvironment {
    inner: Arc<EnvironmentInner>,
}

/// Builder for [`ShadowEnvironment`]
#[derive(Debug, Default)]
pub struct EnvironmentBuilder {
    config: SandboxConfig,
    defaults: Vec<(RealClass, Arc<ShadowClass>)>,
}

impl EnvironmentBuilder {
    #[must_use]
    pub fn config(mut self, config: SandboxConfig) -> Self {
        self.config = config;
        self
    }

    /// Binding present at build and restored by every reset
    #[must_use]
    pub fn bind_default(mut self, real: RealClass, shadow: Arc<ShadowClass>) -> Self {
        self.defaults.push((real, shadow));
        self
    }

    /// Default binding of `shadow` to the class it declares
    #[must_use]
    pub fn shadow(self, shadow: Arc<ShadowClass>) -> Self {
        let real = shadow.shadows();
        self.bind_default(real, shadow)
    }

    pub fn build(self) -> UmbraResult<ShadowEnvironment> {
        self.config.validate()?;
        let registry = ShadowRegistry::with_defaults(self.config.api_level, self.defaults)?;
        Ok(ShadowEnvironment::assemble(self.config, registry))
    }
}

impl ShadowEnvironment {
    /// Environment with the default configuration and no bindings
    #[must_use]
    pub fn new() -> Self {
        let config = SandboxConfig::default();
        let registry = ShadowRegistry::new(config.api_level);
        Self::assemble(config, registry)
    }

    fn assemble(config: SandboxConfig, registry: ShadowRegistry) -> Self {
        let schedulers =
            SchedulerRegistry::with_contexts(&config.context_ids(), config.max_tasks_per_drain);
        let interceptors = Interceptors::new();
        if config.install_default_interceptors {
            interceptors.install_system_clock();
        }
        debug!(
            api_level = config.api_level,
            bindings = registry.len(),
            "shadow environment built"
        );
        Self {
            inner: Arc::new(EnvironmentInner {
                config,
                registry,
                cache: ResolutionCache::new(),
                interceptors,
                schedulers,
                next_instance: AtomicU64::new(1),
                initialized: DashSet::new(),
            }),
        }
    }

    pub fn with_config(config: SandboxConfig) -> UmbraResult<Self> {
        Self::builder().config(config).build()
    }

    #[must_use]
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn api_level(&self) -> u32 {
        self.inner.config.api_level
    }

    #[must_use]
    pub fn registry(&self) -> &ShadowRegistry {
        &self.inner.registry
    }

    #[must_use]
    pub fn resolution_cache(&self) -> &ResolutionCache {
        &self.inner.cache
    }

    #[must_use]
    pub fn interceptors(&self) -> &Interceptors {
        &self.inner.interceptors
    }

    #[must_use]
    pub fn schedulers(&self) -> &SchedulerRegistry {
        &self.inner.schedulers
    }

    /// Whether both handles refer to the same environment
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Bindings
    // =========================================================================

    /// Bind `shadow` to `real` for instances constructed from now on
    pub fn bind_shadow_class(
        &self,
        real: RealClass,
        shadow: Arc<ShadowClass>,
    ) -> UmbraResult<Option<Arc<ShadowClass>>> {
        let previous = self.inner.registry.bind(real, shadow)?;
        self.inner.cache.invalidate_class(real);
        Ok(previous)
    }

    /// Bind `shadow` to the class it declares
    pub fn bind_shadow(&self, shadow: Arc<ShadowClass>) -> UmbraResult<Option<Arc<ShadowClass>>> {
        self.bind_shadow_class(shadow.shadows(), shadow)
    }

    pub fn unbind_shadow_class(&self, real: RealClass) -> Option<Arc<ShadowClass>> {
        let previous = self.inner.registry.unbind(real);
        self.inner.cache.invalidate_class(real);
        previous
    }

    /// The shadow instance of `real`
    pub fn shadow_of(&self, real: &RealObject) -> UmbraResult<Arc<ShadowInstance>> {
        real.shadow()
    }

    /// Register a method interceptor
    pub fn intercept<F>(&self, method: MethodRef, handler: F)
    where
        F: Fn(&Invocation<'_>) -> UmbraResult<Value> + Send + Sync + 'static,
    {
        self.inner.interceptors.register(method, handler);
    }

    // =========================================================================
    // Construction and static calls
    // =========================================================================

    /// Construct a real instance of `class` with the given constructor
    /// arguments, capturing the current binding and running the shadow's
    /// `__constructor__` hook if it declares a matching one.
    pub fn construct(&self, class: RealClass, args: &Call) -> UmbraResult<RealObject> {
        self.ensure_initialized(class)?;
        let shadow_class = self.inner.registry.resolve(class);
        let id = InstanceId(self.inner.next_instance.fetch_add(1, Ordering::Relaxed));
        let object = RealObject::new(id, class, self.clone(), shadow_class.clone());

        if let Some(shadow) = shadow_class {
            let key = MethodKey::new(class, CONSTRUCTOR_HOOK, args.params());
            if let ResolvedTarget::Shadow(method) =
                self.inner.cache.resolve(&shadow, &key, self.api_level())?
            {
                let inv = Invocation {
                    call: args,
                    this: Some(&object),
                    declaring: class,
                    env: self,
                };
                match method.body() {
                    MethodBody::Instance(handler) => {
                        object
                            .shadow()?
                            .run(CONSTRUCTOR_HOOK, |state| handler(state, &inv))?;
                    }
                    MethodBody::Static(handler) => {
                        handler(&inv)?;
                    }
                }
            }
        }
        Ok(object)
    }

    /// Construct with the no-argument constructor
    pub fn new_instance(&self, class: RealClass) -> UmbraResult<RealObject> {
        self.construct(class, &Call::constructor())
    }

    /// Invoke a static method with no real body
    pub fn invoke_static(&self, class: RealClass, call: &Call) -> UmbraResult<Value> {
        self.dispatch_static(class, call, None::<fn() -> UmbraResult<Value>>)
    }

    /// Invoke a static method, running `real` if no shadow handles it
    pub fn invoke_static_or<F>(&self, class: RealClass, call: &Call, real: F) -> UmbraResult<Value>
    where
        F: FnOnce() -> UmbraResult<Value>,
    {
        self.dispatch_static(class, call, Some(real))
    }

    fn dispatch_static<F>(&self, class: RealClass, call: &Call, real: Option<F>) -> UmbraResult<Value>
    where
        F: FnOnce() -> UmbraResult<Value>,
    {
        let inv = Invocation {
            call,
            this: None,
            declaring: class,
            env: self,
        };
        if let Some(handler) = self.inner.interceptors.find(class, call.name()) {
            return handler(&inv);
        }
        self.ensure_initialized(class)?;
        let target = match self.inner.registry.resolve(class) {
            Some(shadow) => self
                .inner
                .cache
                .resolve(&shadow, &call.key(class), self.api_level())?,
            None => ResolvedTarget::CallReal,
        };
        match target {
            ResolvedTarget::Shadow(method) => match method.body() {
                MethodBody::Static(handler) => handler(&inv),
                MethodBody::Instance(_) => Err(UmbraError::StaticShadowMismatch {
                    method: call.key(class).to_string(),
                }),
            },
            ResolvedTarget::DoNothing => Ok(Value::default_for(call.returns())),
            ResolvedTarget::CallReal => self.call_real(class, call, real),
        }
    }

    /// Run `real`, or apply the unbound policy when there is none
    pub(crate) fn call_real<F>(&self, class: RealClass, call: &Call, real: Option<F>) -> UmbraResult<Value>
    where
        F: FnOnce() -> UmbraResult<Value>,
    {
        if let Some(real) = real {
            return real();
        }
        if self.inner.config.permits_unbound(class, call.name()) {
            warn!(class = %class, method = call.name(), "unbound method returning default");
            return Ok(Value::default_for(call.returns()));
        }
        Err(UmbraError::UnboundShadowMethod {
            method: call.key(class).to_string(),
        })
    }

    /// Run static initializer hooks for `class` and its superclasses, root
    /// first, once per environment
    fn ensure_initialized(&self, class: RealClass) -> UmbraResult<()> {
        if self.inner.initialized.contains(&class) {
            return Ok(());
        }
        let mut chain: Vec<RealClass> = class.ancestors().collect();
        chain.reverse();
        for c in chain {
            if !self.inner.initialized.insert(c) {
                continue;
            }
            let Some(shadow) = self.inner.registry.resolve(c) else {
                continue;
            };
            if shadow.shadows() != c {
                continue;
            }
            // Marked before running so an initializer that touches its own
            // class does not recurse; unmarked again if it fails
            if let Err(err) = self.run_static_initializer(&shadow, c) {
                self.inner.initialized.remove(&c);
                return Err(err);
            }
        }
        Ok(())
    }

    fn run_static_initializer(&self, shadow: &Arc<ShadowClass>, class: RealClass) -> UmbraResult<()> {
        let key = MethodKey::new(class, STATIC_INITIALIZER, &[]);
        if let ResolvedTarget::Shadow(method) =
            self.inner.cache.resolve(shadow, &key, self.api_level())?
        {
            if let MethodBody::Static(handler) = method.body() {
                debug!(class = %class, shadow = shadow.name(), "running static initializer");
                let call = Call::new(STATIC_INITIALIZER);
                handler(&Invocation {
                    call: &call,
                    this: None,
                    declaring: class,
                    env: self,
                })?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Schedulers
    // =========================================================================

    /// Scheduler for `context`, shared by every caller
    pub fn get_scheduler(&self, context: impl Into<ContextId>) -> Arc<Scheduler> {
        self.inner.schedulers.get_scheduler(context)
    }

    #[must_use]
    pub fn main_scheduler(&self) -> Arc<Scheduler> {
        self.inner.schedulers.main()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restore default bindings and interceptors, clear caches and reset
    /// every scheduler
    pub fn reset(&self) {
        self.inner.registry.reset();
        self.inner.cache.clear();
        self.inner.interceptors.clear();
        if self.inner.config.install_default_interceptors {
            self.inner.interceptors.install_system_clock();
        }
        self.inner.schedulers.reset_all();
        self.inner.initialized.clear();
        debug!("shadow environment reset");
    }

    /// Make this the current environment on this thread until the guard drops
    #[must_use]
    pub fn enter(&self) -> EnvironmentGuard {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        EnvironmentGuard {
            _not_send: PhantomData,
        }
    }

    /// The environment most recently entered on this thread
    pub fn current() -> UmbraResult<Self> {
        CURRENT
            .with(|stack| stack.borrow().last().cloned())
            .ok_or(UmbraError::NoActiveEnvironment)
    }
}

impl Default for ShadowEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ShadowEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowEnvironment")
            .field("api_level", &self.api_level())
            .field("registry", &self.inner.registry)
            .field("cache", &self.inner.cache)
            .field("schedulers", &self.inner.schedulers)
            .finish()
    }
}

/// Keeps an environment current on this thread
#[derive(Debug)]
pub struct EnvironmentGuard {
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

// =============================================================================
// Free functions over the current environment
// =============================================================================

/// The shadow instance of `real`
pub fn shadow_of(real: &RealObject) -> UmbraResult<Arc<ShadowInstance>> {
    real.shadow()
}

/// Bind `shadow` to `real` in the current environment
pub fn bind_shadow_class(
    real: RealClass,
    shadow: Arc<ShadowClass>,
) -> UmbraResult<Option<Arc<ShadowClass>>> {
    ShadowEnvironment::current()?.bind_shadow_class(real, shadow)
}

/// Scheduler for `context` in the current environment
pub fn get_scheduler(context: impl Into<ContextId>) -> UmbraResult<Arc<Scheduler>> {
    Ok(ShadowEnvironment::current()?.get_scheduler(context))
}

/// Main scheduler of the current environment
pub fn main_scheduler() -> UmbraResult<Arc<Scheduler>> {
    Ok(ShadowEnvironment::current()?.main_scheduler())
}

/// Pause the main scheduler
pub fn pause() -> UmbraResult<()> {
    main_scheduler()?.pause();
    Ok(())
}

/// Unpause the main scheduler, draining due tasks
pub fn unpause() -> UmbraResult<usize> {
    main_scheduler()?.unpause()
}

/// Run every due main-scheduler task
pub fn idle() -> UmbraResult<usize> {
    main_scheduler()?.idle()
}

/// Advance the main scheduler's clock
pub fn advance_by(delta: Duration) -> UmbraResult<usize> {
    main_scheduler()?.advance_by(delta)
}

/// Run the next main-scheduler task
pub fn run_one_task() -> UmbraResult<bool> {
    main_scheduler()?.run_one_task()
}

/// Run every queued main-scheduler task
pub fn run_to_end_of_tasks() -> UmbraResult<usize> {
    main_scheduler()?.run_to_end_of_tasks()
}
