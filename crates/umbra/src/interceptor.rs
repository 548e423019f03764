//! Method interceptors.
//!
//! Interceptors replace individual methods by `class#method` reference and
//! take precedence over shadow classes. They cover classes that never get a
//! shadow instance, the system clock being the standard example.
//!
//! A reference on a class also covers its subclasses, the same way
//! permissive unbound methods are matched.

use crate::binder::Invocation;
use crate::class::{RealClass, SYSTEM};
use crate::result::UmbraResult;
use crate::signature::MethodRef;
use crate::value::Value;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

/// Interceptor body
pub type InterceptHandler = Arc<dyn Fn(&Invocation<'_>) -> UmbraResult<Value> + Send + Sync>;

/// Registered interceptors, keyed by method reference
#[derive(Default)]
pub struct Interceptors {
    handlers: DashMap<MethodRef, InterceptHandler>,
}

impl Interceptors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any previous one
    pub fn register<F>(&self, method: MethodRef, handler: F) -> Option<InterceptHandler>
    where
        F: Fn(&Invocation<'_>) -> UmbraResult<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(method, Arc::new(handler))
    }

    pub fn remove(&self, method: &MethodRef) -> Option<InterceptHandler> {
        self.handlers.remove(method).map(|(_, handler)| handler)
    }

    /// Handler for `method` on `class` or its nearest ancestor with one.
    /// At each class an exact reference beats a wildcard.
    #[must_use]
    pub fn find(&self, class: RealClass, method: &str) -> Option<InterceptHandler> {
        if self.handlers.is_empty() {
            return None;
        }
        class.ancestors().find_map(|c| {
            self.handlers
                .get(&MethodRef::new(c.name(), method))
                .or_else(|| self.handlers.get(&MethodRef::all_methods(c)))
                .map(|handler| Arc::clone(handler.value()))
        })
    }

    /// Route `System.currentTimeMillis`/`nanoTime` to the main scheduler clock
    pub fn install_system_clock(&self) {
        let system = RealClass::of(&SYSTEM);
        self.register(MethodRef::new(system.name(), "currentTimeMillis"), |inv| {
            Ok(Value::Long(clock_ms(inv)))
        });
        self.register(MethodRef::new(system.name(), "nanoTime"), |inv| {
            Ok(Value::Long(clock_ms(inv).saturating_mul(1_000_000)))
        });
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn clock_ms(inv: &Invocation<'_>) -> i64 {
    i64::try_from(inv.main_scheduler().current_time_ms()).unwrap_or(i64::MAX)
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<String> = self.handlers.iter().map(|e| e.key().to_string()).collect();
        methods.sort();
        f.debug_struct("Interceptors").field("methods", &methods).finish()
    }
}
