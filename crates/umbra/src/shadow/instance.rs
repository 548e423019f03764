//! Per-object shadow state.

use super::ShadowClass;
use crate::binder::{InstanceId, RealObject, RealObjectInner};
use crate::result::{UmbraError, UmbraResult};
use crate::value::Value;
use std::any::{type_name, Any};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

thread_local! {
    /// Addresses of the shadow instances currently running on this thread
    static ACTIVE: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Fake state attached to exactly one real instance.
///
/// Created lazily on first interception and kept for the real instance's
/// lifetime. Holds only a weak reference back to the real instance.
pub struct ShadowInstance {
    class: Arc<ShadowClass>,
    real_id: InstanceId,
    real: Weak<RealObjectInner>,
    state: Mutex<Box<dyn Any + Send>>,
}

/// Exclusive access to a shadow's state, marked active on this thread
struct ActiveCall<'a> {
    addr: usize,
    state: MutexGuard<'a, Box<dyn Any + Send>>,
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(pos) = active.iter().rposition(|addr| *addr == self.addr) {
                active.remove(pos);
            }
        });
    }
}

impl ShadowInstance {
    pub(crate) fn new(class: Arc<ShadowClass>, real_id: InstanceId, real: Weak<RealObjectInner>) -> Self {
        let state = Mutex::new(class.new_state());
        Self {
            class,
            real_id,
            real,
            state,
        }
    }

    /// Shadow class this instance was created from
    #[must_use]
    pub const fn shadow_class(&self) -> &Arc<ShadowClass> {
        &self.class
    }

    #[must_use]
    pub const fn real_id(&self) -> InstanceId {
        self.real_id
    }

    /// Owning real instance, if still alive
    #[must_use]
    pub fn real(&self) -> Option<RealObject> {
        self.real.upgrade().map(RealObject::from_inner)
    }

    /// Whether the state is of type `S`
    #[must_use]
    pub fn is<S: Any>(&self) -> bool {
        self.class.has_state::<S>()
    }

    /// Run `f` with mutable access to the typed shadow state
    pub fn with<S: Any, R>(&self, f: impl FnOnce(&mut S) -> R) -> UmbraResult<R> {
        let mut call = self.enter("state access")?;
        let state: &mut (dyn Any + Send) = &mut **call.state;
        let state = state
            .downcast_mut::<S>()
            .ok_or_else(|| UmbraError::ShadowTypeMismatch {
                expected: type_name::<S>().to_string(),
                found: self.class.state_type_name().to_string(),
            })?;
        Ok(f(state))
    }

    /// Read a value out of the typed shadow state
    pub fn get<S: Any, R>(&self, f: impl FnOnce(&S) -> R) -> UmbraResult<R> {
        self.with(|state: &mut S| f(state))
    }

    pub(crate) fn run(
        &self,
        method: &str,
        f: impl FnOnce(&mut (dyn Any + Send)) -> UmbraResult<Value>,
    ) -> UmbraResult<Value> {
        let mut call = self.enter(method)?;
        f(&mut **call.state)
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    fn enter(&self, method: &str) -> UmbraResult<ActiveCall<'_>> {
        let addr = self.addr();
        let reentrant = ACTIVE.with(|active| active.borrow().contains(&addr));
        if reentrant {
            return Err(UmbraError::ReentrantShadowCall {
                shadow: self.class.name().to_string(),
                method: method.to_string(),
            });
        }
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ACTIVE.with(|active| active.borrow_mut().push(addr));
        Ok(ActiveCall { addr, state })
    }
}

impl fmt::Debug for ShadowInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowInstance")
            .field("class", &self.class.name())
            .field("real_id", &self.real_id)
            .field("alive", &(self.real.strong_count() > 0))
            .finish()
    }
}
