//! Shadow Registry
//!
//! Maps real classes to the shadow class implementing their fake behavior.
//! Bindings are last-write-wins and only affect instances constructed after
//! the change; lookups fall back to the nearest bound superclass.

use crate::class::RealClass;
use crate::result::{UmbraError, UmbraResult};
use crate::shadow::ShadowClass;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Real class to shadow class bindings
pub struct ShadowRegistry {
    bindings: DashMap<RealClass, Arc<ShadowClass>>,
    resolved: DashMap<RealClass, Option<Arc<ShadowClass>>>,
    defaults: Vec<(RealClass, Arc<ShadowClass>)>,
    api_level: u32,
    generation: AtomicU64,
}

impl ShadowRegistry {
    /// Registry with no bindings
    #[must_use]
    pub fn new(api_level: u32) -> Self {
        Self {
            bindings: DashMap::new(),
            resolved: DashMap::new(),
            defaults: Vec::new(),
            api_level,
            generation: AtomicU64::new(0),
        }
    }

    /// Registry whose `reset` restores `defaults`
    pub fn with_defaults(
        api_level: u32,
        defaults: Vec<(RealClass, Arc<ShadowClass>)>,
    ) -> UmbraResult<Self> {
        for (real, shadow) in &defaults {
            check_binding(*real, shadow)?;
        }
        let registry = Self {
            defaults,
            ..Self::new(api_level)
        };
        registry.install_defaults();
        Ok(registry)
    }

    fn install_defaults(&self) {
        for (real, shadow) in &self.defaults {
            self.bindings.insert(*real, Arc::clone(shadow));
        }
    }

    #[must_use]
    pub const fn api_level(&self) -> u32 {
        self.api_level
    }

    /// Bind `shadow` to `real`, returning the previous binding.
    ///
    /// Cached lookups for `real` and its subclasses are dropped.
    pub fn bind(
        &self,
        real: RealClass,
        shadow: Arc<ShadowClass>,
    ) -> UmbraResult<Option<Arc<ShadowClass>>> {
        check_binding(real, &shadow)?;
        debug!(real = %real, shadow = shadow.name(), "binding shadow class");
        let previous = self.bindings.insert(real, shadow);
        self.invalidate(real);
        Ok(previous)
    }

    /// Remove the binding for `real`
    pub fn unbind(&self, real: RealClass) -> Option<Arc<ShadowClass>> {
        let previous = self.bindings.remove(&real).map(|(_, shadow)| shadow);
        if previous.is_some() {
            debug!(real = %real, "unbinding shadow class");
            self.invalidate(real);
        }
        previous
    }

    /// Exact binding for `real`, ignoring superclasses
    #[must_use]
    pub fn binding(&self, real: RealClass) -> Option<Arc<ShadowClass>> {
        self.bindings.get(&real).map(|entry| Arc::clone(entry.value()))
    }

    /// Shadow class for `real`: its own binding or the nearest bound
    /// superclass's, skipping shadows outside the API level.
    #[must_use]
    pub fn resolve(&self, real: RealClass) -> Option<Arc<ShadowClass>> {
        if let Some(hit) = self.resolved.get(&real) {
            return hit.value().clone();
        }
        let found = real.ancestors().find_map(|class| {
            self.bindings
                .get(&class)
                .filter(|entry| entry.value().supports_sdk(self.api_level))
                .map(|entry| Arc::clone(entry.value()))
        });
        self.resolved.insert(real, found.clone());
        found
    }

    /// Restore the default bindings
    pub fn reset(&self) {
        self.bindings.clear();
        self.resolved.clear();
        self.install_defaults();
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Bound real classes, sorted by name
    #[must_use]
    pub fn bound_classes(&self) -> Vec<RealClass> {
        let mut classes: Vec<_> = self.bindings.iter().map(|entry| *entry.key()).collect();
        classes.sort();
        classes
    }

    /// Counter bumped by every binding change
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn invalidate(&self, real: RealClass) {
        self.resolved.retain(|class, _| !class.is_subclass_of(real));
        self.generation.fetch_add(1, Ordering::Relaxed);
    }
}

fn check_binding(real: RealClass, shadow: &ShadowClass) -> UmbraResult<()> {
    if real.is_subclass_of(shadow.shadows()) {
        Ok(())
    } else {
        Err(UmbraError::InvalidBinding {
            real_class: real.name().to_string(),
            shadow: shadow.name().to_string(),
            message: format!("shadow declares it shadows {}", shadow.shadows()),
        })
    }
}

impl fmt::Debug for ShadowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowRegistry")
            .field("bindings", &self.bindings.len())
            .field("defaults", &self.defaults.len())
            .field("api_level", &self.api_level)
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::class::{ClassInfo, OBJECT};

    static VIEW: ClassInfo = ClassInfo::extends("android.view.View", &OBJECT);
    static TEXT_VIEW: ClassInfo = ClassInfo::extends("android.widget.TextView", &VIEW);
    static BUTTON: ClassInfo = ClassInfo::extends("android.widget.Button", &TEXT_VIEW);

    fn shadow(name: &str, class: &'static ClassInfo) -> Arc<ShadowClass> {
        ShadowClass::builder::<()>(name, RealClass::of(class))
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_exact_then_ancestor() {
        let registry = ShadowRegistry::new(34);
        let view = shadow("ShadowView", &VIEW);
        registry.bind(RealClass::of(&VIEW), view.clone()).unwrap();

        assert_eq!(registry.resolve(RealClass::of(&VIEW)).unwrap().id(), view.id());
        assert_eq!(registry.resolve(RealClass::of(&BUTTON)).unwrap().id(), view.id());
        assert!(registry.resolve(RealClass::object()).is_none());
    }

    #[test]
    fn test_rebinding_ancestor_invalidates_descendants() {
        let registry = ShadowRegistry::new(34);
        registry
            .bind(RealClass::of(&VIEW), shadow("ShadowView", &VIEW))
            .unwrap();
        assert_eq!(registry.resolve(RealClass::of(&BUTTON)).unwrap().name(), "ShadowView");

        let replacement = shadow("OtherShadowView", &VIEW);
        let previous = registry.bind(RealClass::of(&VIEW), replacement).unwrap();
        assert_eq!(previous.unwrap().name(), "ShadowView");
        assert_eq!(
            registry.resolve(RealClass::of(&BUTTON)).unwrap().name(),
            "OtherShadowView"
        );
    }

    #[test]
    fn test_nearest_binding_wins() {
        let registry = ShadowRegistry::new(34);
        registry
            .bind(RealClass::of(&VIEW), shadow("ShadowView", &VIEW))
            .unwrap();
        registry
            .bind(RealClass::of(&TEXT_VIEW), shadow("ShadowTextView", &TEXT_VIEW))
            .unwrap();
        assert_eq!(
            registry.resolve(RealClass::of(&BUTTON)).unwrap().name(),
            "ShadowTextView"
        );
    }

    #[test]
    fn test_bind_rejects_unrelated_class() {
        let registry = ShadowRegistry::new(34);
        let result = registry.bind(RealClass::of(&VIEW), shadow("ShadowButton", &BUTTON));
        assert!(matches!(result, Err(UmbraError::InvalidBinding { .. })));
    }

    #[test]
    fn test_sdk_filtered_binding_falls_through() {
        let registry = ShadowRegistry::new(19);
        registry
            .bind(RealClass::of(&VIEW), shadow("ShadowView", &VIEW))
            .unwrap();
        let modern = ShadowClass::builder::<()>("ShadowTextView", RealClass::of(&TEXT_VIEW))
            .sdk(Some(21), None)
            .build()
            .unwrap();
        registry.bind(RealClass::of(&TEXT_VIEW), modern).unwrap();
        assert_eq!(
            registry.resolve(RealClass::of(&TEXT_VIEW)).unwrap().name(),
            "ShadowView"
        );
    }

    #[test]
    fn test_unbind_and_reset() {
        let view = shadow("ShadowView", &VIEW);
        let registry =
            ShadowRegistry::with_defaults(34, vec![(RealClass::of(&VIEW), view)]).unwrap();
        assert!(registry.unbind(RealClass::of(&VIEW)).is_some());
        assert!(registry.resolve(RealClass::of(&TEXT_VIEW)).is_none());
        assert!(registry.is_empty());

        registry
            .bind(RealClass::of(&TEXT_VIEW), shadow("ShadowTextView", &TEXT_VIEW))
            .unwrap();
        registry.reset();
        assert_eq!(registry.bound_classes(), vec![RealClass::of(&VIEW)]);
        assert_eq!(
            registry.resolve(RealClass::of(&TEXT_VIEW)).unwrap().name(),
            "ShadowView"
        );
    }

    #[test]
    fn test_generation_tracks_changes() {
        let registry = ShadowRegistry::new(34);
        let start = registry.generation();
        registry
            .bind(RealClass::of(&VIEW), shadow("ShadowView", &VIEW))
            .unwrap();
        assert!(registry.generation() > start);
        let after_bind = registry.generation();
        assert!(registry.unbind(RealClass::of(&BUTTON)).is_none());
        assert_eq!(registry.generation(), after_bind);
    }
}
