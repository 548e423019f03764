//! Method Resolution Cache
//!
//! Memoizes `(shadow class, method key) -> dispatch target`. A target is a
//! pure function of the shadow class (immutable once built), the key and the
//! environment's API level, so entries never go stale; they are still
//! dropped when a class is rebound to keep the cache bounded.
//!
//! ## Resolution rule
//!
//! Levels are searched from the most-derived shadow class upward. The first
//! level holding any compatible candidate wins; inside it the candidate with
//! the lowest total [`ParamType::call_cost`] is chosen. Two candidates tied
//! at the lowest cost are a [`UmbraError::DuplicateBindingConflict`].

use crate::class::RealClass;
use crate::result::{UmbraError, UmbraResult};
use crate::shadow::{ShadowClass, ShadowClassId, ShadowMethod};
use crate::signature::MethodKey;
use crate::value::ParamType;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Where an intercepted call goes
#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    /// Run this shadow method
    Shadow(Arc<ShadowMethod>),
    /// Run the original body supplied by the call site
    CallReal,
    /// Return the type default without running anything
    DoNothing,
}

impl ResolvedTarget {
    #[must_use]
    pub const fn is_shadow(&self) -> bool {
        matches!(self, Self::Shadow(_))
    }

    #[must_use]
    pub const fn method(&self) -> Option<&Arc<ShadowMethod>> {
        match self {
            Self::Shadow(method) => Some(method),
            _ => None,
        }
    }

    /// Same target (shadow methods compared by identity)
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Shadow(a), Self::Shadow(b)) => Arc::ptr_eq(a, b),
            (Self::CallReal, Self::CallReal) | (Self::DoNothing, Self::DoNothing) => true,
            _ => false,
        }
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Concurrent memo of resolved dispatch targets
#[derive(Default)]
pub struct ResolutionCache {
    entries: DashMap<(ShadowClassId, MethodKey), ResolvedTarget>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResolutionCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Target for `key` on `shadow`, resolving and caching on a miss.
    ///
    /// Conflicts are reported on every call and never cached.
    pub fn resolve(
        &self,
        shadow: &ShadowClass,
        key: &MethodKey,
        api_level: u32,
    ) -> UmbraResult<ResolvedTarget> {
        let cache_key = (shadow.id(), key.clone());
        if let Some(hit) = self.entries.get(&cache_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit.value().clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let target = pick_method(shadow, key, api_level)?;
        trace!(shadow = shadow.name(), method = %key, shadowed = target.is_shadow(), "resolved method");
        self.entries.insert(cache_key, target.clone());
        Ok(target)
    }

    /// Drop entries for `class` and its subclasses
    pub fn invalidate_class(&self, class: RealClass) {
        self.entries
            .retain(|(_, key), _| !key.declaring().is_subclass_of(class));
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Uncached resolution of `key` against `shadow`
pub fn pick_method(
    shadow: &ShadowClass,
    key: &MethodKey,
    api_level: u32,
) -> UmbraResult<ResolvedTarget> {
    for level in shadow.levels() {
        let mut best: Option<u32> = None;
        let mut winners: Vec<&Arc<ShadowMethod>> = Vec::new();
        for method in level.methods() {
            if method.name() != key.name() || !method.sdk().contains(api_level) {
                continue;
            }
            let Some(cost) = ParamType::call_cost(key.params(), method.params()) else {
                continue;
            };
            match best {
                Some(b) if cost > b => {}
                Some(b) if cost == b => winners.push(method),
                _ => {
                    best = Some(cost);
                    winners.clear();
                    winners.push(method);
                }
            }
        }
        match winners.as_slice() {
            [] => {}
            [only] => return Ok(ResolvedTarget::Shadow(Arc::clone(only))),
            tied => {
                return Err(UmbraError::DuplicateBindingConflict {
                    shadow: shadow.name().to_string(),
                    method: key.to_string(),
                    candidates: tied.iter().map(|m| m.to_string()).collect(),
                })
            }
        }
    }
    Ok(if shadow.call_through_by_default() {
        ResolvedTarget::CallReal
    } else {
        ResolvedTarget::DoNothing
    })
}
