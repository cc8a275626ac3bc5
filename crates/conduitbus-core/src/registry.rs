//! Dependency Registry (spec §4.1, component C1).
//!
//! Resolves a named component instance for a requested capability. The
//! registry — not the caller — decides whether two resolutions of the same
//! `(name, capability)` pair return the same instance (singleton) or
//! distinct ones (transient); see [`Scope`].
//!
//! Grounds on the teacher's `TypeId`-keyed `DependencyRegistry`
//! (`allframe-core/src/di/mod.rs`), generalized from a type-keyed store to
//! one keyed by `(name, CapabilityTag)` — this registry resolves by name,
//! not by Rust type, per spec.md §4.1.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// The semantic discriminator a [`DependencyRegistry::resolve`] call is
/// dispatched on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CapabilityTag {
    /// A consumer factory for the named payload type.
    ConsumerOf(String),
    /// A validator for the named payload type.
    Validator(String),
    /// A validator group.
    ValidatorGroup(String),
    /// An endpoint lifecycle handler.
    LifecycleHandler,
    /// A per-label connection-string provider.
    ConnectionStringProvider,
    /// A producer-selector builder for dynamic outgoing routing.
    ProducerSelectorBuilder,
}

/// Errors resolving a `(name, capability)` pair.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// No registration exists under this name for any capability.
    #[error("no component registered under name '{0}'")]
    UnknownName(String),
    /// A registration exists under this name, but not for the requested
    /// capability, or its stored type does not match what the caller asked
    /// for.
    #[error("'{name}' does not provide the requested capability ({capability:?})")]
    CapabilityMismatch {
        /// The name that was looked up.
        name: String,
        /// The capability that could not be satisfied.
        capability: CapabilityTag,
    },
}

/// Lifecycle of a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// A single instance is shared across every resolution.
    #[default]
    Singleton,
    /// A fresh instance is produced for every resolution.
    Transient,
}

enum Registration {
    Singleton(Arc<dyn Any + Send + Sync>),
    Transient(Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>),
}

/// A type-erased, name-and-capability-indexed component registry.
#[derive(Default)]
pub struct DependencyRegistry {
    entries: DashMap<(String, CapabilityTag), Registration>,
}

impl DependencyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a singleton instance under `name` for `capability`.
    pub fn register_singleton<T: Send + Sync + 'static>(
        &self,
        name: impl Into<String>,
        capability: CapabilityTag,
        value: T,
    ) {
        self.entries.insert(
            (name.into(), capability),
            Registration::Singleton(Arc::new(value)),
        );
    }

    /// Register a transient factory under `name` for `capability`: every
    /// resolution invokes `factory` anew.
    pub fn register_transient<T, F>(
        &self,
        name: impl Into<String>,
        capability: CapabilityTag,
        factory: F,
    ) where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.entries.insert(
            (name.into(), capability),
            Registration::Transient(Arc::new(move || {
                Arc::new(factory()) as Arc<dyn Any + Send + Sync>
            })),
        );
    }

    /// Resolve a named component for a capability.
    ///
    /// Returns `UnknownName` if nothing is registered under `name` at all,
    /// `CapabilityMismatch` if something is registered under `name` but not
    /// for this capability or not as a `T`.
    pub fn resolve<T: Send + Sync + 'static>(
        &self,
        name: &str,
        capability: CapabilityTag,
    ) -> Result<Arc<T>, ResolutionError> {
        let key = (name.to_string(), capability.clone());
        let Some(entry) = self.entries.get(&key) else {
            if self.entries.iter().any(|e| e.key().0 == name) {
                return Err(ResolutionError::CapabilityMismatch {
                    name: name.to_string(),
                    capability,
                });
            }
            return Err(ResolutionError::UnknownName(name.to_string()));
        };

        let any = match entry.value() {
            Registration::Singleton(instance) => Arc::clone(instance),
            Registration::Transient(factory) => factory(),
        };

        any.downcast::<T>()
            .map_err(|_| ResolutionError::CapabilityMismatch {
                name: name.to_string(),
                capability,
            })
    }

    /// True if `name` is registered for `capability`.
    pub fn has(&self, name: &str, capability: &CapabilityTag) -> bool {
        self.entries
            .contains_key(&(name.to_string(), capability.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_name_is_reported() {
        let registry = DependencyRegistry::new();
        let err = registry.resolve::<i32>("missing", CapabilityTag::LifecycleHandler);
        assert!(matches!(err, Err(ResolutionError::UnknownName(_))));
    }

    #[test]
    fn capability_mismatch_when_name_exists_for_different_capability() {
        let registry = DependencyRegistry::new();
        registry.register_singleton(
            "orders",
            CapabilityTag::LifecycleHandler,
            42i32,
        );

        let err = registry.resolve::<i32>("orders", CapabilityTag::ConsumerOf("Order".into()));
        assert!(matches!(err, Err(ResolutionError::CapabilityMismatch { .. })));
    }

    #[test]
    fn singleton_returns_the_same_instance() {
        let registry = DependencyRegistry::new();
        registry.register_singleton(
            "orders",
            CapabilityTag::ConsumerOf("Order".into()),
            String::from("consumer-a"),
        );

        let a = registry
            .resolve::<String>("orders", CapabilityTag::ConsumerOf("Order".into()))
            .unwrap();
        let b = registry
            .resolve::<String>("orders", CapabilityTag::ConsumerOf("Order".into()))
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn transient_returns_distinct_instances() {
        let registry = DependencyRegistry::new();
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter2 = Arc::clone(&counter);
        registry.register_transient(
            "orders",
            CapabilityTag::ConsumerOf("Order".into()),
            move || counter2.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
        );

        let a = registry
            .resolve::<u32>("orders", CapabilityTag::ConsumerOf("Order".into()))
            .unwrap();
        let b = registry
            .resolve::<u32>("orders", CapabilityTag::ConsumerOf("Order".into()))
            .unwrap();

        assert_ne!(*a, *b);
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
