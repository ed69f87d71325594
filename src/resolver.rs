//! Resolver bindings for federated entity kinds
//!
//! Every entity kind declared with `@key` gets exactly one binding: either a
//! user-supplied resolver (named in the directive's `resolver` argument as
//! `"Target@method"`) or the buffered default lookup against the store
//! registered under the kind's own name. References are resolved into
//! bindings once, at schema composition; query-time dispatch is a match on
//! the binding, never a string lookup.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::{Name, Value};

use crate::Result;

/// Conventional entry point used when a resolver reference has no `@method`
pub const DEFAULT_RESOLVER_METHOD: &str = "resolve";

/// A user-declared resolver for one or more entity kinds
///
/// Implementations capture whatever clients or state they need at
/// construction time; `method` distinguishes entry points when one target
/// serves several kinds (the `@method` part of the `@key` resolver
/// reference).
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Resolve a single entity reference into a full entity value
    async fn resolve(&self, method: &str, reference: &IndexMap<Name, Value>) -> Result<Value>;
}

/// Split a `"Target@method"` resolver reference into target and method
///
/// The method defaults to [`DEFAULT_RESOLVER_METHOD`] when no `@` is
/// present.
pub fn parse_resolver_reference(reference: &str) -> (&str, &str) {
    match reference.split_once('@') {
        Some((target, method)) => (target, method),
        None => (reference, DEFAULT_RESOLVER_METHOD),
    }
}

/// How one entity kind is resolved
#[derive(Clone)]
pub enum ResolverBinding {
    /// A user-declared resolver, invoked directly per reference
    Custom {
        resolver: Arc<dyn ReferenceResolver>,
        method: String,
    },
    /// Buffered lookup against the named backing store
    Store { store: String },
}

/// Kind-to-binding map, composed once per schema and read-only afterwards
#[derive(Default)]
pub struct ResolverRegistry {
    bindings: HashMap<String, ResolverBinding>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the binding for a kind; re-registering overwrites
    pub fn register(&mut self, kind: impl Into<String>, binding: ResolverBinding) {
        self.bindings.insert(kind.into(), binding);
    }

    /// Whether the kind was declared with `@key` during composition
    pub fn has(&self, kind: &str) -> bool {
        self.bindings.contains_key(kind)
    }

    pub fn binding(&self, kind: &str) -> Option<&ResolverBinding> {
        self.bindings.get(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopResolver;

    #[async_trait]
    impl ReferenceResolver for NoopResolver {
        async fn resolve(&self, _method: &str, _reference: &IndexMap<Name, Value>) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_parse_reference_with_method() {
        assert_eq!(
            parse_resolver_reference("ProductResolver@find"),
            ("ProductResolver", "find")
        );
    }

    #[test]
    fn test_parse_reference_defaults_method() {
        assert_eq!(
            parse_resolver_reference("ProductResolver"),
            ("ProductResolver", DEFAULT_RESOLVER_METHOD)
        );
    }

    #[test]
    fn test_has_answers_false_for_undeclared_kind() {
        let registry = ResolverRegistry::new();
        assert!(!registry.has("Product"));
    }

    #[test]
    fn test_register_last_write_wins() {
        let mut registry = ResolverRegistry::new();
        registry.register("Product", ResolverBinding::Store { store: "Product".into() });
        registry.register(
            "Product",
            ResolverBinding::Custom {
                resolver: Arc::new(NoopResolver),
                method: "find".into(),
            },
        );

        assert!(registry.has("Product"));
        match registry.binding("Product") {
            Some(ResolverBinding::Custom { method, .. }) => assert_eq!(method, "find"),
            _ => panic!("expected the custom binding to win"),
        }
    }
}
