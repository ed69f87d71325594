//! Batch resolution of entity references
//!
//! Implements the `_entities(representations: [_Any!]!)` contract: every
//! representation is dispatched in input order, custom resolvers are invoked
//! directly, default-store references are queued into the request's
//! [`Buffer`], and references of undeclared kinds pass through unchanged.
//! Output order and length always match the input so callers can correlate
//! results by position.

use indexmap::IndexMap;
use std::sync::Arc;

use async_graphql::{Name, Value};

use crate::buffer::{Buffer, Deferred};
use crate::resolver::{ResolverBinding, ResolverRegistry};
use crate::{FederationError, Result};

/// One position of a resolution batch after dispatch
///
/// Deferred elements stay unforced until every representation in the batch
/// has been dispatched; that ordering is what lets the buffer collapse all
/// default-store lookups of a kind into one fetch.
pub enum Resolved {
    /// Output of a custom resolver, available immediately
    Entity(Value),
    /// Pending buffered lookup, forced after the whole batch is queued
    Deferred(Deferred),
    /// The original representation, passed through because its kind
    /// declared no `@key` in this schema
    Unresolved(Value),
}

impl Resolved {
    /// Materialize the final value for this batch position
    ///
    /// A deferred lookup that finds no record resolves to `Value::Null`.
    pub async fn force(self) -> Result<Value> {
        match self {
            Resolved::Entity(value) | Resolved::Unresolved(value) => Ok(value),
            Resolved::Deferred(deferred) => Ok(deferred.force().await?.unwrap_or(Value::Null)),
        }
    }
}

/// Entity resolution engine for one incoming batch
///
/// Built per request from the schema's shared [`ResolverRegistry`] and a
/// fresh [`Buffer`]; see [`FederatedSchema::entity_resolver`].
///
/// [`FederatedSchema::entity_resolver`]: crate::FederatedSchema::entity_resolver
pub struct EntityResolver {
    registry: Arc<ResolverRegistry>,
    buffer: Arc<Buffer>,
}

impl EntityResolver {
    pub fn new(registry: Arc<ResolverRegistry>, buffer: Arc<Buffer>) -> Self {
        Self { registry, buffer }
    }

    /// Dispatch every representation without forcing any deferred lookup
    ///
    /// The result is positionally 1:1 with the input; an error at one
    /// position never affects the others. References are not deduplicated:
    /// a representation appearing twice is dispatched twice, and only the
    /// buffer's load-once policy collapses the underlying fetch.
    pub async fn resolve_batch(&self, representations: &[Value]) -> Vec<Result<Resolved>> {
        let mut resolved = Vec::with_capacity(representations.len());
        for representation in representations {
            resolved.push(self.dispatch(representation).await);
        }
        resolved
    }

    /// Resolve a full batch: dispatch everything, then force in order
    pub async fn resolve_entities(&self, representations: &[Value]) -> Vec<Result<Value>> {
        let batch = self.resolve_batch(representations).await;

        let mut entities = Vec::with_capacity(batch.len());
        for position in batch {
            let entity = match position {
                Ok(resolved) => resolved.force().await,
                Err(err) => Err(err),
            };
            entities.push(entity);
        }
        entities
    }

    async fn dispatch(&self, representation: &Value) -> Result<Resolved> {
        let Value::Object(fields) = representation else {
            return Err(FederationError::InvalidRepresentation(
                "representation must be an object".into(),
            ));
        };
        let kind = match fields.get("__typename") {
            Some(Value::String(kind)) => kind.clone(),
            _ => {
                return Err(FederationError::InvalidRepresentation(
                    "representation is missing a string __typename".into(),
                ))
            }
        };

        match self.registry.binding(&kind) {
            None => Ok(Resolved::Unresolved(representation.clone())),
            Some(ResolverBinding::Custom { resolver, method }) => {
                let entity = resolver.resolve(method, fields).await?;
                Ok(Resolved::Entity(entity))
            }
            Some(ResolverBinding::Store { store }) => {
                let key: IndexMap<Name, Value> = fields
                    .iter()
                    .filter(|(name, _)| name.as_str() != "__typename")
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();

                self.buffer.add(store, key.clone()).await;
                Ok(Resolved::Deferred(Deferred::new(
                    self.buffer.clone(),
                    store.clone(),
                    key,
                )))
            }
        }
    }
}
