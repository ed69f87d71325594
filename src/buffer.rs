//! Reference buffering for batched entity fetches
//!
//! Collects the key fields of every entity reference in a resolution batch,
//! grouped by backing store, and fetches each store exactly once with a
//! single OR-of-clauses query. Point lookups are then answered from the
//! loaded result set without touching the store again.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use async_graphql::{Name, Value};

use crate::Result;

/// Backing store for a federated entity kind
///
/// `clauses` is the accumulated lookup set for one batch: each element is an
/// AND of field equalities, and the elements are OR'd together. The store
/// must answer the whole set in one round trip and return the matching
/// records as GraphQL object values.
///
/// The iteration order of the returned records is the tie-break order used
/// by [`Buffer::get`] when several records match the same key fields.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch all records matching any of the given clauses
    async fn fetch(&self, clauses: &[IndexMap<Name, Value>]) -> Result<Vec<Value>>;
}

/// Registry of backing stores, keyed by entity kind name
///
/// A kind with no custom resolver falls back to the store registered under
/// its own name, so registering `"Review"` here makes `Review` resolvable
/// without a `resolver` argument on its `@key` directive.
#[derive(Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn EntityStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backing store for a kind, replacing any previous one
    pub fn register(&mut self, kind: impl Into<String>, store: Arc<dyn EntityStore>) {
        self.stores.insert(kind.into(), store);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.stores.contains_key(kind)
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn EntityStore>> {
        self.stores.get(kind).cloned()
    }
}

#[derive(Default)]
struct BufferState {
    pending: HashMap<String, Vec<IndexMap<Name, Value>>>,
    loaded: HashMap<String, Vec<Value>>,
}

/// Per-request buffer of pending entity lookups
///
/// Scoped to a single resolution batch: callers must build a fresh buffer
/// per incoming request so loaded result sets never leak across requests.
pub struct Buffer {
    stores: Arc<StoreRegistry>,
    state: Mutex<BufferState>,
}

impl Buffer {
    pub fn new(stores: Arc<StoreRegistry>) -> Self {
        Self {
            stores,
            state: Mutex::new(BufferState::default()),
        }
    }

    /// Queue one set of key fields for the given store
    pub async fn add(&self, store: &str, fields: IndexMap<Name, Value>) {
        let mut state = self.state.lock().await;
        state.pending.entry(store.to_string()).or_default().push(fields);
    }

    /// Execute the batched fetch for a store
    ///
    /// Idempotent: the first call drains the pending lookups into one
    /// [`EntityStore::fetch`] and records the result set; every later call
    /// for the same store is a no-op. A store with nothing pending loads as
    /// an empty result set without a fetch.
    pub async fn load(&self, store: &str) -> Result<()> {
        // The lock is held across the fetch so concurrent forcings of
        // deferred values cannot trigger a second fetch for the same store.
        let mut state = self.state.lock().await;

        if state.loaded.contains_key(store) {
            return Ok(());
        }

        let clauses = state.pending.remove(store).unwrap_or_default();
        let records = if clauses.is_empty() {
            Vec::new()
        } else {
            let backing = self.stores.get(store).ok_or_else(|| {
                crate::FederationError::Store(format!("no backing store registered for \"{store}\""))
            })?;
            tracing::debug!(store, clauses = clauses.len(), "executing batched entity fetch");
            backing.fetch(&clauses).await?
        };

        state.loaded.insert(store.to_string(), records);
        Ok(())
    }

    /// Point lookup against a loaded result set
    ///
    /// Returns the first record whose attributes equal every key/value pair
    /// in `fields`, in store iteration order, or `None` when nothing
    /// matches.
    ///
    /// # Panics
    ///
    /// Panics if [`Buffer::load`] has not run for `store`. Calling `get`
    /// before `load` is a contract violation in the caller, not a
    /// recoverable runtime condition.
    pub async fn get(&self, store: &str, fields: &IndexMap<Name, Value>) -> Option<Value> {
        let state = self.state.lock().await;
        let records = state
            .loaded
            .get(store)
            .unwrap_or_else(|| panic!("Buffer::get called for \"{store}\" before Buffer::load"));

        records.iter().find(|record| matches_fields(record, fields)).cloned()
    }
}

fn matches_fields(record: &Value, fields: &IndexMap<Name, Value>) -> bool {
    let Value::Object(attrs) = record else {
        return false;
    };
    fields.iter().all(|(key, value)| attrs.get(key.as_str()) == Some(value))
}

/// A lazily-forced entity lookup tied to a not-yet-executed batched fetch
///
/// Forcing triggers the store's fetch if it has not run yet, then answers
/// the point lookup from the loaded result set.
pub struct Deferred {
    buffer: Arc<Buffer>,
    store: String,
    fields: IndexMap<Name, Value>,
}

impl Deferred {
    pub(crate) fn new(buffer: Arc<Buffer>, store: String, fields: IndexMap<Name, Value>) -> Self {
        Self { buffer, store, fields }
    }

    /// Run the batched fetch if needed and look up this reference's record
    pub async fn force(self) -> Result<Option<Value>> {
        self.buffer.load(&self.store).await?;
        Ok(self.buffer.get(&self.store, &self.fields).await)
    }
}
