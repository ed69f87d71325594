//! # graphql-federation
//!
//! Apollo Federation subgraph utilities.
//!
//! ## Features
//!
//! - **Entity Resolution** - batch resolution of `_entities` representations
//! - **Reference Buffer** - at most one backing-store fetch per entity kind per batch
//! - **Schema Composition** - `@key`-driven entity discovery and machinery injection
//! - **Federation SDL** - `_service { sdl }` printing with internal plumbing hidden
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_graphql::{Name, Value};
//! use async_trait::async_trait;
//! use graphql_federation::{EntityStore, FederatedSchema, StoreRegistry};
//! use indexmap::IndexMap;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! struct ReviewStore;
//!
//! #[async_trait]
//! impl EntityStore for ReviewStore {
//!     async fn fetch(
//!         &self,
//!         _clauses: &[IndexMap<Name, Value>],
//!     ) -> graphql_federation::Result<Vec<Value>> {
//!         // One database round trip answering all clauses.
//!         Ok(Vec::new())
//!     }
//! }
//!
//! let sdl = r#"
//! type Review @key(fields: "id") {
//!   id: ID!
//!   body: String!
//! }
//!
//! type Query {
//!   reviews: [Review!]!
//! }
//! "#;
//!
//! // `Review` has no custom resolver, so a backing store must be
//! // registered under its name before composition.
//! let mut stores = StoreRegistry::new();
//! stores.register("Review", Arc::new(ReviewStore));
//!
//! let schema = FederatedSchema::from_sdl(sdl, HashMap::new(), stores).unwrap();
//! println!("{}", schema.service_sdl().unwrap());
//! ```

pub mod buffer;
pub mod entities;
pub mod printer;
pub mod resolver;
pub mod schema;

pub use buffer::{Buffer, Deferred, EntityStore, StoreRegistry};
pub use entities::{EntityResolver, Resolved};
pub use printer::print_federated_schema;
pub use resolver::{ReferenceResolver, ResolverBinding, ResolverRegistry};
pub use schema::FederatedSchema;

use thiserror::Error;

/// Federation errors
#[derive(Error, Debug)]
pub enum FederationError {
    /// Fatal at schema-build time; no partial schema is served
    #[error("Schema composition error: {0}")]
    Composition(String),

    /// A custom resolver failed; scoped to one batch position
    #[error("Failed to resolve reference: {0}")]
    Resolution(String),

    /// A representation violated the `_Any` contract
    #[error("Invalid representation: {0}")]
    InvalidRepresentation(String),

    /// The backing store failed during a batched fetch
    #[error("Backing store error: {0}")]
    Store(String),

    /// Fatal to the `_service` request; no partial SDL is produced
    #[error("Cannot render federation SDL: {0}")]
    Rendering(String),
}

/// Result type for federation operations
pub type Result<T> = std::result::Result<T, FederationError>;
