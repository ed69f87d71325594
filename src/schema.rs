//! Federated schema composition
//!
//! Takes a subgraph's schema document and wires the federation machinery
//! into it: the `_Any` and `_FieldSet` scalars, the `_Entity` union over
//! every `@key`-declaring type, the `_Service` type, the five federation
//! directive definitions, and the `_entities`/`_service` query fields. The
//! same pass discovers the entity kinds and composes the read-only
//! [`ResolverRegistry`] that query-time resolution dispatches on.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_graphql::parser::types::{
    ServiceDocument, TypeDefinition, TypeKind, TypeSystemDefinition,
};
use async_graphql::parser::parse_schema;
use async_graphql::Value;

use crate::buffer::{Buffer, StoreRegistry};
use crate::entities::EntityResolver;
use crate::printer::print_federated_schema;
use crate::resolver::{parse_resolver_reference, ReferenceResolver, ResolverBinding, ResolverRegistry};
use crate::{FederationError, Result};

/// Scalars, directive definitions and the `_Service` type injected into
/// every composed subgraph schema.
const FEDERATION_MACHINERY_SDL: &str = r#"
scalar _Any
scalar _FieldSet

type _Service {
  sdl: String
}

directive @key(fields: _FieldSet!, resolver: String) on OBJECT | INTERFACE
directive @extends on OBJECT | INTERFACE
directive @external on FIELD_DEFINITION
directive @requires(fields: _FieldSet!) on FIELD_DEFINITION
directive @provides(fields: _FieldSet!) on FIELD_DEFINITION
"#;

/// Parsed only for its field definitions, which are merged into the
/// subgraph's real query root.
const QUERY_FIELDS_SDL: &str = r#"
type Query {
  _entities(representations: [_Any!]!): [_Entity]!
  _service: _Service!
}
"#;

struct EntityKind {
    name: String,
    resolver_reference: Option<String>,
    is_object: bool,
}

/// A subgraph schema with federation support composed in
///
/// Built once at startup; the document and registry are immutable
/// afterwards and safe to share across requests. Each resolution request
/// gets its own [`EntityResolver`] over a fresh buffer.
pub struct FederatedSchema {
    document: ServiceDocument,
    registry: Arc<ResolverRegistry>,
    stores: Arc<StoreRegistry>,
}

impl FederatedSchema {
    /// Compose federation support into a parsed schema document
    ///
    /// `resolvers` supplies the targets referenced by `@key(resolver:
    /// "Target@method")` arguments; every `@key` type without one must have
    /// a backing store registered under its own name in `stores`.
    ///
    /// Fails when no type declares `@key`, when a resolver reference names
    /// an unknown target, when a kind has neither resolver nor store, or
    /// when the document has no query root type.
    pub fn build(
        mut document: ServiceDocument,
        resolvers: HashMap<String, Arc<dyn ReferenceResolver>>,
        stores: StoreRegistry,
    ) -> Result<Self> {
        let kinds = collect_entity_kinds(&document);

        let union_members: Vec<&str> = kinds
            .iter()
            .filter(|kind| kind.is_object)
            .map(|kind| kind.name.as_str())
            .collect();
        if union_members.is_empty() {
            return Err(FederationError::Composition(
                "there must be at least one type declaring the @key directive".into(),
            ));
        }

        let mut registry = ResolverRegistry::new();
        for kind in &kinds {
            registry.register(kind.name.clone(), compose_binding(kind, &resolvers, &stores)?);
        }
        tracing::debug!(kinds = kinds.len(), "composed federation entity kinds");

        let machinery = parse_sdl(FEDERATION_MACHINERY_SDL)?;
        for definition in machinery.definitions {
            set_definition(&mut document, definition);
        }

        let entity_union = parse_sdl(&format!("union _Entity = {}", union_members.join(" | ")))?;
        for definition in entity_union.definitions {
            set_definition(&mut document, definition);
        }

        add_query_fields(&mut document)?;

        Ok(Self {
            document,
            registry: Arc::new(registry),
            stores: Arc::new(stores),
        })
    }

    /// Parse an SDL string and compose federation support into it
    pub fn from_sdl(
        sdl: &str,
        resolvers: HashMap<String, Arc<dyn ReferenceResolver>>,
        stores: StoreRegistry,
    ) -> Result<Self> {
        Self::build(parse_sdl(sdl)?, resolvers, stores)
    }

    /// The composed schema document, machinery included
    pub fn document(&self) -> &ServiceDocument {
        &self.document
    }

    /// Build the resolution engine for one incoming batch
    ///
    /// The returned engine owns a fresh buffer, so pending and loaded
    /// lookups never leak between requests.
    pub fn entity_resolver(&self) -> EntityResolver {
        EntityResolver::new(
            self.registry.clone(),
            Arc::new(Buffer::new(self.stores.clone())),
        )
    }

    /// Resolve one `_entities(representations:)` batch
    pub async fn resolve_entities(&self, representations: &[Value]) -> Vec<Result<Value>> {
        self.entity_resolver().resolve_entities(representations).await
    }

    /// Resolve a batch whose representations arrive as JSON values
    ///
    /// Fails as a whole if any representation is not convertible; per-kind
    /// resolution errors still surface per position.
    pub async fn resolve_entities_json(
        &self,
        representations: Vec<serde_json::Value>,
    ) -> Result<Vec<Result<Value>>> {
        let mut converted = Vec::with_capacity(representations.len());
        for representation in representations {
            let value = Value::from_json(representation)
                .map_err(|err| FederationError::InvalidRepresentation(err.to_string()))?;
            converted.push(value);
        }
        Ok(self.resolve_entities(&converted).await)
    }

    /// Render the federation SDL served by the `_service` field
    pub fn service_sdl(&self) -> Result<String> {
        print_federated_schema(&self.document)
    }
}

// Registry bindings hold trait objects, so nothing useful can be derived.
impl fmt::Debug for FederatedSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedSchema").finish_non_exhaustive()
    }
}

fn parse_sdl(sdl: &str) -> Result<ServiceDocument> {
    parse_schema(sdl).map_err(|err| FederationError::Composition(err.to_string()))
}

fn collect_entity_kinds(document: &ServiceDocument) -> Vec<EntityKind> {
    document
        .definitions
        .iter()
        .filter_map(|definition| match definition {
            TypeSystemDefinition::Type(td) if !td.node.extend => Some(&td.node),
            _ => None,
        })
        .filter(|td| {
            matches!(td.kind, TypeKind::Object(_) | TypeKind::Interface(_))
                && has_directive(td, "key")
                // Extension types belong to another service; the owning
                // service registers the resolver.
                && !has_directive(td, "extends")
        })
        .map(|td| EntityKind {
            name: td.name.node.to_string(),
            resolver_reference: key_resolver_reference(td),
            is_object: matches!(td.kind, TypeKind::Object(_)),
        })
        .collect()
}

fn has_directive(td: &TypeDefinition, name: &str) -> bool {
    td.directives.iter().any(|d| d.node.name.node.as_str() == name)
}

/// The `resolver` argument of the type's `@key` directive, if any; with
/// several `@key` occurrences the last one carrying the argument wins.
fn key_resolver_reference(td: &TypeDefinition) -> Option<String> {
    td.directives
        .iter()
        .filter(|d| d.node.name.node.as_str() == "key")
        .filter_map(|d| match d.node.get_argument("resolver") {
            Some(value) => match &value.node {
                Value::String(reference) => Some(reference.clone()),
                _ => None,
            },
            None => None,
        })
        .last()
}

fn compose_binding(
    kind: &EntityKind,
    resolvers: &HashMap<String, Arc<dyn ReferenceResolver>>,
    stores: &StoreRegistry,
) -> Result<ResolverBinding> {
    match &kind.resolver_reference {
        Some(reference) => {
            let (target, method) = parse_resolver_reference(reference);
            let resolver = resolvers.get(target).cloned().ok_or_else(|| {
                FederationError::Composition(format!(
                    "no resolver named \"{target}\" registered for type \"{}\"",
                    kind.name
                ))
            })?;
            Ok(ResolverBinding::Custom {
                resolver,
                method: method.to_string(),
            })
        }
        None => {
            if !stores.contains(&kind.name) {
                return Err(FederationError::Composition(format!(
                    "cannot find a backing store for type \"{}\"; register one or specify a resolver in the @key directive",
                    kind.name
                )));
            }
            Ok(ResolverBinding::Store {
                store: kind.name.clone(),
            })
        }
    }
}

/// Insert a definition, replacing any existing one with the same name
fn set_definition(document: &mut ServiceDocument, definition: TypeSystemDefinition) {
    match &definition {
        TypeSystemDefinition::Type(new) => {
            let name = new.node.name.node.clone();
            document.definitions.retain(|existing| {
                !matches!(existing, TypeSystemDefinition::Type(td)
                    if !td.node.extend && td.node.name.node == name)
            });
        }
        TypeSystemDefinition::Directive(new) => {
            let name = new.node.name.node.clone();
            document.definitions.retain(|existing| {
                !matches!(existing, TypeSystemDefinition::Directive(dd)
                    if dd.node.name.node == name)
            });
        }
        TypeSystemDefinition::Schema(_) => {}
    }
    document.definitions.push(definition);
}

fn query_root_name(document: &ServiceDocument) -> String {
    document
        .definitions
        .iter()
        .find_map(|definition| match definition {
            TypeSystemDefinition::Schema(sd) => {
                sd.node.query.as_ref().map(|name| name.node.to_string())
            }
            _ => None,
        })
        .unwrap_or_else(|| "Query".to_string())
}

/// Merge `_entities` and `_service` into the subgraph's query root
fn add_query_fields(document: &mut ServiceDocument) -> Result<()> {
    let snippet = parse_sdl(QUERY_FIELDS_SDL)?;
    let mut fields = Vec::new();
    for definition in snippet.definitions {
        if let TypeSystemDefinition::Type(td) = definition {
            if let TypeKind::Object(object) = td.node.kind {
                fields = object.fields;
            }
        }
    }

    let root = query_root_name(document);
    let query = document
        .definitions
        .iter_mut()
        .find_map(|definition| match definition {
            TypeSystemDefinition::Type(td)
                if !td.node.extend && td.node.name.node.as_str() == root =>
            {
                match &mut td.node.kind {
                    TypeKind::Object(object) => Some(object),
                    _ => None,
                }
            }
            _ => None,
        })
        .ok_or_else(|| {
            FederationError::Composition(format!("schema has no query root type \"{root}\""))
        })?;

    for field in fields {
        let name = &field.node.name.node;
        if !query.fields.iter().any(|f| f.node.name.node == *name) {
            query.fields.push(field);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::EntityStore;
    use async_trait::async_trait;
    use indexmap::IndexMap;

    struct NullStore;

    #[async_trait]
    impl EntityStore for NullStore {
        async fn fetch(
            &self,
            _: &[IndexMap<async_graphql::Name, Value>],
        ) -> Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    struct NullResolver;

    #[async_trait]
    impl ReferenceResolver for NullResolver {
        async fn resolve(
            &self,
            _: &str,
            _: &IndexMap<async_graphql::Name, Value>,
        ) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    const SUBGRAPH_SDL: &str = r#"
type Product @key(fields: "id", resolver: "ProductResolver@find") {
  id: ID!
  name: String!
}

type Review @key(fields: "id") {
  id: ID!
  body: String!
}

type Query {
  reviews: [Review!]!
}
"#;

    fn resolvers_with_product() -> HashMap<String, Arc<dyn ReferenceResolver>> {
        let mut resolvers: HashMap<String, Arc<dyn ReferenceResolver>> = HashMap::new();
        resolvers.insert("ProductResolver".into(), Arc::new(NullResolver));
        resolvers
    }

    fn stores_with_review() -> StoreRegistry {
        let mut stores = StoreRegistry::new();
        stores.register("Review", Arc::new(NullStore));
        stores
    }

    fn type_definition<'a>(document: &'a ServiceDocument, name: &str) -> Option<&'a TypeDefinition> {
        document.definitions.iter().find_map(|d| match d {
            TypeSystemDefinition::Type(td) if td.node.name.node.as_str() == name => Some(&td.node),
            _ => None,
        })
    }

    #[test]
    fn test_build_composes_machinery_into_document() {
        let schema =
            FederatedSchema::from_sdl(SUBGRAPH_SDL, resolvers_with_product(), stores_with_review())
                .unwrap();
        let document = schema.document();

        for name in ["_Any", "_FieldSet", "_Service", "_Entity"] {
            assert!(type_definition(document, name).is_some(), "missing {name}");
        }

        let TypeKind::Union(union) = &type_definition(document, "_Entity").unwrap().kind else {
            panic!("_Entity must be a union");
        };
        let members: Vec<&str> = union.members.iter().map(|m| m.node.as_str()).collect();
        assert_eq!(members, vec!["Product", "Review"]);

        let TypeKind::Object(query) = &type_definition(document, "Query").unwrap().kind else {
            panic!("Query must be an object");
        };
        let field_names: Vec<&str> =
            query.fields.iter().map(|f| f.node.name.node.as_str()).collect();
        assert!(field_names.contains(&"_entities"));
        assert!(field_names.contains(&"_service"));
        assert!(field_names.contains(&"reviews"));
    }

    #[test]
    fn test_schema_debug_is_opaque() {
        let schema =
            FederatedSchema::from_sdl(SUBGRAPH_SDL, resolvers_with_product(), stores_with_review())
                .unwrap();
        assert!(format!("{schema:?}").contains("FederatedSchema"));
    }

    #[test]
    fn test_zero_key_types_is_a_composition_error() {
        let sdl = "type Query { ping: String }";
        let err = FederatedSchema::from_sdl(sdl, HashMap::new(), StoreRegistry::new()).unwrap_err();
        assert!(matches!(err, FederationError::Composition(_)));
        assert!(err.to_string().contains("at least one type"));
    }

    #[test]
    fn test_extends_types_are_skipped() {
        // The only @key type is an extension of another service's type, so
        // composition finds no locally owned kinds.
        let sdl = r#"
type Product @key(fields: "id") @extends {
  id: ID!
}

type Query {
  ping: String
}
"#;
        let err = FederatedSchema::from_sdl(sdl, HashMap::new(), StoreRegistry::new()).unwrap_err();
        assert!(matches!(err, FederationError::Composition(_)));
    }

    #[test]
    fn test_kind_without_store_or_resolver_fails_naming_the_kind() {
        let sdl = r#"
type Review @key(fields: "id") {
  id: ID!
}

type Query {
  ping: String
}
"#;
        let err = FederatedSchema::from_sdl(sdl, HashMap::new(), StoreRegistry::new()).unwrap_err();
        assert!(err.to_string().contains("Review"));
    }

    #[test]
    fn test_unknown_resolver_target_fails() {
        let err = FederatedSchema::from_sdl(SUBGRAPH_SDL, HashMap::new(), stores_with_review())
            .unwrap_err();
        assert!(err.to_string().contains("ProductResolver"));
    }

    #[test]
    fn test_missing_query_root_fails() {
        let sdl = r#"
type Review @key(fields: "id") {
  id: ID!
}
"#;
        let err =
            FederatedSchema::from_sdl(sdl, HashMap::new(), stores_with_review()).unwrap_err();
        assert!(err.to_string().contains("query root"));
    }

    #[test]
    fn test_interface_kind_registers_binding_but_not_union_member() {
        let sdl = r#"
interface Node @key(fields: "id") {
  id: ID!
}

type Review @key(fields: "id") {
  id: ID!
}

type Query {
  ping: String
}
"#;
        let mut stores = stores_with_review();
        stores.register("Node", Arc::new(NullStore));
        let schema = FederatedSchema::from_sdl(sdl, HashMap::new(), stores).unwrap();

        let TypeKind::Union(union) = &type_definition(schema.document(), "_Entity").unwrap().kind
        else {
            panic!("_Entity must be a union");
        };
        let members: Vec<&str> = union.members.iter().map(|m| m.node.as_str()).collect();
        assert_eq!(members, vec!["Review"]);
    }

    #[tokio::test]
    async fn test_resolve_entities_json_round_trip() {
        let schema =
            FederatedSchema::from_sdl(SUBGRAPH_SDL, resolvers_with_product(), stores_with_review())
                .unwrap();

        let entities = schema
            .resolve_entities_json(vec![serde_json::json!({
                "__typename": "Review",
                "id": "9"
            })])
            .await
            .unwrap();

        assert_eq!(entities.len(), 1);
        // NullStore returns nothing, so the reference resolves to null.
        assert_eq!(entities[0].as_ref().unwrap(), &Value::Null);
    }
}
