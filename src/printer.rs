//! Federation-aware SDL rendering
//!
//! Prints the SDL served by the `_service { sdl }` field: the subgraph's
//! own types with their federation directive occurrences kept, and every
//! piece of federation plumbing stripped out. The `_entities`/`_service`
//! fields, the machinery types, the federation directive *definitions* and
//! any implementation-private directive arguments never appear in the
//! output, while `@key`, `@extends`, `@external`, `@requires` and
//! `@provides` occurrences stay on the types and fields that declared them.

use async_graphql::parser::types::{
    ConstDirective, DirectiveDefinition, DirectiveLocation, EnumType, FieldDefinition,
    InputObjectType, InputValueDefinition, ObjectType, SchemaDefinition, ServiceDocument,
    TypeDefinition, TypeKind, TypeSystemDefinition, UnionType,
};
use async_graphql::{Name, Positioned};

use crate::{FederationError, Result};

/// Query-root fields added by composition, never published
const FEDERATION_FIELDS: [&str; 2] = ["_entities", "_service"];

/// Directive names reserved by the federation spec; their occurrences are
/// published, their definitions are not.
const FEDERATION_DIRECTIVES: [&str; 5] = ["key", "extends", "external", "requires", "provides"];

/// Machinery types added by composition, never published
const FEDERATION_TYPES: [&str; 4] = ["_Any", "_FieldSet", "_Entity", "_Service"];

const BUILT_IN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

const SPECIFIED_DIRECTIVES: [&str; 4] = ["skip", "include", "deprecated", "specifiedBy"];

/// Per-directive arguments that configure internal wiring and must never
/// leak into published SDL.
fn private_arguments(directive: &str) -> &'static [&'static str] {
    match directive {
        "key" => &["resolver"],
        _ => &[],
    }
}

/// Render a composed schema document as federation SDL
///
/// Fails with a rendering error when the document has no query root type;
/// there is no partial output.
///
/// A query root left with no publishable fields (every field was federation
/// machinery) prints as a bodyless `type Query`; GraphQL's grammar makes
/// the fields block optional, so the output stays parseable.
pub fn print_federated_schema(document: &ServiceDocument) -> Result<String> {
    let query_root = query_root_name(document);
    if !has_object_type(document, &query_root) {
        return Err(FederationError::Rendering(format!(
            "schema has no query root type \"{query_root}\""
        )));
    }

    let mut blocks = Vec::new();
    for definition in &document.definitions {
        match definition {
            TypeSystemDefinition::Schema(sd) => {
                if let Some(block) = print_schema_definition(&sd.node) {
                    blocks.push(block);
                }
            }
            TypeSystemDefinition::Directive(dd) => {
                let name = dd.node.name.node.as_str();
                if FEDERATION_DIRECTIVES.contains(&name) || SPECIFIED_DIRECTIVES.contains(&name) {
                    continue;
                }
                blocks.push(print_directive_definition(&dd.node));
            }
            TypeSystemDefinition::Type(td) => {
                let name = td.node.name.node.as_str();
                if FEDERATION_TYPES.contains(&name)
                    || BUILT_IN_SCALARS.contains(&name)
                    || name.starts_with("__")
                {
                    continue;
                }
                blocks.push(print_type_definition(&td.node, name == query_root));
            }
        }
    }

    Ok(format!("{}\n", blocks.join("\n\n")))
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

fn has_object_type(document: &ServiceDocument, name: &str) -> bool {
    document.definitions.iter().any(|definition| {
        matches!(definition, TypeSystemDefinition::Type(td)
            if !td.node.extend
                && td.node.name.node.as_str() == name
                && matches!(td.node.kind, TypeKind::Object(_)))
    })
}

/// The `schema { ... }` block is only needed when a root type has an
/// unconventional name.
fn print_schema_definition(sd: &SchemaDefinition) -> Option<String> {
    let conventional = |root: &Option<Positioned<Name>>, default: &str| {
        root.as_ref().map_or(true, |name| name.node.as_str() == default)
    };
    if conventional(&sd.query, "Query")
        && conventional(&sd.mutation, "Mutation")
        && conventional(&sd.subscription, "Subscription")
    {
        return None;
    }

    let mut out = String::from("schema {\n");
    for (operation, root) in [
        ("query", &sd.query),
        ("mutation", &sd.mutation),
        ("subscription", &sd.subscription),
    ] {
        if let Some(name) = root {
            out.push_str(&format!("  {operation}: {}\n", name.node));
        }
    }
    out.push('}');
    Some(out)
}

fn print_type_definition(td: &TypeDefinition, is_query_root: bool) -> String {
    let description = print_description(&td.description, "");
    let extend = if td.extend { "extend " } else { "" };
    let name = td.name.node.as_str();

    match &td.kind {
        TypeKind::Scalar => format!("{description}{extend}scalar {name}"),
        TypeKind::Object(object) => {
            format!(
                "{description}{extend}type {name}{}{}{}",
                print_implements(&object.implements),
                print_type_directives(&td.directives),
                print_fields_block(object_fields(object, is_query_root))
            )
        }
        TypeKind::Interface(interface) => {
            format!(
                "{description}{extend}interface {name}{}{}{}",
                print_implements(&interface.implements),
                print_type_directives(&td.directives),
                print_fields_block(interface.fields.iter().collect())
            )
        }
        TypeKind::Union(union) => {
            format!("{description}{extend}union {name} = {}", print_union(union))
        }
        TypeKind::Enum(enumeration) => {
            format!("{description}{extend}enum {name} {}", print_enum_block(enumeration))
        }
        TypeKind::InputObject(input) => {
            format!("{description}{extend}input {name} {}", print_input_block(input))
        }
    }
}

fn object_fields<'a>(object: &'a ObjectType, is_query_root: bool) -> Vec<&'a Positioned<FieldDefinition>> {
    object
        .fields
        .iter()
        .filter(|field| {
            !is_query_root || !FEDERATION_FIELDS.contains(&field.node.name.node.as_str())
        })
        .collect()
}

fn print_implements(implements: &[Positioned<Name>]) -> String {
    if implements.is_empty() {
        return String::new();
    }
    let names: Vec<&str> = implements.iter().map(|name| name.node.as_str()).collect();
    format!(" implements {}", names.join(" & "))
}

fn print_fields_block(fields: Vec<&Positioned<FieldDefinition>>) -> String {
    if fields.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = fields.iter().map(|field| print_field(&field.node)).collect();
    format!(" {{\n{}\n}}", lines.join("\n"))
}

fn print_field(field: &FieldDefinition) -> String {
    format!(
        "{}  {}{}: {}{}",
        print_description(&field.description, "  "),
        field.name.node,
        print_arguments(&field.arguments),
        field.ty.node,
        print_field_directives(&field.directives)
    )
}

fn print_arguments(arguments: &[Positioned<InputValueDefinition>]) -> String {
    if arguments.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = arguments
        .iter()
        .map(|argument| print_input_value(&argument.node))
        .collect();
    format!("({})", rendered.join(", "))
}

fn print_input_value(value: &InputValueDefinition) -> String {
    let mut out = format!("{}: {}", value.name.node, value.ty.node);
    if let Some(default) = &value.default_value {
        out.push_str(&format!(" = {}", default.node));
    }
    out
}

/// Directive occurrences published on a type: the federation set only
fn print_type_directives(directives: &[Positioned<ConstDirective>]) -> String {
    print_directives(directives, &FEDERATION_DIRECTIVES)
}

/// Directive occurrences published on a field: the federation set plus
/// `@deprecated`
fn print_field_directives(directives: &[Positioned<ConstDirective>]) -> String {
    const ALLOWED: [&str; 6] = ["key", "extends", "external", "requires", "provides", "deprecated"];
    print_directives(directives, &ALLOWED)
}

fn print_directives(directives: &[Positioned<ConstDirective>], allowed: &[&str]) -> String {
    directives
        .iter()
        .filter(|directive| allowed.contains(&directive.node.name.node.as_str()))
        .map(|directive| format!(" {}", print_directive(&directive.node)))
        .collect()
}

fn print_directive(directive: &ConstDirective) -> String {
    let name = directive.name.node.as_str();
    let private = private_arguments(name);
    let arguments: Vec<String> = directive
        .arguments
        .iter()
        .filter(|(argument, _)| !private.contains(&argument.node.as_str()))
        .map(|(argument, value)| format!("{}: {}", argument.node, value.node))
        .collect();

    if arguments.is_empty() {
        format!("@{name}")
    } else {
        format!("@{name}({})", arguments.join(", "))
    }
}

fn print_union(union: &UnionType) -> String {
    let members: Vec<&str> = union.members.iter().map(|member| member.node.as_str()).collect();
    members.join(" | ")
}

fn print_enum_block(enumeration: &EnumType) -> String {
    let lines: Vec<String> = enumeration
        .values
        .iter()
        .map(|value| {
            format!(
                "{}  {}{}",
                print_description(&value.node.description, "  "),
                value.node.value.node,
                print_field_directives(&value.node.directives)
            )
        })
        .collect();
    format!("{{\n{}\n}}", lines.join("\n"))
}

fn print_input_block(input: &InputObjectType) -> String {
    let lines: Vec<String> = input
        .fields
        .iter()
        .map(|field| {
            format!(
                "{}  {}",
                print_description(&field.node.description, "  "),
                print_input_value(&field.node)
            )
        })
        .collect();
    format!("{{\n{}\n}}", lines.join("\n"))
}

fn print_directive_definition(definition: &DirectiveDefinition) -> String {
    // The parser reports `is_repeatable` as set on every definition, so the
    // flag cannot drive rendering; `repeatable` is never printed.
    let locations: Vec<&str> = definition
        .locations
        .iter()
        .map(|location| location_name(location.node))
        .collect();
    format!(
        "{}directive @{}{} on {}",
        print_description(&definition.description, ""),
        definition.name.node,
        print_arguments(&definition.arguments),
        locations.join(" | ")
    )
}

fn location_name(location: DirectiveLocation) -> &'static str {
    match location {
        DirectiveLocation::Query => "QUERY",
        DirectiveLocation::Mutation => "MUTATION",
        DirectiveLocation::Subscription => "SUBSCRIPTION",
        DirectiveLocation::Field => "FIELD",
        DirectiveLocation::FragmentDefinition => "FRAGMENT_DEFINITION",
        DirectiveLocation::FragmentSpread => "FRAGMENT_SPREAD",
        DirectiveLocation::InlineFragment => "INLINE_FRAGMENT",
        DirectiveLocation::VariableDefinition => "VARIABLE_DEFINITION",
        DirectiveLocation::Schema => "SCHEMA",
        DirectiveLocation::Scalar => "SCALAR",
        DirectiveLocation::Object => "OBJECT",
        DirectiveLocation::FieldDefinition => "FIELD_DEFINITION",
        DirectiveLocation::ArgumentDefinition => "ARGUMENT_DEFINITION",
        DirectiveLocation::Interface => "INTERFACE",
        DirectiveLocation::Union => "UNION",
        DirectiveLocation::Enum => "ENUM",
        DirectiveLocation::EnumValue => "ENUM_VALUE",
        DirectiveLocation::InputObject => "INPUT_OBJECT",
        DirectiveLocation::InputFieldDefinition => "INPUT_FIELD_DEFINITION",
    }
}

fn print_description(description: &Option<Positioned<String>>, indent: &str) -> String {
    let Some(description) = description else {
        return String::new();
    };
    let text = &description.node;
    if text.contains('\n') {
        let body: Vec<String> = text.lines().map(|line| format!("{indent}{line}")).collect();
        format!("{indent}\"\"\"\n{}\n{indent}\"\"\"\n", body.join("\n"))
    } else {
        format!("{indent}\"\"\"{text}\"\"\"\n")
    }
}
