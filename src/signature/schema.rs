//! Just enough of a GraphQL schema to walk an operation: field argument
//! types, field return types, and the root operation types.

use std::collections::HashMap;

use graphql_parser::schema::{self, Definition, TypeDefinition, TypeExtension};
use graphql_parser::query::Type;

use crate::error::SignatureError;
use crate::metrics::OperationKind;

/// Shape of an input position, deciding the zero a literal there becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    List,
    Object,
    Int,
    Float,
    Text,
    /// Booleans, enums, and custom scalars.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeKind {
    Scalar,
    Object,
    Interface,
    Union,
    Enum,
    InputObject,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FieldDef {
    /// Innermost named type of the field.
    pub return_type: String,
    pub arguments: HashMap<String, InputShape>,
}

#[derive(Debug, Clone, Default)]
pub struct Schema {
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    kinds: HashMap<String, TypeKind>,
    fields: HashMap<String, HashMap<String, FieldDef>>,
}

impl Schema {
    /// Parse and index an SDL document.
    pub fn parse(sdl: &str) -> Result<Self, SignatureError> {
        let document = schema::parse_schema::<String>(sdl)
            .map_err(|e| SignatureError::Schema(e.to_string()))?;

        let mut index = Self::default();

        // Kinds first: argument shapes need to know which names are input objects.
        for definition in &document.definitions {
            if let Definition::TypeDefinition(def) = definition {
                let (name, kind) = match def {
                    TypeDefinition::Scalar(t) => (&t.name, TypeKind::Scalar),
                    TypeDefinition::Object(t) => (&t.name, TypeKind::Object),
                    TypeDefinition::Interface(t) => (&t.name, TypeKind::Interface),
                    TypeDefinition::Union(t) => (&t.name, TypeKind::Union),
                    TypeDefinition::Enum(t) => (&t.name, TypeKind::Enum),
                    TypeDefinition::InputObject(t) => (&t.name, TypeKind::InputObject),
                };
                index.kinds.insert(name.clone(), kind);
            }
        }

        let mut explicit_roots = false;
        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(def) => {
                    explicit_roots = true;
                    index.query_type = def.query.clone();
                    index.mutation_type = def.mutation.clone();
                    index.subscription_type = def.subscription.clone();
                }
                Definition::TypeDefinition(TypeDefinition::Object(t)) => {
                    index.add_fields(&t.name, &t.fields);
                }
                Definition::TypeDefinition(TypeDefinition::Interface(t)) => {
                    index.add_fields(&t.name, &t.fields);
                }
                Definition::TypeExtension(TypeExtension::Object(t)) => {
                    index.add_fields(&t.name, &t.fields);
                }
                Definition::TypeExtension(TypeExtension::Interface(t)) => {
                    index.add_fields(&t.name, &t.fields);
                }
                _ => {}
            }
        }

        if !explicit_roots {
            index.query_type = index.conventional_root("Query");
            index.mutation_type = index.conventional_root("Mutation");
            index.subscription_type = index.conventional_root("Subscription");
        }

        Ok(index)
    }

    fn conventional_root(&self, name: &str) -> Option<String> {
        self.kinds.contains_key(name).then(|| name.to_owned())
    }

    fn add_fields(&mut self, type_name: &str, fields: &[schema::Field<'_, String>]) {
        let entry = self.fields.entry(type_name.to_owned()).or_default();
        for field in fields {
            let arguments = field
                .arguments
                .iter()
                .map(|arg| (arg.name.clone(), shape_of(&self.kinds, &arg.value_type)))
                .collect();
            entry.insert(
                field.name.clone(),
                FieldDef {
                    return_type: named_type(&field.field_type).to_owned(),
                    arguments,
                },
            );
        }
    }

    pub fn root_type(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => self.query_type.as_deref(),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub(crate) fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        self.fields.get(type_name)?.get(field_name)
    }

    /// Shape of a type written in a query (variable definitions).
    pub fn input_shape(&self, ty: &Type<'_, String>) -> InputShape {
        shape_of(&self.kinds, ty)
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }
}

fn named_type<'t>(ty: &'t Type<'_, String>) -> &'t str {
    match ty {
        Type::NamedType(name) => name.as_str(),
        Type::ListType(inner) | Type::NonNullType(inner) => named_type(inner),
    }
}

fn shape_of(kinds: &HashMap<String, TypeKind>, ty: &Type<'_, String>) -> InputShape {
    match ty {
        Type::NonNullType(inner) => shape_of(kinds, inner),
        Type::ListType(_) => InputShape::List,
        Type::NamedType(name) => match name.as_str() {
            "Int" => InputShape::Int,
            "Float" => InputShape::Float,
            "String" | "ID" => InputShape::Text,
            other => match kinds.get(other) {
                Some(TypeKind::InputObject) => InputShape::Object,
                _ => InputShape::Other,
            },
        },
    }
}
