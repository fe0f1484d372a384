//! Document rewrites that turn a query into its signature.
//!
//! The walk itself is schema-aware (it tracks the parent type of every
//! selection) and reports what it meets to a [`Visitor`]. Literal hiding and
//! fragment usage are separate visitors, so either can run on its own.

use std::collections::{BTreeMap, HashSet};

use graphql_parser::query::{
    Definition, Directive, Document, FragmentDefinition, Number, OperationDefinition, Selection,
    SelectionSet, TypeCondition, Value, VariableDefinition,
};

use super::schema::{InputShape, Schema};
use crate::metrics::OperationKind;

pub(crate) type Doc<'a> = Document<'a, String>;

/// Receives events from [`walk`].
pub(crate) trait Visitor {
    /// A literal in an input position. `shape` is the declared type when the
    /// schema knows it.
    fn value(&mut self, _shape: Option<InputShape>, _value: &mut Value<'_, String>) {}

    fn fragment_spread(&mut self, _name: &str) {}
}

impl<A: Visitor, B: Visitor> Visitor for (A, B) {
    fn value(&mut self, shape: Option<InputShape>, value: &mut Value<'_, String>) {
        self.0.value(shape, value);
        self.1.value(shape, value);
    }

    fn fragment_spread(&mut self, name: &str) {
        self.0.fragment_spread(name);
        self.1.fragment_spread(name);
    }
}

// ─── Visitors ────────────────────────────────────────────────────

/// Replaces inline literals with the zero of their type.
///
/// Booleans, enums, nulls and variables are kept as written.
#[derive(Debug, Default)]
pub(crate) struct HideLiterals;

impl Visitor for HideLiterals {
    fn value(&mut self, shape: Option<InputShape>, value: &mut Value<'_, String>) {
        if let Some(zero) = zero_value(shape, value) {
            *value = zero;
        }
    }
}

fn zero_value<'a>(shape: Option<InputShape>, value: &Value<'a, String>) -> Option<Value<'a, String>> {
    match value {
        Value::Int(_) | Value::Float(_) | Value::String(_) | Value::List(_) | Value::Object(_) => {}
        Value::Variable(_) | Value::Boolean(_) | Value::Null | Value::Enum(_) => return None,
    }

    let zero = match shape {
        Some(InputShape::List) => Value::List(Vec::new()),
        Some(InputShape::Object) => Value::Object(BTreeMap::new()),
        Some(InputShape::Int) => Value::Int(Number::from(0)),
        Some(InputShape::Float) => Value::Float(0.0),
        Some(InputShape::Text) => Value::String(String::new()),
        Some(InputShape::Other) | None => match value {
            Value::Int(_) => Value::Int(Number::from(0)),
            Value::Float(_) => Value::Float(0.0),
            Value::String(_) => Value::String(String::new()),
            Value::List(_) => Value::List(Vec::new()),
            _ => Value::Object(BTreeMap::new()),
        },
    };
    Some(zero)
}

/// Records every fragment name spread by the walked selections.
#[derive(Debug, Default)]
pub(crate) struct FragmentUsage {
    pub used: HashSet<String>,
}

impl Visitor for FragmentUsage {
    fn fragment_spread(&mut self, name: &str) {
        self.used.insert(name.to_owned());
    }
}

// ─── Walk ────────────────────────────────────────────────────────

pub(crate) fn operation_name<'d>(operation: &'d OperationDefinition<'_, String>) -> &'d str {
    let name = match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
    };
    name.unwrap_or_default()
}

pub(crate) fn operation_kind(operation: &OperationDefinition<'_, String>) -> OperationKind {
    match operation {
        OperationDefinition::SelectionSet(_) | OperationDefinition::Query(_) => OperationKind::Query,
        OperationDefinition::Mutation(_) => OperationKind::Mutation,
        OperationDefinition::Subscription(_) => OperationKind::Subscription,
    }
}

/// Walk every operation of `document`, then every fragment reachable from
/// them, transitively. Unreachable fragments are not visited.
///
/// Returns the names of the reachable fragments.
pub(crate) fn walk<V: Visitor>(schema: &Schema, document: &mut Doc<'_>, visitor: &mut V) -> HashSet<String> {
    let mut walker = Walker {
        schema,
        visitor,
        spreads: Vec::new(),
    };

    for definition in &mut document.definitions {
        if let Definition::Operation(operation) = definition {
            walker.operation(operation);
        }
    }

    let mut reachable = HashSet::new();
    while let Some(name) = walker.spreads.pop() {
        if !reachable.insert(name.clone()) {
            continue;
        }
        // A name may be defined more than once; every copy is kept, so every
        // copy is walked.
        for definition in &mut document.definitions {
            if let Definition::Fragment(fragment) = definition {
                if fragment.name == name {
                    walker.fragment(fragment);
                }
            }
        }
    }
    reachable
}

struct Walker<'s, 'v, V> {
    schema: &'s Schema,
    visitor: &'v mut V,
    /// Spread names not yet expanded.
    spreads: Vec<String>,
}

impl<V: Visitor> Walker<'_, '_, V> {
    fn operation(&mut self, operation: &mut OperationDefinition<'_, String>) {
        let root = self
            .schema
            .root_type(operation_kind(operation))
            .map(str::to_owned);
        let root = root.as_deref();

        match operation {
            OperationDefinition::SelectionSet(set) => self.selection_set(root, set),
            OperationDefinition::Query(q) => {
                self.variables(&mut q.variable_definitions);
                self.directives(&mut q.directives);
                self.selection_set(root, &mut q.selection_set);
            }
            OperationDefinition::Mutation(m) => {
                self.variables(&mut m.variable_definitions);
                self.directives(&mut m.directives);
                self.selection_set(root, &mut m.selection_set);
            }
            OperationDefinition::Subscription(s) => {
                self.variables(&mut s.variable_definitions);
                self.directives(&mut s.directives);
                self.selection_set(root, &mut s.selection_set);
            }
        }
    }

    fn fragment(&mut self, fragment: &mut FragmentDefinition<'_, String>) {
        let TypeCondition::On(parent) = &fragment.type_condition;
        let parent = parent.clone();
        self.directives(&mut fragment.directives);
        self.selection_set(Some(&parent), &mut fragment.selection_set);
    }

    fn variables(&mut self, variables: &mut [VariableDefinition<'_, String>]) {
        for variable in variables {
            if let Some(default) = &mut variable.default_value {
                let shape = self.schema.input_shape(&variable.var_type);
                self.visitor.value(Some(shape), default);
            }
        }
    }

    fn directives(&mut self, directives: &mut [Directive<'_, String>]) {
        for directive in directives {
            for (_, value) in &mut directive.arguments {
                self.visitor.value(None, value);
            }
        }
    }

    fn selection_set(&mut self, parent: Option<&str>, set: &mut SelectionSet<'_, String>) {
        let schema = self.schema;
        for selection in &mut set.items {
            match selection {
                Selection::Field(field) => {
                    let definition = parent.and_then(|p| schema.field(p, &field.name));
                    for (name, value) in &mut field.arguments {
                        let shape = definition.and_then(|d| d.arguments.get(name.as_str()).copied());
                        self.visitor.value(shape, value);
                    }
                    self.directives(&mut field.directives);
                    let child = definition.map(|d| d.return_type.clone());
                    self.selection_set(child.as_deref(), &mut field.selection_set);
                }
                Selection::FragmentSpread(spread) => {
                    self.visitor.fragment_spread(&spread.fragment_name);
                    self.spreads.push(spread.fragment_name.clone());
                    self.directives(&mut spread.directives);
                }
                Selection::InlineFragment(inline) => {
                    let scope = match &inline.type_condition {
                        Some(TypeCondition::On(name)) => Some(name.clone()),
                        None => parent.map(str::to_owned),
                    };
                    self.directives(&mut inline.directives);
                    self.selection_set(scope.as_deref(), &mut inline.selection_set);
                }
            }
        }
    }
}

// ─── Rewrites ────────────────────────────────────────────────────

/// Keep only the operation named `name` (the anonymous one for `""`).
/// Fragments are left alone.
pub(crate) fn drop_unused_operations(document: &mut Doc<'_>, name: &str) {
    document.definitions.retain(|definition| match definition {
        Definition::Operation(operation) => operation_name(operation) == name,
        Definition::Fragment(_) => true,
    });
}

/// Keep only the fragments in `used`.
pub(crate) fn drop_unused_fragments(document: &mut Doc<'_>, used: &HashSet<String>) {
    document.definitions.retain(|definition| match definition {
        Definition::Operation(_) => true,
        Definition::Fragment(fragment) => used.contains(&fragment.name),
    });
}

/// Operations first, then fragments, each group in source order.
pub(crate) fn sort_definitions(document: &mut Doc<'_>) {
    document
        .definitions
        .sort_by_key(|definition| matches!(definition, Definition::Fragment(_)));
}

#[cfg(test)]
mod tests {
    use graphql_parser::query::parse_query;

    use super::*;
    use crate::signature::schema::tests::SCHEMA;

    fn parse(query: &'static str) -> Doc<'static> {
        parse_query::<String>(query).unwrap()
    }

    fn schema() -> Schema {
        Schema::parse(SCHEMA).unwrap()
    }

    fn fragment_names(document: &Doc<'_>) -> Vec<String> {
        document
            .definitions
            .iter()
            .filter_map(|d| match d {
                Definition::Fragment(f) => Some(f.name.clone()),
                Definition::Operation(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_drop_unused_operations() {
        let mut document = parse(
            "query A { field } query B { secondField } { thirdField } fragment F on Query { field }",
        );
        drop_unused_operations(&mut document, "B");
        let rendered = document.to_string();
        assert!(rendered.contains("query B"));
        assert!(!rendered.contains("query A"));
        assert!(!rendered.contains("thirdField"));
        assert_eq!(fragment_names(&document), vec!["F"]);
    }

    #[test]
    fn test_drop_unused_operations_anonymous() {
        let mut document = parse("query A { field } { thirdField }");
        drop_unused_operations(&mut document, "");
        assert_eq!(document.definitions.len(), 1);
        assert!(document.to_string().contains("thirdField"));
    }

    #[test]
    fn test_drop_unused_operations_no_match() {
        let mut document = parse("query A { field } query B { field }");
        drop_unused_operations(&mut document, "C");
        assert!(document.definitions.is_empty());
    }

    #[test]
    fn test_fragment_usage_is_transitive() {
        let mut document = parse(
            r#"
            query Q { ...A }
            fragment A on Query { ...B field }
            fragment B on Query { fourthField { ...C } }
            fragment C on MyInterface { fieldThree }
            fragment Unused on Query { field }
            fragment AlsoUnused on Query { ...Unused }
            "#,
        );
        let mut usage = FragmentUsage::default();
        let reachable = walk(&schema(), &mut document, &mut usage);

        let expected: HashSet<String> = ["A", "B", "C"].iter().map(|s| s.to_string()).collect();
        assert_eq!(reachable, expected);
        assert_eq!(usage.used, expected);

        drop_unused_fragments(&mut document, &reachable);
        assert_eq!(fragment_names(&document), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_fragment_cycle_terminates() {
        let mut document = parse(
            "query Q { ...A } fragment A on Query { ...B } fragment B on Query { ...A field }",
        );
        let reachable = walk(&schema(), &mut document, &mut FragmentUsage::default());
        assert_eq!(reachable.len(), 2);
    }

    #[test]
    fn test_hide_literals_by_declared_type() {
        let mut document = parse(
            r#"query Q {
                field(id: 5, x: 42, y: "3.5")
                secondField(input: "not an object")
                thirdField(input: "single")
            }"#,
        );
        walk(&schema(), &mut document, &mut HideLiterals);
        let rendered = document.to_string();
        assert!(rendered.contains(r#"field(id: "", x: 0, y: 0)"#), "{rendered}");
        assert!(rendered.contains("secondField(input: {})"), "{rendered}");
        assert!(rendered.contains("thirdField(input: [])"), "{rendered}");
    }

    #[test]
    fn test_hide_literals_by_literal_kind_when_unknown() {
        let mut document = parse(
            r#"query Q {
                unknown(a: 7, b: 1.5, c: "s", d: [1, 2], e: {k: 1}, f: true, g: RED, h: null, i: $v)
            }"#,
        );
        walk(&schema(), &mut document, &mut HideLiterals);
        let rendered = document.to_string();
        assert!(
            rendered.contains(r#"unknown(a: 0, b: 0, c: "", d: [], e: {}, f: true, g: RED, h: null, i: $v)"#),
            "{rendered}"
        );
    }

    #[test]
    fn test_hide_literals_in_fragments_uses_type_condition() {
        let mut document = parse(
            r#"
            query Q { ...F fourthField { ... on MyType { fieldTwo(id: 99) } } }
            fragment F on Query { field(x: 3) }
            "#,
        );
        walk(&schema(), &mut document, &mut HideLiterals);
        let rendered = document.to_string();
        assert!(rendered.contains("field(x: 0)"), "{rendered}");
        assert!(rendered.contains(r#"fieldTwo(id: "")"#), "{rendered}");
    }

    #[test]
    fn test_hide_literals_in_defaults_and_directives() {
        let mut document = parse(
            r#"query Q($id: ID = 7, $n: Int = 3, $flag: Boolean = true) {
                field(id: $id, x: $n) @include(if: $flag) @custom(reason: "why")
            }"#,
        );
        walk(&schema(), &mut document, &mut HideLiterals);
        let rendered = document.to_string();
        assert!(rendered.contains(r#"$id: ID = """#), "{rendered}");
        assert!(rendered.contains("$n: Int = 0"), "{rendered}");
        assert!(rendered.contains("$flag: Boolean = true"), "{rendered}");
        assert!(rendered.contains(r#"@custom(reason: "")"#), "{rendered}");
        assert!(rendered.contains("field(id: $id, x: $n)"), "{rendered}");
    }

    #[test]
    fn test_unreachable_fragments_not_redacted() {
        let mut document = parse(r#"query Q { field } fragment Unused on Query { field(x: 9) }"#);
        walk(&schema(), &mut document, &mut HideLiterals);
        assert!(document.to_string().contains("field(x: 9)"));
    }

    #[test]
    fn test_sort_definitions() {
        let mut document =
            parse("fragment A on Query { field } query Q { ...A ...B } fragment B on Query { field }");
        sort_definitions(&mut document);
        assert!(matches!(document.definitions[0], Definition::Operation(_)));
        assert_eq!(fragment_names(&document), vec!["A", "B"]);
    }

    #[test]
    fn test_operation_helpers() {
        let document = parse("mutation M { rename(id: 1, name: \"x\") { fieldOne } } { field }");
        let operations: Vec<_> = document
            .definitions
            .iter()
            .filter_map(|d| match d {
                Definition::Operation(op) => Some(op),
                Definition::Fragment(_) => None,
            })
            .collect();
        assert_eq!(operation_name(operations[0]), "M");
        assert_eq!(operation_kind(operations[0]), OperationKind::Mutation);
        assert_eq!(operation_name(operations[1]), "");
        assert_eq!(operation_kind(operations[1]), OperationKind::Query);
    }
}
