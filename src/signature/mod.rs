//! Operation signatures.
//!
//! A signature is the query reduced to the one operation that ran, with
//! every inline literal replaced by the zero of its type, pruned of unused
//! fragments and printed canonically. Two requests that differ only in
//! literal values share a signature, and therefore a hash.

mod schema;
mod transforms;

use graphql_parser::query::parse_query;
use sha2::{Digest, Sha256};

pub use schema::{InputShape, Schema};

use crate::error::SignatureError;
use transforms::{FragmentUsage, HideLiterals};

/// Normalize `query`, keeping only the operation called `operation_name`
/// (`""` selects the anonymous operation).
///
/// No matching operation is not an error: the signature then holds no
/// operations and, having nothing to spread them, no fragments.
pub fn operation_signature(
    schema: &Schema,
    query: &str,
    operation_name: &str,
) -> Result<String, SignatureError> {
    let mut document =
        parse_query::<String>(query).map_err(|e| SignatureError::Parse(e.to_string()))?;

    transforms::drop_unused_operations(&mut document, operation_name);

    let mut visitors = (HideLiterals, FragmentUsage::default());
    transforms::walk(schema, &mut document, &mut visitors);
    let (_, usage) = visitors;

    transforms::drop_unused_fragments(&mut document, &usage.used);
    transforms::sort_definitions(&mut document);

    Ok(document.to_string())
}

/// Lowercase hex SHA-256 of `signature`.
pub fn operation_hash(signature: &str) -> String {
    hex::encode(Sha256::digest(signature.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::parse(super::schema::tests::SCHEMA).unwrap()
    }

    const QUERY: &str = r#"
        query MyQuery {
            ...Test
            secondField(input: {id: "abc"})
        }

        query MyQuery2($id: ID, $x: Int, $y: Float) {
            b: field(id: $id, x: $x, y: $y)
        }

        fragment Unused on Query {
            thirdField(input: ["a"])
        }

        fragment Test on Query {
            ...Nested
            field(id: "xyz", x: 5, y: 5.5)
        }

        fragment Nested on Query {
            thirdField(input: ["a", "b"])
        }
    "#;

    #[test]
    fn test_signature_keeps_selected_operation() {
        let signature = operation_signature(&schema(), QUERY, "MyQuery").unwrap();

        assert!(signature.contains("query MyQuery "), "{signature}");
        assert!(!signature.contains("MyQuery2"));
        assert!(!signature.contains("fragment Unused"));
        assert!(signature.contains("fragment Test on Query"));
        assert!(signature.contains("fragment Nested on Query"));

        assert!(signature.contains(r#"field(id: "", x: 0, y: 0)"#), "{signature}");
        assert!(signature.contains("secondField(input: {})"), "{signature}");
        assert!(signature.contains("thirdField(input: [])"), "{signature}");
        assert!(!signature.contains("xyz"));
        assert!(!signature.contains("abc"));
    }

    #[test]
    fn test_signature_operations_before_fragments() {
        let signature = operation_signature(&schema(), QUERY, "MyQuery").unwrap();
        let operation = signature.find("query MyQuery").unwrap();
        let fragment = signature.find("fragment").unwrap();
        assert!(operation < fragment);
    }

    #[test]
    fn test_signature_keeps_variables() {
        let signature = operation_signature(&schema(), QUERY, "MyQuery2").unwrap();
        assert!(signature.contains("query MyQuery2($id: ID, $x: Int, $y: Float)"), "{signature}");
        assert!(signature.contains("b: field(id: $id, x: $x, y: $y)"), "{signature}");
        assert!(!signature.contains("fragment"));
    }

    #[test]
    fn test_signature_no_matching_operation() {
        let signature = operation_signature(&schema(), QUERY, "Missing").unwrap();
        assert!(!signature.contains("query"));
        assert!(!signature.contains("fragment"));
    }

    #[test]
    fn test_signature_anonymous_operation() {
        let signature = operation_signature(&schema(), r#"{ field(id: "1") }"#, "").unwrap();
        assert!(signature.contains(r#"field(id: "")"#), "{signature}");
    }

    #[test]
    fn test_duplicate_fragment_names_are_all_redacted() {
        let query = r#"
            query Q { ...F }
            fragment F on Query { field(id: "a") }
            fragment F on Query { field(id: "SECRET-TOKEN") }
        "#;
        let signature = operation_signature(&schema(), query, "Q").unwrap();
        assert!(!signature.contains("SECRET-TOKEN"), "{signature}");
        assert!(!signature.contains(r#""a""#), "{signature}");
        assert_eq!(signature.matches(r#"field(id: "")"#).count(), 2, "{signature}");
    }

    #[test]
    fn test_literal_values_do_not_change_hash() {
        let schema = schema();
        let a = operation_signature(&schema, r#"query Q { field(id: "1", x: 1) }"#, "Q").unwrap();
        let b = operation_signature(&schema, r#"query Q { field(id: "2", x: 99) }"#, "Q").unwrap();
        assert_eq!(a, b);
        assert_eq!(operation_hash(&a), operation_hash(&b));

        let c = operation_signature(&schema, r#"query Q { field(id: "1", y: 1) }"#, "Q").unwrap();
        assert_ne!(operation_hash(&a), operation_hash(&c));
    }

    #[test]
    fn test_signature_is_idempotent() {
        let schema = schema();
        let once = operation_signature(&schema, QUERY, "MyQuery").unwrap();
        let twice = operation_signature(&schema, &once, "MyQuery").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_parse_error() {
        let err = operation_signature(&schema(), "query {", "").unwrap_err();
        assert!(matches!(err, SignatureError::Parse(_)));
    }

    #[test]
    fn test_hash_format() {
        let hash = operation_hash("query Q { field }");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(
            operation_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
