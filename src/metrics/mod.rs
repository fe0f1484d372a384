pub mod definitions;
pub mod histogram;
pub mod model;

use std::fmt;
use std::time::Duration;

pub use definitions::{DefinitionRegistry, OperationDefinition, UsageDefinitions};
pub use histogram::{Histogram, RELATIVE_ACCURACY};
pub use model::{
    ContextualizedUsageMetrics, FieldMetrics, MetricsContext, OperationMetrics, UsageMetrics,
};

use crate::client::ClientDetails;

/// Names starting with this prefix (introspection) never enter the model.
pub const RESERVED_PREFIX: &str = "__";

pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// One resolver execution.
/// This is the "write" side: adapters create these and push them in.
#[derive(Debug, Clone)]
pub struct FieldMessage {
    /// Parent type, e.g. "Query"
    pub type_name: String,
    /// Field name, e.g. "user"
    pub field_name: String,
    /// Declared return type name, e.g. "User"
    pub return_type: String,
    /// Resolver error message, if the resolver failed
    pub error: Option<String>,
    pub duration: Duration,
    pub client: ClientDetails,
}

impl FieldMessage {
    pub fn is_reserved(&self) -> bool {
        is_reserved(&self.type_name) || is_reserved(&self.field_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// One completed operation. The signature and its hash are computed by the
/// adapter once per request and never re-derived here.
#[derive(Debug, Clone)]
pub struct OperationMessage {
    pub name: String,
    pub kind: OperationKind,
    /// Raw query text as received
    pub query: String,
    /// Canonical signature
    pub signature: String,
    /// Hex digest of `signature`
    pub hash: String,
    /// true when any field of the operation produced an error
    pub has_errors: bool,
    pub duration: Duration,
    pub client: ClientDetails,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(type_name: &str, field_name: &str) -> FieldMessage {
        FieldMessage {
            type_name: type_name.into(),
            field_name: field_name.into(),
            return_type: "String".into(),
            error: None,
            duration: Duration::from_millis(1),
            client: ClientDetails::default(),
        }
    }

    #[test]
    fn test_reserved_prefix() {
        assert!(field("__Schema", "types").is_reserved());
        assert!(field("Query", "__typename").is_reserved());
        assert!(!field("Query", "user").is_reserved());
        assert!(!field("Query", "_private").is_reserved());
        assert!(!field("", "").is_reserved());
    }

    #[test]
    fn test_operation_kind_display() {
        assert_eq!(OperationKind::Query.to_string(), "query");
        assert_eq!(OperationKind::Mutation.to_string(), "mutation");
        assert_eq!(OperationKind::Subscription.to_string(), "subscription");
    }
}
