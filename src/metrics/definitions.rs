//! Operation definitions, reported once per signature hash.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDefinition {
    pub name: String,
    pub hash: String,
    pub signature: String,
}

/// Definitions discovered since the previous flush.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageDefinitions {
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<OperationDefinition>,
}

impl UsageDefinitions {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Process-lifetime registry of known hashes plus the definitions still
/// waiting to be flushed. The known set only ever grows.
#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    known: HashSet<String>,
    pending: UsageDefinitions,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `hash` for reporting unless it was seen before. Returns whether
    /// it was new.
    pub fn observe(&mut self, name: &str, hash: &str, signature: &str) -> bool {
        if self.known.contains(hash) {
            return false;
        }
        self.known.insert(hash.to_owned());
        self.pending.operations.push(OperationDefinition {
            name: name.to_owned(),
            hash: hash.to_owned(),
            signature: signature.to_owned(),
        });
        true
    }

    pub fn is_known(&self, hash: &str) -> bool {
        self.known.contains(hash)
    }

    pub fn known_len(&self) -> usize {
        self.known.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Hand over the pending definitions, leaving an empty batch behind.
    /// `None` when nothing new was discovered.
    pub fn take_pending(&mut self) -> Option<UsageDefinitions> {
        if self.pending.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.pending))
    }
}
