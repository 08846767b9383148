//! Versioned schema contract shared by the prompt compiler and validator.
//!
//! Both sides read the same contract so generation requests and validation
//! checks cannot drift apart: the compiler tells the capability what shape
//! to produce, the validator checks the merged document against the same
//! description.

use serde::{Deserialize, Serialize};

use crate::validate::ErrorKind;

/// The contract: required top-level fields, the fragment shape sent to the
/// generation capability, and the wire names of error kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContract {
    pub version: u32,
    /// Top-level document fields the validator requires non-empty.
    pub required_fields: Vec<String>,
    /// JSON shape description included verbatim in generation prompts.
    pub fragment_shape: String,
}

impl SchemaContract {
    /// Version 1 of the contract.
    pub fn v1() -> Self {
        Self {
            version: 1,
            required_fields: vec!["name".to_string(), "roles".to_string(), "phases".to_string()],
            fragment_shape: concat!(
                "[{\"name\": \"<TaskName>\", ",
                "\"description\": \"<optional text>\", ",
                "\"transition\": \"<optional phase name>\"}]"
            )
            .to_string(),
        }
    }

    /// Stable wire name for an error kind.
    pub fn kind_name(&self, kind: ErrorKind) -> &'static str {
        kind.as_str()
    }
}

impl Default for SchemaContract {
    fn default() -> Self {
        Self::v1()
    }
}
