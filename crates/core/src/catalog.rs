#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// A block type definition from the schema catalog.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockType {
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// JSON schema used to validate typed attrs, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_parents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_children: Vec<String>,
    pub category: String,
    pub version: i64,
}

/// A relation type definition. `inverse` names the opposite direction;
/// `symmetric` relations are their own inverse.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationType {
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_types: Vec<String>,
    #[serde(default)]
    pub symmetric: bool,
}

/// Process-wide schema identity: a monotonic version plus a content hash.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub version: i64,
    pub hash: String,
}
