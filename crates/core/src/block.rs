#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt::Write as _;

/// Category names for block types.
pub const CATEGORY_CONTENT: &str = "content";
pub const CATEGORY_DISCUSSION: &str = "discussion";
pub const CATEGORY_KNOWLEDGE: &str = "knowledge";
pub const CATEGORY_TASK: &str = "task";
pub const CATEGORY_BOT: &str = "bot";
pub const CATEGORY_SYSTEM: &str = "system";

/// Well-known block types seeded by `init`.
pub const TYPE_DOCUMENT: &str = "document";
pub const TYPE_HEADING: &str = "heading";
pub const TYPE_PARAGRAPH: &str = "paragraph";
pub const TYPE_LIST: &str = "list";
pub const TYPE_LIST_ITEM: &str = "list_item";
pub const TYPE_CODE: &str = "code";
pub const TYPE_TABLE: &str = "table";
pub const TYPE_QUOTE: &str = "quote";
pub const TYPE_EMBED: &str = "embed";
pub const TYPE_QUESTION: &str = "question";
pub const TYPE_ANSWER: &str = "answer";
pub const TYPE_CLAIM: &str = "claim";
pub const TYPE_TASK: &str = "task";
pub const TYPE_BOT_REQUEST: &str = "bot_request";
pub const TYPE_BOT_RESPONSE: &str = "bot_response";

/// Well-known relation types.
pub const REL_PARENT_OF: &str = "parent_of";
pub const REL_CHILD_OF: &str = "child_of";
pub const REL_REFERENCES: &str = "references";
pub const REL_CITES: &str = "cites";
pub const REL_REFUTES: &str = "refutes";
pub const REL_EXTENDS: &str = "extends";
pub const REL_DEPENDS: &str = "depends";
pub const REL_SUPERSEDES: &str = "supersedes";
pub const REL_ANSWERS: &str = "answers";
pub const REL_BLOCKS: &str = "blocks";
pub const REL_RELATED_TO: &str = "related_to";

/// A content block. Blocks form a forest under `parent_id`; siblings are
/// ordered by the fractional `position` key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub block_type: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_html: Option<String>,
    pub position: String,
    pub hash: String,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub updated_at_ms: i64,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub published: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at_ms: Option<i64>,
}

impl Block {
    pub fn compute_hash(&self) -> String {
        content_hash(&self.content)
    }

    /// Recompute `hash` from the current content.
    pub fn refresh_hash(&mut self) {
        self.hash = self.compute_hash();
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at_ms.is_some()
    }
}

/// A typed relation between two blocks. Primary key is
/// `(from_id, to_id, type)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ref {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub ref_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(default)]
    pub created_at_ms: i64,
    #[serde(default)]
    pub created_by: String,
}

/// A string attribute on a block. Primary key is `(block_id, name)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attr {
    pub block_id: String,
    pub name: String,
    pub value: String,
}

/// Lowercase-hex SHA-256 of the content string. Every persisted block
/// row keeps `hash == content_hash(content)`.
pub fn content_hash(content: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_sha256() {
        assert_eq!(
            content_hash("Hello"),
            "185f8db32271fe25f561a6fc938b2e264306ec304eda518007d1764826381969"
        );
        assert_eq!(content_hash("").len(), 64);
        assert_eq!(content_hash("a"), content_hash("a"));
        assert_ne!(content_hash("a"), content_hash("b"));
    }

    #[test]
    fn refresh_hash_tracks_content() {
        let mut block = Block {
            id: "b1".to_string(),
            block_type: TYPE_PARAGRAPH.to_string(),
            content: "one".to_string(),
            ..Block::default()
        };
        block.refresh_hash();
        let first = block.hash.clone();
        block.content = "two".to_string();
        block.refresh_hash();
        assert_ne!(first, block.hash);
        assert_eq!(block.hash, content_hash("two"));
    }

    #[test]
    fn block_json_uses_type_key() {
        let mut block = Block {
            id: "b1".to_string(),
            block_type: TYPE_CODE.to_string(),
            content: "x".to_string(),
            position: "m".to_string(),
            ..Block::default()
        };
        block.refresh_hash();
        let json = serde_json::to_string(&block).expect("serialize block");
        assert!(json.contains(r#""type":"code""#));
        let back: Block = serde_json::from_str(&json).expect("deserialize block");
        assert_eq!(back, block);
    }
}
