#![forbid(unsafe_code)]

use crate::block::{Block, Ref};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operations recorded in a session's change journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    Link,
    Unlink,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Link => "link",
            Self::Unlink => "unlink",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "insert" => Some(Self::Insert),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "link" => Some(Self::Link),
            "unlink" => Some(Self::Unlink),
            _ => None,
        }
    }
}

/// One journal row. Rows are applied to the canonical store in `id` order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: i64,
    pub ts_ms: i64,
    pub op: ChangeOp,
    pub block_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default)]
    pub merged: bool,
}

/// A session's declaration that a block's canonical hash is expected to
/// stay unchanged until merge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuralDep {
    pub block_id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub snapshot_hashes: BTreeMap<String, String>,
}

/// Session lifecycle. `active` is the only state that accepts staging
/// operations; `merged`, `conflict` and `abandoned` are terminal for the
/// manager (`conflict` is re-entered into `active` by the resolver).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Submitted,
    Merged,
    Conflict,
    Abandoned,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Submitted => "submitted",
            Self::Merged => "merged",
            Self::Conflict => "conflict",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "submitted" => Some(Self::Submitted),
            "merged" => Some(Self::Merged),
            "conflict" => Some(Self::Conflict),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Merged | Self::Abandoned)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Human,
    Bot,
    System,
}

impl UserType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Bot => "bot",
            Self::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "human" => Some(Self::Human),
            "bot" => Some(Self::Bot),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Why a submitted session could not merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Snapshot hash no longer matches the canonical row.
    Content,
    /// The depended-on block is gone from the canonical store.
    Deleted,
    /// A parent or ref endpoint is missing at submit time.
    Structure,
    /// Reserved.
    Permission,
}

impl ConflictKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Deleted => "deleted",
            Self::Structure => "structure",
            Self::Permission => "permission",
        }
    }
}

/// The merger's record of one conflict, persisted as JSON into the
/// session store for the resolver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub block_id: String,
    pub kind: ConflictKind,
    pub message: String,
}

/// A user's choice for resolving one conflicted block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionChoice {
    KeepSession,
    KeepContent,
    Manual,
    Recreate,
    NewParent,
    MakeRoot,
    Discard,
}

impl ResolutionChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeepSession => "keep_session",
            Self::KeepContent => "keep_content",
            Self::Manual => "manual",
            Self::Recreate => "recreate",
            Self::NewParent => "new_parent",
            Self::MakeRoot => "make_root",
            Self::Discard => "discard",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub block_id: String,
    pub choice: ResolutionChoice,
    /// Required for `manual`: the user-merged block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<Block>,
    /// Required for `new_parent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_parent_id: Option<String>,
}

/// Differences between a session store and the canonical store.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Diff {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inserts: Vec<BlockDiff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<BlockDiff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletes: Vec<BlockDiff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ref_changes: Vec<RefDiff>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockDiff {
    pub block_id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Block>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefDiff {
    pub op: ChangeOp,
    #[serde(rename = "ref")]
    pub reference: Ref,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trips() {
        for op in [
            ChangeOp::Insert,
            ChangeOp::Update,
            ChangeOp::Delete,
            ChangeOp::Link,
            ChangeOp::Unlink,
        ] {
            assert_eq!(ChangeOp::parse(op.as_str()), Some(op));
        }
        for status in [
            SessionStatus::Active,
            SessionStatus::Submitted,
            SessionStatus::Merged,
            SessionStatus::Conflict,
            SessionStatus::Abandoned,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChangeOp::parse("rename"), None);
        assert_eq!(SessionStatus::parse(""), None);
    }

    #[test]
    fn conflict_list_serializes_snake_case() {
        let conflicts = vec![Conflict {
            block_id: "b1".to_string(),
            kind: ConflictKind::Content,
            message: "hash mismatch".to_string(),
        }];
        let json = serde_json::to_string(&conflicts).expect("serialize conflicts");
        assert!(json.contains(r#""kind":"content""#));
        let back: Vec<Conflict> = serde_json::from_str(&json).expect("deserialize conflicts");
        assert_eq!(back, conflicts);
    }
}
