#![forbid(unsafe_code)]

//! Conflict resolution for sessions the merger rejected.
//!
//! The merger persists the bare conflict list into the session store; the
//! resolver turns it into presentable details (field diffs, previews,
//! suggested choices) and rewrites session rows to encode the user's
//! decision. Once the batch is applied the session returns to `active`
//! and can be resubmitted.

use crate::content::ContentStore;
use crate::error::StorageError;
use crate::session::store as session_store;
use crate::support::now_ms;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_core::{Block, ConflictKind, Resolution, ResolutionChoice, SessionStatus};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldDiff {
    pub field: String,
    pub session_value: String,
    pub content_value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolutionOption {
    pub choice: ResolutionChoice,
    pub label: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl ResolutionOption {
    fn new(choice: ResolutionChoice, label: &str, description: &str) -> Self {
        Self {
            choice,
            label: label.to_string(),
            description: description.to_string(),
            preview: None,
        }
    }
}

/// One conflict, enriched for presentation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub block_id: String,
    pub kind: ConflictKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_block: Option<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_block: Option<Block>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_diffs: Vec<FieldDiff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<ResolutionOption>,
}

pub struct Resolver {
    content: ContentStore,
}

impl Resolver {
    pub fn new(content_db_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            content: ContentStore::open_read_only(content_db_path)?,
        })
    }

    /// Recompute conflict details for a conflicted session store.
    pub fn detect_conflicts(
        &self,
        session_db_path: &Path,
    ) -> Result<Vec<ConflictDetail>, StorageError> {
        let conn = session_store::open_session_db_read_only(session_db_path)?;
        let mut details = Vec::new();

        for dep in session_store::structural_deps(&conn)? {
            for (dep_id, expected_hash) in &dep.snapshot_hashes {
                if let Some(detail) = self.check_block_conflict(&conn, dep_id, expected_hash)? {
                    details.push(detail);
                }
            }
        }

        for (block, _) in session_store::dirty_blocks(&conn)? {
            if block.is_deleted() || block.parent_id.is_none() {
                continue;
            }
            if let Some(detail) = self.check_parent_conflict(&conn, &block)? {
                details.push(detail);
            }
        }

        Ok(details)
    }

    fn check_block_conflict(
        &self,
        session: &Connection,
        block_id: &str,
        expected_hash: &str,
    ) -> Result<Option<ConflictDetail>, StorageError> {
        let canonical = self.content.get_live_block(block_id)?;
        let Some(canonical) = canonical else {
            return Ok(Some(ConflictDetail {
                block_id: block_id.to_string(),
                kind: ConflictKind::Deleted,
                message: "block was deleted in the canonical store".to_string(),
                session_block: session_store::get_block(session, block_id)?,
                content_block: None,
                field_diffs: Vec::new(),
                suggestions: vec![
                    ResolutionOption::new(
                        ResolutionChoice::Recreate,
                        "Recreate the block",
                        "Re-insert the block with your changes",
                    ),
                    ResolutionOption::new(
                        ResolutionChoice::Discard,
                        "Discard",
                        "Drop your changes to this block",
                    ),
                ],
            }));
        };

        if canonical.hash == expected_hash {
            return Ok(None);
        }

        let session_block = session_store::get_block(session, block_id)?;
        let field_diffs = session_block
            .as_ref()
            .map(|s| compute_field_diffs(s, &canonical))
            .unwrap_or_default();

        let mut keep_session = ResolutionOption::new(
            ResolutionChoice::KeepSession,
            "Keep my version",
            "Overwrite the canonical content with yours",
        );
        keep_session.preview = session_block.as_ref().map(|b| b.content.clone());
        let mut keep_content = ResolutionOption::new(
            ResolutionChoice::KeepContent,
            "Keep the current version",
            "Take the canonical content and drop yours",
        );
        keep_content.preview = Some(canonical.content.clone());
        let manual = ResolutionOption::new(
            ResolutionChoice::Manual,
            "Merge by hand",
            "Provide a manually merged block",
        );

        Ok(Some(ConflictDetail {
            block_id: block_id.to_string(),
            kind: ConflictKind::Content,
            message: "content was modified by another session".to_string(),
            session_block,
            content_block: Some(canonical),
            field_diffs,
            suggestions: vec![keep_session, keep_content, manual],
        }))
    }

    fn check_parent_conflict(
        &self,
        session: &Connection,
        block: &Block,
    ) -> Result<Option<ConflictDetail>, StorageError> {
        let Some(parent_id) = &block.parent_id else {
            return Ok(None);
        };
        if self.content.get_live_block(parent_id)?.is_some() {
            return Ok(None);
        }
        if session_store::block_source(session, parent_id)?
            .map(|source| source == session_store::SOURCE_NEW)
            .unwrap_or(false)
        {
            return Ok(None);
        }

        Ok(Some(ConflictDetail {
            block_id: block.id.clone(),
            kind: ConflictKind::Structure,
            message: format!("parent block {parent_id} no longer exists"),
            session_block: Some(block.clone()),
            content_block: None,
            field_diffs: Vec::new(),
            suggestions: vec![
                ResolutionOption::new(
                    ResolutionChoice::NewParent,
                    "Pick a new parent",
                    "Re-attach the block under another parent",
                ),
                ResolutionOption::new(
                    ResolutionChoice::MakeRoot,
                    "Make it a root",
                    "Detach the block from any parent",
                ),
                ResolutionOption::new(
                    ResolutionChoice::Discard,
                    "Discard",
                    "Drop your changes to this block",
                ),
            ],
        }))
    }

    /// Apply one resolution to the session store.
    pub fn apply_resolution(
        &self,
        session_db_path: &Path,
        resolution: &Resolution,
    ) -> Result<(), StorageError> {
        let conn = session_store::open_session_db(session_db_path)?;
        match resolution.choice {
            ResolutionChoice::KeepSession => {
                self.refresh_snapshot_hash(&conn, &resolution.block_id)
            }
            ResolutionChoice::KeepContent => {
                self.replace_with_canonical(&conn, &resolution.block_id)?;
                self.refresh_snapshot_hash(&conn, &resolution.block_id)
            }
            ResolutionChoice::Manual => {
                let merged = resolution
                    .merged
                    .as_ref()
                    .ok_or(StorageError::InvalidInput(
                        "manual resolution requires a merged block",
                    ))?;
                apply_manual_block(&conn, merged)?;
                self.refresh_snapshot_hash(&conn, &resolution.block_id)
            }
            ResolutionChoice::Recreate => mark_as_new(&conn, &resolution.block_id),
            ResolutionChoice::NewParent => {
                let parent_id =
                    resolution
                        .new_parent_id
                        .as_deref()
                        .ok_or(StorageError::InvalidInput(
                            "new_parent resolution requires new_parent_id",
                        ))?;
                set_parent(&conn, &resolution.block_id, Some(parent_id))
            }
            ResolutionChoice::MakeRoot => set_parent(&conn, &resolution.block_id, None),
            ResolutionChoice::Discard => discard_block(&conn, &resolution.block_id),
        }
    }

    /// Apply the whole batch, clear the stored conflict list, and return
    /// the session to `active` so it can be resubmitted.
    pub fn resolve(
        &self,
        session_db_path: &Path,
        resolutions: &[Resolution],
    ) -> Result<(), StorageError> {
        for resolution in resolutions {
            self.apply_resolution(session_db_path, resolution)?;
        }
        let conn = session_store::open_session_db(session_db_path)?;
        conn.execute("UPDATE _session_meta SET conflicts = NULL", [])?;
        session_store::set_status(&conn, SessionStatus::Active.as_str())?;
        session_store::touch(&conn, now_ms())?;
        Ok(())
    }

    /// Acknowledge the canonical state: the dependency snapshot takes the
    /// current canonical hash so revalidation passes.
    fn refresh_snapshot_hash(&self, conn: &Connection, block_id: &str) -> Result<(), StorageError> {
        let current_hash =
            self.content
                .block_hash(block_id)?
                .ok_or_else(|| StorageError::NotFound {
                    entity: "block",
                    id: block_id.to_string(),
                })?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT snapshot_hashes FROM _structural_deps WHERE block_id = ?1",
                params![block_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(raw) = raw else {
            return Ok(());
        };
        let mut hashes: std::collections::BTreeMap<String, String> =
            serde_json::from_str(&raw).unwrap_or_default();
        hashes.insert(block_id.to_string(), current_hash);
        conn.execute(
            "UPDATE _structural_deps SET snapshot_hashes = ?1 WHERE block_id = ?2",
            params![serde_json::to_string(&hashes)?, block_id],
        )?;
        Ok(())
    }

    fn replace_with_canonical(&self, conn: &Connection, block_id: &str) -> Result<(), StorageError> {
        let canonical =
            self.content
                .get_live_block(block_id)?
                .ok_or_else(|| StorageError::NotFound {
                    entity: "block",
                    id: block_id.to_string(),
                })?;
        conn.execute(
            "UPDATE blocks SET parent_id = ?1, type = ?2, content = ?3, content_html = ?4, \
             position = ?5, hash = ?6, updated_at_ms = ?7, published = ?8, _dirty = 0 \
             WHERE id = ?9",
            params![
                canonical.parent_id,
                canonical.block_type,
                canonical.content,
                canonical.content_html,
                canonical.position,
                canonical.hash,
                now_ms(),
                canonical.published as i64,
                block_id,
            ],
        )?;
        Ok(())
    }
}

fn apply_manual_block(conn: &Connection, merged: &Block) -> Result<(), StorageError> {
    let mut block = merged.clone();
    block.refresh_hash();
    block.updated_at_ms = now_ms();
    conn.execute(
        "UPDATE blocks SET content = ?1, content_html = ?2, position = ?3, hash = ?4, \
         updated_at_ms = ?5, _dirty = 1 WHERE id = ?6",
        params![
            block.content,
            block.content_html,
            block.position,
            block.hash,
            block.updated_at_ms,
            block.id,
        ],
    )?;
    Ok(())
}

/// Re-insert instead of update: flip the row to `new` and forget the
/// stale dependency so validation no longer expects the old canonical row.
fn mark_as_new(conn: &Connection, block_id: &str) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE blocks SET _source = 'new', _dirty = 1 WHERE id = ?1",
        params![block_id],
    )?;
    conn.execute(
        "DELETE FROM _structural_deps WHERE block_id = ?1",
        params![block_id],
    )?;
    Ok(())
}

fn set_parent(
    conn: &Connection,
    block_id: &str,
    parent_id: Option<&str>,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE blocks SET parent_id = ?1, _dirty = 1, updated_at_ms = ?2 WHERE id = ?3",
        params![parent_id, now_ms(), block_id],
    )?;
    Ok(())
}

fn discard_block(conn: &Connection, block_id: &str) -> Result<(), StorageError> {
    conn.execute("DELETE FROM blocks WHERE id = ?1", params![block_id])?;
    conn.execute("DELETE FROM _changes WHERE block_id = ?1", params![block_id])?;
    conn.execute(
        "DELETE FROM _structural_deps WHERE block_id = ?1",
        params![block_id],
    )?;
    Ok(())
}

fn compute_field_diffs(session: &Block, content: &Block) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    if session.content != content.content {
        diffs.push(FieldDiff {
            field: "content".to_string(),
            session_value: session.content.clone(),
            content_value: content.content.clone(),
        });
    }
    if session.position != content.position {
        diffs.push(FieldDiff {
            field: "position".to_string(),
            session_value: session.position.clone(),
            content_value: content.position.clone(),
        });
    }
    if session.block_type != content.block_type {
        diffs.push(FieldDiff {
            field: "type".to_string(),
            session_value: session.block_type.clone(),
            content_value: content.block_type.clone(),
        });
    }
    if session.published != content.published {
        diffs.push(FieldDiff {
            field: "published".to_string(),
            session_value: session.published.to_string(),
            content_value: content.published.to_string(),
        });
    }
    diffs
}
