#![forbid(unsafe_code)]

//! The four-directory submission queue.
//!
//! `rename(2)` is the only coordination primitive: submit renames a
//! session file into `pending/`, the merger claims it by renaming into
//! `processing/`, and routes it to `done/` or `failed/` when finished.
//! All four directories must live on the same volume as the sessions
//! directory for the renames to stay atomic.

use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct QueueDirs {
    pub pending: PathBuf,
    pub processing: PathBuf,
    pub done: PathBuf,
    pub failed: PathBuf,
}

impl QueueDirs {
    /// The standard layout under one queue root.
    pub fn under(queue_dir: impl AsRef<Path>) -> Self {
        let root = queue_dir.as_ref();
        Self {
            pending: root.join("pending"),
            processing: root.join("processing"),
            done: root.join("done"),
            failed: root.join("failed"),
        }
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.pending, &self.processing, &self.done, &self.failed] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn all(&self) -> [&Path; 4] {
        [&self.pending, &self.processing, &self.done, &self.failed]
    }
}
