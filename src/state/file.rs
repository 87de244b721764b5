use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::StateError;

use super::{CHECKPOINT_ARTIFACT, Checkpoint, StateManager};

const MARKER_FILE: &str = "last_harvest_date.txt";

/// Two flat files under `state_dir`: a tab-separated four-field checkpoint
/// and a single-line last-harvest marker. Both are written via
/// write-to-temp-then-rename so a crash mid-write never leaves a torn file —
/// `load_state`/`load_date` after a crash return either the previous
/// content or the new content, never a partial one.
pub struct FileStateManager {
    state_dir: PathBuf,
}

impl FileStateManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir.join(CHECKPOINT_ARTIFACT)
    }

    fn marker_path(&self) -> PathBuf {
        self.state_dir.join(MARKER_FILE)
    }
}

#[async_trait]
impl StateManager for FileStateManager {
    async fn load_state(&self) -> Result<Option<Checkpoint>, StateError> {
        let path = self.checkpoint_path();
        let Some(contents) = read_optional(&path).await? else {
            return Ok(None);
        };

        let fields: Vec<&str> = contents.trim_end_matches('\n').split('\t').collect();
        if fields.len() != 4 {
            return Err(StateError::Corrupt {
                path: path.display().to_string(),
                found: fields.len(),
            });
        }

        Ok(Some(Checkpoint {
            set_spec: non_empty(fields[0]),
            resumption_token: fields[1].to_string(),
            effective_start_date: non_empty(fields[2]),
            effective_end_date: non_empty(fields[3]),
        }))
    }

    async fn save_state(&self, checkpoint: &Checkpoint) -> Result<(), StateError> {
        let line = format!(
            "{}\t{}\t{}\t{}",
            checkpoint.set_spec.as_deref().unwrap_or(""),
            checkpoint.resumption_token,
            checkpoint.effective_start_date.as_deref().unwrap_or(""),
            checkpoint.effective_end_date.as_deref().unwrap_or(""),
        );
        atomic_write(&self.checkpoint_path(), &line).await
    }

    async fn clear_state(&self) -> Result<(), StateError> {
        let path = self.checkpoint_path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "cleared checkpoint");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Write {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    async fn load_date(&self) -> Result<Option<String>, StateError> {
        let path = self.marker_path();
        Ok(read_optional(&path)
            .await?
            .map(|contents| contents.trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    async fn save_date(&self, date: &str) -> Result<(), StateError> {
        atomic_write(&self.marker_path(), date).await
    }
}

fn non_empty(field: &str) -> Option<String> {
    if field.is_empty() {
        None
    } else {
        Some(field.to_string())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, StateError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => {
            warn!(path = %path.display(), error = %source, "failed to read state file");
            Err(StateError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    }
}

async fn atomic_write(path: &Path, contents: &str) -> Result<(), StateError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| StateError::Write {
                path: path.display().to_string(),
                source,
            })?;
    }

    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|source| StateError::Write {
            path: tmp_path.display().to_string(),
            source,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|source| StateError::Write {
            path: path.display().to_string(),
            source,
        })
}
