//! Durable storage for [`PollState`].
//!
//! The whole record is one JSON file. Writes go to a sibling temp file that
//! is then renamed over the target, so a crash mid-write leaves the previous
//! state intact.

use responder_core::{CoreError, PollState, StateError};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of [`StateStore::load`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub state: PollState,
    /// True when no usable file existed and `state` is the default.
    pub fresh: bool,
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the state file. Missing or corrupt files degrade to a fresh
    /// state; they are never an error.
    pub async fn load(&self) -> LoadedState {
        match self.read().await {
            Ok(Some(mut state)) => {
                state.normalize();
                info!(
                    "Loaded state from {} (last_article_id={}, watched={})",
                    self.path.display(),
                    state.last_scanned_id(),
                    state.watched.len()
                );
                LoadedState { state, fresh: false }
            }
            Ok(None) => {
                info!("No state file at {}; starting fresh", self.path.display());
                LoadedState {
                    state: PollState::default(),
                    fresh: true,
                }
            }
            Err(e) => {
                warn!("{}; starting fresh", e);
                LoadedState {
                    state: PollState::default(),
                    fresh: true,
                }
            }
        }
    }

    async fn read(&self) -> Result<Option<PollState>, StateError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(_) => {
                return Err(StateError::Unreadable {
                    path: self.path.display().to_string(),
                })
            }
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Stamps `last_run` and writes the state atomically.
    pub async fn save(&self, state: &mut PollState) -> Result<(), CoreError> {
        state.touch();
        let body = serde_json::to_string_pretty(state)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.persist_failed(e))?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .map_err(|e| self.persist_failed(e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.persist_failed(e));
        }

        debug!("State saved to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist_failed(&self, e: std::io::Error) -> CoreError {
        StateError::PersistFailed {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        }
        .into()
    }
}
