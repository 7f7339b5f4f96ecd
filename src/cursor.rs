//! Persisted resume cursor, one JSON file per scope.
//!
//! Each scope (a chat, a channel, any logical enumeration) owns
//! `<state_dir>/<scope>.json`. The file is a JSON object; the engine only
//! owns [`LAST_PROCESSED_KEY`] and merges its writes into whatever other keys
//! are already there.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Key holding the highest fully processed message id.
pub const LAST_PROCESSED_KEY: &str = "lastProcessedMessageId";

/// Errors produced by cursor persistence.
#[derive(Debug, Error)]
pub enum CursorError {
    /// I/O error writing the cursor file.
    #[error("I/O error writing cursor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error.
    #[error("failed to serialize cursor {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl CursorError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reads and writes per-scope cursor files under one state directory.
#[derive(Debug, Clone)]
pub struct CursorStore {
    root: PathBuf,
}

impl CursorStore {
    /// Creates a store rooted at `state_dir`. Nothing is touched until the
    /// first write.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into(),
        }
    }

    /// Returns the state directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the cursor file path for `scope`.
    #[must_use]
    pub fn path_for(&self, scope: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_scope(scope)))
    }

    /// Loads the whole cursor object. Missing or unreadable files yield an
    /// empty object.
    #[instrument(skip(self))]
    pub async fn load(&self, scope: &str) -> Map<String, Value> {
        let path = self.path_for(scope);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cursor file yet");
                return Map::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cursor file unreadable, starting from zero");
                return Map::new();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                warn!(path = %path.display(), "cursor file is not a JSON object, starting from zero");
                Map::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cursor file corrupt, starting from zero");
                Map::new()
            }
        }
    }

    /// Returns the last processed message id for `scope`, or 0.
    pub async fn get(&self, scope: &str) -> i64 {
        self.load(scope)
            .await
            .get(LAST_PROCESSED_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// Merges `patch` into the persisted object for `scope`.
    ///
    /// The file is written to a sibling temp file and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError`] if the directory, temp file or rename fails.
    #[instrument(skip(self, patch))]
    pub async fn set(&self, scope: &str, patch: Map<String, Value>) -> Result<(), CursorError> {
        let path = self.path_for(scope);
        let mut current = self.load(scope).await;
        current.extend(patch);

        let body = serde_json::to_vec_pretty(&Value::Object(current)).map_err(|source| {
            CursorError::Serialize {
                path: path.clone(),
                source,
            }
        })?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CursorError::io(&self.root, e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| CursorError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CursorError::io(&path, e))?;

        debug!(path = %path.display(), "cursor written");
        Ok(())
    }

    /// Moves the cursor for `scope` to `message_id` unless it is already at
    /// or past it. Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns [`CursorError`] if the write fails.
    pub async fn advance(&self, scope: &str, message_id: i64) -> Result<bool, CursorError> {
        let current = self.get(scope).await;
        if message_id <= current {
            debug!(current, message_id, "cursor already at or past position");
            return Ok(false);
        }

        let mut patch = Map::new();
        patch.insert(LAST_PROCESSED_KEY.to_string(), Value::from(message_id));
        self.set(scope, patch).await?;
        Ok(true)
    }
}

/// Maps a scope key onto a safe file stem.
fn sanitize_scope(scope: &str) -> String {
    let cleaned: String = scope
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned.to_string()
    }
}
