//! Per-user conversation history, one JSON file per identity.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IdentityError, PersistenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "ai")]
    Assistant,
}

impl Speaker {
    pub fn role(self) -> &'static str {
        match self {
            Speaker::Human => "human",
            Speaker::Assistant => "ai",
        }
    }
}

/// One utterance. Stored as `{"type": "human" | "ai", "content": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    #[serde(rename = "type")]
    speaker: Speaker,
    content: String,
}

impl Turn {
    pub fn human(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Human,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            content: text.into(),
        }
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.content
    }
}

/// Key selecting a history file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserIdentity(String);

impl UserIdentity {
    pub fn new(raw: &str) -> Result<Self, IdentityError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(IdentityError::Empty);
        }
        if id.contains(['/', '\\']) || id.contains("..") {
            return Err(IdentityError::Unsafe(id.to_string()));
        }
        Ok(Self(id.to_string()))
    }

    pub fn guest() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("guest-{}", &id[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render turns as `role: text` blocks separated by a blank line.
/// Only used as model context, never parsed back.
pub fn flatten_for_context(history: &[Turn]) -> String {
    history
        .iter()
        .map(|t| format!("{}: {}", t.speaker().role(), t.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("voice-companion")
            .join("history")
    }

    pub fn path_for(&self, user: &UserIdentity) -> PathBuf {
        self.dir.join(format!("{user}.json"))
    }

    /// Never fails: a missing or unreadable file is an empty history.
    pub fn load_history(&self, user: &UserIdentity) -> Vec<Turn> {
        let path = self.path_for(user);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(user = %user, "no history yet");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read history, starting empty");
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<Turn>>(&data) {
            Ok(turns) => {
                tracing::debug!(user = %user, turns = turns.len(), "history loaded");
                turns
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed history, starting empty");
                Vec::new()
            }
        }
    }

    /// Strict read used before writing: only a missing file counts as empty.
    pub fn read_existing(&self, user: &UserIdentity) -> Result<Vec<Turn>, PersistenceError> {
        let path = self.path_for(user);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(PersistenceError::Read { path, source }),
        };
        serde_json::from_str(&data).map_err(|source| PersistenceError::Corrupt { path, source })
    }

    /// Re-read what is on disk, append `new_turns`, write it all back.
    /// Returns the number of turns now stored. A file that cannot be read
    /// back is left untouched.
    pub fn append_and_persist(
        &self,
        user: &UserIdentity,
        new_turns: &[Turn],
    ) -> Result<usize, PersistenceError> {
        if new_turns.is_empty() {
            return Ok(self.load_history(user).len());
        }
        let mut turns = self.read_existing(user)?;
        turns.extend_from_slice(new_turns);

        let data = serde_json::to_string_pretty(&turns)?;
        let path = self.path_for(user);
        write_replacing(&self.dir, &path, data.as_bytes()).map_err(|source| {
            PersistenceError::Io {
                path: path.clone(),
                source,
            }
        })?;

        tracing::info!(user = %user, added = new_turns.len(), total = turns.len(), "history saved");
        Ok(turns.len())
    }
}

/// Write to a sibling temp file and rename it over `path`.
fn write_replacing(dir: &Path, path: &Path, data: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
