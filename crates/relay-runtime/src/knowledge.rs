//! The knowledge-store contract and its file-backed implementation.
//!
//! Agents read named documents and append categorized insights. The store
//! is shared across sessions (it is `Sync`, unlike a connection) and names
//! are restricted to a safe charset so a hostile document or category name
//! can never escape the store root.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use relay_core::RelayError;
use relay_settings::RelaySettings;
use tokio::io::AsyncWriteExt;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Za-z0-9_-]+$").expect("static pattern"));

/// Shared read/append store for agent knowledge.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Read a named document, or `None` when it does not exist.
    async fn read(&self, document: &str) -> Result<Option<String>, RelayError>;

    /// Append an insight to a category, with its source attributions.
    async fn append(
        &self,
        category: &str,
        content: &str,
        sources: &[String],
    ) -> Result<(), RelayError>;
}

/// Markdown-file store rooted at a directory.
///
/// Documents live at `<root>/<name>.md`; insights append to
/// `<root>/insights/<category>.md`.
#[derive(Clone, Debug)]
pub struct FileKnowledgeStore {
    root: PathBuf,
}

impl FileKnowledgeStore {
    /// Create a store rooted at `root`. Directories are created lazily on
    /// first append.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create a store rooted at the configured memory directory, expanding
    /// a leading `~` to the user's home.
    #[must_use]
    pub fn from_settings(settings: &RelaySettings) -> Self {
        Self {
            root: expand_home(&settings.memory.dir),
        }
    }

    /// The store's root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn validate_name(name: &str) -> Result<(), RelayError> {
        if NAME_PATTERN.is_match(name) {
            Ok(())
        } else {
            Err(RelayError::Request(format!(
                "invalid knowledge name: {name:?}"
            )))
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    let home = || std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
    if raw == "~" {
        home()
    } else if let Some(rest) = raw.strip_prefix("~/") {
        home().join(rest)
    } else {
        PathBuf::from(raw)
    }
}

#[async_trait]
impl KnowledgeStore for FileKnowledgeStore {
    async fn read(&self, document: &str) -> Result<Option<String>, RelayError> {
        Self::validate_name(document)?;
        let path = self.root.join(format!("{document}.md"));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(RelayError::Request(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    async fn append(
        &self,
        category: &str,
        content: &str,
        sources: &[String],
    ) -> Result<(), RelayError> {
        Self::validate_name(category)?;
        let dir = self.root.join("insights");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|err| RelayError::Request(format!("failed to create insights dir: {err}")))?;
        let path = dir.join(format!("{category}.md"));

        let mut entry = format!("\n---\n{content}\n");
        if !sources.is_empty() {
            entry.push_str(&format!("Sources: {}\n", sources.join(", ")));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| {
                RelayError::Request(format!("failed to open {}: {err}", path.display()))
            })?;
        file.write_all(entry.as_bytes()).await.map_err(|err| {
            RelayError::Request(format!("failed to append to {}: {err}", path.display()))
        })?;
        file.flush()
            .await
            .map_err(|err| RelayError::Request(format!("failed to flush {}: {err}", path.display())))
    }
}
