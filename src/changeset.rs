//! File-backed change sets.
//!
//! A change set file is JSON:
//!
//! ```json
//! {
//!   "title": "Add login endpoint",
//!   "description": "...",
//!   "changes": [
//!     { "new_path": "src/api/login.py", "diff": "@@ -0,0 +1,2 @@\n+import auth\n+..." }
//!   ],
//!   "contents": { "src/api/login.py": "import auth\n..." }
//! }
//! ```
//!
//! Content not present in `contents` is read from `content_root` when one
//! is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::capability::{ChangeSetProvider, RunContext};
use crate::core::task::{RunMetadata, WorkDescriptor};
use crate::error::{Error, Result};
use crate::util::{blocking, blocking_with_timeout};

const CONTENT_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSetFile {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub changes: Vec<WorkDescriptor>,
    #[serde(default)]
    pub contents: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct JsonChangeSet {
    file: ChangeSetFile,
    content_root: Option<PathBuf>,
}

impl JsonChangeSet {
    pub fn new(file: ChangeSetFile) -> Self {
        Self {
            file,
            content_root: None,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    /// Read a change set file without blocking the runtime.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        debug!(path = %path.display(), "loading change set");
        let json = blocking(move || std::fs::read_to_string(&path).map_err(Error::from)).await?;
        Self::from_json(&json)
    }

    /// Resolve missing content against files under `root`.
    pub fn with_content_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.content_root = Some(root.into());
        self
    }

    pub fn changes(&self) -> &[WorkDescriptor] {
        &self.file.changes
    }

    pub fn file(&self) -> &ChangeSetFile {
        &self.file
    }
}

/// Reject keys that would escape the content root.
fn contained_path(root: &Path, key: &str) -> Option<PathBuf> {
    let relative = Path::new(key);
    if relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Some(root.join(relative))
    } else {
        None
    }
}

#[async_trait]
impl ChangeSetProvider for JsonChangeSet {
    async fn list_changed_items(&self, ctx: &RunContext) -> Result<Vec<WorkDescriptor>> {
        debug!(run_id = ?ctx.run_id, items = self.file.changes.len(), "listing changed items");
        Ok(self.file.changes.clone())
    }

    async fn get_item_content(&self, key: &str) -> Result<Option<String>> {
        if let Some(content) = self.file.contents.get(key) {
            return Ok(Some(content.clone()));
        }
        let Some(root) = &self.content_root else {
            return Ok(None);
        };
        let Some(path) = contained_path(root, key) else {
            return Err(Error::Provider(format!("target key escapes content root: {}", key)));
        };
        blocking_with_timeout(CONTENT_READ_TIMEOUT, move || match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::from(e)),
        })
        .await
    }

    fn metadata(&self) -> RunMetadata {
        RunMetadata::new(self.file.title.clone(), self.file.description.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "title": "Add login",
        "description": "adds an endpoint",
        "changes": [
            {"new_path": "src/api/login.py", "diff": "+import auth\n"},
            {"old_path": "old.py", "deleted_file": true}
        ],
        "contents": {"src/api/login.py": "import auth\n"}
    }"#;

    #[tokio::test]
    async fn test_parse_and_list() {
        let set = JsonChangeSet::from_json(SAMPLE).unwrap();
        let items = set.list_changed_items(&RunContext::default()).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[1].deleted_file);
        assert_eq!(set.metadata().title, "Add login");
    }

    #[tokio::test]
    async fn test_inline_content() {
        let set = JsonChangeSet::from_json(SAMPLE).unwrap();
        assert_eq!(
            set.get_item_content("src/api/login.py").await.unwrap().as_deref(),
            Some("import auth\n")
        );
        assert_eq!(set.get_item_content("missing.py").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_content_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/mod.py"), "x = 1\n").unwrap();

        let set = JsonChangeSet::default().with_content_root(dir.path());
        assert_eq!(
            set.get_item_content("pkg/mod.py").await.unwrap().as_deref(),
            Some("x = 1\n")
        );
        assert_eq!(set.get_item_content("pkg/absent.py").await.unwrap(), None);
        assert!(matches!(
            set.get_item_content("../etc/passwd").await,
            Err(Error::Provider(_))
        ));
    }

    #[tokio::test]
    async fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let set = JsonChangeSet::open(&path).await.unwrap();
        assert_eq!(set.changes().len(), 2);
    }

    #[tokio::test]
    async fn test_open_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("changes.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(JsonChangeSet::open(&path).await, Err(Error::Json(_))));
    }
}
