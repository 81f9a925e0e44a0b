//! JSON-file implementation of the MCP configuration store.
//!
//! Each user's document lives in `<root>/<sha256(user_id)>.json`. Hashing the
//! id keeps arbitrary header values out of the filesystem namespace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use toolbridge_core::{McpConfigStore, McpConfigStoreError, McpServersDocument};

use crate::paths;

/// File-backed configuration store.
pub struct JsonFileConfigStore {
    root: PathBuf,
    // Serializes writes so temp files never collide.
    write_lock: Mutex<()>,
}

impl JsonFileConfigStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a store in the default data directory.
    pub fn from_default_dir() -> Result<Self, McpConfigStoreError> {
        Ok(Self::new(paths::mcp_config_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document for `user_id`.
    pub fn document_path(&self, user_id: &str) -> Result<PathBuf, McpConfigStoreError> {
        if user_id.trim().is_empty() {
            return Err(McpConfigStoreError::InvalidUser(
                "user id must not be empty".to_string(),
            ));
        }

        let digest = Sha256::digest(user_id.as_bytes());
        Ok(self.root.join(format!("{digest:x}.json")))
    }

    async fn write_document(
        &self,
        path: &Path,
        document: &McpServersDocument,
    ) -> Result<(), McpConfigStoreError> {
        let json = serde_json::to_string_pretty(document)
            .map_err(|e| McpConfigStoreError::Serialization(e.to_string()))?;

        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(&self.root, &e))?;

        // Write then rename so readers never see a truncated document.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error(&tmp, &e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error(path, &e))?;

        Ok(())
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> McpConfigStoreError {
    McpConfigStoreError::Io(format!("{}: {err}", path.display()))
}

#[async_trait]
impl McpConfigStore for JsonFileConfigStore {
    async fn read(&self, user_id: &str) -> Result<McpServersDocument, McpConfigStoreError> {
        let path = self.document_path(user_id)?;

        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                McpConfigStoreError::Serialization(format!("{}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Creating empty MCP configuration");
                let document = McpServersDocument::default();
                self.write_document(&path, &document).await?;
                Ok(document)
            }
            Err(e) => Err(io_error(&path, &e)),
        }
    }

    async fn write(
        &self,
        user_id: &str,
        document: &McpServersDocument,
    ) -> Result<(), McpConfigStoreError> {
        let path = self.document_path(user_id)?;
        self.write_document(&path, document).await?;
        tracing::debug!(
            path = %path.display(),
            server_count = document.len(),
            "Wrote MCP configuration"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use toolbridge_core::McpServerConfig;

    fn store() -> (TempDir, JsonFileConfigStore) {
        let dir = TempDir::new().unwrap();
        let store = JsonFileConfigStore::new(dir.path().join("mcp"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_read_creates_empty_document() {
        let (_dir, store) = store();

        let document = store.read("alice").await.unwrap();
        assert!(document.is_empty());

        let path = store.document_path("alice").unwrap();
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({ "mcpServers": {} }));
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, store) = store();

        let mut document = McpServersDocument::default();
        document.insert("search", McpServerConfig::sse("https://example.com/sse").unwrap());
        store.write("alice", &document).await.unwrap();

        let read_back = store.read("alice").await.unwrap();
        assert_eq!(read_back, document);
        assert!(read_back.contains("search"));
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let (_dir, store) = store();

        let mut document = McpServersDocument::default();
        document.insert("fs", McpServerConfig::stdio("mcp-fs", vec![]));
        store.write("alice", &document).await.unwrap();

        assert!(store.read("bob").await.unwrap().is_empty());
        assert_ne!(
            store.document_path("alice").unwrap(),
            store.document_path("bob").unwrap()
        );
    }

    #[tokio::test]
    async fn test_user_id_is_not_a_path() {
        let (_dir, store) = store();

        let path = store.document_path("../../etc/passwd").unwrap();
        assert_eq!(path.parent(), Some(store.root()));
    }

    #[tokio::test]
    async fn test_empty_user_id_rejected() {
        let (_dir, store) = store();

        let err = store.read("  ").await.unwrap_err();
        assert!(matches!(err, McpConfigStoreError::InvalidUser(_)));
    }

    #[tokio::test]
    async fn test_malformed_file_is_serialization_error() {
        let (_dir, store) = store();

        let path = store.document_path("alice").unwrap();
        std::fs::create_dir_all(store.root()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        let err = store.read("alice").await.unwrap_err();
        assert!(matches!(err, McpConfigStoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_externally_written_entries_survive() {
        let (_dir, store) = store();

        let path = store.document_path("alice").unwrap();
        std::fs::create_dir_all(store.root()).unwrap();
        std::fs::write(
            &path,
            r#"{ "mcpServers": { "legacy": { "command": "node", "args": ["server.js"], "note": "x" } } }"#,
        )
        .unwrap();

        let mut document = store.read("alice").await.unwrap();
        assert!(document.set_disabled("legacy", true));
        store.write("alice", &document).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["mcpServers"]["legacy"]["note"], "x");
        assert_eq!(raw["mcpServers"]["legacy"]["disabled"], true);
    }
}
