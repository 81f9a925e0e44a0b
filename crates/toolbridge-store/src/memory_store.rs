//! In-memory implementation of the MCP configuration store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use toolbridge_core::{McpConfigStore, McpConfigStoreError, McpServersDocument};

/// Configuration store that never touches the filesystem.
#[derive(Default)]
pub struct InMemoryConfigStore {
    documents: RwLock<HashMap<String, McpServersDocument>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a document for `user_id`.
    #[must_use]
    pub fn with_document(mut self, user_id: impl Into<String>, document: McpServersDocument) -> Self {
        self.documents.get_mut().insert(user_id.into(), document);
        self
    }

    /// Current document for `user_id`, without creating one.
    pub async fn document(&self, user_id: &str) -> Option<McpServersDocument> {
        self.documents.read().await.get(user_id).cloned()
    }
}

fn check_user(user_id: &str) -> Result<(), McpConfigStoreError> {
    if user_id.trim().is_empty() {
        return Err(McpConfigStoreError::InvalidUser(
            "user id must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl McpConfigStore for InMemoryConfigStore {
    async fn read(&self, user_id: &str) -> Result<McpServersDocument, McpConfigStoreError> {
        check_user(user_id)?;
        let mut documents = self.documents.write().await;
        Ok(documents.entry(user_id.to_string()).or_default().clone())
    }

    async fn write(
        &self,
        user_id: &str,
        document: &McpServersDocument,
    ) -> Result<(), McpConfigStoreError> {
        check_user(user_id)?;
        self.documents
            .write()
            .await
            .insert(user_id.to_string(), document.clone());
        Ok(())
    }
}
