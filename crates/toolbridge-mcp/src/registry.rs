//! Per-user manager registry.
//!
//! Each user gets an independent [`McpManager`]. The registry keeps at most
//! `capacity` of them alive and disconnects the least recently used one when
//! a new user arrives. A capacity of one behaves like a single shared
//! manager that is replaced whenever the user changes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures_util::future::join_all;
use toolbridge_core::McpConfigStore;

use crate::manager::McpManager;
use crate::transport::TransportConnector;

/// Number of managers kept when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 16;

struct Entry {
    manager: Arc<McpManager>,
    last_access: Instant,
}

/// Lookup result of [`McpRegistry::get_or_create`].
pub struct Lookup {
    pub manager: Arc<McpManager>,
    /// The manager was created by this call and has not been initialized.
    pub created: bool,
}

pub struct McpRegistry {
    store: Arc<dyn McpConfigStore>,
    connector: Arc<dyn TransportConnector>,
    capacity: usize,
    managers: Mutex<HashMap<String, Entry>>,
}

impl McpRegistry {
    pub fn new(
        store: Arc<dyn McpConfigStore>,
        connector: Arc<dyn TransportConnector>,
        capacity: usize,
    ) -> Self {
        Self {
            store,
            connector,
            capacity: capacity.max(1),
            managers: Mutex::new(HashMap::new()),
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store(&self) -> &Arc<dyn McpConfigStore> {
        &self.store
    }

    /// Manager for `user_id`, created on first use.
    ///
    /// Creating one may evict the least recently used manager, which is
    /// disconnected in the background.
    pub fn get_or_create(&self, user_id: &str) -> Lookup {
        let (lookup, evicted) = {
            let mut managers = self.lock();
            if let Some(entry) = managers.get_mut(user_id) {
                entry.last_access = Instant::now();
                return Lookup {
                    manager: Arc::clone(&entry.manager),
                    created: false,
                };
            }

            let evicted = if managers.len() >= self.capacity {
                Self::evict_oldest(&mut managers)
            } else {
                None
            };

            let manager = Arc::new(McpManager::new(
                user_id,
                Arc::clone(&self.store),
                Arc::clone(&self.connector),
            ));
            managers.insert(
                user_id.to_string(),
                Entry {
                    manager: Arc::clone(&manager),
                    last_access: Instant::now(),
                },
            );
            tracing::debug!(user_id, "Created MCP manager");

            (
                Lookup {
                    manager,
                    created: true,
                },
                evicted,
            )
        };

        if let Some(manager) = evicted {
            tracing::info!(user_id = %manager.user_id(), "Evicting idle MCP manager");
            tokio::spawn(async move { manager.disconnect_all().await });
        }

        lookup
    }

    /// Existing manager for `user_id`, without creating one.
    pub fn get(&self, user_id: &str) -> Option<Arc<McpManager>> {
        let mut managers = self.lock();
        managers.get_mut(user_id).map(|entry| {
            entry.last_access = Instant::now();
            Arc::clone(&entry.manager)
        })
    }

    /// Drop the manager for `user_id`, closing its connections.
    pub async fn remove(&self, user_id: &str) -> bool {
        let removed = self.lock().remove(user_id);
        match removed {
            Some(entry) => {
                entry.manager.disconnect_all().await;
                true
            }
            None => false,
        }
    }

    /// Users with a live manager, sorted.
    pub fn active_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Disconnect and drop every manager.
    pub async fn disconnect_all(&self) {
        let managers: Vec<Arc<McpManager>> = self
            .lock()
            .drain()
            .map(|(_, entry)| entry.manager)
            .collect();

        join_all(managers.iter().map(|manager| manager.disconnect_all())).await;
    }

    fn evict_oldest(managers: &mut HashMap<String, Entry>) -> Option<Arc<McpManager>> {
        let oldest = managers
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(user_id, _)| user_id.clone())?;
        managers.remove(&oldest).map(|entry| entry.manager)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.managers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
