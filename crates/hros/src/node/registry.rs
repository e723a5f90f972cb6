// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name-keyed entity registries.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Map from resolved name to a shared entity.
///
/// The write guard is held across the master registration so creation is
/// idempotent per name.
pub(crate) struct Registry<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<T>> {
        self.entries.read().await.get(name).cloned()
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<T>>> {
        self.entries.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<T>>> {
        self.entries.write().await
    }

    /// Remove `name` only if it still maps to `entity`.
    pub async fn remove_if_same(&self, name: &str, entity: &Arc<T>) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(name) {
            Some(current) if Arc::ptr_eq(current, entity) => {
                entries.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Take every entry out of the registry.
    pub async fn drain(&self) -> Vec<(String, Arc<T>)> {
        self.entries.write().await.drain().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
