//! Read-only collaborators owned outside the engine.
//!
//! Krawl and user records live in another store; the engine only asks whether
//! they exist and, for a krawl, which gems it visits in order.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait KrawlLookup: Send + Sync {
    /// Ordered gem ids of the krawl, `None` if the krawl does not exist.
    async fn ordered_gem_ids(&self, krawl_id: &str) -> Result<Option<Vec<String>>>;

    async fn exists(&self, krawl_id: &str) -> Result<bool> {
        Ok(self.ordered_gem_ids(krawl_id).await?.is_some())
    }
}

#[async_trait]
pub trait UserLookup: Send + Sync {
    async fn exists(&self, user_id: &str) -> Result<bool>;
}

/// In-process krawl and user directory.
#[derive(Default)]
pub struct InMemoryDirectory {
    krawls: RwLock<HashMap<String, Vec<String>>>,
    users: RwLock<HashSet<String>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a krawl's gem sequence.
    pub async fn put_krawl<I, S>(&self, krawl_id: &str, gem_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gems = gem_ids.into_iter().map(Into::into).collect();
        self.krawls.write().await.insert(krawl_id.to_string(), gems);
    }

    pub async fn remove_krawl(&self, krawl_id: &str) {
        self.krawls.write().await.remove(krawl_id);
    }

    pub async fn put_user(&self, user_id: &str) {
        self.users.write().await.insert(user_id.to_string());
    }
}

#[async_trait]
impl KrawlLookup for InMemoryDirectory {
    async fn ordered_gem_ids(&self, krawl_id: &str) -> Result<Option<Vec<String>>> {
        Ok(self.krawls.read().await.get(krawl_id).cloned())
    }
}

#[async_trait]
impl UserLookup for InMemoryDirectory {
    async fn exists(&self, user_id: &str) -> Result<bool> {
        Ok(self.users.read().await.contains(user_id))
    }
}
