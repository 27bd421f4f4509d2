//! Research access control.
//!
//! A research is visible to its owner (the user who created it) and to markers the owner has
//! assigned. Relational storage of these grants is outside this crate; [`ResearchAccess`] is the
//! seam a database-backed implementation plugs into.

use async_trait::async_trait;
use ctmark_uuid::ResearchId;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[async_trait]
pub trait ResearchAccess: Send + Sync {
    /// Records `user` as the owner of `id`.
    async fn register_owner(&self, user: &str, id: &ResearchId);

    /// The owner of `id`, if one was registered.
    async fn owner(&self, id: &ResearchId) -> Option<String>;

    /// Grants `user` access to `id`.
    async fn grant(&self, user: &str, id: &ResearchId);

    /// True if `user` owns `id` or was granted access to it.
    async fn can_access(&self, user: &str, id: &ResearchId) -> bool;

    /// Drops every grant on `id`.
    async fn forget(&self, id: &ResearchId);
}

#[derive(Debug, Default)]
struct Grants {
    owner: Option<String>,
    markers: HashSet<String>,
}

/// Process-local [`ResearchAccess`].
#[derive(Debug, Default)]
pub struct InMemoryResearchAccess {
    grants: RwLock<HashMap<ResearchId, Grants>>,
}

impl InMemoryResearchAccess {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResearchAccess for InMemoryResearchAccess {
    async fn register_owner(&self, user: &str, id: &ResearchId) {
        let mut grants = self.grants.write().await;
        grants.entry(id.clone()).or_default().owner = Some(user.to_owned());
    }

    async fn owner(&self, id: &ResearchId) -> Option<String> {
        let grants = self.grants.read().await;
        grants.get(id).and_then(|g| g.owner.clone())
    }

    async fn grant(&self, user: &str, id: &ResearchId) {
        let mut grants = self.grants.write().await;
        grants
            .entry(id.clone())
            .or_default()
            .markers
            .insert(user.to_owned());
    }

    async fn can_access(&self, user: &str, id: &ResearchId) -> bool {
        let grants = self.grants.read().await;
        grants.get(id).is_some_and(|g| {
            g.owner.as_deref() == Some(user) || g.markers.contains(user)
        })
    }

    async fn forget(&self, id: &ResearchId) {
        self.grants.write().await.remove(id);
    }
}
