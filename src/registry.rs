//! In-memory registries keyed by opaque random identifiers.
//!
//! A registry is owned by one [`crate::service::Trybook`] instance; nothing
//! here is process-global, so several instances can coexist in one test
//! binary. The map lock is only held for the insert or lookup itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Opaque identifier for operations and executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub Uuid);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Thread-safe `Id -> T` map supporting creation and lookup only.
///
/// Entries are cheap handles (`Arc` inside), so `get` hands out clones and
/// never keeps the map locked while callers work with the entry.
pub struct Registry<T> {
    entries: RwLock<HashMap<Id, T>>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate a fresh id, build the entry for it and insert it.
    pub async fn create<F>(&self, build: F) -> T
    where
        F: FnOnce(Id) -> T,
    {
        let mut entries = self.entries.write().await;
        let mut id = Id::new();
        while entries.contains_key(&id) {
            id = Id::new();
        }
        let entry = build(id);
        entries.insert(id, entry.clone());
        entry
    }

    pub async fn get(&self, id: &Id) -> Option<T> {
        self.entries.read().await.get(id).cloned()
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
