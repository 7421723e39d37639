//! Bijective mapping between model element ids and tracker work item ids.
//!
//! The repository is rebuilt from a bulk query at the start of every run and
//! only mutated by the orchestrating thread afterwards. Each local id also
//! keeps the last known remote snapshot of its work item.

use std::collections::HashMap;

use crate::model::WorkItem;

/// Errors raised when the repository invariants would be violated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Only work items that exist on the tracker can be registered.
    #[error("work item for local id {local_id} has no remote id")]
    MissingRemoteId {
        /// Local id of the offending work item.
        local_id: String,
    },
}

impl IdentityError {
    #[must_use]
    pub const fn code(&self) -> crate::error::ErrorCode {
        crate::error::ErrorCode::IdentityViolation
    }
}

/// Local id <-> remote id bijection plus one snapshot per local id.
#[derive(Debug, Default, Clone)]
pub struct IdentityRepository {
    local_to_remote: HashMap<String, String>,
    remote_to_local: HashMap<String, String>,
    snapshots: HashMap<String, WorkItem>,
}

impl IdentityRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository from remote work items.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MissingRemoteId`] if any item has no id.
    pub fn from_items(items: impl IntoIterator<Item = WorkItem>) -> Result<Self, IdentityError> {
        let mut repo = Self::new();
        repo.update(items)?;
        Ok(repo)
    }

    #[must_use]
    pub fn lookup_remote_id(&self, local_id: &str) -> Option<&str> {
        self.local_to_remote.get(local_id).map(String::as_str)
    }

    #[must_use]
    pub fn lookup_local_id(&self, remote_id: &str) -> Option<&str> {
        self.remote_to_local.get(remote_id).map(String::as_str)
    }

    #[must_use]
    pub fn get_snapshot(&self, local_id: &str) -> Option<&WorkItem> {
        self.snapshots.get(local_id)
    }

    #[must_use]
    pub fn get_snapshot_by_remote_id(&self, remote_id: &str) -> Option<&WorkItem> {
        self.lookup_local_id(remote_id)
            .and_then(|local_id| self.snapshots.get(local_id))
    }

    /// Register or refresh work items.
    ///
    /// A remote id that was mapped to a different local id before is moved
    /// to the new local id, and the stale entry is dropped. Items are
    /// validated up front so a rejected batch leaves the repository
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::MissingRemoteId`] for items without an id.
    pub fn update(&mut self, items: impl IntoIterator<Item = WorkItem>) -> Result<(), IdentityError> {
        let items: Vec<WorkItem> = items.into_iter().collect();
        if let Some(item) = items.iter().find(|item| item.id.is_none()) {
            return Err(IdentityError::MissingRemoteId {
                local_id: item.local_id.clone(),
            });
        }

        for item in items {
            let Some(remote_id) = item.id.clone() else {
                continue;
            };
            let local_id = item.local_id.clone();

            if let Some(stale_local) = self.remote_to_local.get(&remote_id)
                && *stale_local != local_id
            {
                let stale_local = stale_local.clone();
                self.local_to_remote.remove(&stale_local);
                self.snapshots.remove(&stale_local);
            }
            if let Some(stale_remote) = self.local_to_remote.get(&local_id)
                && *stale_remote != remote_id
            {
                let stale_remote = stale_remote.clone();
                self.remote_to_local.remove(&stale_remote);
            }

            self.local_to_remote.insert(local_id.clone(), remote_id.clone());
            self.remote_to_local.insert(remote_id, local_id.clone());
            self.snapshots.insert(local_id, item);
        }
        Ok(())
    }

    /// Forget the given local ids. Unknown ids are ignored.
    pub fn remove<I, S>(&mut self, local_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for local_id in local_ids {
            let local_id = local_id.as_ref();
            if let Some(remote_id) = self.local_to_remote.remove(local_id) {
                self.remote_to_local.remove(&remote_id);
            }
            self.snapshots.remove(local_id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.local_to_remote.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.local_to_remote.is_empty()
    }

    #[must_use]
    pub fn contains(&self, local_id: &str) -> bool {
        self.local_to_remote.contains_key(local_id)
    }

    /// Iterate `(local_id, remote_id, snapshot)` in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &WorkItem)> {
        self.local_to_remote.iter().filter_map(|(local, remote)| {
            self.snapshots
                .get(local)
                .map(|snapshot| (local.as_str(), remote.as_str(), snapshot))
        })
    }

    /// All registered local ids.
    pub fn local_ids(&self) -> impl Iterator<Item = &str> {
        self.local_to_remote.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(local: &str, remote: &str) -> WorkItem {
        WorkItem::new(local, "class", local).with_id(remote)
    }

    #[test]
    fn lookups_are_bijective() {
        let repo = IdentityRepository::from_items([item("a", "P-1"), item("b", "P-2")])
            .expect("valid items");

        assert_eq!(repo.len(), 2);
        assert_eq!(repo.lookup_remote_id("a"), Some("P-1"));
        assert_eq!(repo.lookup_local_id("P-2"), Some("b"));
        assert_eq!(
            repo.get_snapshot_by_remote_id("P-1").map(|w| w.local_id.as_str()),
            Some("a")
        );
    }

    #[test]
    fn reused_remote_id_evicts_stale_local() {
        let mut repo = IdentityRepository::from_items([item("a", "P-1")]).expect("valid items");
        repo.update([item("b", "P-1")]).expect("valid items");

        assert_eq!(repo.len(), 1);
        assert!(!repo.contains("a"));
        assert!(repo.get_snapshot("a").is_none());
        assert_eq!(repo.lookup_local_id("P-1"), Some("b"));
    }

    #[test]
    fn changed_remote_id_drops_old_reverse_entry() {
        let mut repo = IdentityRepository::from_items([item("a", "P-1")]).expect("valid items");
        repo.update([item("a", "P-9")]).expect("valid items");

        assert_eq!(repo.lookup_remote_id("a"), Some("P-9"));
        assert_eq!(repo.lookup_local_id("P-1"), None);
    }

    #[test]
    fn items_without_remote_id_are_rejected() {
        let mut repo = IdentityRepository::new();
        let err = repo
            .update([item("a", "P-1"), WorkItem::new("b", "class", "b")])
            .expect_err("missing id must fail");

        assert_eq!(
            err,
            IdentityError::MissingRemoteId {
                local_id: "b".to_string()
            }
        );
        assert!(repo.is_empty());
    }

    #[test]
    fn remove_ignores_unknown_ids() {
        let mut repo =
            IdentityRepository::from_items([item("a", "P-1"), item("b", "P-2")]).expect("valid items");
        repo.remove(["a", "zzz"]);

        assert_eq!(repo.len(), 1);
        assert_eq!(repo.lookup_local_id("P-1"), None);
        assert_eq!(repo.iter().count(), 1);
    }
}
