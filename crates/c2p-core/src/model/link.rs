//! Typed directed links between work items and their minimal delta.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A typed directed relation from `primary_id` to `secondary_id`.
///
/// Ordering and equality follow the 4-tuple, so a `BTreeSet<Link>` is a
/// valid deduplicated link set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Link {
    pub primary_id: String,
    pub role: String,
    pub secondary_id: String,
    pub secondary_project: String,
}

impl Link {
    #[must_use]
    pub fn new(
        primary_id: impl Into<String>,
        secondary_id: impl Into<String>,
        role: impl Into<String>,
        secondary_project: impl Into<String>,
    ) -> Self {
        Self {
            primary_id: primary_id.into(),
            role: role.into(),
            secondary_id: secondary_id.into(),
            secondary_project: secondary_project.into(),
        }
    }

    /// Diff identity: `primary/role/secondary_project/secondary`.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.primary_id, self.role, self.secondary_project, self.secondary_id
        )
    }

    /// Sort key used when links feed a checksum: `role/secondary_project/secondary`.
    #[must_use]
    pub fn checksum_sort_key(&self) -> String {
        format!("{}/{}/{}", self.role, self.secondary_project, self.secondary_id)
    }
}

/// Links that must be created and deleted to turn one link set into another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDelta {
    pub to_create: Vec<Link>,
    pub to_delete: Vec<Link>,
}

impl LinkDelta {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Links of `left` whose key does not occur in `right`, keyed and sorted.
#[must_use]
pub fn missing_links<'a>(left: &'a [Link], right: &[Link]) -> BTreeMap<String, &'a Link> {
    let right_keys: std::collections::HashSet<String> = right.iter().map(Link::key).collect();
    left.iter()
        .map(|link| (link.key(), link))
        .filter(|(key, _)| !right_keys.contains(key))
        .collect()
}

/// Compute `(new - old, old - new)` by diff identity.
#[must_use]
pub fn link_delta(old: &[Link], new: &[Link]) -> LinkDelta {
    LinkDelta {
        to_create: missing_links(new, old).into_values().cloned().collect(),
        to_delete: missing_links(old, new).into_values().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(secondary: &str, role: &str) -> Link {
        Link::new("P-1", secondary, role, "PROJ")
    }

    #[test]
    fn key_orders_role_before_project() {
        assert_eq!(link("P-2", "parent").key(), "P-1/parent/PROJ/P-2");
        assert_eq!(link("P-2", "parent").checksum_sort_key(), "parent/PROJ/P-2");
    }

    #[test]
    fn delta_is_minimal() {
        let old = vec![link("P-2", "parent"), link("P-3", "parent")];
        let new = vec![link("P-3", "parent"), link("P-4", "parent")];

        let delta = link_delta(&old, &new);
        assert_eq!(delta.to_create, vec![link("P-4", "parent")]);
        assert_eq!(delta.to_delete, vec![link("P-2", "parent")]);
    }

    #[test]
    fn equal_sets_produce_empty_delta() {
        let links = vec![link("P-2", "parent"), link("P-2", "child")];
        let mut shuffled = links.clone();
        shuffled.reverse();
        assert!(link_delta(&links, &shuffled).is_empty());
    }

    #[test]
    fn role_change_is_delete_plus_create() {
        let delta = link_delta(&[link("P-2", "parent")], &[link("P-2", "child")]);
        assert_eq!(delta.to_create.len(), 1);
        assert_eq!(delta.to_delete.len(), 1);
    }
}
