//! Repository slots: the numbered unit of work inside a sandbox.

use crate::ports::PortSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Directory under which repositories are cloned inside the sandbox.
pub const PROJECTS_DIR: &str = "/projects";

/// Label key prefix used to record slot assignments on the provider-side
/// sandbox record, so repair can rediscover slots without local state.
pub const SLOT_LABEL_PREFIX: &str = "dockyard.slot.";

/// Where a slot's repository came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// The sandbox's implicit default workspace (always slot 0)
    Default,
    /// Cloned from a GitHub URL
    Github,
    /// Cloned from a manually supplied URL
    Manual,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Default => "default",
            SourceKind::Github => "github",
            SourceKind::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(SourceKind::Default),
            "github" => Some(SourceKind::Github),
            "manual" => Some(SourceKind::Manual),
            _ => None,
        }
    }
}

/// Source descriptor for one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSource {
    /// Clone URL; absent for the default slot
    pub url: Option<String>,
    /// Display name (arbitrary characters allowed; sanitized only for paths)
    pub name: String,
    /// Optional human-readable description
    pub description: Option<String>,
    pub kind: SourceKind,
}

/// One numbered unit of work inside a sandbox.
///
/// Slot indices are dense, assigned in insertion order, and immutable: an
/// index is never renumbered or reused, even if other slots are later
/// dropped. Slot 0 is reserved for the default workspace and always sorts
/// first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySlot {
    pub index: usize,
    pub source: RepoSource,
    /// Clone target inside the sandbox, derived from the sanitized name
    pub path: PathBuf,
    pub ports: PortSet,
}

impl RepositorySlot {
    pub fn new(index: usize, source: RepoSource, ports: PortSet) -> Self {
        let path = slot_path(&source.name);
        Self {
            index,
            source,
            path,
            ports,
        }
    }

    /// Label entry recording this slot on the sandbox.
    pub fn label_entry(&self) -> (String, String) {
        (
            format!("{SLOT_LABEL_PREFIX}{}", self.index),
            format!("{}:{}", self.source.kind.as_str(), self.source.name),
        )
    }
}

/// Replace every non-alphanumeric character with `-`.
///
/// Applied to display names when building filesystem paths. Session names
/// deliberately use the raw display name (see `SessionKey`).
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Clone target path for a repository name.
pub fn slot_path(name: &str) -> PathBuf {
    PathBuf::from(PROJECTS_DIR).join(sanitize_name(name))
}

/// Rebuild the slot list recorded in sandbox labels, recomputing ports from
/// the allocator. Slots come back sorted by index, default slot first by
/// construction (it is always index 0).
pub fn slots_from_labels(
    labels: &HashMap<String, String>,
    allocator: &crate::ports::PortAllocator,
) -> Vec<RepositorySlot> {
    let mut slots: Vec<RepositorySlot> = labels
        .iter()
        .filter_map(|(key, value)| {
            let index: usize = key.strip_prefix(SLOT_LABEL_PREFIX)?.parse().ok()?;
            let (kind, name) = value.split_once(':')?;
            let kind = SourceKind::parse(kind)?;
            Some(RepositorySlot::new(
                index,
                RepoSource {
                    url: None,
                    name: name.to_string(),
                    description: None,
                    kind,
                },
                allocator.allocate(index),
            ))
        })
        .collect();
    slots.sort_by_key(|slot| slot.index);
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::ports::PortAllocator;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my-repo"), "my-repo");
        assert_eq!(sanitize_name("My Repo!"), "My-Repo-");
        assert_eq!(sanitize_name("a/b@c"), "a-b-c");
        assert_eq!(sanitize_name("plain123"), "plain123");
    }

    #[test]
    fn test_slot_path() {
        assert_eq!(slot_path("My Repo"), PathBuf::from("/projects/My-Repo"));
    }

    #[test]
    fn test_label_round_trip() {
        let allocator = PortAllocator::new(PortConfig::default());
        let slot = RepositorySlot::new(
            2,
            RepoSource {
                url: Some("https://github.com/acme/r2.git".to_string()),
                name: "r2".to_string(),
                description: None,
                kind: SourceKind::Github,
            },
            allocator.allocate(2),
        );

        let labels: HashMap<String, String> = [slot.label_entry()].into();
        let rebuilt = slots_from_labels(&labels, &allocator);
        assert_eq!(rebuilt.len(), 1);
        assert_eq!(rebuilt[0].index, 2);
        assert_eq!(rebuilt[0].source.name, "r2");
        assert_eq!(rebuilt[0].source.kind, SourceKind::Github);
        assert_eq!(rebuilt[0].ports, allocator.allocate(2));
    }

    #[test]
    fn test_slots_from_labels_sorted_and_ignores_foreign_keys() {
        let allocator = PortAllocator::new(PortConfig::default());
        let labels: HashMap<String, String> = [
            ("dockyard.slot.1".to_string(), "github:r1".to_string()),
            ("dockyard.slot.0".to_string(), "default:workspace".to_string()),
            ("owner".to_string(), "alice".to_string()),
            ("dockyard.slot.bad".to_string(), "github:x".to_string()),
        ]
        .into();

        let slots = slots_from_labels(&labels, &allocator);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].index, 0);
        assert_eq!(slots[0].source.kind, SourceKind::Default);
        assert_eq!(slots[1].index, 1);
    }
}
