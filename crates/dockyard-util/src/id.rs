//! ULID-based identifier generation with prefixes.
//!
//! Identifiers in dockyard follow the pattern: `prefix_ulid`
//! For example: `run_01HQXYZ...` for provisioning runs.
//!
//! Sandbox ids themselves are provider-assigned and opaque; the prefixed
//! identifiers here are used for things dockyard mints locally.

use ulid::Ulid;

/// Known identifier prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    /// A provisioning run (one `provision` call end to end).
    Run,
    /// A workspace label value used to tag provider-side sandboxes.
    Workspace,
}

impl IdPrefix {
    /// Get the string prefix for this identifier type.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Run => "run",
            IdPrefix::Workspace => "wks",
        }
    }

    /// Parse a prefix from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "run" => Some(IdPrefix::Run),
            "wks" => Some(IdPrefix::Workspace),
            _ => None,
        }
    }
}

/// Identifier generation and parsing utilities.
pub struct Identifier;

impl Identifier {
    /// Generate a new ascending identifier (newer = larger).
    pub fn ascending(prefix: IdPrefix) -> String {
        let ulid = Ulid::new();
        format!("{}_{}", prefix.as_str(), ulid.to_string().to_lowercase())
    }

    /// Parse an identifier into its prefix and ULID parts.
    pub fn parse(id: &str) -> Option<(IdPrefix, Ulid)> {
        let parts: Vec<&str> = id.splitn(2, '_').collect();
        if parts.len() != 2 {
            return None;
        }

        let prefix = IdPrefix::parse(parts[0])?;
        let ulid = Ulid::from_string(parts[1]).ok()?;
        Some((prefix, ulid))
    }

    /// Generate a provisioning-run ID.
    pub fn run() -> String {
        Self::ascending(IdPrefix::Run)
    }

    /// Generate a workspace label value.
    pub fn workspace() -> String {
        Self::ascending(IdPrefix::Workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id() {
        let id = Identifier::run();
        assert!(id.starts_with("run_"));
        assert_eq!(id.len(), 30); // "run_" (4) + ULID (26)
    }

    #[test]
    fn test_ascending_order() {
        let id1 = Identifier::ascending(IdPrefix::Run);
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = Identifier::ascending(IdPrefix::Run);
        assert!(id1 < id2, "Ascending IDs should increase over time");
    }

    #[test]
    fn test_parse_round_trip() {
        let id = Identifier::workspace();
        let (prefix, _ulid) = Identifier::parse(&id).unwrap();
        assert_eq!(prefix, IdPrefix::Workspace);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Identifier::parse("nounderscore").is_none());
        assert!(Identifier::parse("xyz_01HQXYZ").is_none());
        assert!(Identifier::parse("run_notaulid").is_none());
    }
}
