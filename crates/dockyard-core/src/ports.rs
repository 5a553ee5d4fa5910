//! Deterministic port allocation across repository slots.
//!
//! Each slot gets one port per service kind: `base(kind) + slot`. The math
//! is pure and total, so status code can recompute expected ports without
//! asking the sandbox anything.

use crate::config::PortConfig;
use crate::slot::{RepoSource, RepositorySlot, SourceKind};
use serde::{Deserialize, Serialize};

/// The fixed categories of long-running service started per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Editor,
    Terminal,
    PrimaryAssistant,
    SecondaryAssistant,
}

impl ServiceKind {
    /// All kinds, in launch order.
    pub const ALL: [ServiceKind; 4] = [
        ServiceKind::Editor,
        ServiceKind::Terminal,
        ServiceKind::PrimaryAssistant,
        ServiceKind::SecondaryAssistant,
    ];

    /// Kinds whose health gates the slot (assistants are best-effort).
    pub const CRITICAL: [ServiceKind; 2] = [ServiceKind::Editor, ServiceKind::Terminal];

    /// Prefix used when serializing a session key to a session name.
    /// The plain terminal uses `main` for historical compatibility.
    pub fn session_prefix(&self) -> &'static str {
        match self {
            ServiceKind::Editor => "editor",
            ServiceKind::Terminal => "main",
            ServiceKind::PrimaryAssistant => "assistant",
            ServiceKind::SecondaryAssistant => "assistant2",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Editor => write!(f, "editor"),
            ServiceKind::Terminal => write!(f, "terminal"),
            ServiceKind::PrimaryAssistant => write!(f, "primary assistant"),
            ServiceKind::SecondaryAssistant => write!(f, "secondary assistant"),
        }
    }
}

/// One port per service kind for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSet {
    pub editor: u16,
    pub terminal: u16,
    pub primary_assistant: u16,
    pub secondary_assistant: u16,
}

impl PortSet {
    /// Get the port for a service kind.
    pub fn port(&self, kind: ServiceKind) -> u16 {
        match kind {
            ServiceKind::Editor => self.editor,
            ServiceKind::Terminal => self.terminal,
            ServiceKind::PrimaryAssistant => self.primary_assistant,
            ServiceKind::SecondaryAssistant => self.secondary_assistant,
        }
    }

    /// All (kind, port) pairs.
    pub fn entries(&self) -> [(ServiceKind, u16); 4] {
        [
            (ServiceKind::Editor, self.editor),
            (ServiceKind::Terminal, self.terminal),
            (ServiceKind::PrimaryAssistant, self.primary_assistant),
            (ServiceKind::SecondaryAssistant, self.secondary_assistant),
        ]
    }

    /// All ports as a flat list.
    pub fn all(&self) -> [u16; 4] {
        [
            self.editor,
            self.terminal,
            self.primary_assistant,
            self.secondary_assistant,
        ]
    }
}

/// Composite key identifying one service session inside a sandbox.
///
/// Kept as a struct internally and only serialized to a string at the
/// remote-command boundary. Note the name component is the repository
/// display name, not its sanitized filesystem form: two display names that
/// sanitize identically can still collide here (known gap).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub kind: ServiceKind,
    pub name: String,
}

impl SessionKey {
    pub fn new(kind: ServiceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Serialize to the session name used by the terminal multiplexer.
    pub fn session_name(&self) -> String {
        format!("{}-{}", self.kind.session_prefix(), self.name)
    }
}

/// Pure mapping from slot index to per-service-kind port numbers.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    config: PortConfig,
}

impl PortAllocator {
    pub fn new(config: PortConfig) -> Self {
        Self { config }
    }

    /// Allocate the port set for a slot. Pure and deterministic; no I/O,
    /// no error cases.
    pub fn allocate(&self, slot: usize) -> PortSet {
        let offset = slot as u16;
        PortSet {
            editor: self.config.editor_base + offset,
            terminal: self.config.terminal_base + offset,
            primary_assistant: self.config.primary_assistant_base + offset,
            secondary_assistant: self.config.secondary_assistant_base + offset,
        }
    }

    /// The implicit default slot: index 0, default source, base ports.
    pub fn default_slot(&self) -> RepositorySlot {
        RepositorySlot::new(
            0,
            RepoSource {
                url: None,
                name: "workspace".to_string(),
                description: None,
                kind: SourceKind::Default,
            },
            self.allocate(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn allocator() -> PortAllocator {
        PortAllocator::new(PortConfig::default())
    }

    #[test]
    fn test_allocate_zero_is_bases() {
        let ports = allocator().allocate(0);
        assert_eq!(ports.editor, 8080);
        assert_eq!(ports.terminal, 10000);
        assert_eq!(ports.primary_assistant, 4000);
        assert_eq!(ports.secondary_assistant, 5000);
    }

    #[test]
    fn test_allocate_offsets_every_kind() {
        let ports = allocator().allocate(7);
        assert_eq!(ports.editor, 8087);
        assert_eq!(ports.terminal, 10007);
        assert_eq!(ports.primary_assistant, 4007);
        assert_eq!(ports.secondary_assistant, 5007);
    }

    #[test]
    fn test_no_port_shared_across_slots() {
        // Every (slot, kind) pair below the documented 1000-slot bound
        // must map to a distinct port.
        let allocator = allocator();
        let mut all = HashSet::new();
        for slot in 0..1000 {
            for port in allocator.allocate(slot).all() {
                assert!(all.insert(port), "port {port} collides (slot {slot})");
            }
        }
    }

    #[test]
    fn test_allocate_is_deterministic() {
        let allocator = allocator();
        assert_eq!(allocator.allocate(3), allocator.allocate(3));
    }

    #[test]
    fn test_default_slot() {
        let slot = allocator().default_slot();
        assert_eq!(slot.index, 0);
        assert_eq!(slot.source.kind, SourceKind::Default);
        assert_eq!(slot.ports, allocator().allocate(0));
    }

    #[test]
    fn test_session_names() {
        assert_eq!(
            SessionKey::new(ServiceKind::Editor, "r1").session_name(),
            "editor-r1"
        );
        assert_eq!(
            SessionKey::new(ServiceKind::Terminal, "r1").session_name(),
            "main-r1"
        );
        assert_eq!(
            SessionKey::new(ServiceKind::SecondaryAssistant, "r1").session_name(),
            "assistant2-r1"
        );
    }
}
