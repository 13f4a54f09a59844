//! Known mod conflicts.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictSeverity::Low => "LOW",
            ConflictSeverity::Medium => "MEDIUM",
            ConflictSeverity::High => "HIGH",
            ConflictSeverity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// One entry of the static conflicts table. The pair is unordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnownConflict {
    pub mod_a: String,
    pub mod_b: String,
    pub severity: ConflictSeverity,
    pub description: String,
}

impl KnownConflict {
    fn matches(&self, a: &str, b: &str) -> bool {
        (self.mod_a == a && self.mod_b == b) || (self.mod_a == b && self.mod_b == a)
    }
}

/// A conflict between two mods of one active set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModConflict {
    pub mod_id: String,
    pub conflicting_mod_id: String,
    pub severity: ConflictSeverity,
    pub description: String,
}

impl ModConflict {
    pub fn involves(&self, id: &str) -> bool {
        self.mod_id == id || self.conflicting_mod_id == id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KnownConflicts {
    entries: Vec<KnownConflict>,
}

impl KnownConflicts {
    pub fn new(entries: Vec<KnownConflict>) -> Self {
        Self { entries }
    }

    /// Conflicts reported often enough to ship with the agent.
    pub fn builtin() -> Self {
        Self::new(vec![
            KnownConflict {
                mod_a: "731604991".to_string(),
                mod_b: "1999447172".to_string(),
                severity: ConflictSeverity::High,
                description: "Structures Plus and Super Structures replace the same building pieces"
                    .to_string(),
            },
            KnownConflict {
                mod_a: "1404697612".to_string(),
                mod_b: "1609138312".to_string(),
                severity: ConflictSeverity::Medium,
                description: "Both mods override the stack size of resources".to_string(),
            },
            KnownConflict {
                mod_a: "895711211".to_string(),
                mod_b: "1428596566".to_string(),
                severity: ConflictSeverity::Critical,
                description: "Both mods replace the primal item crafting table".to_string(),
            },
        ])
    }

    pub fn lookup(&self, a: &str, b: &str) -> Option<&KnownConflict> {
        self.entries.iter().find(|c| c.matches(a, b))
    }

    pub fn entries(&self) -> &[KnownConflict] {
        &self.entries
    }

    /// Build a conflict for `a` and `b`, taking severity from the table and
    /// falling back to `Medium` when only the catalog declares it.
    pub fn classify(&self, a: &str, b: &str) -> ModConflict {
        match self.lookup(a, b) {
            Some(known) => ModConflict {
                mod_id: a.to_string(),
                conflicting_mod_id: b.to_string(),
                severity: known.severity,
                description: known.description.clone(),
            },
            None => ModConflict {
                mod_id: a.to_string(),
                conflicting_mod_id: b.to_string(),
                severity: ConflictSeverity::Medium,
                description: format!("{} declares a conflict with {}", a, b),
            },
        }
    }
}
