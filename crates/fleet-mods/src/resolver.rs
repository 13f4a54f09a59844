//! Load-order resolution and compatibility checks.

use crate::catalog::ModCatalog;
use crate::conflicts::{KnownConflicts, ModConflict};
use fleet_core::server::GameType;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrderEntry {
    pub mod_id: String,
    pub priority: i64,
    pub dependency_chain_length: usize,
    /// Deepest dependency path ending at this mod, base dependency first.
    pub dependency_chain: Vec<String>,
    /// Direct dependencies as declared in the catalog.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "reason")]
pub enum SkipReason {
    NotInCatalog,
    #[serde(rename_all = "camelCase")]
    CircularDependency {
        via: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedMod {
    pub mod_id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
    /// Set when the mod was reached as someone's dependency.
    pub required_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOrder {
    pub entries: Vec<LoadOrderEntry>,
    pub skipped: Vec<SkippedMod>,
}

impl LoadOrder {
    pub fn mod_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.mod_id.as_str()).collect()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.mod_id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    pub mod_id: String,
    pub compatible: bool,
    pub load_ok: bool,
    pub crash_on_load: bool,
    pub missing_dependencies: Vec<String>,
    pub conflicts: Vec<ModConflict>,
    pub issues: Vec<String>,
}

/// Resolves load order and conflicts against one catalog.
pub struct ModResolver<'a> {
    catalog: &'a ModCatalog,
    known: &'a KnownConflicts,
}

impl<'a> ModResolver<'a> {
    pub fn new(catalog: &'a ModCatalog, known: &'a KnownConflicts) -> Self {
        Self { catalog, known }
    }

    pub fn catalog(&self) -> &'a ModCatalog {
        self.catalog
    }

    /// Depth-first, dependencies first. Active mods are walked in ascending
    /// id order; the result is sorted by chain length, then priority
    /// (descending), then id.
    pub fn optimize_load_order(&self, active: &[String]) -> LoadOrder {
        let roots: BTreeSet<&str> = active.iter().map(String::as_str).collect();
        let mut walk = Walk::new(self.catalog);

        for id in roots {
            walk.visit(id, None);
        }

        let mut entries: Vec<LoadOrderEntry> = walk
            .resolved
            .into_iter()
            .map(|(mod_id, chain)| {
                let entry = self.catalog.get(&mod_id);
                LoadOrderEntry {
                    priority: entry.map(|e| e.priority()).unwrap_or(0),
                    dependencies: entry.map(|e| e.dependencies.clone()).unwrap_or_default(),
                    dependency_chain_length: chain.len(),
                    dependency_chain: chain,
                    mod_id,
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            (a.dependency_chain_length, Reverse(a.priority), &a.mod_id).cmp(&(
                b.dependency_chain_length,
                Reverse(b.priority),
                &b.mod_id,
            ))
        });

        debug!(
            resolved = entries.len(),
            skipped = walk.skipped.len(),
            "Mod load order computed"
        );

        LoadOrder {
            entries,
            skipped: walk.skipped,
        }
    }

    /// Every conflicting pair within the active set, each reported once.
    pub fn detect_conflicts(&self, active: &[String]) -> Vec<ModConflict> {
        let active_set: BTreeSet<&str> = active.iter().map(String::as_str).collect();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut conflicts = Vec::new();

        let mut report = |a: &str, b: &str, conflicts: &mut Vec<ModConflict>| {
            let key = if a < b {
                (a.to_string(), b.to_string())
            } else {
                (b.to_string(), a.to_string())
            };
            if seen.insert(key) {
                conflicts.push(self.known.classify(a, b));
            }
        };

        for &id in &active_set {
            let Some(entry) = self.catalog.get(id) else {
                continue;
            };
            let declared: BTreeSet<&str> = entry.conflicts_with.iter().map(String::as_str).collect();
            for other in declared {
                if other != id && active_set.contains(other) {
                    report(id, other, &mut conflicts);
                }
            }
        }

        for known in self.known.entries() {
            if active_set.contains(known.mod_a.as_str()) && active_set.contains(known.mod_b.as_str())
            {
                report(known.mod_a.as_str(), known.mod_b.as_str(), &mut conflicts);
            }
        }

        conflicts
    }

    /// Simulate loading `candidate` next to `active`.
    pub fn test_compatibility(
        &self,
        game_type: GameType,
        active: &[String],
        candidate: &str,
    ) -> CompatibilityReport {
        let mut report = CompatibilityReport {
            mod_id: candidate.to_string(),
            compatible: false,
            load_ok: false,
            crash_on_load: false,
            missing_dependencies: Vec::new(),
            conflicts: Vec::new(),
            issues: Vec::new(),
        };

        let Some(entry) = self.catalog.get(candidate) else {
            report.issues.push(format!("{} is not in the catalog", candidate));
            return report;
        };

        if !entry.supports(game_type) {
            report
                .issues
                .push(format!("{} does not support {}", candidate, game_type));
        }

        report.missing_dependencies = entry
            .dependencies
            .iter()
            .filter(|d| !self.catalog.contains(d))
            .cloned()
            .collect();
        for dep in &report.missing_dependencies {
            report.issues.push(format!("missing dependency {}", dep));
        }

        if entry.crash_on_load {
            report.crash_on_load = true;
            report
                .issues
                .push(format!("{} {} crashes on load", candidate, entry.version));
        }

        report.load_ok = report.issues.is_empty();

        let others: BTreeSet<&str> = active
            .iter()
            .map(String::as_str)
            .filter(|id| *id != candidate)
            .collect();
        for other in others {
            let declared_here = entry.conflicts_with.iter().any(|c| c == other);
            let declared_there = self
                .catalog
                .get(other)
                .is_some_and(|e| e.conflicts_with.iter().any(|c| c == candidate));
            if declared_here || declared_there || self.known.lookup(candidate, other).is_some() {
                report.conflicts.push(self.known.classify(candidate, other));
            }
        }

        report.compatible = report.load_ok && report.conflicts.is_empty();
        report
    }
}

struct Walk<'a> {
    catalog: &'a ModCatalog,
    resolved: BTreeMap<String, Vec<String>>,
    failed: HashSet<String>,
    stack: Vec<String>,
    skipped: Vec<SkippedMod>,
}

impl<'a> Walk<'a> {
    fn new(catalog: &'a ModCatalog) -> Self {
        Self {
            catalog,
            resolved: BTreeMap::new(),
            failed: HashSet::new(),
            stack: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn fail(&mut self, id: &str, reason: SkipReason, required_by: Option<&str>) {
        self.failed.insert(id.to_string());
        self.skipped.push(SkippedMod {
            mod_id: id.to_string(),
            reason,
            required_by: required_by.map(str::to_string),
        });
    }

    /// Returns the mod's chain, or `None` when it was skipped.
    fn visit(&mut self, id: &str, required_by: Option<&str>) -> Option<Vec<String>> {
        if let Some(chain) = self.resolved.get(id) {
            return Some(chain.clone());
        }
        if self.failed.contains(id) {
            return None;
        }

        let catalog = self.catalog;
        let Some(entry) = catalog.get(id) else {
            match required_by {
                Some(parent) => {
                    warn!(mod_id = %parent, dependency = %id, "Mod dependency not in catalog, skipping")
                }
                None => warn!(mod_id = %id, "Active mod not in catalog, skipping"),
            }
            self.fail(id, SkipReason::NotInCatalog, required_by);
            return None;
        };

        let deps: BTreeSet<&str> = entry.dependencies.iter().map(String::as_str).collect();

        self.stack.push(id.to_string());
        let mut deepest: Vec<String> = Vec::new();

        for dep in deps {
            if self.stack.iter().any(|s| s == dep) {
                warn!(
                    mod_id = %id,
                    dependency = %dep,
                    chain = ?self.stack,
                    "Circular mod dependency detected, skipping mod"
                );
                self.stack.pop();
                self.fail(
                    id,
                    SkipReason::CircularDependency {
                        via: dep.to_string(),
                    },
                    required_by,
                );
                return None;
            }
            if let Some(chain) = self.visit(dep, Some(id)) {
                if chain.len() > deepest.len() {
                    deepest = chain;
                }
            }
        }

        self.stack.pop();
        deepest.push(id.to_string());
        self.resolved.insert(id.to_string(), deepest.clone());
        Some(deepest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModCatalogEntry;
    use crate::conflicts::ConflictSeverity;

    fn entry(id: &str, deps: &[&str], rating: f64) -> ModCatalogEntry {
        ModCatalogEntry {
            id: id.to_string(),
            name: id.to_string(),
            author: "tester".to_string(),
            version: "1.0".to_string(),
            game_types: vec![GameType::ArkAscended],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            conflicts_with: vec![],
            checksum: None,
            file_size: 1024,
            rating,
            crash_on_load: false,
        }
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dependencies_load_first() {
        let catalog = ModCatalog::new([
            entry("base", &[], 1.0),
            entry("mid", &["base"], 5.0),
            entry("top", &["mid"], 5.0),
        ]);
        let known = KnownConflicts::default();
        let order = ModResolver::new(&catalog, &known).optimize_load_order(&ids(&["top"]));

        assert_eq!(order.mod_ids(), vec!["base", "mid", "top"]);
        let top = &order.entries[2];
        assert_eq!(top.dependency_chain, ids(&["base", "mid", "top"]));
        assert_eq!(top.dependency_chain_length, 3);
    }

    #[test]
    fn test_priority_then_id_break_ties() {
        let catalog = ModCatalog::new([
            entry("b", &[], 3.0),
            entry("a", &[], 3.0),
            entry("c", &[], 4.0),
        ]);
        let known = KnownConflicts::default();
        let order =
            ModResolver::new(&catalog, &known).optimize_load_order(&ids(&["a", "b", "c"]));

        assert_eq!(order.mod_ids(), vec!["c", "a", "b"]);
        assert_eq!(order.entries[0].priority, 80);
    }

    #[test]
    fn test_self_dependency_is_skipped() {
        let catalog = ModCatalog::new([entry("a", &["a"], 1.0)]);
        let known = KnownConflicts::default();
        let order = ModResolver::new(&catalog, &known).optimize_load_order(&ids(&["a"]));

        assert!(order.entries.is_empty());
        assert_eq!(
            order.skipped[0].reason,
            SkipReason::CircularDependency {
                via: "a".to_string()
            }
        );
    }

    #[test]
    fn test_missing_dependency_is_skipped_not_fatal() {
        let catalog = ModCatalog::new([entry("a", &["ghost"], 1.0)]);
        let known = KnownConflicts::default();
        let order = ModResolver::new(&catalog, &known).optimize_load_order(&ids(&["a"]));

        assert_eq!(order.mod_ids(), vec!["a"]);
        assert_eq!(order.skipped[0].mod_id, "ghost");
        assert_eq!(order.skipped[0].required_by.as_deref(), Some("a"));
    }

    #[test]
    fn test_conflicts_reported_once_with_table_severity() {
        let mut a = entry("731604991", &[], 4.0);
        a.conflicts_with = ids(&["1999447172"]);
        let mut b = entry("1999447172", &[], 4.0);
        b.conflicts_with = ids(&["731604991"]);
        let catalog = ModCatalog::new([a, b]);
        let known = KnownConflicts::builtin();

        let conflicts = ModResolver::new(&catalog, &known)
            .detect_conflicts(&ids(&["731604991", "1999447172"]));

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, ConflictSeverity::High);
    }

    #[test]
    fn test_compatibility_flags_crash_on_load() {
        let mut bad = entry("bad", &[], 2.0);
        bad.crash_on_load = true;
        let catalog = ModCatalog::new([bad]);
        let known = KnownConflicts::default();

        let report =
            ModResolver::new(&catalog, &known).test_compatibility(GameType::ArkAscended, &[], "bad");
        assert!(report.crash_on_load);
        assert!(!report.load_ok);
        assert!(!report.compatible);
    }

    #[test]
    fn test_compatibility_rejects_other_game() {
        let catalog = ModCatalog::new([entry("a", &[], 2.0)]);
        let known = KnownConflicts::default();
        let report =
            ModResolver::new(&catalog, &known).test_compatibility(GameType::Valheim, &[], "a");
        assert!(!report.load_ok);
    }
}
