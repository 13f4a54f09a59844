//! Portable mod configuration snapshots.

use crate::conflicts::{KnownConflict, KnownConflicts};
use crate::graph::ModGraph;
use crate::resolver::{LoadOrderEntry, ModResolver};
use crate::schedule::UpdateSchedule;
use chrono::{DateTime, Utc};
use fleet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// Mod state of one server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModProfile {
    pub active_mods: Vec<String>,
    #[serde(default)]
    pub disabled_mods: Vec<String>,
    /// Installed version per mod id.
    #[serde(default)]
    pub installed: BTreeMap<String, String>,
    #[serde(default)]
    pub schedule: Option<UpdateSchedule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModExport {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub active_mods: Vec<String>,
    pub mod_load_order: Vec<LoadOrderEntry>,
    pub disabled_mods: Vec<String>,
    pub mod_update_schedule: Option<UpdateSchedule>,
    pub known_conflicts: Vec<KnownConflict>,
}

impl ModExport {
    pub fn build(profile: &ModProfile, resolver: &ModResolver<'_>, known: &KnownConflicts) -> Self {
        let order = resolver.optimize_load_order(&profile.active_mods);
        Self {
            version: EXPORT_FORMAT_VERSION.to_string(),
            exported_at: Utc::now(),
            active_mods: profile.active_mods.clone(),
            mod_load_order: order.entries,
            disabled_mods: profile.disabled_mods.clone(),
            mod_update_schedule: profile.schedule.clone(),
            known_conflicts: known.entries().to_vec(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate an export produced by [`ModExport::to_json`].
    pub fn import(json: &str) -> Result<Self> {
        let export: ModExport = serde_json::from_str(json)?;
        export.validate()?;
        Ok(export)
    }

    pub fn validate(&self) -> Result<()> {
        let major = self.version.split('.').next().unwrap_or_default();
        if major != "1" {
            return Err(Error::InvalidConfig(format!(
                "unsupported mod export version {}",
                self.version
            )));
        }

        let active: BTreeSet<&str> = self.active_mods.iter().map(String::as_str).collect();
        if let Some(both) = self
            .disabled_mods
            .iter()
            .find(|id| active.contains(id.as_str()))
        {
            return Err(Error::InvalidConfig(format!(
                "mod {} is both active and disabled",
                both
            )));
        }

        // Dependencies pulled in for active mods may appear in the order too.
        let graph = ModGraph::from_dependencies(
            self.mod_load_order
                .iter()
                .map(|e| (e.mod_id.as_str(), e.dependencies.as_slice())),
        );
        let reachable = graph.closure(active.iter().copied());
        if let Some(stray) = self
            .mod_load_order
            .iter()
            .find(|e| !reachable.contains(e.mod_id.as_str()))
        {
            return Err(Error::InvalidConfig(format!(
                "load order references inactive mod {}",
                stray.mod_id
            )));
        }

        if let Some(schedule) = &self.mod_update_schedule {
            schedule.validate()?;
        }
        Ok(())
    }

    pub fn into_profile(self, installed: BTreeMap<String, String>) -> (ModProfile, KnownConflicts) {
        (
            ModProfile {
                active_mods: self.active_mods,
                disabled_mods: self.disabled_mods,
                installed,
                schedule: self.mod_update_schedule,
            },
            KnownConflicts::new(self.known_conflicts),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModCatalog, ModCatalogEntry};
    use serde_json::json;

    fn catalog() -> ModCatalog {
        let base = ModCatalogEntry {
            id: "base".to_string(),
            name: "Base".to_string(),
            author: String::new(),
            version: "1.0".to_string(),
            game_types: vec![],
            dependencies: vec![],
            conflicts_with: vec![],
            checksum: None,
            file_size: 0,
            rating: 2.0,
            crash_on_load: false,
        };
        let addon = ModCatalogEntry {
            id: "addon".to_string(),
            dependencies: vec!["base".to_string()],
            ..base.clone()
        };
        ModCatalog::new([base, addon])
    }

    #[test]
    fn test_export_then_import_keeps_order() {
        let catalog = catalog();
        let known = KnownConflicts::builtin();
        let resolver = ModResolver::new(&catalog, &known);
        let profile = ModProfile {
            active_mods: vec!["addon".to_string()],
            disabled_mods: vec!["old".to_string()],
            installed: BTreeMap::new(),
            schedule: Some(UpdateSchedule::daily(3, 0)),
        };

        let json = ModExport::build(&profile, &resolver, &known).to_json().unwrap();
        let imported = ModExport::import(&json).unwrap();

        let ids: Vec<&str> = imported
            .mod_load_order
            .iter()
            .map(|e| e.mod_id.as_str())
            .collect();
        assert_eq!(ids, vec!["base", "addon"]);
        assert_eq!(imported.known_conflicts.len(), known.entries().len());
    }

    #[test]
    fn test_round_trip_with_sibling_and_transitive_dependencies() {
        let base = catalog().get("base").cloned().unwrap();
        let with_deps = |id: &str, deps: &[&str]| ModCatalogEntry {
            id: id.to_string(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..base.clone()
        };
        let catalog = ModCatalog::new([
            with_deps("base1", &[]),
            with_deps("base2", &[]),
            with_deps("core", &[]),
            with_deps("lib", &["core"]),
            with_deps("addon", &["base1", "base2", "lib"]),
        ]);
        let known = KnownConflicts::builtin();
        let resolver = ModResolver::new(&catalog, &known);
        let profile = ModProfile {
            active_mods: vec!["addon".to_string()],
            ..ModProfile::default()
        };

        let export = ModExport::build(&profile, &resolver, &known);
        assert_eq!(export.mod_load_order.len(), 5);
        let imported = ModExport::import(&export.to_json().unwrap()).unwrap();
        assert_eq!(imported.mod_load_order, export.mod_load_order);
    }

    #[test]
    fn test_import_rejects_unknown_version() {
        let doc = json!({
            "version": "2.0",
            "exportedAt": "2025-01-01T00:00:00Z",
            "activeMods": [],
            "modLoadOrder": [],
            "disabledMods": [],
            "modUpdateSchedule": null,
            "knownConflicts": []
        });
        assert!(ModExport::import(&doc.to_string()).is_err());
    }

    #[test]
    fn test_import_rejects_stray_load_order_entry() {
        let doc = json!({
            "version": "1.0",
            "exportedAt": "2025-01-01T00:00:00Z",
            "activeMods": ["a"],
            "modLoadOrder": [
                {"modId": "z", "priority": 0, "dependencyChainLength": 1, "dependencyChain": ["z"]}
            ],
            "disabledMods": [],
            "modUpdateSchedule": null,
            "knownConflicts": []
        });
        let err = ModExport::import(&doc.to_string()).unwrap_err();
        assert!(err.to_string().contains("inactive mod z"));
    }
}
