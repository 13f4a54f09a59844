//! Mod catalog.

use fleet_core::server::GameType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Highest rating a catalog entry can carry.
pub const MAX_RATING: f64 = 5.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModCatalogEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    pub version: String,
    /// Empty means every game type.
    #[serde(default)]
    pub game_types: Vec<GameType>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub conflicts_with: Vec<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub rating: f64,
    /// Known to crash the server on load in its current version.
    #[serde(default)]
    pub crash_on_load: bool,
}

impl ModCatalogEntry {
    pub fn supports(&self, game_type: GameType) -> bool {
        self.game_types.is_empty() || self.game_types.contains(&game_type)
    }

    /// Display ranking derived from the rating: `rating × 20`, rounded.
    pub fn priority(&self) -> i64 {
        (self.rating.clamp(0.0, MAX_RATING) * 20.0).round() as i64
    }
}

/// Catalog keyed by mod id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModCatalog {
    entries: BTreeMap<String, ModCatalogEntry>,
}

impl ModCatalog {
    pub fn new(entries: impl IntoIterator<Item = ModCatalogEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    pub fn insert(&mut self, entry: ModCatalogEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn get(&self, id: &str) -> Option<&ModCatalogEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &ModCatalogEntry> {
        self.entries.values()
    }
}
