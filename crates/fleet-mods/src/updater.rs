//! Automatic mod updates with a compatibility gate.

use crate::resolver::ModResolver;
use chrono::{DateTime, Utc};
use fleet_core::server::GameType;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    Updated,
    UpToDate,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModUpdateResult {
    pub mod_id: String,
    pub status: UpdateStatus,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub checked_at: DateTime<Utc>,
    pub results: Vec<ModUpdateResult>,
    /// Installed versions after the pass. Failed mods keep their old version.
    pub installed: BTreeMap<String, String>,
}

impl UpdateReport {
    pub fn count(&self, status: UpdateStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

pub struct AutoUpdater<'a> {
    resolver: &'a ModResolver<'a>,
    test_before_apply: bool,
}

impl<'a> AutoUpdater<'a> {
    pub fn new(resolver: &'a ModResolver<'a>, test_before_apply: bool) -> Self {
        Self {
            resolver,
            test_before_apply,
        }
    }

    pub fn run(
        &self,
        game_type: GameType,
        active: &[String],
        installed: &BTreeMap<String, String>,
    ) -> UpdateReport {
        let mut next_installed = installed.clone();
        let mut results = Vec::with_capacity(active.len());

        let mut ids: Vec<&String> = active.iter().collect();
        ids.sort();
        ids.dedup();

        for id in ids {
            let current = installed.get(id).cloned();
            let Some(entry) = self.resolver.catalog().get(id) else {
                warn!(mod_id = %id, "Active mod missing from catalog, not updating");
                results.push(ModUpdateResult {
                    mod_id: id.clone(),
                    status: UpdateStatus::Failed,
                    from_version: current,
                    to_version: None,
                    reason: Some("not in catalog".to_string()),
                });
                continue;
            };

            let newer = match &current {
                Some(v) => compare_versions(&entry.version, v) == Ordering::Greater,
                None => true,
            };
            if !newer {
                results.push(ModUpdateResult {
                    mod_id: id.clone(),
                    status: UpdateStatus::UpToDate,
                    from_version: current.clone(),
                    to_version: current,
                    reason: None,
                });
                continue;
            }

            if self.test_before_apply {
                let report = self.resolver.test_compatibility(game_type, active, id);
                if report.crash_on_load || !report.conflicts.is_empty() {
                    let reason = report.issues.first().cloned().unwrap_or_else(|| {
                        format!("{} conflict(s) with active mods", report.conflicts.len())
                    });
                    warn!(mod_id = %id, version = %entry.version, reason = %reason, "Mod update skipped");
                    results.push(ModUpdateResult {
                        mod_id: id.clone(),
                        status: UpdateStatus::Failed,
                        from_version: current,
                        to_version: Some(entry.version.clone()),
                        reason: Some(reason),
                    });
                    continue;
                }
            }

            info!(mod_id = %id, from = ?current, to = %entry.version, "Mod updated");
            next_installed.insert(id.clone(), entry.version.clone());
            results.push(ModUpdateResult {
                mod_id: id.clone(),
                status: UpdateStatus::Updated,
                from_version: current,
                to_version: Some(entry.version.clone()),
                reason: None,
            });
        }

        UpdateReport {
            checked_at: Utc::now(),
            results,
            installed: next_installed,
        }
    }
}

/// Dotted numeric comparison, falling back to string order for
/// non-numeric segments.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-']);
    let mut right = b.split(['.', '-']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModCatalog, ModCatalogEntry};
    use crate::conflicts::KnownConflicts;

    fn entry(id: &str, version: &str) -> ModCatalogEntry {
        ModCatalogEntry {
            id: id.to_string(),
            name: id.to_string(),
            author: String::new(),
            version: version.to_string(),
            game_types: vec![],
            dependencies: vec![],
            conflicts_with: vec![],
            checksum: None,
            file_size: 0,
            rating: 3.0,
            crash_on_load: false,
        }
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("2.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.0.1", "2.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0-beta", "1.0-alpha"), Ordering::Greater);
    }

    #[test]
    fn test_update_pass_gates_on_compatibility() {
        let mut crashy = entry("crashy", "3.0");
        crashy.crash_on_load = true;
        let catalog = ModCatalog::new([entry("fresh", "2.0"), entry("same", "1.0"), crashy]);
        let known = KnownConflicts::default();
        let resolver = ModResolver::new(&catalog, &known);
        let updater = AutoUpdater::new(&resolver, true);

        let installed = BTreeMap::from([
            ("fresh".to_string(), "1.0".to_string()),
            ("same".to_string(), "1.0".to_string()),
            ("crashy".to_string(), "2.0".to_string()),
        ]);
        let active: Vec<String> = ["fresh", "same", "crashy"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let report = updater.run(GameType::ArkAscended, &active, &installed);

        assert_eq!(report.count(UpdateStatus::Updated), 1);
        assert_eq!(report.count(UpdateStatus::UpToDate), 1);
        assert_eq!(report.count(UpdateStatus::Failed), 1);
        assert_eq!(report.installed["fresh"], "2.0");
        assert_eq!(report.installed["crashy"], "2.0");
    }

    #[test]
    fn test_untested_update_applies_even_if_crashy() {
        let mut crashy = entry("crashy", "3.0");
        crashy.crash_on_load = true;
        let catalog = ModCatalog::new([crashy]);
        let known = KnownConflicts::default();
        let resolver = ModResolver::new(&catalog, &known);
        let updater = AutoUpdater::new(&resolver, false);

        let report = updater.run(
            GameType::ArkAscended,
            &["crashy".to_string()],
            &BTreeMap::new(),
        );
        assert_eq!(report.results[0].status, UpdateStatus::Updated);
    }
}
