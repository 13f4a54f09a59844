//! Load-order and conflict behaviour over realistic catalogs.

use fleet_core::server::GameType;
use fleet_mods::*;
use pretty_assertions::assert_eq;

fn mod_entry(id: &str, deps: &[&str], conflicts: &[&str], rating: f64) -> ModCatalogEntry {
    ModCatalogEntry {
        id: id.to_string(),
        name: format!("Mod {}", id),
        author: "community".to_string(),
        version: "1.0.0".to_string(),
        game_types: vec![GameType::ArkAscended, GameType::ArkEvolved],
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        conflicts_with: conflicts.iter().map(|s| s.to_string()).collect(),
        checksum: Some(format!("sha256:{}", id)),
        file_size: 10_000,
        rating,
        crash_on_load: false,
    }
}

fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn sample_catalog() -> ModCatalog {
    ModCatalog::new([
        mod_entry("framework", &[], &[], 2.0),
        mod_entry("ui-lib", &["framework"], &[], 3.5),
        mod_entry("dinos", &["framework"], &[], 4.9),
        mod_entry("hud", &["ui-lib"], &[], 4.0),
        mod_entry("maps", &[], &[], 1.0),
        mod_entry("stacks", &[], &["bigstacks"], 3.0),
        mod_entry("bigstacks", &[], &[], 3.0),
    ])
}

#[test]
fn test_order_is_deterministic_across_input_permutations() {
    let catalog = sample_catalog();
    let known = KnownConflicts::builtin();
    let resolver = ModResolver::new(&catalog, &known);

    let first = resolver.optimize_load_order(&ids(&["hud", "dinos", "maps"]));
    let second = resolver.optimize_load_order(&ids(&["maps", "hud", "dinos", "hud"]));

    assert_eq!(first, second);
    assert_eq!(
        first.mod_ids(),
        vec!["framework", "maps", "dinos", "ui-lib", "hud"]
    );
}

#[test]
fn test_every_dependency_precedes_its_dependent() {
    let catalog = sample_catalog();
    let known = KnownConflicts::builtin();
    let order = ModResolver::new(&catalog, &known)
        .optimize_load_order(&ids(&["hud", "dinos", "ui-lib", "framework"]));

    for entry in catalog.iter() {
        let Some(pos) = order.position(&entry.id) else {
            continue;
        };
        for dep in &entry.dependencies {
            let dep_pos = order.position(dep).expect("dependency resolved");
            assert!(dep_pos < pos, "{} must load before {}", dep, entry.id);
            let dep_len = order.entries[dep_pos].dependency_chain_length;
            assert!(dep_len < order.entries[pos].dependency_chain_length);
        }
    }
}

#[test]
fn test_mutual_dependency_terminates_with_at_most_one_resolved() {
    let catalog = ModCatalog::new([
        mod_entry("a", &["b"], &[], 3.0),
        mod_entry("b", &["a"], &[], 3.0),
    ]);
    let known = KnownConflicts::default();
    let order = ModResolver::new(&catalog, &known).optimize_load_order(&ids(&["a", "b"]));

    assert!(order.entries.len() <= 1);
    assert_eq!(order.mod_ids(), vec!["a"]);
    assert_eq!(order.skipped.len(), 1);
    assert_eq!(order.skipped[0].mod_id, "b");
    assert!(matches!(
        order.skipped[0].reason,
        SkipReason::CircularDependency { .. }
    ));
}

#[test]
fn test_declared_conflict_is_surfaced_by_compatibility_test() {
    let catalog = sample_catalog();
    let known = KnownConflicts::builtin();
    let resolver = ModResolver::new(&catalog, &known);
    let active = ids(&["stacks", "bigstacks", "maps"]);

    let report = resolver.test_compatibility(GameType::ArkAscended, &active, "stacks");

    assert!(report.load_ok);
    assert!(!report.compatible);
    assert_eq!(report.conflicts.len(), 1);
    assert!(report.conflicts[0].involves("stacks"));
    assert!(report.conflicts[0].involves("bigstacks"));

    let detected = resolver.detect_conflicts(&active);
    assert_eq!(detected.len(), 1);
    assert_eq!(detected[0].severity, ConflictSeverity::Medium);
}

#[test]
fn test_conflict_declared_on_other_side_is_found() {
    let catalog = sample_catalog();
    let known = KnownConflicts::default();
    let resolver = ModResolver::new(&catalog, &known);

    let report =
        resolver.test_compatibility(GameType::ArkAscended, &ids(&["stacks"]), "bigstacks");
    assert_eq!(report.conflicts.len(), 1);
}
