//! Provisioning engine behaviour against the in-memory runtime.

use chrono::{TimeZone, Utc};
use fleet_core::Error;
use fleet_core::ids::{ServerId, TenantId, UserId};
use fleet_core::server::{GameType, ServerStatus};
use fleet_mods::{ModCatalog, ModCatalogEntry};
use fleet_provision::archive::{self, ArchiveSource};
use fleet_provision::descriptor::DESCRIPTOR_FILE;
use fleet_provision::*;
use fleet_runtime::{MemoryRuntime, ServiceRuntime};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    tmp: TempDir,
    runtime: Arc<MemoryRuntime>,
    engine: ProvisioningEngine,
}

fn harness(runtime: MemoryRuntime) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = Arc::new(runtime);
    let settings = EngineSettings {
        work_root: tmp.path().join("servers"),
        backup_root: tmp.path().join("backups"),
        backup_retention: 2,
        ..EngineSettings::default()
    };
    let engine = ProvisioningEngine::new(
        runtime.clone() as Arc<dyn ServiceRuntime>,
        ClusterSyncManager::new(tmp.path().join("cluster")),
        settings,
    );
    Harness {
        tmp,
        runtime,
        engine,
    }
}

fn command(id: &str, game_type: Option<GameType>) -> ServerCommand {
    ServerCommand {
        server_id: ServerId::new(id),
        container_name: None,
        game_type,
    }
}

fn mod_entry(id: &str, deps: &[&str]) -> ModCatalogEntry {
    ModCatalogEntry {
        id: id.to_string(),
        name: format!("Mod {}", id),
        author: "community".to_string(),
        version: "1.0.0".to_string(),
        game_types: vec![],
        dependencies: deps.iter().map(|s| s.to_string()).collect(),
        conflicts_with: vec![],
        checksum: None,
        file_size: 0,
        rating: 4.0,
        crash_on_load: false,
    }
}

#[tokio::test(start_paused = true)]
async fn test_provision_minecraft_happy_path() {
    let h = harness(MemoryRuntime::new());
    let request = ProvisionRequest::new("mc1", GameType::Minecraft);

    let outcome = h
        .engine
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ServerStatus::Running);
    assert_eq!(outcome.container_name, "gs-mc1");
    assert_eq!(outcome.server_port, 25565);
    assert_eq!(outcome.query_port, 25566);
    assert_eq!(outcome.rcon_port, 25575);
    assert_eq!(outcome.cluster_dir, None);
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert!(outcome.work_dir.join(DESCRIPTOR_FILE).is_file());

    let container = h.runtime.container("gs-mc1").unwrap();
    assert!(container.running);
    assert_eq!(h.runtime.pulled(), vec!["itzg/minecraft-server:latest".to_string()]);
    assert!(h.runtime.volumes().contains(&"gs-mc1-data".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_provision_ark_joins_owner_cluster() {
    let h = harness(MemoryRuntime::new());
    let mut request = ProvisionRequest::new("ark1", GameType::ArkAscended);
    request.user_id = Some(UserId::new("user-7"));

    let outcome = h
        .engine
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();

    let cluster_dir = outcome.cluster_dir.unwrap();
    assert!(cluster_dir.is_dir());
    assert!(cluster_dir.ends_with("user-7"));

    let spec = h.runtime.container("gs-ark1").unwrap().spec;
    assert_eq!(spec.env["CLUSTER_ID"], "user-7");
    assert_eq!(spec.env["RCON_PORT"], "27020");
}

#[tokio::test(start_paused = true)]
async fn test_provision_orders_mods_dependencies_first() {
    let h = harness(MemoryRuntime::new());
    let mut request = ProvisionRequest::new("ark2", GameType::ArkAscended);
    request.mods = vec!["addon".to_string(), "ghost".to_string()];
    request.mod_catalog = Some(ModCatalog::new([
        mod_entry("addon", &["base"]),
        mod_entry("base", &[]),
    ]));

    let outcome = h
        .engine
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.load_order, vec!["base".to_string(), "addon".to_string()]);
    assert!(outcome.warnings.iter().any(|w| w.contains("ghost")));
    let spec = h.runtime.container("gs-ark2").unwrap().spec;
    assert_eq!(spec.env["MODS"], "base,addon");
}

#[tokio::test(start_paused = true)]
async fn test_pull_failure_is_a_warning() {
    let h = harness(MemoryRuntime::new().with_pull_failure());
    let request = ProvisionRequest::new("v1", GameType::Valheim);

    let outcome = h
        .engine
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ServerStatus::Running);
    assert!(outcome.warnings.iter().any(|w| w.contains("image pull failed")));
}

#[tokio::test(start_paused = true)]
async fn test_slow_process_reports_starting() {
    let h = harness(MemoryRuntime::new().never_ready());
    let request = ProvisionRequest::new("r1", GameType::Rust);

    let started = tokio::time::Instant::now();
    let outcome = h
        .engine
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ServerStatus::Starting);
    assert!(outcome.warnings.iter().any(|w| w.contains("24 probes")));
    assert_eq!(h.runtime.container("gs-r1").unwrap().probes, 24);
    assert_eq!(started.elapsed(), std::time::Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_provision_replaces_existing_container() {
    let h = harness(MemoryRuntime::new());
    let request = ProvisionRequest::new("mc2", GameType::Minecraft);
    let cancel = CancellationToken::new();

    h.engine.provision(&request, &cancel).await.unwrap();
    h.engine.provision(&request, &cancel).await.unwrap();

    let calls = h.runtime.calls();
    assert!(calls.contains(&"stop gs-mc2".to_string()));
    assert!(calls.contains(&"remove gs-mc2".to_string()));
    assert_eq!(calls.iter().filter(|c| *c == "create gs-mc2").count(), 2);
}

#[tokio::test]
async fn test_port_conflict_fails_provision() {
    let h = harness(MemoryRuntime::new().with_occupied_port(25565));
    let request = ProvisionRequest::new("mc3", GameType::Minecraft);

    let err = h
        .engine
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PortConflict { port: 25565 }));
}

#[tokio::test]
async fn test_cancelled_provision_stops_early() {
    let h = harness(MemoryRuntime::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .engine
        .provision(&ProvisionRequest::new("mc4", GameType::Minecraft), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(h.runtime.container("gs-mc4").is_none());
}

#[tokio::test]
async fn test_stop_missing_container_is_noop_success() {
    let h = harness(MemoryRuntime::new());

    let outcome = h.engine.stop(&command("gone", None)).await.unwrap();

    assert!(outcome.noop);
    assert_eq!(outcome.status, ServerStatus::Stopped);
}

#[tokio::test]
async fn test_delete_missing_server_succeeds() {
    let h = harness(MemoryRuntime::new());
    let request = DeleteRequest {
        server_id: ServerId::new("gone"),
        container_name: None,
        remove_volume: true,
        remove_work_dir: true,
    };

    let outcome = h.engine.delete(&request).await.unwrap();

    assert_eq!(outcome.steps.len(), 4);
    assert!(outcome.steps.iter().all(|s| s.ok));
}

#[tokio::test(start_paused = true)]
async fn test_delete_removes_container_volume_and_files() {
    let h = harness(MemoryRuntime::new());
    let provisioned = h
        .engine
        .provision(
            &ProvisionRequest::new("mc5", GameType::Minecraft),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let request: DeleteRequest = serde_json::from_value(serde_json::json!({
        "serverId": "mc5"
    }))
    .unwrap();
    let outcome = h.engine.delete(&request).await.unwrap();

    assert!(outcome.steps.iter().all(|s| s.ok && s.detail.is_none()));
    assert!(h.runtime.container("gs-mc5").is_none());
    assert!(h.runtime.volumes().is_empty());
    assert!(!provisioned.work_dir.exists());
}

#[tokio::test(start_paused = true)]
async fn test_start_recovers_game_type_from_descriptor() {
    let h = harness(MemoryRuntime::new());
    let cancel = CancellationToken::new();
    h.engine
        .provision(&ProvisionRequest::new("mc6", GameType::Minecraft), &cancel)
        .await
        .unwrap();
    h.engine.stop(&command("mc6", None)).await.unwrap();

    let outcome = h.engine.start(&command("mc6", None), &cancel).await.unwrap();

    assert_eq!(outcome.status, ServerStatus::Running);
    assert!(outcome.warnings.is_empty());
    let probes = h
        .runtime
        .calls()
        .into_iter()
        .filter(|c| c == "exec gs-mc6 pgrep -f java")
        .count();
    assert_eq!(probes, 2);
}

#[tokio::test]
async fn test_start_missing_container_fails() {
    let h = harness(MemoryRuntime::new());
    let err = h
        .engine
        .start(&command("gone", Some(GameType::Valheim)), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test(start_paused = true)]
async fn test_restart_uses_short_probe_window() {
    let cancel = CancellationToken::new();
    let h = harness(MemoryRuntime::new().never_ready());
    h.engine
        .provision(&ProvisionRequest::new("v2", GameType::Valheim), &cancel)
        .await
        .unwrap();
    let outcome = h
        .engine
        .restart(&command("v2", Some(GameType::Valheim)), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.status, ServerStatus::Starting);
    assert_eq!(h.runtime.container("gs-v2").unwrap().probes, 6);
}

#[tokio::test(start_paused = true)]
async fn test_backup_prunes_to_retention() {
    let h = harness(MemoryRuntime::new());
    let provisioned = h
        .engine
        .provision(
            &ProvisionRequest::new("mc7", GameType::Minecraft),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    std::fs::write(provisioned.work_dir.join("world.dat"), b"blocks").unwrap();

    let backup_dir = h.tmp.path().join("backups/mc7");
    std::fs::create_dir_all(&backup_dir).unwrap();
    for day in 1..=3 {
        let at = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        std::fs::write(backup_dir.join(archive::archive_name("mc7", at)), b"old").unwrap();
    }

    let request = BackupRequest {
        server_id: ServerId::new("mc7"),
        include_cluster: false,
        cluster_id: None,
        retention: None,
    };
    let outcome = h
        .engine
        .backup(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.pruned.len(), 2);
    let left = archive::list_archives(&backup_dir, "mc7-").unwrap();
    assert_eq!(left.len(), 2);
    assert_eq!(left[1], outcome.archive.path);

    let restored = h.tmp.path().join("restored");
    archive::extract_archive(&outcome.archive.path, &restored).unwrap();
    assert_eq!(
        std::fs::read(restored.join("server/world.dat")).unwrap(),
        b"blocks"
    );
}

#[tokio::test(start_paused = true)]
async fn test_backup_includes_cluster_under_lease() {
    let h = harness(MemoryRuntime::new());
    let mut request = ProvisionRequest::new("ark3", GameType::ArkAscended);
    request.cluster_id = Some(TenantId::new("tribe"));
    let provisioned = h
        .engine
        .provision(&request, &CancellationToken::new())
        .await
        .unwrap();
    let cluster_dir = provisioned.cluster_dir.unwrap();
    std::fs::write(cluster_dir.join("player.arkprofile"), b"p").unwrap();

    let outcome = h
        .engine
        .backup(
            &BackupRequest {
                server_id: ServerId::new("ark3"),
                include_cluster: true,
                cluster_id: Some(TenantId::new("tribe")),
                retention: Some(3),
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.cluster_included);
    assert!(
        h.engine
            .cluster()
            .current_lease(&TenantId::new("tribe"))
            .await
            .unwrap()
            .is_none()
    );

    let restored = h.tmp.path().join("restored");
    archive::extract_archive(&outcome.archive.path, &restored).unwrap();
    assert!(restored.join("cluster/player.arkprofile").is_file());
    assert!(!restored.join("cluster/.lease").exists());
}

#[tokio::test]
async fn test_backup_refused_while_cluster_leased() {
    let h = harness(MemoryRuntime::new());
    std::fs::create_dir_all(h.engine.work_dir(&ServerId::new("ark4"))).unwrap();
    let tenant = TenantId::new("busy");
    h.engine
        .cluster()
        .acquire(&tenant, "other-agent", std::time::Duration::from_secs(60))
        .await
        .unwrap();

    let err = h
        .engine
        .backup(
            &BackupRequest {
                server_id: ServerId::new("ark4"),
                include_cluster: true,
                cluster_id: Some(tenant),
                retention: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::LeaseHeld { holder, .. } if holder == "other-agent"));
}

#[tokio::test]
async fn test_backup_without_work_dir_is_invalid() {
    let h = harness(MemoryRuntime::new());
    let err = h
        .engine
        .backup(
            &BackupRequest {
                server_id: ServerId::new("nothing"),
                include_cluster: false,
                cluster_id: None,
                retention: None,
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
}

#[tokio::test(start_paused = true)]
async fn test_update_recreates_with_new_mod_versions() {
    let h = harness(MemoryRuntime::new());
    let mut server = ProvisionRequest::new("ark5", GameType::ArkEvolved);
    server.mods = vec!["base".to_string()];
    server.mod_catalog = Some(ModCatalog::new([mod_entry("base", &[])]));
    h.engine
        .provision(&server, &CancellationToken::new())
        .await
        .unwrap();

    let request = UpdateRequest {
        server,
        installed_mods: [("base".to_string(), "0.9.0".to_string())].into(),
        test_before_apply: true,
    };
    let outcome = h
        .engine
        .update(&request, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, ServerStatus::Running);
    let report = outcome.mod_report.unwrap();
    assert_eq!(report.installed["base"], "1.0.0");
    assert_eq!(
        h.runtime
            .calls()
            .iter()
            .filter(|c| *c == "create gs-ark5")
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_bare_update_keeps_provisioned_settings() {
    let h = harness(MemoryRuntime::new());
    let mut server = ProvisionRequest::new("ark9", GameType::ArkEvolved);
    server.server_port = Some(27015);
    server.max_players = Some(20);
    server.admin_password = Some("s3cret-admin".to_string());
    server.env = [("TZ".to_string(), "UTC".to_string())].into();
    h.engine
        .provision(&server, &CancellationToken::new())
        .await
        .unwrap();
    let before = h.runtime.container("gs-ark9").unwrap().spec;

    let request: UpdateRequest = serde_json::from_value(serde_json::json!({
        "serverId": "ark9",
        "gameType": "ARK_EVOLVED"
    }))
    .unwrap();
    let outcome = h
        .engine
        .update(&request, &CancellationToken::new())
        .await
        .unwrap();

    let after = h.runtime.container("gs-ark9").unwrap().spec;
    assert_eq!(after.ports, before.ports);
    assert_eq!(after.env, before.env);
    assert_eq!(after.image, before.image);
    assert_eq!(after.env["SERVER_PORT"], "27015");
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
}

#[tokio::test(start_paused = true)]
async fn test_update_payload_overrides_stored_field() {
    let h = harness(MemoryRuntime::new());
    let mut server = ProvisionRequest::new("ark10", GameType::ArkEvolved);
    server.server_port = Some(27015);
    h.engine
        .provision(&server, &CancellationToken::new())
        .await
        .unwrap();

    let mut update = ProvisionRequest::new("ark10", GameType::ArkEvolved);
    update.max_players = Some(12);
    let request = UpdateRequest {
        server: update,
        installed_mods: Default::default(),
        test_before_apply: true,
    };
    h.engine
        .update(&request, &CancellationToken::new())
        .await
        .unwrap();

    let spec = h.runtime.container("gs-ark10").unwrap().spec;
    assert_eq!(spec.env["MAX_PLAYERS"], "12");
    assert_eq!(spec.env["SERVER_PORT"], "27015");
}

#[test]
fn test_archive_sources_pack_under_their_names() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("a");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("f"), b"1").unwrap();
    let dest = tmp.path().join("x.tar.zst");
    archive::create_archive(
        &dest,
        &[ArchiveSource {
            name: "named".to_string(),
            path: src,
        }],
        &[],
    )
    .unwrap();
    archive::extract_archive(&dest, &tmp.path().join("out")).unwrap();
    assert!(tmp.path().join("out/named/f").is_file());
}
