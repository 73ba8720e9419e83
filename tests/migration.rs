//! End-to-end migration tests: two providers on one engine, one sending,
//! one receiving, across both backend types.

use star_vault::engine::Engine;
use star_vault::fileset::{FileSetClient, FileSetServer};
use star_vault::provider::Provider;
use star_vault::rpc::{MigrationOptions, Request};
use tempfile::TempDir;
use uuid::Uuid;

const ADDR: &str = "local://migration-test";

struct Cluster {
    engine: Engine,
    source: Provider,
    dest: Provider,
    scratch: TempDir,
}

/// One engine, a sending provider 1 and a receiving provider 2. The
/// receiver also holds a client so reflexive migrations can be attempted.
fn setup() -> Cluster {
    let engine = Engine::new(ADDR);
    let server = FileSetServer::new(&engine);
    let client = FileSetClient::new(&engine);
    let source =
        Provider::new_with_migration(&engine, 1, "{}", Some(client.clone()), None).unwrap();
    let dest =
        Provider::new_with_migration(&engine, 2, "{}", Some(client), Some(server)).unwrap();
    let scratch = tempfile::tempdir().unwrap();
    Cluster {
        engine,
        source,
        dest,
        scratch,
    }
}

fn target_config(cluster: &Cluster, target_type: &str, name: &str) -> String {
    match target_type {
        "memory" => "{}".to_string(),
        "file" => serde_json::json!({
            "path": cluster.scratch.path().join(name).display().to_string()
        })
        .to_string(),
        other => panic!("unknown target type {}", other),
    }
}

fn options(cluster: &Cluster, remove_source: bool) -> MigrationOptions {
    MigrationOptions {
        new_root: cluster
            .scratch
            .path()
            .join("migrated")
            .display()
            .to_string(),
        transfer_size: 0,
        extra_config: "{}".to_string(),
        remove_source,
    }
}

fn write_payload(engine: &Engine, provider_id: u16, target_id: Uuid, payload: &[u8]) -> star_vault::region::RegionId {
    let env = engine.send(
        ADDR,
        provider_id,
        Request::CreateWriteEager {
            target_id,
            data: payload.to_vec(),
            persist: true,
        },
    );
    assert!(env.success, "{}", env.error);
    env.region_id().unwrap()
}

fn read_payload(
    engine: &Engine,
    provider_id: u16,
    target_id: Uuid,
    region_id: &star_vault::region::RegionId,
    len: u64,
) -> star_vault::rpc::Envelope<star_vault::rpc::ResponseValue> {
    engine.send(
        ADDR,
        provider_id,
        Request::ReadEager {
            target_id,
            region_id: region_id.clone(),
            segments: vec![(0, len)],
        },
    )
}

#[test]
fn test_migration_happy_path() {
    for target_type in ["memory", "file"] {
        let cluster = setup();
        let payload = b"payload that must survive the move";

        let target_id = cluster
            .source
            .add_target(target_type, &target_config(&cluster, target_type, "src"))
            .unwrap();
        let region_id = write_payload(&cluster.engine, 1, target_id, payload);

        let env = cluster.engine.send(
            ADDR,
            1,
            Request::MigrateTarget {
                target_id,
                dest_address: ADDR.to_string(),
                dest_provider_id: 2,
                options: options(&cluster, true),
            },
        );
        assert!(env.success, "{} migration failed: {}", target_type, env.error);

        // destination owns the target and serves the data
        cluster.dest.check_target(&target_id).unwrap();
        let env = read_payload(
            &cluster.engine,
            2,
            target_id,
            &region_id,
            payload.len() as u64,
        );
        assert!(env.success, "{}", env.error);
        assert_eq!(env.bytes().unwrap(), payload);

        // the source does not
        assert!(cluster.source.check_target(&target_id).is_err());
        let env = cluster
            .engine
            .send(ADDR, 1, Request::CheckTarget { target_id });
        assert!(!env.success);
        assert!(env.error.contains(&target_id.to_string()));
    }
}

#[test]
fn test_migration_chunked_transfer() {
    let cluster = setup();
    let payload: Vec<u8> = (0..=255).collect();

    let target_id = cluster
        .source
        .add_target("file", &target_config(&cluster, "file", "chunked"))
        .unwrap();
    let region_id = write_payload(&cluster.engine, 1, target_id, &payload);

    let mut opts = options(&cluster, true);
    opts.transfer_size = 7;
    cluster
        .source
        .migrate_target(&target_id, ADDR, 2, &opts)
        .unwrap();

    let env = read_payload(
        &cluster.engine,
        2,
        target_id,
        &region_id,
        payload.len() as u64,
    );
    assert_eq!(env.bytes().unwrap(), payload.as_slice());
}

#[test]
fn test_migration_duplicate_uuid_rejected() {
    for target_type in ["memory", "file"] {
        let cluster = setup();
        let payload = b"still here afterwards";

        let target_id = cluster
            .source
            .add_target(target_type, &target_config(&cluster, target_type, "src"))
            .unwrap();
        let region_id = write_payload(&cluster.engine, 1, target_id, payload);

        cluster
            .source
            .migrate_target(&target_id, ADDR, 2, &options(&cluster, true))
            .unwrap();

        // the destination now owns the UUID; migrating it onto itself
        // collides in the before-install hook and must change nothing
        let env = cluster.engine.send(
            ADDR,
            2,
            Request::MigrateTarget {
                target_id,
                dest_address: ADDR.to_string(),
                dest_provider_id: 2,
                options: MigrationOptions {
                    new_root: cluster
                        .scratch
                        .path()
                        .join("collision")
                        .display()
                        .to_string(),
                    transfer_size: 0,
                    extra_config: "{}".to_string(),
                    remove_source: true,
                },
            },
        );
        assert!(!env.success, "{}: reflexive migration must be rejected", target_type);
        assert!(env.error.contains("status 4"), "{}", env.error);

        // the owner keeps the target, unlocked and intact
        cluster.dest.check_target(&target_id).unwrap();
        let env = read_payload(
            &cluster.engine,
            2,
            target_id,
            &region_id,
            payload.len() as u64,
        );
        assert!(env.success, "{}", env.error);
        assert_eq!(env.bytes().unwrap(), payload);
        let extra = write_payload(&cluster.engine, 2, target_id, b"writable again");
        let env = read_payload(&cluster.engine, 2, target_id, &extra, 14);
        assert!(env.success, "{}", env.error);
    }
}

#[test]
fn test_migration_without_support_is_refused() {
    let engine = Engine::new(ADDR);
    let provider = Provider::new(&engine, 1, "{}").unwrap();
    let target_id = provider.add_target("memory", "{}").unwrap();

    let err = provider
        .migrate_target(
            &target_id,
            ADDR,
            2,
            &MigrationOptions {
                new_root: "/tmp/nowhere".to_string(),
                transfer_size: 0,
                extra_config: "{}".to_string(),
                remove_source: false,
            },
        )
        .unwrap_err();
    assert!(err.to_string().contains("migration support"), "{}", err);
    // and the target is untouched
    provider.check_target(&target_id).unwrap();
}

#[test]
fn test_migration_to_unknown_address_changes_nothing() {
    let cluster = setup();
    let target_id = cluster
        .source
        .add_target("file", &target_config(&cluster, "file", "stay"))
        .unwrap();
    let region_id = write_payload(&cluster.engine, 1, target_id, b"four");

    let err = cluster
        .source
        .migrate_target(&target_id, "local://no-such-peer", 2, &options(&cluster, true))
        .unwrap_err();
    assert!(err.to_string().contains("no-such-peer"), "{}", err);

    // pre-migration state: present, readable, writable
    cluster.source.check_target(&target_id).unwrap();
    let env = read_payload(&cluster.engine, 1, target_id, &region_id, 4);
    assert_eq!(env.bytes().unwrap(), b"four");
    write_payload(&cluster.engine, 1, target_id, b"more");
}

#[test]
fn test_migration_to_absent_provider_cancels_cleanly() {
    let cluster = setup();
    let target_id = cluster
        .source
        .add_target("memory", "{}")
        .unwrap();
    write_payload(&cluster.engine, 1, target_id, b"data");

    // provider 9 exists nowhere, so no migration class is registered
    let err = cluster
        .source
        .migrate_target(&target_id, ADDR, 9, &options(&cluster, true))
        .unwrap_err();
    assert!(err.to_string().contains("status"), "{}", err);

    // the handle was canceled: the target is mutable again
    write_payload(&cluster.engine, 1, target_id, b"more");
}

#[test]
fn test_migration_keep_source_files() {
    let cluster = setup();
    let source_path = cluster.scratch.path().join("kept");
    let config = serde_json::json!({ "path": source_path.display().to_string() }).to_string();
    let target_id = cluster.source.add_target("file", &config).unwrap();
    let region_id = write_payload(&cluster.engine, 1, target_id, b"copied, not moved");

    cluster
        .source
        .migrate_target(&target_id, ADDR, 2, &options(&cluster, false))
        .unwrap();

    // registry entry moved, but the source-side artifacts were kept
    assert!(cluster.source.check_target(&target_id).is_err());
    assert!(source_path.is_dir());
    assert!(std::fs::read_dir(&source_path).unwrap().next().is_some());

    let env = read_payload(&cluster.engine, 2, target_id, &region_id, 17);
    assert_eq!(env.bytes().unwrap(), b"copied, not moved");
}

#[test]
fn test_migration_remove_source_deletes_files() {
    let cluster = setup();
    let source_path = cluster.scratch.path().join("gone");
    let config = serde_json::json!({ "path": source_path.display().to_string() }).to_string();
    let target_id = cluster.source.add_target("file", &config).unwrap();
    write_payload(&cluster.engine, 1, target_id, b"moved for real");

    cluster
        .source
        .migrate_target(&target_id, ADDR, 2, &options(&cluster, true))
        .unwrap();
    assert!(!source_path.exists());
}

#[test]
fn test_migrating_target_refuses_writes_mid_flight() {
    // while a migration handle is held, mutators fail fast; observable via
    // a destination hook... here via the backend contract exercised by the
    // reflexive rejection path, which cancels and re-enables the target
    let cluster = setup();
    let target_id = cluster.dest.add_target("memory", "{}").unwrap();
    write_payload(&cluster.engine, 2, target_id, b"seed");

    let env = cluster.engine.send(
        ADDR,
        2,
        Request::MigrateTarget {
            target_id,
            dest_address: ADDR.to_string(),
            dest_provider_id: 2,
            options: options(&cluster, true),
        },
    );
    assert!(!env.success);
    // rejected reflexive migration: the target must be writable again
    write_payload(&cluster.engine, 2, target_id, b"post");
}

#[test]
fn test_migrated_config_reflects_new_location() {
    let cluster = setup();
    let target_id = cluster
        .source
        .add_target("file", &target_config(&cluster, "file", "relocate"))
        .unwrap();
    write_payload(&cluster.engine, 1, target_id, b"x");

    cluster
        .source
        .migrate_target(&target_id, ADDR, 2, &options(&cluster, true))
        .unwrap();

    let config = cluster.dest.get_config();
    let targets = config["targets"].as_array().unwrap();
    let entry = targets
        .iter()
        .find(|t| t["__id__"] == target_id.to_string())
        .unwrap();
    let path = entry["config"]["path"].as_str().unwrap();
    assert!(
        path.starts_with(&cluster.scratch.path().join("migrated").display().to_string()),
        "recovered target should be rooted under new_root, got {}",
        path
    );
}
