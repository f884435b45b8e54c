//! # comprehensive node tests
//!
//! why: verify a node behaves the same across writes, restarts and compaction
//! relations: tests kv-node over the json stores from kv-storage
//! what: client flows, recovery, snapshots, divergence, config loading

use std::fs;
use std::path::Path;
use std::time::Duration;

use kv_core::{ApplyResult, LogKind, LogRecord, NodeRole, ServerEntry};
use kv_node::{
    init_tracing, open_solo, ClientError, ConsensusEngine, EngineError, NodeConfig,
};
use kv_storage::{keys, FileSnapshotStore, JsonLogStore, LogStore, StableStore};
use tempfile::tempdir;

fn config(dir: &Path) -> NodeConfig {
    NodeConfig::new("n1", "127.0.0.1:7000", dir)
}

// ============================================================================
// client flows
// ============================================================================

mod client_flows {
    use super::*;

    #[test]
    fn hello_world_sequence() {
        let dir = tempdir().unwrap();
        let client = open_solo(&config(dir.path())).unwrap();

        client.put("hello", "world").unwrap();
        assert_eq!(client.get("hello").unwrap(), "world");

        client.delete("hello").unwrap();
        assert!(client.get("hello").is_err());

        match client.delete("hello") {
            Err(ClientError::KeyNotFound(missing)) => assert_eq!(missing.0, "hello"),
            other => panic!("expected key not found, got {other:?}"),
        }
    }

    #[test]
    fn overwrite_keeps_last_value() {
        let dir = tempdir().unwrap();
        let client = open_solo(&config(dir.path())).unwrap();

        client.put("k", "one").unwrap();
        client.put("k", "two").unwrap();
        assert_eq!(client.get("k").unwrap(), "two");
    }

    #[test]
    fn batches() {
        let dir = tempdir().unwrap();
        let client = open_solo(&config(dir.path())).unwrap();

        let stored = client
            .put_many(vec![("a", "1"), ("b", "2"), ("c", "3")])
            .unwrap();
        assert_eq!(stored, 3);

        let report = client.delete_many(vec!["a", "missing", "c"]).unwrap();
        assert_eq!(report.deleted, vec!["a", "c"]);
        assert_eq!(report.not_found, vec!["missing"]);

        let lookup = client.get_many(["a", "b"]);
        assert_eq!(lookup.found.get("b").map(String::as_str), Some("2"));
        assert_eq!(lookup.not_found, vec!["a"]);
    }

    #[test]
    fn members_flag_self_as_leader() {
        let dir = tempdir().unwrap();
        let client = open_solo(&config(dir.path())).unwrap();

        let members = client.members().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].id, "n1");
        assert_eq!(members[0].address, "127.0.0.1:7000");
        assert!(members[0].is_leader);
    }

    #[test]
    fn leader_route_uses_listener_table() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.http_listeners
            .insert("n1".to_string(), "127.0.0.1:8000".to_string());
        let client = open_solo(&cfg).unwrap();

        let route = client.leader_route().unwrap();
        assert_eq!(route.id, "n1");
        assert_eq!(
            route.url("/key/a").as_deref(),
            Some("http://127.0.0.1:8000/key/a")
        );
    }

    #[test]
    fn shutdown_engine_faults_writes() {
        let dir = tempdir().unwrap();
        let client = open_solo(&config(dir.path())).unwrap();
        client.engine().shutdown();

        assert_eq!(client.engine().role(), NodeRole::Shutdown);
        assert!(matches!(
            client.put("k", "v"),
            Err(ClientError::Fault(EngineError::Shutdown))
        ));
        assert!(client.current_leader().is_none());
    }

    #[test]
    fn tracing_installs_once() {
        init_tracing("debug");
        assert!(!init_tracing("debug"));
    }
}

// ============================================================================
// recovery
// ============================================================================

mod recovery {
    use super::*;

    #[test]
    fn restart_replays_log() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        {
            let client = open_solo(&cfg).unwrap();
            client.put("a", "1").unwrap();
            client.put("b", "2").unwrap();
            client.delete("a").unwrap();
        }

        let client = open_solo(&cfg).unwrap();
        assert!(client.get("a").is_err());
        assert_eq!(client.get("b").unwrap(), "2");
    }

    #[test]
    fn each_start_is_a_new_term() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());

        let first = open_solo(&cfg).unwrap().engine().term();
        let second = open_solo(&cfg).unwrap().engine().term();
        assert_eq!(second, first + 1);

        let client = open_solo(&cfg).unwrap();
        let stable = client.engine().stable_store();
        assert_eq!(stable.get_counter(keys::CURRENT_TERM).unwrap(), Some(first + 2));
        assert_eq!(stable.get(keys::LAST_VOTE_CAND).unwrap(), Some(b"n1".to_vec()));
    }

    #[test]
    fn log_starts_with_configuration() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        let client = open_solo(&cfg).unwrap();
        client.put("k", "v").unwrap();

        let log = client.engine().log_store();
        assert_eq!(log.first_index().unwrap(), 1);
        assert_eq!(log.get(1).unwrap().unwrap().kind, LogKind::Configuration);
        let last = log.get(log.last_index().unwrap()).unwrap().unwrap();
        assert_eq!(last.data, b"A:1:1:kv");
    }

    #[test]
    fn malformed_submission_survives_restart() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        {
            let client = open_solo(&cfg).unwrap();
            let junk = client
                .engine()
                .submit(b"X:junk".to_vec(), Duration::from_secs(1))
                .unwrap();
            assert!(matches!(junk, ApplyResult::Malformed(_)));
            client.put("k", "v").unwrap();
        }

        let client = open_solo(&cfg).unwrap();
        assert_eq!(client.get("k").unwrap(), "v");
        client.put("k2", "v2").unwrap();
    }

    #[test]
    fn logged_malformed_record_replays_as_no_op() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        {
            let log = JsonLogStore::open(cfg.log_store_path()).unwrap();
            log.append_batch(&[
                LogRecord::command(1, 1, b"A:1:1:kv".to_vec()),
                LogRecord::command(2, 1, b"X:junk".to_vec()),
            ])
            .unwrap();
        }

        let client = open_solo(&cfg).unwrap();
        assert_eq!(client.get("k").unwrap(), "v");
    }

    #[test]
    fn gap_in_log_stops_startup() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        {
            let log = JsonLogStore::open(cfg.log_store_path()).unwrap();
            log.append_batch(&[
                LogRecord::command(1, 1, b"A:1:1:kv".to_vec()),
                LogRecord::command(3, 1, b"A:1:1:xy".to_vec()),
            ])
            .unwrap();
        }

        assert!(matches!(
            open_solo(&cfg),
            Err(EngineError::Divergence { index: 2, .. })
        ));
    }

    #[test]
    fn corrupt_log_file_is_a_storage_fault() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        fs::write(cfg.log_store_path(), b"{ not json").unwrap();

        assert!(matches!(open_solo(&cfg), Err(EngineError::Storage(_))));
    }
}

// ============================================================================
// snapshots
// ============================================================================

mod snapshots {
    use super::*;

    #[test]
    fn threshold_snapshot_compacts_and_recovers() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.snapshot_threshold = 5;
        cfg.trailing_logs = 2;
        {
            let client = open_solo(&cfg).unwrap();
            // configuration at 1, no-op at 2, puts at 3..=7
            for i in 0..5 {
                client.put(format!("k{i}"), format!("v{i}")).unwrap();
            }

            let store = FileSnapshotStore::open(cfg.snapshot_dir(), 3).unwrap();
            let latest = store.latest().unwrap().unwrap();
            assert_eq!(latest.index, 7);
            assert_eq!(latest.configuration, vec![ServerEntry::voter("n1", "127.0.0.1:7000")]);

            let log = client.engine().log_store();
            assert_eq!(log.first_index().unwrap(), 6);
        }

        let client = open_solo(&cfg).unwrap();
        for i in 0..5 {
            assert_eq!(client.get(&format!("k{i}")).unwrap(), format!("v{i}"));
        }
        assert_eq!(client.members().unwrap().len(), 1);
    }

    #[test]
    fn manual_snapshot_then_more_writes() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path());
        {
            let client = open_solo(&cfg).unwrap();
            client.put("before", "1").unwrap();
            client.trigger_snapshot().unwrap();
            client.put("after", "2").unwrap();
            client.delete("before").unwrap();
        }

        let store = FileSnapshotStore::open(cfg.snapshot_dir(), 3).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);

        let client = open_solo(&cfg).unwrap();
        assert!(client.get("before").is_err());
        assert_eq!(client.get("after").unwrap(), "2");
    }

    #[test]
    fn retention_keeps_newest() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.snapshot_retain = 2;
        let client = open_solo(&cfg).unwrap();

        for i in 0..4 {
            client.put("k", i.to_string()).unwrap();
            client.trigger_snapshot().unwrap();
        }

        let store = FileSnapshotStore::open(cfg.snapshot_dir(), 2).unwrap();
        let kept = store.list().unwrap();
        assert_eq!(kept.len(), 2);
        assert!(kept[0].index > kept[1].index);
    }
}

// ============================================================================
// config files
// ============================================================================

mod config_files {
    use super::*;

    #[test]
    fn loaded_config_drives_membership() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        let path = dir.path().join("node.json");
        let body = serde_json::json!({
            "server_id": "n1",
            "bind_address": "127.0.0.1:7000",
            "data_dir": data_dir,
            "servers": [
                { "id": "n1", "address": "127.0.0.1:7000" },
                { "id": "n2", "address": "127.0.0.1:7001", "suffrage": "Nonvoter" }
            ]
        });
        fs::write(&path, serde_json::to_vec(&body).unwrap()).unwrap();

        let cfg = NodeConfig::load(&path).unwrap();
        assert_eq!(cfg.snapshot_threshold, 400);
        let client = open_solo(&cfg).unwrap();

        let members = client.members().unwrap();
        assert_eq!(members.len(), 2);
        assert!(members[0].is_leader);
        assert!(!members[1].is_leader);
        assert!(data_dir.join("logstore.json").exists());
    }
}
