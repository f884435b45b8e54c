//! # comprehensive core tests
//!
//! why: verify codec and state machine behaviour across whole operation sequences
//! relations: tests kv-core crate
//! what: codec round trips, apply convergence, snapshot/restore, concurrent reads

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use kv_core::{
    ApplyResult, Command, KeyNotFound, LogKind, LogRecord, MalformedCommand, ReplicatedMap,
    StateMachine,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn record(index: u64, command: &Command) -> LogRecord {
    LogRecord::command(index, 1, command.encode())
}

fn restore_from(source: &ReplicatedMap) -> ReplicatedMap {
    let mut handle = source.snapshot().unwrap();
    let mut bytes = Vec::new();
    handle.persist(&mut bytes).unwrap();
    handle.release();

    let target = ReplicatedMap::new();
    target.restore(&mut bytes.as_slice()).unwrap();
    target
}

// =============================================================================
// SECTION 1: CODEC
// =============================================================================

mod codec {
    use super::*;

    #[test]
    fn awkward_puts_decode_to_themselves() {
        let cases = [
            ("", ""),
            ("k", ""),
            ("", "v"),
            (":", ":"),
            ("A:1:1:", "D:"),
            ("key", "va:lue:with:colons"),
            ("12", "345"),
            ("line\nbreak", "tab\there"),
            ("emoji🙂", "значение"),
        ];
        for (key, value) in cases {
            let cmd = Command::put(key, value);
            assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd, "{key:?}/{value:?}");
        }
    }

    #[test]
    fn random_puts_decode_to_themselves() {
        let mut rng = StdRng::seed_from_u64(7);
        let alphabet: Vec<char> = "ab:AD0123 \u{e9}".chars().collect();
        for _ in 0..500 {
            let mut word = |max: usize| -> String {
                let len = rng.gen_range(0..max);
                (0..len)
                    .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
                    .collect()
            };
            let cmd = Command::put(word(12), word(24));
            assert_eq!(Command::decode(&cmd.encode()).unwrap(), cmd);
        }
    }

    #[test]
    fn naive_split_payload_is_rejected() {
        assert!(matches!(
            Command::decode(b"A:key:value"),
            Err(MalformedCommand::BadLength { .. })
        ));
    }
}

// =============================================================================
// SECTION 2: APPLY
// =============================================================================

mod apply {
    use super::*;

    #[test]
    fn end_to_end_hello_world() {
        let fsm = ReplicatedMap::new();
        fsm.apply(&LogRecord::command(1, 1, b"A:5:5:HelloWorld".to_vec()));
        fsm.apply(&LogRecord::command(2, 1, b"A:2:5:HiHello".to_vec()));
        assert_eq!(fsm.get("Hi").unwrap(), "Hello");
        assert_eq!(fsm.get("Hello").unwrap(), "World");

        fsm.apply(&LogRecord::command(3, 1, b"D:Hi".to_vec()));
        assert_eq!(fsm.get("Hi"), Err(KeyNotFound("Hi".into())));
        assert_eq!(fsm.get("Hello").unwrap(), "World");
    }

    #[test]
    fn double_put_matches_single_put() {
        let once = ReplicatedMap::new();
        once.apply(&record(1, &Command::put("k", "v")));

        let twice = ReplicatedMap::new();
        twice.apply(&record(1, &Command::put("k", "v")));
        twice.apply(&record(2, &Command::put("k", "v")));

        assert_eq!(once.get("k"), twice.get("k"));
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn double_delete_of_absent_key() {
        let fsm = ReplicatedMap::new();
        fsm.apply(&record(1, &Command::put("keep", "1")));
        let first = fsm.apply(&record(2, &Command::delete("gone")));
        let second = fsm.apply(&record(3, &Command::delete("gone")));

        assert_eq!(first, ApplyResult::KeyNotFound(KeyNotFound("gone".into())));
        assert_eq!(first, second);
        assert_eq!(fsm.len(), 1);
    }

    #[test]
    fn replicas_agree_on_malformed_input() {
        let log = vec![
            record(1, &Command::put("a", "1")),
            LogRecord::command(2, 1, b"D".to_vec()),
            LogRecord::command(3, 1, b"A:1:1:abc".to_vec()),
            record(4, &Command::delete("a")),
            LogRecord::command(5, 1, b"Z:x".to_vec()),
        ];

        let replicas: Vec<ReplicatedMap> = (0..3).map(|_| ReplicatedMap::new()).collect();
        let results: Vec<Vec<ApplyResult>> = replicas
            .iter()
            .map(|fsm| log.iter().map(|r| fsm.apply(r)).collect())
            .collect();

        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
        assert!(matches!(results[0][1], ApplyResult::Malformed(_)));
        assert!(matches!(results[0][2], ApplyResult::Malformed(_)));
        assert_eq!(results[0][3], ApplyResult::Deleted);
        assert!(matches!(
            results[0][4],
            ApplyResult::Malformed(MalformedCommand::UnknownTag(_))
        ));
        assert!(replicas.iter().all(ReplicatedMap::is_empty));
    }

    #[test]
    fn configuration_records_never_touch_the_map() {
        let fsm = ReplicatedMap::new();
        let conf = LogRecord::new(1, 1, LogKind::Configuration, b"A:1:1:kv".to_vec());
        assert_eq!(fsm.apply(&conf), ApplyResult::Ignored);
        assert!(fsm.get("k").is_err());
    }
}

// =============================================================================
// SECTION 3: SNAPSHOT AND RESTORE
// =============================================================================

mod snapshot {
    use super::*;

    #[test]
    fn restore_of_random_history_matches_source() {
        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..20 {
            let source = ReplicatedMap::new();
            let mut expected = BTreeMap::new();

            for index in 1..=200u64 {
                let key = format!("k{}", rng.gen_range(0..25));
                let cmd = if rng.gen_bool(0.7) {
                    let value = format!("v{round}:{index}");
                    expected.insert(key.clone(), value.clone());
                    Command::put(key, value)
                } else {
                    expected.remove(&key);
                    Command::delete(key)
                };
                source.apply(&record(index, &cmd));
            }

            let target = restore_from(&source);
            assert_eq!(target.len(), expected.len());
            for (key, value) in &expected {
                assert_eq!(&target.get(key).unwrap(), value);
            }
        }
    }

    #[test]
    fn empty_map_round_trips() {
        let target = restore_from(&ReplicatedMap::new());
        assert!(target.is_empty());
    }
}

// =============================================================================
// SECTION 4: CONCURRENCY
// =============================================================================

mod concurrency {
    use super::*;

    #[test]
    fn readers_never_see_partial_values() {
        let fsm = Arc::new(ReplicatedMap::new());
        fsm.apply(&record(0, &Command::put("k", "x")));

        let writer = {
            let fsm = Arc::clone(&fsm);
            thread::spawn(move || {
                for n in 1..=2000u64 {
                    let fill = if n % 2 == 0 { "x" } else { "y" };
                    let value = fill.repeat((n % 64 + 1) as usize);
                    fsm.apply(&record(n, &Command::put("k", value)));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let fsm = Arc::clone(&fsm);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let value = fsm.get("k").unwrap();
                        let first = value.chars().next().unwrap();
                        assert!(value.chars().all(|c| c == first), "torn value {value:?}");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn restore_swaps_whole_map() {
        let fsm = Arc::new(ReplicatedMap::new());
        let images = [
            br#"{"a":"1","b":"1","c":"1"}"#.to_vec(),
            br#"{"a":"2","b":"2","c":"2"}"#.to_vec(),
        ];
        fsm.restore(&mut images[0].as_slice()).unwrap();

        let restorer = {
            let fsm = Arc::clone(&fsm);
            let images = images.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    fsm.restore(&mut images[i % 2].as_slice()).unwrap();
                }
            })
        };

        let reader = {
            let fsm = Arc::clone(&fsm);
            thread::spawn(move || {
                for _ in 0..2000 {
                    assert_eq!(fsm.len(), 3);
                    let value = fsm.get("b").unwrap();
                    assert!(value == "1" || value == "2");
                }
            })
        };

        restorer.join().unwrap();
        reader.join().unwrap();
    }
}
