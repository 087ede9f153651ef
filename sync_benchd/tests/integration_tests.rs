//! Integration tests for the sync_benchd host runtime

use std::io::Write;
use sync_benchd::{BenchConfig, BenchError, BenchRuntime, ExecutionMode, Workload};
use services_sync::{PrimitiveKind, ReplyStrategy};
use tempfile::NamedTempFile;

#[test]
fn test_config_file_drives_run() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "workload": "hand_off",
            "iterations": 5,
            "server": {{ "population": 4, "primitive": "semaphore", "reply_strategy": "slow" }}
        }}"#
    )
    .unwrap();

    let config = BenchConfig::load(file.path()).unwrap();
    assert_eq!(config.workload, Workload::HandOff);
    assert_eq!(config.server.primitive, PrimitiveKind::Semaphore);
    assert_eq!(config.server.reply_strategy, ReplyStrategy::Slow);

    let summary = BenchRuntime::new(config).unwrap().run().unwrap();
    assert_eq!(summary.population, 4);
    assert_eq!(summary.stats.requests_for(ipc::MessageLabel::SendWait), 20);
    assert_eq!(summary.stats.requests_for(ipc::MessageLabel::Terminate), 4);
}

#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = BenchConfig::load(dir.path().join("absent.json"));
    assert!(matches!(result, Err(BenchError::Io(_))));
}

#[test]
fn test_malformed_config_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ population: ").unwrap();
    assert!(matches!(
        BenchConfig::load(file.path()),
        Err(BenchError::Config(_))
    ));
}

#[test]
fn test_summary_json_reports_trace() {
    let mut config = BenchConfig {
        workload: Workload::ProducerConsumer,
        iterations: 2,
        ..BenchConfig::default()
    };
    config.server.population = 2;
    config.server.trace_occupancy = true;

    let summary = BenchRuntime::new(config).unwrap().run().unwrap();
    let json = summary.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    let trace: Vec<u64> = value["occupancy_trace"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect();
    assert_eq!(trace.first(), Some(&0));
    assert_eq!(trace.last(), Some(&0));
    assert!(trace.iter().all(|&n| n <= 1));
    assert_eq!(value["stats"]["violations"], 0);
}

#[test]
fn test_every_variant_drains_producer_consumer() {
    for primitive in [
        PrimitiveKind::Mutex,
        PrimitiveKind::Semaphore,
        PrimitiveKind::CondVar,
    ] {
        for strategy in [ReplyStrategy::Fast, ReplyStrategy::Slow, ReplyStrategy::Saved] {
            let mut config = BenchConfig {
                workload: Workload::ProducerConsumer,
                iterations: 10,
                ..BenchConfig::default()
            };
            config.server.primitive = primitive;
            config.server.reply_strategy = strategy;
            config.server.buffer_capacity = 2;

            let mut runtime = BenchRuntime::new(config).unwrap();
            let summary = runtime.run().unwrap();
            assert_eq!(summary.final_occupancy, 0);
            assert_eq!(summary.stats.violations, 0);
            let kernel = runtime.server().unwrap().kernel();
            assert_eq!(kernel.slots_in_use(), 0);
            assert_eq!(kernel.abandoned_count(), 0);
        }
    }
}

#[test]
fn test_threaded_config_file_drives_run() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "mode": "threaded",
            "iterations": 10,
            "server": {{ "population": 4, "primitive": "condvar", "buffer_capacity": 3 }}
        }}"#
    )
    .unwrap();

    let config = BenchConfig::load(file.path()).unwrap();
    assert_eq!(config.mode, ExecutionMode::Threaded);

    let summary = BenchRuntime::new(config).unwrap().run().unwrap();
    assert_eq!(summary.final_occupancy, 0);
    assert_eq!(summary.stats.requests_for(ipc::MessageLabel::Producer), 20);
    assert_eq!(summary.stats.requests_for(ipc::MessageLabel::Terminate), 4);
    assert_eq!(summary.stats.violations, 0);
}

#[test]
fn test_threaded_mode_rejects_saved_replies() {
    let mut config = BenchConfig::default();
    config.mode = ExecutionMode::Threaded;
    config.server.reply_strategy = ReplyStrategy::Saved;
    assert!(matches!(
        BenchRuntime::new(config),
        Err(BenchError::Server(_))
    ));
}
