//! Integration tests over the scan pipeline and the store/delta fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use procscope_core::audit::AuditLog;
use procscope_core::config::ScanConfig;
use procscope_core::host::EnvFacts;
use procscope_core::process::{ConnectionSummary, ProcessRecord, SuspicionLevel};
use procscope_daemon::delta::{compute_delta, Delta};
use procscope_daemon::scanner::Scanner;
use procscope_daemon::store::ProcessStore;
use procscope_sensor::pool::CodesignPool;
use tempfile::TempDir;

fn record(pid: i32, cpu: f64, level: SuspicionLevel) -> ProcessRecord {
    ProcessRecord {
        pid,
        ppid: None,
        name: format!("proc-{pid}"),
        cmd: String::new(),
        user: "dev".into(),
        cpu,
        mem: 0.0,
        exec_path: None,
        connections: ConnectionSummary::default(),
        level,
        reasons: vec![],
        launchd: None,
        codesign: None,
        parent: None,
    }
}

fn apply(old: &[ProcessRecord], delta: &Delta) -> Vec<ProcessRecord> {
    let mut by_pid: HashMap<i32, ProcessRecord> = old.iter().map(|r| (r.pid, r.clone())).collect();
    for pid in &delta.removed {
        by_pid.remove(pid);
    }
    for row in delta.updated.iter().chain(delta.added.iter()) {
        by_pid.insert(row.pid, row.clone());
    }
    let mut rows: Vec<ProcessRecord> = by_pid.into_values().collect();
    rows.sort_by_key(|r| r.pid);
    rows
}

#[tokio::test]
async fn real_scan_satisfies_sequence_invariants() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProcessStore::new());
    let pool = Arc::new(CodesignPool::new(2));
    let audit = Arc::new(AuditLog::new(dir.path().join("audit.log")).unwrap());
    let env = EnvFacts::detect();
    let config = ScanConfig::default();

    let mut scanner = Scanner::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        Arc::clone(&audit),
        env,
        config.clone(),
    );

    let rows = scanner.scan().await.expect("scan should complete");
    assert!(rows.len() <= config.max_processes);

    // Pids unique.
    let pids: HashSet<i32> = rows.iter().map(|r| r.pid).collect();
    assert_eq!(pids.len(), rows.len());

    // Remote samples bounded.
    assert!(rows.iter().all(|r| r.connections.remotes.len() <= 10));

    // Sorted: level descending, cpu descending within a level.
    for pair in rows.windows(2) {
        assert!(pair[0].level >= pair[1].level);
        if pair[0].level == pair[1].level {
            assert!(pair[0].cpu >= pair[1].cpu);
        }
    }

    // Committed to the store.
    assert_eq!(store.snapshot().len(), rows.len());

    pool.shutdown().await;
}

#[tokio::test]
async fn repeated_scan_reuses_cached_verdicts() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ProcessStore::new());
    let pool = Arc::new(CodesignPool::new(2));
    let audit = Arc::new(AuditLog::new(dir.path().join("audit.log")).unwrap());

    let mut scanner = Scanner::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        audit,
        EnvFacts::detect(),
        ScanConfig::default(),
    );

    let first = scanner.scan().await.unwrap();
    let second = scanner.scan().await.unwrap();

    // A stable process observed twice with an unchanged fingerprint keeps
    // an identical verdict.
    let first_by_pid: HashMap<i32, &ProcessRecord> = first.iter().map(|r| (r.pid, r)).collect();
    for row in &second {
        if let Some(prev) = first_by_pid.get(&row.pid) {
            if prev.cmd == row.cmd && prev.connections.total() == row.connections.total() {
                assert_eq!(prev.level, row.level, "pid {}", row.pid);
                assert_eq!(prev.reasons, row.reasons, "pid {}", row.pid);
            }
        }
    }

    pool.shutdown().await;
}

#[tokio::test]
async fn subscriber_view_reconstructs_from_initial_plus_deltas() {
    let store = ProcessStore::new();
    let mut rx = store.subscribe();

    // Subscriber state: the initial frame.
    let mut last_sent: Vec<ProcessRecord> = rx.borrow_and_update().to_vec();
    assert!(last_sent.is_empty());

    let commits = vec![
        vec![record(1, 5.0, SuspicionLevel::Low), record(2, 1.0, SuspicionLevel::Med)],
        vec![record(2, 1.0, SuspicionLevel::High), record(3, 9.0, SuspicionLevel::Low)],
        vec![record(3, 9.1, SuspicionLevel::Low)],
    ];

    for commit in commits {
        assert!(store.update(commit));
        rx.changed().await.unwrap();
        let current = rx.borrow_and_update().to_vec();

        let delta = compute_delta(&last_sent, &current);
        assert!(!delta.is_empty());
        let mut rebuilt = apply(&last_sent, &delta);
        let mut expected = current.clone();
        rebuilt.sort_by_key(|r| r.pid);
        expected.sort_by_key(|r| r.pid);
        assert_eq!(rebuilt, expected);

        last_sent = current;
    }
}

#[tokio::test]
async fn spec_delta_scenario_over_the_store() {
    let store = ProcessStore::new();
    let mut rx = store.subscribe();

    store.update(vec![
        record(100, 1.0, SuspicionLevel::Low),
        record(200, 1.0, SuspicionLevel::Med),
    ]);
    rx.changed().await.unwrap();
    let last_sent = rx.borrow_and_update().to_vec();

    store.update(vec![
        record(200, 1.0, SuspicionLevel::High),
        record(300, 1.0, SuspicionLevel::Low),
    ]);
    rx.changed().await.unwrap();
    let current = rx.borrow_and_update().to_vec();

    let delta = compute_delta(&last_sent, &current);
    assert_eq!(delta.added.iter().map(|r| r.pid).collect::<Vec<_>>(), vec![300]);
    assert_eq!(delta.updated.iter().map(|r| r.pid).collect::<Vec<_>>(), vec![200]);
    assert_eq!(delta.removed, vec![100]);
}

#[tokio::test]
async fn unchanged_commit_wakes_no_subscriber() {
    let store = ProcessStore::new();
    let mut rx = store.subscribe();

    let rows = vec![record(1, 1.0, SuspicionLevel::Low)];
    assert!(store.update(rows.clone()));
    rx.changed().await.unwrap();
    rx.borrow_and_update();

    // Identical digest: no publish, so no wake.
    assert!(!store.update(rows));
    let woke = tokio::time::timeout(std::time::Duration::from_millis(50), rx.changed()).await;
    assert!(woke.is_err(), "subscriber should not have been notified");
}
