//! The process store: the single authoritative sequence plus change fan-out.
//!
//! Writers serialize through [`ProcessStore::update`]; readers and
//! subscribers get `Arc` snapshots through a watch channel, so the steady
//! state takes no lock. An update whose stability digest matches the
//! previous one publishes nothing, which is what keeps the push protocol
//! quiet under cpu jitter.

use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use procscope_core::process::{ProcessRecord, SuspicionLevel};

/// Cached aggregate stats over the current sequence.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub last_update: Option<DateTime<Utc>>,
}

/// Stability digest over a sequence.
///
/// Per row: pid, cpu rounded to one decimal, level, and the outbound+listen
/// sum. Deliberately coarse: sub-0.1% cpu fluctuations and connection churn
/// that keeps the sum constant do not change the digest, and therefore do
/// not wake subscribers.
pub fn digest(rows: &[ProcessRecord]) -> String {
    let mut out = rows.len().to_string();
    for row in rows {
        out.push('|');
        out.push_str(&format!(
            "{}:{}:{}:{}",
            row.pid,
            (row.cpu * 10.0).round() as i64,
            row.level.as_str(),
            row.connections.total()
        ));
    }
    out
}

pub struct ProcessStore {
    seq_tx: watch::Sender<Arc<Vec<ProcessRecord>>>,
    last_digest: Mutex<String>,
    stats: RwLock<ScanStats>,
}

impl ProcessStore {
    pub fn new() -> Self {
        let (seq_tx, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            seq_tx,
            last_digest: Mutex::new(digest(&[])),
            stats: RwLock::new(ScanStats::default()),
        }
    }

    /// Commit a scan result. Returns `true` when the sequence changed and
    /// subscribers were notified.
    pub fn update(&self, rows: Vec<ProcessRecord>) -> bool {
        let new_digest = digest(&rows);
        {
            let mut last = self.last_digest.lock().unwrap();
            if *last == new_digest {
                debug!(rows = rows.len(), "scan digest unchanged, no publish");
                return false;
            }
            *last = new_digest;
        }

        let stats = ScanStats {
            total: rows.len(),
            critical: rows.iter().filter(|r| r.level == SuspicionLevel::Critical).count(),
            high: rows.iter().filter(|r| r.level == SuspicionLevel::High).count(),
            medium: rows.iter().filter(|r| r.level == SuspicionLevel::Med).count(),
            last_update: Some(Utc::now()),
        };
        *self.stats.write().unwrap() = stats;

        self.seq_tx.send_replace(Arc::new(rows));
        true
    }

    /// Current sequence as an immutable snapshot.
    pub fn snapshot(&self) -> Arc<Vec<ProcessRecord>> {
        self.seq_tx.borrow().clone()
    }

    /// One record by pid.
    pub fn get(&self, pid: i32) -> Option<ProcessRecord> {
        self.seq_tx.borrow().iter().find(|r| r.pid == pid).cloned()
    }

    pub fn stats(&self) -> ScanStats {
        self.stats.read().unwrap().clone()
    }

    /// Register for change notifications. The receiver holds the latest
    /// sequence at all times; subscribers snapshot on wake.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<ProcessRecord>>> {
        self.seq_tx.subscribe()
    }
}

impl Default for ProcessStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procscope_core::process::ConnectionSummary;

    fn record(pid: i32, cpu: f64, level: SuspicionLevel, outbound: u32) -> ProcessRecord {
        ProcessRecord {
            pid,
            ppid: None,
            name: format!("proc-{pid}"),
            cmd: String::new(),
            user: "dev".into(),
            cpu,
            mem: 0.0,
            exec_path: None,
            connections: ConnectionSummary {
                outbound,
                listen: 0,
                remotes: vec![],
            },
            level,
            reasons: vec![],
            launchd: None,
            codesign: None,
            parent: None,
        }
    }

    #[test]
    fn first_update_publishes() {
        let store = ProcessStore::new();
        assert!(store.update(vec![record(1, 1.0, SuspicionLevel::Low, 0)]));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn identical_digest_is_a_no_op() {
        let store = ProcessStore::new();
        let rows = vec![record(1, 1.0, SuspicionLevel::Low, 0)];
        assert!(store.update(rows.clone()));
        assert!(!store.update(rows));
    }

    #[test]
    fn small_cpu_jitter_is_suppressed() {
        let store = ProcessStore::new();
        assert!(store.update(vec![record(1, 1.00, SuspicionLevel::Low, 0)]));
        // 0.04% wobble rounds to the same tenth.
        assert!(!store.update(vec![record(1, 1.04, SuspicionLevel::Low, 0)]));
        // A full tenth registers.
        assert!(store.update(vec![record(1, 1.10, SuspicionLevel::Low, 0)]));
    }

    #[test]
    fn level_change_alters_digest() {
        let store = ProcessStore::new();
        assert!(store.update(vec![record(1, 1.0, SuspicionLevel::Low, 0)]));
        assert!(store.update(vec![record(1, 1.0, SuspicionLevel::High, 0)]));
    }

    #[test]
    fn connection_sum_change_alters_digest() {
        let store = ProcessStore::new();
        assert!(store.update(vec![record(1, 1.0, SuspicionLevel::Low, 2)]));
        assert!(store.update(vec![record(1, 1.0, SuspicionLevel::Low, 3)]));
    }

    #[test]
    fn stats_reflect_latest_sequence() {
        let store = ProcessStore::new();
        store.update(vec![
            record(1, 1.0, SuspicionLevel::Critical, 0),
            record(2, 1.0, SuspicionLevel::High, 0),
            record(3, 1.0, SuspicionLevel::Med, 0),
            record(4, 1.0, SuspicionLevel::Low, 0),
        ]);
        let stats = store.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.critical, 1);
        assert_eq!(stats.high, 1);
        assert_eq!(stats.medium, 1);
        assert!(stats.last_update.is_some());
    }

    #[test]
    fn get_by_pid() {
        let store = ProcessStore::new();
        store.update(vec![record(7, 1.0, SuspicionLevel::Low, 0)]);
        assert!(store.get(7).is_some());
        assert!(store.get(8).is_none());
    }

    #[tokio::test]
    async fn subscribers_observe_updates_in_commit_order() {
        let store = ProcessStore::new();
        let mut rx = store.subscribe();

        store.update(vec![record(1, 1.0, SuspicionLevel::Low, 0)]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()[0].pid, 1);

        store.update(vec![record(2, 1.0, SuspicionLevel::Low, 0)]);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()[0].pid, 2);
    }
}
