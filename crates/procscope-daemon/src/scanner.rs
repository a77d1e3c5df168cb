//! The scan orchestrator.
//!
//! One task drives the loop: collect, enrich in bounded batches, classify,
//! sort, commit, then self-schedule the next scan from the threat profile it
//! just computed. Collector failures degrade to empty data inside the
//! collectors; only the whole-scan deadline aborts a scan, and an aborted
//! scan leaves the store untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tracing::{error, info, warn};

use procscope_core::audit::{AuditLog, SuspiciousEvent};
use procscope_core::classify::{classify, ClassifyInput};
use procscope_core::config::ScanConfig;
use procscope_core::host::EnvFacts;
use procscope_core::process::{CodesignSummary, ConnectionSummary, ProcessRecord, SuspicionLevel};
use procscope_core::signature::Signature;
use procscope_sensor::collectors::{connection_summary, launchd_services, list_processes};
use procscope_sensor::collectors::processes::RawProcess;
use procscope_sensor::pool::{CodesignPool, InlineCodesign, PoolError, SignatureProvider};

use crate::store::ProcessStore;

/// Analysis result reused across scans while the fingerprint holds.
struct CachedVerdict {
    fingerprint: String,
    level: SuspicionLevel,
    reasons: Vec<String>,
    codesign: Option<CodesignSummary>,
}

pub struct Scanner {
    store: Arc<ProcessStore>,
    pool: Arc<CodesignPool>,
    audit: Arc<AuditLog>,
    env: EnvFacts,
    config: ScanConfig,
    /// Per-pid analysis cache; holds only pids present in the latest scan.
    cache: HashMap<i32, CachedVerdict>,
    /// Set once the pool has lost all workers, to log the transition once.
    pool_degraded: bool,
}

impl Scanner {
    pub fn new(
        store: Arc<ProcessStore>,
        pool: Arc<CodesignPool>,
        audit: Arc<AuditLog>,
        env: EnvFacts,
        config: ScanConfig,
    ) -> Self {
        Self {
            store,
            pool,
            audit,
            env,
            config,
            cache: HashMap::new(),
            pool_degraded: false,
        }
    }

    /// Run scans until shutdown. Each iteration recomputes its own delay.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = Duration::from_secs(10);
        loop {
            match self.scan().await {
                Ok(rows) => {
                    let next = next_interval(&rows);
                    if next != interval {
                        info!(
                            prev_secs = interval.as_secs(),
                            next_secs = next.as_secs(),
                            "scan cadence changed"
                        );
                        interval = next;
                    }
                }
                Err(e) => {
                    // Store untouched; keep the current cadence.
                    error!(error = %e, "scan aborted");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("scanner stopped");
    }

    /// One full scan. Returns the committed (or would-be-committed) rows.
    pub async fn scan(&mut self) -> Result<Vec<ProcessRecord>> {
        let deadline = Duration::from_secs(self.config.scan_timeout_secs);
        let (mut procs, conns, services) = tokio::time::timeout(deadline, async {
            tokio::join!(list_processes(), connection_summary(), launchd_services())
        })
        .await
        .context("collector triple exceeded the scan deadline")?;

        // Load shedding: keep the collector's natural order, drop the tail.
        procs.truncate(self.config.max_processes);

        let parent_names: HashMap<i32, String> =
            procs.iter().map(|p| (p.pid, p.name.clone())).collect();

        let mut rows: Vec<ProcessRecord> = Vec::with_capacity(procs.len());
        let mut fallback_used = false;

        for chunk in procs.chunks(self.config.batch_size.max(1)) {
            let mut slots: Vec<Option<ProcessRecord>> = (0..chunk.len()).map(|_| None).collect();
            let mut fresh: Vec<(usize, String)> = Vec::new();

            for (i, proc) in chunk.iter().enumerate() {
                let conn = conns.get(&proc.pid);
                let fp = fingerprint(proc, conn);
                match self.cache.get(&proc.pid) {
                    Some(cached) if cached.fingerprint == fp => {
                        slots[i] = Some(build_record(
                            proc,
                            conn,
                            services.get(&proc.pid),
                            proc.ppid.and_then(|pp| parent_names.get(&pp)),
                            cached.level,
                            cached.reasons.clone(),
                            cached.codesign.clone(),
                        ));
                    }
                    _ => fresh.push((i, fp)),
                }
            }

            let self_ref = &*self;
            let enriched = futures::future::join_all(fresh.iter().map(|(i, _)| {
                let proc = &chunk[*i];
                let conn = conns.get(&proc.pid);
                let launchd = services.get(&proc.pid);
                let parent = proc.ppid.and_then(|pp| parent_names.get(&pp));
                async move { (*i, self_ref.enrich(proc, conn, launchd, parent).await) }
            }))
            .await;

            for ((_, fp), (i, (verdict, signature, used_inline))) in
                fresh.iter().zip(enriched.into_iter())
            {
                fallback_used |= used_inline;
                let proc = &chunk[i];
                let codesign = signature.as_ref().map(CodesignSummary::from);
                self.cache.insert(
                    proc.pid,
                    CachedVerdict {
                        fingerprint: fp.clone(),
                        level: verdict.level,
                        reasons: verdict.reasons.clone(),
                        codesign: codesign.clone(),
                    },
                );
                slots[i] = Some(build_record(
                    proc,
                    conns.get(&proc.pid),
                    services.get(&proc.pid),
                    proc.ppid.and_then(|pp| parent_names.get(&pp)),
                    verdict.level,
                    verdict.reasons,
                    codesign,
                ));
            }

            rows.extend(slots.into_iter().flatten());
        }

        if fallback_used && !self.pool_degraded {
            warn!("codesign pool unavailable, falling back to in-thread signature collection");
            self.pool_degraded = true;
        }

        // Drop cache entries for pids that vanished.
        let live: HashSet<i32> = procs.iter().map(|p| p.pid).collect();
        self.cache.retain(|pid, _| live.contains(pid));
        self.audit.prune(&live);

        // CRITICAL first, then hottest first.
        rows.sort_by(|a, b| {
            b.level
                .cmp(&a.level)
                .then(b.cpu.partial_cmp(&a.cpu).unwrap_or(std::cmp::Ordering::Equal))
        });

        for row in &rows {
            if row.level >= SuspicionLevel::High {
                self.audit.record(SuspiciousEvent::from_record(row));
            }
        }

        self.store.update(rows.clone());
        Ok(rows)
    }

    /// Classify one process, fetching a signature first when its outbound
    /// volume crosses the threshold.
    async fn enrich(
        &self,
        proc: &RawProcess,
        conn: Option<&ConnectionSummary>,
        launchd: Option<&String>,
        parent: Option<&String>,
    ) -> (procscope_core::classify::Verdict, Option<Signature>, bool) {
        let mut used_inline = false;
        let outbound = conn.map_or(0, |c| c.outbound);

        let signature = match (&proc.exec_path, outbound > self.config.signature_outbound_threshold)
        {
            (Some(path), true) => {
                let wait = Duration::from_millis(self.config.signature_wait_ms);
                match tokio::time::timeout(wait, self.pool.signature_of(path)).await {
                    Ok(Ok(sig)) => sig,
                    Ok(Err(PoolError::NoWorkers)) => {
                        used_inline = true;
                        InlineCodesign.signature_of(path).await.ok().flatten()
                    }
                    // Shutdown, cancellation, or caller-side timeout all mean
                    // "no signature this scan".
                    Ok(Err(_)) | Err(_) => None,
                }
            }
            _ => None,
        };

        let verdict = classify(&ClassifyInput {
            name: &proc.name,
            cmd: &proc.cmd,
            user: &proc.user,
            exec_path: proc.exec_path.as_deref(),
            conn,
            launchd: launchd.map(String::as_str),
            signature: signature.as_ref(),
            parent_name: parent.map(String::as_str),
            host_user: &self.env.username,
            home_dir: &self.env.home_dir,
        });

        (verdict, signature, used_inline)
    }
}

/// Scan-time digest that short-circuits reclassification: identity, command
/// line, and total socket count.
fn fingerprint(proc: &RawProcess, conn: Option<&ConnectionSummary>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(proc.pid.to_le_bytes());
    hasher.update([0]);
    hasher.update(proc.exec_path.as_deref().unwrap_or(""));
    hasher.update([0]);
    hasher.update(proc.cmd.as_bytes());
    hasher.update([0]);
    hasher.update(conn.map_or(0, |c| c.total()).to_le_bytes());
    format!("{:x}", hasher.finalize())
}

fn build_record(
    proc: &RawProcess,
    conn: Option<&ConnectionSummary>,
    launchd: Option<&String>,
    parent: Option<&String>,
    level: SuspicionLevel,
    reasons: Vec<String>,
    codesign: Option<CodesignSummary>,
) -> ProcessRecord {
    ProcessRecord {
        pid: proc.pid,
        ppid: proc.ppid,
        name: proc.name.clone(),
        cmd: proc.cmd.clone(),
        user: proc.user.clone(),
        cpu: proc.cpu,
        mem: proc.mem,
        exec_path: proc.exec_path.clone(),
        connections: conn.cloned().unwrap_or_default(),
        level,
        reasons,
        launchd: launchd.cloned(),
        codesign,
        parent: parent.cloned(),
    }
}

/// Adaptive cadence, monotone in threat. Bounds [5, 15] seconds.
pub fn next_interval(rows: &[ProcessRecord]) -> Duration {
    let has = |level: SuspicionLevel| rows.iter().any(|r| r.level == level);

    if has(SuspicionLevel::Critical) {
        Duration::from_secs(5)
    } else if has(SuspicionLevel::High) {
        Duration::from_secs(7)
    } else if rows.len() < 100 && !has(SuspicionLevel::Med) {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(10)
    }
}
