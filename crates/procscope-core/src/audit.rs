//! Append-only JSON-lines log of HIGH/CRITICAL sightings.
//!
//! Writes go through a channel to a dedicated writer thread so the scan loop
//! never blocks on disk. One line per event, deduplicated per process
//! lifetime on `(pid, name, level)`; write errors are logged and swallowed.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{mpsc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::process::{ProcessRecord, SuspicionLevel};

/// Remote endpoints retained per audit line.
const MAX_AUDIT_REMOTES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConnections {
    pub outbound: u32,
    pub listen: u32,
    pub remotes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditCodesign {
    pub signed: bool,
    pub valid: bool,
    pub team_id: Option<String>,
    pub notarized: Option<bool>,
}

/// One suspicious-process sighting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousEvent {
    pub timestamp: DateTime<Utc>,
    pub level: SuspicionLevel,
    pub pid: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppid: Option<i32>,
    pub name: String,
    pub user: String,
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub reasons: Vec<String>,
    pub connections: AuditConnections,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codesign: Option<AuditCodesign>,
}

impl SuspiciousEvent {
    pub fn from_record(record: &ProcessRecord) -> Self {
        Self {
            timestamp: Utc::now(),
            level: record.level,
            pid: record.pid,
            ppid: record.ppid,
            name: record.name.clone(),
            user: record.user.clone(),
            cmd: record.cmd.clone(),
            exec_path: record.exec_path.clone(),
            parent: record.parent.clone(),
            reasons: record.reasons.clone(),
            connections: AuditConnections {
                outbound: record.connections.outbound,
                listen: record.connections.listen,
                remotes: record
                    .connections
                    .remotes
                    .iter()
                    .take(MAX_AUDIT_REMOTES)
                    .cloned()
                    .collect(),
            },
            codesign: record.codesign.as_ref().map(|c| AuditCodesign {
                signed: c.signed,
                valid: c.valid,
                team_id: c.team_id.clone(),
                notarized: c.notarized,
            }),
        }
    }
}

enum WriterCommand {
    Write(Box<SuspiciousEvent>),
    Shutdown,
}

/// File-backed suspicious-event log with a channel-fed writer thread.
pub struct AuditLog {
    sender: mpsc::Sender<WriterCommand>,
    writer_handle: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Dedup keys for events already logged this process lifetime.
    seen: Mutex<HashSet<(i32, String)>>,
}

impl AuditLog {
    /// Open (creating parent directories as needed) and spawn the writer.
    pub fn new(log_path: PathBuf) -> Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dirs for {}", log_path.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("opening audit log {}", log_path.display()))?;

        let (sender, receiver) = mpsc::channel::<WriterCommand>();
        let mut writer = BufWriter::new(file);

        let writer_handle = std::thread::spawn(move || {
            while let Ok(cmd) = receiver.recv() {
                match cmd {
                    WriterCommand::Write(event) => {
                        let line = match serde_json::to_string(&event) {
                            Ok(line) => line,
                            Err(e) => {
                                warn!(error = %e, "failed to serialize audit event");
                                continue;
                            }
                        };
                        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
                            warn!(error = %e, "failed to write audit event");
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
            let _ = writer.flush();
        });

        Ok(Self {
            sender,
            writer_handle: Mutex::new(Some(writer_handle)),
            seen: Mutex::new(HashSet::new()),
        })
    }

    /// Queue one event. Repeats of the same `(pid, name, level)` within the
    /// process lifetime are dropped.
    pub fn record(&self, event: SuspiciousEvent) {
        let key = (event.pid, format!("{}|{}", event.name, event.level));
        {
            let mut seen = self.seen.lock().unwrap();
            if !seen.insert(key) {
                return;
            }
        }
        if self.sender.send(WriterCommand::Write(Box::new(event))).is_err() {
            warn!("audit writer channel closed, dropping event");
        }
    }

    /// Forget dedup keys for pids no longer present, so a recycled pid logs
    /// again.
    pub fn prune(&self, live_pids: &HashSet<i32>) {
        let mut seen = self.seen.lock().unwrap();
        seen.retain(|(pid, _)| live_pids.contains(pid));
    }

    /// Flush and stop the writer thread.
    pub fn shutdown(&self) {
        let _ = self.sender.send(WriterCommand::Shutdown);
        if let Ok(mut guard) = self.writer_handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        let _ = self.sender.send(WriterCommand::Shutdown);
        if let Ok(mut guard) = self.writer_handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}
