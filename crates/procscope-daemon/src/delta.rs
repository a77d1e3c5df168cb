//! Pid-wise deltas between two committed sequences.
//!
//! Each subscriber computes deltas against its own last-sent sequence, so
//! the shapes here are per-subscriber state, not store state. Row change
//! detection is structural (`PartialEq` on the record), not serialized-byte
//! equality.

use std::collections::HashMap;

use serde::Serialize;

use procscope_core::process::ProcessRecord;

/// Changes between a subscriber's last-sent sequence and the current one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Delta {
    pub added: Vec<ProcessRecord>,
    pub updated: Vec<ProcessRecord>,
    pub removed: Vec<i32>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Compute `new - old` by pid: rows only in `new` are added, rows only in
/// `old` are removed, rows in both that compare unequal are updated.
pub fn compute_delta(old: &[ProcessRecord], new: &[ProcessRecord]) -> Delta {
    let old_by_pid: HashMap<i32, &ProcessRecord> = old.iter().map(|r| (r.pid, r)).collect();
    let new_pids: std::collections::HashSet<i32> = new.iter().map(|r| r.pid).collect();

    let mut delta = Delta::default();
    for row in new {
        match old_by_pid.get(&row.pid) {
            None => delta.added.push(row.clone()),
            Some(prev) if *prev != row => delta.updated.push(row.clone()),
            Some(_) => {}
        }
    }
    for row in old {
        if !new_pids.contains(&row.pid) {
            delta.removed.push(row.pid);
        }
    }
    delta
}
