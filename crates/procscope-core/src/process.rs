//! Process records as published to subscribers and the read API.
//!
//! Field order on the wire types is load-bearing: clients digest the JSON
//! byte stream, so keys are emitted in declaration order and absent optional
//! fields are omitted uniformly.

use serde::{Deserialize, Serialize};

use crate::signature::Signature;

/// Upper bound on distinct remote endpoints sampled per process.
pub const MAX_REMOTES: usize = 10;

/// Suspicion level assigned by the classifier. Total order, `Low` least.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum SuspicionLevel {
    #[default]
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MED")]
    Med,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "CRITICAL")]
    Critical,
}

impl SuspicionLevel {
    /// Numeric rank used by the store digest (`Low` = 0).
    pub fn rank(self) -> u8 {
        match self {
            SuspicionLevel::Low => 0,
            SuspicionLevel::Med => 1,
            SuspicionLevel::High => 2,
            SuspicionLevel::Critical => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SuspicionLevel::Low => "LOW",
            SuspicionLevel::Med => "MED",
            SuspicionLevel::High => "HIGH",
            SuspicionLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for SuspicionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-pid aggregate of socket activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub outbound: u32,
    pub listen: u32,
    /// Up to [`MAX_REMOTES`] distinct `host[:port]` endpoints.
    pub remotes: Vec<String>,
}

impl ConnectionSummary {
    /// Record one more outbound socket, sampling the remote endpoint.
    /// Duplicates collapse; the sample stops growing at [`MAX_REMOTES`].
    pub fn add_outbound(&mut self, remote: Option<&str>) {
        self.outbound += 1;
        if let Some(remote) = remote {
            if self.remotes.len() < MAX_REMOTES && !self.remotes.iter().any(|r| r == remote) {
                self.remotes.push(remote.to_string());
            }
        }
    }

    pub fn add_listen(&mut self) {
        self.listen += 1;
    }

    /// Total socket count used by fingerprints and the store digest.
    pub fn total(&self) -> u32 {
        self.outbound + self.listen
    }
}

/// Code-signature summary carried on the wire. The full [`Signature`] stays
/// in the enrichment pipeline; subscribers only see this reduced shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodesignSummary {
    pub signed: bool,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notarized: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_store: Option<bool>,
}

impl From<&Signature> for CodesignSummary {
    fn from(sig: &Signature) -> Self {
        Self {
            signed: sig.signed,
            valid: sig.valid,
            team_id: sig.team_identifier.clone(),
            notarized: sig.notarized,
            app_store: sig.is_app_store,
        }
    }
}

/// One running process as observed at a scan, enriched and classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ppid: Option<i32>,
    pub name: String,
    pub cmd: String,
    pub user: String,
    pub cpu: f64,
    pub mem: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_path: Option<String>,
    pub connections: ConnectionSummary,
    pub level: SuspicionLevel,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launchd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codesign: Option<CodesignSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_order_is_total() {
        assert!(SuspicionLevel::Low < SuspicionLevel::Med);
        assert!(SuspicionLevel::Med < SuspicionLevel::High);
        assert!(SuspicionLevel::High < SuspicionLevel::Critical);
    }

    #[test]
    fn level_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&SuspicionLevel::Critical).unwrap(),
            "\"CRITICAL\""
        );
        assert_eq!(serde_json::to_string(&SuspicionLevel::Med).unwrap(), "\"MED\"");
    }

    #[test]
    fn remotes_are_bounded_and_distinct() {
        let mut conn = ConnectionSummary::default();
        for i in 0..20 {
            conn.add_outbound(Some(&format!("10.0.0.{}:443", i % 12)));
        }
        assert_eq!(conn.outbound, 20);
        assert_eq!(conn.remotes.len(), MAX_REMOTES);
        let mut deduped = conn.remotes.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), conn.remotes.len());
    }

    #[test]
    fn outbound_without_remote_still_counts() {
        let mut conn = ConnectionSummary::default();
        conn.add_outbound(None);
        assert_eq!(conn.outbound, 1);
        assert!(conn.remotes.is_empty());
    }

    #[test]
    fn wire_format_omits_absent_optionals() {
        let record = ProcessRecord {
            pid: 42,
            ppid: None,
            name: "test".into(),
            cmd: "/usr/bin/test".into(),
            user: "dev".into(),
            cpu: 1.5,
            mem: 0.2,
            exec_path: None,
            connections: ConnectionSummary::default(),
            level: SuspicionLevel::Low,
            reasons: vec![],
            launchd: None,
            codesign: None,
            parent: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("ppid"));
        assert!(!json.contains("execPath"));
        assert!(!json.contains("codesign"));
        // Key order is declaration order.
        let pid_at = json.find("\"pid\"").unwrap();
        let level_at = json.find("\"level\"").unwrap();
        assert!(pid_at < level_at);
    }
}
