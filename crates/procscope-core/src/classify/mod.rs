//! The suspicion rule engine.
//!
//! [`classify`] is a pure function over one enriched process observation.
//! Rules run in a fixed order and may append reason codes and raise the
//! level; apart from the single trusted-binary downgrade, no rule lowers a
//! level. Reason order is rule order, and duplicates collapse.

pub mod injection;
pub mod keywords;
pub mod mimicry;

use crate::process::{ConnectionSummary, SuspicionLevel};
use crate::signature::{Signature, TrustLevel};

/// Everything the classifier may look at for one process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifyInput<'a> {
    pub name: &'a str,
    pub cmd: &'a str,
    pub user: &'a str,
    pub exec_path: Option<&'a str>,
    pub conn: Option<&'a ConnectionSummary>,
    pub launchd: Option<&'a str>,
    pub signature: Option<&'a Signature>,
    pub parent_name: Option<&'a str>,
    /// User the monitor itself runs as (injected, never read from the OS here).
    pub host_user: &'a str,
    /// Home directory for `~` expansion in path rules.
    pub home_dir: &'a str,
}

impl<'a> ClassifyInput<'a> {
    fn outbound(&self) -> u32 {
        self.conn.map_or(0, |c| c.outbound)
    }

    fn listen(&self) -> u32 {
        self.conn.map_or(0, |c| c.listen)
    }

    fn remotes(&self) -> &[String] {
        self.conn.map_or(&[], |c| c.remotes.as_slice())
    }
}

/// Classifier output: the level plus the ordered, deduplicated reason codes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Verdict {
    pub level: SuspicionLevel,
    pub reasons: Vec<String>,
}

impl Verdict {
    fn raise(&mut self, level: SuspicionLevel) {
        if level > self.level {
            self.level = level;
        }
    }

    fn tag(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.reasons.iter().any(|r| *r == reason) {
            self.reasons.push(reason);
        }
    }

    fn hit(&mut self, level: SuspicionLevel, reason: impl Into<String>) {
        self.tag(reason);
        self.raise(level);
    }

    fn has(&self, reason: &str) -> bool {
        self.reasons.iter().any(|r| r == reason)
    }
}

/// Classify one process observation. Pure and deterministic.
pub fn classify(input: &ClassifyInput<'_>) -> Verdict {
    let mut v = Verdict::default();

    input_monitoring_rules(input, &mut v);
    network_anomaly_rules(input, &mut v);
    descriptive_tags(input, &mut v);
    network_volume_rules(input, &mut v);
    keyword_family_rules(input, &mut v);
    location_rules(input, &mut v);
    signature_trust_rules(input, &mut v);
    injection_rules(input, &mut v);
    name_anomaly_rules(input, &mut v);
    combinatorial_tightening(&mut v);

    v
}

/// Phase 1: keylogger and input-monitoring detection.
fn input_monitoring_rules(input: &ClassifyInput<'_>, v: &mut Verdict) {
    let path = input.exec_path.unwrap_or_default();
    let outbound = input.outbound();

    let keylogger = keywords::KEYLOGGER.is_match(input.name)
        || keywords::KEYLOGGER.is_match(input.cmd)
        || keywords::KEYLOGGER.is_match(path);
    if keylogger {
        if outbound > 0 {
            v.hit(SuspicionLevel::Critical, "keylogger-with-network-activity");
        } else {
            v.hit(SuspicionLevel::High, "keylogger-pattern");
        }
    }

    let input_monitor =
        keywords::INPUT_MONITOR.is_match(input.cmd) || keywords::INPUT_MONITOR.is_match(path);
    if input_monitor {
        if outbound > 2 {
            v.hit(SuspicionLevel::Critical, "input-monitoring-with-network");
        }
        if input.signature.is_some_and(|s| !s.signed) {
            v.hit(SuspicionLevel::Critical, "unsigned-input-monitor");
        }
        if input
            .parent_name
            .is_some_and(injection::is_spawn_risk_parent)
        {
            v.hit(SuspicionLevel::High, "browser-spawned-input-monitor");
        }
    }

    let accessibility =
        keywords::ACCESSIBILITY.is_match(input.cmd) || keywords::ACCESSIBILITY.is_match(path);
    if accessibility && outbound > 1 {
        v.hit(SuspicionLevel::Critical, "accessibility-with-network");
    }
}

/// Phase 2: bulk upload shape and known-bad remote ports.
fn network_anomaly_rules(input: &ClassifyInput<'_>, v: &mut Verdict) {
    let remotes = input.remotes();

    if input.outbound() > 10
        && remotes.len() > 5
        && remotes.iter().any(|r| keywords::is_suspicious_remote(r))
    {
        v.hit(SuspicionLevel::High, "suspicious-data-upload-pattern");
    }

    for remote in remotes {
        if let Some(port) = keywords::remote_port(remote) {
            if keywords::SUSPICIOUS_PORTS.contains(&port) {
                v.hit(SuspicionLevel::Med, format!("suspicious-port:{port}"));
            }
        }
    }
}

/// Phase 3: descriptive tags.
fn descriptive_tags(input: &ClassifyInput<'_>, v: &mut Verdict) {
    if !input.user.is_empty()
        && input.user != input.host_user
        && input.user != "root"
        && input.user != "_www"
    {
        v.hit(SuspicionLevel::Med, "different-user");
    }
    if keywords::AGENTISH_RE.is_match(input.cmd) {
        v.tag("agent-ish");
    }
    if input.launchd.is_some() {
        v.tag("launchd-managed");
    }
    if keywords::MGMT_SUITE_RE.is_match(input.cmd) {
        v.tag("mgmt-suite");
    }
}

/// Phase 4: raw connection volume.
fn network_volume_rules(input: &ClassifyInput<'_>, v: &mut Verdict) {
    if input.outbound() + input.listen() > 20 {
        v.tag("many-connections");
    }
    if input.outbound() > 50 {
        v.hit(SuspicionLevel::Med, "excessive-outbound");
    }
}

/// Phase 5: keyword families over name and cmd, first match wins per family.
fn keyword_family_rules(input: &ClassifyInput<'_>, v: &mut Verdict) {
    let hay = format!("{} {}", input.name, input.cmd);

    if keywords::SCREEN_RECORDER.is_match(&hay) {
        v.hit(SuspicionLevel::Med, "screen-recorder");
    }
    if keywords::REMOTE_ACCESS.is_match(&hay) {
        v.hit(SuspicionLevel::Med, "remote-access");
    }
    if keywords::CRYPTOMINER.is_match(&hay) {
        v.hit(SuspicionLevel::High, "cryptominer");
    }
    if keywords::EXFILTRATION.is_match(&hay) {
        // Signed-by-a-trusted-team copies of these tools are routine.
        let trusted = input.signature.is_some_and(|s| s.has_trusted_team());
        if !trusted {
            v.hit(SuspicionLevel::Med, "data-exfiltration");
        }
    }
    if keywords::EXPLICIT_SUSPICIOUS.is_match(&hay) {
        v.hit(SuspicionLevel::Critical, "suspicious-name");
    }
}

fn expand_tilde(path: &str, home: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) if !home.is_empty() => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    }
}

/// Phase 6: filesystem location of the executable.
fn location_rules(input: &ClassifyInput<'_>, v: &mut Verdict) {
    let Some(path) = input.exec_path else { return };
    let expanded = expand_tilde(path, input.home_dir);

    for prefix in keywords::SUSPICIOUS_LOCATIONS {
        let expanded_prefix = expand_tilde(prefix, input.home_dir);
        if expanded.starts_with(&expanded_prefix) {
            v.hit(SuspicionLevel::Med, format!("suspicious-location:{prefix}"));
        }
    }
    if keywords::HIDDEN_DIR_RE.is_match(&expanded) {
        v.hit(SuspicionLevel::Med, "hidden-directory-path");
    }
}

/// Phase 7: signature trust. Runs only when signature data was collected.
fn signature_trust_rules(input: &ClassifyInput<'_>, v: &mut Verdict) {
    let Some(sig) = input.signature else { return };

    match sig.trust_level() {
        TrustLevel::Malicious => v.hit(SuspicionLevel::Critical, "malicious-signature"),
        TrustLevel::Suspicious => v.hit(SuspicionLevel::High, "unsigned"),
        TrustLevel::Unknown => {
            v.tag("unknown-signature");
            let homebrew = input
                .exec_path
                .is_some_and(|p| p.starts_with("/usr/local/"));
            if !homebrew {
                v.raise(SuspicionLevel::Med);
            }
        }
        TrustLevel::Verified => {
            if sig.notarized == Some(true) {
                v.tag("notarized");
            }
        }
        TrustLevel::Trusted => {
            // The single documented downgrade: a MED built from a few minor
            // reasons is forgiven for trusted vendors.
            let downgrade = v.level == SuspicionLevel::Med && v.reasons.len() <= 3;
            v.tag("trusted-binary");
            if downgrade {
                v.level = SuspicionLevel::Low;
            }
        }
    }
}

/// Phase 8: parent-to-child injection heuristics.
fn injection_rules(input: &ClassifyInput<'_>, v: &mut Verdict) {
    let Some(parent) = input.parent_name else { return };
    if let Some(category) = injection::detect(parent, input.cmd) {
        v.hit(category.level, category.reason);
    }
}

/// Phase 9: process-name anomalies.
fn name_anomaly_rules(input: &ClassifyInput<'_>, v: &mut Verdict) {
    if input.name.starts_with('.') {
        v.hit(SuspicionLevel::Med, "hidden-process");
    }
    if input.name.is_empty() && !input.cmd.is_empty() {
        v.tag("unnamed-process");
    }
    if input
        .name
        .chars()
        .any(|c| matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'))
    {
        v.hit(SuspicionLevel::High, "zero-width-chars");
    }
    if let Some(sys) = mimicry::find_mimicked_system_process(input.name) {
        v.hit(SuspicionLevel::High, format!("mimicking-system-process:{sys}"));
    }
}

/// Phase 10: combinatorial tightening.
fn combinatorial_tightening(v: &mut Verdict) {
    if (v.has("mgmt-suite") || v.has("launchd-managed")) && v.level == SuspicionLevel::Low {
        v.level = SuspicionLevel::Med;
    }
    if v.reasons.len() >= 3 && v.level == SuspicionLevel::Low {
        v.level = SuspicionLevel::Med;
    }
    if v.reasons.len() >= 5 && v.level == SuspicionLevel::Med {
        v.level = SuspicionLevel::High;
    }
}
