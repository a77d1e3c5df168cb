//! Fixed vocabularies and compiled matchers for the rule engine.
//!
//! Families are scanned with Aho-Corasick (case-insensitive, first match
//! wins within a family); the looser vendor/agent checks use regexes.

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use regex::Regex;

fn matcher(patterns: &[&str]) -> AhoCorasick {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(patterns)
        .expect("keyword matcher")
}

/// Keylogger naming patterns checked against name, cmd, and exec path.
pub static KEYLOGGER: LazyLock<AhoCorasick> = LazyLock::new(|| {
    matcher(&[
        "keylog",
        "keystroke",
        "keywatch",
        "keysniff",
        "keycapture",
        "keyspy",
        "logkeys",
        "kidlogger",
        "refog",
        "spyrix",
    ])
});

/// macOS input-monitoring API tokens that show up in command lines of
/// processes tapping the event stream.
pub static INPUT_MONITOR: LazyLock<AhoCorasick> = LazyLock::new(|| {
    matcher(&[
        "CGEventTap",
        "IOHIDManager",
        "IOHIDDevice",
        "addGlobalMonitorForEvents",
        "kCGEventKeyDown",
        "NSEventMaskKeyDown",
    ])
});

/// Accessibility API tokens.
pub static ACCESSIBILITY: LazyLock<AhoCorasick> =
    LazyLock::new(|| matcher(&["AXIsProcessTrusted", "AXUIElement", "AXObserver"]));

pub static SCREEN_RECORDER: LazyLock<AhoCorasick> = LazyLock::new(|| {
    matcher(&["screenrecord", "screencapturekit", "screenshot", "avscreencap", "screencast"])
});

pub static REMOTE_ACCESS: LazyLock<AhoCorasick> = LazyLock::new(|| {
    matcher(&[
        "teamviewer",
        "anydesk",
        "vnc",
        "logmein",
        "splashtop",
        "rustdesk",
        "remotepc",
        "chrome-remote",
    ])
});

pub static CRYPTOMINER: LazyLock<AhoCorasick> = LazyLock::new(|| {
    matcher(&[
        "xmrig",
        "minerd",
        "cpuminer",
        "cgminer",
        "nicehash",
        "stratum+tcp",
        "randomx",
        "ethminer",
        "coinhive",
        "cryptonight",
    ])
});

/// Tools commonly abused to move data off the host. Only suspicious when the
/// binary is unsigned or signed by an untrusted team.
pub static EXFILTRATION: LazyLock<AhoCorasick> = LazyLock::new(|| {
    matcher(&["curl", "wget", "rsync", "netcat", "nscurl", "scp", "sftp"])
});

/// Names nobody ships legitimately.
pub static EXPLICIT_SUSPICIOUS: LazyLock<AhoCorasick> = LazyLock::new(|| {
    matcher(&[
        "mimikatz",
        "lazagne",
        "metasploit",
        "meterpreter",
        "cobaltstrike",
        "darkcomet",
        "njrat",
        "backdoor",
        "trojan",
        "rootkit",
    ])
});

/// Endpoint-management / EDR vendor fingerprints.
pub static MGMT_SUITE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(jamf|kandji|munki|fleetdm|osquery|intune|airwatch|addigy|mosyle|puppet)\b")
        .expect("mgmt suite regex")
});

pub static AGENTISH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(launchd|agent|daemon)").expect("agentish regex"));

/// A path component whose name starts with a dot.
pub static HIDDEN_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\.[^/]+/").expect("hidden dir regex"));

static RAW_IPV4_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("ipv4 regex"));

/// Filesystem prefixes (pre-tilde-expansion) where persistent executables
/// are a red flag.
pub const SUSPICIOUS_LOCATIONS: &[&str] = &[
    "/tmp/",
    "/var/tmp/",
    "/private/tmp/",
    "~/Downloads/",
    "/Users/Shared/",
];

/// Remote ports associated with miner pools and common C2 defaults.
pub const SUSPICIOUS_PORTS: &[u16] = &[3333, 4444, 5555, 6667, 8333, 9001, 14444, 45700];

/// Heuristic for a remote endpoint worth flagging in the data-upload rule:
/// not an Apple/iCloud/localhost endpoint, and either a raw IPv4 address or
/// a TLD with a poor reputation for this traffic profile.
pub fn is_suspicious_remote(remote: &str) -> bool {
    let host = remote.rsplit_once(':').map_or(remote, |(h, _)| h);
    let host = host.to_lowercase();
    if host.contains("apple") || host.contains("icloud") {
        return false;
    }
    if host == "localhost" || host.starts_with("127.") || host == "::1" {
        return false;
    }
    if RAW_IPV4_RE.is_match(&host) {
        return true;
    }
    [".ru", ".cn", ".tk", ".onion"].iter().any(|tld| host.ends_with(tld))
}

/// Extract the port from a `host:port` remote, if present.
pub fn remote_port(remote: &str) -> Option<u16> {
    remote.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
}
