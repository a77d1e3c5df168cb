//! Per-pid socket aggregation via `lsof`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use procscope_core::process::ConnectionSummary;

use crate::command::run_command;

const LSOF_TIMEOUT: Duration = Duration::from_secs(8);

/// Aggregate socket activity per pid. Errors and timeouts yield an empty map.
pub async fn connection_summary() -> HashMap<i32, ConnectionSummary> {
    match run_command("lsof", &["-i", "-n", "-P"], LSOF_TIMEOUT).await {
        Ok(out) => parse_lsof(&out.stdout),
        Err(e) => {
            warn!(error = %e, "socket listing failed");
            HashMap::new()
        }
    }
}

/// Parse `lsof -i -n -P` output.
///
/// A NAME field containing `->` is an outbound connection whose remote side
/// we sample; a `(LISTEN)` row is a listener; any other row that still
/// carries a `:port` notation counts as outbound without a remote sample.
pub fn parse_lsof(output: &str) -> HashMap<i32, ConnectionSummary> {
    let mut map: HashMap<i32, ConnectionSummary> = HashMap::new();

    for line in output.lines().skip(1) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 9 {
            continue;
        }
        let Ok(pid) = tokens[1].parse::<i32>() else { continue };
        let name_field = tokens[8..].join(" ");

        let summary = map.entry(pid).or_default();
        if let Some((_, remote)) = name_field.split_once("->") {
            let remote = remote
                .split_whitespace()
                .next()
                .unwrap_or(remote)
                .to_string();
            summary.add_outbound(Some(remote.as_str()));
        } else if name_field.contains("(LISTEN)") {
            summary.add_listen();
        } else if name_field.contains(':') {
            summary.add_outbound(None);
        }
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
COMMAND     PID USER   FD   TYPE             DEVICE SIZE/OFF NODE NAME
Safari      433  dev   33u  IPv4 0xabc            0t0  TCP 10.0.1.5:54321->17.253.144.10:443 (ESTABLISHED)
Safari      433  dev   34u  IPv4 0xabd            0t0  TCP 10.0.1.5:54322->17.253.144.10:443 (ESTABLISHED)
Safari      433  dev   35u  IPv4 0xabe            0t0  TCP 10.0.1.5:54323->151.101.1.140:443 (ESTABLISHED)
nginx       800  _www   6u  IPv4 0xabf            0t0  TCP *:8080 (LISTEN)
nginx       800  _www   7u  IPv6 0xac0            0t0  TCP *:8080 (LISTEN)
syncer      900  dev    9u  IPv4 0xac1            0t0  UDP 10.0.1.5:5353
launchd       1 root    8u  IPv4 0xac2            0t0  TCP *:22 (LISTEN)
";

    #[test]
    fn outbound_rows_record_remotes() {
        let map = parse_lsof(SAMPLE);
        let safari = &map[&433];
        assert_eq!(safari.outbound, 3);
        assert_eq!(safari.listen, 0);
        // Two sockets to the same remote collapse to one sample.
        assert_eq!(safari.remotes.len(), 2);
        assert!(safari.remotes.contains(&"17.253.144.10:443".to_string()));
    }

    #[test]
    fn listen_rows_count_listeners() {
        let map = parse_lsof(SAMPLE);
        assert_eq!(map[&800].listen, 2);
        assert_eq!(map[&800].outbound, 0);
        assert_eq!(map[&1].listen, 1);
    }

    #[test]
    fn port_notation_without_arrow_is_outbound_without_remote() {
        let map = parse_lsof(SAMPLE);
        let syncer = &map[&900];
        assert_eq!(syncer.outbound, 1);
        assert!(syncer.remotes.is_empty());
    }

    #[test]
    fn remote_sample_is_capped_at_ten() {
        let mut lines = String::from("HEADER\n");
        for i in 0..30 {
            lines.push_str(&format!(
                "app 50 dev {i}u IPv4 0x0 0t0 TCP 10.0.0.1:1000->203.0.113.{i}:443 (ESTABLISHED)\n"
            ));
        }
        let map = parse_lsof(&lines);
        assert_eq!(map[&50].outbound, 30);
        assert_eq!(map[&50].remotes.len(), 10);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let map = parse_lsof("HEADER\nnot enough tokens\napp x dev 1u IPv4 0 0 TCP foo\n");
        assert!(map.is_empty());
    }
}
