//! Service-manager registration via `launchctl list`.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::command::run_command;

const LAUNCHCTL_TIMEOUT: Duration = Duration::from_secs(5);

/// Map of pid to launchd service label. Errors and timeouts yield an empty
/// map.
pub async fn launchd_services() -> HashMap<i32, String> {
    match run_command("launchctl", &["list"], LAUNCHCTL_TIMEOUT).await {
        Ok(out) => parse_launchctl(&out.stdout),
        Err(e) => {
            warn!(error = %e, "launchd listing failed");
            HashMap::new()
        }
    }
}

/// Parse `launchctl list` output: `PID\tStatus\tLabel` rows. Rows whose pid
/// field is `-` (not currently running) or otherwise non-numeric are
/// skipped.
pub fn parse_launchctl(output: &str) -> HashMap<i32, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(pid), Some(_status), Some(label)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if let Ok(pid) = pid.parse::<i32>() {
            map.insert(pid, label.to_string());
        }
    }
    map
}
