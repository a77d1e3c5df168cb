//! Host facts for the stats endpoint and the ambient environment record
//! injected into the classifier.

use serde::Serialize;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, ProcessRefreshKind, RefreshKind, System};

/// Static and live facts about the host, reported by `/api/stats`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostFacts {
    pub platform: &'static str,
    pub arch: &'static str,
    pub hostname: String,
    /// Seconds since boot.
    pub uptime: u64,
    pub total_mem: u64,
    pub free_mem: u64,
    pub cpu_count: usize,
    pub is_root: bool,
}

impl HostFacts {
    pub fn collect() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::nothing()
                .with_memory(MemoryRefreshKind::everything())
                .with_cpu(CpuRefreshKind::everything())
                .with_processes(ProcessRefreshKind::nothing().with_user(sysinfo::UpdateKind::Always)),
        );
        sys.refresh_memory();

        let cpu_count = if sys.cpus().is_empty() {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            sys.cpus().len()
        };

        let is_root = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid))
            .and_then(|p| p.user_id())
            .map(|uid| **uid == 0)
            .unwrap_or(false);

        Self {
            platform: std::env::consts::OS,
            arch: std::env::consts::ARCH,
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            uptime: System::uptime(),
            total_mem: sys.total_memory(),
            free_mem: sys.available_memory(),
            cpu_count,
            is_root,
        }
    }
}

/// Ambient identity of the monitor process, injected into classification so
/// tests can simulate arbitrary users without touching real system calls.
#[derive(Debug, Clone)]
pub struct EnvFacts {
    pub username: String,
    pub home_dir: String,
}

impl EnvFacts {
    pub fn detect() -> Self {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let home_dir = dirs::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { username, home_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_facts_are_plausible() {
        let facts = HostFacts::collect();
        assert!(!facts.platform.is_empty());
        assert!(!facts.arch.is_empty());
        assert!(facts.total_mem > 0);
    }

    #[test]
    fn host_facts_serialize_camel_case() {
        let facts = HostFacts::collect();
        let json = serde_json::to_value(&facts).unwrap();
        assert!(json.get("totalMem").is_some());
        assert!(json.get("cpuCount").is_some());
        assert!(json.get("isRoot").is_some());
    }

    #[test]
    fn env_facts_detect_does_not_panic() {
        let facts = EnvFacts::detect();
        assert!(!facts.username.is_empty());
    }
}
