//! Host information reported with a successful start

use serde::{Deserialize, Serialize};

/// CPU and memory facts about the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInformation {
    pub cpu_cores: usize,
    pub cpu_model: String,
    pub memory_total: String,
}

impl SystemInformation {
    /// Read host information; unreadable values become `"unknown"`
    pub fn collect() -> Self {
        let cpu_model = std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|s| parse_cpu_model(&s))
            .unwrap_or_else(|| "unknown".to_string());
        let memory_total = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| parse_mem_total(&s))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            cpu_cores: num_cpus::get(),
            cpu_model,
            memory_total,
        }
    }
}

/// First `model name` entry of `/proc/cpuinfo`
pub fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "model name")
        .map(|(_, value)| value.trim().to_string())
        .filter(|model| !model.is_empty())
}

/// `MemTotal` of `/proc/meminfo`, as reported (e.g. `16318412 kB`)
pub fn parse_mem_total(meminfo: &str) -> Option<String> {
    meminfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "MemTotal")
        .map(|(_, value)| value.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|total| !total.is_empty())
}
