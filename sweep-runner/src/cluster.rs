//! Where the sweep runs: the machine list and the code version tag.

use crate::error::RunnerError;
use crate::executor::OutputRelay;
use crate::hooks::run_command;
use regex::Regex;
use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, warn};

/// Environment variable holding a SLURM allocation's compressed node list.
pub const SLURM_NODELIST_ENV: &str = "SLURM_NODELIST";

/// Split an explicit `a,b,c` machine list.
pub fn parse_machine_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}

/// Resolve the machines available to this sweep.
///
/// Explicit override first, then the SLURM allocation, then the local host.
pub async fn machines(override_list: Option<&str>) -> Vec<String> {
    if let Some(list) = override_list {
        let parsed = parse_machine_list(list);
        if !parsed.is_empty() {
            return parsed;
        }
    }

    if let Ok(nodelist) = std::env::var(SLURM_NODELIST_ENV) {
        match slurm_hosts(&nodelist).await {
            Ok(hosts) if !hosts.is_empty() => return hosts,
            Ok(_) => warn!(%nodelist, "scontrol returned no hosts"),
            Err(e) => warn!(error = %e, %nodelist, "failed to expand SLURM node list"),
        }
    }

    vec![System::host_name().unwrap_or_else(|| "localhost".to_string())]
}

/// Expand a compressed node list with `scontrol show hostname`.
async fn slurm_hosts(nodelist: &str) -> std::io::Result<Vec<String>> {
    let output = Command::new("scontrol")
        .args(["show", "hostname", nodelist])
        .output()
        .await?;
    if !output.status.success() {
        return Ok(Vec::new());
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Reduce a raw version string to its leading word (`v3-12-gabc` becomes `v3`).
pub fn reduce_version_tag(raw: &str) -> Option<String> {
    let re = Regex::new(r"^(\w+)(-.*)?").ok()?;
    re.captures(raw.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Run the version command and reduce its output to a tag.
pub async fn version_tag(command: &[String]) -> Result<String, RunnerError> {
    let raw = run_command(command, &OutputRelay::disabled())
        .await
        .map_err(|e| RunnerError::Version(e.to_string()))?;
    debug!(raw = %raw.trim(), "version command output");
    reduce_version_tag(&raw).ok_or_else(|| {
        RunnerError::Version(format!(
            "`{}` printed no usable tag: {:?}",
            command.join(" "),
            raw.trim()
        ))
    })
}
