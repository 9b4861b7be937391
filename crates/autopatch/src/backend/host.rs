//! Host-state collaborator backed by sysfs and the shell.

use super::HostState;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use autopatch_common::UpdateCandidate;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Packages whose update only takes effect after a reboot
pub const REBOOT_PACKAGES: &[&str] = &[
    "kernel",
    "kernel-core",
    "kernel-rt",
    "kernel-rt-core",
    "glibc",
    "linux-firmware",
    "systemd",
    "dbus",
    "dbus-broker",
    "dbus-daemon",
    "microcode_ctl",
];

pub struct SystemHost {
    sysfs_net: PathBuf,
}

impl SystemHost {
    pub fn new() -> Self {
        Self {
            sysfs_net: PathBuf::from("/sys/class/net"),
        }
    }

    /// Read interface state from another directory (tests, containers)
    pub fn with_sysfs_net(path: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_net: path.into(),
        }
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Reason a reboot is needed for `applied`, by package name
pub fn reboot_reason(applied: &[UpdateCandidate]) -> Option<String> {
    let core: Vec<&str> = applied
        .iter()
        .map(|c| c.name.as_str())
        .filter(|name| REBOOT_PACKAGES.contains(name) || name.starts_with("kernel-core"))
        .collect();

    if core.is_empty() {
        None
    } else {
        Some(format!("core packages updated: {}", core.join(", ")))
    }
}

#[async_trait]
impl HostState for SystemHost {
    async fn network_online(&self) -> bool {
        let Ok(entries) = std::fs::read_dir(&self.sysfs_net) else {
            return false;
        };
        entries.filter_map(|e| e.ok()).any(|entry| {
            if entry.file_name() == "lo" {
                return false;
            }
            std::fs::read_to_string(entry.path().join("operstate"))
                .map(|state| state.trim() == "up")
                .unwrap_or(false)
        })
    }

    async fn reboot_required(&self, applied: &[UpdateCandidate]) -> Result<Option<String>> {
        let reason = reboot_reason(applied);
        debug!("Reboot check over {} packages: {:?}", applied.len(), reason);
        Ok(reason)
    }

    async fn trigger_reboot(&self, command: &str) -> Result<()> {
        info!("Executing reboot command: {}", command);
        let status = Command::new("sh")
            .args(["-c", command])
            .status()
            .await
            .context("Failed to spawn reboot command")?;
        if !status.success() {
            bail!("reboot command exited with {}", status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn candidate(name: &str) -> UpdateCandidate {
        UpdateCandidate {
            name: name.to_string(),
            arch: "x86_64".to_string(),
            old_version: Some("1".to_string()),
            new_version: "2".to_string(),
            repo: "updates".to_string(),
            advisory: None,
            location: None,
            checksum: None,
        }
    }

    #[test]
    fn test_reboot_reason_for_kernel() {
        let reason = reboot_reason(&[candidate("bash"), candidate("kernel-core")]).unwrap();
        assert!(reason.contains("kernel-core"));
        assert!(!reason.contains("bash"));
        assert!(reboot_reason(&[candidate("bash")]).is_none());
    }

    #[tokio::test]
    async fn test_network_online_ignores_loopback() {
        let temp = TempDir::new().unwrap();
        for (iface, state) in [("lo", "unknown"), ("eth0", "down")] {
            fs::create_dir_all(temp.path().join(iface)).unwrap();
            fs::write(temp.path().join(iface).join("operstate"), state).unwrap();
        }
        let host = SystemHost::with_sysfs_net(temp.path());
        assert!(!host.network_online().await);

        fs::write(temp.path().join("eth0/operstate"), "up\n").unwrap();
        assert!(host.network_online().await);
    }

    #[tokio::test]
    async fn test_trigger_reboot_reports_failure() {
        let host = SystemHost::new();
        assert!(host.trigger_reboot("true").await.is_ok());
        assert!(host.trigger_reboot("exit 3").await.is_err());
    }
}
