//! Plugin configuration, loaded once from a TOML file at plugin init.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::SubmitError;

/// Static launch profile of one arbiter service.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub script_path: PathBuf,
    pub account: String,
    pub partition: String,
    pub port: u16,
    #[serde(default = "default_num_cpus")]
    pub num_cpus: u32,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    /// Boards this service is willing to mediate.
    pub board_ids: Vec<String>,
}

fn default_num_cpus() -> u32 {
    8
}

fn default_memory_mb() -> u64 {
    12_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub launch_wait_secs: u64,
    pub pending_wait_secs: u64,
    pub requeue_wait_period_secs: u64,
    pub requeue_wait_periods: u32,
    pub launch_poll_period_secs: u64,
    pub launch_poll_periods: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            launch_wait_secs: 3,
            pending_wait_secs: 5,
            requeue_wait_period_secs: 10,
            requeue_wait_periods: 10,
            launch_poll_period_secs: 1,
            launch_poll_periods: 10,
        }
    }
}

impl TimingConfig {
    pub fn launch_wait(&self) -> Duration {
        Duration::from_secs(self.launch_wait_secs)
    }

    pub fn pending_wait(&self) -> Duration {
        Duration::from_secs(self.pending_wait_secs)
    }

    pub fn requeue_wait_period(&self) -> Duration {
        Duration::from_secs(self.requeue_wait_period_secs)
    }

    pub fn launch_poll_period(&self) -> Duration {
        Duration::from_secs(self.launch_poll_period_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Arbiter job names are `<prefix><board_id>`.
    #[serde(default = "default_jobname_prefix")]
    pub jobname_prefix: String,
    /// User account that owns all arbiter jobs.
    pub arbiter_user: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_jobname_prefix() -> String {
    "arbiter_".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

impl PluginConfig {
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            SubmitError::GenericError(format!("Cannot read config {}: {e}", path.display()))
        })?;
        Self::from_str(&data)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> crate::Result<Self> {
        let config: PluginConfig = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        let mut seen: Vec<&str> = Vec::new();
        for service in &self.services {
            for board in &service.board_ids {
                if seen.contains(&board.as_str()) {
                    return Err(SubmitError::Validation(format!(
                        "Board {board} is claimed by more than one service"
                    )));
                }
                seen.push(board);
            }
        }
        Ok(())
    }

    pub fn service_for_board(&self, board_id: &str) -> Option<&ServiceDescriptor> {
        self.services
            .iter()
            .find(|service| service.board_ids.iter().any(|b| b == board_id))
    }

    pub fn arbiter_job_name(&self, board_id: &str) -> String {
        format!("{}{}", self.jobname_prefix, board_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const CONFIG: &str = r#"
arbiter_user = "arbiter"
jobname_prefix = "arbiter_"

[[service]]
name = "quiggeldy"
script_path = "/opt/arbiter/launch.sh"
account = "hwops"
partition = "services"
port = 5666
board_ids = ["B201330", "B201331"]

[timing]
launch_wait_secs = 2
"#;

    #[test]
    fn parse_config_with_defaults() {
        let config = PluginConfig::from_str(CONFIG).unwrap();
        assert_eq!(config.arbiter_user, "arbiter");
        assert_eq!(config.working_dir, PathBuf::from("/tmp"));
        let service = &config.services[0];
        assert_eq!(service.num_cpus, 8);
        assert_eq!(service.memory_mb, 12_000);
        assert_eq!(config.timing.launch_wait_secs, 2);
        assert_eq!(config.timing.requeue_wait_periods, 10);
    }

    #[test]
    fn board_lookup() {
        let config = PluginConfig::from_str(CONFIG).unwrap();
        assert_eq!(
            config.service_for_board("B201331").map(|s| s.name.as_str()),
            Some("quiggeldy")
        );
        assert!(config.service_for_board("B999999").is_none());
        assert_eq!(config.arbiter_job_name("B201330"), "arbiter_B201330");
    }

    #[test]
    fn duplicate_board_claims_are_rejected() {
        let bad = r#"
arbiter_user = "arbiter"

[[service]]
name = "a"
script_path = "/a.sh"
account = "x"
partition = "p"
port = 1
board_ids = ["B1"]

[[service]]
name = "b"
script_path = "/b.sh"
account = "x"
partition = "p"
port = 2
board_ids = ["B1"]
"#;
        assert!(matches!(
            PluginConfig::from_str(bad),
            Err(SubmitError::Validation(_))
        ));
    }
}
