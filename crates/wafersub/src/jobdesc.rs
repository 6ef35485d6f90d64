use std::path::PathBuf;

use hwgrid::Map;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// The mutable slice of a scheduler job record that this plugin is allowed
/// to touch.
///
/// `job_id` is `None` while the job only exists as a submission request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDescription {
    pub job_id: Option<JobId>,
    pub name: String,
    pub user: Option<String>,
    pub script: Option<String>,
    pub env: Map<String, String>,
    pub licenses: Option<String>,
    pub admin_comment: Option<String>,
    pub dependency: Option<String>,
    pub requeue: bool,
    pub account: Option<String>,
    pub partition: Option<String>,
    pub num_cpus: Option<u32>,
    pub memory_mb: Option<u64>,
    pub working_dir: Option<PathBuf>,
}

impl JobDescription {
    pub fn set_env(&mut self, name: &str, value: impl Into<String>) {
        self.env.insert(name.to_string(), value.into());
    }

    pub fn get_env(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(|v| v.as_str())
    }
}
