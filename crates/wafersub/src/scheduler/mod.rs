//! Abstraction over the host scheduler's job API.

pub mod slurm;

pub use slurm::SlurmClient;

use crate::JobId;
use crate::jobdesc::JobDescription;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JobState {
    Running,
    Pending,
    /// Completed, failed, cancelled or unknown; for liveness decisions all
    /// of these mean "needs (re)launch".
    Other,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequeueOutcome {
    Requeued,
    /// The job's submission mode cannot be requeued.
    NotEligible,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JobSignal {
    Continue,
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    /// Address of the node the job runs on; `None` while pending.
    pub node_address: Option<String>,
}

pub trait Scheduler {
    fn submit_job(&self, job: &JobDescription) -> crate::Result<JobId>;
    fn query_job(&self, id: JobId) -> crate::Result<JobState>;
    fn list_jobs_owned_by(&self, user: &str) -> crate::Result<Vec<JobRecord>>;
    fn update_dependency(&self, id: JobId, dependency: &str) -> crate::Result<()>;
    fn requeue_job(&self, id: JobId) -> crate::Result<RequeueOutcome>;
    fn signal_job(&self, id: JobId, signal: JobSignal) -> crate::Result<()>;
}
