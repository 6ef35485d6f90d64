//! Slurm-backed implementation of the [`Scheduler`] trait, shelling out to
//! the usual command line tools.

use std::path::PathBuf;
use std::process::Command;

use hwgrid::Map;
use itertools::Itertools;

use crate::JobId;
use crate::error::SubmitError;
use crate::jobdesc::JobDescription;
use crate::scheduler::{JobRecord, JobSignal, JobState, RequeueOutcome, Scheduler};

#[derive(Debug, Default)]
pub struct SlurmClient {
    /// Where submit scripts are materialized when a job has no working
    /// directory of its own.
    pub script_dir: Option<PathBuf>,
}

impl SlurmClient {
    pub fn new(script_dir: Option<PathBuf>) -> Self {
        SlurmClient { script_dir }
    }
}

fn run_command(program: &str, args: &[&str]) -> crate::Result<String> {
    log::debug!("Running Slurm command `{program} {}`", args.iter().join(" "));
    let output = Command::new(program).args(args).output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SubmitError::Scheduler(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(stdout)
}

fn parse_submit_output(output: &str) -> crate::Result<JobId> {
    output
        .lines()
        .map(|l| l.trim())
        .find(|l| l.to_lowercase().starts_with("submitted batch job"))
        .and_then(|l| l.split(' ').nth(3))
        .and_then(|id| id.parse::<JobId>().ok())
        .ok_or_else(|| {
            SubmitError::Scheduler(format!("Missing job id in sbatch output\n{output}"))
        })
}

/// Parse `Key=Value` items from `scontrol show job` output.
fn scontrol_items(output: &str) -> Map<&str, &str> {
    output
        .split_whitespace()
        .filter_map(|item| item.split_once('='))
        .collect()
}

fn parse_job_state(state: &str) -> JobState {
    match state {
        "RUNNING" | "COMPLETING" => JobState::Running,
        "PENDING" | "CONFIGURING" => JobState::Pending,
        _ => JobState::Other,
    }
}

fn build_submit_args(job: &JobDescription, script_path: &str) -> Vec<String> {
    let mut args = vec![format!("--job-name={}", job.name)];
    if let Some(account) = &job.account {
        args.push(format!("--account={account}"));
    }
    if let Some(partition) = &job.partition {
        args.push(format!("--partition={partition}"));
    }
    if let Some(cpus) = job.num_cpus {
        args.push(format!("--cpus-per-task={cpus}"));
    }
    if let Some(memory) = job.memory_mb {
        args.push(format!("--mem={memory}M"));
    }
    if let Some(dir) = &job.working_dir {
        args.push(format!("--chdir={}", dir.display()));
    }
    if let Some(licenses) = &job.licenses {
        args.push(format!("--licenses={licenses}"));
    }
    if let Some(dependency) = &job.dependency {
        args.push(format!("--dependency={dependency}"));
    }
    if job.requeue {
        args.push("--requeue".to_string());
    }
    // launch jobs never inherit the submitter's environment
    let exported = job
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .sorted()
        .join(",");
    if exported.is_empty() {
        args.push("--export=NONE".to_string());
    } else {
        args.push(format!("--export=NONE,{exported}"));
    }
    args.push(script_path.to_string());
    args
}

impl Scheduler for SlurmClient {
    fn submit_job(&self, job: &JobDescription) -> crate::Result<JobId> {
        let script = job.script.as_deref().ok_or_else(|| {
            SubmitError::Validation(format!("Job {} has no script to submit", job.name))
        })?;
        let dir = job
            .working_dir
            .clone()
            .or_else(|| self.script_dir.clone())
            .unwrap_or_else(std::env::temp_dir);
        let script_path = dir.join(format!("{}.sh", job.name));
        std::fs::write(&script_path, script)?;

        let args = build_submit_args(job, &script_path.display().to_string());
        let args: Vec<&str> = args.iter().map(|a| a.as_str()).collect();
        let output = run_command("sbatch", &args)?;
        parse_submit_output(&output)
    }

    fn query_job(&self, id: JobId) -> crate::Result<JobState> {
        let output = run_command("scontrol", &["show", "job", &id.to_string()])?;
        let items = scontrol_items(&output);
        let state = items.get("JobState").ok_or_else(|| {
            SubmitError::Scheduler(format!("Missing JobState in scontrol output for job {id}"))
        })?;
        Ok(parse_job_state(state))
    }

    fn list_jobs_owned_by(&self, user: &str) -> crate::Result<Vec<JobRecord>> {
        let output = run_command(
            "squeue",
            &["--user", user, "--noheader", "--format=%A;%j;%T;%N"],
        )?;
        let mut records = Vec::new();
        for line in output.lines().map(|l| l.trim()).filter(|l| !l.is_empty()) {
            let mut fields = line.split(';');
            let (Some(id), Some(name), Some(state)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(SubmitError::Scheduler(format!(
                    "Malformed squeue line: {line}"
                )));
            };
            let id = id.parse::<JobId>().map_err(|_| {
                SubmitError::Scheduler(format!("Invalid job id in squeue line: {line}"))
            })?;
            let node = fields.next().filter(|n| !n.is_empty());
            records.push(JobRecord {
                id,
                name: name.to_string(),
                state: parse_job_state(state),
                node_address: node.map(|n| n.to_string()),
            });
        }
        Ok(records)
    }

    fn update_dependency(&self, id: JobId, dependency: &str) -> crate::Result<()> {
        run_command(
            "scontrol",
            &[
                "update",
                &format!("JobId={id}"),
                &format!("Dependency={dependency}"),
            ],
        )?;
        Ok(())
    }

    fn requeue_job(&self, id: JobId) -> crate::Result<RequeueOutcome> {
        match run_command("scontrol", &["requeue", &id.to_string()]) {
            Ok(_) => Ok(RequeueOutcome::Requeued),
            // Slurm refuses to requeue interactive submissions
            Err(SubmitError::Scheduler(message)) if message.contains("batch job") => {
                Ok(RequeueOutcome::NotEligible)
            }
            Err(e) => Err(e),
        }
    }

    fn signal_job(&self, id: JobId, signal: JobSignal) -> crate::Result<()> {
        let signal = match signal {
            JobSignal::Continue => "CONT",
        };
        run_command(
            "scancel",
            &[&format!("--signal={signal}"), &id.to_string()],
        )?;
        Ok(())
    }
}
