//! Liveness tracking for per-board arbiter services.
//!
//! Every board may have at most one live arbiter job. All steps for one
//! board, from discovery through launch, run under that board's own lock;
//! different boards proceed independently. Naive discovery without the lock
//! is known to double-launch arbiters under concurrent submissions.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use hwgrid::Map;

use crate::JobId;
use crate::config::{PluginConfig, ServiceDescriptor};
use crate::env;
use crate::error::SubmitError;
use crate::jobdesc::JobDescription;
use crate::scheduler::{JobRecord, JobSignal, JobState, RequeueOutcome, Scheduler};

/// A discovered or launched arbiter process backing one board.
#[derive(Debug, Clone)]
pub struct RunningArbiter {
    pub board_id: String,
    pub address: Option<String>,
    pub service: String,
    /// Relation to the scheduler's job record. Only ever trusted after a
    /// fresh re-resolution by id.
    pub backing_job: JobId,
    pub observed_start: SystemTime,
}

#[derive(Debug, Default)]
struct BoardSlot {
    running: Option<RunningArbiter>,
}

/// Result of an ensure-running request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum EnsureOutcome {
    Running {
        job: JobId,
        address: Option<String>,
    },
    /// The dependent job was requeued behind the arbiter job.
    Deferred { depends_on: JobId },
    /// The arbiter did not come up in time. This is a scheduling conflict,
    /// not a submission failure; the message goes into the job environment.
    GaveUp { message: String },
}

/// Process-wide arbiter tracking, keyed by board id.
#[derive(Default)]
pub struct ArbiterRegistry {
    slots: Mutex<Map<String, Arc<Mutex<BoardSlot>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ArbiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, board_id: &str) -> Arc<Mutex<BoardSlot>> {
        let mut slots = lock(&self.slots);
        slots.entry(board_id.to_string()).or_default().clone()
    }

    /// Make sure an arbiter for `board_id` is running, launching one if
    /// needed. `dependent` is the compute job waiting for the arbiter; when
    /// given, a pending arbiter defers it via dependency plus requeue.
    pub fn ensure_running(
        &self,
        scheduler: &dyn Scheduler,
        config: &PluginConfig,
        board_id: &str,
        dependent: Option<JobId>,
    ) -> crate::Result<EnsureOutcome> {
        let service = config
            .service_for_board(board_id)
            .ok_or_else(|| SubmitError::UnknownBoard(board_id.to_string()))?;
        let slot = self.slot(board_id);
        let mut slot = lock(&slot);

        match resolve_live(&mut slot, scheduler, config, board_id)? {
            Some((job, address, JobState::Running)) => {
                record(&mut slot, board_id, service, job, address);
                Ok(EnsureOutcome::Running { job, address: slot_address(&slot) })
            }
            Some((job, _, JobState::Pending)) => pending_arbiter(
                &mut slot, scheduler, config, service, board_id, dependent, job,
            ),
            Some((job, _, JobState::Other)) => {
                log::info!("Arbiter job {job} for board {board_id} has terminated");
                launch_arbiter(&mut slot, scheduler, config, service, board_id, dependent)
            }
            None => launch_arbiter(&mut slot, scheduler, config, service, board_id, dependent),
        }
    }

    /// Explicit launch path: rewrite `job` into the arbiter launch job for
    /// `board_id`, or refuse when one is already alive.
    pub fn prepare_launch(
        &self,
        scheduler: &dyn Scheduler,
        config: &PluginConfig,
        board_id: &str,
        job: &mut JobDescription,
    ) -> crate::Result<()> {
        let service = config
            .service_for_board(board_id)
            .ok_or_else(|| SubmitError::UnknownBoard(board_id.to_string()))?;
        let slot = self.slot(board_id);
        let mut slot = lock(&slot);

        if let Some((live, _, state)) = resolve_live(&mut slot, scheduler, config, board_id)? {
            if state != JobState::Other {
                return Err(SubmitError::Validation(format!(
                    "Arbiter for board {board_id} is already alive as job {live}, \
                     no launch job is needed"
                )));
            }
        }
        let launch = build_launch_description(config, service, board_id)?;
        job.name = launch.name;
        job.script = launch.script;
        job.env = launch.env;
        job.licenses = None;
        job.dependency = None;
        job.admin_comment = None;
        job.requeue = true;
        job.account = launch.account;
        job.partition = launch.partition;
        job.num_cpus = launch.num_cpus;
        job.memory_mb = launch.memory_mb;
        job.working_dir = launch.working_dir;
        Ok(())
    }
}

fn slot_address(slot: &BoardSlot) -> Option<String> {
    slot.running.as_ref().and_then(|r| r.address.clone())
}

fn record(
    slot: &mut BoardSlot,
    board_id: &str,
    service: &ServiceDescriptor,
    job: JobId,
    address: Option<String>,
) {
    slot.running = Some(RunningArbiter {
        board_id: board_id.to_string(),
        address,
        service: service.name.clone(),
        backing_job: job,
        observed_start: SystemTime::now(),
    });
}

/// Find the live arbiter candidate for a board: the recorded backing job if
/// any, otherwise a scan of the arbiter user's job list. The candidate's
/// state is always re-queried, never taken from a cached record.
fn resolve_live(
    slot: &mut BoardSlot,
    scheduler: &dyn Scheduler,
    config: &PluginConfig,
    board_id: &str,
) -> crate::Result<Option<(JobId, Option<String>, JobState)>> {
    let candidate = match slot.running.take() {
        Some(running) => Some((running.backing_job, running.address)),
        None => discover(scheduler, config, board_id)?
            .map(|record| (record.id, record.node_address)),
    };
    Ok(candidate.map(|(job, address)| {
        let state = probe(scheduler, job);
        (job, address, state)
    }))
}

fn discover(
    scheduler: &dyn Scheduler,
    config: &PluginConfig,
    board_id: &str,
) -> crate::Result<Option<JobRecord>> {
    let name = config.arbiter_job_name(board_id);
    let jobs = scheduler.list_jobs_owned_by(&config.arbiter_user)?;
    Ok(jobs
        .into_iter()
        .find(|job| job.name == name && job.state != JobState::Other))
}

/// Query the current state of a job, signalling it first. The signal resets
/// the arbiter's idle timeout, so a "running" answer cannot refer to a
/// process that self-terminates before the compute job's first request.
fn probe(scheduler: &dyn Scheduler, job: JobId) -> JobState {
    if let Err(e) = scheduler.signal_job(job, JobSignal::Continue) {
        log::debug!("Signalling job {job} failed: {e}");
    }
    match scheduler.query_job(job) {
        Ok(state) => state,
        Err(e) => {
            log::warn!("Querying job {job} failed: {e}");
            JobState::Other
        }
    }
}

fn pending_arbiter(
    slot: &mut BoardSlot,
    scheduler: &dyn Scheduler,
    config: &PluginConfig,
    service: &ServiceDescriptor,
    board_id: &str,
    dependent: Option<JobId>,
    arbiter: JobId,
) -> crate::Result<EnsureOutcome> {
    if let Some(dependent) = dependent {
        scheduler.update_dependency(dependent, &format!("after:{arbiter}"))?;
        match scheduler.requeue_job(dependent)? {
            RequeueOutcome::Requeued => {
                log::info!(
                    "Job {dependent} requeued behind pending arbiter {arbiter} for board {board_id}"
                );
                return Ok(EnsureOutcome::Deferred { depends_on: arbiter });
            }
            RequeueOutcome::NotEligible => {
                log::info!(
                    "Job {dependent} cannot be requeued, polling for arbiter {arbiter} instead"
                );
            }
        }
    } else {
        // A caller with no job to park gets one short grace probe first.
        let outcome = wait_for_arbiter(
            slot,
            scheduler,
            config,
            service,
            board_id,
            arbiter,
            config.timing.pending_wait(),
            1,
        )?;
        if matches!(outcome, EnsureOutcome::Running { .. }) {
            return Ok(outcome);
        }
    }
    wait_for_arbiter(
        slot,
        scheduler,
        config,
        service,
        board_id,
        arbiter,
        config.timing.requeue_wait_period(),
        config.timing.requeue_wait_periods,
    )
}

#[allow(clippy::too_many_arguments)]
fn wait_for_arbiter(
    slot: &mut BoardSlot,
    scheduler: &dyn Scheduler,
    config: &PluginConfig,
    service: &ServiceDescriptor,
    board_id: &str,
    arbiter: JobId,
    period: Duration,
    periods: u32,
) -> crate::Result<EnsureOutcome> {
    for _ in 0..periods {
        std::thread::sleep(period);
        if probe(scheduler, arbiter) == JobState::Running {
            let address = discover(scheduler, config, board_id)?
                .and_then(|record| record.node_address);
            record(slot, board_id, service, arbiter, address);
            return Ok(EnsureOutcome::Running {
                job: arbiter,
                address: slot_address(slot),
            });
        }
    }
    Ok(EnsureOutcome::GaveUp {
        message: format!("Arbiter for board {board_id} did not start in time"),
    })
}

fn launch_arbiter(
    slot: &mut BoardSlot,
    scheduler: &dyn Scheduler,
    config: &PluginConfig,
    service: &ServiceDescriptor,
    board_id: &str,
    dependent: Option<JobId>,
) -> crate::Result<EnsureOutcome> {
    let launch = build_launch_description(config, service, board_id)?;
    match scheduler.submit_job(&launch) {
        Ok(arbiter) => {
            log::info!("Launched arbiter for board {board_id} as job {arbiter}");
            std::thread::sleep(config.timing.launch_wait());
            match probe(scheduler, arbiter) {
                JobState::Running => {
                    let address = discover(scheduler, config, board_id)?
                        .and_then(|record| record.node_address);
                    record(slot, board_id, service, arbiter, address);
                    Ok(EnsureOutcome::Running {
                        job: arbiter,
                        address: slot_address(slot),
                    })
                }
                JobState::Pending => pending_arbiter(
                    slot, scheduler, config, service, board_id, dependent, arbiter,
                ),
                JobState::Other => wait_for_arbiter(
                    slot,
                    scheduler,
                    config,
                    service,
                    board_id,
                    arbiter,
                    config.timing.launch_poll_period(),
                    config.timing.launch_poll_periods,
                ),
            }
        }
        Err(e) => {
            // probably lost a submission race, look for the winner
            log::warn!(
                "Arbiter submission for board {board_id} failed ({e}), \
                 checking for a concurrent launch"
            );
            for _ in 0..config.timing.launch_poll_periods {
                std::thread::sleep(config.timing.launch_poll_period());
                if let Some(found) = discover(scheduler, config, board_id)? {
                    return match probe(scheduler, found.id) {
                        JobState::Running => {
                            record(slot, board_id, service, found.id, found.node_address);
                            Ok(EnsureOutcome::Running {
                                job: found.id,
                                address: slot_address(slot),
                            })
                        }
                        JobState::Pending => pending_arbiter(
                            slot, scheduler, config, service, board_id, dependent, found.id,
                        ),
                        JobState::Other => continue,
                    };
                }
            }
            Ok(EnsureOutcome::GaveUp {
                message: format!("Arbiter for board {board_id} could not be launched"),
            })
        }
    }
}

fn build_launch_description(
    config: &PluginConfig,
    service: &ServiceDescriptor,
    board_id: &str,
) -> crate::Result<JobDescription> {
    let script = std::fs::read_to_string(&service.script_path).map_err(|e| {
        SubmitError::GenericError(format!(
            "Cannot read arbiter script {}: {e}",
            service.script_path.display()
        ))
    })?;
    let mut job = JobDescription {
        name: config.arbiter_job_name(board_id),
        user: Some(config.arbiter_user.clone()),
        script: Some(script),
        requeue: true,
        account: Some(service.account.clone()),
        partition: Some(service.partition.clone()),
        num_cpus: Some(service.num_cpus),
        memory_mb: Some(service.memory_mb),
        working_dir: Some(config.working_dir.clone()),
        ..Default::default()
    };
    job.set_env(env::ARBITER_MAGIC, env::ARBITER_MAGIC_VALUE);
    job.set_env(env::ARBITER_BOARD, board_id);
    job.set_env(env::ARBITER_PORT, service.port.to_string());
    Ok(job)
}
