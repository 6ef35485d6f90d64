//! Submission-time entry points: apply parsed options onto a job description.

use std::path::Path;

use hwgrid::expand::{AllocFlags, ExpansionRequest, NeighborInit};
use hwgrid::{TomlCatalog, expand, licenses};
use itertools::Itertools;

use crate::arbiter::{ArbiterRegistry, EnsureOutcome};
use crate::config::PluginConfig;
use crate::env;
use crate::error::SubmitError;
use crate::jobdesc::JobDescription;
use crate::options::{ArbiterRequest, ChipInit, ResourceOptions, SubmitOptions};
use crate::scheduler::Scheduler;

/// Handle one job submission: expand hardware resources and/or run the
/// arbiter-ensure protocol, both mutating `job` in place.
pub fn process_submission(
    job: &mut JobDescription,
    options: &SubmitOptions,
    scheduler: &dyn Scheduler,
    registry: &ArbiterRegistry,
    config: &PluginConfig,
    default_catalog: &Path,
) -> crate::Result<()> {
    if let Some(resources) = &options.resources {
        apply_resource_request(job, resources, default_catalog)?;
    }
    match &options.arbiter {
        Some(ArbiterRequest::Compute(board_id)) => {
            prepare_compute_job(job, board_id, scheduler, registry, config)?;
        }
        Some(ArbiterRequest::Launch(board_id)) => {
            convert_to_launch_job(job, board_id, scheduler, registry, config)?;
        }
        None => {}
    }
    Ok(())
}

/// Expand the user's resource selectors and write licenses plus prolog
/// environment into the job.
pub fn apply_resource_request(
    job: &mut JobDescription,
    resources: &ResourceOptions,
    default_catalog: &Path,
) -> crate::Result<()> {
    if job.licenses.is_some() {
        return Err(SubmitError::Validation(
            "Hardware licenses are assigned automatically; \
             remove the manual license request"
                .to_string(),
        ));
    }
    if let Some(defects) = &resources.defects_path {
        if !defects.is_dir() {
            return Err(SubmitError::Validation(format!(
                "Defects path {} is not a directory",
                defects.display()
            )));
        }
    }

    let catalog_path = resources
        .catalog_path
        .as_deref()
        .unwrap_or(default_catalog);
    let catalog = TomlCatalog::from_file(catalog_path)?;
    let request = ExpansionRequest {
        modules: resources.modules.clone(),
        selectors: resources.selectors.clone(),
        flags: AllocFlags {
            skip_master_alloc: resources.skip_master_alloc,
            without_trigger: resources.without_trigger,
            neighbor_init: match resources.chip_init {
                ChipInit::Skip => NeighborInit::Skip,
                ChipInit::Force => NeighborInit::Force,
                ChipInit::Default => NeighborInit::Default,
            },
        },
    };
    let allocations = expand::expand(&catalog, &request)?;
    let payload = licenses::render(&allocations, resources.without_trigger);
    let merged = payload.merged_licenses();
    log::info!(
        "Job {} expanded to licenses: {merged}",
        job.job_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "<new>".to_string())
    );

    let chip_init = match resources.chip_init {
        ChipInit::Default => env::CHIP_INIT_DEFAULT,
        ChipInit::Skip => env::CHIP_INIT_SKIP,
        ChipInit::Force => env::CHIP_INIT_FORCE,
    };
    job.set_env(env::WAFER_CHIPS, payload.chips.clone());
    job.set_env(env::WAFER_READOUTS, payload.readouts.clone());
    job.set_env(env::WAFER_NEIGHBOR_CHIPS, payload.neighbor_chips.clone());
    job.set_env(
        env::WAFER_NEIGHBOR_LICENSES,
        payload.neighbor_licenses.clone(),
    );
    job.set_env(env::WAFER_HARDWARE_LICENSES, merged.clone());
    job.set_env(env::WAFER_CHIP_INIT, chip_init);
    if let Some(defects) = &resources.defects_path {
        job.set_env(env::WAFER_DEFECTS_PATH, defects.display().to_string());
    }
    if resources.powercycle {
        job.set_env(env::WAFER_POWERCYCLE, "1");
    }
    job.licenses = Some(merged);

    // mirror of the prolog-relevant payload, visible to operators
    job.admin_comment = Some(
        [
            (env::WAFER_CHIPS, payload.chips.as_str()),
            (env::WAFER_READOUTS, payload.readouts.as_str()),
            (env::WAFER_NEIGHBOR_CHIPS, payload.neighbor_chips.as_str()),
            (
                env::WAFER_NEIGHBOR_LICENSES,
                payload.neighbor_licenses.as_str(),
            ),
            (env::WAFER_CHIP_INIT, chip_init),
        ]
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .join(";"),
    );
    Ok(())
}

/// Wire a compute job up to the arbiter mediating its board, making sure
/// the arbiter is alive first.
pub fn prepare_compute_job(
    job: &mut JobDescription,
    board_id: &str,
    scheduler: &dyn Scheduler,
    registry: &ArbiterRegistry,
    config: &PluginConfig,
) -> crate::Result<()> {
    job.set_env(env::ARBITER_MAGIC, env::ARBITER_MAGIC_VALUE);
    job.set_env(env::ARBITER_BOARD, board_id);
    job.requeue = true;

    match registry.ensure_running(scheduler, config, board_id, job.job_id)? {
        EnsureOutcome::Running { job: arbiter, address } => {
            let service = config
                .service_for_board(board_id)
                .ok_or_else(|| SubmitError::UnknownBoard(board_id.to_string()))?;
            job.set_env(env::ARBITER_JOB_ID, arbiter.to_string());
            job.set_env(env::ARBITER_PORT, service.port.to_string());
            if let Some(address) = address {
                job.set_env(env::ARBITER_HOST, address);
            }
        }
        EnsureOutcome::Deferred { depends_on } => {
            job.dependency = Some(format!("after:{depends_on}"));
        }
        EnsureOutcome::GaveUp { message } => {
            log::warn!("Arbiter-ensure for board {board_id} gave up: {message}");
            job.set_env(env::ARBITER_ERROR_MSG, message);
        }
    }
    Ok(())
}

/// Turn the submitted job itself into the arbiter launch job for a board.
pub fn convert_to_launch_job(
    job: &mut JobDescription,
    board_id: &str,
    scheduler: &dyn Scheduler,
    registry: &ArbiterRegistry,
    config: &PluginConfig,
) -> crate::Result<()> {
    registry.prepare_launch(scheduler, config, board_id, job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::tests::{MockScheduler, test_config, write_script};
    use crate::options::RESOURCE_PREFIX;
    use std::path::PathBuf;

    const CATALOG: &str = r#"
[[module]]
id = 20
aggregators = [0]

[[module.board]]
id = 0
readout0 = "B200001"

[[module.board]]
id = 5
readout0 = "B200002"
readout1 = "B200003"
"#;

    fn write_catalog(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("catalog.toml");
        std::fs::write(&path, CATALOG).unwrap();
        path
    }

    fn parse_resources(vars: Vec<(&str, &str)>) -> ResourceOptions {
        let vars: Vec<(String, String)> = vars
            .into_iter()
            .map(|(name, args)| (format!("{RESOURCE_PREFIX}{name}"), args.to_string()))
            .collect();
        SubmitOptions::parse(vars).unwrap().resources.unwrap()
    }

    #[test]
    fn manual_license_requests_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = write_catalog(&dir);
        let mut job = JobDescription {
            licenses: Some("W20B0".to_string()),
            ..Default::default()
        };
        let resources = parse_resources(vec![("module", "20")]);
        let result = apply_resource_request(&mut job, &resources, &catalog);
        assert!(matches!(result, Err(SubmitError::Validation(_))));
    }

    #[test]
    fn missing_defects_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = write_catalog(&dir);
        let mut job = JobDescription::default();
        let resources = parse_resources(vec![
            ("module", "20"),
            ("defects_path", "/nonexistent/defects"),
        ]);
        let result = apply_resource_request(&mut job, &resources, &catalog);
        assert!(matches!(result, Err(SubmitError::Validation(_))));
    }

    #[test]
    fn whole_module_request_fills_licenses_and_environment() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = write_catalog(&dir);
        let mut job = JobDescription::default();
        let resources = parse_resources(vec![("module", "20")]);
        apply_resource_request(&mut job, &resources, &catalog).unwrap();

        let licenses = job.licenses.as_deref().unwrap();
        assert!(licenses.contains("W20B0"));
        assert!(licenses.contains("W20B5"));
        assert!(licenses.contains("W20B12"), "master board: {licenses}");
        assert!(licenses.contains("B200003"));
        assert_eq!(
            job.get_env(env::WAFER_READOUTS),
            Some("B200001,B200002,B200003")
        );
        assert_eq!(job.get_env(env::WAFER_CHIP_INIT), Some("DEFAULT"));
        assert_eq!(job.get_env(env::WAFER_HARDWARE_LICENSES), Some(licenses));
        assert!(job.get_env(env::WAFER_POWERCYCLE).is_none());
        assert!(
            job.admin_comment
                .as_deref()
                .unwrap()
                .contains("WAFER_READOUTS=B200001,B200002,B200003")
        );
    }

    #[test]
    fn chip_selector_request_exposes_the_board_payload() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = write_catalog(&dir);
        let mut job = JobDescription::default();
        let resources = parse_resources(vec![
            ("module", "20"),
            ("chip", "40:0"),
            ("skip_chip_init", "(null)"),
        ]);
        apply_resource_request(&mut job, &resources, &catalog).unwrap();

        let chips = job.get_env(env::WAFER_CHIPS).unwrap();
        for chip in 40..48 {
            assert!(chips.contains(&format!("W20C{chip}")));
        }
        assert_eq!(job.get_env(env::WAFER_READOUTS), Some("B200002"));
        assert_eq!(job.get_env(env::WAFER_CHIP_INIT), Some("SKIP"));
        // skipping chip init also skips neighbor reservations
        assert_eq!(job.get_env(env::WAFER_NEIGHBOR_CHIPS), Some(""));
    }

    #[test]
    fn compute_job_is_wired_to_a_running_arbiter() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&write_script(&dir));
        let scheduler = MockScheduler::default().with_job(
            10,
            "arbiter_B201330",
            crate::scheduler::JobState::Running,
        );
        let registry = ArbiterRegistry::new();
        let mut job = JobDescription::default();

        prepare_compute_job(&mut job, "B201330", &scheduler, &registry, &config).unwrap();
        assert_eq!(
            job.get_env(env::ARBITER_MAGIC),
            Some(env::ARBITER_MAGIC_VALUE)
        );
        assert_eq!(job.get_env(env::ARBITER_BOARD), Some("B201330"));
        assert_eq!(job.get_env(env::ARBITER_JOB_ID), Some("10"));
        assert_eq!(job.get_env(env::ARBITER_PORT), Some("5666"));
        assert_eq!(job.get_env(env::ARBITER_HOST), Some("node07"));
        assert!(job.requeue);
    }

    #[test]
    fn exhausted_wait_injects_the_error_message_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&write_script(&dir));
        let scheduler = MockScheduler::default()
            .with_job(10, "arbiter_B201330", crate::scheduler::JobState::Pending)
            .requeue(crate::scheduler::RequeueOutcome::NotEligible);
        let registry = ArbiterRegistry::new();
        let mut job = JobDescription {
            job_id: Some(crate::JobId::new(500)),
            ..Default::default()
        };

        prepare_compute_job(&mut job, "B201330", &scheduler, &registry, &config).unwrap();
        assert!(job.get_env(env::ARBITER_ERROR_MSG).is_some());
        assert!(job.get_env(env::ARBITER_JOB_ID).is_none());
    }
}
