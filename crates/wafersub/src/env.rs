//! Environment variables written into job descriptions.

macro_rules! wafer_env {
    ($name: literal) => {
        concat!("WAFER_", $name)
    };
}

macro_rules! arbiter_env {
    ($name: literal) => {
        concat!("ARBITER_", $name)
    };
}

/// Resource payload consumed by the job prolog.
pub const WAFER_CHIPS: &str = wafer_env!("CHIPS");
pub const WAFER_READOUTS: &str = wafer_env!("READOUTS");
pub const WAFER_HARDWARE_LICENSES: &str = wafer_env!("HARDWARE_LICENSES");
pub const WAFER_NEIGHBOR_CHIPS: &str = wafer_env!("NEIGHBOR_CHIPS");
pub const WAFER_NEIGHBOR_LICENSES: &str = wafer_env!("NEIGHBOR_LICENSES");
pub const WAFER_CHIP_INIT: &str = wafer_env!("CHIP_INIT");
pub const WAFER_DEFECTS_PATH: &str = wafer_env!("DEFECTS_PATH");
pub const WAFER_POWERCYCLE: &str = wafer_env!("POWERCYCLE");

pub const CHIP_INIT_DEFAULT: &str = "DEFAULT";
pub const CHIP_INIT_SKIP: &str = "SKIP";
pub const CHIP_INIT_FORCE: &str = "FORCE";

/// Arbiter wiring for compute jobs and launch jobs.
pub const ARBITER_HOST: &str = arbiter_env!("HOST");
pub const ARBITER_PORT: &str = arbiter_env!("PORT");
pub const ARBITER_BOARD: &str = arbiter_env!("BOARD");
pub const ARBITER_JOB_ID: &str = arbiter_env!("JOB_ID");
pub const ARBITER_ERROR_MSG: &str = arbiter_env!("ERROR_MSG");

/// Marker recognized by the companion prolog/epilog hooks; the value is
/// checked verbatim, not just presence.
pub const ARBITER_MAGIC: &str = arbiter_env!("MANAGED");
pub const ARBITER_MAGIC_VALUE: &str = "UsesBoardArbiter";
