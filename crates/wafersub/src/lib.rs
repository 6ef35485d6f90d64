pub mod arbiter;
pub mod config;
pub mod env;
pub mod error;
pub mod jobdesc;
pub mod options;
pub mod scheduler;
pub mod submit;

pub type Error = crate::error::SubmitError;
pub type Result<T> = std::result::Result<T, Error>;

// ID types
use hwgrid::define_id_type;

define_id_type!(JobId, u64);
