pub mod allocation;
pub mod catalog;
pub mod error;
pub mod expand;
pub mod ids;
pub mod licenses;
#[macro_use]
pub mod macros;
pub mod topology;

pub type Error = crate::error::AllocError;
pub type Result<T> = std::result::Result<T, Error>;

/// Hash map/set with the fx hasher, used throughout the workspace.
pub type Map<K, V> = hashbrown::HashMap<K, V, fxhash::FxBuildHasher>;
pub type Set<T> = hashbrown::HashSet<T, fxhash::FxBuildHasher>;

pub use allocation::ModuleAllocation;
pub use catalog::{Catalog, ReadoutSlot, TomlCatalog};
pub use expand::{AllocFlags, AoutMode, ExpansionRequest, NeighborInit, Selector};
pub use ids::{AggregatorId, BoardId, ChipId, ModuleId, ReticleId, TriggerId};
pub use licenses::{LicensePayload, render};
