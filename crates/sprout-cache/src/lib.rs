//! At most one live backend per fixed spawn request, shared by every caller
//! and torn down when it dies or its definition drifts.

pub mod error;
pub mod registry;
pub mod single;
pub mod spawner;

pub use error::{CacheError, SpawnerError};
pub use registry::InstanceRegistry;
pub use single::{Cleanup, Ensured, SingleInstanceCache};
pub use spawner::{DynSpawner, Provisioner, Spawner, pinned_request};
