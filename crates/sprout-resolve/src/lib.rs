//! Binds raw spawn requests to service definitions and materializes the
//! space views they reference.

pub mod error;
pub mod mem;
pub mod resolver;
pub mod store;

pub use error::{ResolveError, StoreError, StoreResult};
pub use mem::{MemDefinitionStore, MemSpaceStore};
pub use resolver::{Resolved, Resolver};
pub use store::{
    DefinitionStore, DynDefinitionStore, DynSpaceStore, SpaceStore, ViewResolveRequest,
};
