//! Viewspec language for sprout: the data model shared by every crate plus the
//! parser and canonical formatter that map a compact spec string such as
//! `chat[data=scratch;gpu=2a100]/index.html` onto a [`SpawnRequest`].

pub mod error;
pub mod model;
pub mod view_ref;
pub mod viewspec;

pub use error::ParseError;
pub use model::{
    DEFAULT_PARAMETER, ParameterRequest, ParameterSchema, ParameterType, ParameterValue,
    ResolvedParameter, Resource, ResourceDirDef, ServiceDefinition, SpaceView, SpawnRequest,
    SpawnResolution, SpawnResponse, SpawnTemplate, TemplateMount,
};
pub use view_ref::{SCRATCH, SpaceViewRequest};
pub use viewspec::parse_spawn_request;
