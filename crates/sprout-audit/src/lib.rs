//! Durable record of spawns: which spaces were touched or created, the spawn
//! event itself, and the activity it started.

pub mod fs;
pub mod mem;
pub mod records;
pub mod sink;
pub mod spawn;

pub use fs::FsAuditSink;
pub use mem::MemAuditSink;
pub use records::{
    ActivityRecord, AuditKind, AuditRecord, CollectionMembershipRecord, EventRecord, SpaceRecord,
};
pub use sink::{AuditError, AuditSink, DynAuditSink};
pub use spawn::{RecordedSpawn, record_spawn};
