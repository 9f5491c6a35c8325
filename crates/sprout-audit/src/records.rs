use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sprout_spec::SpawnResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Space,
    Activity,
    Event,
    CollectionMembership,
}

/// One row for the audit store. The tag keeps the file format self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_kind", rename_all = "snake_case")]
pub enum AuditRecord {
    Space(SpaceRecord),
    Activity(ActivityRecord),
    Event(EventRecord),
    CollectionMembership(CollectionMembershipRecord),
}

impl AuditRecord {
    pub fn kind(&self) -> AuditKind {
        match self {
            AuditRecord::Space(_) => AuditKind::Space,
            AuditRecord::Activity(_) => AuditKind::Activity,
            AuditRecord::Event(_) => AuditKind::Event,
            AuditRecord::CollectionMembership(_) => AuditKind::CollectionMembership,
        }
    }
}

/// A space created while resolving a spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceRecord {
    pub owner: String,
    pub alias: String,
    pub id: String,
    pub created_at_ns: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Canonical viewspec of the resolution.
    pub spec: String,
    pub created_at_ns: u64,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub kind: String,
    pub timestamp_ns: u64,
    /// Canonical viewspec of the request as the caller wrote it.
    pub spec: String,
    pub user: String,
    pub service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<SpawnResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMembershipRecord {
    pub owner: String,
    pub name: String,
    pub space_id: String,
    pub service_spec: String,
    pub created_at_ns: u64,
    pub is_public: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(saturating_ns)
        .unwrap_or(0)
}

/// Nanoseconds in `d`, pinned at `u64::MAX` past the year 2554.
fn saturating_ns(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_carry_their_kind_tag() {
        let record = AuditRecord::Activity(ActivityRecord {
            spec: "chat[data=sp-1]".into(),
            created_at_ns: 7,
            service: "chat".into(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record_kind"], "activity");
        assert_eq!(json["spec"], "chat[data=sp-1]");

        let back: AuditRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), AuditKind::Activity);
        assert_eq!(back, record);
    }

    #[test]
    fn timestamps_saturate_instead_of_wrapping() {
        assert_eq!(saturating_ns(Duration::from_nanos(42)), 42);
        assert_eq!(saturating_ns(Duration::from_secs(u64::MAX)), u64::MAX);
        assert!(now_ns() > 0);
    }
}
