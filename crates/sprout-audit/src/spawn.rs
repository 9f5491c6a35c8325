use std::collections::BTreeMap;

use sprout_spec::view_ref::space_id_of;
use sprout_spec::{SpawnRequest, SpawnResolution, SpawnResponse};
use tracing::debug;
use uuid::Uuid;

use crate::records::{
    ActivityRecord, AuditRecord, CollectionMembershipRecord, EventRecord, SpaceRecord, now_ns,
};
use crate::sink::{AuditError, AuditSink};

const SYSTEM_OWNER: &str = "system";
const SPAWN_COLLECTION: &str = "spawn";
const SPAWN_EVENT: &str = "spawn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSpawn {
    pub event_id: String,
    pub created_spaces: Vec<String>,
}

/// Write the audit trail for one spawn.
///
/// Rows go out in order: memberships, the spawn event, created spaces, then
/// the activity (skipped for ephemeral requests). The first sink failure is
/// returned and nothing after it is written.
pub async fn record_spawn(
    sink: &dyn AuditSink,
    request: &SpawnRequest,
    resolution: &SpawnResolution,
    response: &SpawnResponse,
) -> Result<RecordedSpawn, AuditError> {
    let now = now_ns();
    let service = resolution.service_name.clone();
    let mut spaces = Vec::new();

    for (_, _, view) in resolution.space_views() {
        let space_id = view.space_id().to_string();
        if view.created {
            let forked_from_id = view.base.as_deref().map(|base| space_id_of(base).to_string());
            spaces.push(SpaceRecord {
                owner: request.user.clone(),
                alias: space_id.clone(),
                id: space_id.clone(),
                created_at_ns: now,
                forked_from_ref: view.base.clone(),
                forked_from_id,
            });
        }
        sink.append(AuditRecord::CollectionMembership(CollectionMembershipRecord {
            owner: SYSTEM_OWNER.into(),
            name: SPAWN_COLLECTION.into(),
            space_id,
            service_spec: service.clone(),
            created_at_ns: now,
            is_public: true,
            attributes: BTreeMap::new(),
        }))
        .await?;
    }

    let event_id = format!("ev-{}", Uuid::new_v4().simple());
    let (request_spec, _) = request.format();
    sink.append(AuditRecord::Event(EventRecord {
        id: event_id.clone(),
        kind: SPAWN_EVENT.into(),
        timestamp_ns: now,
        spec: request_spec,
        user: request.user.clone(),
        service: service.clone(),
        response: Some(response.clone()),
    }))
    .await?;

    let created_spaces = spaces.iter().map(|s| s.id.clone()).collect();
    for space in spaces {
        sink.append(AuditRecord::Space(space)).await?;
    }

    if !request.ephemeral {
        let (spec, _) = resolution.format();
        sink.append(AuditRecord::Activity(ActivityRecord {
            spec,
            created_at_ns: now,
            service,
        }))
        .await?;
    }

    debug!(event = %event_id, instance = %response.name, "recorded spawn");
    Ok(RecordedSpawn {
        event_id,
        created_spaces,
    })
}
