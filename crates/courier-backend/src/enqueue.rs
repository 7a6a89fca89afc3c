//! Task enqueuer (spec §4.J)
//!
//! For each inbound message/event: serialise a task envelope, RPUSH it
//! onto a per-contact list, then push a handle-contact-event wrapper
//! onto the fair per-org queue.

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::kv::KvClient;

pub const FAIR_QUEUE: &str = "tasks:realtime";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    HandleMsgEvent { msg_uuid: Uuid },
    HandleChannelEvent { event_uuid: Uuid },
}

#[derive(Debug, Clone, Serialize)]
struct TaskEnvelope {
    #[serde(rename = "type")]
    task_type: &'static str,
    task: TaskPayload,
    queued_on: chrono::DateTime<chrono::Utc>,
}

pub struct TaskEnqueuer<'a> {
    kv: &'a KvClient,
}

impl<'a> TaskEnqueuer<'a> {
    pub fn new(kv: &'a KvClient) -> Self {
        Self { kv }
    }

    pub async fn enqueue(&self, org_id: i64, contact_id: i64, payload: TaskPayload) -> Result<()> {
        let envelope = TaskEnvelope {
            task_type: "handle_contact_event",
            task: payload,
            queued_on: chrono::Utc::now(),
        };
        let serialized = serde_json::to_string(&envelope).map_err(|e| {
            crate::error::BackendError::Validation(format!("task envelope serialization: {e}"))
        })?;

        let contact_key = format!("c:{org_id}:{contact_id}");
        self.kv.rpush(&contact_key, &serialized).await?;
        self.kv
            .zadd_owned(FAIR_QUEUE, &org_id.to_string(), &contact_key)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_with_expected_shape() {
        let envelope = TaskEnvelope {
            task_type: "handle_contact_event",
            task: TaskPayload::HandleMsgEvent { msg_uuid: Uuid::nil() },
            queued_on: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "handle_contact_event");
        assert_eq!(json["task"]["type"], "handle_msg_event");
    }
}
