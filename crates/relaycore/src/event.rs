use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type InstanceId = Uuid;

/// Reserved event type that seeds a workflow run; its data is the run input.
pub const WORKFLOW_START: &str = "WORKFLOW_START";

/// Reserved terminal event type; its data is the run output.
pub const WORKFLOW_STOP: &str = "WORKFLOW_STOP";

/// A typed message carrying data, the unit of progress in the interpreter.
///
/// Events published on the shared bus carry the id of the workflow instance
/// they belong to. Events returned from step handlers carry no instance id;
/// the runtime scopes them before republishing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            instance_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn start(input: Value) -> Self {
        Self::new(WORKFLOW_START, input)
    }

    pub fn stop(output: Value) -> Self {
        Self::new(WORKFLOW_STOP, output)
    }

    pub fn scoped(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    pub fn is_stop(&self) -> bool {
        self.event_type == WORKFLOW_STOP
    }

    /// Truncated rendering of the event data, for error messages and logs.
    pub fn data_snapshot(&self, max_len: usize) -> String {
        let mut rendered = self.data.to_string();
        if rendered.len() > max_len {
            let mut end = max_len;
            while end > 0 && !rendered.is_char_boundary(end) {
                end -= 1;
            }
            rendered.truncate(end);
            rendered.push_str("...");
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoping_attaches_instance_id() {
        let instance = InstanceId::new_v4();
        let event = WorkflowEvent::start(json!({"x": 1})).scoped(instance);
        assert_eq!(event.instance_id, Some(instance));
        assert_eq!(event.event_type, WORKFLOW_START);
    }

    #[test]
    fn snapshot_truncates_long_data() {
        let event = WorkflowEvent::new("A", json!({"blob": "y".repeat(500)}));
        let snapshot = event.data_snapshot(200);
        assert!(snapshot.len() <= 203);
        assert!(snapshot.ends_with("..."));
    }

    #[test]
    fn stop_event_is_terminal() {
        assert!(WorkflowEvent::stop(json!(null)).is_stop());
        assert!(!WorkflowEvent::start(json!(null)).is_stop());
    }
}
