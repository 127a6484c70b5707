use crate::error::EngineError;
use crate::event::{InstanceId, WorkflowEvent};
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

/// Default bounded wait for `require_event`.
pub const DEFAULT_REQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared broadcast bus carrying instance-scoped workflow events.
///
/// The bus is append-only: every subscriber observes every event and filters
/// by (event type, instance id) itself. Instances on the same bus interleave
/// freely; scoping keeps them isolated.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Events without an instance id are dropped with a
    /// log line rather than an error, so handlers may fire-and-forget
    /// notifications outside any workflow run.
    pub fn publish(&self, event: WorkflowEvent) {
        if event.instance_id.is_none() {
            tracing::info!(
                event_type = %event.event_type,
                "event published outside of a workflow instance, ignoring"
            );
            return;
        }
        // Send fails only when no subscriber exists, which is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Block-wait for the next event of `event_type` scoped to `instance_id`,
    /// racing the wait against a timer.
    pub async fn require_event(
        &self,
        event_type: &str,
        instance_id: InstanceId,
        wait: Duration,
    ) -> Result<WorkflowEvent, EngineError> {
        let mut rx = self.subscribe();
        let matched = async {
            loop {
                match rx.recv().await {
                    Ok(event)
                        if event.event_type == event_type
                            && event.instance_id == Some(instance_id) =>
                    {
                        return Ok(event);
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "require_event lagged behind the bus");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(EngineError::Transient("event bus closed".to_string()));
                    }
                }
            }
        };

        match timeout(wait, matched).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout(format!("event {}", event_type))),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn delivers_scoped_events_to_subscribers() {
        let bus = EventBus::default();
        let instance = InstanceId::new_v4();
        let mut rx = bus.subscribe();

        bus.publish(WorkflowEvent::new("A", json!({"n": 1})).scoped(instance));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "A");
        assert_eq!(event.instance_id, Some(instance));
    }

    #[tokio::test]
    async fn unscoped_publish_is_a_no_op() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(WorkflowEvent::new("A", json!(null)));
        bus.publish(WorkflowEvent::new("B", json!(null)).scoped(InstanceId::new_v4()));

        // Only the scoped event arrives.
        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "B");
    }

    #[tokio::test]
    async fn require_event_filters_by_instance() {
        let bus = EventBus::default();
        let ours = InstanceId::new_v4();
        let theirs = InstanceId::new_v4();

        let wait = bus.require_event("REPLY", ours, Duration::from_secs(1));
        bus.publish(WorkflowEvent::new("REPLY", json!({"from": "other"})).scoped(theirs));
        bus.publish(WorkflowEvent::new("REPLY", json!({"from": "ours"})).scoped(ours));

        let event = wait.await.unwrap();
        assert_eq!(event.data["from"], "ours");
    }

    #[tokio::test]
    async fn require_event_times_out() {
        let bus = EventBus::default();
        let err = bus
            .require_event("NEVER", InstanceId::new_v4(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Timeout);
    }
}
