//! Relational change notifications → propagation jobs.

use std::sync::Arc;

use tokio::sync::broadcast;

use gridsync_core::{ChangeNotice, Notification, NotificationStream, RelationalStore};

use crate::error::SyncError;
use crate::producer::SyncProducer;

/// Decode a notification payload. Empty and malformed payloads are logged
/// and yield `None`; they never become jobs.
pub fn parse_notification(notification: &Notification) -> Option<ChangeNotice> {
    let payload = notification.payload.trim();
    if payload.is_empty() {
        tracing::error!(channel = %notification.channel, "received empty payload");
        return None;
    }
    match serde_json::from_str::<ChangeNotice>(payload) {
        Ok(notice) => {
            tracing::debug!(channel = %notification.channel, id = ?notice.id, "data change detected");
            Some(notice)
        }
        Err(e) => {
            tracing::error!(
                channel = %notification.channel,
                error = %e,
                payload = %notification.payload,
                "could not parse notification payload"
            );
            None
        }
    }
}

/// Owns the subscription to one notification channel.
pub struct NotificationListener {
    channel: String,
    stream: NotificationStream,
    producer: SyncProducer,
}

impl NotificationListener {
    /// Subscribe to `channel`. Failure here is a startup error.
    pub async fn subscribe(
        store: Arc<dyn RelationalStore>,
        channel: &str,
        producer: SyncProducer,
    ) -> Result<Self, SyncError> {
        let stream = store.listen(channel).await?;
        tracing::info!(channel, "listening for relational notifications");
        Ok(Self {
            channel: channel.to_owned(),
            stream,
            producer,
        })
    }

    /// Forward notifications until shutdown or until the store drops the
    /// subscription.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                received = self.stream.recv() => match received {
                    Some(notification) => handle_notification(&self.producer, &notification).await,
                    None => {
                        tracing::warn!(channel = %self.channel, "notification stream closed");
                        break;
                    }
                },
            }
        }
        tracing::info!(channel = %self.channel, "listener stopped");
    }
}

/// Fire-and-forget: producer errors are logged, never returned.
pub async fn handle_notification(producer: &SyncProducer, notification: &Notification) {
    let Some(notice) = parse_notification(notification) else {
        return;
    };
    if let Err(e) = producer.produce_relational_to_grid(notice).await {
        tracing::error!(channel = %notification.channel, error = %e, "could not queue propagation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_core::{Operation, RecordId};
    use rstest::rstest;

    fn note(payload: &str) -> Notification {
        Notification {
            channel: "user_change".into(),
            payload: payload.into(),
        }
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("not json")]
    #[case("[1, 2]")]
    #[case(r#"{"id": "seven"}"#)]
    fn bad_payloads_are_dropped(#[case] payload: &str) {
        assert!(parse_notification(&note(payload)).is_none());
    }

    #[test]
    fn parses_trigger_payload() {
        let notice = parse_notification(&note(
            r#"{"operation":"DELETE","id":4,"name":"Bo","age":null,"city":"LA"}"#,
        ))
        .expect("valid payload");
        assert_eq!(notice.operation, Some(Operation::Delete));
        assert_eq!(notice.id, Some(RecordId(4)));
        assert_eq!(notice.age, None);
    }

    #[test]
    fn unknown_operation_is_kept_for_the_worker() {
        let notice = parse_notification(&note(r#"{"operation":"TRUNCATE","id":1}"#)).unwrap();
        assert_eq!(notice.resolved_operation(), Operation::Unknown);
    }
}
