//! `notify` — hand a message to the notification sink.

use ledgerclaw_core::traits::NotificationSink;
use ledgerclaw_core::{ActionConfig, ActionError, Event, Notification, Trigger};
use serde_json::Value;

pub async fn send_notification(
    sink: &dyn NotificationSink,
    trigger: &Trigger,
    event: &Event,
    config: &ActionConfig,
) -> Result<Value, ActionError> {
    let kind = config.str_param("type")?;
    let message = config.str_param("message")?;

    let mut notification = Notification::new(kind, message, &trigger.id);
    notification.event_id = Some(event.id.clone());
    sink.send(&notification).await?;

    Ok(serde_json::json!({ "type": kind, "delivered": true }))
}
