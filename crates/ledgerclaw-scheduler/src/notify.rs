//! Notification router — routes trigger notifications to the matching channel.
//! Lightweight: no queues, no Redis. Just pick a channel and send.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use ledgerclaw_core::traits::NotificationSink;
use ledgerclaw_core::{ActionError, NotifyConfig, Notification};

use crate::dispatch::{self, NotifyTarget};

/// Notifications kept in memory.
const HISTORY_LIMIT: usize = 100;

/// Notification router — a `NotificationSink` over the configured targets.
pub struct NotifyRouter {
    targets: Vec<NotifyTarget>,
    /// Notification history (in-memory ring buffer, max 100).
    history: Mutex<VecDeque<Notification>>,
    client: reqwest::Client,
}

impl NotifyRouter {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            client: reqwest::Client::new(),
        }
    }

    /// Router with every target configured under `[notify]`.
    pub fn from_config(config: &NotifyConfig) -> Self {
        let mut router = Self::new();
        for target in dispatch::targets_from_config(config) {
            router.register_target(target);
        }
        router
    }

    /// Register a target. A later target with the same name replaces the earlier one.
    pub fn register_target(&mut self, target: NotifyTarget) {
        self.targets.retain(|t| t.name() != target.name());
        tracing::debug!("📡 Notification target registered: {}", target.name());
        self.targets.push(target);
    }

    /// Names of the registered targets.
    pub fn target_names(&self) -> Vec<&'static str> {
        self.targets.iter().map(NotifyTarget::name).collect()
    }

    /// Record a notification in history.
    pub fn record(&self, notification: Notification) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(notification);
    }

    /// Snapshot of the notification history, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    fn target_for(&self, kind: &str) -> Option<&NotifyTarget> {
        let kind = kind.to_ascii_lowercase();
        self.targets.iter().find(|t| t.name() == kind)
    }
}

impl Default for NotifyRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for NotifyRouter {
    async fn send(&self, notification: &Notification) -> Result<(), ActionError> {
        self.record(notification.clone());

        match self.target_for(&notification.kind) {
            Some(target) => dispatch::dispatch(&self.client, notification, target)
                .await
                .map_err(ActionError::NotificationDelivery),
            None => {
                tracing::info!(
                    "📢 Notification [{}] for trigger {}: {}",
                    notification.kind,
                    notification.source,
                    notification.message
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unrouted_kind_is_logged_and_recorded() {
        let router = NotifyRouter::new();
        let n = Notification::new("email", "price above target", "t1");
        router.send(&n).await.unwrap();
        let history = router.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "price above target");
    }

    #[tokio::test]
    async fn test_dashboard_target_matches_kind() {
        let router = NotifyRouter::from_config(&NotifyConfig::default());
        assert_eq!(router.target_names(), vec!["dashboard"]);
        assert!(router.target_for("Dashboard").is_some());
        let n = Notification::new("dashboard", "hello", "t1");
        assert!(router.send(&n).await.is_ok());
    }

    #[test]
    fn test_history_ring_buffer() {
        let router = NotifyRouter::new();
        for i in 0..105 {
            router.record(Notification::new("log", &format!("n{i}"), "t"));
        }
        let history = router.history();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].message, "n5");
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut router = NotifyRouter::new();
        router.register_target(NotifyTarget::Webhook {
            url: "https://a.example".into(),
            headers: vec![],
        });
        router.register_target(NotifyTarget::Webhook {
            url: "https://b.example".into(),
            headers: vec![],
        });
        assert_eq!(router.target_names(), vec!["webhook"]);
    }
}
