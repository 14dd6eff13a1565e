//! Action execution — one attempt of a trigger's configured action.
//!
//! | type            | parameters                                  |
//! |-----------------|---------------------------------------------|
//! | `contract_call` | `contract_hash`, `method`, `parameters[]`   |
//! | `webhook`       | `url`, `headers{}`                          |
//! | `notify`        | `type`, `message`                           |
//!
//! Retries are the caller's business; every call here is a single attempt.

pub mod contract;
pub mod notify;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use ledgerclaw_core::traits::{ActionExecutor, LedgerClient, NotificationSink, TransactionSigner};
use ledgerclaw_core::{ActionConfig, ActionError, ActionType, Event, Trigger};
use serde_json::Value;

pub use contract::Confirmation;

/// Routes an action to its implementation, using whichever capabilities are bound.
pub struct ActionDispatcher {
    ledger: Option<Arc<dyn LedgerClient>>,
    signer: Option<Arc<dyn TransactionSigner>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    network_magic: u32,
    confirmation: Confirmation,
    http: reqwest::Client,
}

impl ActionDispatcher {
    pub fn new(network_magic: u32) -> Self {
        Self {
            ledger: None,
            signer: None,
            notifier: None,
            network_magic,
            confirmation: Confirmation::default(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_confirmation(mut self, confirmation: Confirmation) -> Self {
        self.confirmation = confirmation;
        self
    }
}

#[async_trait]
impl ActionExecutor for ActionDispatcher {
    async fn execute(&self, trigger: &Trigger, event: &Event) -> Result<Value, ActionError> {
        let config = ActionConfig::parse(&trigger.action)?;
        let kind = config.kind()?;
        tracing::debug!(trigger = %trigger.id, event = %event.id, "⚡ Executing {} action", config.action_type);

        match kind {
            ActionType::ContractCall => {
                let ledger = self
                    .ledger
                    .as_deref()
                    .ok_or_else(|| ActionError::Unavailable("ledger client".into()))?;
                let signer = self
                    .signer
                    .as_deref()
                    .ok_or_else(|| ActionError::Unavailable("transaction signer".into()))?;
                contract::call_contract(ledger, signer, self.network_magic, self.confirmation, &config)
                    .await
            }
            ActionType::Webhook => webhook::post_webhook(&self.http, trigger, event, &config).await,
            ActionType::Notify => {
                let sink = self
                    .notifier
                    .as_deref()
                    .ok_or_else(|| ActionError::Unavailable("notification sink".into()))?;
                notify::send_notification(sink, trigger, event, &config).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerclaw_core::{
        ContractInvocation, Hash160, LedgerNotification, Notification, Result, SignedTransaction,
    };
    use serde_json::{Map, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;

    struct FakeSigner;

    impl TransactionSigner for FakeSigner {
        fn account(&self) -> Hash160 {
            Hash160::from_le_bytes([9; 20])
        }
        fn sign(&self, invocation: &ContractInvocation) -> std::result::Result<SignedTransaction, ActionError> {
            Ok(SignedTransaction {
                hash: format!("0xtx-{}", invocation.method),
                raw: invocation.method.as_bytes().to_vec(),
            })
        }
    }

    /// Confirms a transaction after `confirm_after` height checks (never when 0).
    struct FakeLedger {
        confirm_after: u32,
        checks: AtomicU32,
        sent: Mutex<Vec<SignedTransaction>>,
    }

    impl FakeLedger {
        fn new(confirm_after: u32) -> Self {
            Self {
                confirm_after,
                checks: AtomicU32::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LedgerClient for FakeLedger {
        async fn block_count(&self) -> Result<u32> {
            Ok(1)
        }
        async fn block_hash(&self, _height: u32) -> Result<String> {
            Ok("h".into())
        }
        async fn block_notifications(&self, _hash: &str) -> Result<Vec<LedgerNotification>> {
            Ok(Vec::new())
        }
        async fn send_raw_transaction(&self, tx: &SignedTransaction) -> Result<String> {
            self.sent.lock().unwrap().push(tx.clone());
            Ok(tx.hash.clone())
        }
        async fn transaction_height(&self, _tx_hash: &str) -> Result<Option<u32>> {
            let n = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((self.confirm_after > 0 && n >= self.confirm_after).then_some(1234))
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<Notification>>);

    #[async_trait]
    impl NotificationSink for CollectingSink {
        async fn send(&self, notification: &Notification) -> std::result::Result<(), ActionError> {
            self.0.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn trigger(action: Value) -> Trigger {
        Trigger::event("t1", Hash160::ZERO, "Transfer", &action.to_string())
    }

    fn event() -> Event {
        let mut data = Map::new();
        data.insert("amount".into(), json!(150));
        Event::new(Hash160::ZERO, "Transfer", data)
    }

    const CONTRACT: &str = "0xd2a4cff31913016155e38e474a2c06d08be276cf";

    /// One-shot HTTP server answering with `status`; yields the raw request text.
    async fn http_stub(status: u16) -> (String, oneshot::Receiver<String>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            let reply = format!(
                "HTTP/1.1 {status} Stub\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        (format!("http://{addr}/hook"), rx)
    }

    #[tokio::test]
    async fn test_invalid_and_unsupported_configs() {
        let dispatcher = ActionDispatcher::new(0);
        let mut t = trigger(json!({}));
        t.action = "not json".into();
        assert!(matches!(
            dispatcher.execute(&t, &event()).await,
            Err(ActionError::InvalidActionConfig(_))
        ));

        let t = trigger(json!({"type": "email", "parameters": {}}));
        assert_eq!(
            dispatcher.execute(&t, &event()).await,
            Err(ActionError::UnsupportedActionType("email".into()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_contract_call_confirms() {
        let ledger = Arc::new(FakeLedger::new(3));
        let dispatcher = ActionDispatcher::new(769)
            .with_ledger(ledger.clone())
            .with_signer(Arc::new(FakeSigner));
        let t = trigger(json!({
            "type": "contract_call",
            "parameters": {"contract_hash": CONTRACT, "method": "mint", "parameters": [1]}
        }));

        let result = dispatcher.execute(&t, &event()).await.unwrap();
        assert_eq!(result["tx_hash"], "0xtx-mint");
        assert_eq!(result["block_height"], 1234);
        assert_eq!(ledger.sent.lock().unwrap().len(), 1);
        assert_eq!(ledger.checks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contract_call_not_confirmed() {
        let ledger = Arc::new(FakeLedger::new(0));
        let dispatcher = ActionDispatcher::new(769)
            .with_ledger(ledger.clone())
            .with_signer(Arc::new(FakeSigner))
            .with_confirmation(Confirmation {
                attempts: 5,
                interval: Duration::from_secs(1),
            });
        let t = trigger(json!({
            "type": "contract_call",
            "parameters": {"contract_hash": CONTRACT, "method": "mint"}
        }));

        assert_eq!(
            dispatcher.execute(&t, &event()).await,
            Err(ActionError::TransactionNotConfirmed {
                tx_hash: "0xtx-mint".into(),
                attempts: 5
            })
        );
        assert_eq!(ledger.checks.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_contract_call_requires_capabilities() {
        let t = trigger(json!({
            "type": "contract_call",
            "parameters": {"contract_hash": CONTRACT, "method": "mint"}
        }));
        let err = ActionDispatcher::new(0).execute(&t, &event()).await.unwrap_err();
        assert!(matches!(err, ActionError::Unavailable(_)));

        let err = ActionDispatcher::new(0)
            .with_ledger(Arc::new(FakeLedger::new(1)))
            .execute(&t, &event())
            .await
            .unwrap_err();
        assert_eq!(err, ActionError::Unavailable("transaction signer".into()));
    }

    #[tokio::test]
    async fn test_notify_action() {
        let sink = Arc::new(CollectingSink::default());
        let dispatcher = ActionDispatcher::new(0).with_notifier(sink.clone());
        let ev = event();

        let t = trigger(json!({"type": "notify", "parameters": {"type": "email", "message": "big transfer"}}));
        let result = dispatcher.execute(&t, &ev).await.unwrap();
        assert_eq!(result["delivered"], true);

        let sent = sink.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "email");
        assert_eq!(sent[0].source, "t1");
        assert_eq!(sent[0].event_id.as_deref(), Some(ev.id.as_str()));
        drop(sent);

        let t = trigger(json!({"type": "notify", "parameters": {"type": "email"}}));
        assert_eq!(
            dispatcher.execute(&t, &ev).await,
            Err(ActionError::MissingParameter("message".into()))
        );
    }

    #[tokio::test]
    async fn test_webhook_posts_event() {
        let (url, request) = http_stub(200).await;
        let t = trigger(json!({
            "type": "webhook",
            "parameters": {"url": url, "headers": {"X-Api-Key": "secret"}}
        }));

        let result = ActionDispatcher::new(0).execute(&t, &event()).await.unwrap();
        assert_eq!(result["status"], 200);

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /hook"));
        assert!(raw.to_ascii_lowercase().contains("x-api-key: secret"));
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let payload: Value = serde_json::from_str(body).unwrap();
        assert_eq!(payload["trigger_id"], "t1");
        assert_eq!(payload["event"]["data"]["amount"], 150);
        assert!(payload["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_webhook_failures() {
        let (url, _request) = http_stub(503).await;
        let t = trigger(json!({"type": "webhook", "parameters": {"url": url}}));
        let err = ActionDispatcher::new(0).execute(&t, &event()).await.unwrap_err();
        assert!(matches!(err, ActionError::WebhookDelivery { status: Some(503), .. }));

        // nothing listens on port 1
        let t = trigger(json!({"type": "webhook", "parameters": {"url": "http://127.0.0.1:1/"}}));
        let err = ActionDispatcher::new(0).execute(&t, &event()).await.unwrap_err();
        assert!(matches!(err, ActionError::WebhookDelivery { status: None, .. }));

        let t = trigger(json!({"type": "webhook", "parameters": {}}));
        assert_eq!(
            ActionDispatcher::new(0).execute(&t, &event()).await,
            Err(ActionError::MissingParameter("url".into()))
        );
    }
}
