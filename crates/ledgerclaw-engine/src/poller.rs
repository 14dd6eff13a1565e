//! Ledger event poller — turns contract notifications into `Event`s.
//!
//! Each tick reads the chain height and scans every block not yet seen
//! (bounded per tick), publishing onto the engine's event queue. A full queue
//! applies backpressure: publishing waits until the queue drains or the
//! poller is cancelled.

use std::sync::Arc;
use std::time::Duration;

use ledgerclaw_core::traits::{LedgerClient, MetricsCollector};
use ledgerclaw_core::{EngineConfig, Event, Hash160, LedgerNotification, Result, StackItem};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct EventPoller {
    ledger: Arc<dyn LedgerClient>,
    metrics: Arc<dyn MetricsCollector>,
    interval: Duration,
    max_blocks_per_poll: u32,
    contract_filter: Option<Hash160>,
    /// Highest block fully scanned.
    last_block: Option<u32>,
}

impl EventPoller {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        metrics: Arc<dyn MetricsCollector>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            ledger,
            metrics,
            interval: config.event_polling_interval,
            max_blocks_per_poll: config.max_blocks_per_poll.max(1),
            contract_filter: config.contract_hash,
            last_block: None,
        }
    }

    pub fn last_block(&self) -> Option<u32> {
        self.last_block
    }

    /// Poll until cancelled. Tick failures are logged and reported, never fatal.
    pub async fn run(mut self, events: mpsc::Sender<Event>, cancel: CancellationToken) {
        tracing::info!("🔭 Event polling started (every {}s)", self.interval.as_secs());
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.poll_once(&events, &cancel).await {
                tracing::error!("❌ Event polling failed: {e}");
                self.metrics.record_error("event_polling", &e);
            }
        }
        tracing::info!("🔭 Event polling stopped");
    }

    /// One polling tick. Returns the number of events published.
    pub async fn poll_once(
        &mut self,
        events: &mpsc::Sender<Event>,
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let count = self.ledger.block_count().await?;
        let Some(latest) = count.checked_sub(1) else {
            return Ok(0);
        };
        let start = match self.last_block {
            None => latest,
            Some(last) => last.saturating_add(1),
        };
        if start > latest {
            return Ok(0);
        }
        let end = latest.min(start.saturating_add(self.max_blocks_per_poll - 1));
        if end < latest {
            tracing::debug!("⏩ Catching up: blocks {start}..={end} of {latest}");
        }

        let mut published = 0;
        for height in start..=end {
            let hash = self.ledger.block_hash(height).await?;
            let notifications = self.ledger.block_notifications(&hash).await?;

            for notification in &notifications {
                if self
                    .contract_filter
                    .is_some_and(|filter| filter != notification.contract_hash)
                {
                    continue;
                }
                let event = match to_event(notification) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(
                            "⚠️ Skipping {} notification from {} in block {}: {}",
                            notification.event_name,
                            notification.contract_hash,
                            height,
                            e
                        );
                        continue;
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => return Ok(published),
                    sent = events.send(event) => {
                        if sent.is_err() {
                            tracing::warn!("Event queue closed, dropping remaining notifications");
                            return Ok(published);
                        }
                    }
                }
                published += 1;
            }
            self.last_block = Some(height);
        }

        if published > 0 {
            tracing::info!("📥 Published {} events from blocks {}..={}", published, start, end);
        }
        Ok(published)
    }
}

/// Decode one notification into an `Event`.
pub fn to_event(notification: &LedgerNotification) -> std::result::Result<Event, String> {
    let data = decode_state(&notification.state)?;
    Ok(Event::new(
        notification.contract_hash,
        &notification.event_name,
        data,
    ))
}

/// Flatten a notification payload into key → value.
///
/// Accepted shapes: an array (or struct) of alternating key/value items, or a map.
/// Keys must be UTF-8 byte strings.
pub fn decode_state(state: &StackItem) -> std::result::Result<Map<String, Value>, String> {
    let mut data = Map::new();
    match state {
        StackItem::Array(items) | StackItem::Struct(items) => {
            if items.len() % 2 != 0 {
                return Err(format!("invalid array length: {}", items.len()));
            }
            for pair in items.chunks(2) {
                data.insert(decode_key(&pair[0])?, decode_value(&pair[1])?);
            }
        }
        StackItem::Map(entries) => {
            for (key, value) in entries {
                data.insert(decode_key(key)?, decode_value(value)?);
            }
        }
        StackItem::Any => {}
        other => return Err(format!("expected Array, got {}", other.type_name())),
    }
    Ok(data)
}

fn decode_key(item: &StackItem) -> std::result::Result<String, String> {
    let bytes = item
        .as_bytes()
        .ok_or_else(|| format!("key must be a byte string, got {}", item.type_name()))?;
    String::from_utf8(bytes.to_vec()).map_err(|_| "key is not valid UTF-8".to_string())
}

/// Byte strings become UTF-8 text when possible, `0x`-hex otherwise.
fn bytes_to_value(bytes: &[u8]) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) if !s.chars().any(char::is_control) => Value::String(s.to_string()),
        _ => Value::String(format!("0x{}", hex::encode(bytes))),
    }
}

fn decode_value(item: &StackItem) -> std::result::Result<Value, String> {
    Ok(match item {
        StackItem::Any => Value::Null,
        StackItem::Boolean(b) => Value::Bool(*b),
        StackItem::Integer(n) => match i64::try_from(*n) {
            Ok(small) => Value::from(small),
            // beyond i64: keep exact digits; comparisons coerce numeric strings
            Err(_) => Value::String(n.to_string()),
        },
        StackItem::ByteString(b) | StackItem::Buffer(b) => bytes_to_value(b),
        StackItem::Array(items) | StackItem::Struct(items) => Value::Array(
            items
                .iter()
                .map(|i| {
                    i.as_bytes()
                        .map(bytes_to_value)
                        .ok_or_else(|| format!("array item must be a byte string, got {}", i.type_name()))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?,
        ),
        other => return Err(format!("unsupported stack item type: {}", other.type_name())),
    })
}
