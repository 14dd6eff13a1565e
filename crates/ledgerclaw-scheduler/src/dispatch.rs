//! Notification dispatch — actually sends notifications to configured channels.
//! Supports: Telegram Bot API, Discord Webhook, HTTP Webhook, Dashboard log.

use std::time::Duration;

use ledgerclaw_core::{NotifyConfig, Notification};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Notification target configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyTarget {
    /// Telegram Bot API — send via `sendMessage`.
    Telegram { bot_token: String, chat_id: String },
    /// Discord Webhook URL.
    Discord { webhook_url: String },
    /// Generic HTTP webhook — POST with JSON body.
    Webhook {
        url: String,
        headers: Vec<(String, String)>,
    },
    /// Recorded in the log only.
    Dashboard,
}

impl NotifyTarget {
    /// Short name used in logs and for kind matching.
    pub fn name(&self) -> &'static str {
        match self {
            NotifyTarget::Telegram { .. } => "telegram",
            NotifyTarget::Discord { .. } => "discord",
            NotifyTarget::Webhook { .. } => "webhook",
            NotifyTarget::Dashboard => "dashboard",
        }
    }
}

/// Dispatch a notification to a target channel.
/// Returns Ok(()) on success, Err(reason) on failure.
pub async fn dispatch(
    client: &reqwest::Client,
    notification: &Notification,
    target: &NotifyTarget,
) -> Result<(), String> {
    match target {
        NotifyTarget::Telegram { bot_token, chat_id } => {
            send_telegram(client, bot_token, chat_id, notification).await
        }
        NotifyTarget::Discord { webhook_url } => {
            send_discord(client, webhook_url, notification).await
        }
        NotifyTarget::Webhook { url, headers } => {
            send_webhook(client, url, headers, notification).await
        }
        NotifyTarget::Dashboard => {
            tracing::info!(
                "📊 [{}] {} (source: {})",
                notification.kind,
                notification.message,
                notification.source
            );
            Ok(())
        }
    }
}

fn kind_emoji(kind: &str) -> &'static str {
    match kind {
        "alert" | "urgent" => "🚨",
        "warning" => "⚠️",
        "email" => "✉️",
        _ => "📢",
    }
}

/// Send notification via Telegram Bot API.
async fn send_telegram(
    client: &reqwest::Client,
    bot_token: &str,
    chat_id: &str,
    notification: &Notification,
) -> Result<(), String> {
    let url = format!("https://api.telegram.org/bot{}/sendMessage", bot_token);
    let text = format!(
        "{} {}\n\n_Trigger: {} • {}_",
        kind_emoji(&notification.kind),
        escape_markdown(&notification.message),
        escape_markdown(&notification.source),
        notification.timestamp.format("%H:%M:%S UTC")
    );

    let resp = client
        .post(&url)
        .json(&serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown"
        }))
        .timeout(SEND_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("Telegram send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::info!("✅ Telegram notification sent for trigger {}", notification.source);
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(format!("Telegram API error {status}: {body}"))
    }
}

/// Send notification via Discord Webhook.
async fn send_discord(
    client: &reqwest::Client,
    webhook_url: &str,
    notification: &Notification,
) -> Result<(), String> {
    let color = match notification.kind.as_str() {
        "alert" | "urgent" => 0xFF0000,
        "warning" => 0xFF8800,
        _ => 0x00AAFF,
    };

    let resp = client
        .post(webhook_url)
        .json(&serde_json::json!({
            "embeds": [{
                "title": format!("Trigger {}", notification.source),
                "description": notification.message,
                "color": color,
                "footer": {
                    "text": format!("{} • {}", notification.kind, notification.timestamp.format("%H:%M:%S UTC"))
                }
            }]
        }))
        .timeout(SEND_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("Discord send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::info!("✅ Discord notification sent for trigger {}", notification.source);
        Ok(())
    } else {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(format!("Discord webhook error {status}: {body}"))
    }
}

/// Send notification via generic HTTP webhook.
async fn send_webhook(
    client: &reqwest::Client,
    url: &str,
    headers: &[(String, String)],
    notification: &Notification,
) -> Result<(), String> {
    let mut req = client.post(url).json(notification).timeout(SEND_TIMEOUT);
    for (key, value) in headers {
        req = req.header(key.as_str(), value.as_str());
    }

    let resp = req
        .send()
        .await
        .map_err(|e| format!("Webhook send failed: {e}"))?;

    if resp.status().is_success() {
        tracing::info!("✅ Webhook notification sent to {}", url);
        Ok(())
    } else {
        Err(format!("Webhook error {}", resp.status()))
    }
}

/// Escape Telegram MarkdownV1 special characters.
fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}

/// Build targets from the `[notify]` config section. Dashboard is always last.
pub fn targets_from_config(config: &NotifyConfig) -> Vec<NotifyTarget> {
    let mut targets = Vec::new();

    if let (Some(token), Some(chat_id)) = (&config.telegram_bot_token, &config.telegram_chat_id)
        && !token.is_empty()
        && !chat_id.is_empty()
    {
        targets.push(NotifyTarget::Telegram {
            bot_token: token.clone(),
            chat_id: chat_id.clone(),
        });
    }

    if let Some(url) = &config.discord_webhook_url
        && !url.is_empty()
    {
        targets.push(NotifyTarget::Discord {
            webhook_url: url.clone(),
        });
    }

    if let Some(url) = &config.webhook_url
        && !url.is_empty()
    {
        targets.push(NotifyTarget::Webhook {
            url: url.clone(),
            headers: vec![],
        });
    }

    targets.push(NotifyTarget::Dashboard);
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_from_config() {
        let empty = targets_from_config(&NotifyConfig::default());
        assert_eq!(empty, vec![NotifyTarget::Dashboard]);

        let config = NotifyConfig {
            telegram_bot_token: Some("123:abc".into()),
            telegram_chat_id: None,
            discord_webhook_url: Some("https://discord.example/hook".into()),
            webhook_url: Some(String::new()),
        };
        let names: Vec<_> = targets_from_config(&config).iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["discord", "dashboard"]);
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a_b*c"), "a\\_b\\*c");
    }

    #[tokio::test]
    async fn test_dashboard_dispatch_succeeds() {
        let client = reqwest::Client::new();
        let n = Notification::new("email", "balance low", "t1");
        assert!(dispatch(&client, &n, &NotifyTarget::Dashboard).await.is_ok());
    }
}
