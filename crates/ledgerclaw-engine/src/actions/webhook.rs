//! `webhook` — POST the triggering event to a URL.

use std::time::Duration;

use chrono::Utc;
use ledgerclaw_core::{ActionConfig, ActionError, Event, Trigger};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Caller headers from `parameters.headers`; non-string values and invalid names are skipped.
fn custom_headers(config: &ActionConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let Some(map) = config.parameters.get("headers").and_then(Value::as_object) else {
        return headers;
    };
    for (key, value) in map {
        if let Some(val_str) = value.as_str()
            && let Ok(name) = HeaderName::from_bytes(key.as_bytes())
            && let Ok(val) = HeaderValue::from_str(val_str)
        {
            headers.insert(name, val);
        } else {
            tracing::warn!("⚠️ Skipping invalid webhook header '{key}'");
        }
    }
    headers
}

pub async fn post_webhook(
    client: &reqwest::Client,
    trigger: &Trigger,
    event: &Event,
    config: &ActionConfig,
) -> Result<Value, ActionError> {
    let url = config.str_param("url")?;
    let payload = serde_json::json!({
        "trigger_id": trigger.id,
        "event": event,
        "timestamp": Utc::now(),
    });
    let body = serde_json::to_vec(&payload).map_err(|e| ActionError::WebhookDelivery {
        status: None,
        message: format!("failed to encode payload: {e}"),
    })?;

    let resp = client
        .post(url)
        .timeout(WEBHOOK_TIMEOUT)
        .header(CONTENT_TYPE, "application/json")
        .headers(custom_headers(config))
        .body(body)
        .send()
        .await
        .map_err(|e| ActionError::WebhookDelivery {
            status: None,
            message: e.to_string(),
        })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ActionError::WebhookDelivery {
            status: Some(status.as_u16()),
            message: format!("webhook request failed with status {status}"),
        });
    }

    tracing::info!("🌐 Webhook for trigger {} delivered ({})", trigger.id, status);
    Ok(serde_json::json!({ "status": status.as_u16() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_headers() {
        let cfg = ActionConfig::parse(
            r#"{"type":"webhook","parameters":{"url":"http://x","headers":{
                "X-Api-Key":"k","Content-Type":"text/plain","bad header":"v","n":1}}}"#,
        )
        .unwrap();
        let headers = custom_headers(&cfg);
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["x-api-key"], "k");
        assert_eq!(headers[CONTENT_TYPE], "text/plain");
    }

    #[test]
    fn test_no_headers() {
        let cfg = ActionConfig::parse(r#"{"type":"webhook","parameters":{"url":"http://x"}}"#).unwrap();
        assert!(custom_headers(&cfg).is_empty());
    }
}
