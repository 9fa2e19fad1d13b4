//! Family alerts over the WhatsApp Cloud API.
//!
//! Alerts are fire-and-forget: the HTTP handler hands them to [`WhatsAppNotifier::dispatch`]
//! and returns immediately; delivery problems only show up in the logs.

use crate::config::AlertConfig;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WhatsApp API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// A text alert and the number it goes to.
#[derive(Debug, Clone)]
pub struct Alert {
    pub text: String,
    pub number: String,
}

pub struct WhatsAppNotifier {
    client: reqwest::Client,
    api_base: String,
    phone_number_id: String,
    token: String,
    call_sdp: Option<String>,
    default_number: Option<String>,
}

impl WhatsAppNotifier {
    /// Build a notifier, or `None` when token or phone number ID is missing.
    pub fn from_config(config: &AlertConfig) -> Result<Option<Self>, AlertError> {
        let (Some(token), Some(phone_number_id)) = (&config.token, &config.phone_number_id) else {
            return Ok(None);
        };

        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Some(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.clone(),
            token: token.clone(),
            call_sdp: config.call_sdp.clone(),
            default_number: config.default_number.clone(),
        }))
    }

    pub fn default_number(&self) -> Option<&str> {
        self.default_number.as_deref()
    }

    /// Whether alerts are followed by a call (an SDP offer is configured).
    pub fn places_calls(&self) -> bool {
        self.call_sdp.is_some()
    }

    /// Send the text, then place the call if an SDP offer is configured.
    /// Runs on a background task; the caller never waits for delivery.
    pub fn dispatch(self: &Arc<Self>, alert: Alert) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            match notifier.send_text(&alert.number, &alert.text).await {
                Ok(()) => tracing::info!(number = %alert.number, "alert message sent"),
                Err(err) => {
                    tracing::warn!(number = %alert.number, error = %err, "alert message failed")
                }
            }

            let Some(sdp) = notifier.call_sdp.as_deref() else {
                tracing::debug!("no call SDP configured; skipping alert call");
                return;
            };
            match notifier.place_call(&alert.number, sdp).await {
                Ok(()) => tracing::info!(number = %alert.number, "alert call placed"),
                Err(err) => tracing::warn!(number = %alert.number, error = %err, "alert call failed"),
            }
        });
    }

    pub async fn send_text(&self, number: &str, text: &str) -> Result<(), AlertError> {
        self.post("messages", text_message_body(number, text)).await
    }

    pub async fn place_call(&self, number: &str, sdp: &str) -> Result<(), AlertError> {
        self.post("calls", call_body(number, sdp)).await
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<(), AlertError> {
        let url = format!("{}/{}/{endpoint}", self.api_base, self.phone_number_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(%url, status = status.as_u16(), "WhatsApp request accepted");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AlertError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

fn text_message_body(number: &str, text: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": number,
        "type": "text",
        "text": { "body": text },
    })
}

fn call_body(number: &str, sdp: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": number,
        "action": "connect",
        "session": {
            "sdp": sdp,
            "sdp_type": "offer",
        },
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn alert_config(token: Option<&str>, id: Option<&str>) -> AlertConfig {
        AlertConfig {
            token: token.map(String::from),
            phone_number_id: id.map(String::from),
            api_base: "https://example.test/v22.0/".into(),
            default_number: Some("15550001111".into()),
            call_sdp: None,
        }
    }

    #[test]
    fn test_disabled_without_credentials() {
        assert!(WhatsAppNotifier::from_config(&alert_config(None, Some("1")))
            .unwrap()
            .is_none());
        assert!(WhatsAppNotifier::from_config(&alert_config(Some("t"), None))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_enabled_with_credentials() {
        let notifier = WhatsAppNotifier::from_config(&alert_config(Some("t"), Some("42")))
            .unwrap()
            .unwrap();
        assert_eq!(notifier.api_base, "https://example.test/v22.0");
        assert_eq!(notifier.default_number(), Some("15550001111"));
        assert!(!notifier.places_calls());
    }

    fn notifier_for(api_base: &str, call_sdp: Option<&str>) -> Arc<WhatsAppNotifier> {
        let config = AlertConfig {
            token: Some("secret-token".into()),
            phone_number_id: Some("42".into()),
            api_base: api_base.into(),
            default_number: None,
            call_sdp: call_sdp.map(String::from),
        };
        Arc::new(WhatsAppNotifier::from_config(&config).unwrap().unwrap())
    }

    #[tokio::test]
    async fn test_send_text_posts_to_messages_with_bearer_token() {
        let (base, mut rx) = fake_cloud::start(StatusCode::OK).await;
        notifier_for(&base, None)
            .send_text("15550001111", "Grandpa is at the door")
            .await
            .unwrap();

        let req = fake_cloud::next(&mut rx).await;
        assert_eq!(req.phone_number_id, "42");
        assert_eq!(req.endpoint, "messages");
        assert_eq!(req.authorization.as_deref(), Some("Bearer secret-token"));
        assert_eq!(req.body["to"], "15550001111");
        assert_eq!(req.body["text"]["body"], "Grandpa is at the door");
    }

    #[tokio::test]
    async fn test_api_rejection_is_reported() {
        let (base, _rx) = fake_cloud::start(StatusCode::UNAUTHORIZED).await;
        let err = notifier_for(&base, None)
            .send_text("15550001111", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, AlertError::Api { status: 401, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_dispatch_without_sdp_sends_text_only() {
        let (base, mut rx) = fake_cloud::start(StatusCode::OK).await;
        notifier_for(&base, None).dispatch(Alert {
            text: "hello".into(),
            number: "15550001111".into(),
        });

        assert_eq!(fake_cloud::next(&mut rx).await.endpoint, "messages");
        fake_cloud::assert_idle(&mut rx).await;
    }

    #[tokio::test]
    async fn test_dispatch_with_sdp_follows_text_with_call() {
        let (base, mut rx) = fake_cloud::start(StatusCode::OK).await;
        let notifier = notifier_for(&base, Some("v=0\r\n"));
        assert!(notifier.places_calls());
        notifier.dispatch(Alert {
            text: "hello".into(),
            number: "15550001111".into(),
        });

        let text = fake_cloud::next(&mut rx).await;
        assert_eq!(text.endpoint, "messages");
        let call = fake_cloud::next(&mut rx).await;
        assert_eq!(call.endpoint, "calls");
        assert_eq!(call.phone_number_id, "42");
        assert_eq!(call.authorization.as_deref(), Some("Bearer secret-token"));
        assert_eq!(call.body["to"], "15550001111");
        assert_eq!(call.body["session"]["sdp"], "v=0\r\n");
    }

    #[tokio::test]
    async fn test_failed_text_still_places_call() {
        let (base, mut rx) = fake_cloud::start(StatusCode::INTERNAL_SERVER_ERROR).await;
        notifier_for(&base, Some("v=0\r\n")).dispatch(Alert {
            text: "hello".into(),
            number: "15550001111".into(),
        });

        assert_eq!(fake_cloud::next(&mut rx).await.endpoint, "messages");
        assert_eq!(fake_cloud::next(&mut rx).await.endpoint, "calls");
    }

    #[test]
    fn test_text_message_body() {
        let body = text_message_body("15550001111", "Grandpa is at the door");
        assert_eq!(body["messaging_product"], "whatsapp");
        assert_eq!(body["to"], "15550001111");
        assert_eq!(body["type"], "text");
        assert_eq!(body["text"]["body"], "Grandpa is at the door");
    }

    #[test]
    fn test_call_body() {
        let body = call_body("15550001111", "v=0\r\n");
        assert_eq!(body["action"], "connect");
        assert_eq!(body["session"]["sdp"], "v=0\r\n");
        assert_eq!(body["session"]["sdp_type"], "offer");
    }
}
