//! Gmail REST adapter.
//!
//! Uses a pre-obtained OAuth bearer token (`GMAIL_ACCESS_TOKEN`); token
//! acquisition and refresh happen outside this crate.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::MailboxError;
use crate::mailbox::mime::parse_raw_message;
use crate::mailbox::{ApplyOutcome, CandidatePage, Mailbox, MailboxLabel};
use crate::pipeline::types::{Action, Message};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";
const STARRED: &str = "STARRED";
const INBOX: &str = "INBOX";

/// Gmail adapter configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub access_token: SecretString,
    pub user_id: String,
    /// Search query selecting candidates.
    pub query: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl GmailConfig {
    /// Returns `None` if `GMAIL_ACCESS_TOKEN` is not set.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("GMAIL_ACCESS_TOKEN").ok()?;
        let user_id = std::env::var("GMAIL_USER_ID").unwrap_or_else(|_| "me".to_string());
        let query =
            std::env::var("GMAIL_QUERY").unwrap_or_else(|_| "is:unread in:inbox".to_string());
        let base_url =
            std::env::var("GMAIL_API_BASE").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs: u64 = std::env::var("GMAIL_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Some(Self {
            access_token: SecretString::from(token),
            user_id,
            query,
            base_url,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    raw: Option<String>,
    internal_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MinimalMessage {
    #[serde(default)]
    label_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LabelsResponse {
    #[serde(default)]
    labels: Vec<MailboxLabel>,
}

/// Gmail mailbox over the REST API.
pub struct GmailMailbox {
    config: GmailConfig,
    client: reqwest::Client,
    /// Lowercased label name → label id.
    label_cache: Mutex<HashMap<String, String>>,
}

impl GmailMailbox {
    pub fn new(config: GmailConfig) -> Result<Self, MailboxError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| MailboxError::Permanent {
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            config,
            client,
            label_cache: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/users/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.user_id,
            path
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(self.config.access_token.expose_secret())
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        message_id: Option<&str>,
    ) -> Result<T, MailboxError> {
        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, retry_after, &body, message_id));
        }
        response.json::<T>().await.map_err(|e| MailboxError::Permanent {
            reason: format!("Invalid Gmail response: {e}"),
        })
    }

    async fn current_labels(&self, id: &str) -> Result<Vec<String>, MailboxError> {
        let minimal: MinimalMessage = self
            .send_json(
                self.request(Method::GET, &format!("messages/{id}"))
                    .query(&[("format", "minimal")]),
                Some(id),
            )
            .await?;
        Ok(minimal.label_ids)
    }

    /// Resolve a label name to its id, creating the label if absent.
    async fn resolve_label(&self, name: &str) -> Result<String, MailboxError> {
        let key = name.to_lowercase();
        let mut cache = self.label_cache.lock().await;
        if let Some(id) = cache.get(&key) {
            return Ok(id.clone());
        }

        for label in self.list_labels().await? {
            cache.insert(label.name.to_lowercase(), label.id);
        }
        if let Some(id) = cache.get(&key) {
            return Ok(id.clone());
        }

        let created: MailboxLabel = self
            .send_json(
                self.request(Method::POST, "labels").json(&json!({
                    "name": name,
                    "labelListVisibility": "labelShow",
                    "messageListVisibility": "show",
                })),
                None,
            )
            .await?;
        info!(label = %created.name, id = %created.id, "Created Gmail label");
        cache.insert(key, created.id.clone());
        Ok(created.id)
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    fn name(&self) -> &str {
        "gmail"
    }

    async fn verify(&self) -> Result<(), MailboxError> {
        let labels = self.list_labels().await?;
        debug!(count = labels.len(), "Gmail credentials verified");
        Ok(())
    }

    async fn list_candidates(
        &self,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<CandidatePage, MailboxError> {
        let mut query = vec![
            ("q", self.config.query.clone()),
            ("maxResults", limit.clamp(1, 500).to_string()),
        ];
        if let Some(token) = cursor {
            query.push(("pageToken", token.to_string()));
        }
        let list: ListResponse = self
            .send_json(self.request(Method::GET, "messages").query(&query), None)
            .await?;

        Ok(CandidatePage {
            ids: list.messages.into_iter().map(|r| r.id).collect(),
            next_cursor: list.next_page_token,
        })
    }

    async fn fetch_message(&self, id: &str) -> Result<Option<Message>, MailboxError> {
        let raw: RawMessage = self
            .send_json(
                self.request(Method::GET, &format!("messages/{id}"))
                    .query(&[("format", "raw")]),
                Some(id),
            )
            .await?;

        let Some(encoded) = raw.raw else {
            warn!(id = %raw.id, "Gmail returned no raw payload");
            return Ok(None);
        };
        let bytes = decode_raw(&encoded).map_err(|reason| MailboxError::Permanent { reason })?;
        let fallback = raw
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);
        Ok(parse_raw_message(&raw.id, &bytes, fallback))
    }

    async fn apply_action(
        &self,
        message_id: &str,
        action: &Action,
    ) -> Result<ApplyOutcome, MailboxError> {
        let changes = match action {
            Action::Star => LabelChanges::add(STARRED),
            Action::Label(name) => LabelChanges::add(&self.resolve_label(name).await?),
            Action::Archive => LabelChanges::remove(INBOX),
        };

        let current = self.current_labels(message_id).await?;
        if changes.already_applied(&current) {
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let _: serde_json::Value = self
            .send_json(
                self.request(Method::POST, &format!("messages/{message_id}/modify"))
                    .json(&json!({
                        "addLabelIds": changes.add,
                        "removeLabelIds": changes.remove,
                    })),
                Some(message_id),
            )
            .await?;
        Ok(ApplyOutcome::Applied)
    }

    async fn list_labels(&self) -> Result<Vec<MailboxLabel>, MailboxError> {
        let response: LabelsResponse = self
            .send_json(self.request(Method::GET, "labels"), None)
            .await?;
        Ok(response.labels)
    }
}

/// Label ids to add/remove for one action.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct LabelChanges {
    add: Vec<String>,
    remove: Vec<String>,
}

impl LabelChanges {
    fn add(label_id: &str) -> Self {
        Self {
            add: vec![label_id.to_string()],
            remove: Vec::new(),
        }
    }

    fn remove(label_id: &str) -> Self {
        Self {
            add: Vec::new(),
            remove: vec![label_id.to_string()],
        }
    }

    fn already_applied(&self, current: &[String]) -> bool {
        self.add.iter().all(|l| current.contains(l))
            && self.remove.iter().all(|l| !current.contains(l))
    }
}

fn decode_raw(encoded: &str) -> Result<Vec<u8>, String> {
    URL_SAFE_NO_PAD
        .decode(encoded.trim().trim_end_matches('='))
        .map_err(|e| format!("Invalid base64url payload: {e}"))
}

fn map_transport_error(e: reqwest::Error) -> MailboxError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        MailboxError::Transient {
            reason: e.to_string(),
            retry_after: None,
        }
    } else {
        MailboxError::Permanent {
            reason: e.to_string(),
        }
    }
}

fn map_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
    message_id: Option<&str>,
) -> MailboxError {
    let reason = format!("HTTP {status}: {}", body.chars().take(200).collect::<String>());
    match status {
        StatusCode::TOO_MANY_REQUESTS => MailboxError::Transient {
            reason,
            retry_after,
        },
        s if s.is_server_error() => MailboxError::Transient {
            reason,
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MailboxError::AuthFailed { reason },
        StatusCode::NOT_FOUND => match message_id {
            Some(id) => MailboxError::NotFound { id: id.to_string() },
            None => MailboxError::Permanent { reason },
        },
        _ => MailboxError::Permanent { reason },
    }
}
