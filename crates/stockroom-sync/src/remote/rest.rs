//! # REST Remote
//!
//! `RemoteAdapter` over the backend's JSON sync endpoints.
//!
//! ## Endpoints
//! ```text
//!   kind          path
//!   ──────────────────────────────
//!   Item          {base}/sync/items
//!   Staff         {base}/sync/staff
//!   CheckoutLog   {base}/sync/logs
//!
//!   create / update   POST   {path}        body: [entity]   200, body optional
//!   archive           DELETE {path}/{id}
//!   fetch_all         GET    {path}        200: [entity, ...]
//! ```
//!
//! On the wire `lastModified` is an ISO-8601 string; locally it is epoch
//! milliseconds. Other fields keep the local JSON shape.
//!
//! ## Status mapping
//! ```text
//!   2xx            → Ok
//!   408, 429       → RemoteError::Server     (retried)
//!   other 4xx      → RemoteError::Rejected   (permanent)
//!   5xx, other     → RemoteError::Server
//!   connect error  → RemoteError::Unavailable
//!   client timeout → RemoteError::Timeout
//!   bad body       → RemoteError::Decode
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use stockroom_core::{Entity, EntityKind, Timestamp};
use tracing::debug;
use url::Url;

use super::{RemoteAdapter, RemoteResult};
use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError, SyncResult};

const LAST_MODIFIED: &str = "lastModified";

/// Remote store reached over HTTP.
#[derive(Debug, Clone)]
pub struct RestRemote {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RestRemote {
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let parsed = Url::parse(base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("HTTP client: {e}")))?;

        Ok(RestRemote {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    /// Builds the adapter from `[remote] base_url` and the request timeout.
    pub fn from_config(config: &SyncConfig) -> SyncResult<Self> {
        let base_url = config
            .remote_url()
            .ok_or_else(|| SyncError::InvalidConfig("remote.base_url is not set".into()))?;
        Self::new(base_url, config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, kind: EntityKind) -> String {
        format!("{}/sync/{}", self.base_url, resource_path(kind))
    }

    async fn push(&self, entity: &Entity) -> RemoteResult<Entity> {
        let url = self.endpoint(entity.kind());
        let body = Value::Array(vec![to_wire(entity)?]);
        debug!(%url, kind = %entity.kind(), id = %entity.id(), "POST");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let response = check_status(response).await?;

        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        if text.trim().is_empty() {
            return Ok(entity.clone());
        }

        let value: Value =
            serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))?;
        let confirmed = match value {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            Value::Array(_) => return Ok(entity.clone()),
            other => other,
        };
        from_wire(entity.kind(), confirmed)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> RemoteError {
        if err.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteAdapter for RestRemote {
    async fn create(&self, entity: &Entity) -> RemoteResult<Entity> {
        self.push(entity).await
    }

    async fn update(&self, id: &str, entity: &Entity) -> RemoteResult<Entity> {
        if entity.id() != id {
            return Err(RemoteError::Rejected {
                status: 400,
                message: format!("id {id} does not match body id {}", entity.id()),
            });
        }
        self.push(entity).await
    }

    async fn archive(&self, kind: EntityKind, id: &str) -> RemoteResult<()> {
        let url = format!("{}/{}", self.endpoint(kind), id);
        debug!(%url, "DELETE");

        let response = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch_all(&self, kind: EntityKind) -> RemoteResult<Vec<Entity>> {
        let url = self.endpoint(kind);
        debug!(%url, "GET");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let response = check_status(response).await?;

        let values: Vec<Value> = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        values.into_iter().map(|v| from_wire(kind, v)).collect()
    }
}

// =============================================================================
// Wire Format
// =============================================================================

fn resource_path(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Item => "items",
        EntityKind::Staff => "staff",
        EntityKind::CheckoutLog => "logs",
    }
}

async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .await
        .ok()
        .filter(|body| !body.is_empty())
        .unwrap_or_else(|| status.to_string());

    let throttled = matches!(
        status,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
    );
    if status.is_client_error() && !throttled {
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(RemoteError::Server {
            status: status.as_u16(),
            message,
        })
    }
}

fn to_iso8601(at: Timestamp) -> RemoteResult<String> {
    DateTime::<Utc>::from_timestamp_millis(at)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| RemoteError::Decode(format!("timestamp out of range: {at}")))
}

fn from_iso8601(text: &str) -> RemoteResult<Timestamp> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| RemoteError::Decode(format!("bad {LAST_MODIFIED} {text:?}: {e}")))
}

/// Local JSON shape with `lastModified` rendered as ISO-8601.
fn to_wire(entity: &Entity) -> RemoteResult<Value> {
    let mut value = match entity {
        Entity::Item(item) => serde_json::to_value(item),
        Entity::Staff(staff) => serde_json::to_value(staff),
        Entity::CheckoutLog(log) => serde_json::to_value(log),
    }
    .map_err(|e| RemoteError::Decode(e.to_string()))?;

    if let Some(fields) = value.as_object_mut() {
        fields.insert(
            LAST_MODIFIED.to_string(),
            Value::String(to_iso8601(entity.last_modified())?),
        );
    }
    Ok(value)
}

/// Accepts `lastModified` as ISO-8601 or as epoch milliseconds.
fn from_wire(kind: EntityKind, mut value: Value) -> RemoteResult<Entity> {
    if let Some(fields) = value.as_object_mut() {
        if let Some(Value::String(text)) = fields.get(LAST_MODIFIED) {
            let millis = from_iso8601(text)?;
            fields.insert(LAST_MODIFIED.to_string(), Value::from(millis));
        }
    }

    let entity = match kind {
        EntityKind::Item => serde_json::from_value(value).map(Entity::Item),
        EntityKind::Staff => serde_json::from_value(value).map(Entity::Staff),
        EntityKind::CheckoutLog => serde_json::from_value(value).map(Entity::CheckoutLog),
    };
    entity.map_err(|e| RemoteError::Decode(format!("{kind}: {e}")))
}
