//! Client-facing API.
//!
//! Transport-agnostic request handling: callers hand in raw request bodies and
//! get back a status code, headers, and a JSON body. Wiring these onto an HTTP
//! server or load balancer is left to the embedding application.

use crate::core::{Error, RegionId, Result};
use crate::region::{FailoverController, HealthProbe, HealthStatus, RoutingDecision};
use crate::store::Item;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Longest accepted item id, in bytes.
pub const MAX_ID_LEN: usize = 1024;

/// A handled request.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(&'static str, String)>,
    /// JSON body
    pub body: Value,
}

impl ApiResponse {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![
                ("Content-Type", "application/json".to_string()),
                ("Access-Control-Allow-Origin", "*".to_string()),
            ],
            body,
        }
    }

    fn from_error(err: &Error) -> Self {
        Self::json(err.status_code(), json!({ "error": err.to_string() }))
    }

    fn mark_degraded(mut self, degraded: bool) -> Self {
        if degraded {
            self.headers.push(("X-Tandem-Degraded", "true".to_string()));
        }
        self
    }

    /// Value of a header, if set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Body of a client write.
#[derive(Clone, Debug, Deserialize)]
pub struct WriteRequest {
    /// Item id
    pub id: String,
    /// Any JSON value
    pub payload: Value,
}

impl WriteRequest {
    /// Parse and validate a raw request body.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let request: WriteRequest = serde_json::from_slice(body)
            .map_err(|e| Error::Validation(format!("malformed write body: {}", e)))?;

        if request.id.trim().is_empty() {
            return Err(Error::Validation("id must not be empty".into()));
        }
        if request.id.len() > MAX_ID_LEN {
            return Err(Error::Validation(format!(
                "id longer than {} bytes",
                MAX_ID_LEN
            )));
        }
        Ok(request)
    }
}

/// One entry of a read response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: String,
    pub payload: Value,
}

impl From<&Item> for ItemView {
    fn from(item: &Item) -> Self {
        // Payloads written through this API are JSON; anything else is shown as base64.
        let payload = serde_json::from_slice(&item.payload)
            .unwrap_or_else(|_| Value::String(BASE64.encode(&item.payload)));
        Self {
            id: item.id.clone(),
            payload,
        }
    }
}

/// Routing status advertised to the traffic-steering collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub decision: RoutingDecision,
    pub degraded: bool,
}

/// Client API over a failover controller.
pub struct ClientApi {
    controller: Arc<FailoverController>,
}

impl ClientApi {
    /// Create the API.
    pub fn new(controller: Arc<FailoverController>) -> Self {
        Self { controller }
    }

    /// Read every item from the active region.
    pub async fn read(&self) -> ApiResponse {
        let endpoint = self.controller.route();
        let response = match endpoint.handle_read().await {
            Ok(items) => {
                let views: Vec<ItemView> = items.iter().map(ItemView::from).collect();
                ApiResponse::json(200, json!(views))
            }
            Err(e) => ApiResponse::from_error(&e),
        };
        response.mark_degraded(self.controller.is_degraded())
    }

    /// Write one item to the active region.
    pub async fn write(&self, body: &[u8]) -> ApiResponse {
        let request = match WriteRequest::parse(body) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "rejected write request");
                return ApiResponse::from_error(&e);
            }
        };

        let payload = match serde_json::to_vec(&request.payload) {
            Ok(bytes) => bytes,
            Err(e) => return ApiResponse::from_error(&Error::from(e)),
        };

        let endpoint = self.controller.route();
        let response = match endpoint.handle_write(&request.id, payload).await {
            Ok(_) => ApiResponse::json(200, json!({ "message": "ok" })),
            Err(e) => ApiResponse::from_error(&e),
        };
        response.mark_degraded(self.controller.is_degraded())
    }

    /// Health probe endpoint for one region. Read-only.
    pub async fn probe(&self, region: RegionId) -> ApiResponse {
        let status = self.controller.endpoint(region).probe().await;
        let code = match status {
            HealthStatus::Healthy => 200,
            HealthStatus::Unhealthy => 503,
        };
        ApiResponse::json(code, json!({ "region": region, "status": status }))
    }

    /// Current routing decision.
    pub fn status(&self) -> ApiResponse {
        let view = StatusView {
            decision: self.controller.current_status(),
            degraded: self.controller.is_degraded(),
        };
        match serde_json::to_value(&view) {
            Ok(body) => ApiResponse::json(200, body),
            Err(e) => ApiResponse::from_error(&Error::from(e)),
        }
    }
}
