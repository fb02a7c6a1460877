//! REST surface of the crosstalk relay.
//!
//! Thin reqwest wrapper; every endpoint returns typed DTOs. Device records
//! are passed through as raw JSON because the relay does not pin their shape.

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::error::ChatError;

/// Default context for suggestion requests.
pub const DEFAULT_SUGGESTION_CONTEXT: &str = "general";

const CLIENT_VERSION_HEADER: &str = "x-client-version";
const CLIENT_TYPE_HEADER: &str = "x-client-type";

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistoryResponse {
    pub messages: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcastResponse {
    pub success: bool,
    pub broadcast_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DevicesResponse {
    devices: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SuggestionsResponse {
    suggestions: Vec<String>,
}

/// HTTP client for one relay, cheap to clone.
///
/// Every request carries `x-client-version` and `x-client-type` headers so
/// the relay can attribute traffic per client build.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(server_url: &str, client_type: &str) -> Result<Self, ChatError> {
        reqwest::Url::parse(server_url)
            .map_err(|e| ChatError::Config(format!("bad server url: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            CLIENT_VERSION_HEADER,
            HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
        );
        headers.insert(
            CLIENT_TYPE_HEADER,
            HeaderValue::from_str(client_type)
                .map_err(|e| ChatError::Config(format!("bad client type: {e}")))?,
        );
        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self {
            http,
            base: server_url.trim_end_matches('/').to_string(),
        })
    }

    /// One-shot reachability probe.
    pub async fn health(&self) -> Result<HealthResponse, ChatError> {
        let resp = self.http.get(format!("{}/chat/health", self.base)).send().await?;
        Ok(check_status(resp)?.json().await?)
    }

    /// Open the server-push subscription for this device.
    ///
    /// Returns the raw response; the caller consumes its byte stream through
    /// the SSE parser.
    pub async fn open_stream(&self, device_id: &str) -> Result<reqwest::Response, ChatError> {
        let resp = self
            .http
            .get(format!("{}/chat/stream/{}", self.base, device_id))
            .header("accept", "text/event-stream")
            .send()
            .await?;
        check_status(resp)
    }

    /// Fetch message history; `limit` of `None` requests the full backlog.
    pub async fn history(
        &self,
        device_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<serde_json::Value>, ChatError> {
        let mut req = self.http.get(format!("{}/chat/history/{}", self.base, device_id));
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit)]);
        }
        let resp = req.send().await?;
        Ok(check_status(resp)?.json::<HistoryResponse>().await?.messages)
    }

    /// Post one outbound message.
    pub async fn broadcast(
        &self,
        message: &str,
        source_device_id: &str,
    ) -> Result<BroadcastResponse, ChatError> {
        let body = serde_json::json!({
            "message": message,
            "sourceDeviceId": source_device_id,
        });
        let resp = self
            .http
            .post(format!("{}/chat/broadcast", self.base))
            .json(&body)
            .send()
            .await?;
        Ok(check_status(resp)?.json().await?)
    }

    pub async fn devices(&self) -> Result<Vec<serde_json::Value>, ChatError> {
        let resp = self.http.get(format!("{}/chat/devices", self.base)).send().await?;
        Ok(check_status(resp)?.json::<DevicesResponse>().await?.devices)
    }

    pub async fn suggestions(
        &self,
        device_id: &str,
        context: &str,
    ) -> Result<Vec<String>, ChatError> {
        let body = serde_json::json!({ "context": context });
        let resp = self
            .http
            .post(format!("{}/chat/suggestions/{}", self.base, device_id))
            .json(&body)
            .send()
            .await?;
        Ok(check_status(resp)?
            .json::<SuggestionsResponse>()
            .await?
            .suggestions)
    }
}

fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    if resp.status().is_success() {
        Ok(resp)
    } else {
        Err(ChatError::Api {
            status: resp.status().as_u16(),
        })
    }
}
