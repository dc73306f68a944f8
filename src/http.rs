//! HTTP client for the road-status backend.
//!
//! One pooled `reqwest::Client` serves all three endpoints:
//! - `POST /segment/map`: base64 segment payload for a bounding box
//! - `POST /notifications/gps`: notifications near a coordinate
//! - `GET /notifications/user`: the user's notification history
//!
//! The access token is owned by the auth layer and pushed in through
//! [`ApiClient::set_access_token`]. It is sent verbatim in `Authorization`.
//! Failures are reported once; the next natural trigger is the retry.

use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{DecodeStage, Result, SyncError};
use crate::notifications::{NotificationEvent, NotificationSource};
use crate::segments::SegmentSource;
use crate::types::{BoundingBox, GeoPoint};

/// Helper to calculate elapsed milliseconds from an Instant
#[inline]
fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[derive(Debug, Deserialize)]
struct SegmentEnvelope {
    data: String,
}

#[derive(Debug, Serialize)]
struct GpsQuery {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

pub struct ApiClient {
    client: Client,
    segment_url: String,
    gps_url: String,
    user_url: String,
    access_token: RwLock<Option<String>>,
}

impl ApiClient {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        info!("[ApiClient] Created for {}", config.api_base_url);
        Ok(Self {
            client,
            segment_url: config.endpoint("/segment/map"),
            gps_url: config.endpoint("/notifications/gps"),
            user_url: config.endpoint("/notifications/user"),
            access_token: RwLock::new(None),
        })
    }

    /// Replace the session token; `None` signs the client out.
    pub fn set_access_token(&self, token: Option<String>) {
        let token = token.filter(|t| !t.is_empty());
        let signed_in = token.is_some();
        *self
            .access_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
        debug!("[ApiClient] Access token {}", if signed_in { "set" } else { "cleared" });
    }

    fn token(&self) -> Option<String> {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn with_optional_auth(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token() {
            Some(token) => request.header("Authorization", token),
            None => request,
        }
    }

    fn with_required_auth(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.token().ok_or(SyncError::Unauthenticated)?;
        Ok(request.header("Authorization", token))
    }

    /// Send, map transport failures and non-2xx responses.
    async fn send(&self, label: &str, request: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let response = request.send().await.map_err(|e| {
            warn!("[ApiClient {}] Request failed after {} ms: {}", label, elapsed_ms(start), e);
            SyncError::network(e.to_string())
        })?;

        let status = response.status();
        debug!("[ApiClient {}] HTTP {} headers in {} ms", label, status, elapsed_ms(start));

        if status.is_success() {
            return Ok(response);
        }

        // Prefer the backend's {"error": "..."} message over the status text
        let fallback = status.canonical_reason().unwrap_or("request failed").to_string();
        let message = match response.bytes().await {
            Ok(body) => serde_json::from_slice::<ErrorBody>(&body)
                .ok()
                .and_then(|b| b.error)
                .unwrap_or(fallback),
            Err(_) => fallback,
        };
        warn!("[ApiClient {}] HTTP {}: {}", label, status, message);
        Err(SyncError::Network {
            message,
            status_code: Some(status.as_u16()),
        })
    }

    async fn read_json<T: DeserializeOwned>(&self, label: &str, response: Response) -> Result<T> {
        let body_start = Instant::now();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::network(format!("Body download error: {}", e)))?;
        let body_ms = elapsed_ms(body_start);

        let json_start = Instant::now();
        let parsed = serde_json::from_slice(&bytes).map_err(|e| SyncError::decode(DecodeStage::Json, e))?;
        debug!(
            "[ApiClient {}] body={}ms ({:.1}KB) json={}ms",
            label,
            body_ms,
            bytes.len() as f64 / 1024.0,
            elapsed_ms(json_start)
        );
        Ok(parsed)
    }
}

impl SegmentSource for ApiClient {
    async fn fetch_segment_payload(&self, bbox: BoundingBox) -> Result<String> {
        let request = self.with_optional_auth(self.client.post(&self.segment_url).json(&bbox));
        let response = self.send("segments", request).await?;
        let envelope: SegmentEnvelope = self.read_json("segments", response).await?;
        Ok(envelope.data)
    }
}

impl NotificationSource for ApiClient {
    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    async fn notifications_near(&self, point: GeoPoint) -> Result<Vec<NotificationEvent>> {
        let body = GpsQuery {
            lat: point.latitude,
            lon: point.longitude,
        };
        let request = self.with_required_auth(self.client.post(&self.gps_url).json(&body))?;
        let response = self.send("gps", request).await?;
        self.read_json("gps", response).await
    }

    async fn user_notifications(&self) -> Result<Vec<NotificationEvent>> {
        let request = self.with_required_auth(self.client.get(&self.user_url))?;
        let response = self.send("user", request).await?;
        self.read_json("user", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ApiClient {
        ApiClient::new(&SyncConfig::with_base_url("http://127.0.0.1:9/")).unwrap()
    }

    #[test]
    fn test_endpoint_urls() {
        let api = client();
        assert_eq!(api.segment_url, "http://127.0.0.1:9/segment/map");
        assert_eq!(api.gps_url, "http://127.0.0.1:9/notifications/gps");
        assert_eq!(api.user_url, "http://127.0.0.1:9/notifications/user");
    }

    #[test]
    fn test_token_lifecycle() {
        let api = client();
        assert!(!api.is_authenticated());

        api.set_access_token(Some("abc".to_string()));
        assert!(api.is_authenticated());

        api.set_access_token(Some(String::new()));
        assert!(!api.is_authenticated());

        api.set_access_token(Some("abc".to_string()));
        api.set_access_token(None);
        assert!(!api.is_authenticated());
    }

    #[tokio::test]
    async fn test_notifications_require_token_without_request() {
        let api = client();
        assert!(matches!(
            api.notifications_near(GeoPoint::new(10.8, 106.7)).await,
            Err(SyncError::Unauthenticated)
        ));
        assert!(matches!(
            api.user_notifications().await,
            Err(SyncError::Unauthenticated)
        ));
    }

    #[test]
    fn test_gps_body_shape() {
        let json = serde_json::to_value(GpsQuery { lat: 10.8, lon: 106.7 }).unwrap();
        assert_eq!(json, serde_json::json!({"lat": 10.8, "lon": 106.7}));
    }

    #[test]
    fn test_error_body_parsing() {
        let body: ErrorBody = serde_json::from_str(r#"{"error":"Invalid token"}"#).unwrap();
        assert_eq!(body.error.as_deref(), Some("Invalid token"));
        let body: ErrorBody = serde_json::from_str("{}").unwrap();
        assert!(body.error.is_none());
    }
}
