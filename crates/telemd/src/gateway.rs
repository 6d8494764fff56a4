//! Fetch gateway - reads the current value of one field from the data store.
//!
//! Production code uses `HttpGateway`, which queries the search service over
//! HTTP. Tests and offline runs use `FakeGateway` with scripted values.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use telem_shared::Scalar;
use tracing::debug;

use crate::state::StateTable;

/// Fetch failures. All of them are recovered locally by the refresh engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Store returned status {0}")]
    Status(u16),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Field unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the external store.
///
/// Implementations must be side-effect free from the caller's point of view;
/// the refresh engine calls `fetch` concurrently.
#[async_trait]
pub trait FetchGateway: Send + Sync {
    async fn fetch(&self, index: &str, field: &str) -> Result<Scalar, FetchError>;
}

// ============================================================================
// HTTP gateway (production)
// ============================================================================

pub struct HttpGateway {
    url: String,
    http: reqwest::Client,
}

impl HttpGateway {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("telemd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl FetchGateway for HttpGateway {
    async fn fetch(&self, index: &str, field: &str) -> Result<Scalar, FetchError> {
        let response = self
            .http
            .get(&self.url)
            .query(&[("index", index), ("field", field)])
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        debug!("Fetched {} from {}: {} bytes", field, index, body.len());

        Ok(Scalar::from_raw(&body))
    }
}

// ============================================================================
// Fake gateway (tests, offline mode)
// ============================================================================

#[derive(Default)]
struct FakeState {
    values: HashMap<String, Scalar>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    calls: Vec<String>,
}

/// In-memory gateway with scripted values, failures and delays
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every field with the value currently in `table`
    pub fn from_state(table: &StateTable) -> Self {
        let gateway = Self::new();
        for (key, value) in table.iter() {
            match value {
                telem_shared::PointValue::Scalar(scalar) => {
                    gateway.set(key.as_str(), scalar.clone());
                }
                telem_shared::PointValue::Composite(fields) => {
                    for (sub, scalar) in fields {
                        gateway.set(&key.field(sub), scalar.clone());
                    }
                }
            }
        }
        gateway
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self, field: &str, value: impl Into<Scalar>) {
        self.lock().values.insert(field.to_string(), value.into());
    }

    /// Make every fetch of `field` fail until `recover` is called
    pub fn fail(&self, field: &str) {
        self.lock().failing.insert(field.to_string());
    }

    pub fn recover(&self, field: &str) {
        self.lock().failing.remove(field);
    }

    /// Hold every fetch of `field` for `delay` before answering
    pub fn delay(&self, field: &str, delay: Duration) {
        self.lock().delays.insert(field.to_string(), delay);
    }

    /// Fields fetched so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }
}

#[async_trait]
impl FetchGateway for FakeGateway {
    async fn fetch(&self, _index: &str, field: &str) -> Result<Scalar, FetchError> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(field.to_string());
            state.delays.get(field).copied()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if state.failing.contains(field) {
            return Err(FetchError::Unavailable(field.to_string()));
        }
        state
            .values
            .get(field)
            .cloned()
            .ok_or_else(|| FetchError::Unavailable(field.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_gateway_scripted_values() {
        let gateway = FakeGateway::new();
        gateway.set("nav.heading", 12);

        assert_eq!(
            gateway.fetch("idx", "nav.heading").await.unwrap(),
            Scalar::Int(12)
        );
        assert!(matches!(
            gateway.fetch("idx", "nav.roll").await,
            Err(FetchError::Unavailable(_))
        ));

        gateway.fail("nav.heading");
        assert!(gateway.fetch("idx", "nav.heading").await.is_err());
        gateway.recover("nav.heading");
        assert!(gateway.fetch("idx", "nav.heading").await.is_ok());

        assert_eq!(gateway.call_count(), 4);
    }

    /// Serve a tiny search endpoint on an ephemeral port and return its URL
    async fn spawn_store() -> String {
        use axum::extract::Query;
        use axum::http::StatusCode;
        use axum::routing::get;
        use axum::Router;

        async fn search(Query(params): Query<HashMap<String, String>>) -> (StatusCode, String) {
            if params.get("index").map(String::as_str) != Some("statefield_report_1") {
                return (StatusCode::BAD_REQUEST, "unknown index".into());
            }
            match params.get("field").map(String::as_str) {
                Some("nav.heading") => (StatusCode::OK, "12".into()),
                Some("nav.power.voltage") => (StatusCode::OK, "5.2\n".into()),
                Some("nav.mode") => (StatusCode::OK, "STANDBY".into()),
                Some("nav.armed") => (StatusCode::OK, "true".into()),
                Some("nav.broken") => (StatusCode::SERVICE_UNAVAILABLE, "down".into()),
                _ => (StatusCode::NOT_FOUND, String::new()),
            }
        }

        let app = Router::new().route("/search-es", get(search));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/search-es", addr)
    }

    #[tokio::test]
    async fn test_http_gateway_against_store() {
        let url = spawn_store().await;
        let gateway = HttpGateway::new(url, Duration::from_secs(5)).unwrap();
        let index = "statefield_report_1";

        // Body decoding
        assert_eq!(gateway.fetch(index, "nav.heading").await.unwrap(), Scalar::Int(12));
        assert_eq!(
            gateway.fetch(index, "nav.power.voltage").await.unwrap(),
            Scalar::Float(5.2)
        );
        assert_eq!(
            gateway.fetch(index, "nav.mode").await.unwrap(),
            Scalar::Text("STANDBY".into())
        );
        assert_eq!(gateway.fetch(index, "nav.armed").await.unwrap(), Scalar::Bool(true));

        // Non-2xx statuses
        assert!(matches!(
            gateway.fetch(index, "nav.broken").await,
            Err(FetchError::Status(503))
        ));
        assert!(matches!(
            gateway.fetch(index, "nav.missing").await,
            Err(FetchError::Status(404))
        ));

        // The index travels in the query string
        assert!(matches!(
            gateway.fetch("other_index", "nav.heading").await,
            Err(FetchError::Status(400))
        ));
    }

    #[tokio::test]
    async fn test_http_gateway_unreachable_store() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gateway =
            HttpGateway::new(format!("http://{}/search-es", addr), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            gateway.fetch("idx", "nav.heading").await,
            Err(FetchError::Network(_))
        ));
    }
}
