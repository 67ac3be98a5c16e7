use std::time::Duration;

use reqwest::{header::AUTHORIZATION, StatusCode};
use tracing::{debug, error};
use url::Url;

use crate::{
    error::ApiError,
    models::{PushSubscriptionRecord, TestNotification},
};

/// Client for the push backend's registration and send endpoints.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ApiError> {
        // Validate once so request building never sees a bad base.
        Url::parse(base)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// POSTs the subscription record to `{base}/subscribe`. Any non-2xx
    /// status is an error.
    pub async fn register(&self, record: &PushSubscriptionRecord) -> Result<(), ApiError> {
        let url = format!("{}/subscribe", self.base);
        let response = self.client.post(&url).json(record).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!("subscription registered at {url}");
            Ok(())
        } else {
            error!("registration rejected with {status}");
            Err(ApiError::Status(status))
        }
    }

    /// POSTs a test notification to `{base}/send` and returns the status.
    /// The response body is never read.
    pub async fn send(
        &self,
        notification: &TestNotification,
        bearer: Option<&str>,
    ) -> Result<StatusCode, ApiError> {
        let url = format!("{}/send", self.base);
        let mut request = self.client.post(&url).json(notification);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        Ok(request.send().await?.status())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::PushKeys;
    use axum::{extract::State, http::HeaderMap, routing::post, Json, Router};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    /// What the in-process backend saw.
    #[derive(Default)]
    pub(crate) struct Recorded {
        pub subscribes: Vec<Value>,
        pub sends: Vec<(Option<String>, Value)>,
    }

    #[derive(Clone)]
    struct Backend {
        recorded: Arc<Mutex<Recorded>>,
        status: axum::http::StatusCode,
    }

    async fn subscribe(State(backend): State<Backend>, Json(body): Json<Value>) -> axum::http::StatusCode {
        backend.recorded.lock().await.subscribes.push(body);
        backend.status
    }

    async fn send(
        State(backend): State<Backend>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> axum::http::StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        backend.recorded.lock().await.sends.push((auth, body));
        backend.status
    }

    /// Starts a backend answering every request with `status` and returns
    /// its base URL.
    pub(crate) async fn spawn_backend(status: u16) -> (String, Arc<Mutex<Recorded>>) {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let backend = Backend {
            recorded: recorded.clone(),
            status: axum::http::StatusCode::from_u16(status).unwrap(),
        };
        let app = Router::new()
            .route("/api/subscribe", post(subscribe))
            .route("/api/send", post(send))
            .with_state(backend);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/api/"), recorded)
    }

    fn record() -> PushSubscriptionRecord {
        PushSubscriptionRecord {
            endpoint: "https://push.example/e1".to_string(),
            keys: PushKeys {
                p256dh: "cA==".to_string(),
                auth: "YQ==".to_string(),
            },
        }
    }

    #[test]
    fn new_rejects_invalid_base() {
        assert!(ApiClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn register_posts_record_shape() {
        let (base, recorded) = spawn_backend(201).await;
        let client = ApiClient::new(&base, Duration::from_secs(5)).unwrap();
        client.register(&record()).await.unwrap();

        let recorded = recorded.lock().await;
        assert_eq!(recorded.subscribes, vec![serde_json::to_value(record()).unwrap()]);
    }

    #[tokio::test]
    async fn register_maps_non_success_to_status_error() {
        let (base, _) = spawn_backend(500).await;
        let client = ApiClient::new(&base, Duration::from_secs(5)).unwrap();
        let err = client.register(&record()).await.unwrap_err();
        assert!(matches!(err, ApiError::Status(status) if status.as_u16() == 500));
    }

    #[tokio::test]
    async fn send_attaches_bearer_token() {
        let (base, recorded) = spawn_backend(200).await;
        let client = ApiClient::new(&base, Duration::from_secs(5)).unwrap();
        let status = client
            .send(&TestNotification::new("t", "b", 1), Some("secret"))
            .await
            .unwrap();
        assert!(status.is_success());

        let recorded = recorded.lock().await;
        assert_eq!(recorded.sends[0].0.as_deref(), Some("Bearer secret"));
        assert_eq!(recorded.sends[0].1["tag"], "admin-notification");
    }
}
