//! The one-shot offer/answer exchange that bootstraps the realtime connection.

use crate::error::SignalingError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{info, warn};

/// Content type identifying a session description payload.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Exchanges a local session description for the remote one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Signaling: Send + Sync {
    /// Posts `local_description` and returns the remote description text.
    ///
    /// A single attempt is made; retrying is the caller's decision.
    async fn negotiate(
        &self,
        api_key: &str,
        local_description: &str,
    ) -> Result<String, SignalingError>;
}

/// `Signaling` over a plain HTTP POST to the realtime endpoint.
pub struct HttpSignalingClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSignalingClient {
    /// Creates a client posting to `endpoint` (including any model query).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint)
    }

    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    /// Builds the endpoint URL for a realtime base URL and model name.
    pub fn endpoint_for(base_url: &str, model: &str) -> String {
        format!("{}?model={}", base_url.trim_end_matches('/'), model)
    }
}

#[async_trait]
impl Signaling for HttpSignalingClient {
    async fn negotiate(
        &self,
        api_key: &str,
        local_description: &str,
    ) -> Result<String, SignalingError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .body(local_description.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Signaling endpoint rejected the offer");
            return Err(SignalingError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let answer = response.text().await?;
        if answer.trim().is_empty() {
            return Err(SignalingError::EmptyDescription);
        }
        info!(status = %status, "Received remote session description");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::HeaderMap, http::StatusCode, routing::post};
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base: &str) -> HttpSignalingClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        HttpSignalingClient::with_client(
            http,
            HttpSignalingClient::endpoint_for(&format!("{}/v1/realtime", base), "test-model"),
        )
    }

    #[test]
    fn test_endpoint_for_appends_model() {
        assert_eq!(
            HttpSignalingClient::endpoint_for("https://api.openai.com/v1/realtime/", "m1"),
            "https://api.openai.com/v1/realtime?model=m1"
        );
    }

    #[tokio::test]
    async fn test_negotiate_posts_offer_with_credentials() {
        let seen: Arc<Mutex<Option<(HeaderMap, String)>>> = Arc::new(Mutex::new(None));
        let recorder = seen.clone();
        let router = Router::new().route(
            "/v1/realtime",
            post(move |headers: HeaderMap, body: String| {
                let recorder = recorder.clone();
                async move {
                    *recorder.lock().unwrap() = Some((headers, body));
                    (StatusCode::CREATED, "v=0\r\ns=answer\r\n")
                }
            }),
        );
        let base = serve(router).await;

        let answer = client(&base)
            .negotiate("sk-test", "v=0\r\ns=offer\r\n")
            .await
            .unwrap();
        assert_eq!(answer, "v=0\r\ns=answer\r\n");

        let (headers, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(headers["authorization"], "Bearer sk-test");
        assert_eq!(headers["content-type"], SDP_CONTENT_TYPE);
        assert_eq!(body, "v=0\r\ns=offer\r\n");
    }

    #[tokio::test]
    async fn test_negotiate_non_success_is_status_error() {
        let router = Router::new().route(
            "/v1/realtime",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream down") }),
        );
        let base = serve(router).await;

        let err = client(&base).negotiate("sk-test", "offer").await.unwrap_err();
        match err {
            SignalingError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream down");
            }
            other => panic!("Expected Status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_negotiate_empty_body_is_error() {
        let router = Router::new().route("/v1/realtime", post(|| async { "  \n" }));
        let base = serve(router).await;

        let err = client(&base).negotiate("sk-test", "offer").await.unwrap_err();
        assert!(matches!(err, SignalingError::EmptyDescription));
    }
}
