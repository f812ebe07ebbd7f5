use crate::error::CompletionRequestError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Who a chat message is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

/// One entry of the message list sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A stateless request/response client for a completion endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Sends `messages` and returns the reply text.
    ///
    /// A reply without `choices[0].message.content` yields an empty string.
    async fn complete(
        &self,
        api_key: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, CompletionRequestError>;
}

/// An implementation of `CompletionClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The full chat completions URL.
    /// * `model` - The model identifier to request (e.g., "gpt-4o-mini").
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), endpoint, model)
    }

    pub fn with_client(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    fn to_request_messages(
        messages: Vec<ChatMessage>,
    ) -> Result<Vec<ChatCompletionRequestMessage>, CompletionRequestError> {
        messages
            .into_iter()
            .map(|msg| -> Result<ChatCompletionRequestMessage, CompletionRequestError> {
                Ok(match msg.role {
                    ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(msg.content)
                        .build()?
                        .into(),
                    ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(msg.content)
                        .build()?
                        .into(),
                })
            })
            .collect()
    }
}

/// Reads `choices[0].message.content`, treating anything else as empty.
pub fn extract_content(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_default()
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete(
        &self,
        api_key: &str,
        messages: Vec<ChatMessage>,
    ) -> Result<String, CompletionRequestError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::to_request_messages(messages)?)
            .build()?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.model, "Completion request failed");
            return Err(CompletionRequestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let content = extract_content(&body);
        if content.is_empty() {
            debug!("Completion reply carried no message content");
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, http::StatusCode, routing::post};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    fn client(endpoint: &str) -> OpenAICompatibleClient {
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        OpenAICompatibleClient::with_client(http, endpoint, "gpt-4o-mini")
    }

    #[test]
    fn test_extract_content_reads_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Q1\nQ2"}}]}"#;
        assert_eq!(extract_content(body), "Q1\nQ2");
    }

    #[test]
    fn test_extract_content_missing_or_malformed_is_empty() {
        assert_eq!(extract_content(r#"{"choices":[]}"#), "");
        assert_eq!(extract_content(r#"{"choices":[{"message":{}}]}"#), "");
        assert_eq!(
            extract_content(r#"{"choices":[{"message":{"content":null}}]}"#),
            ""
        );
        assert_eq!(extract_content("<html>oops</html>"), "");
    }

    #[tokio::test]
    async fn test_complete_sends_model_and_messages() {
        let seen: Arc<Mutex<Option<(HeaderMap, serde_json::Value)>>> = Arc::new(Mutex::new(None));
        let recorder = seen.clone();
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let recorder = recorder.clone();
                async move {
                    *recorder.lock().unwrap() = Some((headers, body));
                    Json(json!({"choices": [{"message": {"role": "assistant", "content": "Отлично"}}]}))
                }
            }),
        );
        let endpoint = serve(router).await;

        let reply = client(&endpoint)
            .complete(
                "sk-test",
                vec![ChatMessage::system("sys"), ChatMessage::user("usr")],
            )
            .await
            .unwrap();
        assert_eq!(reply, "Отлично");

        let (headers, body) = seen.lock().unwrap().take().unwrap();
        assert_eq!(headers["authorization"], "Bearer sk-test");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "sys");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "usr");
    }

    #[tokio::test]
    async fn test_complete_non_success_is_error() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "invalid key") }),
        );
        let endpoint = serve(router).await;

        let err = client(&endpoint)
            .complete("bad", vec![ChatMessage::user("x")])
            .await
            .unwrap_err();
        match err {
            CompletionRequestError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid key");
            }
            other => panic!("Expected Status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_tolerates_unexpected_body() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|| async { Json(json!({"object": "chat.completion"})) }),
        );
        let endpoint = serve(router).await;

        let reply = client(&endpoint)
            .complete("sk-test", vec![ChatMessage::user("x")])
            .await
            .unwrap();
        assert_eq!(reply, "");
    }
}
