use super::tools::{ToolCall, ToolDefinition};
use super::{ChatModel, ChatReply, ChatRequest, Message};
use crate::config::ModelConfig;
use crate::error::AgentError;
use crate::util::{sanitize_error_body, truncate};
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rate limit retry configuration
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;
const BACKOFF_MULTIPLIER: u64 = 2;
const MAX_RETRY_AFTER_SECS: u64 = 60;

/// Azure OpenAI chat-completions client.
pub struct AzureChatClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    initial_backoff: Duration,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl AzureChatClient {
    pub fn new(
        endpoint: &str,
        deployment: &str,
        api_version: &str,
        api_key: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint.trim_end_matches('/'),
            deployment,
            api_version
        );
        Ok(Self {
            http,
            url,
            api_key: api_key.to_string(),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn from_config(config: &ModelConfig) -> crate::error::Result<Self> {
        let missing =
            |name: &str| AgentError::Config(format!("missing required setting `model.{}`", name));
        let endpoint = config.endpoint.as_deref().ok_or_else(|| missing("endpoint"))?;
        let deployment = config
            .deployment
            .as_deref()
            .ok_or_else(|| missing("deployment"))?;
        let api_key = config.api_key.as_deref().ok_or_else(|| missing("api_key"))?;
        Self::new(
            endpoint,
            deployment,
            &config.api_version,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
        .map_err(|e| AgentError::Config(e.to_string()))
    }

    #[cfg(test)]
    fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    fn backoff_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        match retry_after {
            Some(secs) if secs > 0 && secs <= MAX_RETRY_AFTER_SECS => Duration::from_secs(secs),
            _ => self.initial_backoff * BACKOFF_MULTIPLIER.pow(attempt.saturating_sub(1)) as u32,
        }
    }
}

#[async_trait]
impl ChatModel for AzureChatClient {
    /// Includes automatic retry with exponential backoff for rate limits
    async fn complete(&self, request: ChatRequest) -> anyhow::Result<ChatReply> {
        let has_tools = !request.tools.is_empty();
        let body = WireRequest {
            messages: &request.messages,
            tools: has_tools.then_some(request.tools.as_slice()),
            tool_choice: has_tools.then_some("auto"),
            temperature: request.temperature,
        };

        let mut retry_count = 0;
        loop {
            let response = self
                .http
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("api-key", &self.api_key)
                .json(&body)
                .send()
                .await
                .context("Failed to reach the model endpoint")?;

            let status = response.status();
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await?;

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to parse model response: {} ({})",
                        e,
                        truncate(&text, 200)
                    )
                })?;
                let choice = parsed
                    .choices
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("No response from model"))?;
                return Ok(ChatReply {
                    content: choice.message.content,
                    tool_calls: choice.message.tool_calls.unwrap_or_default(),
                });
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = self.backoff_for(retry_count, retry_after);
                tracing::warn!(
                    "Model endpoint rate limited. Retrying in {:?} (attempt {}/{})",
                    wait,
                    retry_count,
                    MAX_RETRIES
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| sanitize_error_body(&e.error.message))
                .unwrap_or_else(|_| sanitize_error_body(&text));
            let message = match status.as_u16() {
                401 | 403 => "Model endpoint rejected the API key.".to_string(),
                429 => format!("Rate limited after {} retries: {}", retry_count, detail),
                500..=599 => format!("Model service error ({}): {}", status, detail),
                _ => format!("Model API error {}: {}", status, detail),
            };
            return Err(anyhow::anyhow!("{}", message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::intent_tool_definitions;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> AzureChatClient {
        AzureChatClient::new(
            &server.uri(),
            "gpt-4o",
            "2024-06-01",
            "test-key",
            Duration::from_secs(5),
        )
        .unwrap()
        .with_initial_backoff(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_text_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(query_param("api-version", "2024-06-01"))
            .and(header("api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Which application?"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server)
            .complete(ChatRequest::new(vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(reply.text_content(), Some("Which application?"));
        assert!(reply.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn test_tool_call_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "check_status",
                            "arguments": "{\"application_name\":\"PaymentService\"}"
                        }
                    }]
                }}]
            })))
            .mount(&server)
            .await;

        let request = ChatRequest::new(vec![Message::user("check PaymentService")])
            .with_tools(intent_tool_definitions());
        let reply = client_for(&server).complete(request).await.unwrap();
        assert!(reply.text_content().is_none());
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].function.name, "check_status");
    }

    #[tokio::test]
    async fn test_tools_are_sent_with_auto_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let request = ChatRequest::new(vec![Message::user("x")])
            .with_tools(intent_tool_definitions())
            .with_temperature(0.2);
        client_for(&server).complete(request).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["tools"].as_array().unwrap().len(), 3);
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_plain_request_omits_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        client_for(&server)
            .complete(ChatRequest::new(vec![Message::user("x")]))
            .await
            .unwrap();
        let received = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "done"}}]
            })))
            .mount(&server)
            .await;

        let reply = client_for(&server)
            .complete(ChatRequest::new(vec![Message::user("x")]))
            .await
            .unwrap();
        assert_eq!(reply.text_content(), Some("done"));
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": {"message": "Access denied due to invalid subscription key"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .complete(ChatRequest::new(vec![Message::user("x")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rejected the API key"));
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let err = AzureChatClient::from_config(&ModelConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("model.endpoint"));
    }
}
