//! `OpenAI` and `OpenAI`-compatible provider implementation

use super::stream::{SseDecoder, StreamEvent};
use super::types::{LlmMessage, LlmRequest, LlmResponse, MessageRole, ResponseSchema, Usage};
use super::{LlmError, LlmService, TextStream};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible chat completions service
pub struct OpenAIService {
    client: Client,
    api_key: String,
    api_name: String,
    model_id: String,
    context_window: usize,
    endpoint: String,
}

impl OpenAIService {
    /// Create a service for one model. `base_url` points at an
    /// OpenAI-compatible gateway; `None` talks to api.openai.com.
    pub fn new(
        api_key: String,
        model_id: &str,
        api_name: &str,
        context_window: usize,
        base_url: Option<&str>,
    ) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');

        Ok(Self {
            client,
            api_key,
            api_name: api_name.to_string(),
            model_id: model_id.to_string(),
            context_window,
            endpoint: format!("{base}/chat/completions"),
        })
    }

    fn translate_request(&self, request: &LlmRequest, stream: bool) -> OpenAIRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);

        if !request.system.is_empty() {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: Some(request.system_text()),
            });
        }
        messages.extend(request.messages.iter().map(Self::translate_message));

        OpenAIRequest {
            model: self.api_name.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            response_format: request.response_schema.as_ref().map(Self::translate_schema),
            stream,
        }
    }

    fn translate_message(msg: &LlmMessage) -> OpenAIMessage {
        let role = match msg.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        OpenAIMessage {
            role: role.to_string(),
            content: Some(msg.text.clone()),
        }
    }

    fn translate_schema(schema: &ResponseSchema) -> OpenAIResponseFormat {
        OpenAIResponseFormat {
            r#type: "json_schema".to_string(),
            json_schema: OpenAIJsonSchema {
                name: schema.name.clone(),
                schema: schema.schema.clone(),
                strict: true,
            },
        }
    }

    fn normalize_response(resp: OpenAIResponse) -> Result<LlmResponse, LlmError> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::unknown("No choices in response"))?;

        let end_turn = choice.finish_reason.as_deref() == Some("stop");
        let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
            input_tokens: u64::from(u.prompt_tokens),
            output_tokens: u64::from(u.completion_tokens),
        });

        Ok(LlmResponse {
            text: choice.message.content.unwrap_or_default(),
            end_turn,
            usage,
        })
    }

    async fn send(&self, body: &OpenAIRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
        Err(Self::classify_failure(status.as_u16(), &body))
    }

    fn classify_failure(status: u16, body: &str) -> LlmError {
        match serde_json::from_str::<OpenAIErrorResponse>(body) {
            Ok(error_resp) => LlmError::from_status(status, &error_resp.error.message),
            Err(_) => LlmError::from_status(status, body),
        }
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let openai_request = self.translate_request(request, false);
        let response = self.send(&openai_request).await?;

        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;

        let openai_response: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::normalize_response(openai_response)
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<TextStream, LlmError> {
        let openai_request = self.translate_request(request, true);
        let response = self.send(&openai_request).await?;

        let state = StreamState {
            bytes: Box::pin(response.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let text = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }

                let events = match state.bytes.next().await {
                    Some(Ok(chunk)) => state.decoder.push(&chunk),
                    Some(Err(e)) => {
                        state.done = true;
                        Err(LlmError::network(format!("Stream interrupted: {e}")))
                    }
                    None => {
                        state.done = true;
                        state.decoder.finish()
                    }
                };

                match events {
                    Ok(events) => {
                        for event in events {
                            match event {
                                StreamEvent::Text(text) => state.pending.push_back(Ok(text)),
                                StreamEvent::Done => state.done = true,
                            }
                        }
                    }
                    Err(e) => {
                        state.done = true;
                        state.pending.push_back(Err(e));
                    }
                }
            }
        });

        Ok(Box::pin(text))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn context_window(&self) -> usize {
        self.context_window
    }
}

struct StreamState<S> {
    bytes: S,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    done: bool,
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAIResponseFormat {
    r#type: String,
    json_schema: OpenAIJsonSchema,
}

#[derive(Debug, Serialize)]
struct OpenAIJsonSchema {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[allow(clippy::struct_field_names)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::error::LlmErrorKind;
    use serde_json::json;

    fn service(base_url: Option<&str>) -> OpenAIService {
        OpenAIService::new("key".to_string(), "gpt-4o", "gpt-4o", 128_000, base_url).unwrap()
    }

    #[test]
    fn test_endpoint_uses_gateway_base() {
        assert_eq!(
            service(None).endpoint,
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            service(Some("http://localhost:4000/v1/")).endpoint,
            "http://localhost:4000/v1/chat/completions"
        );
    }

    #[test]
    fn test_translate_request_with_schema() {
        let request = LlmRequest::with_instructions("Judge the answer")
            .user_input("my answer")
            .temperature(0.2)
            .max_tokens(512)
            .schema(ResponseSchema::new(
                "answer_evaluation",
                json!({"type": "object"}),
            ));

        let body = serde_json::to_value(service(None).translate_request(&request, false)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "my answer");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["name"],
            "answer_evaluation"
        );
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_plain_request_omits_response_format() {
        let request = LlmRequest::with_instructions("Talk");
        let body = serde_json::to_value(service(None).translate_request(&request, true)).unwrap();
        assert!(body.get("response_format").is_none());
        assert!(body.get("temperature").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_normalize_response() {
        let resp: OpenAIResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 2, "total_tokens": 12}
        }))
        .unwrap();
        let normalized = OpenAIService::normalize_response(resp).unwrap();
        assert_eq!(normalized.text, "Hi");
        assert!(normalized.end_turn);
        assert_eq!(normalized.usage.input_tokens, 10);
    }

    #[test]
    fn test_empty_choices_is_error() {
        let resp: OpenAIResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(OpenAIService::normalize_response(resp).is_err());
    }

    #[test]
    fn test_classify_failure() {
        let err = OpenAIService::classify_failure(
            429,
            r#"{"error":{"message":"slow down","type":"rate_limit"}}"#,
        );
        assert_eq!(err.kind, LlmErrorKind::RateLimit);
        assert!(err.message.contains("slow down"));

        let err = OpenAIService::classify_failure(502, "<html>bad gateway</html>");
        assert_eq!(err.kind, LlmErrorKind::ServerError);
    }
}
