use async_trait::async_trait;
use docrelay_common::{DocrelayError, Result};
use serde::{Deserialize, Serialize};

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenUsage, provider_failure};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 2048;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    messages: Vec<MessageParam<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct MessageParam<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

pub struct AnthropicClient {
    model: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            http_client: reqwest::Client::new(),
        }
    }

    fn build_body<'a>(&'a self, request: &'a LlmRequest) -> MessagesRequest<'a> {
        // System turns travel in the top-level `system` field.
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| MessageParam {
                role: if m.role == Role::Assistant { "assistant" } else { "user" },
                content: &m.content,
            })
            .collect();

        MessagesRequest {
            model: &self.model,
            messages,
            system: request.system_prompt.as_deref(),
            temperature: request.temperature,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let response = self
            .http_client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_body(&request))
            .send()
            .await
            .map_err(|e| DocrelayError::Llm(format!("Anthropic request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(provider_failure("anthropic", response).await);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| DocrelayError::Llm(format!("Failed to parse Anthropic response: {e}")))?;

        let content = parsed
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .map(|block| block.text)
            .collect::<String>();

        Ok(LlmResponse {
            content,
            model: parsed.model,
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.input_tokens,
                completion_tokens: u.output_tokens,
            }),
            finish_reason: parsed.stop_reason,
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    #[test]
    fn system_prompt_is_top_level() {
        let client = AnthropicClient::new("claude-sonnet-4-20250514".into(), "key".into());
        let request = LlmRequest {
            system_prompt: Some("Pick one tool.".into()),
            messages: vec![
                ChatMessage::user("Upload a.pdf"),
                ChatMessage::assistant("{\"tool\":\"x\"}"),
                ChatMessage {
                    role: Role::System,
                    content: "ignored".into(),
                },
            ],
            temperature: None,
            max_tokens: None,
        };

        let json = serde_json::to_value(client.build_body(&request)).unwrap();
        assert_eq!(json["system"], "Pick one tool.");
        assert_eq!(json["max_tokens"], DEFAULT_MAX_TOKENS);
        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }
}
