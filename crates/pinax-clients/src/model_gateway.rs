use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ModelGatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("model gateway returned {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error("model gateway returned no choices")]
    EmptyChoices,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default, Clone, Copy)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// A chat-completion call with the two messages the extractor always sends,
/// returning the raw JSON string content plus token usage for cost
/// accounting.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn chat_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(String, Usage), ModelGatewayError>;
}

/// Generic OpenAI-chat-compatible adapter. Works against DeepInfra, OpenAI,
/// or any self-hosted gateway exposing the same `/chat/completions` shape.
pub struct ModelGatewayClient {
    client: Client,
    api_url: String,
    api_key: String,
    model_name: String,
}

impl ModelGatewayClient {
    pub fn new(api_url: String, api_key: String, model_name: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("failed to build model gateway http client"),
            api_url,
            api_key,
            model_name,
        }
    }
}

#[async_trait]
impl ModelGateway for ModelGatewayClient {
    async fn chat_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<(String, Usage), ModelGatewayError> {
        let request_body = ChatCompletionRequest {
            model: &self.model_name,
            messages: vec![
                ChatCompletionMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatCompletionMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: 0.2,
            max_tokens: 1024,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await
            .map_err(|e| ModelGatewayError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelGatewayError::BadStatus { status, body });
        }

        let body: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ModelGatewayError::Transport(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or(ModelGatewayError::EmptyChoices)?;

        Ok((
            choice.message.content.unwrap_or_default(),
            body.usage.unwrap_or_default(),
        ))
    }
}

/// `input cost $0.075/M, output cost $0.2/M` per the model gateway contract.
pub fn estimate_cost_usd(usage: Usage) -> f64 {
    const INPUT_PER_MILLION: f64 = 0.075;
    const OUTPUT_PER_MILLION: f64 = 0.2;
    (usage.prompt_tokens as f64 / 1_000_000.0) * INPUT_PER_MILLION
        + (usage.completion_tokens as f64 / 1_000_000.0) * OUTPUT_PER_MILLION
}
