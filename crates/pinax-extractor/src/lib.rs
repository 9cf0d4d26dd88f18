pub mod postprocess;
pub mod prompt;
pub mod validator;

use pinax_clients::model_gateway::estimate_cost_usd;
use pinax_clients::{ModelGateway, ModelGatewayError};
use pinax_types::{ContextBundle, ExtractionError, LLMError, ParseError, PinaxRecord, ValidationReport};
use std::sync::Arc;

pub use postprocess::{normalize_date, normalize_type};
pub use validator::validate;

fn map_gateway_error(err: ModelGatewayError) -> LLMError {
    match err {
        ModelGatewayError::Transport(msg) => LLMError::Transport(msg),
        ModelGatewayError::BadStatus { status, body } => LLMError::BadStatus { status, body },
        ModelGatewayError::EmptyChoices => LLMError::EmptyChoices,
    }
}

/// The three-step pipeline described in the component design: assemble
/// prompts, call the model gateway, then post-process and validate.
pub struct Extractor {
    gateway: Arc<dyn ModelGateway>,
}

impl Extractor {
    pub fn new(gateway: Arc<dyn ModelGateway>) -> Self {
        Self { gateway }
    }

    pub async fn extract(
        &self,
        bundle: &ContextBundle,
        custom_prompt: Option<&str>,
        overrides: Option<&PinaxRecord>,
        request_access_url: Option<&str>,
    ) -> Result<(PinaxRecord, ValidationReport), ExtractionError> {
        let system_prompt = prompt::build_system_prompt(custom_prompt);
        let user_prompt = prompt::build_user_prompt(bundle);

        let (content, usage) = self
            .gateway
            .chat_json(&system_prompt, &user_prompt)
            .await
            .map_err(|e| ExtractionError::Llm(map_gateway_error(e)))?;

        tracing::debug!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            cost_usd = estimate_cost_usd(usage),
            "model gateway call complete"
        );

        let value: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| ExtractionError::Parse(ParseError::InvalidJson(e.to_string())))?;
        if !value.is_object() {
            return Err(ExtractionError::Parse(ParseError::NotAnObject));
        }
        let model_record: PinaxRecord = serde_json::from_value(value)
            .map_err(|e| ExtractionError::Parse(ParseError::InvalidJson(e.to_string())))?;

        let merged = postprocess::apply_overrides(model_record, overrides);
        let finalized = postprocess::finalize(merged, request_access_url);
        let report = validator::validate(&finalized);

        Ok((finalized, report))
    }
}
