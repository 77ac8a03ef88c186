//! Provider adapters for [`LlmClient`]. Exactly one is active, chosen at
//! startup from [`LlmConfig::provider`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use bazaar_core::config::{LlmConfig, LlmProvider};

use crate::llm::{LlmClient, LlmError};

pub mod anthropic;
pub mod gemini;
pub mod openai;

pub use anthropic::AnthropicClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiCompatibleClient;

const MAX_ERROR_BODY_CHARS: usize = 512;

pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    if config.provider.requires_api_key() && config.api_key.is_none() {
        return Err(LlmError::Configuration(format!(
            "provider `{}` requires an api key",
            config.provider.as_str()
        )));
    }
    let http = http_client(config.timeout_secs)?;

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::OpenAi | LlmProvider::Mistral | LlmProvider::Ollama => {
            Arc::new(OpenAiCompatibleClient::new(http, config))
        }
        LlmProvider::Anthropic => Arc::new(AnthropicClient::new(http, config)),
        LlmProvider::Gemini => Arc::new(GeminiClient::new(http, config)),
    };
    debug!(
        event_name = "agent.llm.client_built",
        provider = config.provider.as_str(),
        model = %config.model,
        "llm client built"
    );
    Ok(client)
}

fn http_client(timeout_secs: u64) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|error| LlmError::Configuration(error.to_string()))
}

/// Sends the request and returns the decoded JSON body of a 2xx response.
async fn send_json(request: RequestBuilder) -> Result<Value, LlmError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }
    Ok(response.json::<Value>().await?)
}
