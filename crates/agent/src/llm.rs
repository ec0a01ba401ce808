use std::time::Duration;

use async_trait::async_trait;
use callquote_core::config::{LlmConfig, LlmProvider};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;

/// What a completion is being asked to do. Offline models dispatch on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    ClassifyIntent,
    ExtractName,
    ExtractAddress,
    ExtractFrequency,
    ClassifyBookingReply,
    AnswerQuestion,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClassifyIntent => "classify_intent",
            Self::ExtractName => "extract_name",
            Self::ExtractAddress => "extract_address",
            Self::ExtractFrequency => "extract_frequency",
            Self::ClassifyBookingReply => "classify_booking_reply",
            Self::AnswerQuestion => "answer_question",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub task: TaskKind,
    /// Tenant facts and recent transcript.
    pub system: String,
    pub instructions: String,
    pub utterance: String,
    /// Allowed answers, when the task is a closed choice.
    pub options: Vec<String>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("language model transport failed: {0}")]
    Transport(String),
    #[error("language model returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("language model returned no completion text")]
    EmptyCompletion,
    #[error("language model is misconfigured: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Returns the JSON object inside `raw`, dropping code fences and surrounding prose.
pub fn strip_json_wrappers(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let unfenced = match trimmed.strip_prefix("```") {
        Some(rest) => {
            let body = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
            body.rsplit_once("```").map(|(inner, _)| inner).unwrap_or(body).trim()
        }
        None => trimmed,
    };

    let start = unfenced.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in unfenced[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&unfenced[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Chat-completions client for hosted or local models.
pub struct HttpLanguageModel {
    client: Client,
    provider: LlmProvider,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl HttpLanguageModel {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.base_url.as_deref().map(|url| url.trim_end_matches('/'));
        let endpoint = match config.provider {
            LlmProvider::OpenAi => {
                format!("{}/chat/completions", base_url.unwrap_or("https://api.openai.com/v1"))
            }
            LlmProvider::Anthropic => {
                format!("{}/v1/messages", base_url.unwrap_or("https://api.anthropic.com"))
            }
            LlmProvider::Ollama => {
                let base = base_url.ok_or_else(|| {
                    LlmError::Configuration("ollama requires llm.base_url".to_string())
                })?;
                format!("{base}/v1/chat/completions")
            }
            LlmProvider::RuleBased => {
                return Err(LlmError::Configuration(
                    "rule_based provider has no HTTP endpoint".to_string(),
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            provider: config.provider,
            endpoint,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let system = format!("{}\n\n{}", request.system, request.instructions);
        match self.provider {
            LlmProvider::Anthropic => json!({
                "model": self.model,
                "max_tokens": 512,
                "temperature": 0,
                "system": system,
                "messages": [{ "role": "user", "content": request.utterance }],
            }),
            _ => json!({
                "model": self.model,
                "temperature": 0,
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": request.utterance },
                ],
            }),
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    fn name(&self) -> &'static str {
        self.provider.as_str()
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut builder = self.client.post(&self.endpoint).json(&self.request_body(request));
        if let Some(api_key) = &self.api_key {
            builder = match self.provider {
                LlmProvider::Anthropic => builder
                    .header("x-api-key", api_key.expose_secret())
                    .header("anthropic-version", "2023-06-01"),
                _ => builder.bearer_auth(api_key.expose_secret()),
            };
        }

        let response =
            builder.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let payload: Value =
            response.json().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let text = match self.provider {
            LlmProvider::Anthropic => payload["content"][0]["text"].as_str(),
            _ => payload["choices"][0]["message"]["content"].as_str(),
        };

        text.map(str::to_owned).filter(|text| !text.trim().is_empty()).ok_or(LlmError::EmptyCompletion)
    }
}

#[cfg(test)]
mod tests {
    use callquote_core::config::{LlmConfig, LlmProvider};

    use super::{strip_json_wrappers, CompletionRequest, HttpLanguageModel, TaskKind};

    fn config(provider: LlmProvider, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: None,
            base_url: base_url.map(str::to_string),
            model: "test-model".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn strips_code_fences_and_prose_around_json() {
        let fenced = "```json\n{\"intent\": \"booking_intent\"}\n```";
        assert_eq!(strip_json_wrappers(fenced), Some("{\"intent\": \"booking_intent\"}"));

        let chatty = "Sure! Here you go: {\"zip\": \"75202\", \"note\": \"a } brace\"} Hope that helps.";
        assert_eq!(strip_json_wrappers(chatty), Some("{\"zip\": \"75202\", \"note\": \"a } brace\"}"));

        assert_eq!(strip_json_wrappers("no json here"), None);
        assert_eq!(strip_json_wrappers("{\"unterminated\": true"), None);
    }

    #[test]
    fn endpoints_follow_provider_conventions() {
        let openai = HttpLanguageModel::from_config(&config(LlmProvider::OpenAi, None))
            .expect("openai client");
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        let ollama = HttpLanguageModel::from_config(&config(
            LlmProvider::Ollama,
            Some("http://localhost:11434/"),
        ))
        .expect("ollama client");
        assert_eq!(ollama.endpoint(), "http://localhost:11434/v1/chat/completions");

        let anthropic = HttpLanguageModel::from_config(&config(LlmProvider::Anthropic, None))
            .expect("anthropic client");
        assert_eq!(anthropic.endpoint(), "https://api.anthropic.com/v1/messages");

        assert!(HttpLanguageModel::from_config(&config(LlmProvider::RuleBased, None)).is_err());
        assert!(HttpLanguageModel::from_config(&config(LlmProvider::Ollama, None)).is_err());
    }

    #[test]
    fn anthropic_body_carries_system_prompt_separately() {
        let model = HttpLanguageModel::from_config(&config(LlmProvider::Anthropic, None))
            .expect("anthropic client");
        let body = model.request_body(&CompletionRequest {
            task: TaskKind::ExtractAddress,
            system: "Business: Green Acres".to_string(),
            instructions: "Return JSON.".to_string(),
            utterance: "1200 Main Street".to_string(),
            options: Vec::new(),
        });

        assert_eq!(body["system"], "Business: Green Acres\n\nReturn JSON.");
        assert_eq!(body["messages"][0]["content"], "1200 Main Street");
        assert_eq!(body["temperature"], 0);
    }
}
