//! Summarizer backed by a local Ollama server (`POST /api/chat`).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Summarizer;
use crate::core::errors::SummarizationError;
use crate::domain::{ExtractedText, Summary};

pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";

/// Ollama chat client used as a summarizer
pub struct OllamaSummarizer {
    base_url: String,
    model: String,
    /// Fixed seed so reruns of the same text agree where the model allows it
    seed: Option<u64>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
}

impl OllamaSummarizer {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            seed: Some(42),
            client: reqwest::Client::new(),
        }
    }

    /// Set a request timeout shorter than the stage timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if let Ok(client) = reqwest::Client::builder().timeout(timeout).build() {
            self.client = client;
        }
        self
    }

    fn prompt(text: &ExtractedText, max_chars: usize) -> Vec<ChatMessage> {
        let system = format!(
            "You summarize news articles for a spoken briefing. Write a neutral summary of at \
             most {} characters in the article's language ({}). Use only facts stated in the \
             article; do not add names, numbers or opinions. Reply with the summary only.",
            max_chars, text.language
        );
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: system,
            },
            ChatMessage {
                role: "user".to_string(),
                content: text.text.clone(),
            },
        ]
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    fn name(&self) -> &str {
        &self.model
    }

    async fn summarize(
        &self,
        text: &ExtractedText,
        max_chars: usize,
    ) -> Result<Summary, SummarizationError> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: Self::prompt(text, max_chars),
            stream: false,
            options: ChatOptions {
                temperature: 0.2,
                seed: self.seed,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SummarizationError::ModelUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("ollama HTTP {}: {}", status.as_u16(), body.trim());
            // 404 is "model not pulled yet"
            return Err(if status.is_server_error() || status.as_u16() == 404 || status.as_u16() == 429 {
                SummarizationError::ModelUnavailable(detail)
            } else {
                SummarizationError::Rejected(detail)
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizationError::ModelUnavailable(format!("bad JSON from ollama: {}", e)))?;

        let summary = body
            .message
            .map(|m| m.content.trim().to_string())
            .unwrap_or_default();
        if summary.is_empty() {
            return Err(SummarizationError::EmptyOutput);
        }

        debug!(model = %self.model, chars = summary.chars().count(), "Ollama summary received");
        Ok(Summary::new(summary, max_chars, text, &self.model))
    }
}
