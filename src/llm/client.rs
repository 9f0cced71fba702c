//! Dialogue backend client.
//!
//! The pipeline only sees the [`DialogueClient`] trait; the concrete
//! implementation talks to an Ollama-compatible `/api/chat` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{Source, Utterance};
use crate::{AituberError, Result};

#[async_trait]
pub trait DialogueClient: Send + Sync {
    /// Generate a reply to the conversation so far.
    ///
    /// `history` is oldest-first and already bounded by the caller.
    async fn generate_reply(&self, history: &[Utterance]) -> Result<String>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

/// Non-streaming client for an Ollama-style chat endpoint
pub struct OllamaClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_reply_tokens: u32,
}

impl OllamaClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        temperature: f32,
        max_reply_tokens: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AituberError::DialogueUnavailable(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            temperature,
            max_reply_tokens,
        })
    }

    /// Startup probe: the dialogue backend is required, so main exits
    /// non-zero when this fails.
    pub async fn check_available(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AituberError::DialogueUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AituberError::DialogueUnavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    fn build_messages(&self, history: &[Utterance]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: self.system_prompt.clone(),
        });
        for utterance in history {
            messages.push(ChatMessage {
                role: match utterance.source {
                    Source::User => "user",
                    Source::Assistant => "assistant",
                },
                content: utterance.text.clone(),
            });
        }
        messages
    }
}

#[async_trait]
impl DialogueClient for OllamaClient {
    async fn generate_reply(&self, history: &[Utterance]) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: self.build_messages(history),
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_reply_tokens,
            },
        };

        let url = format!("{}/api/chat", self.endpoint);
        debug!(model = %self.model, turns = history.len(), "Requesting reply");

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AituberError::DialogueUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AituberError::DialogueUnavailable(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AituberError::DialogueUnavailable(e.to_string()))?;

        Ok(parsed.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OllamaClient {
        OllamaClient::new(
            "http://127.0.0.1:11434/",
            "llama3.1:8b",
            "Be brief.",
            0.7,
            512,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_endpoint_trailing_slash_stripped() {
        let c = client();
        assert_eq!(c.endpoint, "http://127.0.0.1:11434");
    }

    #[test]
    fn test_messages_start_with_system() {
        let c = client();
        let history = vec![Utterance::user("hi"), Utterance::assistant("hello")];
        let messages = c.build_messages(&history);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[2].content, "hello");
    }
}
