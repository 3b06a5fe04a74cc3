use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;

/// Text produced by a [`TextGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedText {
    pub text: String,
}

/// Stateless generation capability shared by the chat and mention channels.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a reply for `prompt`. `system_instruction` replaces the
    /// generator's configured instruction when given.
    async fn generate(&self, prompt: &str, system_instruction: Option<&str>)
        -> Result<GeneratedText>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<CompletionMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: CompletionMessage,
}

/// OpenAI-compatible chat completion client.
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self { client, config })
    }

    fn build_messages(&self, prompt: &str, system_instruction: Option<&str>) -> Vec<CompletionMessage> {
        let system = system_instruction.unwrap_or(&self.config.system_prompt);
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(CompletionMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
            });
        }
        messages.push(CompletionMessage {
            role: "user".to_string(),
            content: Some(prompt.to_string()),
        });
        messages
    }

    pub async fn chat(&self, messages: &[CompletionMessage]) -> Result<CompletionMessage> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.config.max_tokens,
        };

        let url = format!(
            "{}/chat/completions",
            self.config.effective_base_url().trim_end_matches('/')
        );

        debug!("Sending request to {} backend: {}", self.config.provider, url);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.config.provider))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} API error ({}): {}", self.config.provider, status, error_body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.config.provider))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .with_context(|| format!("No response from {}", self.config.provider))
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(
        &self,
        prompt: &str,
        system_instruction: Option<&str>,
    ) -> Result<GeneratedText> {
        let messages = self.build_messages(prompt, system_instruction);
        let reply = self.chat(&messages).await?;
        Ok(GeneratedText {
            text: reply.content.unwrap_or_default(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            provider: LlmProvider::Openai,
            model: "test-model".to_string(),
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            max_tokens: 64,
            system_prompt: "be brief".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_system_instruction_override() {
        let client = LlmClient::new(config("http://localhost")).unwrap();
        let default = client.build_messages("hi", None);
        assert_eq!(default.len(), 2);
        assert_eq!(default[0].content.as_deref(), Some("be brief"));

        let custom = client.build_messages("hi", Some("be loud"));
        assert_eq!(custom[0].content.as_deref(), Some("be loud"));
        assert_eq!(custom[1].role, "user");
    }

    #[tokio::test]
    async fn test_generate_reads_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"gm"}}]}"#)
            .create_async()
            .await;

        let client = LlmClient::new(config(&server.url())).unwrap();
        let generated = client.generate("hello", None).await.unwrap();

        assert_eq!(generated.text, "gm");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_generate_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = LlmClient::new(config(&server.url())).unwrap();
        let err = client.generate("hello", None).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
