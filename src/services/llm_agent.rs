use crate::config::LlmConfig;
use crate::error::AppError;
use crate::models::TurnRole;
use crate::services::context::Prompt;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Answers questions through an OpenAI-compatible chat completion endpoint.
pub struct LlmAgent {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u16,
    temperature: f32,
    timeout: Duration,
}

impl LlmAgent {
    /// Returns `Ok(None)` when no API key is configured.
    pub fn from_config(config: &LlmConfig) -> Result<Option<Self>, AppError> {
        let Some(api_key) = config.api_key.as_deref() else {
            warn!("No LLM API key configured; queries will be rejected");
            return Ok(None);
        };

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(config.api_base.clone());
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Some(Self {
            client: Client::with_config(openai_config).with_http_client(http_client),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.timeout,
        }))
    }

    pub async fn answer(&self, prompt: &Prompt) -> Result<String, AppError> {
        let start = std::time::Instant::now();
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(chat_messages(prompt)?)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build()?;

        debug!("Sending {} messages to model {}", prompt.turns.len() + 1, self.model);
        let response = tokio::time::timeout(self.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| {
                AppError::UpstreamTimeout(format!("no response within {:?}", self.timeout))
            })??;

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AppError::Upstream("Model returned an empty answer".to_string()))?;

        info!("Answer received in {:?} ({} chars)", start.elapsed(), answer.len());
        Ok(answer)
    }
}

/// System prompt first, then the turns in order.
pub fn chat_messages(prompt: &Prompt) -> Result<Vec<ChatCompletionRequestMessage>, AppError> {
    let mut messages: Vec<ChatCompletionRequestMessage> = Vec::with_capacity(prompt.turns.len() + 1);
    messages.push(
        ChatCompletionRequestSystemMessageArgs::default()
            .content(prompt.system.clone())
            .build()?
            .into(),
    );

    for turn in &prompt.turns {
        let message: ChatCompletionRequestMessage = match turn.role {
            TurnRole::User => ChatCompletionRequestUserMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
            TurnRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                .content(turn.content.clone())
                .build()?
                .into(),
        };
        messages.push(message);
    }

    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatTurn;

    #[test]
    fn missing_key_means_unconfigured() {
        assert!(LlmAgent::from_config(&LlmConfig::default()).unwrap().is_none());
    }

    #[test]
    fn configured_key_builds_agent() {
        let config = LlmConfig {
            api_key: Some("test-key".into()),
            ..LlmConfig::default()
        };
        assert!(LlmAgent::from_config(&config).unwrap().is_some());
    }

    #[test]
    fn messages_start_with_system_prompt() {
        let prompt = Prompt {
            system: "dataset summary".into(),
            turns: vec![
                ChatTurn::user("first"),
                ChatTurn::assistant("reply"),
                ChatTurn::user("second"),
            ],
        };

        let messages = chat_messages(&prompt).unwrap();

        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[3], ChatCompletionRequestMessage::User(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_upstream_error() {
        let config = LlmConfig {
            api_key: Some("test-key".into()),
            api_base: "http://127.0.0.1:9".into(),
            timeout: Duration::from_secs(5),
            ..LlmConfig::default()
        };
        let agent = LlmAgent::from_config(&config).unwrap().unwrap();
        let prompt = Prompt {
            system: "s".into(),
            turns: vec![ChatTurn::user("q")],
        };

        let err = agent.answer(&prompt).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_) | AppError::UpstreamTimeout(_)));
    }
}
