use async_trait::async_trait;
use rig::completion::{Chat, Message};
use rig::prelude::*;
use rig::providers::{openai, openrouter};
use serde::{Deserialize, Serialize};

use super::{GenerationError, GenerationPort};
use crate::memory::{Role, Turn};

/// Provider a configured engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    OpenRouter,
    OpenAi,
}

enum Provider {
    OpenRouter(openrouter::Client),
    OpenAi(openai::Client),
}

/// [`GenerationPort`] backed by a rig completion agent.
pub struct RigGenerator {
    provider: Provider,
    model: String,
    temperature: f64,
    max_tokens: u64,
}

impl RigGenerator {
    pub fn new(
        backend: BackendKind,
        api_key: &str,
        model: impl Into<String>,
        temperature: f64,
        max_tokens: u64,
    ) -> Self {
        let provider = match backend {
            BackendKind::OpenRouter => Provider::OpenRouter(openrouter::Client::new(api_key)),
            BackendKind::OpenAi => Provider::OpenAi(openai::Client::new(api_key)),
        };
        Self {
            provider,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }
}

/// Split a canonical conversation into rig's (preamble, history, prompt) shape.
///
/// Leading system turns become the preamble and the final user turn becomes the
/// prompt. Everything in between is replayed as history.
fn split_conversation(conversation: &[Turn]) -> Result<(String, Vec<Message>, String), GenerationError> {
    let system_count = conversation
        .iter()
        .take_while(|turn| turn.role == Role::System)
        .count();
    let preamble = conversation[..system_count]
        .iter()
        .map(|turn| turn.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let rest = &conversation[system_count..];
    let (last, middle) = rest
        .split_last()
        .ok_or_else(|| GenerationError::InvalidRequest("conversation has no user turn".to_string()))?;
    if last.role != Role::User {
        return Err(GenerationError::InvalidRequest(
            "conversation must end with a user turn".to_string(),
        ));
    }

    let history = middle
        .iter()
        .map(|turn| match turn.role {
            Role::Assistant => Message::assistant(turn.content.clone()),
            Role::User | Role::System => Message::user(turn.content.clone()),
        })
        .collect();

    Ok((preamble, history, last.content.clone()))
}

#[async_trait]
impl GenerationPort for RigGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn respond(&self, conversation: &[Turn]) -> Result<String, GenerationError> {
        let (preamble, history, prompt) = split_conversation(conversation)?;

        let reply = match &self.provider {
            Provider::OpenRouter(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(&preamble)
                    .temperature(self.temperature)
                    .max_tokens(self.max_tokens)
                    .build();
                agent.chat(prompt.as_str(), history).await
            }
            Provider::OpenAi(client) => {
                let agent = client
                    .agent(&self.model)
                    .preamble(&preamble)
                    .temperature(self.temperature)
                    .max_tokens(self.max_tokens)
                    .build();
                agent.chat(prompt.as_str(), history).await
            }
        };

        reply.map_err(|e| GenerationError::classify(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_conversation() {
        let conversation = vec![
            Turn::system("You are a doctor."),
            Turn::user("Hello"),
            Turn::assistant("Hi, what brings you in?"),
            Turn::user("I have a cough."),
        ];
        let (preamble, history, prompt) = split_conversation(&conversation).unwrap();
        assert_eq!(preamble, "You are a doctor.");
        assert_eq!(history.len(), 2);
        assert_eq!(prompt, "I have a cough.");
    }

    #[test]
    fn test_split_rejects_trailing_assistant_turn() {
        let conversation = vec![Turn::system("seed"), Turn::assistant("dangling")];
        assert!(matches!(
            split_conversation(&conversation),
            Err(GenerationError::InvalidRequest(_))
        ));
        assert!(split_conversation(&[Turn::system("only")]).is_err());
    }

    #[test]
    fn test_backend_kind_names() {
        let kind: BackendKind = serde_yaml::from_str("openai").unwrap();
        assert_eq!(kind, BackendKind::OpenAi);
        assert_eq!(serde_yaml::to_string(&BackendKind::OpenRouter).unwrap().trim(), "openrouter");
    }
}
