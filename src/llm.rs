//! Abstracción sobre el servicio de completado (chat) del LLM.
//! La implementación real usa Rig con el proveedor OpenAI.

use std::fmt;

use async_trait::async_trait;
use rig::providers::openai;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Una llamada de completado: modelo, mensajes con rol y temperatura.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Devuelve el texto completo de la respuesta.
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Gestor del LLM de chat (OpenAI vía Rig, API de chat completions).
#[derive(Clone)]
pub struct LlmManager {
    client: openai::Client,
}

impl fmt::Debug for LlmManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmManager").finish_non_exhaustive()
    }
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            client: openai::Client::new(&cfg.openai_api_key),
        }
    }
}

/// Separa los mensajes en (preámbulo de sistema, historial, último mensaje de usuario).
fn split_messages(messages: &[ChatMessage]) -> Result<(String, Vec<ChatMessage>, String)> {
    let last_user = messages
        .iter()
        .rposition(|m| m.role == Role::User)
        .ok_or_else(|| PipelineError::Completion("la petición no contiene mensaje de usuario".into()))?;

    let preamble = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    let history = messages[..last_user]
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    Ok((preamble, history, messages[last_user].content.clone()))
}

#[async_trait]
impl CompletionService for LlmManager {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        use rig::agent::AgentBuilder;
        use rig::client::CompletionClient as _;
        use rig::completion::{Chat, Message, Prompt};

        let (preamble, history, prompt) = split_messages(&request.messages)?;

        // El cliente por defecto de Rig usa la Responses API; aquí se fuerza /chat/completions.
        let model = self
            .client
            .completion_model(&request.model)
            .completions_api();
        let mut builder = AgentBuilder::new(model).temperature(request.temperature);
        if !preamble.is_empty() {
            builder = builder.preamble(&preamble);
        }
        let agent = builder.build();

        debug!(
            "Llamada al LLM: modelo={}, mensajes={}, temperatura={}",
            request.model,
            request.messages.len(),
            request.temperature
        );

        let reply = if history.is_empty() {
            agent.prompt(prompt.as_str()).await
        } else {
            let history = history
                .into_iter()
                .map(|m| match m.role {
                    Role::Assistant => Message::assistant(m.content),
                    _ => Message::user(m.content),
                })
                .collect();
            agent.chat(prompt.as_str(), history).await
        };

        reply.map_err(|e| PipelineError::Completion(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn single_user_message_becomes_prompt() {
        let (preamble, history, prompt) = split_messages(&[ChatMessage::user("hola")]).unwrap();
        assert!(preamble.is_empty());
        assert!(history.is_empty());
        assert_eq!(prompt, "hola");
    }

    #[test]
    fn splits_system_history_and_prompt() {
        let messages = [
            msg(Role::System, "be brief"),
            msg(Role::User, "first"),
            msg(Role::Assistant, "answer"),
            msg(Role::User, "second"),
        ];
        let (preamble, history, prompt) = split_messages(&messages).unwrap();
        assert_eq!(preamble, "be brief");
        assert_eq!(history, vec![msg(Role::User, "first"), msg(Role::Assistant, "answer")]);
        assert_eq!(prompt, "second");
    }

    #[test]
    fn rejects_request_without_user_message() {
        let err = split_messages(&[msg(Role::System, "only system")]).unwrap_err();
        assert!(matches!(err, PipelineError::Completion(_)));
    }
}
