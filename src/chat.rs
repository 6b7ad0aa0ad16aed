// Chat transcript and chat backend client

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::models::EmotionLabel;

/// Author of a chat message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    /// Role name used by the chat backend
    pub fn role(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "assistant",
        }
    }
}

/// One message in the transcript. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatMessage {
    id: Uuid,
    text: String,
    sender: Sender,
    emotion: Option<EmotionLabel>,
    timestamp: DateTime<Utc>,
}

impl ChatMessage {
    fn new(text: impl Into<String>, sender: Sender, emotion: Option<EmotionLabel>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            sender,
            emotion,
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>, emotion: EmotionLabel) -> Self {
        Self::new(text, Sender::User, Some(emotion))
    }

    pub fn bot(text: impl Into<String>, emotion: Option<EmotionLabel>) -> Self {
        Self::new(text, Sender::Bot, emotion)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sender(&self) -> Sender {
        self.sender
    }

    pub fn emotion(&self) -> Option<EmotionLabel> {
        self.emotion
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Ordered, append-only list of chat messages for the current session
#[derive(Clone, Debug, Default)]
pub struct ChatTranscript {
    messages: Vec<ChatMessage>,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Records the backend reply as a bot message
    pub fn record_reply(&mut self, reply: &ChatResponse) -> &ChatMessage {
        self.messages
            .push(ChatMessage::bot(reply.response.clone(), reply.emotion_label()));
        &self.messages[self.messages.len() - 1]
    }

    /// The conversation in the backend's `{role, content}` shape
    pub fn to_api_messages(&self) -> Vec<ApiMessage> {
        self.messages
            .iter()
            .map(|m| ApiMessage {
                role: m.sender.role().to_string(),
                content: m.text.clone(),
            })
            .collect()
    }
}

/// Message as sent to the chat backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

/// Chat backend request
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ApiMessage>,
    pub emotion: EmotionLabel,
    pub emotional_context: String,
}

/// Chat backend response
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub emotion: String,
}

impl ChatResponse {
    /// The echoed emotion, if it names a known label
    pub fn emotion_label(&self) -> Option<EmotionLabel> {
        self.emotion.parse().ok()
    }
}

/// HTTP client for the chat backend
pub struct ChatClient {
    client: Client,
    endpoint: String,
}

impl ChatClient {
    /// Create a new chat client from configuration.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.chat_timeout)
            .build()
            .map_err(|e| PipelineError::Chat(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.chat_endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request and wait for the reply. No retries.
    pub async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        debug!(
            "Sending {} messages to chat backend (emotion: {})",
            request.messages.len(),
            request.emotion
        );

        let response = self.client.post(&self.endpoint).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Chat backend returned {}: {}", status, body);
            return Err(PipelineError::Chat(format!("backend returned {status}")));
        }

        let reply: ChatResponse = response.json().await?;
        info!("Received chat reply ({} chars)", reply.response.len());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn messages_are_tagged_and_unique() {
        let a = ChatMessage::user("hello", EmotionLabel::Happy);
        let b = ChatMessage::bot("hi there", None);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.sender(), Sender::User);
        assert_eq!(a.emotion(), Some(EmotionLabel::Happy));
        assert_eq!(b.emotion(), None);
        assert!(b.timestamp() >= a.timestamp());
    }

    #[test]
    fn transcript_maps_roles_for_backend() {
        let mut transcript = ChatTranscript::new();
        transcript.push(ChatMessage::user("I had a rough day", EmotionLabel::Sad));
        transcript.push(ChatMessage::bot("I'm sorry to hear that.", None));

        assert_eq!(
            transcript.to_api_messages(),
            vec![
                ApiMessage {
                    role: "user".into(),
                    content: "I had a rough day".into()
                },
                ApiMessage {
                    role: "assistant".into(),
                    content: "I'm sorry to hear that.".into()
                },
            ]
        );
    }

    #[test]
    fn request_serializes_with_camel_case_context() {
        let request = ChatRequest {
            messages: vec![ApiMessage {
                role: "user".into(),
                content: "hey".into(),
            }],
            emotion: EmotionLabel::Fear,
            emotional_context: "be calm".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "messages": [{"role": "user", "content": "hey"}],
                "emotion": "fear",
                "emotionalContext": "be calm"
            })
        );
    }

    #[test]
    fn replies_are_recorded_with_known_emotions_only() {
        let mut transcript = ChatTranscript::new();
        let reply: ChatResponse =
            serde_json::from_value(json!({"response": "Glad to hear!", "emotion": "happy"}))
                .unwrap();
        let message = transcript.record_reply(&reply);
        assert_eq!(message.sender(), Sender::Bot);
        assert_eq!(message.emotion(), Some(EmotionLabel::Happy));

        let reply: ChatResponse =
            serde_json::from_value(json!({"response": "Okay", "emotion": "pensive"})).unwrap();
        assert_eq!(transcript.record_reply(&reply).emotion(), None);

        let reply: ChatResponse = serde_json::from_value(json!({"response": "Sure"})).unwrap();
        assert_eq!(reply.emotion_label(), None);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn client_uses_configured_endpoint() {
        let config = AppConfig {
            chat_endpoint: "http://127.0.0.1:9/api/chat".to_string(),
            ..AppConfig::default()
        };
        let client = ChatClient::new(&config).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/api/chat");
    }
}
