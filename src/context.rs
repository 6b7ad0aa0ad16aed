// Context bridge between the stable emotion and outgoing chat requests

use tokio::sync::watch;
use tracing::debug;

use crate::chat::{ChatMessage, ChatRequest, ChatTranscript};
use crate::error::{PipelineError, Result};
use crate::models::EmotionLabel;

const ANGRY: &str = "The user appears angry or frustrated. Respond calmly and without \
    judgement, acknowledge their frustration, and avoid escalating. Offer practical steps \
    if they want them.";
const DISGUST: &str = "The user appears put off or disgusted. Acknowledge their reaction \
    respectfully and give them room to explain what is bothering them.";
const FEAR: &str = "The user appears anxious or afraid. Be reassuring and steady, keep \
    replies short and clear, and focus on what they can control right now.";
const HAPPY: &str = "The user appears happy. Match their positive energy, share in what is \
    going well, and keep the conversation light and encouraging.";
const SAD: &str = "The user appears sad. Respond with warmth and empathy, validate their \
    feelings, and gently invite them to share more if they want to.";
const SURPRISE: &str = "The user appears surprised. Be curious about what caught them off \
    guard and help them make sense of it.";
const NEUTRAL: &str = "The user appears calm and neutral. Be friendly and attentive, and \
    follow their lead on topic and tone.";

/// Fixed guidance text for an emotion
pub fn template_for(emotion: EmotionLabel) -> &'static str {
    match emotion {
        EmotionLabel::Angry => ANGRY,
        EmotionLabel::Disgust => DISGUST,
        EmotionLabel::Fear => FEAR,
        EmotionLabel::Happy => HAPPY,
        EmotionLabel::Sad => SAD,
        EmotionLabel::Surprise => SURPRISE,
        EmotionLabel::Neutral => NEUTRAL,
    }
}

/// Template lookup by raw key; unknown or missing keys get the neutral text
pub fn template_for_key(key: Option<&str>) -> &'static str {
    key.and_then(|k| k.parse::<EmotionLabel>().ok())
        .map(template_for)
        .unwrap_or(NEUTRAL)
}

/// The emotion attached to a chat submission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EmotionContext {
    pub emotion: EmotionLabel,
    pub template: &'static str,
}

impl EmotionContext {
    pub fn for_emotion(emotion: EmotionLabel) -> Self {
        Self {
            emotion,
            template: template_for(emotion),
        }
    }
}

/// Read side of the stable emotion, held by the chat UI
#[derive(Clone, Debug)]
pub struct ContextBridge {
    stable: watch::Receiver<Option<EmotionLabel>>,
}

impl ContextBridge {
    pub fn new(stable: watch::Receiver<Option<EmotionLabel>>) -> Self {
        Self { stable }
    }

    /// A bridge with no detection loop behind it; always reports neutral
    pub fn detached() -> Self {
        let (_, rx) = watch::channel(None);
        Self::new(rx)
    }

    /// Current stable emotion, `neutral` until one has been established
    pub fn current(&self) -> EmotionContext {
        let emotion = (*self.stable.borrow()).unwrap_or_default();
        EmotionContext::for_emotion(emotion)
    }

    /// Attaches the current emotion and its template to the conversation so far
    pub fn build_request(&self, transcript: &ChatTranscript) -> ChatRequest {
        let context = self.current();
        debug!("Attaching emotion context: {}", context.emotion);
        ChatRequest {
            messages: transcript.to_api_messages(),
            emotion: context.emotion,
            emotional_context: context.template.to_string(),
        }
    }

    /// Records a user message tagged with the current emotion and builds the request for it
    pub fn prepare_submission(
        &self,
        transcript: &mut ChatTranscript,
        text: &str,
    ) -> Result<ChatRequest> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PipelineError::Chat("message is empty".to_string()));
        }

        transcript.push(ChatMessage::user(text, self.current().emotion));
        Ok(self.build_request(transcript))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::Sender;

    #[test]
    fn defaults_to_neutral_before_any_detection() {
        let (_tx, rx) = watch::channel(None);
        let bridge = ContextBridge::new(rx);
        assert_eq!(
            bridge.current(),
            EmotionContext {
                emotion: EmotionLabel::Neutral,
                template: NEUTRAL
            }
        );
        assert_eq!(ContextBridge::detached().current().emotion, EmotionLabel::Neutral);
    }

    #[test]
    fn reads_latest_stable_emotion() {
        let (tx, rx) = watch::channel(None);
        let bridge = ContextBridge::new(rx);
        tx.send_replace(Some(EmotionLabel::Sad));
        assert_eq!(bridge.current().emotion, EmotionLabel::Sad);
        tx.send_replace(Some(EmotionLabel::Happy));
        assert_eq!(bridge.current().template, template_for(EmotionLabel::Happy));
    }

    #[test]
    fn every_label_has_its_own_template() {
        let templates: Vec<_> = EmotionLabel::ALL.iter().map(|&e| template_for(e)).collect();
        for (i, a) in templates.iter().enumerate() {
            assert!(!a.is_empty());
            assert!(templates[i + 1..].iter().all(|b| a != b));
        }
    }

    #[test]
    fn unknown_keys_fall_back_to_neutral() {
        assert_eq!(template_for_key(Some("fear")), FEAR);
        assert_eq!(template_for_key(Some("bored")), NEUTRAL);
        assert_eq!(template_for_key(Some("")), NEUTRAL);
        assert_eq!(template_for_key(None), NEUTRAL);
    }

    #[test]
    fn submission_tags_message_and_builds_request() {
        let (tx, rx) = watch::channel(Some(EmotionLabel::Angry));
        let bridge = ContextBridge::new(rx);
        let mut transcript = ChatTranscript::new();

        let request = bridge
            .prepare_submission(&mut transcript, "  this is annoying  ")
            .unwrap();
        assert_eq!(transcript.len(), 1);
        let message = &transcript.messages()[0];
        assert_eq!(message.text(), "this is annoying");
        assert_eq!(message.sender(), Sender::User);
        assert_eq!(message.emotion(), Some(EmotionLabel::Angry));
        assert_eq!(request.emotion, EmotionLabel::Angry);
        assert_eq!(request.emotional_context, ANGRY);
        assert_eq!(request.messages.len(), 1);

        // reading never changes what the loop published
        assert_eq!(*tx.borrow(), Some(EmotionLabel::Angry));
    }

    #[test]
    fn empty_submission_is_rejected() {
        let bridge = ContextBridge::detached();
        let mut transcript = ChatTranscript::new();
        assert!(bridge.prepare_submission(&mut transcript, "   ").is_err());
        assert!(transcript.is_empty());
    }
}
