pub mod classifier;
pub mod client;

pub use classifier::SpeechClassifier;
pub use client::{DialogueClient, OllamaClient};

use uuid::Uuid;

/// A generated reply waiting to be spoken
#[derive(Clone, Debug)]
pub struct ReplyDraft {
    pub text: String,
    pub request_id: Uuid,
}

impl ReplyDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            request_id: Uuid::new_v4(),
        }
    }
}
