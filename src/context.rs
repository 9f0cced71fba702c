//! Bounded conversation history shared between turns.
//!
//! The store is purely synchronous and owned by the turn pipeline task;
//! eviction runs after every append so the bound holds at all times.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced an utterance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    User,
    Assistant,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::User => "user",
            Source::Assistant => "assistant",
        }
    }
}

/// A single finished utterance. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub source: Source,
    /// Estimated token count for this utterance
    pub token_estimate: usize,
}

impl Utterance {
    pub fn new(source: Source, text: impl Into<String>) -> Self {
        let text = text.into();
        let token_estimate = estimate_tokens(&text);

        Self {
            text,
            timestamp: Utc::now(),
            source,
            token_estimate,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Source::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Source::Assistant, text)
    }
}

/// Conversation history bounded by turn count and an estimated token budget.
///
/// Oldest-first eviction; both bounds are enforced after every append, so a
/// snapshot taken at any point respects them.
#[derive(Clone, Debug)]
pub struct ContextStore {
    utterances: VecDeque<Utterance>,
    max_turns: usize,
    max_tokens: usize,
    current_tokens: usize,
}

impl ContextStore {
    pub fn new(max_turns: usize, max_tokens: usize) -> Self {
        Self {
            utterances: VecDeque::new(),
            max_turns,
            max_tokens,
            current_tokens: 0,
        }
    }

    /// Append an utterance, then evict from the front until bounds hold.
    pub fn append(&mut self, utterance: Utterance) {
        self.current_tokens += utterance.token_estimate;
        self.utterances.push_back(utterance);
        self.evict_if_over_budget();
    }

    /// Read-only snapshot of the current history, oldest first.
    pub fn snapshot(&self) -> Vec<Utterance> {
        self.utterances.iter().cloned().collect()
    }

    /// Drop utterances from the front until both bounds hold.
    pub fn evict_if_over_budget(&mut self) {
        while self.utterances.len() > self.max_turns
            || (self.current_tokens > self.max_tokens && !self.utterances.is_empty())
        {
            if let Some(removed) = self.utterances.pop_front() {
                self.current_tokens = self.current_tokens.saturating_sub(removed.token_estimate);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn total_tokens(&self) -> usize {
        self.current_tokens
    }

    pub fn last(&self) -> Option<&Utterance> {
        self.utterances.back()
    }

    pub fn clear(&mut self) {
        self.utterances.clear();
        self.current_tokens = 0;
    }
}

/// Estimate token count for a string
///
/// Uses a simple heuristic: ~4 characters per token for English text.
/// This is a rough approximation; actual tokenization varies by model.
fn estimate_tokens(text: &str) -> usize {
    let char_estimate = (text.len() + 3) / 4;
    let word_estimate = text.split_whitespace().count();

    char_estimate.max(word_estimate).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utterance_creation() {
        let u = Utterance::user("Hello, world!");
        assert_eq!(u.source, Source::User);
        assert_eq!(u.text, "Hello, world!");
        assert!(u.token_estimate > 0);
    }

    #[test]
    fn test_append_and_snapshot() {
        let mut store = ContextStore::new(10, 4096);
        store.append(Utterance::user("Hello"));
        store.append(Utterance::assistant("Hi there!"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].source, Source::User);
        assert_eq!(snapshot[1].source, Source::Assistant);
    }

    #[test]
    fn test_turn_bound() {
        let mut store = ContextStore::new(4, 100_000);
        for i in 0..20 {
            store.append(Utterance::user(format!("Message {}", i)));
        }

        assert_eq!(store.len(), 4);
        // Oldest evicted first
        assert_eq!(store.snapshot()[0].text, "Message 16");
        assert_eq!(store.last().map(|u| u.text.as_str()), Some("Message 19"));
    }

    #[test]
    fn test_token_bound() {
        let mut store = ContextStore::new(100, 50);
        for i in 0..20 {
            store.append(Utterance::user(format!("A reasonably long message {}", i)));
        }

        assert!(store.len() < 20);
        assert!(store.total_tokens() <= 50);
    }

    #[test]
    fn test_no_deduplication() {
        // Replaying the same text appends a second entry
        let mut store = ContextStore::new(10, 4096);
        store.append(Utterance::user("same words"));
        store.append(Utterance::user("same words"));

        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut store = ContextStore::new(10, 4096);
        store.append(Utterance::user("Hello"));
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.total_tokens(), 0);
    }

    #[test]
    fn test_token_estimation() {
        assert!(estimate_tokens("") >= 1);
        assert!(estimate_tokens("Hello") >= 1);
        assert!(estimate_tokens("This is a longer sentence with more words.") > 5);
    }
}
