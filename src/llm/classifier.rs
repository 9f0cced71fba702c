//! Heuristic addressing filter.
//!
//! Decides whether a finalized transcript is directed at the character or is
//! background chatter. Two cheap signals: a configured keyword appearing in
//! the text (the character's name, usually), and short questions, which in a
//! stream chat are almost always aimed at the streamer.

/// Classifies transcripts as directed or background
#[derive(Clone, Debug)]
pub struct SpeechClassifier {
    keywords: Vec<String>,
    max_question_chars: usize,
}

impl SpeechClassifier {
    pub fn new(keywords: Vec<String>, max_question_chars: usize) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            keywords,
            max_question_chars,
        }
    }

    /// True if the utterance should start a turn
    pub fn is_directed(&self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }

        let lowered = trimmed.to_lowercase();
        if self.keywords.iter().any(|k| lowered.contains(k)) {
            return true;
        }

        // Short questions count as directed even without the name
        if trimmed.ends_with('?') || trimmed.ends_with('？') {
            let chars = trimmed.chars().count();
            if chars <= self.max_question_chars {
                return true;
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SpeechClassifier {
        SpeechClassifier::new(vec!["Aoi".to_string()], 15)
    }

    #[test]
    fn test_keyword_match_is_directed() {
        let c = classifier();
        assert!(c.is_directed("hey aoi, what do you think?"));
        assert!(c.is_directed("AOI look at this"));
    }

    #[test]
    fn test_short_question_is_directed() {
        let c = classifier();
        assert!(c.is_directed("you there?"));
        assert!(c.is_directed("what now?"));
    }

    #[test]
    fn test_long_question_without_keyword_is_background() {
        let c = classifier();
        assert!(!c.is_directed(
            "did anyone see where I left my keys this morning before the meeting?"
        ));
    }

    #[test]
    fn test_plain_chatter_is_background() {
        let c = classifier();
        assert!(!c.is_directed("I'm going to grab a coffee"));
        assert!(!c.is_directed("   "));
    }
}
