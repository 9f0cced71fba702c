//! The turn pipeline: one state machine from heard speech to spoken,
//! animated reply.
//!
//! A single task owns the state and the conversation context; transcripts
//! arrive on one channel and are handled strictly in arrival order. While
//! the character speaks, the envelope replay races the transcript channel,
//! so a finalized utterance from the user interrupts playback immediately:
//! the speaking session is invalidated, audio is cut, the mouth is reset,
//! and the interrupting utterance is processed as a fresh turn. With an
//! addressing filter attached, only utterances directed at the character
//! interrupt; background chatter is recorded and playback continues.
//!
//! Failure policy per phase: dialogue and synthesis failures abort the turn
//! and return to idle (the user turn stays in context); animation sink
//! failures never abort anything.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::PlaybackSink;
use crate::config::Settings;
use crate::context::{ContextStore, Utterance};
use crate::llm::{DialogueClient, ReplyDraft, SpeechClassifier};
use crate::speech::stt::Transcript;
use crate::speech::tts::{normalize_for_synthesis, split_into_chunks, AudioPlayback, SpeechSynthesizer};
use crate::vts::sink::AnimationSink;

/// Phase of the turn state machine. Exactly one per pipeline instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Interrupting,
}

/// Observable pipeline events, for logging and tests
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    StateChanged(TurnState),
    UserUtterance { text: String },
    ReplyReady { request_id: Uuid, text: String },
    SpeakingStarted { session: u64, duration: Duration },
    PlaybackComplete { session: u64 },
    Interrupted { session: u64 },
    TurnAborted { reason: String },
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub max_turns: usize,
    pub max_context_tokens: usize,
    pub chunk_max_chars: usize,
    /// Record the assistant reply in context even when synthesis fails
    pub record_unspoken_reply: bool,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_turns: settings.dialogue.max_turns,
            max_context_tokens: settings.dialogue.max_context_tokens,
            chunk_max_chars: settings.synthesis.chunk_max_chars,
            record_unspoken_reply: settings.pipeline.record_unspoken_reply,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

enum PlayOutcome {
    Completed,
    Interrupted(String),
}

pub struct TurnPipeline {
    config: PipelineConfig,
    state: TurnState,
    context: ContextStore,
    dialogue: Arc<dyn DialogueClient>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    sink: AnimationSink,
    playback: Option<Box<dyn PlaybackSink>>,
    classifier: Option<SpeechClassifier>,
    transcript_rx: mpsc::Receiver<Transcript>,
    events: broadcast::Sender<PipelineEvent>,
}

impl TurnPipeline {
    pub fn new(
        config: PipelineConfig,
        dialogue: Arc<dyn DialogueClient>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        sink: AnimationSink,
        transcript_rx: mpsc::Receiver<Transcript>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let context = ContextStore::new(config.max_turns, config.max_context_tokens);

        Self {
            config,
            state: TurnState::Idle,
            context,
            dialogue,
            synthesizer,
            sink,
            playback: None,
            classifier: None,
            transcript_rx,
            events,
        }
    }

    /// Attach an audio output for spoken replies
    pub fn with_playback(mut self, playback: Box<dyn PlaybackSink>) -> Self {
        self.playback = Some(playback);
        self
    }

    /// Attach an addressing filter; without one every finalized transcript
    /// starts a turn.
    pub fn with_classifier(mut self, classifier: SpeechClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn context_snapshot(&self) -> Vec<Utterance> {
        self.context.snapshot()
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "State transition");
            self.state = state;
            let _ = self.events.send(PipelineEvent::StateChanged(state));
        }
    }

    /// Run until the transcript source closes. Returns self so callers can
    /// inspect the final context.
    pub async fn run(mut self) -> Self {
        info!("Turn pipeline started");

        let mut pending: Option<String> = None;

        loop {
            let text = match pending.take() {
                // An interrupting utterance is processed as if it had just
                // arrived, without passing through Idle.
                Some(text) => text,
                None => {
                    self.set_state(TurnState::Idle);
                    match self.next_finalized().await {
                        Some(text) => text,
                        None => break,
                    }
                }
            };

            self.set_state(TurnState::Listening);

            if self.is_background(&text) {
                debug!("Background utterance, recorded without a turn");
                self.context
                    .append(Utterance::user(format!("(background) {}", text)));
                continue;
            }

            let _ = self.events.send(PipelineEvent::UserUtterance { text: text.clone() });
            self.context.append(Utterance::user(text));

            self.set_state(TurnState::Thinking);
            let history = self.context.snapshot();
            let reply = match self.dialogue.generate_reply(&history).await {
                Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
                Ok(_) => {
                    warn!("Empty reply, returning to idle");
                    continue;
                }
                Err(e) => {
                    warn!("Dialogue failed: {}", e);
                    let _ = self.events.send(PipelineEvent::TurnAborted {
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let draft = ReplyDraft::new(reply);
            let _ = self.events.send(PipelineEvent::ReplyReady {
                request_id: draft.request_id,
                text: draft.text.clone(),
            });

            pending = self.speak(draft).await;
        }

        self.set_state(TurnState::Idle);
        info!("Turn pipeline stopped");
        self
    }

    /// Speaking phase for one reply. Returns the interrupting utterance, if
    /// any, for immediate reprocessing.
    async fn speak(&mut self, draft: ReplyDraft) -> Option<String> {
        self.set_state(TurnState::Speaking);

        if self.config.record_unspoken_reply {
            self.context.append(Utterance::assistant(draft.text.as_str()));
        }

        let session = self.sink.begin_session();
        self.sink.set_speaking(true);

        let normalized = normalize_for_synthesis(&draft.text);
        let chunks = split_into_chunks(&normalized, self.config.chunk_max_chars);

        let mut spoke_any = false;
        let mut interrupted: Option<String> = None;
        let mut aborted = false;

        for chunk in chunks {
            let playback = match self.synthesizer.synthesize(&chunk).await {
                Ok(playback) => playback,
                Err(e) => {
                    warn!("Synthesis failed: {}", e);
                    let _ = self.events.send(PipelineEvent::TurnAborted {
                        reason: e.to_string(),
                    });
                    aborted = true;
                    break;
                }
            };

            spoke_any = true;
            match self.replay(playback, session).await {
                PlayOutcome::Completed => {}
                PlayOutcome::Interrupted(text) => {
                    interrupted = Some(text);
                    break;
                }
            }
        }

        if !self.config.record_unspoken_reply && spoke_any {
            // Partially spoken replies count as completed turns
            self.context.append(Utterance::assistant(draft.text.as_str()));
        }
        self.sink.set_speaking(false);

        if let Some(text) = interrupted {
            self.set_state(TurnState::Interrupting);
            // Bumping the session invalidates every queued update of the old
            // one; the reset itself is never dropped.
            self.sink.begin_session();
            if let Some(playback) = self.playback.as_mut() {
                playback.stop();
            }
            self.sink.reset().await;
            let _ = self.events.send(PipelineEvent::Interrupted { session });
            return Some(text);
        }

        self.sink.reset().await;
        if !aborted {
            let _ = self.events.send(PipelineEvent::PlaybackComplete { session });
        }
        None
    }

    /// Replay one playback unit's envelope against the clock, racing the
    /// transcript channel for barge-in.
    async fn replay(&mut self, playback: AudioPlayback, session: u64) -> PlayOutcome {
        if let Some(out) = self.playback.as_mut() {
            if let Err(e) = out.play(&playback.audio) {
                warn!("Audio playback failed: {}", e);
            }
        }

        let start = Instant::now();
        let duration = playback.duration;
        let _ = self.events.send(PipelineEvent::SpeakingStarted { session, duration });

        let mut points = playback.envelope.into_iter();
        let mut next = points.next();
        let mut source_open = true;

        loop {
            let deadline = start + next.map(|p| p.offset).unwrap_or(duration);

            tokio::select! {
                biased;

                transcript = self.transcript_rx.recv(), if source_open => {
                    match transcript {
                        Some(transcript) => {
                            if let Some(text) = finalized_text(&transcript) {
                                if self.is_background(&text) {
                                    debug!("Background utterance during speech, recorded without interrupting");
                                    self.context
                                        .append(Utterance::user(format!("(background) {}", text)));
                                } else {
                                    return PlayOutcome::Interrupted(text);
                                }
                            }
                            // Noise during speech is ignored
                        }
                        None => source_open = false,
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    match next.take() {
                        Some(point) => {
                            self.sink.mouth(point.mouth_open, session);
                            next = points.next();
                        }
                        None => return PlayOutcome::Completed,
                    }
                }
            }
        }
    }

    fn is_background(&self, text: &str) -> bool {
        self.classifier
            .as_ref()
            .map(|c| !c.is_directed(text))
            .unwrap_or(false)
    }

    /// Wait for the next transcript that can advance the machine
    async fn next_finalized(&mut self) -> Option<String> {
        loop {
            let transcript = self.transcript_rx.recv().await?;
            if let Some(text) = finalized_text(&transcript) {
                return Some(text);
            }
            debug!("Ignoring non-final or empty transcript");
        }
    }
}

fn finalized_text(transcript: &Transcript) -> Option<String> {
    if !transcript.is_final {
        return None;
    }
    let trimmed = transcript.text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalized_text_filters_noise() {
        assert_eq!(finalized_text(&Transcript::partial("hel")), None);
        assert_eq!(finalized_text(&Transcript::final_text("   ")), None);
        assert_eq!(
            finalized_text(&Transcript::final_text("  hello ")),
            Some("hello".to_string())
        );
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings::default();
        let config = PipelineConfig::from_settings(&settings);
        assert_eq!(config.max_turns, settings.dialogue.max_turns);
        assert_eq!(config.chunk_max_chars, settings.synthesis.chunk_max_chars);
        assert!(config.record_unspoken_reply);
    }
}
