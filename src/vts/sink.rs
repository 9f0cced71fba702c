//! Animation sink: the single writer on the character connection.
//!
//! Two producers drive the model (the turn pipeline for the mouth, the idle
//! animator for blinks) but one connection carries all writes, so everything
//! funnels through one command channel drained by a dedicated task.
//!
//! Mouth commands are tagged with a session id. Interruption bumps the
//! shared session counter, which atomically invalidates every queued update
//! of the old session; the writer drops them on dequeue. Write failures
//! degrade the sink instead of failing turns: audio continues, the model
//! freezes, and a warning is logged once per outage.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::api::VtsApi;
use crate::config::VtsSettings;
use crate::Result;

/// Rig parameter ids the sink writes
#[derive(Clone, Debug)]
pub struct RigParams {
    pub mouth: String,
    pub eye_left: String,
    pub eye_right: String,
}

impl From<&VtsSettings> for RigParams {
    fn from(s: &VtsSettings) -> Self {
        Self {
            mouth: s.mouth_param.clone(),
            eye_left: s.eye_left_param.clone(),
            eye_right: s.eye_right_param.clone(),
        }
    }
}

/// Destination for parameter writes. The production implementation wraps the
/// VTube Studio connection; tests substitute a recorder.
#[async_trait]
pub trait ParameterWriter: Send {
    async fn write(&mut self, values: &[(String, f32)]) -> Result<()>;
}

pub struct VtsWriter {
    api: VtsApi,
}

impl VtsWriter {
    pub fn new(api: VtsApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ParameterWriter for VtsWriter {
    async fn write(&mut self, values: &[(String, f32)]) -> Result<()> {
        self.api.inject_parameters(values).await
    }
}

#[derive(Debug)]
enum SinkCommand {
    Mouth { value: f32, session: u64 },
    Blink,
    Reset,
    Shutdown,
}

const BLINK_CLOSED_MS: u64 = 100;
const BLINK_HALF_MS: u64 = 50;
const BLINK_HALF_OPEN: f32 = 0.3;

/// Handle to the sink writer task. Cheap to clone.
#[derive(Clone)]
pub struct AnimationSink {
    tx: mpsc::Sender<SinkCommand>,
    session: Arc<AtomicU64>,
    speaking: Arc<AtomicBool>,
}

impl AnimationSink {
    /// Spawn the writer task over the given parameter writer
    pub fn spawn(
        writer: impl ParameterWriter + 'static,
        params: RigParams,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let session = Arc::new(AtomicU64::new(0));
        let speaking = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(writer_loop(writer, params, rx, Arc::clone(&session)));

        (
            Self {
                tx,
                session,
                speaking,
            },
            task,
        )
    }

    /// Start a new speaking session, invalidating every update still queued
    /// for the previous one.
    pub fn begin_session(&self) -> u64 {
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Queue a mouth position for the given session. Never blocks; if the
    /// queue is full the frame is dropped, the next one supersedes it anyway.
    pub fn mouth(&self, value: f32, session: u64) {
        if self
            .tx
            .try_send(SinkCommand::Mouth { value, session })
            .is_err()
        {
            debug!("Sink queue full, dropped mouth frame");
        }
    }

    /// Queue a blink
    pub fn blink(&self) {
        if self.tx.try_send(SinkCommand::Blink).is_err() {
            debug!("Sink queue full, dropped blink");
        }
    }

    /// Queue a neutral mouth-closed reset. Unlike mouth frames, a reset is
    /// never dropped as stale; it always lands after whatever is queued
    /// ahead of it.
    pub async fn reset(&self) {
        let _ = self.tx.send(SinkCommand::Reset).await;
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(SinkCommand::Shutdown).await;
    }
}

async fn writer_loop(
    mut writer: impl ParameterWriter,
    params: RigParams,
    mut rx: mpsc::Receiver<SinkCommand>,
    session: Arc<AtomicU64>,
) {
    let mut degraded = false;
    let mut blink: Option<(BlinkPhase, Instant)> = None;

    loop {
        // A blink in flight never blocks the queue; its remaining steps are
        // timed and raced against incoming commands.
        let command = match blink {
            Some((phase, at)) => tokio::select! {
                biased;

                _ = sleep_until(at) => {
                    blink = advance_blink(&mut writer, &params, phase, &mut degraded).await;
                    continue;
                }
                command = rx.recv() => command,
            },
            None => rx.recv().await,
        };

        let Some(command) = command else { break };

        match command {
            SinkCommand::Mouth { value, session: tag } => {
                if tag != session.load(Ordering::SeqCst) {
                    debug!(session = tag, "Dropped stale mouth update");
                    continue;
                }
                let result = writer.write(&[(params.mouth.clone(), value)]).await;
                note_outcome(&mut degraded, result);
            }
            SinkCommand::Reset => {
                let result = writer.write(&[(params.mouth.clone(), 0.0)]).await;
                note_outcome(&mut degraded, result);
            }
            SinkCommand::Blink => {
                if blink.is_some() {
                    continue;
                }
                let result = writer
                    .write(&[(params.eye_left.clone(), 0.0), (params.eye_right.clone(), 0.0)])
                    .await;
                note_outcome(&mut degraded, result);
                blink = Some((
                    BlinkPhase::HalfOpen,
                    Instant::now() + Duration::from_millis(BLINK_CLOSED_MS),
                ));
            }
            SinkCommand::Shutdown => {
                // Leave the eyes open rather than mid-blink
                while let Some((phase, at)) = blink {
                    sleep_until(at).await;
                    blink = advance_blink(&mut writer, &params, phase, &mut degraded).await;
                }
                break;
            }
        }
    }

    debug!("Animation sink writer stopped");
}

#[derive(Clone, Copy, Debug)]
enum BlinkPhase {
    HalfOpen,
    Open,
}

/// One timed step of the close, half-open, open sequence
async fn advance_blink(
    writer: &mut impl ParameterWriter,
    params: &RigParams,
    phase: BlinkPhase,
    degraded: &mut bool,
) -> Option<(BlinkPhase, Instant)> {
    match phase {
        BlinkPhase::HalfOpen => {
            let result = writer
                .write(&[
                    (params.eye_left.clone(), BLINK_HALF_OPEN),
                    (params.eye_right.clone(), BLINK_HALF_OPEN),
                ])
                .await;
            note_outcome(degraded, result);
            Some((
                BlinkPhase::Open,
                Instant::now() + Duration::from_millis(BLINK_HALF_MS),
            ))
        }
        BlinkPhase::Open => {
            let result = writer
                .write(&[(params.eye_left.clone(), 1.0), (params.eye_right.clone(), 1.0)])
                .await;
            note_outcome(degraded, result);
            None
        }
    }
}

fn note_outcome(degraded: &mut bool, result: Result<()>) {
    match result {
        Ok(()) => {
            if *degraded {
                info!("Animation sink recovered");
                *degraded = false;
            }
        }
        Err(e) => {
            if !*degraded {
                warn!("Animation sink degraded, character will freeze: {}", e);
                *degraded = true;
            } else {
                debug!("Animation sink still degraded: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records every write; optionally fails them all
    #[derive(Clone, Default)]
    struct RecordingWriter {
        writes: Arc<Mutex<Vec<Vec<(String, f32)>>>>,
        fail: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ParameterWriter for RecordingWriter {
        async fn write(&mut self, values: &[(String, f32)]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(crate::AituberError::AnimationSinkUnavailable("down".into()));
            }
            self.writes.lock().push(values.to_vec());
            Ok(())
        }
    }

    fn rig() -> RigParams {
        RigParams {
            mouth: "MouthOpen".into(),
            eye_left: "EyeOpenLeft".into(),
            eye_right: "EyeOpenRight".into(),
        }
    }

    #[tokio::test]
    async fn test_mouth_write_reaches_writer() {
        let writer = RecordingWriter::default();
        let writes = Arc::clone(&writer.writes);
        let (sink, task) = AnimationSink::spawn(writer, rig());

        let session = sink.begin_session();
        sink.mouth(0.7, session);
        sink.shutdown().await;
        task.await.unwrap();

        let recorded = writes.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], vec![("MouthOpen".to_string(), 0.7)]);
    }

    #[tokio::test]
    async fn test_stale_session_dropped() {
        let writer = RecordingWriter::default();
        let writes = Arc::clone(&writer.writes);
        let (sink, task) = AnimationSink::spawn(writer, rig());

        let old = sink.begin_session();
        // Invalidate before the writer ever sees the frame
        let new = sink.begin_session();
        sink.mouth(0.9, old);
        sink.mouth(0.2, new);
        sink.shutdown().await;
        task.await.unwrap();

        let recorded = writes.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0][0].1, 0.2);
    }

    #[tokio::test]
    async fn test_blink_sequence() {
        let writer = RecordingWriter::default();
        let writes = Arc::clone(&writer.writes);
        let (sink, task) = AnimationSink::spawn(writer, rig());

        sink.blink();
        sink.shutdown().await;
        task.await.unwrap();

        let recorded = writes.lock();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0][0].1, 0.0);
        assert_eq!(recorded[1][0].1, BLINK_HALF_OPEN);
        assert_eq!(recorded[2][0].1, 1.0);
        assert_eq!(recorded[2].len(), 2);
    }

    #[tokio::test]
    async fn test_degraded_writer_does_not_stop_task() {
        let writer = RecordingWriter::default();
        writer.fail.store(true, Ordering::SeqCst);
        let writes = Arc::clone(&writer.writes);
        let fail = Arc::clone(&writer.fail);
        let (sink, task) = AnimationSink::spawn(writer, rig());

        let session = sink.begin_session();
        sink.mouth(0.5, session);
        // Recovery: later writes land again
        fail.store(false, Ordering::SeqCst);
        sink.mouth(0.6, session);
        sink.shutdown().await;
        task.await.unwrap();

        let recorded = writes.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0][0].1, 0.6);
    }

    #[tokio::test]
    async fn test_reset_closes_mouth() {
        let writer = RecordingWriter::default();
        let writes = Arc::clone(&writer.writes);
        let (sink, task) = AnimationSink::spawn(writer, rig());

        sink.reset().await;
        sink.shutdown().await;
        task.await.unwrap();

        let recorded = writes.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], vec![("MouthOpen".to_string(), 0.0)]);
    }

    #[tokio::test]
    async fn test_reset_lands_after_session_bump() {
        let writer = RecordingWriter::default();
        let writes = Arc::clone(&writer.writes);
        let (sink, task) = AnimationSink::spawn(writer, rig());

        // A stale mouth frame is queued, then invalidated, then reset: the
        // frame is dropped but the reset still closes the mouth.
        let old = sink.begin_session();
        sink.mouth(0.9, old);
        sink.begin_session();
        sink.reset().await;
        sink.shutdown().await;
        task.await.unwrap();

        let recorded = writes.lock();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0], vec![("MouthOpen".to_string(), 0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blink_does_not_delay_mouth_frames() {
        let writer = RecordingWriter::default();
        let writes = Arc::clone(&writer.writes);
        let (sink, task) = AnimationSink::spawn(writer, rig());

        let session = sink.begin_session();
        sink.blink();
        sink.mouth(0.5, session);
        // Well inside the closed-eyes step of the blink
        tokio::time::sleep(Duration::from_millis(10)).await;
        {
            let recorded = writes.lock();
            assert_eq!(recorded.len(), 2);
            assert_eq!(recorded[1], vec![("MouthOpen".to_string(), 0.5)]);
        }

        sink.shutdown().await;
        task.await.unwrap();
    }
}
