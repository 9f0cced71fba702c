use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use aituber::config::Settings;
use aituber::llm::{OllamaClient, SpeechClassifier};
use aituber::pipeline::{PipelineConfig, TurnPipeline};
use aituber::speech::stt::{ConsoleSource, Transcript};
use aituber::speech::tts::SovitsSynthesizer;
use aituber::vts::{AnimationSink, IdleAnimator, RigParams, VtsApi, VtsWriter};

#[derive(Parser, Debug)]
#[command(name = "aituber", version, about = "An automated virtual streamer")]
struct Cli {
    /// Path to a JSON settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the dialogue model name
    #[arg(short, long)]
    model: Option<String>,

    /// Override the synthesis reference audio path
    #[arg(short = 'r', long)]
    ref_audio: Option<String>,

    /// Read utterances from stdin instead of the microphone
    #[arg(long)]
    text_only: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "aituber=trace,debug"
    } else {
        "aituber=debug,info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut settings =
        Settings::load_or_default(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(model) = &cli.model {
        settings = settings.with_model(model.clone());
    }
    if let Some(ref_audio) = &cli.ref_audio {
        settings = settings.with_ref_audio(ref_audio.clone());
    }

    // The dialogue backend is required; everything else degrades.
    let dialogue = OllamaClient::new(
        settings.dialogue.endpoint.clone(),
        settings.dialogue.model.clone(),
        settings.dialogue.system_prompt.clone(),
        settings.dialogue.temperature,
        settings.dialogue.max_reply_tokens,
        std::time::Duration::from_secs(settings.dialogue.request_timeout_secs),
    )?;
    dialogue
        .check_available()
        .await
        .context("Dialogue backend unreachable")?;
    info!(
        endpoint = %settings.dialogue.endpoint,
        model = %settings.dialogue.model,
        "Dialogue backend ready"
    );

    let synthesizer = SovitsSynthesizer::new(settings.synthesis.clone())?;

    let mut vts = VtsApi::new(settings.vts.clone());
    if let Err(e) = vts.connect().await {
        warn!("VTube Studio not reachable, starting degraded: {}", e);
    }
    let (sink, sink_task) = AnimationSink::spawn(VtsWriter::new(vts), RigParams::from(&settings.vts));

    let animator = IdleAnimator::new(sink.clone(), settings.animation.clone()).spawn();

    let (transcript_tx, transcript_rx) = mpsc::channel::<Transcript>(64);
    let _source = spawn_transcript_source(&cli, &settings, transcript_tx)?;

    let mut pipeline = TurnPipeline::new(
        PipelineConfig::from_settings(&settings),
        Arc::new(dialogue),
        Arc::new(synthesizer),
        sink.clone(),
        transcript_rx,
    );

    if !settings.pipeline.treat_all_as_directed {
        pipeline = pipeline.with_classifier(SpeechClassifier::new(
            settings.pipeline.directed_keywords.clone(),
            settings.pipeline.max_question_chars,
        ));
    }

    #[cfg(feature = "audio-io")]
    if !cli.text_only {
        match aituber::audio::output::CpalPlayback::start() {
            Ok(output) => pipeline = pipeline.with_playback(Box::new(output)),
            Err(e) => warn!("No audio output, replies will be silent: {}", e),
        }
    }

    tokio::select! {
        _ = pipeline.run() => {
            info!("Transcript source closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    animator.abort();
    sink.shutdown().await;
    let _ = sink_task.await;

    Ok(())
}

enum TranscriptSourceHandle {
    Console(tokio::task::JoinHandle<()>),
    #[cfg(feature = "audio-io")]
    Mic(aituber::speech::stt::MicSource),
}

fn spawn_transcript_source(
    cli: &Cli,
    settings: &Settings,
    tx: mpsc::Sender<Transcript>,
) -> anyhow::Result<TranscriptSourceHandle> {
    if cli.text_only {
        return Ok(TranscriptSourceHandle::Console(ConsoleSource::spawn(tx)));
    }

    #[cfg(feature = "audio-io")]
    {
        let mic = aituber::speech::stt::MicSource::start(&settings.stt, tx)
            .context("Failed to start microphone source")?;
        Ok(TranscriptSourceHandle::Mic(mic))
    }

    #[cfg(not(feature = "audio-io"))]
    {
        let _ = settings;
        warn!("Built without audio-io, falling back to console input");
        Ok(TranscriptSourceHandle::Console(ConsoleSource::spawn(tx)))
    }
}
