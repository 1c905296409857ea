use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use watson_stt_stream::core::audio::{BufferSource, DEFAULT_CHUNK_BYTES, WavFileSource};
use watson_stt_stream::core::stt::watson::{SpeakerLabel, encode_start};
use watson_stt_stream::core::stt::{
    CallbackFuture, RecognitionSettings, ResultsAccumulator, STTError, SessionCallbacks,
    StreamingSession, TranscriptionResult, WatsonWebSocketFactory,
};
use watson_stt_stream::ClientConfig;

/// Watson STT - stream audio to the Watson recognize WebSocket
#[derive(Parser, Debug)]
#[command(name = "watson-stt")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe an audio file
    Transcribe {
        /// Audio file; 16-bit PCM WAV is decoded, anything else is sent as-is
        file: PathBuf,

        /// Bytes per audio frame
        #[arg(long, default_value_t = DEFAULT_CHUNK_BYTES)]
        chunk_bytes: usize,

        /// Delay between audio frames in milliseconds
        #[arg(long)]
        pace_ms: Option<u64>,

        #[command(flatten)]
        recognition: RecognitionArgs,
    },

    /// Print the start frame for the given options without connecting
    StartFrame {
        #[command(flatten)]
        recognition: RecognitionArgs,
    },
}

/// Recognition options; anything set here overrides the configuration file
#[derive(Args, Debug, Clone, Default)]
struct RecognitionArgs {
    /// Audio content type, e.g. audio/flac or audio/l16;rate=16000
    #[arg(long)]
    content_type: Option<String>,

    /// Print interim results while streaming
    #[arg(long)]
    interim: bool,

    /// Request word timestamps
    #[arg(long)]
    timestamps: bool,

    /// Request word confidence scores
    #[arg(long)]
    word_confidence: bool,

    /// Request speaker labels
    #[arg(long)]
    speaker_labels: bool,

    #[arg(long)]
    max_alternatives: Option<u32>,

    /// Seconds of silence before the service ends the session (-1 = never)
    #[arg(long, allow_hyphen_values = true)]
    inactivity_timeout: Option<i32>,

    /// Comma-separated keywords to spot
    #[arg(long, value_delimiter = ',')]
    keywords: Vec<String>,

    #[arg(long)]
    keywords_threshold: Option<f64>,
}

impl RecognitionArgs {
    fn apply(&self, settings: &mut RecognitionSettings) {
        if let Some(content_type) = &self.content_type {
            settings.content_type = Some(content_type.clone());
        }
        if self.interim {
            settings.interim_results = Some(true);
        }
        if self.timestamps {
            settings.timestamps = Some(true);
        }
        if self.word_confidence {
            settings.word_confidence = Some(true);
        }
        if self.speaker_labels {
            settings.speaker_labels = Some(true);
        }
        if self.max_alternatives.is_some() {
            settings.max_alternatives = self.max_alternatives;
        }
        if self.inactivity_timeout.is_some() {
            settings.inactivity_timeout = self.inactivity_timeout;
        }
        if !self.keywords.is_empty() {
            settings.keywords = Some(self.keywords.clone());
        }
        if self.keywords_threshold.is_some() {
            settings.keywords_threshold = self.keywords_threshold;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries the transcript
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    // Load configuration from file or environment
    let config = match &cli.config {
        Some(config_path) => {
            info!("Loading configuration from {}", config_path.display());
            ClientConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
        }
        None => ClientConfig::from_env().map_err(|e| anyhow!(e.to_string()))?,
    };

    match cli.command {
        Commands::StartFrame { recognition } => {
            let mut settings = config.recognition;
            recognition.apply(&mut settings);
            settings.validate()?;
            println!("{}", encode_start(&settings)?);
            Ok(())
        }
        Commands::Transcribe {
            file,
            chunk_bytes,
            pace_ms,
            recognition,
        } => transcribe(config, &file, chunk_bytes, pace_ms, &recognition).await,
    }
}

async fn transcribe(
    config: ClientConfig,
    file: &Path,
    chunk_bytes: usize,
    pace_ms: Option<u64>,
    args: &RecognitionArgs,
) -> anyhow::Result<()> {
    let mut settings = config.recognition;
    args.apply(&mut settings);

    let is_wav = file
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
    let mut source = if is_wav {
        let wav = WavFileSource::open(file)?;
        info!(
            "Loaded {} ({:?}, {} Hz, {} channel(s))",
            file.display(),
            wav.duration(),
            wav.sample_rate(),
            wav.channels()
        );
        if settings.content_type.is_none() {
            settings.content_type = Some(wav.content_type());
        }
        wav.into_buffer(chunk_bytes)
    } else {
        let data = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        if settings.content_type.is_none() {
            anyhow::bail!("--content-type is required for non-WAV input");
        }
        BufferSource::new(data, chunk_bytes)
    };
    if let Some(ms) = pace_ms {
        source = source.with_pacing(Duration::from_millis(ms));
    }

    let factory = Arc::new(WatsonWebSocketFactory::new(&config.socket)?);
    let accumulator = Arc::new(Mutex::new(ResultsAccumulator::new()));
    let print_interim = args.interim;

    let results = accumulator.clone();
    let labels = accumulator.clone();
    let callbacks = SessionCallbacks::new(Arc::new(move |result: TranscriptionResult| -> CallbackFuture {
        let results = results.clone();
        Box::pin(async move {
            if print_interim && !result.is_final {
                eprintln!("... {}", result.transcript().trim());
            }
            results.lock().add_result(result);
        })
    }))
    .with_speaker_labels(Arc::new(move |batch: Vec<SpeakerLabel>| -> CallbackFuture {
        let labels = labels.clone();
        Box::pin(async move {
            labels.lock().add_speaker_labels(batch);
        })
    }))
    .with_failure(Arc::new(|err: STTError| -> CallbackFuture {
        Box::pin(async move {
            error!("Transcription failed: {}", err);
        })
    }));

    let session = StreamingSession::start(factory, config.socket, settings, callbacks).await?;
    info!(session_id = %session.id(), "Streaming {} bytes", source.len());

    let sink = session.audio_sink();
    tokio::select! {
        streamed = source.stream_into(&sink) => {
            streamed?;
            session.stop();
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, cancelling session");
            session.cancel();
        }
    }
    session.closed().await?;

    let accumulator = accumulator.lock();
    println!("{}", accumulator.best_transcript());
    if !accumulator.speaker_labels().is_empty() {
        info!("Received {} speaker labels", accumulator.speaker_labels().len());
    }
    Ok(())
}
