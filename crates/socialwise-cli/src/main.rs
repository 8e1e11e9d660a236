mod logging;

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{info, warn};

use socialwise_core::config::Config;
use socialwise_speech::service::{SPEED_FACTOR_RANGE, VOICES};
use socialwise_speech::{AuthSigner, Credential, SessionUpdate, SpeechService, wav};

#[derive(Parser)]
#[command(
    name = "socialwise",
    about = "Speech gateway for streaming recognition and synthesis",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe a WAV file or raw 16-bit mono PCM
    Transcribe {
        file: PathBuf,

        /// Print partial results as they arrive
        #[arg(long)]
        stream: bool,
    },

    /// Synthesize text to audio
    Synthesize {
        text: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Voice name (see `socialwise voices`)
        #[arg(long)]
        voice: Option<String>,

        /// Speaking-rate multiplier (0.5 to 2.0)
        #[arg(long)]
        speed: Option<f32>,

        /// Write raw PCM instead of WAV
        #[arg(long)]
        raw: bool,
    },

    /// List available synthesis voices
    Voices,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show configuration and readiness
    Status,

    /// Diagnose common issues
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a config value by dotted path
    Get { key: String },
    /// Validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    logging::init(&config.logging_or_default(), cli.verbose)?;

    // Must happen before any wss:// handshake.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    #[cfg(feature = "metrics")]
    let metrics = socialwise_speech::metrics::install_prometheus_recorder()?;

    match cli.command {
        Commands::Transcribe { file, stream } => {
            let service = SpeechService::from_config(&config.speech_or_default())?;
            transcribe(&service, &file, stream).await?;
        }
        Commands::Synthesize {
            text,
            output,
            voice,
            speed,
            raw,
        } => {
            let service = SpeechService::from_config(&config.speech_or_default())?;
            synthesize(&service, &text, &output, voice, speed, raw).await?;
        }
        Commands::Voices => {
            let speech = config.speech_or_default();
            for voice in VOICES {
                let marker = if voice.name == speech.tts.voice { "*" } else { " " };
                println!("{marker} {:<10} {}", voice.name, voice.description);
            }
            println!(
                "\nSpeed: {}x to {}x (configured level {})",
                SPEED_FACTOR_RANGE.0, SPEED_FACTOR_RANGE.1, speech.tts.speed
            );
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => bail!("No config value at '{key}'"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    bail!("Configuration has {} error(s)", errors.len());
                }
                println!("Configuration OK");
            }
        },
        Commands::Status => {
            let speech = config.speech_or_default();
            let health = SpeechService::health(&speech);
            println!("SocialWise v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Config: {}{}",
                config_path.display(),
                if config_path.exists() { "" } else { " (not found, using defaults)" }
            );
            println!("Credentials: {}", ready(health.config));
            println!("ASR: {} ({})", ready(health.asr_available), speech.asr.url);
            println!("TTS: {} ({})", ready(health.tts_available), speech.tts.url);
        }
        Commands::Doctor => {
            if !doctor(&config, &config_path) {
                bail!("Doctor found problems");
            }
        }
    }

    #[cfg(feature = "metrics")]
    if cli.verbose {
        eprintln!("{}", metrics.render());
    }

    Ok(())
}

fn ready(ok: bool) -> &'static str {
    if ok { "ready" } else { "unavailable" }
}

fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

async fn transcribe(service: &SpeechService, file: &Path, stream: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let audio = if is_wav(&bytes) {
        let (spec, pcm) = wav::read_wav(&bytes)?;
        if spec.channels != 1 {
            bail!("Expected mono audio, {} has {} channels", file.display(), spec.channels);
        }
        let expected = service.settings().asr.sample_rate;
        if spec.sample_rate != expected {
            warn!(
                file_rate = spec.sample_rate,
                expected_rate = expected,
                "Sample rate differs from the configured ASR rate"
            );
        }
        pcm
    } else {
        bytes
    };

    if stream {
        let mut updates = service.recognize_stream(&audio).await?;
        while let Some(update) = updates.next().await {
            if let SessionUpdate::Recognition(update) = update? {
                if update.is_final {
                    println!("{}", update.text);
                } else {
                    eprintln!("... {}", update.text);
                }
            }
        }
    } else {
        let transcript = service.recognize(&audio).await?;
        info!(confidence = transcript.confidence, "Transcript ready");
        println!("{}", transcript.text);
    }
    Ok(())
}

async fn synthesize(
    service: &SpeechService,
    text: &str,
    output: &Path,
    voice: Option<String>,
    speed: Option<f32>,
    raw: bool,
) -> anyhow::Result<()> {
    let mut options = service.default_options();
    if let Some(voice) = voice {
        if !VOICES.iter().any(|v| v.name == voice) {
            warn!(voice = %voice, "Voice is not in the catalogue, sending as-is");
        }
        options = options.with_voice(voice);
    }
    if let Some(factor) = speed {
        let (min, max) = SPEED_FACTOR_RANGE;
        if !(min..=max).contains(&factor) {
            bail!("--speed must be between {min} and {max}, got {factor}");
        }
        options = options.with_speed_factor(factor);
    }

    let audio = if raw {
        service.synthesize(text, &options).await?
    } else {
        service.synthesize_wav(text, &options).await?
    };
    std::fs::write(output, &audio).with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote {} bytes to {}", audio.len(), output.display());
    Ok(())
}

/// Offline checks. Returns false when any check fails.
fn doctor(config: &Config, config_path: &Path) -> bool {
    let mut healthy = true;
    let mut check = |ok: bool, label: &str, detail: String| {
        let mark = if ok { "ok  " } else { "FAIL" };
        println!("[{mark}] {label}: {detail}");
        healthy &= ok;
    };

    check(
        true,
        "config file",
        if config_path.exists() {
            config_path.display().to_string()
        } else {
            format!("{} not found, using defaults", config_path.display())
        },
    );

    let (warnings, errors) = config.validate();
    for w in warnings {
        println!("[warn] {w}");
    }
    check(
        errors.is_empty(),
        "config validation",
        if errors.is_empty() {
            "no errors".to_string()
        } else {
            errors.join("; ")
        },
    );

    let speech = config.speech_or_default();
    match Credential::from_config(&speech) {
        Ok(credential) => {
            check(true, "credentials", format!("{credential:?}"));
            for (label, url) in [("ASR signing", &speech.asr.url), ("TTS signing", &speech.tts.url)] {
                let signed = AuthSigner::new(url)
                    .and_then(|signer| signer.sign(&credential, Utc::now()));
                match signed {
                    Ok(endpoint) => check(true, label, format!("host {}", endpoint.host())),
                    Err(e) => check(false, label, e.to_string()),
                }
            }
        }
        Err(e) => check(false, "credentials", e.to_string()),
    }

    healthy
}
