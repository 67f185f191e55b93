use anyhow::{Context, Result};
use clap::Parser;
use modular_asr::AudioInput;
use modular_asr::cli::{Cli, Commands, DecodeArgs};
use modular_asr::config::Config;
use modular_asr::pipeline::{Transcript, TranscriptionPipeline};
use modular_asr::stt::ModelRegistry;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    tracing::debug!(version = %modular_asr::version_string(), "masr starting");

    match cli.command {
        Commands::Transcribe { file, decode } => {
            let config = load_config(cli.config.as_deref())?;
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let input = match file.extension().and_then(|ext| ext.to_str()) {
                Some(ext) => AudioInput::encoded_with_hint(bytes, ext),
                None => AudioInput::encoded(bytes),
            };
            run_transcription(&config, input, &decode).await?;
        }
        #[cfg(feature = "cpal-audio")]
        Commands::Record {
            seconds,
            sample_rate,
            device,
            decode,
        } => {
            use modular_asr::audio::capture::{CaptureRequest, record_async};

            let config = load_config(cli.config.as_deref())?;
            let mut request = CaptureRequest::new(seconds);
            if let Some(rate) = sample_rate {
                request = request.with_sample_rate(rate);
            }
            if let Some(device) = device {
                request = request.with_device(device);
            }
            eprintln!("Recording {seconds:.1}s...");
            let capture = record_async(request).await?;
            run_transcription(&config, AudioInput::Capture(capture), &decode).await?;
        }
        Commands::Models => {
            let config = load_config(cli.config.as_deref())?;
            list_models(&ModelRegistry::from_config(&config)?);
        }
        Commands::Health { model } => {
            let config = load_config(cli.config.as_deref())?;
            let registry = ModelRegistry::from_config(&config)?;
            check_health(&registry, model.as_deref()).await?;
        }
        #[cfg(feature = "cpal-audio")]
        Commands::Devices => {
            list_audio_devices()?;
        }
    }

    Ok(())
}

/// Install the stderr log subscriber.
///
/// `MASR_LOG` takes an `EnvFilter` directive and wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "modular_asr=info",
        1 => "modular_asr=debug",
        _ => "modular_asr=trace",
    };
    let env_filter =
        EnvFilter::try_from_env("MASR_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/modular-asr/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top of all three.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };
    Ok(config.with_env_overrides())
}

async fn run_transcription(config: &Config, input: AudioInput, decode: &DecodeArgs) -> Result<()> {
    let registry = Arc::new(ModelRegistry::from_config(config)?);
    let pipeline = TranscriptionPipeline::new(registry, config.pipeline.clone());
    let request = decode.to_request();

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling transcription");
            on_interrupt.cancel();
        }
    });

    let execution = pipeline.execute(input, &request, cancel).await;
    tracing::debug!(transitions = ?execution.transitions, "Request finished");
    let transcript = execution.into_result()?;

    if decode.json {
        println!("{}", serde_json::to_string_pretty(&transcript)?);
    } else {
        println!("{}", transcript.text);
    }
    report_missing(&transcript);
    Ok(())
}

fn report_missing(transcript: &Transcript) {
    if transcript.is_complete() {
        return;
    }
    let missing: Vec<String> = transcript
        .missing_chunks
        .iter()
        .map(ToString::to_string)
        .collect();
    eprintln!(
        "Warning: {} of {} chunks failed and are missing from the text (chunks {})",
        transcript.missing_chunks.len(),
        transcript.diagnostics.len(),
        missing.join(", ")
    );
}

fn list_models(registry: &ModelRegistry) {
    println!("Registered models:");
    for id in registry.ids() {
        let marker = if id == registry.default_id() { "*" } else { " " };
        match registry.resolve(Some(&id)) {
            Ok(model) => {
                let descriptor = model.describe();
                let caps = &descriptor.capabilities;
                let mut flags = Vec::new();
                if caps.translate {
                    flags.push("translate");
                }
                if caps.word_timestamps {
                    flags.push("word-timestamps");
                }
                if !caps.concurrent {
                    flags.push("sequential");
                }
                println!(
                    "{marker} {:<14} {} v{} ({} languages{}{})",
                    descriptor.id,
                    descriptor.display_name,
                    descriptor.version,
                    descriptor.languages.len(),
                    if flags.is_empty() { "" } else { ", " },
                    flags.join(", ")
                );
                if let Some(location) = &descriptor.location {
                    println!("    {location}");
                }
            }
            Err(e) => println!("{marker} {id:<14} unavailable: {e}"),
        }
    }
}

async fn check_health(registry: &ModelRegistry, only: Option<&str>) -> Result<()> {
    let ids = match only {
        Some(id) => vec![id.to_string()],
        None => registry.ids(),
    };

    let mut down = Vec::new();
    for id in ids {
        let alive = match registry.resolve(Some(&id)) {
            Ok(model) => model.health_check().await,
            Err(e) if only.is_some() => return Err(e.into()),
            Err(e) => {
                tracing::debug!(model = %id, error = %e, "Model could not be constructed");
                false
            }
        };
        println!("{:<14} {}", id, if alive { "ok" } else { "unreachable" });
        if !alive {
            down.push(id);
        }
    }

    if !down.is_empty() {
        anyhow::bail!("{} backend(s) unreachable: {}", down.len(), down.join(", "));
    }
    Ok(())
}

/// List available audio input devices.
#[cfg(feature = "cpal-audio")]
fn list_audio_devices() -> Result<()> {
    let devices = modular_asr::audio::capture::list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}
