//! Main Entrypoint for the Divewatch Voice Assistant
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading the dive records the assistant may query.
//! 3. Wiring the microphone, speaker and Gemini Live connection into a session.
//! 4. Running the session until the server closes it or the operator presses Ctrl+C.
//!
//! The `verify-plan` subcommand runs the one-shot dive plan compliance review.

use anyhow::Context;
use clap::{Parser, Subcommand};
use divewatch_core::compliance::verify_plan;
use divewatch_core::llm_client::GeminiGenerationClient;
use divewatch_core::records::InMemoryRecordStore;
use divewatch_voice::{
    config::{Config, qualify_model},
    devices::{CpalInput, CpalOutput},
    dispatcher::ToolDispatcher,
    session::{SessionController, SessionOptions},
};
use gemini_realtime::{GeminiLiveClient, ServerEvent};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(version, about = "Asistente de voz para operaciones de buceo")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to the assistant through the default microphone and speaker.
    Talk {
        /// JSON snapshot with the divers and dive logs.
        #[arg(long)]
        records: Option<PathBuf>,
        /// Prebuilt voice name.
        #[arg(long)]
        voice: Option<String>,
        /// Live model id.
        #[arg(long)]
        model: Option<String>,
    },
    /// Check a dive plan against the diving regulations.
    VerifyPlan {
        /// Text file containing the dive plan.
        #[arg(long)]
        file: PathBuf,
        /// Generation model id.
        #[arg(long)]
        model: Option<String>,
    },
}

enum Step {
    Event(ServerEvent),
    Shutdown,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded.");

    match cli.command {
        Command::Talk {
            records,
            voice,
            model,
        } => talk(config, records, voice, model).await,
        Command::VerifyPlan { file, model } => review_plan(config, file, model).await,
    }
}

async fn talk(
    config: Config,
    records: Option<PathBuf>,
    voice: Option<String>,
    model: Option<String>,
) -> anyhow::Result<()> {
    let records_path = records.unwrap_or_else(|| config.records_path.clone());
    let store = InMemoryRecordStore::from_json_file(&records_path)?;
    let dispatcher = ToolDispatcher::new(Arc::new(store));

    let options = SessionOptions {
        model: qualify_model(model.as_deref().unwrap_or(&config.live_model)),
        voice: voice.unwrap_or_else(|| config.live_voice.clone()),
        outbound_queue_depth: config.outbound_queue_depth,
    };
    info!(model = %options.model, voice = %options.voice, "Starting voice session...");

    let connector = GeminiLiveClient::new(config.gemini_api_key)
        .with_endpoint(config.live_endpoint)
        .with_setup_timeout(config.connect_timeout);
    let mut session = SessionController::new(
        Box::new(connector),
        dispatcher,
        Box::new(CpalInput::new(config.capture_frame_size)),
        Box::new(CpalOutput::new()),
        options,
    );

    println!("{}", session.status());
    if let Err(e) = session.start().await {
        println!("{}", session.status());
        return Err(e).context("Failed to start the voice session");
    }

    let mut last_status = session.status().to_string();
    let mut printed_turns = 0;
    println!("{}", last_status);
    while session.state().is_active() {
        let step = tokio::select! {
            event = session.next_event() => Step::Event(event.unwrap_or(ServerEvent::ConnectionClosed)),
            _ = tokio::signal::ctrl_c() => Step::Shutdown,
        };
        match step {
            Step::Event(event) => session.handle_event(event),
            Step::Shutdown => {
                info!("Received shutdown signal. Closing the session...");
                session.stop();
            }
        }

        for turn in &session.transcript_log()[printed_turns..] {
            println!("TÚ: {}", turn.user_text);
            println!("IA: {}", turn.model_text);
        }
        printed_turns = session.transcript_log().len();

        if session.status() != last_status {
            last_status = session.status().to_string();
            println!("{}", last_status);
        }
    }

    let stats = session.capture_stats();
    info!(
        frames_sent = stats.frames_sent,
        frames_dropped = stats.frames_dropped_not_ready + stats.frames_dropped_full,
        "Voice session finished."
    );
    Ok(())
}

async fn review_plan(config: Config, file: PathBuf, model: Option<String>) -> anyhow::Result<()> {
    let plan_text = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read dive plan {}", file.display()))?;

    let client = GeminiGenerationClient::new(
        config.gemini_api_key.expose_secret().to_string(),
        model.unwrap_or(config.generation_model),
    );
    let report = verify_plan(&client, &plan_text).await?;

    println!("{}", report.analysis);
    info!(conforming = report.conforming, "Dive plan reviewed.");
    Ok(())
}
