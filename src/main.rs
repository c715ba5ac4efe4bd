mod audio;
mod config;
mod dialogue;
mod emotion;
mod error;
#[cfg(test)]
mod fakes;
mod history;
mod preprocess;
mod session;
mod speech;
mod transcribe;
mod ui;
mod wav;
mod worker;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use audio::{CaptureDevice, Microphone};
use config::Config;
use dialogue::OllamaChat;
use emotion::{EmotionClassifier, FixedEmotion, NoEmotion};
use history::{HistoryStore, UserIdentity};
use session::{Presenter, Session};
use speech::{CommandSpeaker, Silent, Speaker};
use transcribe::WhisperTranscriber;
use ui::TerminalPresenter;
use wav::ClipArchive;
use worker::{Collaborators, Worker};

#[derive(Parser, Debug)]
#[command(name = "voice-companion", version, about = "Talk through study stress with a voice companion")]
struct Cli {
    /// Whose history to load and extend. A guest id is generated when absent.
    #[arg(short, long, env = "VOICE_COMPANION_USER")]
    user: Option<String>,

    /// Settings file (default: <config dir>/voice-companion/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Whisper model file
    #[arg(long)]
    model: Option<String>,

    /// Spoken language code passed to Whisper
    #[arg(long)]
    language: Option<String>,

    #[arg(long)]
    ollama_url: Option<String>,

    /// Chat model served by Ollama
    #[arg(long)]
    llm_model: Option<String>,

    #[arg(long)]
    history_dir: Option<PathBuf>,

    /// Keep every recording as a WAV file in this directory
    #[arg(long)]
    recordings_dir: Option<PathBuf>,

    /// Tell the companion how you feel (Angry, Sad, Happy, Surprise, Fear, Disgust, Contempt, Neutral)
    #[arg(long)]
    emotion: Option<String>,

    /// Do not speak replies aloud
    #[arg(long)]
    no_speech: bool,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.model_path.clone_from(model);
    }
    if let Some(language) = &cli.language {
        config.language.clone_from(language);
    }
    if let Some(url) = &cli.ollama_url {
        config.ollama_url.clone_from(url);
    }
    if let Some(model) = &cli.llm_model {
        config.llm_model.clone_from(model);
    }
    if cli.history_dir.is_some() {
        config.history_dir.clone_from(&cli.history_dir);
    }
    if cli.recordings_dir.is_some() {
        config.recordings_dir.clone_from(&cli.recordings_dir);
    }
    if cli.emotion.is_some() {
        config.emotion.clone_from(&cli.emotion);
    }
    if cli.no_speech {
        config.speak_replies = false;
    }
}

/// Logs go to a file: the terminal is in raw mode while the session runs.
fn init_logging(verbose: u8) -> anyhow::Result<PathBuf> {
    let filter = match verbose {
        0 => "info",
        1 => "info,voice_companion=debug",
        2 => "debug",
        _ => "trace",
    };

    let path = Config::log_path();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(path)
}

fn build_collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let emotion: Box<dyn EmotionClassifier> = match &config.emotion {
        Some(label) => Box::new(FixedEmotion::new(label).ok_or_else(|| {
            anyhow::anyhow!("unknown emotion {label:?}, expected one of {:?}", emotion::LABELS)
        })?),
        None => Box::new(NoEmotion),
    };

    println!("Loading model...");
    let transcriber = WhisperTranscriber::new(&config.model_path, &config.language)?;
    println!("Model loaded!");

    let dialogue = OllamaChat::new(
        &config.ollama_url,
        &config.llm_model,
        config.temperature,
        Duration::from_secs(config.request_timeout_secs),
        config.max_thread_messages,
        config.profile.clone(),
    )?;

    let speaker: Box<dyn Speaker> = if config.speak_replies {
        match CommandSpeaker::locate(&config.tts_program, &config.tts_args) {
            Some(speaker) => Box::new(speaker),
            None => {
                println!("⚠️  {} not found, replies will only be printed.", config.tts_program);
                Box::new(Silent)
            }
        }
    } else {
        Box::new(Silent)
    };

    Ok(Collaborators {
        transcriber: Box::new(transcriber),
        emotion,
        dialogue: Box::new(dialogue),
        speaker,
    })
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path);
    apply_overrides(&mut config, &cli);
    tracing::debug!(?config, "configuration resolved");

    let user = match cli.user.as_deref() {
        Some(raw) => UserIdentity::new(raw)?,
        None => UserIdentity::guest(),
    };

    let worker = Worker::spawn(build_collaborators(&config)?)?;
    let store = HistoryStore::new(
        config
            .history_dir
            .clone()
            .unwrap_or_else(HistoryStore::default_dir),
    );

    let mut session = Session::start(
        user.clone(),
        store,
        Microphone::new(),
        TerminalPresenter,
        worker,
        Duration::from_secs(config.max_recording_secs),
    );
    if let Some(dir) = config.recordings_dir.clone() {
        session = session.with_archive(ClipArchive::new(dir, user.as_str()));
    }

    let ui_result = ui::run(&mut session, &format!("Hi {user}, how are you feeling today?"));

    println!("Finishing up...");
    let timeout = Duration::from_secs(config.request_timeout_secs.saturating_mul(2));
    end_session(session, ui_result, timeout)
}

/// Save the session whatever happened to the terminal, then report the
/// terminal failure if there was one.
fn end_session<C: CaptureDevice, P: Presenter>(
    session: Session<C, P>,
    ui_result: anyhow::Result<()>,
    timeout: Duration,
) -> anyhow::Result<bool> {
    let user = session.user().clone();
    let saved = session.finish(timeout);
    ui_result?;

    match saved {
        Ok(total) => {
            println!("Conversation saved ({total} turns for {user}). Goodbye.");
            Ok(true)
        }
        // Already shown by the session; exit anyway.
        Err(_) => Ok(false),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match init_logging(cli.verbose) {
        Ok(path) => tracing::info!(log = %path.display(), "voice-companion starting"),
        Err(e) => eprintln!("logging disabled: {e}"),
    }

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
