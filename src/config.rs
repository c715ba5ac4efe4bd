use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const APP_DIR: &str = "voice-companion";

/// Optional background about the student, appended to the system prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub name: Option<String>,
    pub major: Option<String>,
    pub gender: Option<String>,
    pub main_issues: Option<String>,
    pub other_notes: Option<String>,
}

impl StudentProfile {
    pub fn describe(&self) -> String {
        let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".to_string());
        format!(
            "Name: {}\nMajor: {}\nGender: {}\nMain issues: {}\nOther notes: {}",
            field(&self.name),
            field(&self.major),
            field(&self.gender),
            field(&self.main_issues),
            field(&self.other_notes)
        )
    }
}

/// Settings file contents. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_path: String,
    pub language: String,
    pub ollama_url: String,
    pub llm_model: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_thread_messages: usize,
    pub history_dir: Option<PathBuf>,
    pub recordings_dir: Option<PathBuf>,
    pub max_recording_secs: u64,
    pub emotion: Option<String>,
    pub tts_program: String,
    pub tts_args: Vec<String>,
    pub speak_replies: bool,
    pub profile: Option<StudentProfile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: "models/ggml-base.bin".to_string(),
            language: "en".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            llm_model: "llama3.1".to_string(),
            temperature: 0.0,
            request_timeout_secs: 120,
            max_thread_messages: 40,
            history_dir: None,
            recordings_dir: None,
            max_recording_secs: 10,
            emotion: None,
            tts_program: "espeak-ng".to_string(),
            tts_args: Vec::new(),
            speak_replies: true,
            profile: None,
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    pub fn log_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("voice-companion.log")
    }

    /// Missing file means defaults. A broken file is reported and ignored.
    pub fn load(path: &Path) -> Self {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Self::default();
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read config, using defaults");
                return Self::default();
            }
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "malformed config, using defaults");
            Self::default()
        })
    }
}
