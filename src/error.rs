use std::path::PathBuf;

use thiserror::Error;

/// Microphone failures. Fatal to the current recording attempt only.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device available")]
    NoDevice,

    #[error("audio stream error: {0}")]
    Stream(String),
}

#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("no speech detected")]
    NoSpeech,

    #[error("whisper failed: {0}")]
    Model(String),
}

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("request to dialogue backend failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("dialogue backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("dialogue backend returned an empty reply")]
    EmptyReply,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cannot read history {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("history {path} is not valid, refusing to overwrite it: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot write history {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode history: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot start recording while {0}")]
    InvalidState(&'static str),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("user id is empty")]
    Empty,

    #[error("user id {0:?} cannot be used as a file name")]
    Unsafe(String),
}
