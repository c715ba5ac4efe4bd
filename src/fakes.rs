//! In-memory collaborators for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::audio::CaptureDevice;
use crate::dialogue::{DialogueEngine, DialogueRequest};
use crate::error::{CaptureError, DialogueError, SpeechError, TranscriptionError};
use crate::session::Presenter;
use crate::speech::Speaker;
use crate::transcribe::Transcriber;

/// Hands out one scripted buffer per recording.
#[derive(Default)]
pub struct ScriptedCapture {
    recordings: VecDeque<Vec<f32>>,
    fail: bool,
    active: bool,
}

impl ScriptedCapture {
    pub fn with(recordings: Vec<Vec<f32>>) -> Self {
        Self {
            recordings: recordings.into(),
            ..Default::default()
        }
    }

    pub fn without_device() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

impl CaptureDevice for ScriptedCapture {
    fn start(&mut self) -> Result<(), CaptureError> {
        if self.fail {
            return Err(CaptureError::NoDevice);
        }
        self.active = true;
        Ok(())
    }

    fn stop(&mut self) -> Vec<f32> {
        if !std::mem::take(&mut self.active) {
            return Vec::new();
        }
        self.recordings.pop_front().unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct FakeTranscriber {
    text: Option<String>,
    calls: Arc<Mutex<usize>>,
}

impl FakeTranscriber {
    pub fn saying(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            text: None,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Transcriber for FakeTranscriber {
    fn transcribe(&mut self, _samples: &[f32]) -> Result<String, TranscriptionError> {
        *self.calls.lock().unwrap() += 1;
        self.text.clone().ok_or(TranscriptionError::NoSpeech)
    }
}

/// Blocks inside `transcribe` until the returned sender is dropped.
pub struct StalledTranscriber {
    release: crossbeam_channel::Receiver<()>,
}

impl StalledTranscriber {
    pub fn new() -> (Self, crossbeam_channel::Sender<()>) {
        let (tx, release) = crossbeam_channel::bounded(0);
        (Self { release }, tx)
    }
}

impl Transcriber for StalledTranscriber {
    fn transcribe(&mut self, _samples: &[f32]) -> Result<String, TranscriptionError> {
        let _ = self.release.recv();
        Err(TranscriptionError::NoSpeech)
    }
}

/// Replies `re: <text>` and remembers every request.
#[derive(Clone, Default)]
pub struct FakeDialogue {
    fail: bool,
    requests: Arc<Mutex<Vec<DialogueRequest>>>,
}

impl FakeDialogue {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<DialogueRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl DialogueEngine for FakeDialogue {
    fn reply(&mut self, request: &DialogueRequest) -> Result<String, DialogueError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(DialogueError::EmptyReply);
        }
        Ok(format!("re: {}", request.text))
    }
}

#[derive(Clone, Default)]
pub struct FakeSpeaker {
    spoken: Arc<Mutex<Vec<String>>>,
}

impl FakeSpeaker {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

impl Speaker for FakeSpeaker {
    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shown {
    Transcript(String),
    Reply(String),
    Notice(String),
}

#[derive(Clone, Default)]
pub struct RecordingPresenter {
    shown: Arc<Mutex<Vec<Shown>>>,
}

impl RecordingPresenter {
    pub fn shown(&self) -> Vec<Shown> {
        self.shown.lock().unwrap().clone()
    }
}

impl Presenter for RecordingPresenter {
    fn on_transcript_ready(&mut self, text: &str) {
        self.shown.lock().unwrap().push(Shown::Transcript(text.to_string()));
    }

    fn on_reply_ready(&mut self, text: &str) {
        self.shown.lock().unwrap().push(Shown::Reply(text.to_string()));
    }

    fn on_notice(&mut self, text: &str) {
        self.shown.lock().unwrap().push(Shown::Notice(text.to_string()));
    }
}

/// Collects formatted `tracing` output emitted inside [`CapturedLogs::during`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn during<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
