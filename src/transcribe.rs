use std::ffi::c_void;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::error::TranscriptionError;
use crate::preprocess::Preprocessor;

/// Characters of already decoded text carried into the next window's prompt.
const CARRY_OVER_CHARS: usize = 100;

pub trait Transcriber: Send {
    fn transcribe(&mut self, samples: &[f32]) -> Result<String, TranscriptionError>;
}

pub struct WhisperTranscriber {
    ctx: WhisperContext,
    language: String,
    preprocessor: Preprocessor,
}

impl WhisperTranscriber {
    pub fn new(model_path: &str, language: &str) -> anyhow::Result<Self> {
        // whisper.cpp is chatty on stderr, which breaks the raw-mode terminal.
        unsafe {
            whisper_rs::set_log_callback(Some(null_log_callback), std::ptr::null_mut());
        }

        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| anyhow::anyhow!("failed to load whisper model {model_path}: {e}"))?;

        Ok(Self {
            ctx,
            language: language.to_string(),
            preprocessor: Preprocessor::default(),
        })
    }

    fn decode_window(&self, window: &[f32], prompt: &str) -> Result<String, TranscriptionError> {
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| TranscriptionError::Model(e.to_string()))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_language(Some(&self.language));
        if !prompt.is_empty() {
            params.set_initial_prompt(prompt);
        }

        state
            .full(params, window)
            .map_err(|e| TranscriptionError::Model(e.to_string()))?;

        let segments = state.full_n_segments().unwrap_or(0);
        let mut text = String::new();
        for i in 0..segments {
            if let Ok(segment) = state.full_get_segment_text(i) {
                text.push_str(&segment);
            }
        }
        Ok(text)
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&mut self, samples: &[f32]) -> Result<String, TranscriptionError> {
        let windows = self.preprocessor.process(samples);
        if windows.is_empty() {
            return Err(TranscriptionError::NoSpeech);
        }
        tracing::debug!(windows = windows.len(), "transcribing");

        let mut text = String::new();
        for window in &windows {
            let prompt = tail_chars(&text, CARRY_OVER_CHARS);
            let decoded = self.decode_window(window, prompt)?;
            text.push_str(&decoded);
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(TranscriptionError::NoSpeech);
        }
        Ok(text.to_string())
    }
}

/// Last `n` characters of `s`, respecting char boundaries.
fn tail_chars(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

extern "C" fn null_log_callback(_level: u32, _message: *const i8, _user_data: *mut c_void) {}
