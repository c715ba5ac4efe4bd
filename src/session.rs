//! Turn-taking between the user and the assistant for one user session.
//!
//! `Idle → Recording → Transcribing → AwaitingReply → Idle`. Collaborator
//! work happens on the [`Worker`]; its completions drive the last two
//! transitions. Turns accumulate in memory and are appended to the user's
//! history file when the session finishes.

use std::time::{Duration, Instant};

use crate::audio::CaptureDevice;
use crate::dialogue::DialogueRequest;
use crate::error::{PersistenceError, SessionError};
use crate::history::{flatten_for_context, HistoryStore, Turn, UserIdentity};
use crate::wav::ClipArchive;
use crate::worker::{Completion, Job, Transcript, Worker};

pub const NOT_UNDERSTOOD: &str = "Sorry, I could not understand the audio.";
pub const APOLOGY: &str = "I'm sorry, I can't answer right now. Let's try again in a moment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Transcribing,
    AwaitingReply,
}

impl SessionState {
    fn describe(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Transcribing => "transcribing",
            SessionState::AwaitingReply => "waiting for a reply",
        }
    }
}

/// Render events for whatever is showing the conversation.
pub trait Presenter {
    fn on_transcript_ready(&mut self, text: &str);
    fn on_reply_ready(&mut self, text: &str);
    fn on_notice(&mut self, text: &str);
}

/// Everything mutable about a session.
struct SessionContext {
    user: UserIdentity,
    state: SessionState,
    /// Flattened prior history, handed to the first dialogue call only.
    pending_context: Option<String>,
    /// Turns produced this session, not yet persisted.
    conversation: Vec<Turn>,
    in_flight: Option<DialogueRequest>,
    recording_since: Option<Instant>,
}

pub struct Session<C: CaptureDevice, P: Presenter> {
    ctx: SessionContext,
    capture: C,
    presenter: P,
    worker: Worker,
    store: HistoryStore,
    archive: Option<ClipArchive>,
    max_recording: Duration,
}

impl<C: CaptureDevice, P: Presenter> Session<C, P> {
    pub fn start(
        user: UserIdentity,
        store: HistoryStore,
        capture: C,
        presenter: P,
        worker: Worker,
        max_recording: Duration,
    ) -> Self {
        let history = store.load_history(&user);
        let context = flatten_for_context(&history);
        tracing::info!(user = %user, prior_turns = history.len(), "session started");

        Self {
            ctx: SessionContext {
                user,
                state: SessionState::Idle,
                pending_context: (!context.is_empty()).then_some(context),
                conversation: Vec::new(),
                in_flight: None,
                recording_since: None,
            },
            capture,
            presenter,
            worker,
            store,
            archive: None,
            max_recording,
        }
    }

    /// Keep every captured utterance as a WAV file.
    pub fn with_archive(mut self, archive: ClipArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn state(&self) -> SessionState {
        self.ctx.state
    }

    pub fn user(&self) -> &UserIdentity {
        &self.ctx.user
    }

    pub fn conversation(&self) -> &[Turn] {
        &self.ctx.conversation
    }

    fn set_state(&mut self, state: SessionState) {
        tracing::debug!(from = ?self.ctx.state, to = ?state, "session state");
        self.ctx.state = state;
    }

    pub fn start_capture(&mut self) -> Result<(), SessionError> {
        if self.ctx.state != SessionState::Idle {
            let state = self.ctx.state.describe();
            self.presenter
                .on_notice(&format!("Still {state}, please wait."));
            return Err(SessionError::InvalidState(state));
        }

        if let Err(e) = self.capture.start() {
            tracing::error!(error = %e, "cannot start recording");
            self.presenter
                .on_notice(&format!("Microphone unavailable: {e}"));
            return Err(e.into());
        }

        self.ctx.recording_since = Some(Instant::now());
        self.set_state(SessionState::Recording);
        Ok(())
    }

    /// Ends the recording and sends it off for transcription. Does nothing
    /// unless recording; an empty buffer goes straight back to idle.
    pub fn stop_capture(&mut self) {
        if self.ctx.state != SessionState::Recording {
            return;
        }
        self.ctx.recording_since = None;

        let samples = self.capture.stop();
        if samples.is_empty() {
            tracing::debug!("nothing recorded");
            self.set_state(SessionState::Idle);
            return;
        }

        if let Some(archive) = &mut self.archive {
            archive.store(&samples);
        }
        tracing::debug!(samples = samples.len(), "utterance captured");
        self.set_state(SessionState::Transcribing);
        self.worker.dispatch(Job::Transcribe { samples });
    }

    /// SPACE in the terminal: start when idle, stop when recording.
    pub fn toggle_capture(&mut self) -> Result<(), SessionError> {
        if self.ctx.state == SessionState::Recording {
            self.stop_capture();
            Ok(())
        } else {
            self.start_capture()
        }
    }

    /// Periodic housekeeping: enforce the recording limit, then apply
    /// whatever the worker has finished.
    pub fn tick(&mut self) {
        if let Some(since) = self.ctx.recording_since {
            if since.elapsed() >= self.max_recording {
                tracing::info!(limit = ?self.max_recording, "recording limit reached");
                self.stop_capture();
            }
        }
        while let Some(completion) = self.worker.try_completion() {
            self.handle(completion);
        }
    }

    pub fn handle(&mut self, completion: Completion) {
        match (self.ctx.state, completion) {
            (SessionState::Transcribing, Completion::Transcribed(Ok(transcript))) => {
                self.on_transcript(transcript);
            }
            (SessionState::Transcribing, Completion::Transcribed(Err(e))) => {
                tracing::warn!(error = %e, "transcription failed");
                self.presenter.on_notice(NOT_UNDERSTOOD);
                self.set_state(SessionState::Idle);
            }
            (SessionState::AwaitingReply, Completion::Replied(Ok(reply))) => {
                self.on_reply(reply);
            }
            (SessionState::AwaitingReply, Completion::Replied(Err(e))) => {
                tracing::warn!(error = %e, "dialogue failed");
                // Keep the prior history for the next attempt.
                if let Some(request) = self.ctx.in_flight.take() {
                    if !request.history_context.is_empty() {
                        self.ctx.pending_context = Some(request.history_context);
                    }
                }
                self.presenter.on_reply_ready(APOLOGY);
                self.set_state(SessionState::Idle);
            }
            (state, completion) => {
                tracing::warn!(?state, ?completion, "completion ignored in this state");
            }
        }
    }

    fn on_transcript(&mut self, transcript: Transcript) {
        tracing::info!(chars = transcript.text.len(), emotion = ?transcript.emotion, "transcript ready");
        self.presenter.on_transcript_ready(&transcript.text);

        let request = DialogueRequest {
            text: transcript.text,
            emotion: transcript.emotion,
            history_context: self.ctx.pending_context.take().unwrap_or_default(),
            session_id: self.ctx.user.to_string(),
        };
        self.ctx.in_flight = Some(request.clone());
        self.set_state(SessionState::AwaitingReply);
        self.worker.dispatch(Job::Reply(request));
    }

    fn on_reply(&mut self, reply: String) {
        self.presenter.on_reply_ready(&reply);
        self.worker.dispatch(Job::Speak(reply.clone()));

        if let Some(request) = self.ctx.in_flight.take() {
            self.ctx.conversation.push(Turn::human(request.text));
            self.ctx.conversation.push(Turn::assistant(reply));
        }
        self.set_state(SessionState::Idle);
    }

    /// Block until the in-flight turn completes or `timeout` passes.
    /// Returns whether the session is idle.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while matches!(
            self.ctx.state,
            SessionState::Transcribing | SessionState::AwaitingReply
        ) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if let Some(completion) = self.worker.wait_completion(remaining) {
                self.handle(completion);
            }
        }
        self.ctx.state == SessionState::Idle
    }

    /// Finish any turn in progress, then append this session's turns to the
    /// user's history. Returns the number of turns now stored.
    pub fn finish(mut self, timeout: Duration) -> Result<usize, PersistenceError> {
        self.stop_capture();
        let settled = self.settle(timeout);
        if !settled {
            tracing::warn!(state = ?self.ctx.state, "giving up on unfinished turn");
        }

        let result = self
            .store
            .append_and_persist(&self.ctx.user, &self.ctx.conversation);
        if let Err(e) = &result {
            tracing::error!(user = %self.ctx.user, error = %e, "could not save history");
            self.presenter
                .on_notice(&format!("Could not save the conversation: {e}"));
        }
        tracing::info!(user = %self.ctx.user, new_turns = self.ctx.conversation.len(), "session finished");

        // Queued speech may still run; a stuck collaborator is left behind.
        let grace = if settled { timeout } else { Duration::ZERO };
        self.worker.shutdown(grace);
        result
    }
}
