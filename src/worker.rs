//! Background thread that owns the collaborators. The session sends it
//! jobs and gets completions back, so the terminal stays responsive while
//! Whisper and the chat model run.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::dialogue::{DialogueEngine, DialogueRequest};
use crate::emotion::EmotionClassifier;
use crate::error::{DialogueError, TranscriptionError};
use crate::speech::Speaker;
use crate::transcribe::Transcriber;

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub emotion: Option<String>,
}

pub enum Job {
    Transcribe { samples: Vec<f32> },
    Reply(DialogueRequest),
    Speak(String),
    Shutdown,
}

#[derive(Debug)]
pub enum Completion {
    Transcribed(Result<Transcript, TranscriptionError>),
    Replied(Result<String, DialogueError>),
}

pub struct Collaborators {
    pub transcriber: Box<dyn Transcriber>,
    pub emotion: Box<dyn EmotionClassifier>,
    pub dialogue: Box<dyn DialogueEngine>,
    pub speaker: Box<dyn Speaker>,
}

pub struct Worker {
    jobs: Sender<Job>,
    completions: Receiver<Completion>,
    exited: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(collaborators: Collaborators) -> std::io::Result<Self> {
        let (jobs, job_rx) = crossbeam_channel::unbounded();
        let (done_tx, completions) = crossbeam_channel::unbounded();
        let (exit_tx, exited) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("collaborators".into())
            .spawn(move || {
                run(collaborators, job_rx, done_tx);
                let _ = exit_tx.send(());
            })?;

        Ok(Self {
            jobs,
            completions,
            exited,
            handle: Some(handle),
        })
    }

    pub fn dispatch(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            tracing::error!("worker thread is gone, job dropped");
        }
    }

    pub fn try_completion(&self) -> Option<Completion> {
        self.completions.try_recv().ok()
    }

    pub fn wait_completion(&self, timeout: Duration) -> Option<Completion> {
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::error!("worker thread exited unexpectedly");
                None
            }
        }
    }

    /// Ask the thread to stop after its queued jobs and wait up to `grace`
    /// for it. A thread still stuck in a collaborator call after that is
    /// detached; it dies with the process. Returns whether it was joined.
    pub fn shutdown(mut self, grace: Duration) -> bool {
        let _ = self.jobs.send(Job::Shutdown);
        match self.exited.recv_timeout(grace) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.join();
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(?grace, "worker still busy, detaching it");
                self.handle.take();
                false
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    /// Lets queued jobs (a reply still being spoken) finish, then joins.
    /// Use [`Worker::shutdown`] when a stuck collaborator must not block.
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        self.join();
    }
}

fn run(mut c: Collaborators, jobs: Receiver<Job>, done: Sender<Completion>) {
    tracing::debug!("worker started");
    for job in jobs.iter() {
        let completion = match job {
            Job::Transcribe { samples } => {
                let result = c.transcriber.transcribe(&samples).map(|text| Transcript {
                    text,
                    emotion: c.emotion.classify(&samples),
                });
                Completion::Transcribed(result)
            }
            Job::Reply(request) => Completion::Replied(c.dialogue.reply(&request)),
            Job::Speak(text) => {
                if let Err(e) = c.speaker.speak(&text) {
                    tracing::warn!(error = %e, "could not speak reply");
                }
                continue;
            }
            Job::Shutdown => break,
        };
        if done.send(completion).is_err() {
            break;
        }
    }
    tracing::debug!("worker stopped");
}
