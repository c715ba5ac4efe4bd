//! Reply generation through an Ollama chat model.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::StudentProfile;
use crate::error::DialogueError;

/// Everything the model needs for one user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueRequest {
    pub text: String,
    pub emotion: Option<String>,
    /// Flattened prior history. Only non-empty on the first call of a session.
    pub history_context: String,
    /// Selects the conversation thread the backend keeps.
    pub session_id: String,
}

pub trait DialogueEngine: Send {
    fn reply(&mut self, request: &DialogueRequest) -> Result<String, DialogueError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }

    fn is_system(&self) -> bool {
        self.role == "system"
    }
}

const SUMMARY_PREFIX: &str = "Short-Term Summary: ";

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

pub struct OllamaChat {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_thread_messages: usize,
    profile: Option<StudentProfile>,
    threads: HashMap<String, Vec<ChatMessage>>,
}

impl OllamaChat {
    pub fn new(
        base_url: &str,
        model: &str,
        temperature: f32,
        timeout: Duration,
        max_thread_messages: usize,
        profile: Option<StudentProfile>,
    ) -> Result<Self, DialogueError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", base_url.trim_end_matches('/')),
            model: model.to_string(),
            temperature,
            max_thread_messages,
            profile,
            threads: HashMap::new(),
        })
    }

    fn system_prompt(&self, emotion: Option<&str>) -> String {
        let mut prompt = String::from(
            "You are a supportive companion trying to lower a student's stress level \
             to the best of your ability. Encourage them, help them manage their time, \
             and keep replies short and easy to listen to: plain sentences, no lists, no emojis.",
        );
        if let Some(emotion) = emotion {
            prompt.push_str(&format!(" The student is feeling {emotion}."));
        }
        if let Some(profile) = &self.profile {
            prompt.push_str("\n\nStudent profile:\n");
            prompt.push_str(&profile.describe());
        }
        prompt
    }
}

fn build_messages(system: &str, thread: &[ChatMessage], text: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(thread.len() + 2);
    messages.push(ChatMessage::new("system", system));
    messages.extend_from_slice(thread);
    messages.push(ChatMessage::new("user", text));
    messages
}

/// Remove the oldest non-system messages until at most `max` remain and
/// return them, oldest first.
fn take_overflow(thread: &mut Vec<ChatMessage>, max: usize) -> Vec<ChatMessage> {
    let conversational = thread.iter().filter(|m| !m.is_system()).count();
    let mut excess = conversational.saturating_sub(max);
    if excess == 0 {
        return Vec::new();
    }

    let mut dropped = Vec::with_capacity(excess);
    let mut kept = Vec::with_capacity(thread.len() - excess);
    for message in thread.drain(..) {
        if excess > 0 && !message.is_system() {
            excess -= 1;
            dropped.push(message);
        } else {
            kept.push(message);
        }
    }
    *thread = kept;
    dropped
}

fn current_summary(thread: &[ChatMessage]) -> Option<&str> {
    thread
        .iter()
        .filter(|m| m.is_system())
        .find_map(|m| m.content.strip_prefix(SUMMARY_PREFIX))
}

/// Ask for a summary of `dropped`, folding in the summary they extend.
fn summary_prompt(previous: Option<&str>, dropped: &[ChatMessage]) -> String {
    let mut prompt = String::from(
        "Summarize the following conversation between the student and the assistant \
         in 2-4 sentences, capturing the key points:\n\n",
    );
    if let Some(previous) = previous {
        prompt.push_str(&format!("EARLIER SUMMARY: {previous}\n"));
    }
    for message in dropped {
        prompt.push_str(&format!("{}: {}\n", message.role.to_uppercase(), message.content));
    }
    prompt
}

/// Keep exactly one summary message, right after the leading context.
fn store_summary(thread: &mut Vec<ChatMessage>, summary: &str) {
    let content = format!("{SUMMARY_PREFIX}{summary}");
    if let Some(existing) = thread
        .iter_mut()
        .find(|m| m.is_system() && m.content.starts_with(SUMMARY_PREFIX))
    {
        existing.content = content;
        return;
    }
    let at = thread.iter().take_while(|m| m.is_system()).count();
    thread.insert(at, ChatMessage::new("system", content));
}

impl OllamaChat {
    fn chat(&self, messages: &[ChatMessage]) -> Result<String, DialogueError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "stream": false,
                "options": { "temperature": self.temperature },
            }))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DialogueError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply = response.json::<ChatResponse>()?.message.content;
        let reply = reply.trim();
        if reply.is_empty() {
            return Err(DialogueError::EmptyReply);
        }
        Ok(reply.to_string())
    }

    fn reply_in(
        &self,
        thread: &mut Vec<ChatMessage>,
        request: &DialogueRequest,
    ) -> Result<String, DialogueError> {
        if thread.is_empty() && !request.history_context.is_empty() {
            thread.push(ChatMessage::new(
                "system",
                format!(
                    "Earlier conversations with this student, oldest first:\n\n{}",
                    request.history_context
                ),
            ));
        }

        let system = self.system_prompt(request.emotion.as_deref());
        let messages = build_messages(&system, thread, &request.text);
        tracing::debug!(
            session = %request.session_id,
            messages = messages.len(),
            emotion = ?request.emotion,
            "requesting reply"
        );

        let reply = self.chat(&messages)?;
        thread.push(ChatMessage::new("user", request.text.clone()));
        thread.push(ChatMessage::new("assistant", reply.clone()));
        self.compact(thread);
        Ok(reply)
    }

    /// Fold messages beyond the thread limit into the short-term summary.
    /// If the summary call fails they are dropped without one.
    fn compact(&self, thread: &mut Vec<ChatMessage>) {
        let dropped = take_overflow(thread, self.max_thread_messages);
        if dropped.is_empty() {
            return;
        }

        let prompt = summary_prompt(current_summary(thread), &dropped);
        let messages = [
            ChatMessage::new("system", "You are a helpful summarization assistant."),
            ChatMessage::new("user", prompt),
        ];
        match self.chat(&messages) {
            Ok(summary) => {
                tracing::debug!(dropped = dropped.len(), "short-term summary updated");
                store_summary(thread, &summary);
            }
            Err(e) => {
                tracing::warn!(error = %e, dropped = dropped.len(), "could not summarize, trimming thread");
            }
        }
    }
}

impl DialogueEngine for OllamaChat {
    fn reply(&mut self, request: &DialogueRequest) -> Result<String, DialogueError> {
        let mut thread = self.threads.remove(&request.session_id).unwrap_or_default();
        let result = self.reply_in(&mut thread, request);
        self.threads.insert(request.session_id.clone(), thread);
        result
    }
}
