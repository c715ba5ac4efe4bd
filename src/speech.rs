use std::process::{Command, Stdio};

use crate::error::SpeechError;

pub trait Speaker: Send {
    fn speak(&mut self, text: &str) -> Result<(), SpeechError>;
}

/// Used when no TTS program is available or speech is turned off.
pub struct Silent;

impl Speaker for Silent {
    fn speak(&mut self, _text: &str) -> Result<(), SpeechError> {
        Ok(())
    }
}

/// Runs an external TTS program with the text as its last argument and
/// waits for it to finish playing.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
}

impl CommandSpeaker {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }

    /// `None` when `program` cannot be found on `PATH`.
    pub fn locate(program: &str, args: &[String]) -> Option<Self> {
        match which::which(program) {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "tts program found");
                Some(Self::new(&path.to_string_lossy(), args))
            }
            Err(e) => {
                tracing::warn!(program, error = %e, "tts program not found, replies will not be spoken");
                None
            }
        }
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&mut self, text: &str) -> Result<(), SpeechError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|source| SpeechError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(SpeechError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_a_spawn_error() {
        let mut speaker = CommandSpeaker::new("definitely-not-a-tts-program", &[]);
        assert!(matches!(speaker.speak("hi"), Err(SpeechError::Spawn { .. })));
    }

    #[test]
    fn locate_rejects_unknown_program() {
        assert!(CommandSpeaker::locate("definitely-not-a-tts-program", &[]).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_is_checked() {
        let mut ok = CommandSpeaker::new("true", &[]);
        assert!(ok.speak("hi").is_ok());

        let mut failing = CommandSpeaker::new("false", &[]);
        assert!(matches!(failing.speak("hi"), Err(SpeechError::Failed { .. })));
    }
}
