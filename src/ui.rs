use std::io::{self, Write};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};

use crate::audio::CaptureDevice;
use crate::session::{Presenter, Session, SessionState};

const POLL: Duration = Duration::from_millis(50);

/// Prints the conversation into a raw-mode terminal.
pub struct TerminalPresenter;

fn line(text: &str) {
    print!("\r\x1b[2K{text}\r\n");
    let _ = io::stdout().flush();
}

impl Presenter for TerminalPresenter {
    fn on_transcript_ready(&mut self, text: &str) {
        line(&format!("🧑 You: {text}"));
    }

    fn on_reply_ready(&mut self, text: &str) {
        line(&format!("🤖 Companion: {text}"));
    }

    fn on_notice(&mut self, text: &str) {
        line(&format!("⚠️  {text}"));
    }
}

fn status(state: SessionState) {
    let text = match state {
        SessionState::Idle => "[ SPACE ] Ready",
        SessionState::Recording => "🎙  Recording... (SPACE to stop)",
        SessionState::Transcribing => "⏳ Transcribing...",
        SessionState::AwaitingReply => "💭 Thinking...",
    };
    print!("\r\x1b[2K{text}");
    let _ = io::stdout().flush();
}

fn banner(greeting: &str) -> anyhow::Result<()> {
    print!("\r\n=== Voice Companion ===\r\n");
    print!("{greeting}\r\n\r\n");
    print!("[ SPACE ] Start / Stop recording\r\n");
    print!("[ ESC   ] End session\r\n\r\n");
    io::stdout().flush()?;
    Ok(())
}

/// Drive the session from the keyboard until ESC or Ctrl+C.
pub fn run<C: CaptureDevice>(
    session: &mut Session<C, TerminalPresenter>,
    greeting: &str,
) -> anyhow::Result<()> {
    enable_raw_mode()?;

    let result = banner(greeting).and_then(|()| event_loop(session));

    // Restore the terminal even when the loop failed.
    let restored = disable_raw_mode();
    println!();
    result?;
    restored?;
    Ok(())
}

fn event_loop<C: CaptureDevice>(session: &mut Session<C, TerminalPresenter>) -> anyhow::Result<()> {
    let mut shown = None;
    loop {
        if event::poll(POLL)? {
            if let Event::Key(k) = event::read()? {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match k.code {
                    // Rejections are already shown as notices.
                    KeyCode::Char(' ') => {
                        let _ = session.toggle_capture();
                    }
                    KeyCode::Esc => break,
                    KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => break,
                    _ => {}
                }
            }
        }

        session.tick();

        let state = session.state();
        if shown != Some(state) {
            status(state);
            shown = Some(state);
        }
    }
    Ok(())
}
