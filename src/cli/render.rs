use crate::models::chat::{ ChatMessage, Sender };
use crate::session::{ ChatSession, UiEvent };
use crate::transcript::TranscriptState;
use log::debug;
use std::io::{ self, Write };
use std::sync::Arc;
use tokio::sync::broadcast::{ self, error::RecvError };
use tokio::task::JoinHandle;

pub const BOT_LABEL: &str = "gymai>";
pub const USER_LABEL: &str = "you>";

pub fn format_message(message: &ChatMessage) -> String {
    let label = match message.sender {
        Sender::User => USER_LABEL,
        Sender::Bot => BOT_LABEL,
    };
    format!("{} {}", label, message.content)
}

/// Tracks how much of the live reply has already been written so each
/// scroll only prints the new words.
#[derive(Debug, Default)]
pub struct LivePrinter {
    message_id: Option<String>,
    shown: usize,
}

impl LivePrinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of the trailing bot message not yet printed.
    pub fn delta(&mut self, messages: &[ChatMessage]) -> Option<String> {
        let last = messages.last().filter(|m| m.sender == Sender::Bot)?;
        if self.message_id.as_deref() != Some(last.id.as_str()) {
            self.message_id = Some(last.id.clone());
            self.shown = 0;
        }
        let unseen = last.content.get(self.shown..)?;
        if unseen.is_empty() {
            return None;
        }
        self.shown = last.content.len();
        Some(unseen.to_string())
    }

    pub fn reset(&mut self) {
        self.message_id = None;
        self.shown = 0;
    }
}

fn write_out(text: &str) {
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Prints animated replies and document notifications until the session's
/// event channel closes.
pub fn spawn_renderer(session: &ChatSession) -> JoinHandle<()> {
    let mut events = session.subscribe_events();
    let transcript = Arc::clone(session.transcript());
    tokio::spawn(async move { render_events(&mut events, &transcript).await })
}

async fn render_events(events: &mut broadcast::Receiver<UiEvent>, transcript: &TranscriptState) {
    let mut printer = LivePrinter::new();
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                debug!("Renderer skipped {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => {
                break;
            }
        };
        match event {
            UiEvent::TypingChanged(true) => {
                printer.reset();
                write_out(&format!("{} ", BOT_LABEL));
            }
            UiEvent::ScrollToBottom => {
                if let Some(text) = printer.delta(&transcript.snapshot()) {
                    write_out(&text);
                }
            }
            UiEvent::Settled { .. } => write_out("\n"),
            UiEvent::TypingChanged(false) => printer.reset(),
            UiEvent::DocumentReady { kind, path } => {
                write_out(&format!("Saved {} plan to {}\n", kind, path.display()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_prints_only_new_words() {
        let mut printer = LivePrinter::new();
        let mut reply = ChatMessage::bot("Hello");
        let user = ChatMessage::user("hi");

        assert_eq!(printer.delta(&[user.clone(), reply.clone()]).as_deref(), Some("Hello"));
        assert_eq!(printer.delta(&[user.clone(), reply.clone()]), None);
        reply.content.push_str(" world");
        assert_eq!(printer.delta(&[user.clone(), reply.clone()]).as_deref(), Some(" world"));

        let next = ChatMessage::bot("Next");
        assert_eq!(printer.delta(&[reply, next]).as_deref(), Some("Next"));
        assert_eq!(printer.delta(&[user]), None);
    }

    #[test]
    fn messages_are_labelled_by_sender() {
        assert_eq!(format_message(&ChatMessage::user("hola")), "you> hola");
        assert_eq!(format_message(&ChatMessage::bot("¡Hola!")), "gymai> ¡Hola!");
    }
}
