use crate::animator::TypingAnimator;
use crate::api::{ ChatBackend, StreamEvent };
use crate::error::{ Result, SessionError };
use crate::session::UiEvent;
use crate::transcript::TranscriptState;
use futures::StreamExt;
use log::{ debug, error, info, warn };
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// How a push channel ended.
#[derive(Debug)]
pub enum StreamClosure {
    /// Connection closed without an error.
    Closed,
    /// The server sent an explicit end-of-stream event.
    Sentinel,
    Failed(SessionError),
}

impl StreamClosure {
    pub fn is_success(&self) -> bool {
        !matches!(self, StreamClosure::Failed(_))
    }
}

/// Result of one visible streaming turn. The reply is settled in every case.
#[derive(Debug)]
pub struct TurnOutcome {
    pub message_id: String,
    /// Raw markdown as received, also the settled content.
    pub content: String,
    pub fragments: usize,
    pub words_displayed: usize,
    pub closure: StreamClosure,
}

/// Display words for the animated view: emphasis markers removed, split on
/// whitespace. The authoritative text keeps the raw markdown.
pub fn display_words(fragment: &str) -> Vec<String> {
    fragment
        .replace('*', "")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub struct StreamEngine {
    backend: Arc<dyn ChatBackend>,
    transcript: Arc<TranscriptState>,
    events: broadcast::Sender<UiEvent>,
    cadence: Duration,
}

impl StreamEngine {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        transcript: Arc<TranscriptState>,
        events: broadcast::Sender<UiEvent>,
        cadence: Duration
    ) -> Self {
        Self { backend, transcript, events, cadence }
    }

    /// Streams the reply to `outgoing` into the live message `message_id`,
    /// then settles it with the full accumulated text once the animation has
    /// drained. Failures settle whatever arrived and are reported in the
    /// outcome.
    pub async fn stream_reply(&self, message_id: &str, outgoing: &str) -> TurnOutcome {
        let _ = self.events.send(UiEvent::TypingChanged(true));
        let mut animator = TypingAnimator::spawn(
            Arc::clone(&self.transcript),
            message_id.to_string(),
            self.cadence,
            self.events.clone()
        );

        let mut full_reply = String::new();
        let mut fragments = 0;
        let closure = match self.backend.open_stream(outgoing).await {
            Ok(mut stream) => {
                loop {
                    match stream.next().await {
                        Some(Ok(StreamEvent::Fragment(fragment))) => {
                            fragments += 1;
                            full_reply.push_str(&fragment);
                            animator.enqueue(display_words(&fragment));
                        }
                        Some(Ok(StreamEvent::Done)) => {
                            break StreamClosure::Sentinel;
                        }
                        Some(Err(e)) => {
                            break StreamClosure::Failed(e);
                        }
                        None => {
                            break StreamClosure::Closed;
                        }
                    }
                }
            }
            Err(e) => StreamClosure::Failed(e),
        };

        match &closure {
            StreamClosure::Failed(e) =>
                error!("Reply stream failed after {} fragments: {}", fragments, e),
            other => debug!("Reply stream ended ({:?}) after {} fragments", other, fragments),
        }

        let words_displayed = animator.finish().await;
        if self.transcript.settle(message_id, full_reply.clone()).await {
            let _ = self.events.send(UiEvent::Settled {
                message_id: message_id.to_string(),
            });
        } else {
            warn!("Reply {} was no longer live at settle time", message_id);
        }
        let _ = self.events.send(UiEvent::TypingChanged(false));

        TurnOutcome {
            message_id: message_id.to_string(),
            content: full_reply,
            fragments,
            words_displayed,
            closure,
        }
    }

    /// Consumes a reply without touching the transcript and returns the full
    /// text.
    pub async fn collect_silent(&self, outgoing: &str) -> Result<String> {
        let mut stream = self.backend.open_stream(outgoing).await?;
        let mut full_reply = String::new();
        while let Some(item) = stream.next().await {
            match item? {
                StreamEvent::Fragment(fragment) => full_reply.push_str(&fragment),
                StreamEvent::Done => {
                    break;
                }
            }
        }
        info!("Silent reply collected ({} bytes)", full_reply.len());
        Ok(full_reply)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::FragmentStream;
    use crate::models::chat::RemoteMessage;
    use crate::store::MemoryStore;
    use crate::transcript::MessageState;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Backend replaying a fixed script of push-channel items.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        pub script: Mutex<Vec<Vec<Result<StreamEvent>>>>,
        pub opened: Mutex<Vec<String>>,
        pub remote: Mutex<Option<Vec<RemoteMessage>>>,
        pub fail_reset: bool,
        pub resets: Mutex<usize>,
        pub plan: Option<Vec<u8>>,
        /// Latency of `fetch_messages`; the history is read when the call starts.
        pub fetch_delay: Option<Duration>,
        /// Pause before each scripted stream item.
        pub fragment_delay: Option<Duration>,
    }

    impl ScriptedBackend {
        pub fn with_turns(turns: Vec<Vec<Result<StreamEvent>>>) -> Self {
            Self {
                script: Mutex::new(turns.into_iter().rev().collect()),
                ..Default::default()
            }
        }

        pub fn opened(&self) -> Vec<String> {
            self.opened.lock().unwrap().clone()
        }
    }

    pub(crate) fn fragments(parts: &[&str]) -> Vec<Result<StreamEvent>> {
        parts
            .iter()
            .map(|p| Ok(StreamEvent::Fragment(p.to_string())))
            .collect()
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn open_stream(&self, message: &str) -> Result<FragmentStream> {
            self.opened.lock().unwrap().push(message.to_string());
            let items = self.script.lock().unwrap().pop().unwrap_or_default();
            match self.fragment_delay {
                Some(delay) => {
                    let paced = futures::stream::iter(items).then(move |item| async move {
                        tokio::time::sleep(delay).await;
                        item
                    });
                    Ok(Box::pin(paced))
                }
                None => Ok(Box::pin(futures::stream::iter(items))),
            }
        }

        async fn fetch_messages(&self) -> Result<Vec<RemoteMessage>> {
            let history = self.remote.lock().unwrap().clone();
            if let Some(delay) = self.fetch_delay {
                tokio::time::sleep(delay).await;
            }
            history.ok_or_else(|| SessionError::Stream("backend unreachable".to_string()))
        }

        async fn reset(&self) -> Result<()> {
            *self.resets.lock().unwrap() += 1;
            if self.fail_reset {
                return Err(SessionError::Status { status: 503, url: "/messages/reset".to_string() });
            }
            Ok(())
        }

        async fn export_plan(&self) -> Result<Option<Vec<u8>>> {
            Ok(self.plan.clone())
        }
    }

    async fn engine_for(
        backend: ScriptedBackend
    ) -> (StreamEngine, Arc<TranscriptState>, broadcast::Receiver<UiEvent>) {
        let transcript = Arc::new(TranscriptState::load(Arc::new(MemoryStore::new())).await);
        let (events, rx) = broadcast::channel(256);
        let engine = StreamEngine::new(
            Arc::new(backend),
            Arc::clone(&transcript),
            events,
            Duration::from_millis(60)
        );
        (engine, transcript, rx)
    }

    #[test]
    fn display_words_strip_emphasis_only() {
        assert_eq!(display_words("**Day 1:** squat  \n bench"), vec!["Day", "1:", "squat", "bench"]);
        assert!(display_words("   ").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hello_world_animates_two_ticks_and_settles() {
        let backend = ScriptedBackend::with_turns(vec![fragments(&["Hello ", "world"])]);
        let (engine, transcript, mut events) = engine_for(backend).await;
        let id = transcript.begin_reply().await.unwrap();
        let mut updates = transcript.subscribe();
        updates.borrow_and_update();

        let turn = tokio::spawn({
            let transcript = Arc::clone(&transcript);
            let id = id.clone();
            async move {
                let mut seen = Vec::new();
                while updates.changed().await.is_ok() {
                    let content = updates.borrow_and_update()[0].content.clone();
                    seen.push(content);
                    if transcript.state_of(&id).await == Some(MessageState::Settled) {
                        break;
                    }
                }
                seen
            }
        });

        let outcome = engine.stream_reply(&id, "hi").await;
        assert!(matches!(outcome.closure, StreamClosure::Closed));
        assert_eq!(outcome.words_displayed, 2);
        assert_eq!(outcome.content, "Hello world");
        assert_eq!(transcript.snapshot()[0].content, "Hello world");
        assert_eq!(transcript.state_of(&id).await, Some(MessageState::Settled));

        let seen = turn.await.unwrap();
        assert_eq!(seen[0], "Hello");
        assert_eq!(seen[1], "Hello world");

        let mut settled = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, UiEvent::Settled { .. }) {
                settled += 1;
            }
        }
        assert_eq!(settled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_content_is_the_raw_concatenation() {
        let parts = ["## Plan\n", "| Day | **Squat** |", "\n", "", "ok*"];
        let backend = ScriptedBackend::with_turns(vec![fragments(&parts)]);
        let (engine, transcript, _events) = engine_for(backend).await;
        let id = transcript.begin_reply().await.unwrap();

        let outcome = engine.stream_reply(&id, "plan").await;
        assert_eq!(outcome.content, parts.concat());
        assert_eq!(transcript.snapshot()[0].content, parts.concat());
        assert_eq!(outcome.words_displayed, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_sentinel_ends_the_turn_successfully() {
        let mut items = fragments(&["Hello ", "world"]);
        items.push(Ok(StreamEvent::Done));
        items.push(Ok(StreamEvent::Fragment("ignored".to_string())));
        let backend = ScriptedBackend::with_turns(vec![items]);
        let (engine, transcript, _events) = engine_for(backend).await;
        let id = transcript.begin_reply().await.unwrap();

        let outcome = engine.stream_reply(&id, "hi").await;
        assert!(matches!(outcome.closure, StreamClosure::Sentinel));
        assert!(outcome.closure.is_success());
        assert_eq!(transcript.snapshot()[0].content, "Hello world");
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_error_settles_partial_content() {
        let mut items = fragments(&["Partial **answer**"]);
        items.push(Err(SessionError::Stream("connection reset".to_string())));
        items.push(Ok(StreamEvent::Fragment(" never shown".to_string())));
        let backend = ScriptedBackend::with_turns(vec![items]);
        let (engine, transcript, _events) = engine_for(backend).await;
        let id = transcript.begin_reply().await.unwrap();

        let outcome = engine.stream_reply(&id, "hi").await;
        assert!(!outcome.closure.is_success());
        assert_eq!(outcome.words_displayed, 2);
        assert_eq!(transcript.snapshot()[0].content, "Partial **answer**");
        assert!(!transcript.has_live_reply().await);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_mode_never_touches_the_transcript() {
        let backend = ScriptedBackend::with_turns(vec![fragments(&["# Routine", "\n| a |"])]);
        let (engine, transcript, _events) = engine_for(backend).await;
        let mut updates = transcript.subscribe();
        updates.borrow_and_update();

        let text = engine.collect_silent("make a plan").await.unwrap();
        assert_eq!(text, "# Routine\n| a |");
        assert!(transcript.is_empty());
        assert!(!updates.has_changed().unwrap());
    }
}
