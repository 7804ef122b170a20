use crate::api::ChatBackend;
use crate::config::prompt::PromptConfig;
use crate::config::SessionConfig;
use crate::error::{ Result, SessionError };
use crate::models::chat::ChatMessage;
use crate::models::document::DocumentKind;
use crate::poller::{ ActivityClock, PollerHandle, SyncPoller, TickOutcome };
use crate::profile::{ visible_messages, ProfileContext };
use crate::store::KeyValueStore;
use crate::stream::{ StreamEngine, TurnOutcome };
use crate::theme::{ self, Theme };
use crate::transcript::TranscriptState;
use log::{ info, warn };
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{ broadcast, Mutex };

/// Side effects for whatever renders the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    ScrollToBottom,
    TypingChanged(bool),
    Settled {
        message_id: String,
    },
    DocumentReady {
        kind: DocumentKind,
        path: PathBuf,
    },
}

const EVENT_CAPACITY: usize = 256;

/// Wires transcript, profile, streaming and background sync into the
/// operations a chat front end needs.
pub struct ChatSession {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn KeyValueStore>,
    transcript: Arc<TranscriptState>,
    profile: Arc<ProfileContext>,
    prompts: Arc<PromptConfig>,
    engine: StreamEngine,
    activity: Arc<ActivityClock>,
    poller: Arc<SyncPoller>,
    events: broadcast::Sender<UiEvent>,
    turn: Mutex<()>,
    export_dir: PathBuf,
}

impl ChatSession {
    pub async fn new(
        config: &SessionConfig,
        prompts: Arc<PromptConfig>,
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn KeyValueStore>
    ) -> Self {
        let transcript = Arc::new(TranscriptState::load(Arc::clone(&store)).await);
        let profile = Arc::new(ProfileContext::load(Arc::clone(&store), Arc::clone(&prompts)).await);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let activity = Arc::new(ActivityClock::new());
        let engine = StreamEngine::new(
            Arc::clone(&backend),
            Arc::clone(&transcript),
            events.clone(),
            config.typing_cadence
        );
        let poller = Arc::new(
            SyncPoller::new(
                Arc::clone(&backend),
                Arc::clone(&transcript),
                Arc::clone(&activity),
                Arc::clone(&prompts),
                config.poll_interval,
                config.quiet_window
            )
        );

        Self {
            backend,
            store,
            transcript,
            profile,
            prompts,
            engine,
            activity,
            poller,
            events,
            turn: Mutex::new(()),
            export_dir: config.export_dir.clone(),
        }
    }

    pub fn transcript(&self) -> &Arc<TranscriptState> {
        &self.transcript
    }

    pub fn profile(&self) -> &Arc<ProfileContext> {
        &self.profile
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Transcript as it should be rendered, internal turns removed.
    pub fn visible_messages(&self) -> Vec<ChatMessage> {
        visible_messages(&self.transcript.snapshot(), &self.prompts)
    }

    /// Initial history load, then either the greeting or a profile based
    /// opening turn. Returns the opening turn when one was streamed.
    pub async fn start(&self) -> Result<Option<TurnOutcome>> {
        if self.sync_now().await == TickOutcome::FetchFailed {
            warn!("Initial history load failed; continuing with the local transcript");
        }

        if !self.profile.has_data() {
            if self.transcript.upsert_greeting(&self.prompts.greeting, &self.prompts.greeting_prefix).await {
                info!("Greeting shown");
            }
            return Ok(None);
        }
        if self.transcript.is_empty() {
            return self.start_with_profile().await;
        }
        Ok(None)
    }

    /// Opens the conversation from the profile without showing a user turn.
    pub async fn start_with_profile(&self) -> Result<Option<TurnOutcome>> {
        let Some(payload) = self.profile.compose_bootstrap() else {
            return Ok(None);
        };
        let _turn = self.turn.lock().await;
        self.activity.record();
        let message_id = self.transcript.begin_turn(None).await?;
        info!("Starting conversation from profile");
        Ok(Some(self.engine.stream_reply(&message_id, &payload).await))
    }

    /// Sends one user message and streams the reply. Waits for any turn in
    /// progress to settle first.
    pub async fn send(&self, text: &str) -> Result<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let _turn = self.turn.lock().await;
        self.activity.record();

        let outgoing = self.profile.compose(text);
        let user = ChatMessage::user(outgoing.display.clone());
        let message_id = self.transcript.begin_turn(Some(user)).await?;
        Ok(self.engine.stream_reply(&message_id, &outgoing.payload).await)
    }

    /// Generates a plan through a silent stream and saves the exported PDF.
    /// Returns the written path, or `None` when the backend had nothing.
    pub async fn request_document(&self, kind: DocumentKind) -> Result<Option<PathBuf>> {
        let _turn = self.turn.lock().await;
        self.activity.record();

        let command = self.profile.compose_instruction(kind);
        self.engine.collect_silent(&command).await?;

        let Some(bytes) = self.backend.export_plan().await? else {
            warn!("Backend returned no {} plan to export", kind);
            return Ok(None);
        };
        tokio::fs::create_dir_all(&self.export_dir).await?;
        let path = self.export_dir.join(kind.file_name());
        tokio::fs::write(&path, &bytes).await?;
        info!("Saved {} plan to {}", kind, path.display());
        let _ = self.events.send(UiEvent::DocumentReady {
            kind,
            path: path.clone(),
        });
        Ok(Some(path))
    }

    /// Clears history remotely (best effort) and locally (always).
    pub async fn reset(&self) {
        if let Err(e) = self.backend.reset().await {
            warn!("Remote reset failed, clearing local state anyway: {}", e);
        }
        self.transcript.clear().await;
        info!("Conversation reset");
    }

    /// One history sync outside the poller's schedule.
    pub async fn sync_now(&self) -> TickOutcome {
        self.poller.sync_now().await
    }

    pub fn spawn_poller(&self) -> PollerHandle {
        Arc::clone(&self.poller).spawn()
    }

    pub async fn theme(&self) -> Theme {
        theme::load_theme(self.store.as_ref()).await
    }

    pub async fn toggle_theme(&self) -> Result<Theme> {
        theme::toggle_theme(self.store.as_ref()).await
    }
}
