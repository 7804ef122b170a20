use crate::api::ChatBackend;
use crate::config::prompt::PromptConfig;
use crate::models::chat::{ new_message_id, now_timestamp, ChatMessage, RemoteMessage, Sender };
use crate::models::document::DocumentKind;
use crate::transcript::{ MergeOutcome, Reconciliation, TranscriptState };
use log::{ debug, info };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{ interval_at, Instant, MissedTickBehavior };

/// Time of the last local user action.
#[derive(Default)]
pub struct ActivityClock {
    last: Mutex<Option<Instant>>,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Some(Instant::now());
    }

    /// True when no activity was recorded within `window`.
    pub fn is_quiet(&self, window: Duration) -> bool {
        let last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match *last {
            Some(at) => at.elapsed() >= window,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Inside the quiet window; nothing fetched.
    Quiet,
    FetchFailed,
    /// A reply was live or a local turn started during the fetch; the
    /// fetched state was discarded.
    Deferred,
    Unchanged,
    Spliced,
    Replaced,
}

impl From<MergeOutcome> for TickOutcome {
    fn from(outcome: MergeOutcome) -> Self {
        match outcome {
            MergeOutcome::Deferred => TickOutcome::Deferred,
            MergeOutcome::Unchanged => TickOutcome::Unchanged,
            MergeOutcome::Spliced => TickOutcome::Spliced,
            MergeOutcome::Replaced => TickOutcome::Replaced,
        }
    }
}

/// Cleans a fetched history: drops the hidden bootstrap turn and silent
/// document turns with their replies, keeps only the user's own words from
/// preamble-carrying turns and stamps missing metadata.
pub fn normalize_remote(remote: Vec<RemoteMessage>, prompts: &PromptConfig) -> Vec<ChatMessage> {
    let mut normalized = Vec::with_capacity(remote.len());
    let mut skip_reply = false;
    for m in remote {
        let content = match m.sender {
            Sender::User => strip_preamble(&m.content, prompts).to_string(),
            Sender::Bot => m.content,
        };
        match m.sender {
            Sender::User if content == prompts.bootstrap_prompt => {
                skip_reply = false;
                continue;
            }
            Sender::User if is_document_instruction(&content, prompts) => {
                skip_reply = true;
                continue;
            }
            Sender::User => {
                skip_reply = false;
            }
            Sender::Bot => {
                if std::mem::take(&mut skip_reply) {
                    continue;
                }
            }
        }
        normalized.push(ChatMessage {
            id: m.id.filter(|id| !id.is_empty()).unwrap_or_else(new_message_id),
            sender: m.sender,
            content,
            timestamp: m.timestamp.filter(|ts| !ts.is_empty()).unwrap_or_else(now_timestamp),
        });
    }
    normalized
}

fn is_document_instruction(content: &str, prompts: &PromptConfig) -> bool {
    [DocumentKind::Routine, DocumentKind::Diet]
        .into_iter()
        .any(|kind| content == prompts.instruction_for(kind))
}

/// Text after the preamble of a `Profile: ...\n\n<marker> text` turn.
fn strip_preamble<'a>(content: &'a str, prompts: &PromptConfig) -> &'a str {
    if !content.starts_with(&prompts.profile_label) {
        return content;
    }
    for marker in [&prompts.message_marker, &prompts.instruction_marker] {
        let separator = format!("\n\n{}", marker);
        if let Some(idx) = content.find(&separator) {
            return content[idx + separator.len()..].trim();
        }
    }
    content
}

pub fn is_bootstrap_greeting(message: &ChatMessage, greeting_prefix: &str) -> bool {
    message.sender == Sender::Bot && message.content.starts_with(greeting_prefix)
}

/// Decides how fetched messages replace local ones. Positionally matching
/// messages keep their local id and timestamp.
pub fn reconcile(local: &[ChatMessage], fetched: Vec<ChatMessage>, greeting_prefix: &str) -> Reconciliation {
    let preserved = local.first().filter(|m| is_bootstrap_greeting(m, greeting_prefix));
    let base = if preserved.is_some() { &local[1..] } else { local };

    let identical =
        base.len() == fetched.len() &&
        base
            .iter()
            .zip(&fetched)
            .all(|(a, b)| a.same_turn(b));
    if identical {
        return Reconciliation::Unchanged;
    }

    let adopted: Vec<ChatMessage> = fetched
        .into_iter()
        .enumerate()
        .map(|(i, message)| {
            match base.get(i) {
                Some(existing) if existing.same_turn(&message) => existing.clone(),
                _ => message,
            }
        })
        .collect();

    match preserved {
        Some(greeting) => {
            let mut merged = Vec::with_capacity(adopted.len() + 1);
            merged.push(greeting.clone());
            merged.extend(adopted);
            Reconciliation::Spliced(merged)
        }
        None => Reconciliation::Replaced(adopted),
    }
}

/// Periodically pulls the authoritative history into the local transcript.
pub struct SyncPoller {
    backend: Arc<dyn ChatBackend>,
    transcript: Arc<TranscriptState>,
    activity: Arc<ActivityClock>,
    prompts: Arc<PromptConfig>,
    period: Duration,
    quiet_window: Duration,
}

impl SyncPoller {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        transcript: Arc<TranscriptState>,
        activity: Arc<ActivityClock>,
        prompts: Arc<PromptConfig>,
        period: Duration,
        quiet_window: Duration
    ) -> Self {
        Self { backend, transcript, activity, prompts, period, quiet_window }
    }

    /// One scheduled pass: skipped during the quiet window, errors swallowed.
    pub async fn tick(&self) -> TickOutcome {
        if !self.activity.is_quiet(self.quiet_window) {
            debug!("Recent activity; skipping history sync");
            return TickOutcome::Quiet;
        }
        self.sync_now().await
    }

    /// Fetches and merges immediately, ignoring the quiet window.
    pub async fn sync_now(&self) -> TickOutcome {
        let fetched_at = self.transcript.generation().await;
        let remote = match self.backend.fetch_messages().await {
            Ok(remote) => remote,
            Err(e) => {
                debug!("History sync failed, will retry: {}", e);
                return TickOutcome::FetchFailed;
            }
        };
        let fetched = normalize_remote(remote, &self.prompts);
        let prefix = self.prompts.greeting_prefix.as_str();
        let outcome: TickOutcome = self.transcript
            .merge_remote(fetched_at, |local| reconcile(local, fetched, prefix)).await
            .into();
        match outcome {
            TickOutcome::Spliced | TickOutcome::Replaced => {
                info!("History sync applied remote changes ({:?})", outcome);
            }
            _ => debug!("History sync: {:?}", outcome),
        }
        outcome
    }

    pub fn spawn(self: Arc<Self>) -> PollerHandle {
        let (shutdown, mut stop) = oneshot::channel();
        let period = self.period;
        let task = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop => {
                        break;
                    }
                    _ = timer.tick() => {
                        self.tick().await;
                    }
                }
            }
            debug!("History sync stopped");
        });
        PollerHandle {
            shutdown: Some(shutdown),
            task,
        }
    }
}

pub struct PollerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::tests::ScriptedBackend;
    use crate::store::MemoryStore;

    fn remote(sender: Sender, content: &str) -> RemoteMessage {
        RemoteMessage {
            id: None,
            sender,
            content: content.to_string(),
            timestamp: None,
        }
    }

    fn contents(messages: &[ChatMessage]) -> Vec<&str> {
        messages
            .iter()
            .map(|m| m.content.as_str())
            .collect()
    }

    async fn poller_with(
        history: Vec<RemoteMessage>
    ) -> (Arc<ScriptedBackend>, Arc<TranscriptState>, Arc<ActivityClock>, SyncPoller) {
        let backend = Arc::new(ScriptedBackend::default());
        *backend.remote.lock().unwrap() = Some(history);
        let transcript = Arc::new(TranscriptState::load(Arc::new(MemoryStore::new())).await);
        let activity = Arc::new(ActivityClock::new());
        let poller = SyncPoller::new(
            backend.clone(),
            Arc::clone(&transcript),
            Arc::clone(&activity),
            Arc::new(PromptConfig::default()),
            Duration::from_secs(5),
            Duration::from_secs(3)
        );
        (backend, transcript, activity, poller)
    }

    #[test]
    fn normalize_drops_bootstrap_and_preambles() {
        let prompts = PromptConfig::default();
        let history = vec![
            remote(Sender::User, &prompts.bootstrap_prompt),
            remote(Sender::User, &format!("Profile: goal: definir.\n\nMessage: {}", prompts.bootstrap_prompt)),
            remote(Sender::Bot, "Plan **inicial**"),
            remote(Sender::User, "Profile: age: 30 años.\n\nMessage: hola"),
            RemoteMessage {
                id: Some("srv-1".into()),
                sender: Sender::Bot,
                content: "Hola".into(),
                timestamp: Some("2025-01-01T00:00:00Z".into()),
            }
        ];
        let normalized = normalize_remote(history, &prompts);
        assert_eq!(contents(&normalized), vec!["Plan **inicial**", "hola", "Hola"]);
        assert_eq!(normalized[2].id, "srv-1");
        assert_eq!(normalized[2].timestamp, "2025-01-01T00:00:00Z");
        assert!(!normalized[0].timestamp.is_empty());
    }

    #[test]
    fn silent_document_turns_and_their_replies_are_dropped() {
        let prompts = PromptConfig::default();
        let history = vec![
            remote(Sender::User, "hola"),
            remote(Sender::Bot, "¡Hola!"),
            remote(Sender::User, &prompts.routine_instruction),
            remote(Sender::Bot, "## Plan\n| Day | Squat |"),
            remote(Sender::User, &format!("Profile: goal: definir.\n\nInstruction: {}", prompts.diet_instruction)),
            remote(Sender::Bot, "## Diet\n| Meal |"),
            remote(Sender::User, "gracias"),
            remote(Sender::Bot, "De nada")
        ];
        let normalized = normalize_remote(history, &prompts);
        assert_eq!(contents(&normalized), vec!["hola", "¡Hola!", "gracias", "De nada"]);
    }

    #[test]
    fn marker_words_inside_plain_messages_are_kept() {
        let prompts = PromptConfig::default();
        let normalized = normalize_remote(vec![remote(Sender::User, "Message: hola")], &prompts);
        assert_eq!(contents(&normalized), vec!["Message: hola"]);
    }

    #[test]
    fn leading_greeting_survives_and_fetched_follow() {
        let greeting = ChatMessage::bot("Hi, I'm GymAI. Tell me your goal.");
        let local = vec![greeting.clone()];
        let fetched = vec![ChatMessage::user("hola"), ChatMessage::bot("Hola!")];

        match reconcile(&local, fetched, "Hi, I'm GymAI.") {
            Reconciliation::Spliced(merged) => {
                assert_eq!(merged[0], greeting);
                assert_eq!(contents(&merged[1..]), vec!["hola", "Hola!"]);
            }
            other => panic!("expected splice, got {:?}", other),
        }
    }

    #[test]
    fn without_greeting_remote_replaces_local() {
        let local = vec![ChatMessage::user("stale")];
        let fetched = vec![ChatMessage::user("fresh")];
        match reconcile(&local, fetched, "Hi, I'm GymAI.") {
            Reconciliation::Replaced(messages) => assert_eq!(contents(&messages), vec!["fresh"]),
            other => panic!("expected replace, got {:?}", other),
        }
    }

    #[test]
    fn matching_messages_keep_local_ids() {
        let local = vec![ChatMessage::user("hola")];
        let fetched = vec![ChatMessage::user("hola"), ChatMessage::bot("Hola!")];
        match reconcile(&local, fetched, "Hi, I'm GymAI.") {
            Reconciliation::Replaced(messages) => assert_eq!(messages[0].id, local[0].id),
            other => panic!("expected replace, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn same_history_twice_is_a_no_op() {
        let history = vec![remote(Sender::User, "hola"), remote(Sender::Bot, "Hola!")];
        let (_backend, transcript, _activity, poller) = poller_with(history).await;

        assert_eq!(poller.tick().await, TickOutcome::Replaced);
        let mut updates = transcript.subscribe();
        updates.borrow_and_update();
        let before = transcript.snapshot();

        assert_eq!(poller.tick().await, TickOutcome::Unchanged);
        assert!(!updates.has_changed().unwrap());
        assert_eq!(transcript.snapshot(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_window_suppresses_fetches() {
        let (backend, transcript, activity, poller) = poller_with(
            vec![remote(Sender::Bot, "remote")]
        ).await;
        activity.record();
        assert_eq!(poller.tick().await, TickOutcome::Quiet);
        assert!(transcript.is_empty());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(poller.tick().await, TickOutcome::Replaced);

        *backend.remote.lock().unwrap() = None;
        assert_eq!(poller.tick().await, TickOutcome::FetchFailed);
        assert_eq!(contents(&transcript.snapshot()), vec!["remote"]);
    }

    #[tokio::test]
    async fn no_merge_while_a_reply_streams() {
        let (_backend, transcript, _activity, poller) = poller_with(
            vec![remote(Sender::Bot, "server view")]
        ).await;
        let id = transcript.begin_reply().await.unwrap();
        transcript.append_word(&id, "partial").await;

        assert_eq!(poller.tick().await, TickOutcome::Deferred);
        assert_eq!(contents(&transcript.snapshot()), vec!["partial"]);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_polls_on_its_period() {
        let (_backend, transcript, _activity, poller) = poller_with(
            vec![remote(Sender::Bot, "from server")]
        ).await;
        let handle = Arc::new(poller).spawn();

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(contents(&transcript.snapshot()), vec!["from server"]);
        handle.stop().await;
    }
}
