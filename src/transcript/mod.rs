use crate::error::{ Result, SessionError };
use crate::models::chat::{ ChatMessage, Sender };
use crate::store::{ load_json, save_json, KeyValueStore, TRANSCRIPT_KEY };
use log::{ debug, warn };
use std::sync::Arc;
use tokio::sync::{ watch, Mutex };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageState {
    /// Placeholder inserted, nothing displayed yet.
    Pending,
    Streaming,
    Settled,
}

/// What a reconciliation pass decided to do with the local transcript.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Unchanged,
    /// Leading local message kept, remote messages spliced after it.
    Spliced(Vec<ChatMessage>),
    Replaced(Vec<ChatMessage>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A reply is live or the fetch is stale; remote state was not applied.
    Deferred,
    Unchanged,
    Spliced,
    Replaced,
}

pub type Snapshot = Arc<Vec<ChatMessage>>;

struct LiveReply {
    id: String,
    state: MessageState,
}

struct Inner {
    messages: Vec<ChatMessage>,
    live: Option<LiveReply>,
    /// Bumped by every local turn or reset; fetches started earlier are stale.
    generation: u64,
}

/// Owner of the ordered message list. Every mutation goes through this type,
/// is written through to the store and published to subscribers.
pub struct TranscriptState {
    inner: Mutex<Inner>,
    store: Arc<dyn KeyValueStore>,
    updates: watch::Sender<Snapshot>,
}

impl TranscriptState {
    /// Reads the persisted transcript once. Missing or malformed data gives
    /// an empty transcript.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let messages: Vec<ChatMessage> = load_json(store.as_ref(), TRANSCRIPT_KEY).await.unwrap_or_default();
        debug!("Loaded {} persisted messages", messages.len());
        let (updates, _) = watch::channel(Arc::new(messages.clone()));
        Self {
            inner: Mutex::new(Inner { messages, live: None, generation: 0 }),
            store,
            updates,
        }
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.updates.borrow().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.updates.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.updates.subscribe()
    }

    pub async fn state_of(&self, id: &str) -> Option<MessageState> {
        let inner = self.inner.lock().await;
        match &inner.live {
            Some(live) if live.id == id => Some(live.state),
            _ => inner.messages.iter().any(|m| m.id == id).then_some(MessageState::Settled),
        }
    }

    /// Current local generation. Read it before fetching remote state and
    /// hand it back to `merge_remote`.
    pub async fn generation(&self) -> u64 {
        self.inner.lock().await.generation
    }

    /// True while a reply placeholder is pending or streaming.
    pub async fn has_live_reply(&self) -> bool {
        self.inner.lock().await.live.is_some()
    }

    /// Appends a settled message.
    pub async fn push(&self, message: ChatMessage) {
        let mut inner = self.inner.lock().await;
        inner.messages.push(message);
        inner.generation += 1;
        self.commit(&inner).await;
    }

    /// Appends the optional user message and an empty bot placeholder under
    /// one lock and returns the placeholder id. Only one reply can be live at
    /// a time.
    pub async fn begin_turn(&self, user: Option<ChatMessage>) -> Result<String> {
        let mut inner = self.inner.lock().await;
        if inner.live.is_some() {
            return Err(SessionError::TurnInProgress);
        }
        let placeholder = ChatMessage::bot("");
        let id = placeholder.id.clone();
        inner.messages.extend(user);
        inner.messages.push(placeholder);
        inner.generation += 1;
        inner.live = Some(LiveReply {
            id: id.clone(),
            state: MessageState::Pending,
        });
        self.commit(&inner).await;
        Ok(id)
    }

    /// Placeholder only, for turns without a visible user message.
    pub async fn begin_reply(&self) -> Result<String> {
        self.begin_turn(None).await
    }

    /// Appends one word to the live reply. Returns false when `id` is not the
    /// live reply (settled, reset or unknown).
    pub async fn append_word(&self, id: &str, word: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let Inner { messages, live, .. } = &mut *inner;
        let Some(live) = live.as_mut().filter(|live| live.id == id) else {
            return false;
        };
        let Some(message) = messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if !message.content.is_empty() {
            message.content.push(' ');
        }
        message.content.push_str(word);
        live.state = MessageState::Streaming;
        self.commit(&inner).await;
        true
    }

    /// Replaces the live reply's content with its final text and settles it.
    /// A reply settles exactly once; later calls return false.
    pub async fn settle(&self, id: &str, content: String) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.live.as_ref().is_some_and(|live| live.id == id) {
            return false;
        }
        inner.live = None;
        match inner.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.content = content;
            }
            None => {
                return false;
            }
        }
        self.commit(&inner).await;
        true
    }

    /// Applies a reconciliation computed from the current messages. Refused
    /// while a reply is live, and when a local turn or reset happened after
    /// `fetched_at` was read.
    pub async fn merge_remote<F>(&self, fetched_at: u64, reconcile: F) -> MergeOutcome
        where F: FnOnce(&[ChatMessage]) -> Reconciliation
    {
        let mut inner = self.inner.lock().await;
        if inner.live.is_some() {
            return MergeOutcome::Deferred;
        }
        if inner.generation != fetched_at {
            debug!("Discarding remote state fetched at generation {} (now {})", fetched_at, inner.generation);
            return MergeOutcome::Deferred;
        }
        let outcome = match reconcile(&inner.messages) {
            Reconciliation::Unchanged => {
                return MergeOutcome::Unchanged;
            }
            Reconciliation::Spliced(messages) => {
                inner.messages = messages;
                MergeOutcome::Spliced
            }
            Reconciliation::Replaced(messages) => {
                inner.messages = messages;
                MergeOutcome::Replaced
            }
        };
        self.commit(&inner).await;
        outcome
    }

    /// Inserts the greeting into an empty transcript, or refreshes the text of
    /// a leading greeting identified by `prefix`. Returns true on change.
    pub async fn upsert_greeting(&self, greeting: &str, prefix: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.messages.is_empty() {
            inner.messages.push(ChatMessage::bot(greeting));
        } else {
            let live_id = inner.live.as_ref().map(|live| live.id.clone());
            let Some(first) = inner.messages.first_mut() else {
                return false;
            };
            let is_greeting = first.sender == Sender::Bot && first.content.starts_with(prefix);
            if !is_greeting || first.content == greeting || live_id.as_deref() == Some(first.id.as_str()) {
                return false;
            }
            first.content = greeting.to_string();
        }
        self.commit(&inner).await;
        true
    }

    /// Empties the transcript and deletes the persisted key.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.messages.clear();
        inner.live = None;
        inner.generation += 1;
        if let Err(e) = self.store.remove(TRANSCRIPT_KEY).await {
            warn!("Failed to remove persisted transcript: {}", e);
        }
        self.updates.send_replace(Arc::new(Vec::new()));
    }

    async fn commit(&self, inner: &Inner) {
        if let Err(e) = save_json(self.store.as_ref(), TRANSCRIPT_KEY, &inner.messages).await {
            warn!("Failed to persist transcript: {}", e);
        }
        self.updates.send_replace(Arc::new(inner.messages.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn fresh() -> (Arc<MemoryStore>, TranscriptState) {
        let store = Arc::new(MemoryStore::new());
        let transcript = TranscriptState::load(store.clone()).await;
        (store, transcript)
    }

    #[tokio::test]
    async fn malformed_persisted_state_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        store.set(TRANSCRIPT_KEY, b"[{\"sender\":").await.unwrap();
        let transcript = TranscriptState::load(store).await;
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn every_mutation_is_written_through() {
        let (store, transcript) = fresh().await;
        transcript.push(ChatMessage::user("hola")).await;

        let reloaded = TranscriptState::load(store.clone()).await;
        assert_eq!(reloaded.snapshot()[0].content, "hola");
    }

    #[tokio::test]
    async fn reply_lifecycle_settles_exactly_once() {
        let (_store, transcript) = fresh().await;
        let id = transcript.begin_reply().await.unwrap();
        assert_eq!(transcript.state_of(&id).await, Some(MessageState::Pending));
        assert!(matches!(transcript.begin_reply().await, Err(SessionError::TurnInProgress)));

        assert!(transcript.append_word(&id, "Hello").await);
        assert!(transcript.append_word(&id, "world").await);
        assert_eq!(transcript.state_of(&id).await, Some(MessageState::Streaming));
        assert_eq!(transcript.snapshot()[0].content, "Hello world");

        assert!(transcript.settle(&id, "**Hello** world".to_string()).await);
        assert_eq!(transcript.state_of(&id).await, Some(MessageState::Settled));
        assert!(!transcript.settle(&id, "again".to_string()).await);
        assert!(!transcript.append_word(&id, "late").await);
        assert_eq!(transcript.snapshot()[0].content, "**Hello** world");
    }

    #[tokio::test]
    async fn merges_are_deferred_while_a_reply_is_live() {
        let (_store, transcript) = fresh().await;
        let id = transcript.begin_reply().await.unwrap();
        let generation = transcript.generation().await;
        let outcome = transcript.merge_remote(generation, |_| Reconciliation::Replaced(Vec::new())).await;
        assert_eq!(outcome, MergeOutcome::Deferred);
        assert_eq!(transcript.len(), 1);

        transcript.settle(&id, "done".to_string()).await;
        let outcome = transcript.merge_remote(generation, |_| Reconciliation::Replaced(Vec::new())).await;
        assert_eq!(outcome, MergeOutcome::Replaced);
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn turn_inserts_user_message_and_placeholder_together() {
        let (store, transcript) = fresh().await;
        let mut updates = transcript.subscribe();
        updates.borrow_and_update();

        let id = transcript.begin_turn(Some(ChatMessage::user("hola"))).await.unwrap();
        let snapshot = updates.borrow_and_update().clone();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].content, "hola");
        assert_eq!(snapshot[1].id, id);
        assert!(!updates.has_changed().unwrap());

        let reloaded = TranscriptState::load(store).await;
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn merges_fetched_before_a_local_turn_are_stale() {
        let (_store, transcript) = fresh().await;
        let fetched_at = transcript.generation().await;

        let id = transcript.begin_turn(Some(ChatMessage::user("hola"))).await.unwrap();
        transcript.settle(&id, "¡Hola!".to_string()).await;

        let outcome = transcript.merge_remote(fetched_at, |_| Reconciliation::Replaced(Vec::new())).await;
        assert_eq!(outcome, MergeOutcome::Deferred);
        assert_eq!(transcript.len(), 2);

        let fetched_at = transcript.generation().await;
        transcript.clear().await;
        let outcome = transcript.merge_remote(fetched_at, |_| Reconciliation::Replaced(vec![ChatMessage::user("old")])).await;
        assert_eq!(outcome, MergeOutcome::Deferred);
        assert!(transcript.is_empty());
    }

    #[tokio::test]
    async fn unchanged_merge_does_not_publish() {
        let (_store, transcript) = fresh().await;
        transcript.push(ChatMessage::user("hola")).await;
        let mut updates = transcript.subscribe();
        updates.borrow_and_update();

        let generation = transcript.generation().await;
        let outcome = transcript.merge_remote(generation, |_| Reconciliation::Unchanged).await;
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert!(!updates.has_changed().unwrap());
    }

    #[tokio::test]
    async fn greeting_is_inserted_or_refreshed_in_place() {
        let (_store, transcript) = fresh().await;
        assert!(transcript.upsert_greeting("Hi, I'm GymAI. v1", "Hi, I'm GymAI.").await);
        let id = transcript.snapshot()[0].id.clone();

        assert!(transcript.upsert_greeting("Hi, I'm GymAI. v2", "Hi, I'm GymAI.").await);
        assert!(!transcript.upsert_greeting("Hi, I'm GymAI. v2", "Hi, I'm GymAI.").await);
        let snapshot = transcript.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);
        assert_eq!(snapshot[0].content, "Hi, I'm GymAI. v2");
    }

    #[tokio::test]
    async fn clear_removes_the_persisted_key() {
        let (store, transcript) = fresh().await;
        transcript.push(ChatMessage::user("hola")).await;
        assert!(store.contains(TRANSCRIPT_KEY));
        let id = transcript.begin_reply().await.unwrap();

        transcript.clear().await;
        assert!(transcript.is_empty());
        assert!(!store.contains(TRANSCRIPT_KEY));
        assert!(!transcript.has_live_reply().await);
        assert!(!transcript.append_word(&id, "late").await);
    }
}
