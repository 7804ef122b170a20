use crate::config::prompt::PromptConfig;
use crate::error::Result;
use crate::models::chat::{ ChatMessage, Sender };
use crate::models::document::DocumentKind;
use crate::models::profile::SessionProfile;
use crate::store::{ load_json, save_json, KeyValueStore, PROFILE_KEY };
use log::info;
use std::sync::Arc;
use tokio::sync::watch;

/// Text crossing the backend boundary and the part shown in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub payload: String,
    pub display: String,
}

/// Holds the current profile snapshot; `save` and `clear` are the only writers.
pub struct ProfileContext {
    store: Arc<dyn KeyValueStore>,
    prompts: Arc<PromptConfig>,
    current: watch::Sender<Option<SessionProfile>>,
}

impl ProfileContext {
    pub async fn load(store: Arc<dyn KeyValueStore>, prompts: Arc<PromptConfig>) -> Self {
        let profile: Option<SessionProfile> = load_json(store.as_ref(), PROFILE_KEY).await;
        let (current, _) = watch::channel(profile);
        Self { store, prompts, current }
    }

    pub fn current(&self) -> Option<SessionProfile> {
        self.current.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionProfile>> {
        self.current.subscribe()
    }

    pub fn has_data(&self) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(SessionProfile::has_data)
    }

    /// Persists and publishes `profile`; an empty profile clears instead.
    pub async fn save(&self, profile: SessionProfile) -> Result<()> {
        if !profile.has_data() {
            return self.clear().await;
        }
        save_json(self.store.as_ref(), PROFILE_KEY, &profile).await?;
        info!("Profile saved ({} fields)", profile.summary_parts().len());
        self.current.send_replace(Some(profile));
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        self.current.send_replace(None);
        self.store.remove(PROFILE_KEY).await?;
        info!("Profile cleared");
        Ok(())
    }

    /// `"Profile: a: x, b: y."` for a profile with data.
    pub fn preamble(&self) -> Option<String> {
        let parts = self.current.borrow().as_ref().map(SessionProfile::summary_parts)?;
        if parts.is_empty() {
            return None;
        }
        Some(format!("{} {}.", self.prompts.profile_label, parts.join(", ")))
    }

    fn with_preamble(&self, marker: &str, text: &str) -> String {
        match self.preamble() {
            Some(preamble) => format!("{}\n\n{} {}", preamble, marker, text),
            None => text.to_string(),
        }
    }

    pub fn compose(&self, text: &str) -> OutgoingMessage {
        OutgoingMessage {
            payload: self.with_preamble(&self.prompts.message_marker, text),
            display: text.to_string(),
        }
    }

    /// Hidden turn that opens a conversation from the profile.
    pub fn compose_bootstrap(&self) -> Option<String> {
        self.preamble()?;
        Some(self.with_preamble(&self.prompts.message_marker, &self.prompts.bootstrap_prompt))
    }

    pub fn compose_instruction(&self, kind: DocumentKind) -> String {
        self.with_preamble(&self.prompts.instruction_marker, self.prompts.instruction_for(kind))
    }

    /// User turns carrying a preamble are internal and never rendered.
    pub fn is_system_turn(&self, message: &ChatMessage) -> bool {
        is_system_turn(message, &self.prompts)
    }
}

pub fn is_system_turn(message: &ChatMessage, prompts: &PromptConfig) -> bool {
    message.sender == Sender::User && message.content.starts_with(&prompts.profile_label)
}

pub fn visible_messages(messages: &[ChatMessage], prompts: &PromptConfig) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| !is_system_turn(m, prompts))
        .cloned()
        .collect()
}
