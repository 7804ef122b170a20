use crate::error::{ Result, SessionError };
use crate::models::document::DocumentKind;
use log::info;
use serde::Deserialize;
use std::fs;
use std::sync::Arc;

/// Fixed strings the engine matches against or sends to the backend.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    /// Locally synthesized first message shown when no profile exists.
    pub greeting: String,
    /// Prefix identifying a greeting that has not reached the backend.
    pub greeting_prefix: String,
    /// Hidden user turn that starts a profile based conversation.
    pub bootstrap_prompt: String,
    pub profile_label: String,
    pub message_marker: String,
    pub instruction_marker: String,
    pub routine_instruction: String,
    pub diet_instruction: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            greeting: "Hi, I'm GymAI. Tell me your goal (lose weight, build muscle, get lean, maintain), your gym experience and how many days you can train, and I'll help you with your routines and diet.".to_string(),
            greeting_prefix: "Hi, I'm GymAI.".to_string(),
            bootstrap_prompt: "Start with a first analysis and an initial plan based on this profile.".to_string(),
            profile_label: "Profile:".to_string(),
            message_marker: "Message:".to_string(),
            instruction_marker: "Instruction:".to_string(),
            routine_instruction: "Generate a detailed TRAINING plan. IMPORTANT: structure the days in a Markdown TABLE with the columns: Day, Exercise, Sets, Reps. Use clear headings (##) for the main sections.".to_string(),
            diet_instruction: "Generate a detailed DIET plan. IMPORTANT: structure the meals in a Markdown TABLE with the columns: Meal, Option 1, Option 2, Approx. calories. Use clear headings (##) for the main sections.".to_string(),
        }
    }
}

impl PromptConfig {
    pub fn instruction_for(&self, kind: DocumentKind) -> &str {
        match kind {
            DocumentKind::Routine => &self.routine_instruction,
            DocumentKind::Diet => &self.diet_instruction,
        }
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("greeting_prefix", &self.greeting_prefix),
            ("profile_label", &self.profile_label),
            ("message_marker", &self.message_marker),
            ("bootstrap_prompt", &self.bootstrap_prompt),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(SessionError::Config(format!("prompt '{}' must not be empty", name)));
            }
        }
        if !self.greeting.starts_with(&self.greeting_prefix) {
            return Err(
                SessionError::Config("greeting must start with greeting_prefix".to_string())
            );
        }
        Ok(())
    }
}

pub fn load_prompts_from_str(json: &str) -> Result<Arc<PromptConfig>> {
    let config: PromptConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(Arc::new(config))
}

/// Built-in prompts, optionally overridden field by field from a JSON file.
pub fn load_prompts(path: Option<&str>) -> Result<Arc<PromptConfig>> {
    match path {
        Some(path) => {
            info!("Loading prompt overrides from: {}", path);
            let json = fs
                ::read_to_string(path)
                .map_err(|e| SessionError::Config(format!("Failed to read prompts file '{}': {}", path, e)))?;
            load_prompts_from_str(&json)
        }
        None => Ok(Arc::new(PromptConfig::default())),
    }
}
