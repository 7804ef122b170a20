pub mod render;

use crate::models::document::DocumentKind;
use clap::{ Parser, Subcommand };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Backend Args ---
    /// Base URL of the GymAI backend API (e.g., http://localhost:8080/api)
    #[arg(long, env = "API_BASE_URL", default_value = "http://localhost:8080/api")]
    pub api_base_url: String,

    // --- Persistent Store Args ---
    /// Where session state is persisted (file, memory, redis)
    #[arg(long, env = "STORE_TYPE", default_value = "file")]
    pub store_type: String,

    /// Directory holding the persisted transcript, profile and theme (file store).
    #[arg(long, env = "DATA_DIR", default_value = ".gymai")]
    pub data_dir: String,

    /// Redis URL for the redis store (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "STORE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub store_redis_url: String,

    /// Prefix for redis keys.
    #[arg(long, env = "STORE_REDIS_PREFIX", default_value = "session:")]
    pub store_redis_prefix: String,

    /// Optional JSON file overriding the built-in prompt strings.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    // --- Timing Args ---
    /// Period of the background history sync, in milliseconds.
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "5000")]
    pub poll_interval_ms: u64,

    /// Background sync is skipped for this long after the user sends a message, in milliseconds.
    #[arg(long, env = "QUIET_WINDOW_MS", default_value = "3000")]
    pub quiet_window_ms: u64,

    /// Delay between animated words, in milliseconds.
    #[arg(long, env = "TYPING_CADENCE_MS", default_value = "60")]
    pub typing_cadence_ms: u64,

    // --- General App Args ---
    /// Directory where exported plan PDFs are written.
    #[arg(long, env = "EXPORT_DIR", default_value = ".")]
    pub export_dir: String,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Interactive chat with animated replies and background sync (default).
    Chat,
    /// Send one message and print the settled reply.
    Send {
        text: String,
    },
    /// Print the visible transcript.
    History,
    /// Clear the conversation locally and on the backend.
    Reset,
    /// Show, update or clear the session profile.
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
    /// Generate a plan silently and save it as a PDF.
    Export {
        #[arg(value_enum)]
        kind: DocumentKind,
    },
    /// Show or toggle the theme preference.
    Theme {
        #[arg(long, default_value = "false")]
        toggle: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProfileAction {
    Show,
    Set {
        #[arg(long)]
        age: Option<u32>,
        /// Height in centimetres.
        #[arg(long)]
        height: Option<f64>,
        /// Weight in kilograms.
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        goal: Option<String>,
        #[arg(long)]
        activity: Option<String>,
        #[arg(long)]
        medical_notes: Option<String>,
    },
    Clear,
}
