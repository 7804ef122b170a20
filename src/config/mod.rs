pub mod prompt;

use crate::cli::Args;
use crate::error::{ Result, SessionError };
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Validated runtime settings derived from the command line.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub api_base_url: Url,
    pub poll_interval: Duration,
    pub quiet_window: Duration,
    pub typing_cadence: Duration,
    pub export_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse("http://localhost:8080/api").expect("static url"),
            poll_interval: Duration::from_millis(5000),
            quiet_window: Duration::from_millis(3000),
            typing_cadence: Duration::from_millis(60),
            export_dir: PathBuf::from("."),
        }
    }
}

fn positive_millis(name: &str, value: u64) -> Result<Duration> {
    if value == 0 {
        return Err(SessionError::Config(format!("{} must be greater than zero", name)));
    }
    Ok(Duration::from_millis(value))
}

impl SessionConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        let api_base_url = Url::parse(&args.api_base_url).map_err(|e|
            SessionError::Config(format!("Invalid API base URL '{}': {}", args.api_base_url, e))
        )?;
        if api_base_url.cannot_be_a_base() {
            return Err(SessionError::Config(format!("'{}' cannot be used as a base URL", args.api_base_url)));
        }

        Ok(Self {
            api_base_url,
            poll_interval: positive_millis("poll interval", args.poll_interval_ms)?,
            quiet_window: positive_millis("quiet window", args.quiet_window_ms)?,
            typing_cadence: positive_millis("typing cadence", args.typing_cadence_ms)?,
            export_dir: PathBuf::from(&args.export_dir),
        })
    }
}
