use crate::error::Result;
use crate::store::{ KeyValueStore, THEME_KEY };
use log::warn;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseThemeError {
    message: String,
}

impl fmt::Display for ParseThemeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseThemeError {}

impl FromStr for Theme {
    type Err = ParseThemeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            _ =>
                Err(ParseThemeError {
                    message: format!("Invalid theme: '{}'", s),
                }),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::Light => write!(f, "light"),
            Theme::Dark => write!(f, "dark"),
        }
    }
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// Stored as the bare string, not JSON. Anything unreadable means dark.
pub async fn load_theme(store: &dyn KeyValueStore) -> Theme {
    match store.get(THEME_KEY).await {
        Ok(Some(raw)) => {
            String::from_utf8_lossy(&raw).parse().unwrap_or_default()
        }
        Ok(None) => Theme::default(),
        Err(e) => {
            warn!("Failed to read theme preference: {}", e);
            Theme::default()
        }
    }
}

pub async fn save_theme(store: &dyn KeyValueStore, theme: Theme) -> Result<()> {
    store.set(THEME_KEY, theme.to_string().as_bytes()).await
}

pub async fn toggle_theme(store: &dyn KeyValueStore) -> Result<Theme> {
    let next = load_theme(store).await.toggled();
    save_theme(store, next).await?;
    Ok(next)
}
