use serde::{ Serialize, Deserialize };
use std::fmt;

/// Kind of plan requested through the silent export flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Routine,
    Diet,
}

impl DocumentKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            DocumentKind::Routine => "gymai-routine-plan.pdf",
            DocumentKind::Diet => "gymai-diet-plan.pdf",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKind::Routine => write!(f, "routine"),
            DocumentKind::Diet => write!(f, "diet"),
        }
    }
}
