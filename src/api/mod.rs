pub mod http;
pub mod sse;

pub use self::http::HttpBackend;

use crate::error::Result;
use crate::models::chat::RemoteMessage;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Item produced by a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(String),
    /// Explicit end-of-stream marker. A channel may also just close.
    Done,
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Remote side of the session: reply generation and durable history.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Opens one push channel for `message`. The stream ends when the
    /// connection closes; an `Err` item means the transport failed.
    async fn open_stream(&self, message: &str) -> Result<FragmentStream>;

    async fn fetch_messages(&self) -> Result<Vec<RemoteMessage>>;

    async fn reset(&self) -> Result<()>;

    /// Bytes of the last generated plan, `None` when nothing is available.
    async fn export_plan(&self) -> Result<Option<Vec<u8>>>;
}
