use super::sse::{ parse_event, SseBuffer };
use super::{ ChatBackend, FragmentStream, StreamEvent };
use crate::error::{ Result, SessionError };
use crate::models::chat::RemoteMessage;
use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, warn };
use reqwest::header::{ ACCEPT, CACHE_CONTROL };
use reqwest::{ Client as HttpClient, StatusCode };
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

pub struct HttpBackend {
    http: HttpClient,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &Url) -> Result<Self> {
        let http = HttpClient::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, route: &str) -> String {
        format!("{}{}", self.base_url, route)
    }

    fn stream_url(&self, message: &str) -> Result<Url> {
        Url::parse_with_params(&self.endpoint("/chat/stream"), &[("message", message)]).map_err(|e|
            SessionError::Config(format!("Invalid stream URL: {}", e))
        )
    }

    fn check_status(resp: &reqwest::Response) -> Result<()> {
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SessionError::Status {
                status: resp.status().as_u16(),
                url: resp.url().to_string(),
            })
        }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn open_stream(&self, message: &str) -> Result<FragmentStream> {
        let url = self.stream_url(message)?;
        debug!("Opening push channel: {}", url);
        let resp = self.http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send().await?;
        Self::check_status(&resp)?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut buffer = SseBuffer::new();
            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(buf) => {
                        buffer.push_chunk(&buf);
                        while let Some(block) = buffer.next_event_block() {
                            if !forward_block(&tx, &block).await {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Push channel interrupted: {}", e);
                        let _ = tx.send(Err(SessionError::Stream(e.to_string()))).await;
                        return;
                    }
                }
            }
            if let Some(block) = buffer.take_remainder() {
                forward_block(&tx, &block).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn fetch_messages(&self) -> Result<Vec<RemoteMessage>> {
        let resp = self.http.get(self.endpoint("/messages")).send().await?;
        Self::check_status(&resp)?;
        let messages: Option<Vec<RemoteMessage>> = resp.json().await?;
        Ok(messages.unwrap_or_default())
    }

    async fn reset(&self) -> Result<()> {
        let resp = self.http
            .post(self.endpoint("/messages/reset"))
            .json(&serde_json::json!({}))
            .send().await?;
        Self::check_status(&resp)
    }

    async fn export_plan(&self) -> Result<Option<Vec<u8>>> {
        let resp = self.http.get(self.endpoint("/export/last-plan.pdf")).send().await?;
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        Self::check_status(&resp)?;
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(bytes.to_vec()))
    }
}

/// Returns false once the receiver is gone or the sentinel was forwarded.
async fn forward_block(tx: &mpsc::Sender<Result<StreamEvent>>, block: &str) -> bool {
    let Some(event) = parse_event(block) else {
        return true;
    };
    if event.is_end_sentinel() {
        let _ = tx.send(Ok(StreamEvent::Done)).await;
        return false;
    }
    if event.data.is_empty() {
        return true;
    }
    tx.send(Ok(StreamEvent::Fragment(event.data))).await.is_ok()
}
