//! Server-Sent Events progress channel.

use std::fmt::Display;

use eventsource_stream::{EventStreamError, Eventsource};
use futures::{Stream, StreamExt, stream::BoxStream};
use reqwest::{Client, header::ACCEPT};
use thiserror::Error;
use tracing::debug;
use url::Url;
use utils::progress::ProgressEvent;

use crate::api::{ApiClientError, translate_response};

#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("progress channel transport error: {0}")]
    Transport(String),
    #[error("malformed progress event: {0}")]
    Decode(String),
}

impl ChannelError {
    /// Hard errors mean the connection is gone; soft ones only affect one frame
    pub fn is_hard(&self) -> bool {
        matches!(self, ChannelError::Transport(_))
    }
}

/// Lazy sequence of progress ticks, finite once the server closes the connection.
/// Dropping it closes the connection.
pub type ProgressStream = BoxStream<'static, Result<ProgressEvent, ChannelError>>;

/// Open the event stream at `url` (which carries the access token)
pub async fn open(http: &Client, url: Url) -> Result<ProgressStream, ApiClientError> {
    let res = http
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| ApiClientError::Transport(e.to_string()))?;

    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        let err = translate_response::<serde_json::Value>(status, &body)
            .err()
            .unwrap_or_else(|| ApiClientError::Decode("unexpected progress channel response".to_string()));
        return Err(err);
    }

    debug!("Progress channel opened");
    Ok(decode_events(res.bytes_stream()))
}

/// Parse a raw SSE byte stream into progress events
pub fn decode_events<S, B, E>(bytes: S) -> ProgressStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    bytes
        .eventsource()
        .filter_map(|item| async move {
            match item {
                Ok(event) if event.data.trim().is_empty() => None,
                Ok(event) => Some(
                    serde_json::from_str::<ProgressEvent>(&event.data)
                        .map_err(|e| ChannelError::Decode(format!("{e}: {}", event.data))),
                ),
                Err(EventStreamError::Transport(e)) => Some(Err(ChannelError::Transport(e.to_string()))),
                Err(e) => Some(Err(ChannelError::Decode(e.to_string()))),
            }
        })
        .boxed()
}
