//! Bounded streaming of HTTP response bodies

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Response;
use shipd_errors::{Error, NetworkError};
use std::time::Duration;

/// Limits applied while a body is being pulled
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    /// Byte ceiling for the whole body, declared or not.
    pub max_content_length: u64,
    /// Longest wait for the next segment before the transfer is abandoned.
    pub idle_timeout: Duration,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_content_length: 2 * 1024 * 1024 * 1024,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// A response body exposed as a stream of byte segments
pub struct StreamingBody {
    pub url: String,
    /// `Content-Length` as declared by the server.
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes, Error>>,
}

impl std::fmt::Debug for StreamingBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingBody")
            .field("url", &self.url)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

struct BodyState {
    inner: BoxStream<'static, reqwest::Result<Bytes>>,
    url: String,
    received: u64,
    expected: Option<u64>,
    limits: StreamLimits,
    done: bool,
}

impl StreamingBody {
    pub(crate) fn from_response(url: &str, response: Response, limits: StreamLimits) -> Self {
        let content_length = response.content_length();
        let state = BodyState {
            inner: response.bytes_stream().boxed(),
            url: url.to_string(),
            received: 0,
            expected: content_length,
            limits,
            done: false,
        };

        let stream = stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            let item = state.next_segment().await?;
            if item.is_err() {
                state.done = true;
            }
            Some((item, state))
        })
        .boxed();

        Self {
            url: url.to_string(),
            content_length,
            stream,
        }
    }
}

impl BodyState {
    /// Pull one segment, mapping timeouts, overflow, and short bodies to errors.
    /// `None` marks a clean end.
    async fn next_segment(&mut self) -> Option<Result<Bytes, Error>> {
        let next = tokio::time::timeout(self.limits.idle_timeout, self.inner.next()).await;
        match next {
            Err(_) => Some(Err(NetworkError::Timeout {
                url: self.url.clone(),
            }
            .into())),
            Ok(Some(Err(e))) => Some(Err(NetworkError::DownloadFailed(e.to_string()).into())),
            Ok(Some(Ok(segment))) => {
                self.received += segment.len() as u64;
                if self.received > self.limits.max_content_length {
                    return Some(Err(NetworkError::ContentTooLarge {
                        url: self.url.clone(),
                        limit: self.limits.max_content_length,
                        declared: self.expected,
                    }
                    .into()));
                }
                Some(Ok(segment))
            }
            Ok(None) => match self.expected {
                Some(expected) if self.received < expected => {
                    Some(Err(NetworkError::Truncated {
                        url: self.url.clone(),
                        received: self.received,
                        expected,
                    }
                    .into()))
                }
                _ => None,
            },
        }
    }
}
