#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Network operations for shipd
//!
//! This crate wraps the upstream HTTP traffic: streaming artifact bodies from
//! a remote file server and posting accounting records, both on a pooled
//! client with retry logic.

mod client;
mod stream;

pub use client::{NetClient, NetConfig};
pub use stream::{StreamLimits, StreamingBody};

use shipd_errors::{Error, NetworkError};
use shipd_events::{EventEmitter, EventSender};
use url::Url;

/// Open a streaming GET against `url`.
///
/// The body is not read here; the returned stream pulls it segment by
/// segment, enforcing `limits` as it goes. A declared `Content-Length` above
/// the ceiling is rejected before any byte is read.
///
/// # Errors
///
/// Returns an error if the request fails after retries, the server answers
/// with a non-success status, or the declared length exceeds the ceiling.
pub async fn fetch_stream(
    client: &NetClient,
    url: &str,
    limits: StreamLimits,
    tx: &EventSender,
) -> Result<StreamingBody, Error> {
    tx.emit_debug(format!("Fetching stream from {url}"));

    let response = client.get(url).await?;
    let status = response.status();
    if !status.is_success() {
        return Err(NetworkError::HttpError {
            status: status.as_u16(),
            message: status.to_string(),
        }
        .into());
    }

    let declared = response.content_length();
    if let Some(length) = declared {
        if length > limits.max_content_length {
            return Err(NetworkError::ContentTooLarge {
                url: url.to_string(),
                limit: limits.max_content_length,
                declared: Some(length),
            }
            .into());
        }
    }

    Ok(StreamingBody::from_response(url, response, limits))
}

/// Parse and validate a URL
///
/// # Errors
///
/// Returns an error if the URL string is malformed or invalid according to RFC 3986.
pub fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()).into())
}

/// Join a relative key onto a base URL, keeping the base path.
///
/// # Errors
///
/// Returns an error if the base is not a valid URL or the joined result is invalid.
pub fn join_url(base: &str, key: &str) -> Result<Url, Error> {
    let mut base = parse_url(base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(key.trim_start_matches('/'))
        .map_err(|e| NetworkError::InvalidUrl(e.to_string()).into())
}
