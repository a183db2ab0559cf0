//! Handshake admission checks

use shipd_errors::{TransportError, UserFacingError};
use tokio_tungstenite::tungstenite::handshake::server::ErrorResponse;
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};

/// Query parameter carrying the client's credential
pub const TOKEN_PARAM: &str = "token";

/// Decide whether an upgrade request may join `namespace`.
///
/// Only the presence of a non-empty token is checked; validating it is the
/// job of whatever sits in front of the daemon.
///
/// # Errors
///
/// Returns `UnknownNamespace` when the path does not match and
/// `AdmissionRejected` when the token is missing or empty.
pub fn admit(uri: &Uri, namespace: &str) -> Result<(), TransportError> {
    if uri.path() != namespace {
        return Err(TransportError::UnknownNamespace {
            path: uri.path().to_string(),
        });
    }

    let has_token = uri.query().is_some_and(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .any(|(key, value)| key == TOKEN_PARAM && !value.is_empty())
    });
    if !has_token {
        return Err(TransportError::AdmissionRejected {
            reason: "missing token".to_string(),
        });
    }
    Ok(())
}

/// HTTP status a refused handshake is answered with
#[must_use]
pub fn rejection_status(err: &TransportError) -> StatusCode {
    match err {
        TransportError::UnknownNamespace { .. } => StatusCode::NOT_FOUND,
        TransportError::AdmissionRejected { .. } => StatusCode::UNAUTHORIZED,
        TransportError::CapacityExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// Build the HTTP response for a refused handshake
#[must_use]
pub fn rejection_response(err: &TransportError) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(err.user_message().into_owned()));
    *response.status_mut() = rejection_status(err);
    response
}
