//! Outbound side of a delivery session

use async_trait::async_trait;
use shipd_errors::Error;
use shipd_events::FailureContext;
use shipd_types::Chunk;

/// Where a session writes its protocol events.
///
/// Every method resolves once the frame is queued for the connection. A
/// returned error means the connection is gone; the session treats it as
/// cancellation and emits nothing further.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Reply to the request with `begin-delivery`
    async fn begin(&self, ack: Option<u64>) -> Result<(), Error>;

    /// Reply to the request with an error instead of `begin-delivery`
    async fn reject(&self, ack: Option<u64>, failure: &FailureContext) -> Result<(), Error>;

    /// Emit one `chunk-delivered` frame
    async fn chunk(&self, chunk: Chunk) -> Result<(), Error>;

    /// Emit `delivery-complete`
    async fn complete(&self) -> Result<(), Error>;

    /// Emit `delivery-error`
    async fn error(&self, failure: &FailureContext) -> Result<(), Error>;
}
