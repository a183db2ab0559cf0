#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Chunked artifact delivery for shipd
//!
//! A delivery session resolves a request to an open source, frames the
//! source's bytes into numbered chunks, and pushes them to a
//! [`DeliverySink`] until the source ends, fails, or the connection goes
//! away. Completed deliveries are handed to accounting in the background.
//!
//! The transport owns the sink; this crate knows nothing about sockets.

pub mod accounting;
mod framer;
mod registry;
mod service;
mod session;
mod sink;

pub use accounting::{
    AccountingCollaborator, AccountingNotifier, DownloadLedger, HttpAccounting, LedgerEntry,
};
pub use framer::ChunkFramer;
pub use registry::SessionRegistry;
pub use service::DeliveryService;
pub use session::{DeliverySession, SessionContext};
pub use sink::DeliverySink;
