#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! WebSocket transport gateway for shipd
//!
//! Clients connect to the delivery namespace (`/files` by default) with a
//! `token` query parameter, send `request-delivery` events, and receive the
//! artifact as a run of binary `chunk-delivered` frames closed by
//! `delivery-complete` or `delivery-error`. See [`protocol`] for the exact
//! frame layouts.

pub mod admission;
mod connection;
pub mod protocol;
mod server;

pub use admission::admit;
pub use protocol::{decode_chunk, decode_text, ChunkHeader, Inbound, Outbound};
pub use server::DeliveryServer;
