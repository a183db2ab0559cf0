//! Sequenced payload frames

use bytes::Bytes;

/// One sequenced unit of streamed payload.
///
/// `number` is 1-based and strictly increasing within a session;
/// `total_size` is the same for every chunk of a session and is `None` when
/// the source could not report a length up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub number: u64,
    pub total_size: Option<u64>,
    pub data: Bytes,
}

impl Chunk {
    /// Payload length in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}
