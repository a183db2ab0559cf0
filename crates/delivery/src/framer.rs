//! Turning a byte stream into numbered chunks

use bytes::Bytes;
use futures::stream::{FusedStream, Stream, StreamExt};
use shipd_errors::Error;
use shipd_types::Chunk;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Wraps a segment stream and numbers each non-empty segment from 1.
///
/// Segments pass through unchanged: one segment, one chunk, no
/// re-buffering. Once the inner stream ends or yields an error the framer
/// returns `None` forever.
pub struct ChunkFramer<S> {
    inner: S,
    total_size: Option<u64>,
    next_number: u64,
    done: bool,
}

impl<S> ChunkFramer<S>
where
    S: Stream<Item = Result<Bytes, Error>> + Unpin,
{
    pub fn new(inner: S, total_size: Option<u64>) -> Self {
        Self {
            inner,
            total_size,
            next_number: 1,
            done: false,
        }
    }

    /// Chunks produced so far
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.next_number - 1
    }
}

impl<S> Stream for ChunkFramer<S>
where
    S: Stream<Item = Result<Bytes, Error>> + Unpin,
{
    type Item = Result<Chunk, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(data)) if data.is_empty() => {}
                Some(Ok(data)) => {
                    let number = this.next_number;
                    this.next_number += 1;
                    return Poll::Ready(Some(Ok(Chunk {
                        number,
                        total_size: this.total_size,
                        data,
                    })));
                }
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.done = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl<S> FusedStream for ChunkFramer<S>
where
    S: Stream<Item = Result<Bytes, Error>> + Unpin,
{
    fn is_terminated(&self) -> bool {
        self.done
    }
}
