//! Output channel: a run's append-only, multi-reader chunk sequence.
//!
//! The run's executor is the only writer. Readers attach at any index and get
//! the backlog from that index followed by the live tail, until the channel is
//! closed. Readers never consume chunks on behalf of each other.

use crate::{Chunk, ChunkIndex, IndexedChunk};
use async_stream::stream;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Output channel is closed")]
pub struct ChannelClosed;

#[derive(Debug, Default)]
struct ChannelLog {
    chunks: Vec<Chunk>,
    closed: bool,
}

struct Inner {
    log: RwLock<ChannelLog>,
    /// Bumped on every append and on close; readers wait on it for the live tail.
    notify: watch::Sender<u64>,
}

#[derive(Clone)]
pub struct OutputChannel {
    inner: Arc<Inner>,
}

impl OutputChannel {
    pub fn new() -> Self {
        Self::restore(Vec::new(), false)
    }

    /// Rebuild a channel from persisted chunks.
    pub fn restore(chunks: Vec<Chunk>, closed: bool) -> Self {
        let (notify, _) = watch::channel(chunks.len() as u64);
        Self {
            inner: Arc::new(Inner {
                log: RwLock::new(ChannelLog { chunks, closed }),
                notify,
            }),
        }
    }

    /// Append a chunk and wake every attached reader.
    pub async fn write(&self, chunk: Chunk) -> Result<ChunkIndex, ChannelClosed> {
        let index = {
            let mut log = self.inner.log.write().await;
            if log.closed {
                return Err(ChannelClosed);
            }
            log.chunks.push(chunk);
            (log.chunks.len() - 1) as ChunkIndex
        };
        self.inner.notify.send_modify(|version| *version += 1);
        Ok(index)
    }

    /// Close the channel. Idempotent.
    pub async fn close(&self) {
        {
            let mut log = self.inner.log.write().await;
            if log.closed {
                return;
            }
            log.closed = true;
        }
        self.inner.notify.send_modify(|version| *version += 1);
    }

    pub async fn len(&self) -> u64 {
        self.inner.log.read().await.chunks.len() as u64
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.log.read().await.closed
    }

    /// Chunks currently stored at `from` or later, without waiting for more.
    pub async fn snapshot(&self, from: ChunkIndex) -> Vec<IndexedChunk> {
        let (chunks, _) = self.inner.slice_from(from).await;
        chunks
    }

    /// Lazy sequence of chunks with index >= `from`: the stored backlog first,
    /// then live chunks as they are written. Ends once the channel is closed
    /// and drained.
    pub fn read(&self, from: ChunkIndex) -> BoxStream<'static, IndexedChunk> {
        let inner = self.inner.clone();
        // Subscribe before the first snapshot so no append can slip between them.
        let mut changes = inner.notify.subscribe();

        Box::pin(stream! {
            let mut next = from;
            loop {
                let (batch, closed) = inner.slice_from(next).await;
                for item in batch {
                    next = item.index + 1;
                    yield item;
                }
                if closed {
                    break;
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Inner {
    async fn slice_from(&self, from: ChunkIndex) -> (Vec<IndexedChunk>, bool) {
        let log = self.log.read().await;
        let start = (from as usize).min(log.chunks.len());
        let chunks = log.chunks[start..]
            .iter()
            .enumerate()
            .map(|(offset, chunk)| IndexedChunk {
                index: (start + offset) as ChunkIndex,
                chunk: chunk.clone(),
            })
            .collect();
        (chunks, log.closed)
    }
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new()
    }
}
