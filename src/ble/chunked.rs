//! Chunked writes for block-oriented endpoints.
//!
//! GATT characteristics accept at most one block per write. A payload is
//! written as consecutive blocks starting at offset 0; the first failing
//! block ends the write. A message that only partly reached the device
//! cannot be reassembled by the application, so any failed block fails
//! the whole payload and the caller resends it in full.

use std::num::NonZeroUsize;
use std::ops::Range;

use thiserror::Error;

use crate::ble::GattEndpoint;
use crate::error::Error;
use crate::status::{Normalize, Operation, TransportStatus};

/// Default GATT block size (ATT default MTU of 23 minus the 3 byte header).
pub const BLE_BLOCK_SIZE: usize = 20;

const DEFAULT_BLOCK_SIZE: NonZeroUsize = match NonZeroUsize::new(BLE_BLOCK_SIZE) {
    Some(size) => size,
    None => panic!("block size must be non-zero"),
};

/// A block of a chunked write failed.
#[derive(Debug, Error)]
#[error("block {} of {total} at offset {offset} failed: {source}", .index + 1)]
pub struct ChunkedWriteError {
    /// Zero-based index of the failing block.
    pub index: usize,
    /// Payload offset of the failing block.
    pub offset: usize,
    /// Number of blocks the payload was split into.
    pub total: usize,
    /// Why the block failed.
    pub source: Box<Error>,
}

impl ChunkedWriteError {
    /// Number of blocks written before the failure.
    #[must_use]
    pub const fn blocks_written(&self) -> usize {
        self.index
    }

    /// Returns true if earlier blocks reached the device.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        self.index > 0
    }

    /// The failing block's outcome in the shared taxonomy.
    #[must_use]
    pub fn status(&self) -> TransportStatus {
        self.source.normalize(Operation::Write)
    }
}

/// Splits payloads into blocks and writes them in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedWriter {
    block_size: NonZeroUsize,
}

impl ChunkedWriter {
    /// Creates a writer for the given block size.
    #[must_use]
    pub const fn new(block_size: NonZeroUsize) -> Self {
        Self { block_size }
    }

    /// Creates a writer, or `None` if `block_size` is zero.
    #[must_use]
    pub fn with_block_size(block_size: usize) -> Option<Self> {
        NonZeroUsize::new(block_size).map(Self::new)
    }

    /// Returns the block size.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size.get()
    }

    /// Computes the block ranges for a payload of `len` bytes.
    ///
    /// A payload that fits in one block (including an empty one) is a
    /// single write. Longer payloads become `len / size` full blocks
    /// followed by the remainder, if any.
    #[must_use]
    pub fn blocks(&self, len: usize) -> Vec<Range<usize>> {
        let size = self.block_size.get();
        if len <= size {
            return vec![0..len];
        }

        let full = len / size;
        let rest = len % size;
        let mut blocks: Vec<_> = (0..full).map(|i| i * size..(i + 1) * size).collect();
        // The partial block only ever follows a full one
        if full > 0 && rest > 0 {
            blocks.push(full * size..len);
        }
        blocks
    }

    /// Writes `payload` to `endpoint` block by block.
    ///
    /// Returns the number of blocks written. Stops at the first failing
    /// block; later blocks are never attempted and nothing is retried.
    pub async fn write<E: GattEndpoint + ?Sized>(
        &self,
        endpoint: &E,
        payload: &[u8],
    ) -> Result<usize, ChunkedWriteError> {
        let blocks = self.blocks(payload.len());
        let total = blocks.len();

        for (index, range) in blocks.into_iter().enumerate() {
            let offset = range.start;
            let block = &payload[range];
            tracing::trace!(
                "{} block {}/{}: {}",
                endpoint.id(),
                index + 1,
                total,
                hex::encode(block)
            );

            if let Err(e) = endpoint.write_value(block).await {
                tracing::error!(
                    "{} write of block {}/{} failed: {}",
                    endpoint.id(),
                    index + 1,
                    total,
                    e
                );
                return Err(ChunkedWriteError {
                    index,
                    offset,
                    total,
                    source: Box::new(e),
                });
            }
        }

        Ok(total)
    }
}

impl Default for ChunkedWriter {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_SIZE)
    }
}
