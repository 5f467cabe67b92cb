//! Chunk Planner: splits an ordered file list into bounded chunks

use serde::{Deserialize, Serialize};

use crate::payload::FileAttachment;

/// Default maximum files per server-side chunk
pub const DEFAULT_CHUNK_SIZE: usize = 5;

/// A bounded, ordered slice of a request's items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk<T> {
    pub index: usize,
    pub items: Vec<T>,
}

/// Chunk of file attachments, the unit of one remote call
pub type FileChunk = Chunk<FileAttachment>;

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Split `items` into consecutive chunks of at most `max_per_chunk`.
///
/// Always yields at least one chunk; an empty input produces a single empty
/// chunk so prompt-only requests flow through the same path. A limit of zero
/// is treated as one.
pub fn plan_chunks<T: Clone>(items: &[T], max_per_chunk: usize) -> Vec<Chunk<T>> {
    let size = max_per_chunk.max(1);
    if items.is_empty() {
        return vec![Chunk {
            index: 0,
            items: Vec::new(),
        }];
    }

    items
        .chunks(size)
        .enumerate()
        .map(|(index, slice)| Chunk {
            index,
            items: slice.to_vec(),
        })
        .collect()
}
