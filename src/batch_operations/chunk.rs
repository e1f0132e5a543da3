use crate::errors::{AccessError, Result};

/// One contiguous slice of a batch plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// 1-based position in the plan.
    pub ordinal: usize,
    pub items: Vec<T>,
}

/// Split `items` into chunks of `max_chunk_size`, in order.
///
/// Every chunk but the last is full; the last holds the remainder. Joining
/// the chunks reproduces `items` exactly. Empty input yields no chunks.
pub fn chunk<T: Clone>(items: &[T], max_chunk_size: usize) -> Result<Vec<Chunk<T>>> {
    if max_chunk_size == 0 {
        return Err(AccessError::Validation(
            "chunk size must be at least 1".into(),
        ));
    }

    let full_chunks = items.len() / max_chunk_size;
    let leftover = items.len() - full_chunks * max_chunk_size;

    let mut chunks: Vec<Chunk<T>> = items[..full_chunks * max_chunk_size]
        .chunks_exact(max_chunk_size)
        .enumerate()
        .map(|(i, slice)| Chunk {
            ordinal: i + 1,
            items: slice.to_vec(),
        })
        .collect();

    if leftover > 0 {
        chunks.push(Chunk {
            ordinal: full_chunks + 1,
            items: items[full_chunks * max_chunk_size..].to_vec(),
        });
    }
    Ok(chunks)
}
