//! Partitioning of identifier lists into bounded blocks

use crate::identifier::Identifier;
use crate::retrieval::RetrievalError;

/// Contiguous run of identifiers fetched in one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position within the retrieval; also selects the initial shard
    pub index: usize,
    /// Identifiers in input order
    pub ids: Vec<Identifier>,
}

impl Block {
    /// Number of identifiers in the block
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the block holds no identifiers
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Split identifiers into contiguous blocks of at most `block_size`
///
/// Blocks cover the input exactly once and in order; only the last may be
/// shorter. An empty input yields no blocks.
///
/// # Errors
///
/// Returns [`RetrievalError::Configuration`] when `block_size` is zero.
///
/// # Examples
///
/// ```
/// use skypatrol_downloader::identifier::Identifier;
/// use skypatrol_downloader::retrieval::blocker::partition;
///
/// let ids: Vec<Identifier> = (1..=5u64).map(Identifier::from).collect();
/// let blocks = partition(&ids, 2).unwrap();
/// assert_eq!(blocks.len(), 3);
/// assert_eq!(blocks[2].ids, vec![Identifier::Numeric(5)]);
/// ```
pub fn partition(ids: &[Identifier], block_size: usize) -> Result<Vec<Block>, RetrievalError> {
    if block_size == 0 {
        return Err(RetrievalError::Configuration(
            "block size must be at least 1".to_string(),
        ));
    }

    Ok(ids
        .chunks(block_size)
        .enumerate()
        .map(|(index, chunk)| Block {
            index,
            ids: chunk.to_vec(),
        })
        .collect())
}
