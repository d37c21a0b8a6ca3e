use std::{iter::FusedIterator, ops::Range};

use sprs::CsMat;

use crate::error::{EngineErr, Result};

/// A contiguous slice of input rows, tagged with its dispatch position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub position: usize,
    pub rows: Range<usize>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Lazily yields `size`-row chunks over `0..rows`, in increasing row order.
///
/// Only the current offset is stored, so chunking a matrix of any height
/// costs nothing up front. Cloning or calling `restart` replays the sequence.
#[derive(Debug, Clone)]
pub struct Chunks {
    rows: usize,
    size: usize,
    next: usize,
}

/// Splits `rows` rows into chunks of `size` rows, the last one possibly shorter.
///
/// # Returns
/// An `InvalidArgument` error if `size` is zero.
pub fn chunks(rows: usize, size: usize) -> Result<Chunks> {
    if size == 0 {
        return Err(EngineErr::invalid("chunk_size", "must be a positive integer"));
    }

    Ok(Chunks {
        rows,
        size,
        next: 0,
    })
}

impl Chunks {
    /// Chunks the rows of a sparse matrix.
    pub fn over(matrix: &CsMat<f64>, size: usize) -> Result<Self> {
        chunks(matrix.rows(), size)
    }

    /// Rewinds to the first chunk.
    pub fn restart(&mut self) {
        self.next = 0;
    }

    pub fn chunk_size(&self) -> usize {
        self.size
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next >= self.rows {
            return None;
        }

        let start = self.next;
        let end = (start + self.size).min(self.rows);
        self.next = end;

        Some(Chunk {
            position: start / self.size,
            rows: start..end,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.rows.saturating_sub(self.next).div_ceil(self.size);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks {}

impl FusedIterator for Chunks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_last_chunk() {
        let ranges: Vec<_> = chunks(10, 4).unwrap().map(|c| c.rows).collect();
        assert_eq!(ranges, [0..4, 4..8, 8..10]);
    }

    #[test]
    fn test_positions_follow_row_order() {
        let positions: Vec<_> = chunks(7, 2).unwrap().map(|c| c.position).collect();
        assert_eq!(positions, [0, 1, 2, 3]);
    }

    #[test]
    fn test_exact_multiple() {
        let c = chunks(9, 3).unwrap();
        assert_eq!(c.len(), 3);
        assert!(c.clone().all(|chunk| chunk.len() == 3));
    }

    #[test]
    fn test_oversized_chunk_covers_everything() {
        let all: Vec<_> = chunks(5, 100).unwrap().collect();
        assert_eq!(all, [Chunk { position: 0, rows: 0..5 }]);
    }

    #[test]
    fn test_no_rows_no_chunks() {
        assert_eq!(chunks(0, 10).unwrap().count(), 0);
    }

    #[test]
    fn test_zero_size_is_invalid() {
        assert!(matches!(
            chunks(10, 0),
            Err(EngineErr::InvalidArgument { name: "chunk_size", .. })
        ));
    }

    #[test]
    fn test_restart_replays() {
        let mut c = chunks(5, 2).unwrap();
        let first: Vec<_> = c.by_ref().collect();
        assert_eq!(c.len(), 0);

        c.restart();
        let second: Vec<_> = c.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_chunks_cover_rows_once() {
        let covered: Vec<usize> = chunks(23, 5).unwrap().flat_map(|c| c.rows).collect();
        assert_eq!(covered, (0..23).collect::<Vec<_>>());
    }

    #[test]
    fn test_over_sparse_matrix() {
        let m = CsMat::<f64>::zero((6, 3));
        assert_eq!(Chunks::over(&m, 4).unwrap().len(), 2);
    }
}
