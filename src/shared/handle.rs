use std::path::{Path, PathBuf};

use super::DType;

/// Describes a published weight matrix so that any process can attach to it.
///
/// It carries the shape, the element type and the location of the one shared
/// region backing the matrix, never the matrix contents. Serializing it with
/// `serde` is how it crosses process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SharedMatrixHandle {
    shape: (usize, usize),
    dtype: DType,
    path: PathBuf,
}

impl SharedMatrixHandle {
    pub(crate) fn new(shape: (usize, usize), dtype: DType, path: PathBuf) -> Self {
        Self { shape, dtype, path }
    }

    /// Returns `(rows, cols)`, that is `(classes, features + 1)` for a weight matrix.
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the exact size in bytes of the backing region.
    pub fn byte_len(&self) -> usize {
        self.shape.0 * self.shape.1 * self.dtype.size()
    }
}
