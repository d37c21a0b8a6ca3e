use std::{fs::File, path::PathBuf};

use memmap2::Mmap;
use ndarray::ArrayView2;

use super::{DType, Element, SharedMatrixHandle};
use crate::error::{EngineErr, Result};

/// A read-only mapping of a published weight matrix.
///
/// Nothing is copied: every attached reader maps the same pages.
#[derive(Debug)]
pub struct SharedMatrix {
    shape: (usize, usize),
    dtype: DType,
    path: PathBuf,
    map: Option<Mmap>,
}

/// A typed view over an attached weight matrix.
#[derive(Debug, Clone, Copy)]
pub enum WeightView<'a> {
    Float64(ArrayView2<'a, f64>),
    Int32(ArrayView2<'a, i32>),
}

impl WeightView<'_> {
    /// Returns `(classes, features + 1)`.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            WeightView::Float64(w) => w.dim(),
            WeightView::Int32(w) => w.dim(),
        }
    }
}

/// Maps the region described by `handle`.
///
/// # Returns
/// An `Attach` error if the region was released, doesn't have the size the
/// handle describes, or can't be viewed as the handle's element type.
pub fn attach(handle: &SharedMatrixHandle) -> Result<SharedMatrix> {
    let path = handle.path();
    let expected = handle.byte_len();

    let file = File::open(path).map_err(|e| EngineErr::attach(path, e))?;
    let len = file.metadata().map_err(|e| EngineErr::attach(path, e))?.len();
    if len != expected as u64 {
        return Err(EngineErr::attach(
            path,
            format!("region holds {len} bytes, expected {expected}"),
        ));
    }

    let map = if expected == 0 {
        None
    } else {
        // SAFETY: Published regions are read-only and never truncated while
        //         the run that owns them is alive.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| EngineErr::attach(path, e))?;
        Some(map)
    };

    let matrix = SharedMatrix {
        shape: handle.shape(),
        dtype: handle.dtype(),
        path: path.to_path_buf(),
        map,
    };

    matrix.weights()?;
    Ok(matrix)
}

impl SharedMatrix {
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns a view typed as `T`.
    ///
    /// # Returns
    /// An `UnsupportedType` error if the region doesn't hold `T` elements.
    pub fn view<T: Element>(&self) -> Result<ArrayView2<'_, T>> {
        if T::DTYPE != self.dtype {
            return Err(EngineErr::UnsupportedType {
                dtype: format!("{} (region holds {})", T::DTYPE, self.dtype),
            });
        }

        let elems: &[T] = match &self.map {
            Some(map) => bytemuck::try_cast_slice(&map[..])
                .map_err(|e| EngineErr::attach(&self.path, format!("{e:?}")))?,
            None => &[],
        };

        ArrayView2::from_shape(self.shape, elems).map_err(|e| EngineErr::attach(&self.path, e))
    }

    /// Returns a view tagged with the region's element type.
    pub fn weights(&self) -> Result<WeightView<'_>> {
        match self.dtype {
            DType::Float64 => self.view().map(WeightView::Float64),
            DType::Int32 => self.view().map(WeightView::Int32),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use ndarray::{Array2, array};

    use super::*;
    use crate::shared::publish_in;

    #[test]
    fn test_view_matches_published() {
        let dir = tempfile::tempdir().unwrap();
        let w = array![[0.25, -1.0], [3.5, 0.0]];

        let region = publish_in(dir.path(), w.view()).unwrap();
        let matrix = attach(region.handle()).unwrap();

        assert_eq!(matrix.view::<f64>().unwrap(), w);
    }

    #[test]
    fn test_wrong_element_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let w = array![[1_i32, 2]];

        let region = publish_in(dir.path(), w.view()).unwrap();
        let matrix = attach(region.handle()).unwrap();

        assert!(matches!(
            matrix.view::<f64>(),
            Err(EngineErr::UnsupportedType { .. })
        ));
    }

    #[test]
    fn test_empty_matrix_attaches_without_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let w = Array2::<f64>::zeros((0, 4));

        let region = publish_in(dir.path(), w.view()).unwrap();
        let matrix = attach(region.handle()).unwrap();

        assert!(matrix.map.is_none());
        assert_eq!(matrix.view::<f64>().unwrap().dim(), (0, 4));
    }

    #[test]
    fn test_attach_after_release_fails() {
        let dir = tempfile::tempdir().unwrap();
        let w = array![[1.0_f64, 2.0]];

        let region = publish_in(dir.path(), w.view()).unwrap();
        let handle = region.handle().clone();
        region.release().unwrap();

        assert!(matches!(attach(&handle), Err(EngineErr::Attach { .. })));
    }

    #[test]
    fn test_truncated_region_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        fs::write(&path, [0_u8; 12]).unwrap();

        let handle = SharedMatrixHandle::new((2, 2), DType::Float64, path);
        let err = attach(&handle).unwrap_err();

        assert!(matches!(err, EngineErr::Attach { ref path, .. } if path.ends_with(Path::new("short.bin"))));
    }
}
