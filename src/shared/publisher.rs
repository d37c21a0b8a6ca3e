use std::{
    env, fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use ndarray::ArrayView2;
use tempfile::TempPath;

use super::{Element, SharedMatrixHandle};
use crate::error::Result;

const REGION_PREFIX: &str = "xc-weights-";

/// Returns the directory where shared regions are created by default.
///
/// `/dev/shm` keeps the region in memory on Linux, any other platform falls
/// back to the OS temporary directory.
pub fn default_shm_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        env::temp_dir()
    }
}

/// Owns a published weight region for the duration of a run.
///
/// The region is removed by `release`, or when this value is dropped, so
/// both a normal return and an early error return give the memory back.
#[derive(Debug)]
pub struct SharedRegion {
    handle: SharedMatrixHandle,
    path: TempPath,
}

impl SharedRegion {
    /// Returns the handle workers use to attach to this region.
    pub fn handle(&self) -> &SharedMatrixHandle {
        &self.handle
    }

    /// Removes the region. Workers still mapping it keep their view alive
    /// until they unmap, but no new attach can succeed.
    pub fn release(self) -> Result<()> {
        debug!("releasing shared region {}", self.handle.path().display());
        self.path.close()?;
        Ok(())
    }
}

/// Publishes `matrix` into a new shared region in the default directory.
///
/// # Arguments
/// * `matrix` - The dense weight matrix, in any memory layout.
///
/// # Returns
/// The region guard, whose handle describes the published matrix.
pub fn publish<T: Element>(matrix: ArrayView2<'_, T>) -> Result<SharedRegion> {
    publish_in(default_shm_dir(), matrix)
}

/// Publishes `matrix` into a new shared region created inside `dir`.
///
/// The region holds exactly `rows * cols * size_of::<T>()` bytes in logical
/// row-major order, and is made read-only once written.
pub fn publish_in<T: Element>(dir: impl AsRef<Path>, matrix: ArrayView2<'_, T>) -> Result<SharedRegion> {
    let shape = matrix.dim();
    let mut file = tempfile::Builder::new()
        .prefix(REGION_PREFIX)
        .suffix(".bin")
        .tempfile_in(dir)?;

    {
        let mut writer = BufWriter::new(file.as_file_mut());
        match matrix.as_slice() {
            Some(elems) => writer.write_all(bytemuck::cast_slice(elems))?,
            None => {
                for elem in matrix.iter() {
                    writer.write_all(bytemuck::bytes_of(elem))?;
                }
            }
        }
        writer.flush()?;
    }

    let path = file.into_temp_path();
    let mut perms = fs::metadata(&path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(&path, perms)?;

    let handle = SharedMatrixHandle::new(shape, T::DTYPE, path.to_path_buf());
    debug!(
        rows = shape.0,
        cols = shape.1,
        dtype = T::DTYPE.name();
        "published weights to {}",
        handle.path().display()
    );

    Ok(SharedRegion { handle, path })
}
