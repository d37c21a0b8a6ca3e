mod dtype;
mod handle;
mod publisher;
mod reader;

pub use dtype::{DType, Element};
pub use handle::SharedMatrixHandle;
pub use publisher::{SharedRegion, default_shm_dir, publish, publish_in};
pub use reader::{SharedMatrix, WeightView, attach};
