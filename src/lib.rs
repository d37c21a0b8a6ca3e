//! Parallel sparse×dense argmax for extreme multi-class classification.
//!
//! A dense class-weight matrix is published once into a shared memory
//! region, a fixed pool of workers attaches to it, and the rows of a sparse
//! input matrix are scored in chunks. The result is the best class of every
//! input row, in input order.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ndarray::array;
//! use sprs::TriMat;
//! use xc_argmax::{PoolCoordinator, PredictConfig};
//!
//! let weights = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
//! let mut tri = TriMat::new((1, 3));
//! tri.add_triplet(0, 1, 0.5);
//! tri.add_triplet(0, 2, 1.0);
//!
//! let mut pool = PoolCoordinator::new(PredictConfig::default());
//! let classes = pool.run(weights.view(), Arc::new(tri.to_csr())).unwrap();
//! assert_eq!(classes, [1]);
//! ```

pub mod chunker;
pub mod config;
pub mod error;
pub mod metric;
pub mod pool;
pub mod shared;
pub mod worker;

pub use chunker::{Chunk, Chunks, chunks};
pub use config::PredictConfig;
pub use error::{EngineErr, Result};
pub use metric::Metric;
pub use pool::{PoolCoordinator, RunState, predict};
pub use shared::{DType, Element, SharedMatrixHandle, SharedRegion, attach, publish};
pub use worker::Worker;
