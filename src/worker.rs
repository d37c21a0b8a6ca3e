use std::{ops::Range, sync::OnceLock};

use log::{debug, info};
use ndarray::ArrayView2;
use sprs::CsMat;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{EngineErr, Result},
    metric::{CosineScorer, DotScorer, Metric, Scorer},
    shared::{self, Element, SharedMatrix, SharedMatrixHandle, WeightView},
};

/// A prediction worker bound to one shared weight matrix.
///
/// The matrix is attached once, when the worker is created, and every chunk
/// afterwards is scored against that same mapping.
#[derive(Debug)]
pub struct Worker {
    worker_id: usize,
    weights: SharedMatrix,
    cosine: OnceLock<CosineScorer>,
}

impl Worker {
    /// Creates a worker by attaching to the published weights.
    ///
    /// # Args
    /// * `worker_id` - Identifier used for observability.
    /// * `handle` - The published weight matrix.
    ///
    /// # Errors
    /// Returns `EngineErr::Attach` if the region can't be mapped.
    pub fn attach(worker_id: usize, handle: &SharedMatrixHandle) -> Result<Self> {
        let weights = shared::attach(handle)?;
        let (classes, cols) = weights.shape();
        info!(worker_id = worker_id, classes = classes, cols = cols; "worker attached");

        Ok(Self {
            worker_id,
            weights,
            cosine: OnceLock::new(),
        })
    }

    pub fn id(&self) -> usize {
        self.worker_id
    }

    /// Returns the `(classes, cols)` shape of the attached weights.
    pub fn weights_shape(&self) -> (usize, usize) {
        self.weights.shape()
    }

    /// Predicts the best class of every row in `rows`.
    ///
    /// # Args
    /// * `input` - The full CSR input matrix, shared by every worker.
    /// * `rows` - The chunk of rows to score.
    /// * `metric` - The scoring metric.
    ///
    /// # Returns
    /// One class index per row, in row order.
    ///
    /// # Errors
    /// `ShapeMismatch` if the input width differs from the weights', and
    /// `InvalidArgument` if there are rows to score but no classes or the
    /// range falls outside the input.
    pub fn predict(&self, input: &CsMat<f64>, rows: Range<usize>, metric: Metric) -> Result<Vec<usize>> {
        self.predict_until(input, rows, metric, &CancellationToken::new())
    }

    /// Like `predict`, but stops with `EngineErr::Cancelled` as soon as
    /// `cancel` fires, checked before every row.
    pub fn predict_until(
        &self,
        input: &CsMat<f64>,
        rows: Range<usize>,
        metric: Metric,
        cancel: &CancellationToken,
    ) -> Result<Vec<usize>> {
        let (classes, cols) = self.weights.shape();
        if input.cols() != cols {
            return Err(EngineErr::ShapeMismatch {
                weights: (classes, cols),
                input: input.shape(),
            });
        }

        if rows.end > input.rows() {
            return Err(EngineErr::invalid(
                "rows",
                format!("{rows:?} is out of bounds for {} input rows", input.rows()),
            ));
        }

        debug!(worker_id = self.worker_id, start = rows.start, end = rows.end; "scoring chunk");

        match self.weights.weights()? {
            WeightView::Float64(w) => self.dispatch(input, rows, metric, w, cancel),
            WeightView::Int32(w) => self.dispatch(input, rows, metric, w, cancel),
        }
    }

    fn dispatch<T: Element>(
        &self,
        input: &CsMat<f64>,
        rows: Range<usize>,
        metric: Metric,
        weights: ArrayView2<'_, T>,
        cancel: &CancellationToken,
    ) -> Result<Vec<usize>> {
        match metric {
            Metric::Dot => best_classes(&DotScorer, input, rows, weights, cancel),
            Metric::Cosine => {
                let scorer = self.cosine.get_or_init(|| CosineScorer::new(weights));
                best_classes(scorer, input, rows, weights, cancel)
            }
        }
    }
}

fn best_classes<S: Scorer, T: Element>(
    scorer: &S,
    input: &CsMat<f64>,
    rows: Range<usize>,
    weights: ArrayView2<'_, T>,
    cancel: &CancellationToken,
) -> Result<Vec<usize>> {
    rows.map(|r| {
        if cancel.is_cancelled() {
            return Err(EngineErr::Cancelled { row: r });
        }

        let row = input
            .outer_view(r)
            .ok_or_else(|| EngineErr::invalid("rows", format!("row {r} is out of bounds")))?;

        scorer
            .best_class(row, weights)
            .ok_or_else(|| EngineErr::invalid("weights", "the weight matrix has no classes"))
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};
    use sprs::TriMat;

    use super::*;
    use crate::shared::publish_in;

    fn csr(shape: (usize, usize), entries: &[(usize, usize, f64)]) -> CsMat<f64> {
        let mut tri = TriMat::new(shape);
        for &(r, c, v) in entries {
            tri.add_triplet(r, c, v);
        }
        tri.to_csr()
    }

    #[test]
    fn test_predicts_each_row_of_the_range() {
        let dir = tempfile::tempdir().unwrap();
        let w = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let region = publish_in(dir.path(), w.view()).unwrap();
        let worker = Worker::attach(0, region.handle()).unwrap();

        let x = csr((4, 3), &[(0, 1, 2.0), (1, 0, 1.0), (2, 2, 1.0), (3, 0, 0.5), (3, 1, 0.7)]);

        assert_eq!(worker.predict(&x, 0..4, Metric::Dot).unwrap(), [1, 0, 2, 1]);
        assert_eq!(worker.predict(&x, 1..3, Metric::Dot).unwrap(), [0, 2]);
        assert!(worker.predict(&x, 2..2, Metric::Dot).unwrap().is_empty());
    }

    #[test]
    fn test_all_zero_row_falls_back_to_bias() {
        let dir = tempfile::tempdir().unwrap();
        let w = array![[3, 0, -1], [-3, 0, 4]];
        let region = publish_in(dir.path(), w.view()).unwrap();
        let worker = Worker::attach(1, region.handle()).unwrap();

        // Features are empty, only the constant bias column is set.
        let x = csr((1, 3), &[(0, 2, 1.0)]);

        assert_eq!(worker.predict(&x, 0..1, Metric::Dot).unwrap(), [1]);
    }

    #[test]
    fn test_rejects_mismatched_width() {
        let dir = tempfile::tempdir().unwrap();
        let w = Array2::<f64>::ones((2, 4));
        let region = publish_in(dir.path(), w.view()).unwrap();
        let worker = Worker::attach(0, region.handle()).unwrap();

        let x = csr((1, 3), &[(0, 2, 1.0)]);

        assert!(matches!(
            worker.predict(&x, 0..1, Metric::Dot),
            Err(EngineErr::ShapeMismatch { weights: (2, 4), input: (1, 3) })
        ));
    }

    #[test]
    fn test_rejects_out_of_bounds_rows() {
        let dir = tempfile::tempdir().unwrap();
        let w = Array2::<f64>::ones((2, 2));
        let region = publish_in(dir.path(), w.view()).unwrap();
        let worker = Worker::attach(0, region.handle()).unwrap();

        let x = csr((2, 2), &[]);

        assert!(matches!(
            worker.predict(&x, 1..3, Metric::Dot),
            Err(EngineErr::InvalidArgument { name: "rows", .. })
        ));
    }

    #[test]
    fn test_no_classes_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let w = Array2::<f64>::zeros((0, 2));
        let region = publish_in(dir.path(), w.view()).unwrap();
        let worker = Worker::attach(0, region.handle()).unwrap();

        let x = csr((1, 2), &[(0, 1, 1.0)]);

        assert!(worker.predict(&x, 0..1, Metric::Dot).is_err());
        assert!(worker.predict(&x, 0..0, Metric::Dot).unwrap().is_empty());
    }

    #[test]
    fn test_cosine_scorer_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let w = array![[10.0, 0.0], [1.0, 1.0]];
        let region = publish_in(dir.path(), w.view()).unwrap();
        let worker = Worker::attach(0, region.handle()).unwrap();

        let x = csr((2, 2), &[(0, 0, 1.0), (0, 1, 1.0), (1, 0, 1.0)]);

        assert_eq!(worker.predict(&x, 0..2, Metric::Cosine).unwrap(), [1, 0]);
        assert!(worker.cosine.get().is_some());
        assert_eq!(worker.predict(&x, 0..2, Metric::Dot).unwrap(), [0, 0]);
    }

    #[test]
    fn test_cancelled_chunk_stops_early() {
        let dir = tempfile::tempdir().unwrap();
        let w = Array2::<f64>::ones((3, 2));
        let region = publish_in(dir.path(), w.view()).unwrap();
        let worker = Worker::attach(0, region.handle()).unwrap();

        let x = csr((5, 2), &[(0, 1, 1.0), (4, 1, 1.0)]);
        let cancel = CancellationToken::new();

        assert_eq!(worker.predict_until(&x, 2..5, Metric::Dot, &cancel).unwrap(), [0, 0, 0]);

        cancel.cancel();
        assert!(matches!(
            worker.predict_until(&x, 2..5, Metric::Dot, &cancel),
            Err(EngineErr::Cancelled { row: 2 })
        ));
    }
}
