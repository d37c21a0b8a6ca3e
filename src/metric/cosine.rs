use ndarray::ArrayView2;
use sprs::CsVecView;

use super::{Scorer, argmax, dot};
use crate::shared::Element;

/// Scores a row by its cosine similarity with each class row.
///
/// Class norms are computed once. The row's own norm scales every score of
/// that row by the same positive factor, so it is left out of the argmax.
#[derive(Debug, Clone)]
pub struct CosineScorer {
    norms: Vec<f64>,
}

impl CosineScorer {
    pub fn new<T: Element>(weights: ArrayView2<'_, T>) -> Self {
        let norms = weights
            .outer_iter()
            .map(|class| class.iter().map(|w| w.to_f64().powi(2)).sum::<f64>().sqrt())
            .collect();

        Self { norms }
    }
}

impl Scorer for CosineScorer {
    fn best_class<T: Element>(&self, row: CsVecView<'_, f64>, weights: ArrayView2<'_, T>) -> Option<usize> {
        let scores = weights
            .outer_iter()
            .zip(&self.norms)
            .map(|(class, &norm)| if norm == 0.0 { 0.0 } else { dot(&row, class) / norm });

        argmax(scores)
    }
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use sprs::CsVec;

    use super::*;
    use crate::metric::DotScorer;

    #[test]
    fn test_norm_changes_the_winner() {
        let row = CsVec::new(2, vec![0, 1], vec![1.0, 1.0]);
        // Class 0 has the larger dot product, class 1 points the same way as the row.
        let w = array![[10.0, 0.0], [1.0, 1.0]];

        assert_eq!(DotScorer.best_class(row.view(), w.view()), Some(0));
        assert_eq!(CosineScorer::new(w.view()).best_class(row.view(), w.view()), Some(1));
    }

    #[test]
    fn test_zero_class_scores_zero() {
        let row = CsVec::new(2, vec![0], vec![-1.0]);
        let w = array![[0, 0], [3, 0]];

        assert_eq!(CosineScorer::new(w.view()).best_class(row.view(), w.view()), Some(0));
    }
}
