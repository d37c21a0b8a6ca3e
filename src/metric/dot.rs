use ndarray::{ArrayView1, ArrayView2};
use sprs::CsVecView;

use super::{Scorer, argmax};
use crate::shared::Element;

/// Scores a row by its inner product with each class row.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotScorer;

/// Inner product of a sparse row with a dense class row, accumulated in `f64`.
///
/// Only the row's non-zeros are visited, so an all-zero feature vector still
/// picks up the bias through its trailing constant entry.
#[inline]
pub fn dot<T: Element>(row: &CsVecView<'_, f64>, class: ArrayView1<'_, T>) -> f64 {
    row.iter().map(|(j, &x)| x * class[j].to_f64()).sum()
}

impl Scorer for DotScorer {
    fn best_class<T: Element>(&self, row: CsVecView<'_, f64>, weights: ArrayView2<'_, T>) -> Option<usize> {
        argmax(weights.outer_iter().map(|class| dot(&row, class)))
    }
}
