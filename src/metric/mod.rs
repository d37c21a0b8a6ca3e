mod cosine;
mod dot;

use std::{fmt, str::FromStr};

use ndarray::ArrayView2;
use sprs::CsVecView;

use crate::{error::EngineErr, shared::Element};

pub use cosine::CosineScorer;
pub use dot::{DotScorer, dot};

/// How a row is scored against each class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    /// Inner product with the class row, bias included.
    #[default]
    Dot,
    /// Inner product normalized by the class row's L2 norm.
    Cosine,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::Dot => "dot",
            Metric::Cosine => "cosine",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = EngineErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dot" => Ok(Metric::Dot),
            "cosine" => Ok(Metric::Cosine),
            other => Err(EngineErr::UnsupportedMetric {
                metric: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Metric {
    type Error = EngineErr;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Metric> for String {
    fn from(value: Metric) -> Self {
        value.name().to_string()
    }
}

/// A similarity measure between a sparse input row and the class rows.
///
/// New measures (e.g. an approximate search index) plug in here without
/// touching the chunking or the pool.
pub trait Scorer {
    /// Returns the best class for `row`, or `None` if `weights` has no rows.
    fn best_class<T: Element>(&self, row: CsVecView<'_, f64>, weights: ArrayView2<'_, T>) -> Option<usize>;
}

/// Index of the highest score, the lowest index winning ties.
///
/// NaN scores never win; if every score is NaN the first index is returned.
pub fn argmax(scores: impl IntoIterator<Item = f64>) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    let mut seen = false;

    for (idx, score) in scores.into_iter().enumerate() {
        seen = true;
        if score.is_nan() {
            continue;
        }

        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((idx, score)),
        }
    }

    best.map(|(idx, _)| idx).or(seen.then_some(0))
}
