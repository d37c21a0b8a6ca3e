use std::{env, str::FromStr, sync::Arc, thread, time::Instant};

use anyhow::Context;
use log::{info, warn};
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};
use sprs::{CsMat, TriMat};
use tokio::{signal, sync::oneshot};

use xc_argmax::{PoolCoordinator, PredictConfig, shared};

/// Non-zero features drawn per synthetic input row.
const ROW_NNZ: usize = 16;

/// A seeded synthetic problem: random class weights and sparse rows built
/// from the weights of a planted class.
struct Problem {
    rows: usize,
    features: usize,
    classes: usize,
    seed: u64,
}

impl Problem {
    fn new(rows: usize, features: usize, classes: usize, seed: u64) -> anyhow::Result<Self> {
        anyhow::ensure!(classes > 0, "XC_CLASSES must be at least 1");

        Ok(Self {
            rows,
            features,
            classes,
            seed,
        })
    }

    fn from_env() -> anyhow::Result<Self> {
        Self::new(
            env_or("XC_ROWS", 20_000)?,
            env_or("XC_FEATURES", 5_000)?,
            env_or("XC_CLASSES", 1_000)?,
            env_or("XC_SEED", 42)?,
        )
    }

    /// Returns `(weights, input, planted labels)`, the bias column last in both matrices.
    fn generate(&self) -> (Array2<f64>, CsMat<f64>, Vec<usize>) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let cols = self.features + 1;

        let weights = Array2::from_shape_simple_fn((self.classes, cols), || rng.random_range(-1.0..1.0));

        let mut tri = TriMat::new((self.rows, cols));
        let mut labels = Vec::with_capacity(self.rows);
        for r in 0..self.rows {
            let label = rng.random_range(0..self.classes);
            let mut picked = Vec::with_capacity(ROW_NNZ);
            while picked.len() < ROW_NNZ.min(self.features) {
                let j = rng.random_range(0..self.features);
                if !picked.contains(&j) {
                    picked.push(j);
                    tri.add_triplet(r, j, weights[[label, j]]);
                }
            }
            tri.add_triplet(r, self.features, 1.0);
            labels.push(label);
        }

        (weights, tri.to_csr(), labels)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a number, got {value:?}")),
        Err(_) => Ok(default),
    }
}

/// Resolves on Ctrl-C, or on SIGTERM where there is one.
async fn shutdown_signal() -> anyhow::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            interrupted = signal::ctrl_c() => Ok(interrupted.map(|_| "interrupted")?),
            _ = terminate.recv() => Ok("terminated"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok("interrupted")
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => PredictConfig::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => PredictConfig::default(),
    }
    .with_env_overrides()?;

    let problem = Problem::from_env()?;
    info!(
        rows = problem.rows,
        features = problem.features,
        classes = problem.classes;
        "generating synthetic problem"
    );
    let (weights, input, labels) = problem.generate();

    let region = match config.shm_dir() {
        Some(dir) => shared::publish_in(dir, weights.view()),
        None => shared::publish(weights.view()),
    }
    .context("publishing weights")?;
    drop(weights);

    let handle = region.handle().clone();
    let input = Arc::new(input);
    let mut pool = PoolCoordinator::new(config);

    let started = Instant::now();
    let (done_tx, done_rx) = oneshot::channel();
    thread::spawn(move || {
        let _ = done_tx.send(pool.predict(input, &handle));
    });

    tokio::select! {
        done = done_rx => {
            let predictions = done.context("prediction thread stopped")??;
            let elapsed = started.elapsed();

            let hits = predictions.iter().zip(&labels).filter(|(p, l)| p == l).count();
            info!(
                "predicted {} rows in {:.1}s, {:.2}% matched their planted class",
                predictions.len(),
                elapsed.as_secs_f64(),
                100.0 * hits as f64 / predictions.len().max(1) as f64
            );
        }
        reason = shutdown_signal() => {
            warn!("{}, releasing shared region", reason?);
        }
    }

    region.release()?;
    Ok(())
}
