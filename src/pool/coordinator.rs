use std::{any::Any, collections::BTreeMap, sync::Arc, time::Duration};

use log::{debug, info, warn};
use ndarray::ArrayView2;
use parking_lot::Mutex;
use sprs::CsMat;
use tokio::{
    runtime,
    sync::mpsc,
    task::{JoinError, JoinSet},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;

use super::{ReorderBuffer, RunState};
use crate::{
    chunker::{Chunk, Chunks},
    config::PredictConfig,
    error::{EngineErr, Result},
    metric::Metric,
    shared::{self, Element, SharedMatrixHandle},
    worker::Worker,
};

/// Observer called by a worker right before it scores a chunk.
pub type ChunkHook = Arc<dyn Fn(usize, &Chunk) + Send + Sync>;

/// Chunks kept in flight per worker.
const IN_FLIGHT_PER_WORKER: usize = 2;

type Queue = Arc<Mutex<mpsc::Receiver<Chunk>>>;

/// What a worker sends back about a chunk.
#[derive(Debug)]
enum Report {
    /// A worker picked the chunk up; its deadline runs from `at`.
    Started { position: usize, at: Instant },
    Scored(ChunkResult),
}

/// The scored rows of one chunk.
#[derive(Debug)]
struct ChunkResult {
    worker_id: usize,
    position: usize,
    classes: Vec<usize>,
}

/// Runs a fixed pool of workers over an input matrix and returns the best
/// class of every row, in row order.
///
/// Each call to `predict` or `run` owns its own runtime, queue and workers.
/// Every worker has stopped by the time either returns, on success or error.
pub struct PoolCoordinator {
    config: PredictConfig,
    on_chunk: Option<ChunkHook>,
    state: RunState,
}

impl PoolCoordinator {
    /// Creates a new `PoolCoordinator`.
    ///
    /// # Arguments
    /// * `config` - The validated run configuration.
    pub fn new(config: PredictConfig) -> Self {
        Self {
            config,
            on_chunk: None,
            state: RunState::Created,
        }
    }

    /// Registers an observer called with `(worker_id, chunk)` before each chunk is scored.
    pub fn on_chunk<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize, &Chunk) + Send + Sync + 'static,
    {
        self.on_chunk = Some(Arc::new(hook));
        self
    }

    pub fn config(&self) -> &PredictConfig {
        &self.config
    }

    /// The state the last run reached.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Publishes `weights`, predicts every input row and releases the region.
    ///
    /// The region is released whether the prediction succeeds or not.
    pub fn run<T: Element>(&mut self, weights: ArrayView2<'_, T>, input: Arc<CsMat<f64>>) -> Result<Vec<usize>> {
        self.state = RunState::Created;
        self.state.advance(RunState::Publishing);

        let published = match self.config.shm_dir() {
            Some(dir) => shared::publish_in(dir, weights),
            None => shared::publish(weights),
        };

        let region = match published {
            Ok(region) => region,
            Err(e) => return Err(self.fail(e)),
        };

        let predictions = self.execute(input, region.handle());
        let released = region.release();

        let predictions = predictions?;
        released?;
        Ok(predictions)
    }

    /// Predicts every input row against already published weights.
    ///
    /// # Arguments
    /// * `input` - The sparse input, one row per sample, bias column last.
    /// * `handle` - The published weight matrix.
    ///
    /// # Returns
    /// One class index per input row, in input order, or the first error any
    /// worker ran into. Partial results are never returned.
    pub fn predict(&mut self, input: Arc<CsMat<f64>>, handle: &SharedMatrixHandle) -> Result<Vec<usize>> {
        self.state = RunState::Created;
        self.execute(input, handle)
    }

    fn execute(&mut self, input: Arc<CsMat<f64>>, handle: &SharedMatrixHandle) -> Result<Vec<usize>> {
        match self.drive(input, handle) {
            Ok(predictions) => {
                self.state.advance(RunState::Done);
                Ok(predictions)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, err: EngineErr) -> EngineErr {
        warn!("prediction run failed while {:?}: {err}", self.state);
        self.state.fail();
        err
    }

    fn drive(&mut self, input: Arc<CsMat<f64>>, handle: &SharedMatrixHandle) -> Result<Vec<usize>> {
        let input = if input.is_csr() {
            input
        } else {
            Arc::new(input.to_csr())
        };

        validate(&input, handle)?;
        let chunks = Chunks::over(&input, self.config.chunk_size())?;

        let runtime = runtime::Builder::new_current_thread()
            .max_blocking_threads(self.config.worker_count())
            .thread_name("xc-worker")
            .enable_time()
            .build()?;

        runtime.block_on(self.collect(input, handle, chunks))
    }

    async fn collect(&mut self, input: Arc<CsMat<f64>>, handle: &SharedMatrixHandle, chunks: Chunks) -> Result<Vec<usize>> {
        let cancel = CancellationToken::new();
        let mut join_set = JoinSet::new();

        let result = self.schedule(input, handle, chunks, &cancel, &mut join_set).await;

        // Workers mid-chunk stop at their next row, idle ones see the queue closed.
        cancel.cancel();
        settle(&mut join_set).await;
        result
    }

    async fn schedule(
        &mut self,
        input: Arc<CsMat<f64>>,
        handle: &SharedMatrixHandle,
        mut chunks: Chunks,
        cancel: &CancellationToken,
        join_set: &mut JoinSet<Result<usize>>,
    ) -> Result<Vec<usize>> {
        let workers = self.config.worker_count();
        let window = workers * IN_FLIGHT_PER_WORKER;
        let deadline = self.config.chunk_deadline();

        info!(
            workers = workers,
            rows = input.rows(),
            chunks = chunks.len();
            "starting prediction run"
        );

        let (queue_tx, queue_rx) = mpsc::channel::<Chunk>(window);
        let queue: Queue = Arc::new(Mutex::new(queue_rx));
        let (ready_tx, mut ready_rx) = mpsc::channel::<usize>(workers);
        let (report_tx, mut report_rx) = mpsc::channel::<Report>(2 * window + workers);

        self.state.advance(RunState::WorkersStarting);
        for worker_id in 0..workers {
            let task = WorkerTask {
                worker_id,
                handle: handle.clone(),
                input: Arc::clone(&input),
                metric: self.config.metric(),
                queue: Arc::clone(&queue),
                ready: ready_tx.clone(),
                reports: report_tx.clone(),
                cancel: cancel.clone(),
                on_chunk: self.on_chunk.clone(),
            };
            join_set.spawn_blocking(move || task.serve());
        }
        drop(ready_tx);
        drop(report_tx);
        drop(queue);

        let mut ready = 0;
        while ready < workers {
            tokio::select! {
                worker_id = ready_rx.recv() => match worker_id {
                    Some(_) => ready += 1,
                    None => return Err(exit_cause(join_set).await),
                },
                Some(joined) = join_set.join_next() => {
                    let worker_id = check_exit(joined)?;
                    return Err(EngineErr::WorkerLost { worker_id });
                }
            }
        }
        debug!("all {workers} workers attached");

        self.state.advance(RunState::Dispatching);
        let mut order = ReorderBuffer::with_capacity(input.rows());
        let mut queue_tx = Some(queue_tx);
        let mut in_flight = 0;
        let mut started = BTreeMap::new();

        loop {
            while in_flight < window {
                let Some(tx) = queue_tx.as_ref() else {
                    break;
                };

                match chunks.next() {
                    Some(chunk) => {
                        if tx.send(chunk).await.is_err() {
                            return Err(exit_cause(join_set).await);
                        }
                        in_flight += 1;
                    }
                    None => {
                        // Closing the queue lets workers retire once it drains.
                        queue_tx = None;
                        self.state.advance(RunState::Collecting);
                    }
                }
            }

            if in_flight == 0 {
                break;
            }

            let report = tokio::select! {
                report = report_rx.recv() => match report {
                    Some(report) => report,
                    None => return Err(exit_cause(join_set).await),
                },
                Some(joined) = join_set.join_next() => {
                    check_exit(joined)?;
                    continue;
                }
                err = overdue(oldest(&started), deadline) => return Err(err),
            };

            let result = match report {
                Report::Started { position, at } => {
                    started.insert(position, at);
                    continue;
                }
                Report::Scored(result) => result,
            };

            started.remove(&result.position);
            debug!(
                worker_id = result.worker_id,
                position = result.position,
                waiting = order.waiting();
                "collected chunk"
            );
            order.insert(result.position, result.classes);
            in_flight -= 1;
        }

        let predictions = order.finish();
        info!(rows = predictions.len(); "prediction run finished");
        Ok(predictions)
    }
}

/// Predicts every row of `input` with a one-off pool.
///
/// # Arguments
/// * `input` - The sparse input, one row per sample, bias column last.
/// * `handle` - The published weight matrix.
/// * `metric` - The metric's name, `dot` or `cosine`.
/// * `chunk_size` - Rows per chunk.
/// * `worker_count` - Number of workers.
///
/// # Errors
/// Arguments are validated before any worker starts: `InvalidArgument` for a
/// zero chunk size or worker count, `UnsupportedMetric` for an unknown metric.
pub fn predict(
    input: Arc<CsMat<f64>>,
    handle: &SharedMatrixHandle,
    metric: &str,
    chunk_size: usize,
    worker_count: usize,
) -> Result<Vec<usize>> {
    let config = PredictConfig::new(chunk_size, worker_count, metric)?;
    PoolCoordinator::new(config).predict(input, handle)
}

fn validate(input: &CsMat<f64>, handle: &SharedMatrixHandle) -> Result<()> {
    let (classes, cols) = handle.shape();
    if input.cols() != cols {
        return Err(EngineErr::ShapeMismatch {
            weights: handle.shape(),
            input: input.shape(),
        });
    }

    if classes == 0 && input.rows() > 0 {
        return Err(EngineErr::invalid("weights", "the weight matrix has no classes"));
    }

    Ok(())
}

/// The chunk that has been running the longest, with its start time.
fn oldest(started: &BTreeMap<usize, Instant>) -> Option<(usize, Instant)> {
    started
        .iter()
        .min_by_key(|&(_, at)| *at)
        .map(|(&position, &at)| (position, at))
}

/// Resolves once the longest running chunk outlives `deadline`, never
/// without a deadline or a running chunk.
async fn overdue(oldest: Option<(usize, Instant)>, deadline: Option<Duration>) -> EngineErr {
    match (oldest, deadline) {
        (Some((position, at)), Some(deadline)) => {
            time::sleep_until(at + deadline).await;
            EngineErr::DeadlineExceeded { position, deadline }
        }
        _ => std::future::pending().await,
    }
}

/// Turns a finished worker task into its id, or the error it stopped with.
fn check_exit(joined: std::result::Result<Result<usize>, JoinError>) -> Result<usize> {
    match joined {
        Ok(Ok(worker_id)) => {
            debug!(worker_id = worker_id; "worker retired");
            Ok(worker_id)
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(EngineErr::WorkerPanicked {
            reason: join_reason(e),
        }),
    }
}

/// Waits for every worker to stop once the run is over.
async fn settle(join_set: &mut JoinSet<Result<usize>>) {
    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = check_exit(joined) {
            debug!("worker stopped after the run ended: {e}");
        }
    }
}

/// Waits for every worker and returns why the pool stopped short.
async fn exit_cause(join_set: &mut JoinSet<Result<usize>>) -> EngineErr {
    let mut retired = None;

    while let Some(joined) = join_set.join_next().await {
        match check_exit(joined) {
            Ok(worker_id) => {
                retired.get_or_insert(worker_id);
            }
            Err(e) => return e,
        }
    }

    EngineErr::WorkerLost {
        worker_id: retired.unwrap_or_default(),
    }
}

fn join_reason(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }

    let payload: Box<dyn Any + Send> = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Everything a worker thread owns for the duration of a run.
struct WorkerTask {
    worker_id: usize,
    handle: SharedMatrixHandle,
    input: Arc<CsMat<f64>>,
    metric: Metric,
    queue: Queue,
    ready: mpsc::Sender<usize>,
    reports: mpsc::Sender<Report>,
    cancel: CancellationToken,
    on_chunk: Option<ChunkHook>,
}

impl WorkerTask {
    /// Attaches once, then scores chunks until the queue closes or the run is cancelled.
    fn serve(self) -> Result<usize> {
        let worker = Worker::attach(self.worker_id, &self.handle)?;
        if self.ready.blocking_send(self.worker_id).is_err() {
            return Ok(self.worker_id);
        }

        while !self.cancel.is_cancelled() {
            let next = self.queue.lock().blocking_recv();
            let Some(chunk) = next else {
                break;
            };

            if self.cancel.is_cancelled() {
                break;
            }

            let started = Report::Started {
                position: chunk.position,
                at: Instant::now(),
            };
            if self.reports.blocking_send(started).is_err() {
                break;
            }

            if let Some(hook) = &self.on_chunk {
                hook(self.worker_id, &chunk);
            }

            let classes = worker.predict_until(&self.input, chunk.rows.clone(), self.metric, &self.cancel)?;
            let result = ChunkResult {
                worker_id: self.worker_id,
                position: chunk.position,
                classes,
            };

            if self.reports.blocking_send(Report::Scored(result)).is_err() {
                break;
            }
        }

        Ok(self.worker_id)
    }
}
