use std::{error::Error, fmt, io, path::PathBuf, time::Duration};

/// The engine's result type.
pub type Result<T> = std::result::Result<T, EngineErr>;

/// Every way a prediction run can fail. All of them are fatal to the run.
#[derive(Debug)]
pub enum EngineErr {
    Io(io::Error),
    Config(serde_json::Error),
    /// The element type isn't one the shared region knows how to lay out.
    UnsupportedType {
        dtype: String,
    },
    InvalidArgument {
        name: &'static str,
        reason: String,
    },
    /// A worker couldn't bind to the shared weight region.
    Attach {
        path: PathBuf,
        reason: String,
    },
    UnsupportedMetric {
        metric: String,
    },
    ShapeMismatch {
        weights: (usize, usize),
        input: (usize, usize),
    },
    WorkerLost {
        worker_id: usize,
    },
    WorkerPanicked {
        reason: String,
    },
    DeadlineExceeded {
        position: usize,
        deadline: Duration,
    },
    /// The run was cancelled while a worker was still scoring.
    Cancelled {
        row: usize,
    },
}

impl EngineErr {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub(crate) fn attach(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Self::Attach {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for EngineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Config(e) => write!(f, "invalid config: {e}"),
            Self::UnsupportedType { dtype } => {
                write!(f, "unsupported element type {dtype}, expected float64 or int32")
            }
            Self::InvalidArgument { name, reason } => {
                write!(f, "invalid argument {name}: {reason}")
            }
            Self::Attach { path, reason } => {
                write!(f, "failed to attach to {}: {reason}", path.display())
            }
            Self::UnsupportedMetric { metric } => write!(f, "unsupported metric {metric:?}"),
            Self::ShapeMismatch { weights, input } => write!(
                f,
                "weights are {}x{} but the input is {}x{}, column counts must match",
                weights.0, weights.1, input.0, input.1
            ),
            Self::WorkerLost { worker_id } => {
                write!(f, "worker {worker_id} stopped before the run finished")
            }
            Self::WorkerPanicked { reason } => write!(f, "worker panicked: {reason}"),
            Self::DeadlineExceeded { position, deadline } => write!(
                f,
                "chunk {position} ran past its {}ms deadline",
                deadline.as_millis()
            ),
            Self::Cancelled { row } => write!(f, "run cancelled before row {row} was scored"),
        }
    }
}

impl Error for EngineErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for EngineErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<EngineErr> for io::Error {
    fn from(value: EngineErr) -> Self {
        match value {
            EngineErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
