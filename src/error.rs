use thiserror::Error;

/// Errors raised while building, editing or loading a procedure.
#[derive(Error, Debug)]
pub enum ProcError {
    #[error("unsupported {what} version {found}")]
    UnsupportedVersion { what: String, found: u32 },
    #[error("unknown node kind '{0}'")]
    UnknownNodeKind(String),
    #[error("link references missing {what} {index}")]
    DanglingLink { what: &'static str, index: usize },
    #[error("cannot connect a {from} output to a {to} input")]
    PortKindMismatch {
        from: crate::eval::port::ValueKind,
        to: crate::eval::port::ValueKind,
    },
    #[error("link from node {from} to node {to} would create a cycle")]
    CycleDetected { from: usize, to: usize },
    #[error("node {0} is not an Output node")]
    NotAnOutput(usize),
    #[error("invalid parameters for {kind}: {message}")]
    InvalidParams { kind: String, message: String },
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single pool task. Returned by task closures.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Procedure(#[from] ProcError),
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::Message(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::Message(message.to_string())
    }
}

/// Errors surfaced by [`crate::pool::WorkerPool`].
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker pool has been finished")]
    Finished,
    #[error("worker pool needs at least one lane")]
    NoLanes,
    #[error("task for index {index} failed: {message}")]
    TaskFailed { index: usize, message: String },
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker thread panicked outside of a task")]
    WorkerPanicked,
    #[error(transparent)]
    Procedure(#[from] ProcError),
}
