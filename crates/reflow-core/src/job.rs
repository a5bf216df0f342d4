//! Job status, the job-emit error, and the three ways a job's function can
//! be run (local / thread / process).

use std::sync::Arc;

use reflow_util::ids::JobId;
use smartstring::{LazyCompact, SmartString};

use crate::value::Value;

/// `pending -> running -> {done, failed, canceled}`, with a terminal job
/// re-emittable back to `running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Submitted, waiting for the engine to have a free resource slot.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
    /// Cancelled mid-flight.
    Canceled,
}

impl JobStatus {
    /// Is this a terminal status (`done`, `failed`, or `canceled`)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Canceled)
    }
}

/// Raised when `emit()` is called on a job that is currently `running`
/// (§4.4: `emit` is valid from any of pending/done/failed/canceled).
#[derive(Debug, Clone)]
pub struct JobEmitError {
    /// The job that could not be re-emitted.
    pub job: JobId,
}

impl std::fmt::Display for JobEmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job {} is already running", self.job)
    }
}
impl std::error::Error for JobEmitError {}

/// What a job produces on success: one `Option<Value>` per output slot
/// (positionally matched to the node's output ports by the caller).
pub type JobOutput = Vec<Option<Value>>;

/// What a job's execution reports back to the engine.
pub type JobOutcome = Result<JobOutput, String>;

/// A function a job runs, plus enough context for the engine to pick an
/// execution strategy.
///
/// Bodies are `Fn`, not `FnOnce`: `emit()` re-runs a terminal job by
/// invoking the same body again, so the engine never consumes it.
#[derive(Clone)]
pub enum JobBody {
    /// Runs inline on the driver thread; no resource accounting.
    Local(Arc<dyn Fn() -> JobOutcome + Send + Sync>),
    /// Runs on a dedicated worker thread; consumes a `max_threads` slot.
    Thread(Arc<dyn Fn() -> JobOutcome + Send + Sync>),
    /// Runs in a worker subprocess, looked up by name in
    /// `crate::process_worker`'s registry; consumes a `max_processes` slot.
    Process {
        /// Registered function name.
        func_name: SmartString<LazyCompact>,
        /// JSON-encodable argument vector passed to the worker.
        args: Vec<Option<Value>>,
    },
}

impl std::fmt::Debug for JobBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobBody::Local(_) => write!(f, "JobBody::Local(..)"),
            JobBody::Thread(_) => write!(f, "JobBody::Thread(..)"),
            JobBody::Process { func_name, .. } => {
                write!(f, "JobBody::Process({func_name})")
            }
        }
    }
}
