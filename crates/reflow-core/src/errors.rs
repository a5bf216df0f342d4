//! Crate-wide error taxonomy (§7).
//!
//! One enum per fallible subsystem, each with a hand-rolled `Display` and
//! `Error` impl rather than a derive macro, matching the reference stack's
//! dominant style even where `thiserror` is available.

use reflow_util::ids::{FlowId, JobId, NodeId};

use crate::job::JobEmitError;
use crate::node::JobType;
use crate::value::CheckError;

/// Errors raised by the engine's job lifecycle and scheduling.
#[derive(Debug)]
pub enum EngineError {
    /// A job was submitted with a job type this engine has no executor
    /// for (currently, `JobType::Dask`).
    UnsupportedJobType(JobType),
    /// Spawning a worker subprocess failed.
    ProcessSpawnFailed(std::io::Error),
    /// Referenced a job id the engine has no record of.
    JobNotFound(JobId),
    /// `emit()` was called on a running job.
    Emit(JobEmitError),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnsupportedJobType(t) => write!(f, "no executor registered for job type {t:?}"),
            EngineError::ProcessSpawnFailed(_) => write!(f, "failed to spawn worker process"),
            EngineError::JobNotFound(id) => write!(f, "no such job: {id}"),
            EngineError::Emit(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::ProcessSpawnFailed(e) => Some(e),
            EngineError::Emit(e) => Some(e),
            _ => None,
        }
    }
}

impl From<JobEmitError> for EngineError {
    fn from(value: JobEmitError) -> Self {
        EngineError::Emit(value)
    }
}

/// Errors raised while building or invoking a `Flow`.
#[derive(Debug)]
pub enum FlowError {
    /// `flow(inputs)` was missing a value for a free input port, keyed
    /// either by bare port name or `"node.port"`.
    MissingFreeInput(String),
    /// A pushed or supplied value failed its port's descriptor.
    Check(CheckError),
    /// Referenced a node id this flow has no record of.
    UnknownNode(NodeId),
    /// Referenced a port name this flow could not resolve.
    UnknownPort(String),
    /// Referenced a flow id this session has no record of.
    UnknownFlow(FlowId),
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowError::MissingFreeInput(key) => {
                write!(f, "missing value for free input '{key}'")
            }
            FlowError::Check(_) => write!(f, "value failed port validation"),
            FlowError::UnknownNode(id) => write!(f, "no such node: {id}"),
            FlowError::UnknownPort(name) => write!(f, "no such port: '{name}'"),
            FlowError::UnknownFlow(id) => write!(f, "no such flow: {id}"),
        }
    }
}

impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FlowError::Check(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CheckError> for FlowError {
    fn from(value: CheckError) -> Self {
        FlowError::Check(value)
    }
}
