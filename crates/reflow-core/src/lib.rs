//! A reactive dataflow execution kernel: typed ports, firing-rule nodes,
//! a resource-limited job engine, and the flow/session layers that drive
//! them.

#![warn(missing_docs)]

pub mod engine;
pub mod errors;
pub mod flow;
pub mod job;
pub mod node;
pub mod port;
pub mod process_worker;
pub mod session;
pub mod value;

pub mod dsl;

pub use engine::{Engine, EngineConfig};
pub use errors::{EngineError, FlowError};
pub use flow::Flow;
pub use job::{JobBody, JobOutcome, JobStatus};
pub use node::{FiringMode, JobType, Node, NodeFunc};
pub use port::{Connection, Port, PortRef};
pub use session::{current_session, Session, SessionGuard};
pub use value::{CheckError, TypeTag, Value, ValueDescriptor};
