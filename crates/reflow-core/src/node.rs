//! Nodes: port collections with a firing rule and a computation to run
//! once that rule is satisfied.

use std::sync::Arc;

use reflow_util::ids::{JobId, NodeId};
use smartstring::{LazyCompact, SmartString};

use crate::port::{Port, PortRef};
use crate::value::Value;

/// `all` fires once every input has a pending signal; `any` fires as soon
/// as any input has a signal, substituting cache/default for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiringMode {
    /// Fire only when every input port has a pending signal.
    All,
    /// Fire as soon as any input port has a pending signal.
    Any,
}

/// Where a `ComputeNode`'s function runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobType {
    /// Inline on the driver thread.
    Local,
    /// A dedicated worker thread, consuming a `max_threads` slot.
    Thread,
    /// A worker subprocess, consuming a `max_processes` slot.
    Process,
    /// Reserved for a distributed executor. Accepted as a valid
    /// discriminant (so invalid-attribute checks behave the same as the
    /// other three), but this crate has no distributed executor backing
    /// it; submitting a job with this job type fails at submission time.
    Dask,
}

/// A node's callable, in one of two shapes depending on where it's allowed
/// to run.
#[derive(Clone)]
pub enum NodeFunc {
    /// Runs in this process (inline or in a spawned thread). Takes one
    /// `Option<Value>` per data input port (in port order) and returns one
    /// `Option<Value>` per data output port.
    InProcess(Arc<dyn Fn(&[Option<Value>]) -> Result<Vec<Option<Value>>, String> + Send + Sync>),
    /// Names a function registered in the process-worker registry
    /// (`crate::process_worker`), required for `JobType::Process`.
    OutOfProcess(SmartString<LazyCompact>),
}

impl std::fmt::Debug for NodeFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeFunc::InProcess(_) => write!(f, "NodeFunc::InProcess(..)"),
            NodeFunc::OutOfProcess(name) => write!(f, "NodeFunc::OutOfProcess({name})"),
        }
    }
}

/// One data input port still awaiting a value at firing time, paired with
/// where to look for a cache substitute.
#[derive(Debug, Clone)]
pub struct PendingSubstitution {
    /// Position in the resolved argument vector this slot fills.
    pub arg_index: usize,
    /// The upstream output port to read a cache from, if the input port
    /// has received at least one signal from a connection.
    pub provider: Option<PortRef>,
}

/// The result of a node firing: a partially-resolved argument vector, plus
/// the positions that still need a cross-node cache lookup.
#[derive(Debug)]
pub struct FiringOutcome {
    /// One entry per data input port, in port order. `None` at indices
    /// listed in `pending`.
    pub args: Vec<Option<Value>>,
    /// Data input ports that had no pending signal and no local default;
    /// the driver must resolve these against the provider's output cache.
    pub pending: Vec<PendingSubstitution>,
}

/// A node: a fixed set of ports, a firing rule, and a function to run once
/// fired. The reference design separates an abstract `Node` from a
/// `ComputeNode` subclass that adds the function/job-type; every node this
/// crate constructs is runnable, so the two collapse into one struct here.
#[derive(Debug, Clone)]
pub struct Node {
    /// This node's id, stable for its lifetime in the owning flow.
    pub id: NodeId,
    /// Display name, used for `"node.port"` qualification.
    pub name: String,
    /// Input ports, in declaration order.
    pub input_ports: Vec<Port>,
    /// Output ports, in declaration order.
    pub output_ports: Vec<Port>,
    /// Current firing mode.
    pub firing_mode: FiringMode,
    /// Where the function runs.
    pub job_type: JobType,
    /// The function itself.
    pub func: NodeFunc,
    /// Ids of jobs submitted for this node, most recent last.
    pub jobs: Vec<JobId>,
}

impl Node {
    /// Construct a node. `input_ports`/`output_ports` must already carry
    /// this node's id in their header (built via `Port::input_data(..)` etc
    /// with that id).
    pub fn new(
        id: NodeId,
        name: &str,
        input_ports: Vec<Port>,
        output_ports: Vec<Port>,
        firing_mode: FiringMode,
        job_type: JobType,
        func: NodeFunc,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            input_ports,
            output_ports,
            firing_mode,
            job_type,
            func,
            jobs: Vec::new(),
        }
    }

    /// Indices of data (non-exec) input ports, in port order.
    pub(crate) fn data_input_indices(&self) -> Vec<usize> {
        self.input_ports
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_data())
            .map(|(i, _)| i)
            .collect()
    }

    /// Look up a port index by name on whichever side has it.
    pub fn port_index(&self, name: &str) -> Option<(bool, usize)> {
        if let Some(i) = self.input_ports.iter().position(|p| p.header().name == name) {
            return Some((true, i));
        }
        if let Some(i) = self.output_ports.iter().position(|p| p.header().name == name) {
            return Some((false, i));
        }
        None
    }

    /// Setting the firing mode clears every input signal buffer (§8
    /// invariant 6): a stale mix of signals queued under the old mode must
    /// not leak into the new one.
    pub fn set_firing_mode(&mut self, mode: FiringMode) {
        self.firing_mode = mode;
        for p in &mut self.input_ports {
            p.clear_signal_buffer();
        }
    }

    /// Decide whether this node should fire right now, and if so, consume
    /// the signals the firing rule calls for. Returns `None` if the rule
    /// is not satisfied.
    pub fn try_fire(&mut self) -> Option<FiringOutcome> {
        let satisfied = match self.firing_mode {
            FiringMode::All => self.input_ports.iter().all(|p| p.has_signal()),
            FiringMode::Any => self.input_ports.iter().any(|p| p.has_signal()),
        };
        if !satisfied {
            return None;
        }

        let data_indices = self.data_input_indices();
        let mut args: Vec<Option<Value>> = vec![None; data_indices.len()];
        let mut pending = Vec::new();

        for (arg_index, &port_idx) in data_indices.iter().enumerate() {
            let port = &mut self.input_ports[port_idx];
            if port.has_signal() {
                let signal = port.pop_signal().expect("has_signal just returned true");
                args[arg_index] = signal.data;
            } else {
                // `any` mode only: substitute. `all` mode can't reach here
                // since every port is guaranteed to have a signal.
                let Port::InputData(data_port) = port else {
                    unreachable!("data_input_indices only returns InputData ports")
                };
                if let Some(default) = &data_port.descriptor.default {
                    args[arg_index] = Some(default.clone());
                } else {
                    pending.push(PendingSubstitution {
                        arg_index,
                        provider: data_port.last_provider.clone(),
                    });
                }
            }
        }

        // Exec input ports still need their (payload-less) signal consumed,
        // even though they don't contribute an argument.
        for port in &mut self.input_ports {
            if let Port::InputExec(_) = port {
                if port.has_signal() {
                    port.pop_signal();
                }
            }
        }

        Some(FiringOutcome { args, pending })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueDescriptor;

    fn add_node() -> Node {
        let id = NodeId::new();
        let a = Port::input_data("a", &id, ValueDescriptor::new("a"));
        let b = Port::input_data("b", &id, ValueDescriptor::new("b"));
        let o = Port::output_data("out", &id, ValueDescriptor::new("out"));
        let func = NodeFunc::InProcess(Arc::new(|args: &[Option<Value>]| {
            let (Some(Value::Int(a)), Some(Value::Int(b))) = (&args[0], &args[1]) else {
                return Err("expected two ints".to_string());
            };
            Ok(vec![Some(Value::Int(a + b))])
        }));
        Node::new(id, "add", vec![a, b], vec![o], FiringMode::All, JobType::Local, func)
    }

    #[test]
    fn all_mode_requires_every_input() {
        let mut node = add_node();
        node.input_ports[0].put_signal(None, Some(Value::Int(1)));
        assert!(node.try_fire().is_none());
        node.input_ports[1].put_signal(None, Some(Value::Int(2)));
        let outcome = node.try_fire().unwrap();
        assert_eq!(outcome.args, vec![Some(Value::Int(1)), Some(Value::Int(2))]);
    }

    #[test]
    fn changing_firing_mode_clears_buffers() {
        let mut node = add_node();
        node.input_ports[0].put_signal(None, Some(Value::Int(1)));
        node.set_firing_mode(FiringMode::Any);
        assert!(!node.input_ports[0].has_signal());
    }
}
