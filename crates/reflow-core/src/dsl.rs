//! The `>>` wiring DSL (§6): lightweight handles that resolve against the
//! ambient current session, so graph construction reads like
//! `sq1 >> add.input(0)` instead of threading a `&mut Session` everywhere.
//!
//! `node.I`/`node.O` and `node[name]` from the reference syntax become
//! methods here (`NodeHandle::inputs`/`outputs`/`port`) rather than
//! literal indexing: Rust's `Index` trait must return a borrow of
//! something already owned by `self`, and a `PortHandle` is a freshly
//! synthesized value, not a borrow into the node.

use std::collections::HashMap;
use std::ops::Shr;

use reflow_util::ids::{FlowId, NodeId, PortId};

use crate::errors::FlowError;
use crate::node::Node;
use crate::port::PortRef;
use crate::session::current_session;
use crate::value::Value;

/// A node, addressed through the ambient current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    /// The flow this node lives in.
    pub flow: FlowId,
    /// This node's id within that flow.
    pub node: NodeId,
}

/// A single port on a node, addressed through the ambient current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortHandle {
    /// The flow the owning node lives in.
    pub flow: FlowId,
    /// The owning node.
    pub node: NodeId,
    /// This port's id.
    pub port: PortId,
    /// True for an input port, false for an output port.
    pub is_input: bool,
}

impl PortHandle {
    fn port_ref(&self) -> PortRef {
        PortRef {
            node: self.node.clone(),
            port: self.port.clone(),
        }
    }
}

impl NodeHandle {
    /// Add `node` to `flow_id` in the current session, returning a handle
    /// to it.
    pub fn add(flow_id: FlowId, node: Node) -> Self {
        let session = current_session();
        let mut session = session.borrow_mut();
        let flow = session.flow_mut(&flow_id).expect("flow belongs to the current session");
        let node_id = flow.add_node(node);
        NodeHandle { flow: flow_id, node: node_id }
    }

    /// `node.I`: every input port, in port order.
    pub fn inputs(&self) -> Vec<PortHandle> {
        self.ports(true)
    }

    /// `node.O`: every output port, in port order.
    pub fn outputs(&self) -> Vec<PortHandle> {
        self.ports(false)
    }

    fn ports(&self, inputs: bool) -> Vec<PortHandle> {
        let session = current_session();
        let session = session.borrow();
        let Some(flow) = session.flow(&self.flow) else { return Vec::new() };
        let Some(node) = flow.node(&self.node) else { return Vec::new() };
        let side = if inputs { &node.input_ports } else { &node.output_ports };
        side.iter()
            .map(|p| PortHandle {
                flow: self.flow.clone(),
                node: self.node.clone(),
                port: p.header().id.clone(),
                is_input: inputs,
            })
            .collect()
    }

    /// Shorthand for `self.inputs()[idx]`.
    pub fn input(&self, idx: usize) -> PortHandle {
        self.inputs().remove(idx)
    }

    /// Shorthand for `self.outputs()[idx]`.
    pub fn output(&self, idx: usize) -> PortHandle {
        self.outputs().remove(idx)
    }

    /// `node[name]`: look up a port on either side by name.
    pub fn port(&self, name: &str) -> Option<PortHandle> {
        let session = current_session();
        let session = session.borrow();
        let flow = session.flow(&self.flow)?;
        let node = flow.node(&self.node)?;
        let (is_input, idx) = node.port_index(name)?;
        let side = if is_input { &node.input_ports } else { &node.output_ports };
        Some(PortHandle {
            flow: self.flow.clone(),
            node: self.node.clone(),
            port: side[idx].header().id.clone(),
            is_input,
        })
    }

    /// Call this node with positional and named data-input arguments (§6
    /// `node(pos_args.., named=..)`).
    pub fn call(&self, positional: &[Value], named: &HashMap<String, Value>) -> Result<(), FlowError> {
        let session = current_session();
        let mut session = session.borrow_mut();
        session.call_node(&self.flow, &self.node, positional, named)
    }

    /// Call this node with only positional arguments.
    pub fn call_pos(&self, positional: &[Value]) -> Result<(), FlowError> {
        self.call(positional, &HashMap::new())
    }
}

/// `outputPort >> inputPort` (§6): connect the two in the current session.
impl Shr<PortHandle> for PortHandle {
    type Output = PortHandle;

    fn shr(self, target: PortHandle) -> PortHandle {
        let session = current_session();
        let mut session = session.borrow_mut();
        let flow = session
            .flow_mut(&self.flow)
            .expect("both ports belong to the current session");
        flow.connect(self.port_ref(), target.port_ref())
            .expect("connect_with should only fail on a bad port ref");
        target
    }
}

/// `nodeA >> nodeB` (§6): connect `nodeA`'s first output to `nodeB`'s first
/// input and return `nodeB`, so chains like `i0 >> i1 >> i2` read linearly.
impl Shr<NodeHandle> for NodeHandle {
    type Output = NodeHandle;

    fn shr(self, target: NodeHandle) -> NodeHandle {
        let source_port = self.output(0);
        let target_port = target.input(0);
        let _ = source_port >> target_port;
        target
    }
}
