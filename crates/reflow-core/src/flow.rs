//! `Flow`: an owning arena of nodes and the connections between them.
//!
//! Per the arena+index design note (§9), a `Flow` is the sole owner of its
//! `Node`s; everything else (ports, connections) lives inside a node or is
//! addressed by id. This keeps the node/port/connection/flow reference
//! cycle out of Rust's ownership graph entirely — cross-references are
//! plain data (`NodeId`, `PortRef`), resolved back through the flow's
//! `HashMap` index when needed, the same trick the reference stack's
//! arena-based `Graph` uses to sidestep `petgraph`.

use std::collections::HashMap;

use reflow_util::ids::{FlowId, NodeId, SessionId};

use crate::errors::FlowError;
use crate::node::Node;
use crate::port::{Connection, Port, PortRef};
use crate::value::Value;

/// An owning container of nodes and the connections between their ports.
pub struct Flow {
    /// This flow's id.
    pub id: FlowId,
    /// Display name.
    pub name: String,
    /// The session that owns this flow.
    pub session: SessionId,
    nodes: HashMap<NodeId, Node>,
    insertion_order: Vec<NodeId>,
    connections: Vec<Connection>,
}

impl Flow {
    /// Construct an empty flow owned by `session`.
    pub fn new(name: &str, session: SessionId) -> Self {
        Self {
            id: FlowId::new(),
            name: name.to_string(),
            session,
            nodes: HashMap::new(),
            insertion_order: Vec::new(),
            connections: Vec::new(),
        }
    }

    /// Add a node to this flow (§4.6 `add_obj`). Idempotent on the node's
    /// id.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id.clone();
        if !self.nodes.contains_key(&id) {
            self.insertion_order.push(id.clone());
        }
        self.nodes.insert(id.clone(), node);
        id
    }

    /// Remove a node and every connection touching it (§4.6 `remove_obj`:
    /// removing a node cascades to its connections).
    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        self.insertion_order.retain(|n| n != id);
        self.connections.retain(|c| c.source.node != *id && c.target.node != *id);
        for other in self.nodes.values_mut() {
            for port in other.input_ports.iter_mut().chain(other.output_ports.iter_mut()) {
                port.header_mut().connections.retain(|c| c.source.node != *id && c.target.node != *id);
            }
        }
        Some(node)
    }

    /// Borrow a node.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Mutably borrow a node.
    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// Find a node by name (first match in insertion order).
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .find(|n| n.name == name)
    }

    /// All node ids, in insertion order.
    pub fn node_ids(&self) -> &[NodeId] {
        &self.insertion_order
    }

    /// All connections currently in this flow.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Connect an output port to an input port (§4.1 `connect_with`).
    /// Duplicate-by-equality is a no-op (§8 invariant 7).
    pub fn connect(&mut self, source: PortRef, target: PortRef) -> Result<(), FlowError> {
        let conn = Connection {
            source: source.clone(),
            target: target.clone(),
        };
        {
            let source_node = self
                .nodes
                .get_mut(&source.node)
                .ok_or_else(|| FlowError::UnknownNode(source.node.clone()))?;
            let port = find_port_mut(source_node, source.port.clone())
                .ok_or_else(|| FlowError::UnknownPort(source.port.to_string()))?;
            port.add_connection(conn.clone());
        }
        {
            let target_node = self
                .nodes
                .get_mut(&target.node)
                .ok_or_else(|| FlowError::UnknownNode(target.node.clone()))?;
            let port = find_port_mut(target_node, target.port.clone())
                .ok_or_else(|| FlowError::UnknownPort(target.port.to_string()))?;
            port.add_connection(conn.clone());
        }
        if !self.connections.contains(&conn) {
            self.connections.push(conn);
        }
        Ok(())
    }

    /// Remove a connection from both endpoints.
    pub fn disconnect(&mut self, source: PortRef, target: PortRef) -> Result<(), FlowError> {
        let conn = Connection {
            source: source.clone(),
            target: target.clone(),
        };
        if let Some(node) = self.nodes.get_mut(&source.node) {
            if let Some(port) = find_port_mut(node, source.port.clone()) {
                port.remove_connection(&conn);
            }
        }
        if let Some(node) = self.nodes.get_mut(&target.node) {
            if let Some(port) = find_port_mut(node, target.port.clone()) {
                port.remove_connection(&conn);
            }
        }
        self.connections.retain(|c| *c != conn);
        Ok(())
    }

    /// Free (unconnected) input ports across every node, as
    /// `(node_id, port_name)` pairs — the flow's input surface.
    pub fn free_input_ports(&self) -> Vec<PortRef> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .flat_map(|n| n.input_ports.iter().filter(|p| p.is_free()).map(|p| p.header().port_ref()))
            .collect()
    }

    /// Free (unconnected) output ports across every node — the flow's
    /// output surface.
    pub fn free_output_ports(&self) -> Vec<PortRef> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .flat_map(|n| n.output_ports.iter().filter(|p| p.is_free()).map(|p| p.header().port_ref()))
            .collect()
    }

    /// Write a job's resolved outputs into a node's output ports and push
    /// them downstream, returning the set of downstream nodes that
    /// received a signal and should be re-checked for firing.
    pub fn set_outputs(&mut self, node_id: NodeId, values: Vec<Option<Value>>) -> Result<Vec<NodeId>, FlowError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or_else(|| FlowError::UnknownNode(node_id.clone()))?;
        let data_out_indices: Vec<usize> = node
            .output_ports
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_data())
            .map(|(i, _)| i)
            .collect();
        let exec_out_indices: Vec<usize> = node
            .output_ports
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_data())
            .map(|(i, _)| i)
            .collect();

        let mut pushes: Vec<(usize, Option<Value>)> = Vec::new();
        for (slot, idx) in data_out_indices.iter().enumerate() {
            pushes.push((*idx, values.get(slot).cloned().flatten()));
        }
        for idx in exec_out_indices {
            pushes.push((idx, None));
        }
        pushes.sort_by_key(|(idx, _)| *idx);

        let mut touched = Vec::new();
        for (idx, value) in pushes {
            touched.extend(self.push_output(&node_id, idx, value)?);
        }
        Ok(touched)
    }

    /// The propagation protocol (§4.1 `OutputPort.push`): validate, cache,
    /// then enqueue a signal on every connected input port.
    fn push_output(&mut self, node_id: &NodeId, port_idx: usize, value: Option<Value>) -> Result<Vec<NodeId>, FlowError> {
        let conns = {
            let node = self
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| FlowError::UnknownNode(node_id.clone()))?;
            let port = &mut node.output_ports[port_idx];
            if let (Port::OutputData(p), Some(v)) = (&mut *port, &value) {
                p.descriptor.check(v)?;
                if p.save_cache {
                    p.cache = Some(v.clone());
                }
            }
            port.header().connections.clone()
        };

        let source_ref = self.nodes[node_id].output_ports[port_idx].header().port_ref();
        let mut touched = Vec::new();
        for conn in conns {
            if let Some(target_node) = self.nodes.get_mut(&conn.target.node) {
                if let Some(port) = find_port_mut(target_node, conn.target.port) {
                    port.put_signal(Some(source_ref.clone()), value.clone());
                    touched.push(conn.target.node);
                }
            }
        }
        Ok(touched)
    }

    /// Look up the output cache a `fetch_missing` substitution needs.
    pub fn output_cache(&self, port: &PortRef) -> Option<Value> {
        let node = self.nodes.get(&port.node)?;
        let p = node.output_ports.iter().find(|p| p.header().id == port.port)?;
        match p {
            Port::OutputData(d) => d.cache.clone(),
            _ => None,
        }
    }

    /// Deep-copy this flow's node set (preserving per-node settings), then
    /// rewire connections by port index (§4.6 `copy()`).
    pub fn copy(&self, new_session: SessionId) -> Flow {
        let mut new_flow = Flow::new(&self.name, new_session);
        let mut old_to_new: HashMap<NodeId, NodeId> = HashMap::new();
        // Index-position map so we can rewire by port *index*, not id,
        // matching the reference behavior of re-indexing rather than
        // copying raw ids across flows.
        let mut port_index_of: HashMap<PortRef, (bool, usize)> = HashMap::new();

        for old_id in self.insertion_order.clone() {
            let old_node = &self.nodes[&old_id];
            for (i, p) in old_node.input_ports.iter().enumerate() {
                port_index_of.insert(p.header().port_ref(), (true, i));
            }
            for (i, p) in old_node.output_ports.iter().enumerate() {
                port_index_of.insert(p.header().port_ref(), (false, i));
            }

            let mut cloned = old_node.clone();
            let new_id = NodeId::new();
            cloned.id = new_id.clone();
            for p in cloned.input_ports.iter_mut().chain(cloned.output_ports.iter_mut()) {
                p.header_mut().node = new_id.clone();
                p.header_mut().connections.clear();
            }
            old_to_new.insert(old_id, new_id);
            new_flow.add_node(cloned);
        }

        for conn in &self.connections {
            let Some((_, source_idx)) = port_index_of.get(&conn.source) else { continue };
            let Some((_, target_idx)) = port_index_of.get(&conn.target) else { continue };
            let Some(new_source_node) = old_to_new.get(&conn.source.node).cloned() else { continue };
            let Some(new_target_node) = old_to_new.get(&conn.target.node).cloned() else { continue };
            let new_source_port = new_flow.nodes[&new_source_node].output_ports[*source_idx].header().port_ref();
            let new_target_port = new_flow.nodes[&new_target_node].input_ports[*target_idx].header().port_ref();
            let _ = new_flow.connect(new_source_port, new_target_port);
        }

        new_flow
    }
}

fn find_port_mut(node: &mut Node, port: reflow_util::ids::PortId) -> Option<&mut Port> {
    node.input_ports
        .iter_mut()
        .chain(node.output_ports.iter_mut())
        .find(|p| p.header().id == port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FiringMode, JobType, NodeFunc};
    use crate::value::ValueDescriptor;
    use std::sync::Arc;

    fn inc_node(flow: &mut Flow) -> NodeId {
        let id = NodeId::new();
        let a = Port::input_data("a", &id, ValueDescriptor::new("a"));
        let o = Port::output_data("out", &id, ValueDescriptor::new("out"));
        let func = NodeFunc::InProcess(Arc::new(|args: &[Option<Value>]| {
            let Some(Value::Int(a)) = &args[0] else {
                return Err("expected int".to_string());
            };
            Ok(vec![Some(Value::Int(a + 1))])
        }));
        flow.add_node(Node::new(id, "inc", vec![a], vec![o], FiringMode::All, JobType::Local, func))
    }

    #[test]
    fn connect_then_disconnect_restores_free_ports() {
        let mut flow = Flow::new("f", SessionId::new());
        let n1 = inc_node(&mut flow);
        let n2 = inc_node(&mut flow);
        let before = flow.free_input_ports().len() + flow.free_output_ports().len();

        let src = flow.node(&n1).unwrap().output_ports[0].header().port_ref();
        let dst = flow.node(&n2).unwrap().input_ports[0].header().port_ref();
        flow.connect(src.clone(), dst.clone()).unwrap();
        flow.disconnect(src, dst).unwrap();

        let after = flow.free_input_ports().len() + flow.free_output_ports().len();
        assert_eq!(before, after);
    }

    #[test]
    fn removing_a_node_cascades_to_its_connections() {
        let mut flow = Flow::new("f", SessionId::new());
        let n1 = inc_node(&mut flow);
        let n2 = inc_node(&mut flow);
        let src = flow.node(&n1).unwrap().output_ports[0].header().port_ref();
        let dst = flow.node(&n2).unwrap().input_ports[0].header().port_ref();
        flow.connect(src, dst).unwrap();
        assert_eq!(flow.connections().len(), 1);
        flow.remove_node(&n1);
        assert_eq!(flow.connections().len(), 0);
    }
}
