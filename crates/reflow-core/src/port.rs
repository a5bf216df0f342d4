//! Ports, signals, and connections.
//!
//! Per the reference design notes, we replace the Input/Output x Data/Exec
//! inheritance lattice with one tagged enum sharing a common header. A port
//! never reaches across nodes by reference: connections name their
//! endpoints by `(NodeId, PortId)` and the driver resolves them against the
//! owning `Flow`'s arena.

use std::collections::VecDeque;

use reflow_util::ids::{NodeId, PortId};

use crate::value::{CheckError, Value, ValueDescriptor};

/// One endpoint of a [`Connection`]: a specific port on a specific node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PortRef {
    /// Owning node.
    pub node: NodeId,
    /// Port within that node.
    pub port: PortId,
}

/// A directed edge from an output port to an input port.
///
/// Equality is structural (§3): two connections with the same
/// `(source, target)` pair are the same connection, regardless of
/// insertion order or identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    /// The `OutputPort` endpoint.
    pub source: PortRef,
    /// The `InputPort` endpoint.
    pub target: PortRef,
}

/// An activation token enqueued on an input port's signal buffer.
#[derive(Debug, Clone)]
pub struct Signal {
    /// Payload, if this came from a data port push. `None` for exec signals
    /// and for data pushes with no value (shouldn't normally happen, but
    /// the buffer doesn't enforce it).
    pub data: Option<Value>,
    /// The output port that produced this signal, if any (used by
    /// `fetch_missing` to find a cache to substitute).
    pub provider: Option<PortRef>,
}

/// Fields shared by every port variant.
#[derive(Debug, Clone)]
pub struct PortHeader {
    /// Port name, unique within its side (input/output) of the owning node.
    pub name: String,
    /// The node this port belongs to.
    pub node: NodeId,
    /// This port's own id.
    pub id: PortId,
    /// Connections this port participates in (as source if output, as
    /// target if input).
    pub connections: Vec<Connection>,
}

impl PortHeader {
    fn new(name: &str, node: &NodeId) -> Self {
        Self {
            name: name.to_string(),
            node: node.clone(),
            id: PortId::new(),
            connections: Vec::new(),
        }
    }

    /// This port's own `(node, port)` reference.
    pub fn port_ref(&self) -> PortRef {
        PortRef {
            node: self.node.clone(),
            port: self.id.clone(),
        }
    }

    /// Add `conn` if no structurally-equal connection is already present
    /// (§8 invariant 7: dedup by equality).
    fn add_connection(&mut self, conn: Connection) {
        if !self.connections.contains(&conn) {
            self.connections.push(conn);
        }
    }

    fn remove_connection(&mut self, conn: &Connection) {
        self.connections.retain(|c| c != conn);
    }
}

/// An input data port: validates and buffers incoming values.
#[derive(Debug, Clone)]
pub struct InputDataPort {
    /// Shared header.
    pub header: PortHeader,
    /// Type/range descriptor for incoming values.
    pub descriptor: ValueDescriptor,
    /// FIFO of pending signals.
    pub signal_buffer: VecDeque<Signal>,
    /// The output port that produced the most recent signal, used by
    /// `fetch_missing` when this port has no pending signal of its own.
    pub last_provider: Option<PortRef>,
}

/// An input exec port: signal-only, no payload.
#[derive(Debug, Clone)]
pub struct InputExecPort {
    /// Shared header.
    pub header: PortHeader,
    /// FIFO of pending (payload-less) signals.
    pub signal_buffer: VecDeque<Signal>,
}

/// An output data port: validates outgoing values and caches the last one.
#[derive(Debug, Clone)]
pub struct OutputDataPort {
    /// Shared header.
    pub header: PortHeader,
    /// Type/range descriptor for outgoing values.
    pub descriptor: ValueDescriptor,
    /// Most recently pushed, validated value. `None` iff never pushed or
    /// explicitly cleared.
    pub cache: Option<Value>,
    /// Whether pushes should update `cache` at all.
    pub save_cache: bool,
}

/// An output exec port: pushes carry no payload.
#[derive(Debug, Clone)]
pub struct OutputExecPort {
    /// Shared header.
    pub header: PortHeader,
}

/// A node's port, as one of four tagged variants.
#[derive(Debug, Clone)]
pub enum Port {
    /// See [`InputDataPort`].
    InputData(InputDataPort),
    /// See [`InputExecPort`].
    InputExec(InputExecPort),
    /// See [`OutputDataPort`].
    OutputData(OutputDataPort),
    /// See [`OutputExecPort`].
    OutputExec(OutputExecPort),
}

impl Port {
    /// Construct an input data port.
    pub fn input_data(name: &str, node: &NodeId, descriptor: ValueDescriptor) -> Self {
        Port::InputData(InputDataPort {
            header: PortHeader::new(name, node),
            descriptor,
            signal_buffer: VecDeque::new(),
            last_provider: None,
        })
    }

    /// Construct an input exec port.
    pub fn input_exec(name: &str, node: &NodeId) -> Self {
        Port::InputExec(InputExecPort {
            header: PortHeader::new(name, node),
            signal_buffer: VecDeque::new(),
        })
    }

    /// Construct an output data port.
    pub fn output_data(name: &str, node: &NodeId, descriptor: ValueDescriptor) -> Self {
        Port::OutputData(OutputDataPort {
            header: PortHeader::new(name, node),
            descriptor,
            cache: None,
            save_cache: true,
        })
    }

    /// Construct an output exec port.
    pub fn output_exec(name: &str, node: &NodeId) -> Self {
        Port::OutputExec(OutputExecPort {
            header: PortHeader::new(name, node),
        })
    }

    /// Shared header, for any variant.
    pub fn header(&self) -> &PortHeader {
        match self {
            Port::InputData(p) => &p.header,
            Port::InputExec(p) => &p.header,
            Port::OutputData(p) => &p.header,
            Port::OutputExec(p) => &p.header,
        }
    }

    /// Mutable shared header, for any variant.
    pub fn header_mut(&mut self) -> &mut PortHeader {
        match self {
            Port::InputData(p) => &mut p.header,
            Port::InputExec(p) => &mut p.header,
            Port::OutputData(p) => &mut p.header,
            Port::OutputExec(p) => &mut p.header,
        }
    }

    /// True for `InputData`/`InputExec`.
    pub fn is_input(&self) -> bool {
        matches!(self, Port::InputData(_) | Port::InputExec(_))
    }

    /// True for `InputData`/`OutputData`.
    pub fn is_data(&self) -> bool {
        matches!(self, Port::InputData(_) | Port::OutputData(_))
    }

    /// Does this input port currently have a pending signal?
    pub fn has_signal(&self) -> bool {
        match self {
            Port::InputData(p) => !p.signal_buffer.is_empty(),
            Port::InputExec(p) => !p.signal_buffer.is_empty(),
            _ => false,
        }
    }

    /// Enqueue a signal on an input port. No-op (but logged) on output ports.
    pub fn put_signal(&mut self, provider: Option<PortRef>, data: Option<Value>) {
        match self {
            Port::InputData(p) => {
                p.last_provider = provider.clone();
                p.signal_buffer.push_back(Signal { data, provider });
            }
            Port::InputExec(p) => {
                p.signal_buffer.push_back(Signal { data: None, provider });
            }
            _ => {}
        }
    }

    /// Pop and return the oldest pending signal, if any.
    pub fn pop_signal(&mut self) -> Option<Signal> {
        match self {
            Port::InputData(p) => p.signal_buffer.pop_front(),
            Port::InputExec(p) => p.signal_buffer.pop_front(),
            _ => None,
        }
    }

    /// Clear all pending signals (§8 invariant 6: firing-mode changes clear
    /// every input buffer).
    pub fn clear_signal_buffer(&mut self) {
        match self {
            Port::InputData(p) => p.signal_buffer.clear(),
            Port::InputExec(p) => p.signal_buffer.clear(),
            _ => {}
        }
    }

    /// Validate `value` against this port's descriptor, if it is a data
    /// port; non-data ports accept anything.
    pub fn check(&self, value: &Value) -> Result<(), CheckError> {
        match self {
            Port::InputData(p) => p.descriptor.check(value),
            Port::OutputData(p) => p.descriptor.check(value),
            _ => Ok(()),
        }
    }

    /// Add a connection to this port's endpoint set (dedup by equality).
    pub fn add_connection(&mut self, conn: Connection) {
        self.header_mut().add_connection(conn);
    }

    /// Remove a matching connection from this port's endpoint set.
    pub fn remove_connection(&mut self, conn: &Connection) {
        self.header_mut().remove_connection(conn);
    }

    /// Is this port free (unconnected)? Used to find a flow's I/O surface.
    pub fn is_free(&self) -> bool {
        self.header().connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_connection_is_deduplicated() {
        let node = NodeId::new();
        let mut port = Port::input_data("a", &node, ValueDescriptor::new("a"));
        let conn = Connection {
            source: PortRef {
                node: NodeId::new(),
                port: PortId::new(),
            },
            target: port.header().port_ref(),
        };
        port.add_connection(conn.clone());
        port.add_connection(conn);
        assert_eq!(port.header().connections.len(), 1);
    }

    #[test]
    fn connect_then_disconnect_restores_prior_state() {
        let node = NodeId::new();
        let mut port = Port::input_data("a", &node, ValueDescriptor::new("a"));
        let before = port.header().connections.clone();
        let conn = Connection {
            source: PortRef {
                node: NodeId::new(),
                port: PortId::new(),
            },
            target: port.header().port_ref(),
        };
        port.add_connection(conn.clone());
        port.remove_connection(&conn);
        assert_eq!(port.header().connections, before);
    }

    #[test]
    fn push_increases_signal_buffer_by_one() {
        let node = NodeId::new();
        let mut port = Port::input_data("a", &node, ValueDescriptor::new("a"));
        assert!(!port.has_signal());
        port.put_signal(None, Some(Value::Int(1)));
        assert!(port.has_signal());
        let sig = port.pop_signal().unwrap();
        assert_eq!(sig.data, Some(Value::Int(1)));
        assert!(!port.has_signal());
    }
}
