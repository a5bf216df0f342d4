//! `Session`: owner of a flow set and one engine, and the driver that turns
//! job completions back into port pushes and further activation.
//!
//! The reference design keeps this orchestration on `Flow` itself, relying
//! on a language-level global "current session". In Rust, a `Flow` cannot
//! borrow both its sibling nodes' ports and an `Engine` mutably at once
//! without `Rc<RefCell<_>>` soup spreading through every type in the
//! crate, so the driver loop lives here instead, where `Engine` and every
//! `Flow` are siblings under one owner. This is the deviation the design
//! notes explicitly anticipate (§9: "implementations in a language without
//! truly global singletons should accept an explicit session/flow
//! parameter as the primary API").

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use reflow_util::ids::{FlowId, JobId, NodeId, SessionId};
use tracing::info;

use crate::engine::{Engine, EngineConfig};
use crate::errors::{EngineError, FlowError};
use crate::flow::Flow;
use crate::job::{JobBody, JobStatus};
use crate::node::JobType;
use crate::value::Value;

/// Owner of a flow set and one job-execution engine; the root of the
/// ambient "current session/flow" context.
pub struct Session {
    id: SessionId,
    engine: Engine,
    flows: HashMap<FlowId, Flow>,
    flow_order: Vec<FlowId>,
    current_flow: Option<FlowId>,
    /// Which `(flow, node)` a submitted job belongs to, so a completion
    /// event can be routed back to the right output ports.
    job_owner: HashMap<JobId, (FlowId, NodeId)>,
}

impl Session {
    /// Create a new session with the given engine configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            id: SessionId::new(),
            engine: Engine::new(config),
            flows: HashMap::new(),
            flow_order: Vec::new(),
            current_flow: None,
            job_owner: HashMap::new(),
        }
    }

    /// This session's id.
    pub fn id(&self) -> SessionId {
        self.id.clone()
    }

    /// Direct access to the engine (resource counters, job status), for
    /// callers that want to inspect scheduler state.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The flow lazily created (or previously selected) as current.
    pub fn current_flow(&mut self) -> FlowId {
        if let Some(id) = &self.current_flow {
            return id.clone();
        }
        let flow = Flow::new("default", self.id.clone());
        let id = flow.id.clone();
        self.add_flow(flow);
        self.current_flow = Some(id.clone());
        id
    }

    /// Add a flow to this session, returning its id.
    pub fn add_flow(&mut self, flow: Flow) -> FlowId {
        let id = flow.id.clone();
        self.flow_order.push(id.clone());
        self.flows.insert(id.clone(), flow);
        id
    }

    /// Make `id` the current flow. No-op if `id` is not owned by this
    /// session.
    pub fn set_current_flow(&mut self, id: FlowId) {
        if self.flows.contains_key(&id) {
            self.current_flow = Some(id);
        }
    }

    /// Borrow a flow.
    pub fn flow(&self, id: &FlowId) -> Option<&Flow> {
        self.flows.get(id)
    }

    /// Mutably borrow a flow.
    pub fn flow_mut(&mut self, id: &FlowId) -> Option<&mut Flow> {
        self.flows.get_mut(id)
    }

    /// Attempt to fire a node: if its firing rule is satisfied, consume the
    /// relevant input signals, resolve any `any`-mode cache substitutions,
    /// and submit a job. No-op if the rule isn't satisfied yet.
    pub fn try_fire(&mut self, flow_id: &FlowId, node_id: &NodeId) {
        self.try_fire_no_pump(flow_id, node_id);
        self.pump();
    }

    /// Drain every currently-available job completion and propagate its
    /// effects (cache write + downstream signal + re-fire) until no more
    /// completions are immediately available. Local jobs finish
    /// synchronously inside `try_fire`/`submit`, so a single `pump` call
    /// after a burst of activity settles the synchronous part of the
    /// graph; `Thread`/`Process` jobs still need `join`/`wait` to let real
    /// time pass.
    fn pump(&mut self) {
        loop {
            let events = self.engine.poll();
            if events.is_empty() {
                break;
            }
            for (job_id, outcome) in events {
                // Keep the owner mapping after a terminal completion: `emit`
                // re-runs the same job id, and its later completion needs
                // to find the same `(flow, node)` to write outputs into.
                let Some((flow_id, node_id)) = self.job_owner.get(&job_id).cloned() else { continue };
                match outcome {
                    Ok(values) => {
                        let touched = self
                            .flows
                            .get_mut(&flow_id)
                            .and_then(|f| f.set_outputs(node_id, values).ok())
                            .unwrap_or_default();
                        for t in touched {
                            self.try_fire_no_pump(&flow_id, &t);
                        }
                    }
                    Err(message) => {
                        tracing::warn!(job_id = %job_id, error = %message, "node job failed");
                    }
                }
            }
        }
    }

    /// Re-run a terminal (or still-pending) job's body (§3/§8
    /// re-emission), routing its eventual completion back into the same
    /// `(flow, node)` output ports it originally wrote to.
    pub fn emit(&mut self, job_id: &JobId) -> Result<(), EngineError> {
        self.engine.emit(job_id.clone())?;
        self.pump();
        Ok(())
    }

    /// A job is still live if the engine hasn't reached a terminal status
    /// for it. `job_owner` itself no longer tells us this: it keeps every
    /// job's `(flow, node)` mapping around so a later `emit` can still be
    /// routed, even well after the job first went terminal.
    fn job_is_live(&self, id: &JobId) -> bool {
        matches!(
            self.engine.job_info(id.clone()).map(|info| info.status),
            Some(JobStatus::Pending) | Some(JobStatus::Running)
        )
    }

    /// Same as `try_fire`, but doesn't recursively pump (used from inside
    /// `pump` itself, which already loops, and by `try_fire` itself).
    fn try_fire_no_pump(&mut self, flow_id: &FlowId, node_id: &NodeId) {
        let outcome = {
            let Some(flow) = self.flows.get_mut(flow_id) else { return };
            let Some(node) = flow.node_mut(node_id) else { return };
            let Some(outcome) = node.try_fire() else { return };
            outcome
        };

        let mut args = outcome.args;
        for pending in outcome.pending {
            let value = pending.provider.and_then(|p| self.flows[flow_id].output_cache(&p));
            args[pending.arg_index] = value;
        }

        let flow = self.flows.get_mut(flow_id).expect("checked above");
        let node = flow.node_mut(node_id).expect("checked above");
        let job_type = node.job_type;
        let body = match &node.func {
            crate::node::NodeFunc::InProcess(func) => {
                let func = func.clone();
                let args_for_job = args.clone();
                let run: std::sync::Arc<dyn Fn() -> crate::job::JobOutcome + Send + Sync> =
                    std::sync::Arc::new(move || func(&args_for_job));
                match job_type {
                    JobType::Thread => JobBody::Thread(run),
                    _ => JobBody::Local(run),
                }
            }
            crate::node::NodeFunc::OutOfProcess(name) => JobBody::Process {
                func_name: name.clone(),
                args,
            },
        };

        let job_id = JobId::new();
        info!(job_id = %job_id, node = %node.name, "firing node");
        if self.engine.submit(job_id.clone(), job_type, body).is_ok() {
            node.jobs.push(job_id.clone());
            self.job_owner.insert(job_id, (flow_id.clone(), node_id.clone()));
        }
    }

    /// Bind positional and named arguments to a node's data input ports,
    /// type-check them, and fire (§6 `node(pos_args.., named=..)`).
    pub fn call_node(
        &mut self,
        flow_id: &FlowId,
        node_id: &NodeId,
        positional: &[Value],
        named: &HashMap<String, Value>,
    ) -> Result<(), FlowError> {
        let flow = self
            .flows
            .get_mut(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.clone()))?;
        let node = flow
            .node_mut(node_id)
            .ok_or_else(|| FlowError::UnknownNode(node_id.clone()))?;
        let data_idx = node.data_input_indices();

        for (slot, &idx) in data_idx.iter().enumerate() {
            let name = node.input_ports[idx].header().name.clone();
            let value = positional.get(slot).cloned().or_else(|| named.get(&name).cloned());
            if let Some(v) = value {
                node.input_ports[idx].check(&v)?;
                node.input_ports[idx].put_signal(None, Some(v));
            }
        }

        self.try_fire(flow_id, node_id);
        Ok(())
    }

    /// `flow(inputs)` (§4.6): enqueue every free input, activate its
    /// owning nodes, join, then collect free outputs keyed `"node.port"`.
    pub fn call_flow(&mut self, flow_id: &FlowId, inputs: &HashMap<String, Value>) -> Result<HashMap<String, Value>, FlowError> {
        let free_inputs = self
            .flows
            .get(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.clone()))?
            .free_input_ports();

        struct Plan {
            node: NodeId,
            is_data: bool,
            bare: String,
            qualified: String,
        }
        let mut plans = Vec::new();
        {
            let flow = &self.flows[flow_id];
            for port_ref in &free_inputs {
                let node = flow
                    .node(&port_ref.node)
                    .ok_or_else(|| FlowError::UnknownNode(port_ref.node.clone()))?;
                let port = node
                    .input_ports
                    .iter()
                    .find(|p| p.header().id == port_ref.port)
                    .ok_or_else(|| FlowError::UnknownPort(port_ref.port.to_string()))?;
                let bare = port.header().name.clone();
                let qualified = format!("{}.{}", node.name, bare);
                plans.push(Plan {
                    node: port_ref.node.clone(),
                    is_data: port.is_data(),
                    bare,
                    qualified,
                });
            }
        }

        let mut touched_nodes = Vec::new();
        for (plan, port_ref) in plans.into_iter().zip(free_inputs.into_iter()) {
            let flow = self.flows.get_mut(flow_id).expect("flow exists");
            let node = flow.node_mut(&port_ref.node).expect("node exists");
            let port = node
                .input_ports
                .iter_mut()
                .find(|p| p.header().id == port_ref.port)
                .expect("port exists");
            if plan.is_data {
                let value = inputs
                    .get(&plan.bare)
                    .or_else(|| inputs.get(&plan.qualified))
                    .cloned()
                    .ok_or_else(|| FlowError::MissingFreeInput(plan.qualified.clone()))?;
                port.check(&value)?;
                port.put_signal(None, Some(value));
            } else {
                port.put_signal(None, None);
            }
            touched_nodes.push(plan.node);
        }
        touched_nodes.sort_by_key(|n| n.to_string());
        touched_nodes.dedup();

        for node_id in &touched_nodes {
            self.try_fire(flow_id, node_id);
        }

        self.join_flow(flow_id, None);

        let free_outputs = self.flows[flow_id].free_output_ports();
        let mut result = HashMap::new();
        let flow = &self.flows[flow_id];
        for port_ref in free_outputs {
            let node = flow.node(&port_ref.node).expect("node exists");
            if let Some(value) = flow.output_cache(&port_ref) {
                let port_name = node
                    .output_ports
                    .iter()
                    .find(|p| p.header().id == port_ref.port)
                    .expect("port exists")
                    .header()
                    .name
                    .clone();
                result.insert(format!("{}.{}", node.name, port_name), value);
            }
        }
        Ok(result)
    }

    /// Drain jobs belonging to `flow_id` until none remain running, polling
    /// every `engine.config().poll_interval`. Routes every drained
    /// completion through `pump()` so downstream propagation still happens
    /// for `Thread`/`Process` jobs, unlike a bare `engine.wait()`.
    pub fn join_flow(&mut self, flow_id: &FlowId, timeout: Option<Duration>) {
        self.pump();
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        loop {
            let still_running = self
                .job_owner
                .iter()
                .any(|(id, (f, _))| f == flow_id && self.job_is_live(id));
            if !still_running {
                break;
            }
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    break;
                }
            }
            std::thread::sleep(self.engine.config().poll_interval);
            self.pump();
        }
    }

    /// Block until every job in this session reaches a terminal status.
    pub fn join(&mut self, timeout: Option<Duration>) {
        self.pump();
        let deadline = timeout.map(|t| std::time::Instant::now() + t);
        loop {
            if !self.job_owner.keys().any(|id| self.job_is_live(id)) {
                break;
            }
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    break;
                }
            }
            std::thread::sleep(self.engine.config().poll_interval);
            self.pump();
        }
    }
}

thread_local! {
    static SESSION_STACK: RefCell<Vec<Rc<RefCell<Session>>>> = const { RefCell::new(Vec::new()) };
}

/// The ambient "current session": the top of this thread's session stack,
/// lazily creating a default-configured session if the stack is empty.
pub fn current_session() -> Rc<RefCell<Session>> {
    SESSION_STACK.with(|stack| {
        if let Some(top) = stack.borrow().last() {
            return Rc::clone(top);
        }
        let session = Rc::new(RefCell::new(Session::new(EngineConfig::default())));
        stack.borrow_mut().push(Rc::clone(&session));
        session
    })
}

/// A scoped-acquisition guard (§9 "global current session/flow state"):
/// pushes `session` as current on construction, restores the prior stack
/// state on drop, on every exit path.
pub struct SessionGuard {
    _session: Rc<RefCell<Session>>,
}

impl SessionGuard {
    /// Push `session` as the ambient current session.
    pub fn enter(session: Rc<RefCell<Session>>) -> Self {
        SESSION_STACK.with(|stack| stack.borrow_mut().push(Rc::clone(&session)));
        Self { _session: session }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        SESSION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FiringMode, Node, NodeFunc};
    use crate::port::Port;
    use crate::value::ValueDescriptor;
    use reflow_util::ids::NodeId;
    use std::sync::Arc;

    fn sq_node(flow: &mut Flow) -> NodeId {
        let id = NodeId::new();
        let a = Port::input_data("a", &id, ValueDescriptor::new("a").with_type(crate::value::TypeTag::new("int")));
        let o = Port::output_data("out", &id, ValueDescriptor::new("out"));
        let func = NodeFunc::InProcess(Arc::new(|args: &[Option<Value>]| {
            let Some(Value::Int(a)) = &args[0] else {
                return Err("expected int".into());
            };
            Ok(vec![Some(Value::Int(a * a))])
        }));
        flow.add_node(Node::new(id, "sq", vec![a], vec![o], FiringMode::All, JobType::Local, func))
    }

    fn add_node(flow: &mut Flow) -> NodeId {
        let id = NodeId::new();
        let a = Port::input_data("a", &id, ValueDescriptor::new("a"));
        let b = Port::input_data("b", &id, ValueDescriptor::new("b"));
        let o = Port::output_data("out", &id, ValueDescriptor::new("out"));
        let func = NodeFunc::InProcess(Arc::new(|args: &[Option<Value>]| {
            let (Some(Value::Int(a)), Some(Value::Int(b))) = (&args[0], &args[1]) else {
                return Err("expected two ints".into());
            };
            Ok(vec![Some(Value::Int(a + b))])
        }));
        flow.add_node(Node::new(id, "add", vec![a, b], vec![o], FiringMode::All, JobType::Local, func))
    }

    #[test]
    fn fan_in_add_of_squares() {
        let mut session = Session::new(EngineConfig::default());
        let flow_id = {
            let flow = Flow::new("f", session.id());
            session.add_flow(flow)
        };
        let (sq1, sq2, add) = {
            let flow = session.flow_mut(&flow_id).unwrap();
            let sq1 = sq_node(flow);
            let sq2 = sq_node(flow);
            let add = add_node(flow);
            (sq1, sq2, add)
        };
        {
            let flow = session.flow_mut(&flow_id).unwrap();
            let sq1_out = flow.node(&sq1).unwrap().output_ports[0].header().port_ref();
            let add_in0 = flow.node(&add).unwrap().input_ports[0].header().port_ref();
            flow.connect(sq1_out, add_in0).unwrap();
            let sq2_out = flow.node(&sq2).unwrap().output_ports[0].header().port_ref();
            let add_in1 = flow.node(&add).unwrap().input_ports[1].header().port_ref();
            flow.connect(sq2_out, add_in1).unwrap();
        }

        session.call_node(&flow_id, &sq1, &[Value::Int(10)], &HashMap::new()).unwrap();
        session.call_node(&flow_id, &sq2, &[Value::Int(10)], &HashMap::new()).unwrap();
        session.join(Some(Duration::from_secs(5)));

        let flow = session.flow(&flow_id).unwrap();
        let add_out = flow.node(&add).unwrap().output_ports[0].header().port_ref();
        assert_eq!(flow.output_cache(&add_out), Some(Value::Int(200)));
    }

    #[test]
    fn range_violation_prevents_any_job_from_running() {
        let mut session = Session::new(EngineConfig::default());
        let flow_id = {
            let flow = Flow::new("f", session.id());
            session.add_flow(flow)
        };
        let id = NodeId::new();
        {
            let flow = session.flow_mut(&flow_id).unwrap();
            let a = Port::input_data(
                "a",
                &id,
                ValueDescriptor::new("a")
                    .with_type(crate::value::TypeTag::new("int"))
                    .with_range(Value::Int(0), Value::Int(10)),
            );
            let o = Port::output_data("out", &id, ValueDescriptor::new("out"));
            let func = NodeFunc::InProcess(Arc::new(|args: &[Option<Value>]| Ok(vec![args[0].clone()])));
            flow.add_node(Node::new(id.clone(), "eq", vec![a], vec![o], FiringMode::All, JobType::Local, func));
        }
        let err = session.call_node(&flow_id, &id, &[Value::Int(100)], &HashMap::new()).unwrap_err();
        assert!(matches!(err, FlowError::Check(_)));
        assert_eq!(session.engine().total_submitted(), 0);
    }

    fn tag_node(flow: &mut Flow) -> NodeId {
        let id = NodeId::new();
        let a = Port::input_data("a", &id, ValueDescriptor::new("a").with_type(crate::value::TypeTag::new("int")));
        let tag = Port::output_data("tag", &id, ValueDescriptor::new("tag"));
        let echoed = Port::output_data(
            "echoed",
            &id,
            ValueDescriptor::new("echoed")
                .with_type(crate::value::TypeTag::new("int"))
                .with_range(Value::Int(0), Value::Int(10)),
        );
        let func = NodeFunc::InProcess(Arc::new(|args: &[Option<Value>]| {
            Ok(vec![Some(Value::Str("ok".to_string())), args[0].clone()])
        }));
        flow.add_node(Node::new(id, "t", vec![a], vec![tag, echoed], FiringMode::All, JobType::Local, func))
    }

    #[test]
    fn tuple_output_lands_in_both_output_caches() {
        let mut session = Session::new(EngineConfig::default());
        let flow_id = {
            let flow = Flow::new("f", session.id());
            session.add_flow(flow)
        };
        let t = {
            let flow = session.flow_mut(&flow_id).unwrap();
            tag_node(flow)
        };

        session.call_node(&flow_id, &t, &[Value::Int(1)], &HashMap::new()).unwrap();
        session.join(Some(Duration::from_secs(5)));

        let flow = session.flow(&flow_id).unwrap();
        let node = flow.node(&t).unwrap();
        let tag_out = node.output_ports[0].header().port_ref();
        let echoed_out = node.output_ports[1].header().port_ref();
        assert_eq!(flow.output_cache(&tag_out), Some(Value::Str("ok".to_string())));
        assert_eq!(flow.output_cache(&echoed_out), Some(Value::Int(1)));
    }

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
    fn ten_node_linear_chain_propagates_end_to_end() {
        let mut session = Session::new(EngineConfig::default());
        let flow_id = {
            let flow = Flow::new("f", session.id());
            session.add_flow(flow)
        };
        let chain: Vec<NodeId> = {
            let flow = session.flow_mut(&flow_id).unwrap();
            let ids: Vec<NodeId> = (0..10).map(|_| inc_node(flow)).collect();
            for pair in ids.windows(2) {
                let out = flow.node(&pair[0]).unwrap().output_ports[0].header().port_ref();
                let inp = flow.node(&pair[1]).unwrap().input_ports[0].header().port_ref();
                flow.connect(out, inp).unwrap();
            }
            ids
        };

        session.call_node(&flow_id, &chain[0], &[Value::Int(0)], &HashMap::new()).unwrap();
        session.join(Some(Duration::from_secs(5)));

        let flow = session.flow(&flow_id).unwrap();
        let last_out = flow.node(&chain[9]).unwrap().output_ports[0].header().port_ref();
        assert_eq!(flow.output_cache(&last_out), Some(Value::Int(10)));
    }

    fn sleepy_square_node(flow: &mut Flow, millis: u64) -> NodeId {
        let id = NodeId::new();
        let a = Port::input_data("a", &id, ValueDescriptor::new("a"));
        let o = Port::output_data("out", &id, ValueDescriptor::new("out"));
        let func = NodeFunc::InProcess(Arc::new(move |args: &[Option<Value>]| {
            std::thread::sleep(Duration::from_millis(millis));
            let Some(Value::Int(a)) = &args[0] else {
                return Err("expected int".to_string());
            };
            Ok(vec![Some(Value::Int(a * a))])
        }));
        flow.add_node(Node::new(id, "sleepy_sq", vec![a], vec![o], FiringMode::All, JobType::Thread, func))
    }

    #[test]
    fn thread_jobs_with_enough_slots_run_concurrently() {
        let mut config = EngineConfig::default();
        config.max_threads = 2;
        let mut session = Session::new(config);
        let flow_id = {
            let flow = Flow::new("f", session.id());
            session.add_flow(flow)
        };
        let (sq1, sq2, add) = {
            let flow = session.flow_mut(&flow_id).unwrap();
            let sq1 = sleepy_square_node(flow, 500);
            let sq2 = sleepy_square_node(flow, 500);
            let add = add_node(flow);
            let sq1_out = flow.node(&sq1).unwrap().output_ports[0].header().port_ref();
            let add_in0 = flow.node(&add).unwrap().input_ports[0].header().port_ref();
            flow.connect(sq1_out, add_in0).unwrap();
            let sq2_out = flow.node(&sq2).unwrap().output_ports[0].header().port_ref();
            let add_in1 = flow.node(&add).unwrap().input_ports[1].header().port_ref();
            flow.connect(sq2_out, add_in1).unwrap();
            (sq1, sq2, add)
        };

        let start = std::time::Instant::now();
        session.call_node(&flow_id, &sq1, &[Value::Int(5)], &HashMap::new()).unwrap();
        session.call_node(&flow_id, &sq2, &[Value::Int(5)], &HashMap::new()).unwrap();
        session.join(Some(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_millis(1000));

        let flow = session.flow(&flow_id).unwrap();
        let add_out = flow.node(&add).unwrap().output_ports[0].header().port_ref();
        assert_eq!(flow.output_cache(&add_out), Some(Value::Int(50)));
    }

    #[test]
    fn switching_to_any_mode_substitutes_the_missing_input_from_cache() {
        let mut session = Session::new(EngineConfig::default());
        let flow_id = {
            let flow = Flow::new("f", session.id());
            session.add_flow(flow)
        };
        let (add0, add1, add2) = {
            let flow = session.flow_mut(&flow_id).unwrap();
            let add0 = add_node(flow);
            let add1 = add_node(flow);
            let add2 = add_node(flow);
            let add0_out = flow.node(&add0).unwrap().output_ports[0].header().port_ref();
            let add2_in0 = flow.node(&add2).unwrap().input_ports[0].header().port_ref();
            flow.connect(add0_out, add2_in0).unwrap();
            let add1_out = flow.node(&add1).unwrap().output_ports[0].header().port_ref();
            let add2_in1 = flow.node(&add2).unwrap().input_ports[1].header().port_ref();
            flow.connect(add1_out, add2_in1).unwrap();
            (add0, add1, add2)
        };

        session.call_node(&flow_id, &add0, &[Value::Int(1), Value::Int(1)], &HashMap::new()).unwrap();
        session.join(Some(Duration::from_secs(5)));
        {
            let flow = session.flow(&flow_id).unwrap();
            let add2_out = flow.node(&add2).unwrap().output_ports[0].header().port_ref();
            assert_eq!(flow.output_cache(&add2_out), None);
        }

        session.call_node(&flow_id, &add1, &[Value::Int(1), Value::Int(1)], &HashMap::new()).unwrap();
        session.join(Some(Duration::from_secs(5)));
        {
            let flow = session.flow(&flow_id).unwrap();
            let add2_out = flow.node(&add2).unwrap().output_ports[0].header().port_ref();
            assert_eq!(flow.output_cache(&add2_out), Some(Value::Int(4)));
        }

        session
            .flow_mut(&flow_id)
            .unwrap()
            .node_mut(&add2)
            .unwrap()
            .set_firing_mode(FiringMode::Any);

        session.call_node(&flow_id, &add0, &[Value::Int(2), Value::Int(2)], &HashMap::new()).unwrap();
        session.join(Some(Duration::from_secs(5)));
        let flow = session.flow(&flow_id).unwrap();
        let add2_out = flow.node(&add2).unwrap().output_ports[0].header().port_ref();
        assert_eq!(flow.output_cache(&add2_out), Some(Value::Int(6)));
    }
}
