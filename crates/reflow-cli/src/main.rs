//! Demonstrator binary: builds a small flow with the `>>` wiring DSL,
//! invokes it, and prints the resulting output cache.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use reflow_core::dsl::NodeHandle;
use reflow_core::node::{FiringMode, JobType, Node, NodeFunc};
use reflow_core::port::Port;
use reflow_core::session::{current_session, SessionGuard};
use reflow_core::value::{Value, ValueDescriptor};
use reflow_util::ids::NodeId;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// The value squared and added to itself (`sq(a) >> add`, fed twice).
    #[arg(long, default_value_t = 6)]
    input: i64,
}

fn square_node() -> Node {
    let id = NodeId::new();
    let a = Port::input_data("a", &id, ValueDescriptor::new("a").with_type(reflow_core::value::TypeTag::new("int")));
    let out = Port::output_data("out", &id, ValueDescriptor::new("out"));
    let func = NodeFunc::InProcess(Arc::new(|args: &[Option<Value>]| {
        let Some(Value::Int(a)) = &args[0] else {
            return Err("square expects an int".to_string());
        };
        Ok(vec![Some(Value::Int(a * a))])
    }));
    Node::new(id, "square", vec![a], vec![out], FiringMode::All, JobType::Local, func)
}

fn add_node() -> Node {
    let id = NodeId::new();
    let a = Port::input_data("a", &id, ValueDescriptor::new("a"));
    let b = Port::input_data("b", &id, ValueDescriptor::new("b"));
    let out = Port::output_data("out", &id, ValueDescriptor::new("out"));
    let func = NodeFunc::InProcess(Arc::new(|args: &[Option<Value>]| {
        let (Some(Value::Int(a)), Some(Value::Int(b))) = (&args[0], &args[1]) else {
            return Err("add expects two ints".to_string());
        };
        Ok(vec![Some(Value::Int(a + b))])
    }));
    Node::new(id, "add", vec![a, b], vec![out], FiringMode::All, JobType::Local, func)
}

fn main() -> Result<()> {
    reflow_core::process_worker::run_worker_if_invoked();

    tracing_subscriber::fmt().with_env_filter("reflow_core=info").without_time().init();

    let args = Args::parse();

    let session = current_session();
    let _guard = SessionGuard::enter(session.clone());

    let flow_id = session.borrow_mut().current_flow();

    let sq1 = NodeHandle::add(flow_id.clone(), square_node());
    let sq2 = NodeHandle::add(flow_id.clone(), square_node());
    let add = NodeHandle::add(flow_id.clone(), add_node());

    let _ = sq1.output(0) >> add.input(0);
    let _ = sq2.output(0) >> add.input(1);

    sq1.call_pos(&[Value::Int(args.input)])?;
    sq2.call_pos(&[Value::Int(args.input)])?;

    session.borrow_mut().join(Some(std::time::Duration::from_secs(5)));

    let result = {
        let session = session.borrow();
        let flow = session.flow(&flow_id).expect("flow exists");
        flow.node(&add.node).expect("node exists").output_ports[0].header().port_ref()
    };
    let cache = {
        let session = session.borrow();
        session.flow(&flow_id).expect("flow exists").output_cache(&result)
    };
    println!("add.out cache = {cache:?}");

    Ok(())
}
