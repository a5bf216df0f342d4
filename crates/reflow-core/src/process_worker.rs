//! Resolves the §9 "process worker output transport" contract concretely:
//! a `ProcessJob`'s function must be registered here ahead of time, since
//! an arbitrary Rust closure cannot cross a process boundary. The worker
//! is the same binary re-invoked with [`WORKER_SUBCOMMAND`] and the
//! registered function's name; it reads a JSON argument vector on stdin
//! and writes a JSON `Result` on stdout.

use std::collections::HashMap;
use std::io::Read;
use std::sync::OnceLock;
use std::sync::RwLock;

use smartstring::{LazyCompact, SmartString};

use crate::job::JobOutcome;
use crate::value::Value;

/// The hidden subcommand a host binary must dispatch to
/// [`run_worker_if_invoked`] before doing anything else, so a re-exec of
/// the binary behaves as a worker instead of re-running the main program.
pub const WORKER_SUBCOMMAND: &str = "__reflow_process_worker";

/// A function registered under a name, runnable in a worker subprocess.
pub type ProcessFn = fn(&[Option<Value>]) -> Result<Vec<Option<Value>>, String>;

fn registry() -> &'static RwLock<HashMap<SmartString<LazyCompact>, ProcessFn>> {
    static REGISTRY: OnceLock<RwLock<HashMap<SmartString<LazyCompact>, ProcessFn>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Error returned when registering a name that already exists.
#[derive(Debug)]
pub struct RegisterProcessFnError {
    /// The name that was already registered.
    pub name: SmartString<LazyCompact>,
}

impl std::fmt::Display for RegisterProcessFnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "a process function named '{}' is already registered", self.name)
    }
}
impl std::error::Error for RegisterProcessFnError {}

/// Register `func` under `name` so `JobType::Process` nodes can reference
/// it. Must happen before any `ProcessJob` using this name is submitted,
/// and before the process re-execs into worker mode (the worker looks the
/// name up in the same registry).
pub fn register(name: &str, func: ProcessFn) -> Result<(), RegisterProcessFnError> {
    let mut map = registry().write().expect("process fn registry poisoned");
    if map.contains_key(name) {
        return Err(RegisterProcessFnError { name: name.into() });
    }
    map.insert(name.into(), func);
    Ok(())
}

/// If the current process was re-invoked as a worker (its argv matches
/// `[.., WORKER_SUBCOMMAND, func_name]`), run the registered function
/// against the JSON argument vector on stdin, write the JSON result to
/// stdout, and exit. Otherwise return without doing anything, so normal
/// `main` startup is unaffected.
///
/// Call this as the very first thing in `main`.
pub fn run_worker_if_invoked() {
    if !is_worker_invocation() {
        return;
    }
    let mut args = std::env::args().skip(2);
    let func_name = args.next().expect("checked by is_worker_invocation");

    let mut input = Vec::new();
    std::io::stdin()
        .read_to_end(&mut input)
        .expect("failed to read worker input");
    let values: Vec<Option<Value>> = serde_json::from_slice(&input).expect("malformed worker input");

    let outcome: JobOutcome = {
        let map = registry().read().expect("process fn registry poisoned");
        match map.get(func_name.as_str()) {
            Some(f) => f(&values),
            None => Err(format!("no process function named '{func_name}'")),
        }
    };

    let encoded = serde_json::to_vec(&outcome).expect("failed to encode worker output");
    use std::io::Write;
    std::io::stdout()
        .write_all(&encoded)
        .expect("failed to write worker output");
    std::process::exit(0);
}

/// True if the current process's argv names the worker subcommand. Useful
/// for a host `main` that wants to branch explicitly instead of calling
/// [`run_worker_if_invoked`] unconditionally.
pub fn is_worker_invocation() -> bool {
    std::env::args().nth(1).as_deref() == Some(WORKER_SUBCOMMAND)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn double(args: &[Option<Value>]) -> Result<Vec<Option<Value>>, String> {
        match args.first() {
            Some(Some(Value::Int(i))) => Ok(vec![Some(Value::Int(i * 2))]),
            _ => Err("expected one int".to_string()),
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let name = "process_worker_test_double";
        let _ = register(name, double);
        assert!(register(name, double).is_err());
    }
}
