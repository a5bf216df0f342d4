//! The scheduler: resource-limited job admission, five per-status stores,
//! and the wait/join protocol.
//!
//! Jobs that need a worker (thread or process) report completion back to
//! the driver over an unbounded `crossbeam` channel, the same cross-thread
//! reporting mechanism the reference pipeline runner uses between its
//! worker pool and its single-threaded driver loop.

use std::collections::{HashMap, VecDeque};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use reflow_util::ids::JobId;
use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};
use tracing::{debug, info, warn};

use crate::errors::EngineError;
use crate::job::{JobBody, JobOutcome, JobStatus};
use crate::node::JobType;
use crate::process_worker;
use crate::value::Value;

/// Engine-wide tunables (§6): resource ceilings and the default poll delta
/// used by `wait`/`wait_async`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrently-running `ThreadJob`s.
    pub max_threads: usize,
    /// Maximum concurrently-running `ProcessJob`s.
    pub max_processes: usize,
    /// Default polling delta for `wait`/`wait_async`.
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_threads: 20,
            max_processes: 8,
            poll_interval: Duration::from_millis(10),
        }
    }
}

mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// A snapshot of a job's externally-visible state.
#[derive(Debug, Clone)]
pub struct JobInfo {
    /// This job's id.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Where it runs.
    pub job_type: JobType,
}

enum RunningHandle {
    Local,
    Thread {
        canceled: Arc<AtomicBool>,
    },
    Process {
        child: Arc<Mutex<Option<Child>>>,
    },
}

struct JobRecord {
    job_type: JobType,
    status: JobStatus,
    body: JobBody,
    running: Option<RunningHandle>,
}

/// The resource-limited scheduler. Owns five per-status job queues
/// (insertion order preserved within each, per §5) and the live thread/
/// process counters.
pub struct Engine {
    config: EngineConfig,
    thread_count: usize,
    process_count: usize,
    pending: VecDeque<JobId>,
    running: VecDeque<JobId>,
    done: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    canceled: VecDeque<JobId>,
    records: HashMap<JobId, JobRecord>,
    status_tx: Sender<(JobId, JobOutcome)>,
    status_rx: Receiver<(JobId, JobOutcome)>,
    pool: threadpool::ThreadPool,
}

impl Engine {
    /// Create an engine with the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        let (status_tx, status_rx) = channel::unbounded();
        let threads = config.max_threads.max(1);
        Self {
            config,
            thread_count: config.max_threads,
            process_count: config.max_processes,
            pending: VecDeque::new(),
            running: VecDeque::new(),
            done: VecDeque::new(),
            failed: VecDeque::new(),
            canceled: VecDeque::new(),
            records: HashMap::new(),
            status_tx,
            status_rx,
            pool: threadpool::Builder::new().num_threads(threads).build(),
        }
    }

    /// This engine's configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Threads not currently consumed by a running `ThreadJob`.
    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// Processes not currently consumed by a running `ProcessJob`.
    pub fn process_count(&self) -> usize {
        self.process_count
    }

    /// How many jobs are in the `running` store.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Total jobs ever submitted (§8 invariant 2 sans externally-removed
    /// records; this engine never evicts a terminal job on its own).
    pub fn total_submitted(&self) -> usize {
        self.records.len()
    }

    fn has_resource(&self, job_type: JobType) -> bool {
        match job_type {
            JobType::Local => true,
            JobType::Thread => self.thread_count > 0,
            JobType::Process => self.process_count > 0,
            JobType::Dask => false,
        }
    }

    fn consume_resource(&mut self, job_type: JobType) {
        match job_type {
            JobType::Local | JobType::Dask => {}
            JobType::Thread => self.thread_count -= 1,
            JobType::Process => self.process_count -= 1,
        }
    }

    fn release_resource(&mut self, job_type: JobType) {
        match job_type {
            JobType::Local | JobType::Dask => {}
            JobType::Thread => self.thread_count += 1,
            JobType::Process => self.process_count += 1,
        }
    }

    /// Submit a new job for `job_type`, running `body` once admitted.
    /// Returns the job's id immediately; the job starts as `pending` and
    /// may already be `running` by the time this call returns if a
    /// resource slot was free (local jobs always run synchronously here).
    pub fn submit(&mut self, id: JobId, job_type: JobType, body: JobBody) -> Result<(), EngineError> {
        if job_type == JobType::Dask {
            return Err(EngineError::UnsupportedJobType(job_type));
        }
        debug!(job_id = %id, ?job_type, "submitting job");
        self.records.insert(
            id.clone(),
            JobRecord {
                job_type,
                status: JobStatus::Pending,
                body,
                running: None,
            },
        );
        self.pending.push_back(id);
        self.activate();
        Ok(())
    }

    /// Linear first-fit scan of `pending`: starts at most one job per call.
    /// Each terminal transition calls this again so admitted work drains
    /// greedily (§4.5).
    pub fn activate(&mut self) {
        let mut chosen = None;
        for (pos, id) in self.pending.iter().enumerate() {
            let job_type = self.records[id].job_type;
            if self.has_resource(job_type) {
                chosen = Some(pos);
                break;
            }
        }
        let Some(pos) = chosen else { return };
        let id = self.pending.remove(pos).expect("pos came from iter over pending");
        let job_type = self.records[&id].job_type;
        self.consume_resource(job_type);
        self.running.push_back(id.clone());

        let record = self.records.get_mut(&id).expect("just inserted");
        record.status = JobStatus::Running;
        let body = record.body.clone();
        info!(job_id = %id, ?job_type, "job running");

        match body {
            JobBody::Local(f) => {
                let outcome = f();
                self.records.get_mut(&id).unwrap().running = Some(RunningHandle::Local);
                self.status_tx
                    .send((id, outcome))
                    .expect("receiver kept alive by self");
            }
            JobBody::Thread(f) => {
                let canceled = Arc::new(AtomicBool::new(false));
                self.records.get_mut(&id).unwrap().running = Some(RunningHandle::Thread {
                    canceled: Arc::clone(&canceled),
                });
                let tx = self.status_tx.clone();
                self.pool.execute(move || {
                    let outcome = f();
                    if !canceled.load(Ordering::SeqCst) {
                        let _ = tx.send((id, outcome));
                    }
                });
            }
            JobBody::Process { func_name, args } => {
                let child_slot = Arc::new(Mutex::new(None));
                self.records.get_mut(&id).unwrap().running = Some(RunningHandle::Process {
                    child: Arc::clone(&child_slot),
                });
                let tx = self.status_tx.clone();
                std::thread::spawn(move || {
                    let outcome = run_process_job(func_name, args, &child_slot);
                    let _ = tx.send((id, outcome));
                });
            }
        }
        // Recurse: another job may now also have a free slot (not for the
        // job type we just consumed, but resource pools are independent).
        self.activate();
    }

    /// Re-run a terminal job (or a pending one, which is a no-op re-queue).
    /// Invalid from `running` (§4.4).
    pub fn emit(&mut self, id: JobId) -> Result<(), EngineError> {
        let status = self
            .records
            .get(&id)
            .ok_or_else(|| EngineError::JobNotFound(id.clone()))?
            .status;
        if status == JobStatus::Running {
            return Err(crate::job::JobEmitError { job: id }.into());
        }
        self.remove_from_status_store(id.clone(), status);
        let record = self.records.get_mut(&id).expect("looked up above");
        record.status = JobStatus::Pending;
        self.pending.push_back(id);
        self.activate();
        Ok(())
    }

    /// Cancel a running job. No-op unless `status == running`. Advisory
    /// for threads (the OS thread is not actually killed, but its eventual
    /// result is discarded), forceful for processes (the child is killed).
    pub fn cancel(&mut self, id: JobId) -> Result<(), EngineError> {
        let Some(record) = self.records.get_mut(&id) else {
            return Err(EngineError::JobNotFound(id));
        };
        if record.status != JobStatus::Running {
            return Ok(());
        }
        match record.running.take() {
            Some(RunningHandle::Thread { canceled }) => {
                canceled.store(true, Ordering::SeqCst);
            }
            Some(RunningHandle::Process { child }) => {
                if let Ok(mut guard) = child.lock() {
                    if let Some(mut child) = guard.take() {
                        let _ = child.kill();
                    }
                }
            }
            Some(RunningHandle::Local) | None => {}
        }
        let job_type = record.job_type;
        warn!(job_id = %id, "job canceled");
        self.move_running_to(id, JobStatus::Canceled);
        self.release_resource(job_type);
        self.activate();
        Ok(())
    }

    fn remove_from_status_store(&mut self, id: JobId, status: JobStatus) {
        let store = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Running => &mut self.running,
            JobStatus::Done => &mut self.done,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Canceled => &mut self.canceled,
        };
        store.retain(|j| *j != id);
    }

    fn move_running_to(&mut self, id: JobId, status: JobStatus) {
        self.running.retain(|j| *j != id);
        if let Some(record) = self.records.get_mut(&id) {
            record.status = status;
        }
        match status {
            JobStatus::Done => self.done.push_back(id),
            JobStatus::Failed => self.failed.push_back(id),
            JobStatus::Canceled => self.canceled.push_back(id),
            _ => unreachable!("move_running_to only used for terminal statuses"),
        }
    }

    /// Drain all currently-available completion reports, applying their
    /// status transitions, and return them to the caller so it can apply
    /// the dataflow effects (cache writes, propagation).
    pub fn poll(&mut self) -> Vec<(JobId, JobOutcome)> {
        let mut events = Vec::new();
        while let Ok((id, outcome)) = self.status_rx.try_recv() {
            // A cancel race may have already moved this job to `canceled`;
            // the late completion is then a no-op (§5 cancellation races).
            if self.records.get(&id).map(|r| r.status) != Some(JobStatus::Running) {
                continue;
            }
            let job_type = self.records[&id].job_type;
            let status = if outcome.is_ok() { JobStatus::Done } else { JobStatus::Failed };
            if status == JobStatus::Failed {
                warn!(job_id = %id, "job failed");
            } else {
                debug!(job_id = %id, "job done");
            }
            self.move_running_to(id.clone(), status);
            self.release_resource(job_type);
            events.push((id, outcome));
        }
        if !events.is_empty() {
            self.activate();
        }
        events
    }

    /// Block, polling every `delta` (or the configured default), until
    /// `running` is empty or `timeout` elapses. Returns the completion
    /// events observed while waiting, so a caller can apply effects as it
    /// would from `poll()`.
    pub fn wait(&mut self, timeout: Option<Duration>, delta: Option<Duration>) -> Vec<(JobId, JobOutcome)> {
        self.wait_while(timeout, delta, |engine| engine.running.is_empty())
    }

    /// As `wait`, but the caller decides when to stop polling via
    /// `select`, which is handed the ids currently in `running`.
    pub fn wait_async(
        &mut self,
        timeout: Option<Duration>,
        delta: Option<Duration>,
        mut select: impl FnMut(&[JobId]) -> bool,
    ) -> Vec<(JobId, JobOutcome)> {
        self.wait_while(timeout, delta, |engine| {
            let ids: Vec<JobId> = engine.running.iter().cloned().collect();
            select(&ids)
        })
    }

    fn wait_while(
        &mut self,
        timeout: Option<Duration>,
        delta: Option<Duration>,
        mut done: impl FnMut(&Engine) -> bool,
    ) -> Vec<(JobId, JobOutcome)> {
        let delta = delta.unwrap_or(self.config.poll_interval);
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut events = Vec::new();
        loop {
            events.extend(self.poll());
            if done(self) {
                break;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    break;
                }
            }
            std::thread::sleep(delta);
        }
        events
    }

    /// Status of a known job.
    pub fn job_info(&self, id: JobId) -> Option<JobInfo> {
        self.records.get(&id).map(|r| JobInfo {
            id,
            status: r.status,
            job_type: r.job_type,
        })
    }
}

fn run_process_job(
    func_name: SmartString<LazyCompact>,
    args: Vec<Option<Value>>,
    child_slot: &Mutex<Option<Child>>,
) -> JobOutcome {
    let exe = std::env::current_exe().map_err(|e| e.to_string())?;
    let mut child = Command::new(exe)
        .arg(process_worker::WORKER_SUBCOMMAND)
        .arg(func_name.as_str())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| e.to_string())?;

    let payload = serde_json::to_vec(&args).map_err(|e| e.to_string())?;
    {
        use std::io::Write;
        // Take (not borrow) stdin so it's dropped and closed here: the
        // worker's `read_to_end` on its own stdin blocks until EOF, which
        // never arrives while the parent still holds the pipe open.
        let mut stdin = child.stdin.take().expect("piped stdin");
        stdin.write_all(&payload).map_err(|e| e.to_string())?;
    }

    // Hand the child to `child_slot` for the whole run, not just at spawn
    // time, so `Engine::cancel` can reach in and kill it from the driver
    // thread at any point while we're polling below.
    *child_slot.lock().expect("child_slot poisoned") = Some(child);

    loop {
        let mut guard = child_slot.lock().expect("child_slot poisoned");
        let Some(child) = guard.as_mut() else {
            // Cancelled: the slot was emptied and the child already killed.
            return Err("canceled".to_string());
        };
        if let Some(status) = child.try_wait().map_err(|e| e.to_string())? {
            let mut child = guard.take().expect("checked Some above");
            drop(guard);
            if !status.success() {
                return Err(format!("worker process exited with {:?}", status.code()));
            }
            let mut stdout = Vec::new();
            use std::io::Read;
            child
                .stdout
                .take()
                .expect("piped stdout")
                .read_to_end(&mut stdout)
                .map_err(|e| e.to_string())?;
            return serde_json::from_slice::<JobOutcome>(&stdout).map_err(|e| e.to_string())?;
        }
        drop(guard);
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_job_runs_synchronously_on_submit() {
        let mut engine = Engine::new(EngineConfig::default());
        let id = JobId::new();
        engine
            .submit(id.clone(), JobType::Local, JobBody::Local(Arc::new(|| Ok(vec![Some(Value::Int(1))]))))
            .unwrap();
        let events = engine.poll();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, id);
        assert_eq!(engine.job_info(id).unwrap().status, JobStatus::Done);
    }

    #[test]
    fn thread_resource_accounting_returns_to_baseline() {
        let mut config = EngineConfig::default();
        config.max_threads = 1;
        let mut engine = Engine::new(config);
        let id = JobId::new();
        let baseline = engine.thread_count();
        engine
            .submit(
                id.clone(),
                JobType::Thread,
                JobBody::Thread(Arc::new(|| {
                    std::thread::sleep(Duration::from_millis(20));
                    Ok(vec![Some(Value::Int(1))])
                })),
            )
            .unwrap();
        assert_eq!(engine.thread_count(), baseline - 1);
        engine.wait(Some(Duration::from_secs(5)), Some(Duration::from_millis(5)));
        assert_eq!(engine.thread_count(), baseline);
        assert_eq!(engine.job_info(id).unwrap().status, JobStatus::Done);
    }

    #[test]
    fn cancelling_a_running_thread_job_releases_its_slot() {
        let mut config = EngineConfig::default();
        config.max_threads = 1;
        let mut engine = Engine::new(config);
        let id = JobId::new();
        let baseline = engine.thread_count();
        engine
            .submit(
                id.clone(),
                JobType::Thread,
                JobBody::Thread(Arc::new(|| {
                    std::thread::sleep(Duration::from_millis(200));
                    Ok(vec![Some(Value::Int(1))])
                })),
            )
            .unwrap();
        assert_eq!(engine.thread_count(), baseline - 1);
        engine.cancel(id.clone()).unwrap();
        assert_eq!(engine.thread_count(), baseline);
        assert!(engine.running_count() == 0);
        assert_eq!(engine.job_info(id).unwrap().status, JobStatus::Canceled);
    }

    #[test]
    fn dask_job_type_is_rejected_at_submission() {
        let mut engine = Engine::new(EngineConfig::default());
        let id = JobId::new();
        let err = engine
            .submit(id, JobType::Dask, JobBody::Local(Arc::new(|| Ok(vec![]))))
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedJobType(JobType::Dask)));
    }
}
