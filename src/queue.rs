//! The persistent task queue: one mutex-guarded map of task records, mirrored
//! to a single JSON file on every mutation.
//!
//! The lock is held across the persistence write by design — linearizing
//! state changes with disk writes removes any need for a write-ahead log, and
//! the expected request rate (human-initiated jobs) makes the throughput cost
//! acceptable. Don't split this into separate read/write locks or add a
//! write-behind buffer without first showing contention actually matters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{DecodeError, PersistError};
use crate::job::{Job, LineSink};
use crate::logging::LogRegistry;
use crate::task::{zero_instant, TaskRecord, TaskSnapshot, TaskStatus, WireTask, DEFAULT_LOG_GROUP};

const QUEUE_FILE: &str = "queue.json";
const ADMISSION_HORIZON: chrono::Duration = chrono::Duration::minutes(10);
const RETENTION_HORIZON: chrono::Duration = chrono::Duration::minutes(30);

#[derive(Serialize, Deserialize)]
struct WireQueue {
    cnt: u64,
    qtasks: HashMap<String, WireTask>,
}

struct State {
    counter: u64,
    tasks: HashMap<u64, TaskRecord>,
}

/// The queue. One instance per process; constructed once via `Init` and
/// shared behind an `Arc` by callers (dispatcher, HTTP handlers).
pub struct Queue {
    path: PathBuf,
    state: Mutex<State>,
}

impl Queue {
    /// Resolve the persistence file (sibling of the running binary) and load
    /// or create it. All failure modes here are fatal: the process must not
    /// start with a missing or incoherent queue.
    pub fn init() -> anyhow::Result<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe
            .parent()
            .ok_or_else(|| anyhow::anyhow!("executable has no parent directory"))?;
        let path = dir.join(QUEUE_FILE);

        if !path.exists() {
            let queue = Queue {
                path,
                state: Mutex::new(State {
                    counter: 0,
                    tasks: HashMap::new(),
                }),
            };
            queue.save_locked(&mut queue.state.lock().unwrap())?;
            return Ok(queue);
        }

        let raw = std::fs::read_to_string(&path).map_err(DecodeError::Io)?;
        let wire: WireQueue = serde_json::from_str(&raw).map_err(DecodeError::Json)?;

        let mut tasks = HashMap::with_capacity(wire.qtasks.len());
        for (key, wire_task) in wire.qtasks {
            let id: u64 = key
                .parse()
                .map_err(|_| DecodeError::UnknownJobType(format!("non-numeric task key {key:?}")))?;
            tasks.insert(id, wire_task.decode()?);
        }

        let queue = Queue {
            path,
            state: Mutex::new(State {
                counter: wire.cnt,
                tasks,
            }),
        };

        let mut guard = queue.state.lock().unwrap();
        purge(&mut guard.tasks, true);
        queue.save_locked(&mut guard)?;
        drop(guard);

        Ok(queue)
    }

    /// Insert a new task in `NEW` and persist. Rolls back on persistence
    /// failure. Caller must already have run `job.check_valid()`.
    pub fn add(&self, job: Box<dyn Job>, log_group: String) -> Result<u64, PersistError> {
        let log_group = if log_group.is_empty() {
            DEFAULT_LOG_GROUP.to_string()
        } else {
            log_group
        };

        let mut guard = self.state.lock().unwrap();
        let id = guard.counter + 1;
        guard.counter = id;
        guard
            .tasks
            .insert(id, TaskRecord::new(id, job, log_group, Utc::now()));

        if let Err(e) = self.save_locked(&mut guard) {
            guard.tasks.remove(&id);
            guard.counter -= 1;
            return Err(e);
        }
        Ok(id)
    }

    /// Select any task in `NEW`, transition it to `RUNNING`, persist, release
    /// the lock, then spawn a worker that runs the job to completion and
    /// reports back through `Terminated`. Returns a snapshot of the record.
    pub fn pop_next(self: &Arc<Self>, logs: &Arc<LogRegistry>) -> Result<Option<TaskSnapshot>, PersistError> {
        let mut guard = self.state.lock().unwrap();

        let next_id = guard
            .tasks
            .values()
            .find(|t| t.status == TaskStatus::New)
            .map(|t| t.id);

        let Some(id) = next_id else {
            return Ok(None);
        };

        let now = Utc::now();
        {
            let task = guard.tasks.get_mut(&id).expect("id just found");
            task.status = TaskStatus::Running;
            task.last_activity = now;
            task.started_at = now;
        }

        if let Err(e) = self.save_locked(&mut guard) {
            let task = guard.tasks.get_mut(&id).expect("id just found");
            task.status = TaskStatus::New;
            task.started_at = zero_instant();
            return Err(e);
        }

        let task = guard.tasks.get_mut(&id).expect("id just found");
        // Clone the `Arc`, not take it: the record keeps its own job so any
        // later `save_locked` (from another `Add`/`Terminated`/`PopNext`
        // while this task is still RUNNING) can still encode it faithfully.
        let job = task.job.clone().expect("NEW task always carries a job");
        let snapshot = task.snapshot();
        let log_group = task.log_group.clone();
        drop(guard);

        let queue = self.clone();
        let logs = logs.clone();
        std::thread::spawn(move || run_worker(queue, logs, id, log_group, job));

        Ok(Some(snapshot))
    }

    /// Mark a task as DONE with its outcome. Unknown ids succeed silently —
    /// the task may already have been purged. Persistence failure is logged
    /// but the in-memory transition stands (losing durability beats losing a
    /// terminal outcome from observers).
    pub fn terminated(&self, id: u64, ok: bool, info: String) {
        let mut guard = self.state.lock().unwrap();
        let Some(task) = guard.tasks.get_mut(&id) else {
            return;
        };
        let now = Utc::now();
        task.status = TaskStatus::Done;
        task.last_activity = now;
        task.terminated_at = now;
        task.result_ok = ok;
        task.result_info = info;

        if let Err(e) = self.save_locked(&mut guard) {
            error!(task_id = id, error = %e, "persist queue after Terminated");
        }
    }

    /// By-value snapshot of a task, or the zero-id sentinel if unknown.
    pub fn get(&self, id: u64) -> TaskSnapshot {
        let guard = self.state.lock().unwrap();
        guard
            .tasks
            .get(&id)
            .map(TaskRecord::snapshot)
            .unwrap_or_else(TaskSnapshot::zero)
    }

    /// Purge then serialize-and-write. Called with the lock already held.
    fn save_locked(&self, guard: &mut State) -> Result<(), PersistError> {
        purge(&mut guard.tasks, false);

        let qtasks = guard
            .tasks
            .iter()
            .map(|(id, task)| Ok((id.to_string(), WireTask::encode(task)?)))
            .collect::<serde_json::Result<HashMap<_, _>>>()
            .map_err(PersistError::Encode)?;
        let wire = WireQueue {
            cnt: guard.counter,
            qtasks,
        };
        let buffer = serde_json::to_vec_pretty(&wire).map_err(PersistError::Encode)?;
        std::fs::write(&self.path, buffer).map_err(PersistError::Io)?;
        Ok(())
    }
}

/// Admission and retention horizons, plus the startup RUNNING->ABORTED rule.
fn purge(tasks: &mut HashMap<u64, TaskRecord>, starting: bool) {
    let now = Utc::now();
    let mut to_remove = Vec::new();

    for (id, task) in tasks.iter_mut() {
        if starting && task.status == TaskStatus::Running {
            task.status = TaskStatus::Aborted;
            task.last_activity = now;
            task.result_ok = false;
            task.result_info = "aborted".to_string();
            warn!(task_id = id, "task was RUNNING at startup, marking ABORTED");
        }

        if task.status == TaskStatus::New && now - task.last_activity > ADMISSION_HORIZON {
            task.status = TaskStatus::Aborted;
            task.last_activity = now;
            info!(task_id = id, "task exceeded admission horizon, marking ABORTED");
        }

        let terminal = matches!(task.status, TaskStatus::Done | TaskStatus::Aborted);
        if terminal && now - task.last_activity > RETENTION_HORIZON {
            to_remove.push(*id);
        }
    }

    for id in to_remove {
        tasks.remove(&id);
    }
}

/// Runs one task to completion and reports back. Never shares mutable state
/// with any other worker; its only interaction with the queue is through
/// `Terminated`.
fn run_worker(queue: Arc<Queue>, logs: Arc<LogRegistry>, id: u64, log_group: String, job: Arc<dyn Job>) {
    let sink = logs.sink_for(&log_group);
    sink.write_line(&format!("-- TASK {id} BEGIN --"));

    let internal = logs.sink_for("");
    internal.write_line(&format!("Launch Task {id}"));

    let (ok, info) = job.run(&sink);
    queue.terminated(id, ok, info.clone());

    sink.write_line(&format!("-- TASK {id} END --"));
    internal.write_line(&format!("Task terminated {id} res:{ok} info:{info}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogStoreConfig;
    use crate::jobs::cmd::CmdTask;
    use std::sync::Mutex as StdMutex;

    fn cmd(cmd: &str) -> Box<dyn Job> {
        Box::new(CmdTask {
            cmd: cmd.to_string(),
            args: vec![],
            start_in: None,
            timeout_ms: None,
        })
    }

    fn test_logs(dir: &std::path::Path) -> Arc<LogRegistry> {
        let store = LogStoreConfig {
            max_size_mb: 1,
            max_backups: 1,
            compress: false,
            log_folder: dir.join("log"),
        };
        let mut groups = HashMap::new();
        groups.insert(DEFAULT_LOG_GROUP.to_string(), store.clone());
        Arc::new(LogRegistry::init(&store, &groups).unwrap())
    }

    fn temp_queue() -> (tempfile::TempDir, Arc<Queue>, Arc<LogRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(Queue {
            path: dir.path().join(QUEUE_FILE),
            state: StdMutex::new(State {
                counter: 0,
                tasks: HashMap::new(),
            }),
        });
        let logs = test_logs(dir.path());
        (dir, queue, logs)
    }

    #[test]
    fn add_assigns_monotonic_ids() {
        let (_dir, queue, _logs) = temp_queue();
        let id1 = queue.add(cmd("echo"), String::new()).unwrap();
        let id2 = queue.add(cmd("echo"), String::new()).unwrap();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[test]
    fn add_empty_log_group_becomes_default() {
        let (_dir, queue, _logs) = temp_queue();
        let id = queue.add(cmd("echo"), String::new()).unwrap();
        let snap = queue.get(id);
        assert_eq!(snap.log_group, DEFAULT_LOG_GROUP);
    }

    #[test]
    fn pop_next_transitions_to_running() {
        let (_dir, queue, logs) = temp_queue();
        let id = queue.add(cmd("echo"), String::new()).unwrap();
        let popped = queue.pop_next(&logs).unwrap().unwrap();
        assert_eq!(popped.id, id);
        assert_eq!(popped.status, TaskStatus::Running);
        assert!(queue.pop_next(&logs).unwrap().is_none());
    }

    #[test]
    fn pop_next_on_empty_queue_returns_none() {
        let (_dir, queue, logs) = temp_queue();
        assert!(queue.pop_next(&logs).unwrap().is_none());
    }

    #[test]
    fn get_unknown_id_is_zero_sentinel() {
        let (_dir, queue, _logs) = temp_queue();
        assert!(queue.get(999).is_unknown());
    }

    #[test]
    fn terminated_unknown_id_is_noop() {
        let (_dir, queue, _logs) = temp_queue();
        queue.terminated(999, true, String::new());
    }

    #[test]
    fn terminated_sets_done_and_result() {
        let (_dir, queue, logs) = temp_queue();
        let id = queue.add(cmd("echo"), String::new()).unwrap();
        queue.pop_next(&logs).unwrap();
        queue.terminated(id, true, "".to_string());
        let snap = queue.get(id);
        assert_eq!(snap.status, TaskStatus::Done);
        assert!(snap.result_ok);
    }

    #[test]
    fn popped_task_still_encodes_its_job_on_a_later_save() {
        // Regression test: a task popped to RUNNING must keep its job alive
        // in the record (not have it taken by the worker), since every
        // subsequent save re-encodes the whole map. A second `Add` forces
        // that second `save_locked` while the first task is still RUNNING.
        let (dir, queue, logs) = temp_queue();
        let path = dir.path().join(QUEUE_FILE);

        let running_id = queue.add(cmd("echo"), String::new()).unwrap();
        queue.pop_next(&logs).unwrap().unwrap();
        queue.add(cmd("echo"), String::new()).unwrap();

        // Inspect the file written by the second `Add`'s save: the RUNNING
        // task's `task` blob must not have been clobbered to "".
        let raw = std::fs::read_to_string(&path).unwrap();
        let wire: WireQueue = serde_json::from_str(&raw).unwrap();
        let running_wire = wire.qtasks.get(&running_id.to_string()).unwrap();
        assert!(!running_wire.task.is_empty());

        // And a fresh `Init()`-equivalent load must succeed, not fail to
        // decode an empty blob for the still-RUNNING task.
        let reopened = reinit_at(&path);
        assert_eq!(reopened.get(running_id).status, TaskStatus::Aborted);
    }

    #[test]
    fn startup_recovers_running_to_aborted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(QUEUE_FILE);
        let now = Utc::now();
        let mut tasks = HashMap::new();
        tasks.insert(
            7,
            TaskRecord {
                id: 7,
                job_type: "CmdTask",
                job: Some(cmd("echo")),
                status: TaskStatus::Running,
                last_activity: now,
                started_at: now,
                terminated_at: zero_instant(),
                result_ok: false,
                result_info: String::new(),
                log_group: DEFAULT_LOG_GROUP.to_string(),
            },
        );
        let seed = Queue {
            path: path.clone(),
            state: StdMutex::new(State { counter: 7, tasks }),
        };
        seed.save_locked(&mut seed.state.lock().unwrap()).unwrap();

        let reopened = reinit_at(&path);
        let snap = reopened.get(7);
        assert_eq!(snap.status, TaskStatus::Aborted);
        assert_eq!(snap.result_info, "aborted");
    }

    #[test]
    fn admission_timeout_aborts_stale_new_task() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(QUEUE_FILE);
        let stale = Utc::now() - chrono::Duration::minutes(11);
        let mut tasks = HashMap::new();
        tasks.insert(
            1,
            TaskRecord {
                id: 1,
                job_type: "CmdTask",
                job: Some(cmd("echo")),
                status: TaskStatus::New,
                last_activity: stale,
                started_at: zero_instant(),
                terminated_at: zero_instant(),
                result_ok: false,
                result_info: String::new(),
                log_group: DEFAULT_LOG_GROUP.to_string(),
            },
        );
        let queue = Queue {
            path,
            state: StdMutex::new(State { counter: 1, tasks }),
        };
        queue.add(cmd("echo"), String::new()).unwrap();
        assert_eq!(queue.get(1).status, TaskStatus::Aborted);
        assert_eq!(queue.get(2).status, TaskStatus::New);
    }

    #[test]
    fn retention_eviction_drops_old_terminal_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(QUEUE_FILE);
        let old = Utc::now() - chrono::Duration::minutes(31);
        let recent = Utc::now() - chrono::Duration::minutes(29);
        let mut tasks = HashMap::new();
        tasks.insert(
            1,
            TaskRecord {
                id: 1,
                job_type: "CmdTask",
                job: Some(cmd("echo")),
                status: TaskStatus::Done,
                last_activity: old,
                started_at: old,
                terminated_at: old,
                result_ok: true,
                result_info: String::new(),
                log_group: DEFAULT_LOG_GROUP.to_string(),
            },
        );
        tasks.insert(
            2,
            TaskRecord {
                id: 2,
                job_type: "CmdTask",
                job: Some(cmd("echo")),
                status: TaskStatus::Done,
                last_activity: recent,
                started_at: recent,
                terminated_at: recent,
                result_ok: true,
                result_info: String::new(),
                log_group: DEFAULT_LOG_GROUP.to_string(),
            },
        );
        let queue = Queue {
            path,
            state: StdMutex::new(State { counter: 2, tasks }),
        };
        queue.add(cmd("echo"), String::new()).unwrap();
        assert!(queue.get(1).is_unknown());
        assert!(!queue.get(2).is_unknown());
    }

    fn reinit_at(path: &std::path::Path) -> Queue {
        let raw = std::fs::read_to_string(path).unwrap();
        let wire: WireQueue = serde_json::from_str(&raw).unwrap();
        let mut tasks = HashMap::new();
        for (key, wire_task) in wire.qtasks {
            let id: u64 = key.parse().unwrap();
            tasks.insert(id, wire_task.decode().unwrap());
        }
        let queue = Queue {
            path: path.to_path_buf(),
            state: StdMutex::new(State {
                counter: wire.cnt,
                tasks,
            }),
        };
        let mut guard = queue.state.lock().unwrap();
        purge(&mut guard.tasks, true);
        queue.save_locked(&mut guard).unwrap();
        drop(guard);
        queue
    }
}
