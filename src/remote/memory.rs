//! In-process simulated batch service.
//!
//! Provides a deterministic [`BatchService`] for tests, dry runs and the
//! `simulate` CLI command. Nothing runs: each `wait` call advances the polled
//! task by one step through the remote lifecycle, honouring dependencies
//! when the task's job resolves them.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::{BatchService, BucketHandle, JobHandle, RemoteError, TaskHandle, TaskRequest};

/// A call made against the simulated service, recorded for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    CreateBucket(String),
    SyncDirectory(String),
    AddFile(String),
    DeleteBucket(String),
    CreateJob(String),
    SubmitJob(String),
    DeleteJob(String),
    CreateTask(String),
    SetDependencies { task: String, predecessors: Vec<String> },
    SubmitTask(String),
    Wait(String),
    State(String),
    DownloadResults(String),
    DeleteTask(String),
}

/// Scripted behaviour for the simulated service, keyed by task name.
#[derive(Debug, Clone, Default)]
pub struct FailureInjection {
    /// Tasks that end in `Failure` with the given error list.
    pub fail_with: HashMap<String, Vec<String>>,
    /// Tasks that end in an arbitrary raw state.
    pub terminal_state: HashMap<String, String>,
    /// Tasks whose submission is refused.
    pub reject_submit: Vec<String>,
    /// Number of upcoming status calls answered with `Unavailable`.
    pub unavailable_calls: u32,
    /// Number of `wait` calls a task spends running before finishing.
    pub run_steps: HashMap<String, u32>,
    /// Execution and wall times reported for a task.
    pub timings: HashMap<String, (String, String)>,
    /// Standard output emitted when a task finishes.
    pub stdout: HashMap<String, String>,
}

impl FailureInjection {
    /// Create an empty injection config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure a task to fail with a single error message.
    pub fn fail_with(mut self, task: impl Into<String>, message: impl Into<String>) -> Self {
        self.fail_with.insert(task.into(), vec![message.into()]);
        self
    }

    /// Configure a task to finish in an arbitrary raw state.
    pub fn end_in_state(mut self, task: impl Into<String>, state: impl Into<String>) -> Self {
        self.terminal_state.insert(task.into(), state.into());
        self
    }

    /// Configure the service to refuse a task's submission.
    pub fn reject_submit(mut self, task: impl Into<String>) -> Self {
        self.reject_submit.push(task.into());
        self
    }

    /// Make the next `calls` status calls fail as unavailable.
    pub fn unavailable_for(mut self, calls: u32) -> Self {
        self.unavailable_calls = calls;
        self
    }

    /// Keep a task running for `steps` polls.
    pub fn run_steps(mut self, task: impl Into<String>, steps: u32) -> Self {
        self.run_steps.insert(task.into(), steps);
        self
    }

    /// Report fixed `HH:MM:SS` execution and wall times for a task.
    pub fn timings(
        mut self,
        task: impl Into<String>,
        execution: impl Into<String>,
        wall: impl Into<String>,
    ) -> Self {
        self.timings
            .insert(task.into(), (execution.into(), wall.into()));
        self
    }

    /// Emit `text` on the task's standard output when it finishes.
    pub fn stdout(mut self, task: impl Into<String>, text: impl Into<String>) -> Self {
        self.stdout.insert(task.into(), text.into());
        self
    }
}

#[derive(Debug)]
struct SimBucket {
    name: String,
    files: BTreeSet<String>,
    deleted: bool,
}

#[derive(Debug)]
struct SimJob {
    name: String,
    use_dependencies: bool,
    submitted: bool,
    deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Queued,
    Running { remaining: u32 },
    Done,
}

#[derive(Debug)]
struct SimTask {
    handle: TaskHandle,
    request: TaskRequest,
    predecessors: Vec<Uuid>,
    phase: Phase,
    raw_state: String,
    errors: Vec<String>,
    stdout: String,
    deleted: bool,
}

#[derive(Debug, Default)]
struct SimState {
    buckets: HashMap<Uuid, SimBucket>,
    jobs: HashMap<Uuid, SimJob>,
    tasks: HashMap<Uuid, SimTask>,
    calls: Vec<RemoteCall>,
    unavailable_calls: u32,
}

/// Simulated remote batch service.
///
/// Thread-safe; all state lives behind a mutex and is lost on drop.
pub struct SimulatedBatchService {
    state: Mutex<SimState>,
    injection: FailureInjection,
}

impl SimulatedBatchService {
    /// Create a service where every task succeeds.
    pub fn new() -> Self {
        Self::with_injection(FailureInjection::default())
    }

    /// Create a service with scripted behaviour.
    pub fn with_injection(injection: FailureInjection) -> Self {
        let state = SimState {
            unavailable_calls: injection.unavailable_calls,
            ..SimState::default()
        };
        Self {
            state: Mutex::new(state),
            injection,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, RemoteError> {
        self.state
            .lock()
            .map_err(|_| RemoteError::Rejected("simulator state poisoned".into()))
    }

    fn snapshot(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.snapshot().calls.clone()
    }

    /// Names of tasks in the order they were submitted.
    pub fn submission_order(&self) -> Vec<String> {
        self.snapshot()
            .calls
            .iter()
            .filter_map(|c| match c {
                RemoteCall::SubmitTask(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Raw state of the named task, deleted or not.
    pub fn task_state(&self, name: &str) -> Option<String> {
        self.snapshot()
            .tasks
            .values()
            .find(|t| t.handle.name() == name)
            .map(|t| t.raw_state.clone())
    }

    /// Names of tasks that have not been deleted.
    pub fn live_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshot()
            .tasks
            .values()
            .filter(|t| !t.deleted)
            .map(|t| t.handle.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Names of buckets that have not been deleted.
    pub fn live_buckets(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshot()
            .buckets
            .values()
            .filter(|b| !b.deleted)
            .map(|b| b.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Files currently stored in the named bucket.
    pub fn bucket_files(&self, name: &str) -> Vec<String> {
        self.snapshot()
            .buckets
            .values()
            .find(|b| b.name == name)
            .map(|b| b.files.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of `wait` calls made for the named task.
    pub fn wait_count(&self, name: &str) -> usize {
        self.snapshot()
            .calls
            .iter()
            .filter(|c| matches!(c, RemoteCall::Wait(n) if n == name))
            .count()
    }

    fn consume_outage(state: &mut SimState) -> Result<(), RemoteError> {
        if state.unavailable_calls > 0 {
            state.unavailable_calls -= 1;
            return Err(RemoteError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }

    fn task_mut<'a>(
        state: &'a mut SimState,
        handle: &TaskHandle,
    ) -> Result<&'a mut SimTask, RemoteError> {
        match state.tasks.get_mut(handle.uuid()) {
            Some(task) if !task.deleted => Ok(task),
            _ => Err(RemoteError::NotFound(format!("task {}", handle))),
        }
    }

    fn task_ref<'a>(state: &'a SimState, handle: &TaskHandle) -> Result<&'a SimTask, RemoteError> {
        match state.tasks.get(handle.uuid()) {
            Some(task) if !task.deleted => Ok(task),
            _ => Err(RemoteError::NotFound(format!("task {}", handle))),
        }
    }

    /// Advance a task by one step.
    fn step(&self, state: &mut SimState, uuid: &Uuid) {
        let Some(task) = state.tasks.get(uuid) else {
            return;
        };
        let enforce_deps = task
            .request
            .job
            .as_ref()
            .and_then(|j| state.jobs.get(j.uuid()))
            .map(|j| j.use_dependencies)
            .unwrap_or(false);

        // (predecessor name, finished, succeeded)
        let preds: Vec<(String, bool, bool)> = if enforce_deps {
            task.predecessors
                .iter()
                .filter_map(|p| state.tasks.get(p))
                .map(|p| {
                    (
                        p.handle.name().to_string(),
                        p.phase == Phase::Done,
                        p.raw_state == "Success",
                    )
                })
                .collect()
        } else {
            Vec::new()
        };

        let name = task.handle.name().to_string();
        let instance_count = task.request.instance_count;
        let results_bucket = task.request.results.as_ref().map(|b| *b.uuid());

        let Some(task) = state.tasks.get_mut(uuid) else {
            return;
        };

        match task.phase {
            Phase::Created | Phase::Done => {}
            Phase::Queued => {
                if let Some((failed, _, _)) = preds.iter().find(|(_, done, ok)| *done && !ok) {
                    task.phase = Phase::Done;
                    task.raw_state = "Cancelled".to_string();
                    task.errors
                        .push(format!("predecessor '{}' did not succeed", failed));
                } else if preds.iter().all(|(_, done, _)| *done) {
                    let steps = self.injection.run_steps.get(&name).copied().unwrap_or(1);
                    task.phase = Phase::Running {
                        remaining: steps.max(1),
                    };
                    task.raw_state = "FullyExecuting".to_string();
                } else {
                    task.raw_state = "Submitted".to_string();
                }
            }
            Phase::Running { remaining } if remaining > 1 => {
                task.phase = Phase::Running {
                    remaining: remaining - 1,
                };
            }
            Phase::Running { .. } => {
                task.phase = Phase::Done;
                if let Some(text) = self.injection.stdout.get(&name) {
                    task.stdout.push_str(text);
                }
                if let Some(errors) = self.injection.fail_with.get(&name) {
                    task.raw_state = "Failure".to_string();
                    task.errors.extend(errors.iter().cloned());
                } else if let Some(raw) = self.injection.terminal_state.get(&name) {
                    task.raw_state = raw.clone();
                } else {
                    task.raw_state = "Success".to_string();
                    if let Some(bucket) = results_bucket.and_then(|b| state.buckets.get_mut(&b)) {
                        for i in 0..instance_count {
                            bucket.files.insert(format!("{}-{}.out", name, i));
                        }
                    }
                }
            }
        }
    }
}

impl Default for SimulatedBatchService {
    fn default() -> Self {
        Self::new()
    }
}

fn list_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            list_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

fn format_hms(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn io_error(path: &Path, source: std::io::Error) -> RemoteError {
    RemoteError::Io {
        path: PathBuf::from(path),
        source,
    }
}

#[async_trait]
impl BatchService for SimulatedBatchService {
    async fn create_bucket(&self, name: &str) -> Result<BucketHandle, RemoteError> {
        let mut state = self.lock()?;
        state.calls.push(RemoteCall::CreateBucket(name.to_string()));
        let uuid = Uuid::new_v4();
        state.buckets.insert(
            uuid,
            SimBucket {
                name: name.to_string(),
                files: BTreeSet::new(),
                deleted: false,
            },
        );
        Ok(BucketHandle::new(uuid, name))
    }

    async fn sync_directory(
        &self,
        bucket: &BucketHandle,
        local: &Path,
    ) -> Result<(), RemoteError> {
        let mut files = Vec::new();
        list_files(local, local, &mut files).map_err(|e| io_error(local, e))?;

        let mut state = self.lock()?;
        state
            .calls
            .push(RemoteCall::SyncDirectory(bucket.name().to_string()));
        let sim = state
            .buckets
            .get_mut(bucket.uuid())
            .filter(|b| !b.deleted)
            .ok_or_else(|| RemoteError::NotFound(format!("bucket {}", bucket)))?;
        sim.files.extend(files);
        Ok(())
    }

    async fn add_file(&self, bucket: &BucketHandle, local: &Path) -> Result<(), RemoteError> {
        let metadata = std::fs::metadata(local).map_err(|e| io_error(local, e))?;
        if !metadata.is_file() {
            return Err(io_error(
                local,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut state = self.lock()?;
        state.calls.push(RemoteCall::AddFile(bucket.name().to_string()));
        let sim = state
            .buckets
            .get_mut(bucket.uuid())
            .filter(|b| !b.deleted)
            .ok_or_else(|| RemoteError::NotFound(format!("bucket {}", bucket)))?;
        sim.files.insert(file_name);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &BucketHandle) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        state
            .calls
            .push(RemoteCall::DeleteBucket(bucket.name().to_string()));
        let sim = state
            .buckets
            .get_mut(bucket.uuid())
            .ok_or_else(|| RemoteError::NotFound(format!("bucket {}", bucket)))?;
        sim.deleted = true;
        sim.files.clear();
        Ok(())
    }

    async fn create_job(
        &self,
        name: &str,
        use_dependencies: bool,
    ) -> Result<JobHandle, RemoteError> {
        let mut state = self.lock()?;
        state.calls.push(RemoteCall::CreateJob(name.to_string()));
        let uuid = Uuid::new_v4();
        state.jobs.insert(
            uuid,
            SimJob {
                name: name.to_string(),
                use_dependencies,
                submitted: false,
                deleted: false,
            },
        );
        Ok(JobHandle::new(uuid, name))
    }

    async fn submit_job(&self, job: &JobHandle) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        state.calls.push(RemoteCall::SubmitJob(job.name().to_string()));
        let sim = state
            .jobs
            .get_mut(job.uuid())
            .filter(|j| !j.deleted)
            .ok_or_else(|| RemoteError::NotFound(format!("job {}", job)))?;
        if sim.submitted {
            return Err(RemoteError::Rejected(format!(
                "job '{}' already submitted",
                sim.name
            )));
        }
        sim.submitted = true;
        Ok(())
    }

    async fn delete_job(&self, job: &JobHandle) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        state.calls.push(RemoteCall::DeleteJob(job.name().to_string()));
        let sim = state
            .jobs
            .get_mut(job.uuid())
            .ok_or_else(|| RemoteError::NotFound(format!("job {}", job)))?;
        sim.deleted = true;
        Ok(())
    }

    async fn create_task(&self, request: TaskRequest) -> Result<TaskHandle, RemoteError> {
        let mut state = self.lock()?;
        state
            .calls
            .push(RemoteCall::CreateTask(request.name.clone()));
        if let Some(job) = &request.job {
            if !state.jobs.get(job.uuid()).is_some_and(|j| !j.deleted) {
                return Err(RemoteError::NotFound(format!("job {}", job)));
            }
        }
        for bucket in request.resources.iter().chain(request.results.iter()) {
            if !state.buckets.get(bucket.uuid()).is_some_and(|b| !b.deleted) {
                return Err(RemoteError::NotFound(format!("bucket {}", bucket)));
            }
        }

        let uuid = Uuid::new_v4();
        let handle = TaskHandle::new(uuid, request.name.clone());
        state.tasks.insert(
            uuid,
            SimTask {
                handle: handle.clone(),
                request,
                predecessors: Vec::new(),
                phase: Phase::Created,
                raw_state: "Pending".to_string(),
                errors: Vec::new(),
                stdout: String::new(),
                deleted: false,
            },
        );
        Ok(handle)
    }

    async fn set_task_dependencies(
        &self,
        task: &TaskHandle,
        predecessors: &[TaskHandle],
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        state.calls.push(RemoteCall::SetDependencies {
            task: task.name().to_string(),
            predecessors: predecessors.iter().map(|p| p.name().to_string()).collect(),
        });
        for predecessor in predecessors {
            Self::task_ref(&state, predecessor)?;
        }
        let sim = Self::task_mut(&mut state, task)?;
        if sim.phase != Phase::Created {
            return Err(RemoteError::Rejected(format!(
                "task '{}' already submitted",
                task.name()
            )));
        }
        sim.predecessors = predecessors.iter().map(|p| *p.uuid()).collect();
        Ok(())
    }

    async fn submit_task(&self, task: &TaskHandle) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        state
            .calls
            .push(RemoteCall::SubmitTask(task.name().to_string()));
        if self.injection.reject_submit.iter().any(|n| n == task.name()) {
            return Err(RemoteError::Rejected(format!(
                "task '{}' refused by scheduler",
                task.name()
            )));
        }

        let job_ready = {
            let sim = Self::task_ref(&state, task)?;
            match &sim.request.job {
                Some(job) => state.jobs.get(job.uuid()).is_some_and(|j| j.submitted),
                None => true,
            }
        };
        if !job_ready {
            return Err(RemoteError::Rejected(format!(
                "job of task '{}' is not submitted",
                task.name()
            )));
        }

        let sim = Self::task_mut(&mut state, task)?;
        if sim.phase != Phase::Created {
            return Err(RemoteError::Rejected(format!(
                "task '{}' already submitted",
                task.name()
            )));
        }
        sim.phase = Phase::Queued;
        sim.raw_state = "Submitted".to_string();
        Ok(())
    }

    async fn wait(&self, task: &TaskHandle, _timeout: Duration) -> Result<bool, RemoteError> {
        let mut state = self.lock()?;
        state.calls.push(RemoteCall::Wait(task.name().to_string()));
        Self::consume_outage(&mut state)?;
        Self::task_ref(&state, task)?;
        self.step(&mut state, task.uuid());
        let sim = Self::task_ref(&state, task)?;
        Ok(sim.phase == Phase::Done)
    }

    async fn state(&self, task: &TaskHandle) -> Result<String, RemoteError> {
        let mut state = self.lock()?;
        state.calls.push(RemoteCall::State(task.name().to_string()));
        Self::consume_outage(&mut state)?;
        Ok(Self::task_ref(&state, task)?.raw_state.clone())
    }

    async fn errors(&self, task: &TaskHandle) -> Result<Vec<String>, RemoteError> {
        let state = self.lock()?;
        Ok(Self::task_ref(&state, task)?.errors.clone())
    }

    async fn execution_time(&self, task: &TaskHandle) -> Result<String, RemoteError> {
        let state = self.lock()?;
        let sim = Self::task_ref(&state, task)?;
        Ok(match self.injection.timings.get(task.name()) {
            Some((execution, _)) => execution.clone(),
            None => format_hms(u64::from(sim.request.instance_count) * 60),
        })
    }

    async fn wall_time(&self, task: &TaskHandle) -> Result<String, RemoteError> {
        let state = self.lock()?;
        Self::task_ref(&state, task)?;
        Ok(match self.injection.timings.get(task.name()) {
            Some((_, wall)) => wall.clone(),
            None => format_hms(60),
        })
    }

    async fn fresh_stdout(&self, task: &TaskHandle) -> Result<String, RemoteError> {
        let mut state = self.lock()?;
        let sim = Self::task_mut(&mut state, task)?;
        Ok(std::mem::take(&mut sim.stdout))
    }

    async fn download_results(&self, task: &TaskHandle, local: &Path) -> Result<(), RemoteError> {
        let files: Vec<String> = {
            let mut state = self.lock()?;
            state
                .calls
                .push(RemoteCall::DownloadResults(task.name().to_string()));
            let sim = Self::task_ref(&state, task)?;
            let Some(bucket) = &sim.request.results else {
                return Err(RemoteError::Rejected(format!(
                    "task '{}' has no result bucket",
                    task.name()
                )));
            };
            let whitelist = sim.request.results_whitelist.clone();
            state
                .buckets
                .get(bucket.uuid())
                .map(|b| {
                    b.files
                        .iter()
                        .filter(|f| whitelist.as_deref().is_none_or(|w| f.contains(w)))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        tokio::fs::create_dir_all(local)
            .await
            .map_err(|e| io_error(local, e))?;
        for file in files {
            let path = local.join(&file);
            tokio::fs::write(&path, format!("{}\n", task.name()))
                .await
                .map_err(|e| io_error(&path, e))?;
        }
        Ok(())
    }

    async fn delete_task(
        &self,
        task: &TaskHandle,
        purge_resources: bool,
        purge_results: bool,
    ) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        state
            .calls
            .push(RemoteCall::DeleteTask(task.name().to_string()));
        let sim = Self::task_mut(&mut state, task)?;
        sim.deleted = true;
        if sim.phase != Phase::Done {
            sim.phase = Phase::Done;
            sim.raw_state = "Cancelled".to_string();
        }

        let mut purged: Vec<Uuid> = Vec::new();
        if purge_resources {
            purged.extend(sim.request.resources.iter().map(|b| *b.uuid()));
        }
        if purge_results {
            purged.extend(sim.request.results.iter().map(|b| *b.uuid()));
        }
        for uuid in purged {
            if let Some(bucket) = state.buckets.get_mut(&uuid) {
                bucket.deleted = true;
                bucket.files.clear();
            }
        }
        Ok(())
    }
}
