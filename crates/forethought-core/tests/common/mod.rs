#![allow(dead_code)]

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use forethought_core::auth::{Credential, CredentialProvider, Session, StaticCredentials};
use forethought_core::clock::FixedClock;
use forethought_core::error::StoreError;
use forethought_core::lifecycle::Coordinator;
use forethought_core::recurrence::ResetPolicy;
use forethought_core::store::TaskStore;
use forethought_core::task::{CompletionChange, FieldPatch, Recurrence, Task, TaskCreate};
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    tasks: Vec<Task>,
    calls: usize,
    list_calls: usize,
    completion_writes: usize,
    fail_writes: bool,
}

/// In-memory store; clones share state so tests can inspect it after
/// handing one to a coordinator.
#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<State>>,
}

impl FakeStore {
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let store = Self::default();
        store.state.lock().tasks = tasks;
        store
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.lock().tasks.clone()
    }

    pub fn stored(&self, uuid: Uuid) -> Task {
        self.tasks()
            .into_iter()
            .find(|task| task.uuid == uuid)
            .expect("task is stored")
    }

    /// Every call of any kind.
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn completion_writes(&self) -> usize {
        self.state.lock().completion_writes
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    fn begin_write(&self) -> Result<parking_lot::MutexGuard<'_, State>, StoreError> {
        let mut state = self.state.lock();
        state.calls += 1;
        if state.fail_writes {
            return Err(anyhow!("injected write failure").into());
        }
        Ok(state)
    }
}

#[async_trait]
impl TaskStore for FakeStore {
    async fn list_all(&self, _credential: &Credential) -> Result<Vec<Task>, StoreError> {
        let mut state = self.state.lock();
        state.calls += 1;
        state.list_calls += 1;
        Ok(state.tasks.clone())
    }

    async fn fetch(&self, _credential: &Credential, uuid: Uuid) -> Result<Task, StoreError> {
        let mut state = self.state.lock();
        state.calls += 1;
        state
            .tasks
            .iter()
            .find(|task| task.uuid == uuid)
            .cloned()
            .ok_or(StoreError::NotFound(uuid))
    }

    async fn create(&self, _credential: &Credential, task: Task) -> Result<Task, StoreError> {
        let mut state = self.begin_write()?;
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn update_completion(
        &self,
        _credential: &Credential,
        uuid: Uuid,
        change: CompletionChange,
    ) -> Result<Task, StoreError> {
        let mut state = self.begin_write()?;
        state.completion_writes += 1;
        let task = state
            .tasks
            .iter_mut()
            .find(|task| task.uuid == uuid)
            .ok_or(StoreError::NotFound(uuid))?;
        task.apply_completion(&change);
        Ok(task.clone())
    }

    async fn update_fields(
        &self,
        _credential: &Credential,
        uuid: Uuid,
        patch: FieldPatch,
    ) -> Result<Task, StoreError> {
        let mut state = self.begin_write()?;
        let task = state
            .tasks
            .iter_mut()
            .find(|task| task.uuid == uuid)
            .ok_or(StoreError::NotFound(uuid))?;
        task.apply_patch(&patch);
        Ok(task.clone())
    }

    async fn delete(&self, _credential: &Credential, uuid: Uuid) -> Result<(), StoreError> {
        let mut state = self.begin_write()?;
        let before = state.tasks.len();
        state.tasks.retain(|task| task.uuid != uuid);
        if state.tasks.len() == before {
            return Err(StoreError::NotFound(uuid));
        }
        Ok(())
    }
}

/// Credential provider that always fails, as when the auth service is down.
#[derive(Debug, Default)]
pub struct UnavailableCredentials;

#[async_trait]
impl CredentialProvider for UnavailableCredentials {
    async fn credential(&self) -> anyhow::Result<Credential> {
        Err(anyhow!("token endpoint unreachable"))
    }
}

pub fn session() -> Session {
    Session::new(Arc::new(StaticCredentials::new(
        Some("tester".to_string()),
        Some("secret".to_string()),
    )))
}

pub fn unavailable_session() -> Session {
    Session::new(Arc::new(UnavailableCredentials))
}

pub fn utc(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, hh, mm, 0)
        .single()
        .expect("valid instant")
}

/// A recurring task last completed at `at` with the given tally.
pub fn completed_task(recurrence: Recurrence, at: DateTime<Utc>, count: u64) -> Task {
    let mut create = TaskCreate::new("Morning run");
    create.recurrence = recurrence;
    let mut task = Task::new_active(create.validate().expect("valid create"), at);
    task.completed = true;
    task.completion_count = count;
    task.last_completed_at = Some(at);
    task
}

pub struct Harness {
    pub coordinator: Coordinator<FakeStore>,
    pub store: FakeStore,
    pub clock: Arc<FixedClock>,
}

/// Coordinator over `tasks` with a UTC reset policy and a clock pinned at
/// `now`.
pub fn harness(tasks: Vec<Task>, now: DateTime<Utc>) -> Harness {
    let store = FakeStore::with_tasks(tasks);
    let clock = Arc::new(FixedClock::new(now));
    let coordinator = Coordinator::new(store.clone(), ResetPolicy::default(), clock.clone());
    Harness {
        coordinator,
        store,
        clock,
    }
}
