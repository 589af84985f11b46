//! Visible task set and the operations that mutate it.
//!
//! Stored records are the only persisted truth. The visible set is derived
//! from them on every publish: a recurring task whose completion has gone
//! stale is shown as a fresh active projection while its stored record keeps
//! the old completion until the user acts on it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::{Credential, Session};
use crate::clock::Clock;
use crate::datetime::{format_storage, storage_date_serde};
use crate::error::{LifecycleError, Result, ValidationError};
use crate::recurrence::{Classification, ResetPolicy};
use crate::store::TaskStore;
use crate::task::{CompletionChange, Task, TaskCreate, TaskPatch};

const RESET_MARKER: &str = ":reset:";

/// Identifier the presentation layer keys visible entries by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisibleId {
    Stored(Uuid),
    /// A stale completion shown as active for the cycle opened at `cycle`.
    Projected { uuid: Uuid, cycle: DateTime<Utc> },
}

impl VisibleId {
    /// The stored record this entry refers to.
    pub fn task_uuid(&self) -> Uuid {
        match self {
            VisibleId::Stored(uuid) | VisibleId::Projected { uuid, .. } => *uuid,
        }
    }

    pub fn is_projection(&self) -> bool {
        matches!(self, VisibleId::Projected { .. })
    }
}

impl From<Uuid> for VisibleId {
    fn from(uuid: Uuid) -> Self {
        VisibleId::Stored(uuid)
    }
}

impl fmt::Display for VisibleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisibleId::Stored(uuid) => write!(f, "{uuid}"),
            VisibleId::Projected { uuid, cycle } => {
                write!(f, "{uuid}{RESET_MARKER}{}", format_storage(*cycle))
            }
        }
    }
}

impl FromStr for VisibleId {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidId(s.to_string());
        let raw = s.trim();
        match raw.split_once(RESET_MARKER) {
            None => Uuid::parse_str(raw)
                .map(VisibleId::Stored)
                .map_err(|_| invalid()),
            Some((uuid, cycle)) => Ok(VisibleId::Projected {
                uuid: Uuid::parse_str(uuid).map_err(|_| invalid())?,
                cycle: storage_date_serde::parse(cycle).map_err(|_| invalid())?,
            }),
        }
    }
}

impl Serialize for VisibleId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleTask {
    pub id: VisibleId,
    pub classification: Classification,
    /// When a fresh recurring completion will roll over.
    pub resets_at: Option<DateTime<Utc>>,
    pub task: Task,
}

impl VisibleTask {
    pub fn is_completed(&self) -> bool {
        self.task.completed
    }
}

/// Derive the visible set from stored records at `now`.
pub fn materialize(stored: &[Task], policy: &ResetPolicy, now: DateTime<Utc>) -> Vec<VisibleTask> {
    stored
        .iter()
        .map(|task| {
            let classification = policy.classify(task, now);
            match classification {
                Classification::CompletedStale => {
                    let cycle = policy.next_reset_boundary(task.last_completed_at, task.recurrence);
                    let mut projected = task.clone();
                    projected.completed = false;
                    projected.last_completed_at = None;
                    VisibleTask {
                        id: VisibleId::Projected {
                            uuid: task.uuid,
                            cycle,
                        },
                        classification,
                        resets_at: None,
                        task: projected,
                    }
                }
                Classification::CompletedFresh if task.recurrence.is_recurring() => VisibleTask {
                    id: VisibleId::Stored(task.uuid),
                    classification,
                    resets_at: Some(
                        policy.next_reset_boundary(task.last_completed_at, task.recurrence),
                    ),
                    task: task.clone(),
                },
                _ => VisibleTask {
                    id: VisibleId::Stored(task.uuid),
                    classification,
                    resets_at: None,
                    task: task.clone(),
                },
            }
        })
        .collect()
}

/// A published, immutable snapshot of stored and visible tasks.
#[derive(Debug, Clone, Default)]
pub struct View {
    pub stored: Vec<Task>,
    pub visible: Vec<VisibleTask>,
    pub materialized_at: Option<DateTime<Utc>>,
}

impl View {
    pub fn find(&self, id: &VisibleId) -> Option<&VisibleTask> {
        self.visible.iter().find(|entry| entry.id == *id)
    }

    /// Look up by stored uuid regardless of projection marker.
    pub fn find_task(&self, uuid: Uuid) -> Option<&VisibleTask> {
        self.visible.iter().find(|entry| entry.id.task_uuid() == uuid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleEdge {
    Completed,
    Undone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToggleOutcome {
    pub edge: ToggleEdge,
    pub task: Task,
}

/// What deleting a task would cost the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionRisk {
    Plain,
    StreakAtRisk { count: u64 },
}

impl DeletionRisk {
    pub fn for_task(task: &Task) -> Self {
        if task.recurrence.is_recurring() && task.completion_count > 0 {
            DeletionRisk::StreakAtRisk {
                count: task.completion_count,
            }
        } else {
            DeletionRisk::Plain
        }
    }
}

enum Splice {
    Upsert(Task),
    Remove(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Toggle,
    /// Only the active-to-completed edge; never undoes.
    Complete,
}

/// Serializes mutations against one user's task list and publishes the
/// resulting visible set.
pub struct Coordinator<S> {
    store: S,
    policy: ResetPolicy,
    clock: Arc<dyn Clock>,
    gate: Mutex<()>,
    published: RwLock<Arc<View>>,
}

impl<S: TaskStore> Coordinator<S> {
    pub fn new(store: S, policy: ResetPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
            gate: Mutex::new(()),
            published: RwLock::new(Arc::new(View::default())),
        }
    }

    pub fn policy(&self) -> &ResetPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Last published view; no I/O.
    pub fn view(&self) -> Arc<View> {
        Arc::clone(&*self.published.read())
    }

    /// Reload the user's records and publish a fresh view.
    #[instrument(skip(self, session))]
    pub async fn refresh(&self, session: &Session) -> Result<Arc<View>> {
        let _gate = self.gate.lock().await;
        let credential = acquire(session).await?;
        let stored = self
            .store
            .list_all(&credential)
            .await
            .map_err(|err| storage_failure("list", err))?;
        Ok(self.publish(stored))
    }

    #[instrument(skip(self, session, create), fields(recurrence = %create.recurrence))]
    pub async fn create(&self, session: &Session, create: TaskCreate) -> Result<Task> {
        let fields = create.validate()?;
        let _gate = self.gate.lock().await;
        let credential = acquire(session).await?;

        let baseline = self.baseline(&credential).await?;

        let task = Task::new_active(fields, self.clock.now());
        let created = self
            .store
            .create(&credential, task)
            .await
            .map_err(|err| storage_failure("create", err))?;
        info!(uuid = %created.uuid, "created task");

        self.splice(baseline, Splice::Upsert(created.clone()));
        Ok(created)
    }

    /// Flip exactly one completion edge of the task behind `id`.
    ///
    /// The edge follows the logical state: a stale completion counts as
    /// active, so toggling it opens a new cycle instead of undoing the old.
    #[instrument(skip(self, session, id), fields(id = %id))]
    pub async fn toggle(&self, session: &Session, id: &VisibleId) -> Result<ToggleOutcome> {
        self.transition(session, id, Intent::Toggle).await
    }

    /// Complete the task behind `id`, failing with
    /// [`LifecycleError::AlreadyCompleted`] if it is completed by now.
    ///
    /// Used where the caller decided to complete some time ago, as a hold
    /// does when its timer fires.
    #[instrument(skip(self, session, id), fields(id = %id))]
    pub async fn complete(&self, session: &Session, id: &VisibleId) -> Result<ToggleOutcome> {
        self.transition(session, id, Intent::Complete).await
    }

    async fn transition(&self, session: &Session, id: &VisibleId, intent: Intent) -> Result<ToggleOutcome> {
        let _gate = self.gate.lock().await;
        let credential = acquire(session).await?;
        let uuid = id.task_uuid();
        let baseline = self.baseline(&credential).await?;

        let current = self
            .store
            .fetch(&credential, uuid)
            .await
            .map_err(|err| storage_failure("fetch", err))?;
        let now = self.clock.now();
        let classification = self.policy.classify(&current, now);

        if intent == Intent::Complete && classification.is_completed() {
            info!(%uuid, ?classification, "completion skipped; task already completed");
            return Err(LifecycleError::AlreadyCompleted(uuid));
        }

        if let VisibleId::Projected { cycle, .. } = id {
            let live_cycle = self
                .policy
                .next_reset_boundary(current.last_completed_at, current.recurrence);
            if classification != Classification::CompletedStale || live_cycle != *cycle {
                warn!(%uuid, ?classification, "toggle on expired projection");
                return Err(LifecycleError::ProjectionExpired(uuid));
            }
        }

        let (edge, change) = if classification.is_completed() {
            (
                ToggleEdge::Undone,
                CompletionChange {
                    completed: false,
                    last_completed_at: current.last_completed_at,
                    completion_count: current.completion_count,
                    at: now,
                },
            )
        } else {
            let bump = u64::from(current.recurrence.is_recurring());
            (
                ToggleEdge::Completed,
                CompletionChange {
                    completed: true,
                    last_completed_at: Some(now),
                    completion_count: current.completion_count.saturating_add(bump),
                    at: now,
                },
            )
        };

        let updated = self
            .store
            .update_completion(&credential, uuid, change)
            .await
            .map_err(|err| storage_failure("update_completion", err))?;
        info!(
            %uuid,
            ?edge,
            completion_count = updated.completion_count,
            "toggled task"
        );

        self.splice(baseline, Splice::Upsert(updated.clone()));
        Ok(ToggleOutcome {
            edge,
            task: updated,
        })
    }

    #[instrument(skip(self, session, id, patch), fields(id = %id))]
    pub async fn update(&self, session: &Session, id: &VisibleId, patch: TaskPatch) -> Result<Task> {
        let patch = patch.validate(self.clock.now())?;
        let _gate = self.gate.lock().await;
        let credential = acquire(session).await?;
        let baseline = self.baseline(&credential).await?;

        let updated = self
            .store
            .update_fields(&credential, id.task_uuid(), patch)
            .await
            .map_err(|err| storage_failure("update_fields", err))?;
        debug!(uuid = %updated.uuid, "updated task fields");

        self.splice(baseline, Splice::Upsert(updated.clone()));
        Ok(updated)
    }

    #[instrument(skip(self, session, id), fields(id = %id))]
    pub async fn delete(&self, session: &Session, id: &VisibleId) -> Result<()> {
        let _gate = self.gate.lock().await;
        let credential = acquire(session).await?;
        let uuid = id.task_uuid();
        let baseline = self.baseline(&credential).await?;

        self.store
            .delete(&credential, uuid)
            .await
            .map_err(|err| storage_failure("delete", err))?;
        info!(%uuid, "deleted task");

        self.splice(baseline, Splice::Remove(uuid));
        Ok(())
    }

    /// Risk of deleting `id`, judged from the published view.
    pub fn deletion_risk(&self, id: &VisibleId) -> Option<DeletionRisk> {
        self.view()
            .find_task(id.task_uuid())
            .map(|entry| DeletionRisk::for_task(&entry.task))
    }

    /// Stored records a mutation splices into: the published snapshot, or a
    /// fresh listing when nothing has been published yet. Call under the gate.
    async fn baseline(&self, credential: &Credential) -> Result<Vec<Task>> {
        let view = self.view();
        if view.materialized_at.is_some() {
            return Ok(view.stored.clone());
        }
        debug!("no snapshot published yet; listing before mutation");
        self.store
            .list_all(credential)
            .await
            .map_err(|err| storage_failure("list", err))
    }

    fn splice(&self, mut stored: Vec<Task>, change: Splice) {
        match change {
            Splice::Upsert(task) => match stored.iter_mut().find(|t| t.uuid == task.uuid) {
                Some(slot) => *slot = task,
                None => stored.push(task),
            },
            Splice::Remove(uuid) => stored.retain(|t| t.uuid != uuid),
        }
        self.publish(stored);
    }

    fn publish(&self, stored: Vec<Task>) -> Arc<View> {
        let now = self.clock.now();
        let visible = materialize(&stored, &self.policy, now);
        debug!(
            stored = stored.len(),
            projected = visible.iter().filter(|v| v.id.is_projection()).count(),
            "materialized visible set"
        );
        let view = Arc::new(View {
            stored,
            visible,
            materialized_at: Some(now),
        });
        *self.published.write() = Arc::clone(&view);
        view
    }
}

async fn acquire(session: &Session) -> Result<Credential> {
    session.credential().await.map_err(|err| {
        error!(error = %err, "credential fetch failed");
        LifecycleError::AuthUnavailable(err)
    })
}

fn storage_failure(op: &'static str, err: crate::error::StoreError) -> LifecycleError {
    let err = LifecycleError::from(err);
    if let LifecycleError::StorageUnavailable(inner) = &err {
        error!(op, error = %inner, "storage call failed; keeping last view");
    }
    err
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::task::Recurrence;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 8, 9, 0, 0).single().expect("valid now")
    }

    fn daily_done_at(at: DateTime<Utc>) -> Task {
        let mut create = TaskCreate::new("Journal");
        create.recurrence = Recurrence::Daily;
        let mut task = Task::new_active(create.validate().expect("valid"), at);
        task.completed = true;
        task.completion_count = 4;
        task.last_completed_at = Some(at);
        task
    }

    #[test]
    fn stale_completion_materializes_as_distinct_active_projection() {
        let stored = vec![daily_done_at(now() - chrono::Duration::days(1))];
        let visible = materialize(&stored, &ResetPolicy::default(), now());

        assert_eq!(visible.len(), 1);
        let entry = &visible[0];
        assert!(entry.id.is_projection());
        assert_ne!(entry.id, VisibleId::Stored(stored[0].uuid));
        assert_eq!(entry.id.task_uuid(), stored[0].uuid);
        assert!(!entry.task.completed);
        assert_eq!(entry.task.last_completed_at, None);
        assert_eq!(entry.task.completion_count, 4);
        // The stored record itself is untouched.
        assert!(stored[0].completed);
    }

    #[test]
    fn fresh_recurring_completion_reports_reset_instant() {
        let stored = vec![daily_done_at(now() - chrono::Duration::hours(1))];
        let visible = materialize(&stored, &ResetPolicy::default(), now());
        assert_eq!(visible[0].id, VisibleId::Stored(stored[0].uuid));
        assert_eq!(
            visible[0].resets_at,
            Some(Utc.with_ymd_and_hms(2026, 4, 9, 0, 0, 0).single().expect("valid"))
        );
    }

    #[test]
    fn visible_ids_round_trip_through_text() {
        let uuid = Uuid::new_v4();
        let projected = VisibleId::Projected {
            uuid,
            cycle: Utc.with_ymd_and_hms(2026, 4, 8, 0, 0, 0).single().expect("valid"),
        };
        let rendered = projected.to_string();
        assert!(rendered.ends_with(":reset:20260408T000000Z"));
        assert_eq!(rendered.parse::<VisibleId>(), Ok(projected));
        assert_eq!(uuid.to_string().parse::<VisibleId>(), Ok(VisibleId::Stored(uuid)));
        assert!(matches!(
            "nope".parse::<VisibleId>(),
            Err(ValidationError::InvalidId(_))
        ));
    }

    #[test]
    fn deletion_risk_flags_recurring_streaks_only() {
        let recurring = daily_done_at(now());
        assert_eq!(
            DeletionRisk::for_task(&recurring),
            DeletionRisk::StreakAtRisk { count: 4 }
        );

        let mut one_off = recurring.clone();
        one_off.recurrence = Recurrence::None;
        assert_eq!(DeletionRisk::for_task(&one_off), DeletionRisk::Plain);

        let mut fresh = recurring;
        fresh.completion_count = 0;
        assert_eq!(DeletionRisk::for_task(&fresh), DeletionRisk::Plain);
    }
}
