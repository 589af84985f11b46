//! Hold-to-complete interaction.
//!
//! [`HoldGesture`] is the pure state machine (`Idle → Holding → Committed →
//! Idle`); [`hold_to_complete`] drives it with a single-shot timer raced
//! against a release token. Undo never needs a hold: see [`click`].

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::Session;
use crate::error::{LifecycleError, Result};
use crate::lifecycle::{Coordinator, ToggleOutcome, VisibleId, VisibleTask};
use crate::store::TaskStore;
use crate::task::Interaction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    Idle,
    Holding { target: VisibleId, deadline: Instant },
    Committed { target: VisibleId },
}

/// Anything that ends a hold early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldInterrupt {
    Release,
    PointerLeave,
    MenuOpened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HoldRejection {
    #[error("task is already completed")]
    AlreadyCompleted,
    #[error("task completes by click, not by hold")]
    CheckboxTask,
    #[error("another hold is in progress")]
    Busy,
}

#[derive(Debug, Clone)]
pub struct HoldGesture {
    duration: Duration,
    state: HoldState,
}

impl HoldGesture {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: HoldState::Idle,
        }
    }

    pub fn state(&self) -> HoldState {
        self.state
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start holding `task`; returns the commit deadline.
    pub fn press(&mut self, task: &VisibleTask, now: Instant) -> std::result::Result<Instant, HoldRejection> {
        if self.state != HoldState::Idle {
            return Err(HoldRejection::Busy);
        }
        if task.is_completed() {
            return Err(HoldRejection::AlreadyCompleted);
        }
        if task.task.interaction != Interaction::Hold {
            return Err(HoldRejection::CheckboxTask);
        }

        let deadline = now + self.duration;
        self.state = HoldState::Holding {
            target: task.id,
            deadline,
        };
        Ok(deadline)
    }

    /// Abandon an in-flight hold. Returns whether one was abandoned.
    pub fn interrupt(&mut self, reason: HoldInterrupt) -> bool {
        match self.state {
            HoldState::Holding { target, .. } => {
                debug!(id = %target, ?reason, "hold abandoned");
                self.state = HoldState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Advance time; yields the target exactly once when the hold commits.
    pub fn tick(&mut self, now: Instant) -> Option<VisibleId> {
        match self.state {
            HoldState::Holding { target, deadline } if now >= deadline => {
                self.state = HoldState::Committed { target };
                Some(target)
            }
            _ => None,
        }
    }

    /// Return to idle once the committed toggle has been issued.
    pub fn settle(&mut self) {
        if let HoldState::Committed { .. } = self.state {
            self.state = HoldState::Idle;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HoldOutcome {
    Committed(ToggleOutcome),
    Abandoned,
    Rejected(HoldRejection),
}

/// Press `task` and commit after `duration` unless `release` fires first.
///
/// Cancellation wins a tie with the timer. The commit only ever completes:
/// if the task was completed while the hold was in flight the outcome is
/// [`HoldRejection::AlreadyCompleted`] and nothing is written.
pub async fn hold_to_complete<S: TaskStore>(
    coordinator: &Coordinator<S>,
    session: &Session,
    task: &VisibleTask,
    duration: Duration,
    release: CancellationToken,
) -> Result<HoldOutcome> {
    let mut gesture = HoldGesture::new(duration);
    let deadline = match gesture.press(task, Instant::now()) {
        Ok(deadline) => deadline,
        Err(rejection) => {
            debug!(id = %task.id, %rejection, "hold rejected");
            return Ok(HoldOutcome::Rejected(rejection));
        }
    };
    debug!(id = %task.id, ?duration, "hold started");

    tokio::select! {
        biased;
        _ = release.cancelled() => {
            gesture.interrupt(HoldInterrupt::Release);
            Ok(HoldOutcome::Abandoned)
        }
        _ = tokio::time::sleep_until(deadline) => {
            let Some(target) = gesture.tick(Instant::now()) else {
                return Ok(HoldOutcome::Abandoned);
            };
            info!(id = %target, "hold committed");
            let outcome = coordinator.complete(session, &target).await;
            gesture.settle();
            match outcome {
                Ok(toggled) => Ok(HoldOutcome::Committed(toggled)),
                Err(LifecycleError::AlreadyCompleted(_)) => {
                    debug!(id = %target, "task completed elsewhere during the hold");
                    Ok(HoldOutcome::Rejected(HoldRejection::AlreadyCompleted))
                }
                Err(err) => Err(err),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
    Complete,
    Undo,
    Ignore,
}

pub fn click_action(task: &VisibleTask) -> ClickAction {
    if task.is_completed() {
        ClickAction::Undo
    } else if task.task.interaction == Interaction::Checkbox {
        ClickAction::Complete
    } else {
        ClickAction::Ignore
    }
}

/// Direct click: undo a completion, or complete a checkbox task.
pub async fn click<S: TaskStore>(
    coordinator: &Coordinator<S>,
    session: &Session,
    task: &VisibleTask,
) -> Result<Option<ToggleOutcome>> {
    match click_action(task) {
        ClickAction::Ignore => Ok(None),
        ClickAction::Complete | ClickAction::Undo => coordinator.toggle(session, &task.id).await.map(Some),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::recurrence::Classification;
    use crate::task::{Task, TaskCreate};

    fn visible(interaction: Interaction, completed: bool) -> VisibleTask {
        let mut create = TaskCreate::new("Plank");
        create.interaction = interaction;
        let mut task = Task::new_active(create.validate().expect("valid"), Utc::now());
        task.completed = completed;
        VisibleTask {
            id: VisibleId::Stored(Uuid::new_v4()),
            classification: if completed {
                Classification::CompletedFresh
            } else {
                Classification::Active
            },
            resets_at: None,
            task,
        }
    }

    #[test]
    fn press_only_starts_on_active_hold_tasks() {
        let now = Instant::now();
        let mut gesture = HoldGesture::new(Duration::from_millis(500));

        assert_eq!(
            gesture.press(&visible(Interaction::Hold, true), now),
            Err(HoldRejection::AlreadyCompleted)
        );
        assert_eq!(
            gesture.press(&visible(Interaction::Checkbox, false), now),
            Err(HoldRejection::CheckboxTask)
        );
        assert_eq!(gesture.state(), HoldState::Idle);

        let deadline = gesture
            .press(&visible(Interaction::Hold, false), now)
            .expect("press accepted");
        assert_eq!(deadline, now + Duration::from_millis(500));
        assert_eq!(
            gesture.press(&visible(Interaction::Hold, false), now),
            Err(HoldRejection::Busy)
        );
    }

    #[test]
    fn interrupt_before_deadline_never_commits() {
        let now = Instant::now();
        let mut gesture = HoldGesture::new(Duration::from_millis(500));
        gesture
            .press(&visible(Interaction::Hold, false), now)
            .expect("press accepted");

        assert_eq!(gesture.tick(now + Duration::from_millis(499)), None);
        assert!(gesture.interrupt(HoldInterrupt::MenuOpened));
        assert_eq!(gesture.state(), HoldState::Idle);
        assert_eq!(gesture.tick(now + Duration::from_secs(10)), None);
        assert!(!gesture.interrupt(HoldInterrupt::PointerLeave));
    }

    #[test]
    fn deadline_commits_exactly_once() {
        let now = Instant::now();
        let task = visible(Interaction::Hold, false);
        let mut gesture = HoldGesture::new(Duration::from_millis(500));
        gesture.press(&task, now).expect("press accepted");

        assert_eq!(gesture.tick(now + Duration::from_millis(500)), Some(task.id));
        assert_eq!(gesture.state(), HoldState::Committed { target: task.id });
        assert_eq!(gesture.tick(now + Duration::from_millis(900)), None);

        gesture.settle();
        assert_eq!(gesture.state(), HoldState::Idle);
    }

    #[test]
    fn click_undoes_completed_and_completes_checkboxes() {
        assert_eq!(click_action(&visible(Interaction::Hold, true)), ClickAction::Undo);
        assert_eq!(click_action(&visible(Interaction::Checkbox, true)), ClickAction::Undo);
        assert_eq!(
            click_action(&visible(Interaction::Checkbox, false)),
            ClickAction::Complete
        );
        assert_eq!(click_action(&visible(Interaction::Hold, false)), ClickAction::Ignore);
    }
}
