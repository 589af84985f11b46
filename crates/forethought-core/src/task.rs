use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::storage_date_serde;
use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

impl Recurrence {
    pub fn is_recurring(self) -> bool {
        self != Recurrence::None
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recurrence {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Recurrence::None),
            "daily" => Ok(Recurrence::Daily),
            "weekly" => Ok(Recurrence::Weekly),
            "monthly" => Ok(Recurrence::Monthly),
            _ => Err(ValidationError::UnknownRecurrence(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Interaction {
    #[default]
    Checkbox,
    Hold,
}

impl Interaction {
    pub fn as_str(self) -> &'static str {
        match self {
            Interaction::Checkbox => "checkbox",
            Interaction::Hold => "hold",
        }
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interaction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "checkbox" | "check" => Ok(Interaction::Checkbox),
            "hold" => Ok(Interaction::Hold),
            _ => Err(ValidationError::UnknownInteraction(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub uuid: Uuid,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub recurrence: Recurrence,

    #[serde(default)]
    pub completion_count: u64,

    /// Malformed values load as `None`.
    #[serde(default, with = "storage_date_serde::lenient_option")]
    pub last_completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub interaction: Interaction,

    /// Minutes. Only meaningful for [`Interaction::Hold`].
    #[serde(default)]
    pub duration_goal: u32,

    #[serde(with = "storage_date_serde")]
    pub entry: DateTime<Utc>,

    #[serde(with = "storage_date_serde")]
    pub modified: DateTime<Utc>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Task {
    pub fn new_active(fields: TaskFields, now: DateTime<Utc>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            text: fields.text,
            completed: false,
            recurrence: fields.recurrence,
            completion_count: 0,
            last_completed_at: None,
            interaction: fields.interaction,
            duration_goal: fields.duration_goal,
            entry: now,
            modified: now,
            extra: BTreeMap::new(),
        }
    }

    pub fn apply_patch(&mut self, patch: &FieldPatch) {
        if let Some(text) = patch.text.as_ref() {
            self.text = text.clone();
        }
        if let Some(recurrence) = patch.recurrence {
            self.recurrence = recurrence;
        }
        if let Some(interaction) = patch.interaction {
            self.interaction = interaction;
        }
        if let Some(duration_goal) = patch.duration_goal {
            self.duration_goal = duration_goal;
        }
        self.modified = patch.at;
    }

    pub fn apply_completion(&mut self, change: &CompletionChange) {
        self.completed = change.completed;
        self.last_completed_at = change.last_completed_at;
        self.completion_count = change.completion_count;
        self.modified = change.at;
    }
}

/// Raw create request, validated by [`TaskCreate::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCreate {
    pub text: String,
    #[serde(default)]
    pub recurrence: Recurrence,
    #[serde(default)]
    pub interaction: Interaction,
    #[serde(default)]
    pub duration_goal: i64,
}

impl TaskCreate {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            recurrence: Recurrence::None,
            interaction: Interaction::Checkbox,
            duration_goal: 0,
        }
    }

    pub fn validate(self) -> Result<TaskFields, ValidationError> {
        Ok(TaskFields {
            text: validate_text(&self.text)?,
            recurrence: self.recurrence,
            interaction: self.interaction,
            duration_goal: validate_duration(self.duration_goal)?,
        })
    }
}

/// Descriptive fields of a task that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFields {
    pub text: String,
    pub recurrence: Recurrence,
    pub interaction: Interaction,
    pub duration_goal: u32,
}

/// Raw edit request. Completion state is not editable here.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskPatch {
    pub text: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub interaction: Option<Interaction>,
    pub duration_goal: Option<i64>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.recurrence.is_none()
            && self.interaction.is_none()
            && self.duration_goal.is_none()
    }

    /// Validate, stamping the resulting write with `at`.
    pub fn validate(self, at: DateTime<Utc>) -> Result<FieldPatch, ValidationError> {
        Ok(FieldPatch {
            text: self.text.as_deref().map(validate_text).transpose()?,
            recurrence: self.recurrence,
            interaction: self.interaction,
            duration_goal: self.duration_goal.map(validate_duration).transpose()?,
            at,
        })
    }
}

/// Descriptive-field write produced by [`TaskPatch::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPatch {
    pub text: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub interaction: Option<Interaction>,
    pub duration_goal: Option<u32>,
    pub at: DateTime<Utc>,
}

/// Completion state written by a toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionChange {
    pub completed: bool,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub completion_count: u64,
    pub at: DateTime<Utc>,
}

fn validate_text(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    Ok(trimmed.to_string())
}

fn validate_duration(minutes: i64) -> Result<u32, ValidationError> {
    if minutes < 0 {
        return Err(ValidationError::NegativeDuration(minutes));
    }
    u32::try_from(minutes).map_err(|_| ValidationError::DurationOutOfRange(minutes))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn create_rejects_blank_text() {
        let err = TaskCreate::new("   ").validate().expect_err("blank text");
        assert_eq!(err, ValidationError::EmptyText);
    }

    #[test]
    fn create_rejects_negative_duration() {
        let mut create = TaskCreate::new("Stretch");
        create.interaction = Interaction::Hold;
        create.duration_goal = -5;
        let err = create.validate().expect_err("negative duration");
        assert_eq!(err, ValidationError::NegativeDuration(-5));
    }

    #[test]
    fn create_trims_text() {
        let fields = TaskCreate::new("  Water plants ").validate().expect("valid");
        assert_eq!(fields.text, "Water plants");
    }

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("Daily".parse::<Recurrence>(), Ok(Recurrence::Daily));
        assert_eq!("HOLD".parse::<Interaction>(), Ok(Interaction::Hold));
        assert!(matches!(
            "fortnightly".parse::<Recurrence>(),
            Err(ValidationError::UnknownRecurrence(_))
        ));
        assert!(matches!(
            "swipe".parse::<Interaction>(),
            Err(ValidationError::UnknownInteraction(_))
        ));
    }

    #[test]
    fn patch_leaves_completion_state_alone() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).single().expect("valid now");
        let edited = now + chrono::Duration::hours(2);
        let mut task = Task::new_active(
            TaskCreate::new("Read").validate().expect("valid"),
            now,
        );
        task.completed = true;
        task.completion_count = 3;
        task.last_completed_at = Some(now);

        let patch = TaskPatch {
            text: Some("Read 20 pages".to_string()),
            recurrence: Some(Recurrence::Daily),
            ..TaskPatch::default()
        }
        .validate(edited)
        .expect("valid patch");
        task.apply_patch(&patch);

        assert_eq!(task.text, "Read 20 pages");
        assert_eq!(task.recurrence, Recurrence::Daily);
        assert!(task.completed);
        assert_eq!(task.completion_count, 3);
        assert_eq!(task.last_completed_at, Some(now));
        assert_eq!(task.modified, edited);
    }

    #[test]
    fn malformed_last_completed_at_loads_as_absent() {
        let raw = r#"{"uuid":"6f1c1f3e-8a53-4c5e-9d1f-1c2b3a4d5e6f","text":"Run","completed":true,"recurrence":"daily","completion_count":2,"last_completed_at":"not-a-date","entry":"20260301T080000Z","modified":"20260301T080000Z"}"#;
        let task: Task = serde_json::from_str(raw).expect("lenient parse");
        assert!(task.completed);
        assert_eq!(task.last_completed_at, None);
        assert_eq!(task.interaction, Interaction::Checkbox);
    }
}
