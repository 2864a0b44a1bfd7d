use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::FALLBACK_CATEGORY;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// Recorded for external consumers; nothing here schedules occurrences.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubTask {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub is_completed: bool,
}

impl SubTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            is_completed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: Uuid,

    pub title: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub status: Status,

    /// Name of the owning category. May dangle.
    pub category: String,

    #[serde(default)]
    pub color: Option<String>,

    #[serde(default)]
    pub icon: Option<String>,

    pub due_date: NaiveDate,

    #[serde(default)]
    pub reminder_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub recurrence: Recurrence,

    #[serde(default)]
    pub sub_tasks: Vec<SubTask>,

    #[serde(default)]
    pub is_favorite: bool,

    #[serde(default)]
    pub is_pinned: bool,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new_pending(title: String, category: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description: None,
            priority: Priority::default(),
            status: Status::Pending,
            category,
            color: None,
            icon: None,
            due_date: now.date_naive(),
            reminder_at: None,
            recurrence: Recurrence::None,
            sub_tasks: vec![],
            is_favorite: false,
            is_pinned: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    /// Completed tasks drop out of the working set: setting `Completed`
    /// clears both the favorite and pinned flags.
    pub fn set_status(&mut self, status: Status) {
        if status == Status::Completed {
            self.is_favorite = false;
            self.is_pinned = false;
        }
        self.status = status;
    }

    pub fn completed_subtasks(&self) -> usize {
        self.sub_tasks.iter().filter(|s| s.is_completed).count()
    }
}

/// Caller-supplied fields for a new task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub reminder_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
    pub sub_tasks: Vec<String>,
    pub is_favorite: bool,
    pub is_pinned: Option<bool>,
}

impl TaskDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub(crate) fn into_task(self, now: DateTime<Utc>) -> Task {
        let category = self
            .category
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_CATEGORY.to_string());

        let mut task = Task::new_pending(self.title.trim().to_string(), category, now);
        task.description = self.description.filter(|d| !d.trim().is_empty());
        task.priority = self.priority.unwrap_or_default();
        task.color = self.color;
        task.icon = self.icon;
        if let Some(due) = self.due_date {
            task.due_date = due;
        }
        task.reminder_at = self.reminder_at;
        task.recurrence = self.recurrence.unwrap_or_default();
        task.sub_tasks = self
            .sub_tasks
            .into_iter()
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .map(SubTask::new)
            .collect();
        task.is_favorite = self.is_favorite;
        task.is_pinned = self.is_pinned.unwrap_or(false);
        task.set_status(self.status.unwrap_or_default());
        task
    }
}

/// Partial update merged into an existing task. `None` leaves a field as is;
/// the nested options on `description`/`reminder_at` allow clearing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub reminder_at: Option<Option<DateTime<Utc>>>,
    pub recurrence: Option<Recurrence>,
    pub sub_tasks: Option<Vec<SubTask>>,
    pub is_favorite: Option<bool>,
    pub is_pinned: Option<bool>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title.trim().to_string();
        }
        if let Some(description) = self.description {
            task.description = description.filter(|d| !d.trim().is_empty());
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(category) = self.category {
            task.category = category;
        }
        if let Some(color) = self.color {
            task.color = Some(color);
        }
        if let Some(icon) = self.icon {
            task.icon = Some(icon);
        }
        if let Some(due) = self.due_date {
            task.due_date = due;
        }
        if let Some(reminder) = self.reminder_at {
            task.reminder_at = reminder;
        }
        if let Some(recurrence) = self.recurrence {
            task.recurrence = recurrence;
        }
        if let Some(sub_tasks) = self.sub_tasks {
            task.sub_tasks = sub_tasks;
        }
        if let Some(favorite) = self.is_favorite {
            task.is_favorite = favorite;
        }
        if let Some(pinned) = self.is_pinned {
            task.is_pinned = pinned;
        }
        // last, so the completion rule wins over flags set in the same patch
        if let Some(status) = self.status {
            task.set_status(status);
        }
    }
}
