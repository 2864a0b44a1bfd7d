//! Boundary to an external advice provider.
//!
//! Advisors see an owned snapshot of the user's tasks and never touch the
//! repositories. Any failure on their side collapses into
//! [`AdviceOutcome::Unavailable`].

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::identity::Username;
use crate::task::{Priority, Task, TaskDraft};

#[derive(Debug, Clone, Serialize)]
pub struct AdvisorySnapshot {
    pub username: Username,
    pub tasks: Vec<Task>,
}

impl AdvisorySnapshot {
    pub fn new(username: &Username, tasks: &[Task]) -> Self {
        Self {
            username: username.clone(),
            tasks: tasks.to_vec(),
        }
    }
}

/// Structured draft completion returned by an advisor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSuggestion {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advice {
    Text(String),
    Draft(DraftSuggestion),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdviceOutcome {
    Ready(Advice),
    Unavailable,
}

pub trait Advisor {
    fn advise(&self, snapshot: &AdvisorySnapshot) -> anyhow::Result<Advice>;
}

#[instrument(skip_all, fields(username = %snapshot.username, tasks = snapshot.tasks.len()))]
pub fn consult<A: Advisor + ?Sized>(advisor: &A, snapshot: &AdvisorySnapshot) -> AdviceOutcome {
    match advisor.advise(snapshot) {
        Ok(Advice::Text(text)) if text.trim().is_empty() => {
            debug!("advisor returned blank text");
            AdviceOutcome::Unavailable
        }
        Ok(advice) => AdviceOutcome::Ready(advice),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "advice unavailable");
            AdviceOutcome::Unavailable
        }
    }
}

impl TaskDraft {
    /// Fills fields the user left empty; anything already set wins.
    pub fn merge_suggestion(&mut self, suggestion: DraftSuggestion) {
        if self.description.as_deref().is_none_or(|d| d.trim().is_empty()) {
            self.description = suggestion.description.filter(|d| !d.trim().is_empty());
        }
        if self.priority.is_none() {
            self.priority = suggestion.priority;
        }
        if self.category.as_deref().is_none_or(|c| c.trim().is_empty()) {
            self.category = suggestion.category.filter(|c| !c.trim().is_empty());
        }
        if self.sub_tasks.is_empty() {
            self.sub_tasks = suggestion
                .sub_tasks
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
}
