//! Read-only projections over a task snapshot.

use std::str::FromStr;

use anyhow::anyhow;
use serde::Serialize;

use crate::category::{ALL_CATEGORY, Category, FALLBACK_COLOR, FALLBACK_ICON};
use crate::task::{Status, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TaskStats {
    pub active_total: usize,
    pub completed: usize,
    pub pending: usize,
    pub favorites: usize,
    /// Share of all tasks that are completed, rounded, 0..=100.
    pub percentage: u8,
}

pub fn compute_stats(tasks: &[Task]) -> TaskStats {
    let mut stats = TaskStats::default();
    for task in tasks {
        if task.is_completed() {
            stats.completed += 1;
            continue;
        }
        stats.active_total += 1;
        if task.is_favorite {
            stats.favorites += 1;
        }
        if task.status == Status::Pending {
            stats.pending += 1;
        }
    }

    if !tasks.is_empty() {
        let ratio = stats.completed as f64 / tasks.len() as f64;
        stats.percentage = (ratio * 100.0).round().clamp(0.0, 100.0) as u8;
    }
    stats
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ViewFilter {
    /// Everything not completed.
    #[default]
    All,
    Completed,
    Favorites,
    Pending,
}

impl ViewFilter {
    fn admits(self, task: &Task) -> bool {
        match self {
            ViewFilter::All => !task.is_completed(),
            ViewFilter::Completed => task.is_completed(),
            ViewFilter::Favorites => task.is_favorite && !task.is_completed(),
            ViewFilter::Pending => task.status == Status::Pending,
        }
    }
}

impl FromStr for ViewFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ViewFilter::All),
            "completed" | "done" => Ok(ViewFilter::Completed),
            "favorites" | "favorite" => Ok(ViewFilter::Favorites),
            "pending" => Ok(ViewFilter::Pending),
            other => Err(anyhow!("unknown view filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CategorySelection {
    #[default]
    All,
    Named(String),
}

impl CategorySelection {
    /// `"all"` in any case selects every category.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(ALL_CATEGORY) {
            CategorySelection::All
        } else {
            CategorySelection::Named(trimmed.to_string())
        }
    }

    fn admits(&self, task: &Task) -> bool {
        match self {
            CategorySelection::All => true,
            CategorySelection::Named(name) => task.category == *name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskQuery {
    pub category: CategorySelection,
    pub view: ViewFilter,
    pub search: String,
}

/// Category, then status view, then title search; pinned tasks are moved
/// ahead of the rest without reordering either group.
pub fn filter_tasks<'a>(tasks: &'a [Task], query: &TaskQuery) -> Vec<&'a Task> {
    let needle = query.search.trim().to_lowercase();

    let (pinned, unpinned): (Vec<&Task>, Vec<&Task>) = tasks
        .iter()
        .filter(|task| query.category.admits(task))
        .filter(|task| query.view.admits(task))
        .filter(|task| needle.is_empty() || task.title.to_lowercase().contains(&needle))
        .partition(|task| task.is_pinned);

    pinned.into_iter().chain(unpinned).collect()
}

/// Display color and icon for a task. Prefers the live category, then the
/// copy stored on the task, then fixed fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visual {
    pub color: String,
    pub icon: String,
}

pub fn resolve_visual(task: &Task, categories: &[Category]) -> Visual {
    let live = categories.iter().find(|c| c.name == task.category);
    let color = live
        .map(|c| c.color.clone())
        .or_else(|| task.color.clone())
        .unwrap_or_else(|| FALLBACK_COLOR.to_string());
    let icon = live
        .and_then(|c| c.icon.clone())
        .or_else(|| task.icon.clone())
        .unwrap_or_else(|| FALLBACK_ICON.to_string());
    Visual { color, icon }
}
