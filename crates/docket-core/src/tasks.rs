use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::category::Category;
use crate::datastore::DataStore;
use crate::error::{StoreError, StoreResult};
use crate::identity::{Identity, XP_PER_COMPLETION};
use crate::task::{Status, SubTask, Task, TaskDraft, TaskPatch};

/// Canonical task list of the active user. Every successful mutation is
/// written through to the store as a full-collection overwrite.
#[derive(Debug)]
pub struct TaskRepository<'s> {
    store: &'s DataStore,
    identity: Identity,
    tasks: Vec<Task>,
    write_error: Option<StoreError>,
}

impl<'s> TaskRepository<'s> {
    #[instrument(skip(store), fields(username = %identity.username()))]
    pub fn load(store: &'s DataStore, identity: Identity) -> Self {
        let tasks = store.load_tasks(identity.username());
        debug!(count = tasks.len(), "loaded task repository");
        Self {
            store,
            identity,
            tasks,
            write_error: None,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Resolves a full id or a unique id prefix.
    pub fn resolve_id(&self, token: &str) -> StoreResult<Uuid> {
        let needle = token.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return Err(StoreError::validation("task id must not be empty"));
        }
        let mut matches = self
            .tasks
            .iter()
            .filter(|t| t.id.to_string().starts_with(&needle));
        let first = matches
            .next()
            .ok_or_else(|| StoreError::not_found("task", token))?;
        if matches.next().is_some() {
            return Err(StoreError::validation(format!(
                "task id prefix is ambiguous: {token}"
            )));
        }
        Ok(first.id)
    }

    /// The last write failure, reported once.
    pub fn take_persistence_error(&mut self) -> Option<StoreError> {
        self.write_error.take()
    }

    #[instrument(skip(self, draft, categories, now), fields(username = %self.identity.username()))]
    pub fn create(
        &mut self,
        draft: TaskDraft,
        categories: &[Category],
        now: DateTime<Utc>,
    ) -> StoreResult<Task> {
        if draft.title.trim().is_empty() {
            return Err(StoreError::validation("task title must not be empty"));
        }
        let keep_color = draft.color.is_some();
        let keep_icon = draft.icon.is_some();

        let mut task = draft.into_task(now);
        while self.get(task.id).is_some() {
            task.id = Uuid::new_v4();
        }
        stamp_visual(&mut task, categories, !keep_color, !keep_icon);

        self.tasks.insert(0, task.clone());
        info!(id = %task.id, category = %task.category, "task created");
        self.persist();
        Ok(task)
    }

    #[instrument(skip(self, patch, categories, now), fields(id = %id))]
    pub fn update(
        &mut self,
        id: Uuid,
        patch: TaskPatch,
        categories: &[Category],
        now: DateTime<Utc>,
    ) -> StoreResult<Task> {
        if let Some(title) = &patch.title
            && title.trim().is_empty()
        {
            return Err(StoreError::validation("task title must not be empty"));
        }

        let idx = self.index_of(id)?;
        let was_completed = self.tasks[idx].is_completed();
        let category_changed = patch
            .category
            .as_ref()
            .is_some_and(|name| *name != self.tasks[idx].category);
        let restamp_color = category_changed && patch.color.is_none();
        let restamp_icon = category_changed && patch.icon.is_none();

        let task = &mut self.tasks[idx];
        patch.apply(task);
        stamp_visual(task, categories, restamp_color, restamp_icon);
        task.updated_at = now;
        let updated = task.clone();

        debug!(status = ?updated.status, "task updated");
        self.persist();
        if !was_completed && updated.is_completed() {
            self.reward_completion();
        }
        Ok(updated)
    }

    /// Removes the task if present. Deleting an unknown id is a no-op.
    #[instrument(skip(self), fields(id = %id))]
    pub fn delete(&mut self, id: Uuid) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        if self.tasks.len() == before {
            debug!("delete of absent task ignored");
            return false;
        }
        info!("task deleted");
        self.persist();
        true
    }

    /// Copies a task under a fresh id. The copy is neither favorite nor
    /// pinned and sits directly after its source.
    #[instrument(skip(self, now), fields(id = %id))]
    pub fn duplicate(&mut self, id: Uuid, now: DateTime<Utc>) -> StoreResult<Task> {
        let idx = self.index_of(id)?;
        let mut copy = self.tasks[idx].clone();
        copy.id = Uuid::new_v4();
        copy.title = format!("{} (copy)", copy.title);
        copy.is_favorite = false;
        copy.is_pinned = false;
        copy.created_at = now;
        copy.updated_at = now;
        for sub in &mut copy.sub_tasks {
            sub.id = Uuid::new_v4();
        }

        self.tasks.insert(idx + 1, copy.clone());
        info!(copy = %copy.id, "task duplicated");
        self.persist();
        Ok(copy)
    }

    #[instrument(skip(self, now), fields(id = %id))]
    pub fn set_status(&mut self, id: Uuid, status: Status, now: DateTime<Utc>) -> StoreResult<Task> {
        let idx = self.index_of(id)?;
        let task = &mut self.tasks[idx];
        let was_completed = task.is_completed();
        task.set_status(status);
        task.updated_at = now;
        let updated = task.clone();

        info!(status = ?status, "task status changed");
        self.persist();
        if !was_completed && updated.is_completed() {
            self.reward_completion();
        }
        Ok(updated)
    }

    /// Flips `is_pinned`; `None` when the task does not exist.
    pub fn toggle_pin(&mut self, id: Uuid, now: DateTime<Utc>) -> Option<Task> {
        self.toggle(id, now, |task| task.is_pinned = !task.is_pinned)
    }

    /// Flips `is_favorite`; `None` when the task does not exist.
    pub fn toggle_favorite(&mut self, id: Uuid, now: DateTime<Utc>) -> Option<Task> {
        self.toggle(id, now, |task| task.is_favorite = !task.is_favorite)
    }

    fn toggle(&mut self, id: Uuid, now: DateTime<Utc>, flip: impl FnOnce(&mut Task)) -> Option<Task> {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            debug!(id = %id, "toggle on absent task ignored");
            return None;
        };
        flip(task);
        task.updated_at = now;
        let updated = task.clone();
        self.persist();
        Some(updated)
    }

    #[instrument(skip(self, title, now), fields(id = %task_id))]
    pub fn add_subtask(&mut self, task_id: Uuid, title: &str, now: DateTime<Utc>) -> StoreResult<SubTask> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::validation("sub-task title must not be empty"));
        }
        let idx = self.index_of(task_id)?;
        let sub = SubTask::new(title);
        let task = &mut self.tasks[idx];
        task.sub_tasks.push(sub.clone());
        task.updated_at = now;
        self.persist();
        Ok(sub)
    }

    #[instrument(skip(self, now), fields(id = %task_id))]
    pub fn toggle_subtask(&mut self, task_id: Uuid, subtask_id: Uuid, now: DateTime<Utc>) -> StoreResult<SubTask> {
        let idx = self.index_of(task_id)?;
        let task = &mut self.tasks[idx];
        let sub = task
            .sub_tasks
            .iter_mut()
            .find(|s| s.id == subtask_id)
            .ok_or_else(|| StoreError::not_found("sub-task", subtask_id.to_string()))?;
        sub.is_completed = !sub.is_completed;
        let toggled = sub.clone();
        task.updated_at = now;
        self.persist();
        Ok(toggled)
    }

    #[instrument(skip(self, now), fields(id = %task_id))]
    pub fn remove_subtask(&mut self, task_id: Uuid, subtask_id: Uuid, now: DateTime<Utc>) -> StoreResult<()> {
        let idx = self.index_of(task_id)?;
        let task = &mut self.tasks[idx];
        let before = task.sub_tasks.len();
        task.sub_tasks.retain(|s| s.id != subtask_id);
        if task.sub_tasks.len() == before {
            return Err(StoreError::not_found("sub-task", subtask_id.to_string()));
        }
        task.updated_at = now;
        self.persist();
        Ok(())
    }

    /// Points every task filed under `from` at `to`, refreshing the copied
    /// color and icon. Returns the number of tasks moved.
    pub(crate) fn reassign_category(&mut self, from: &str, to: &Category, now: DateTime<Utc>) -> usize {
        let mut moved = 0;
        for task in self.tasks.iter_mut().filter(|t| t.category == from) {
            task.category = to.name.clone();
            task.color = Some(to.color.clone());
            task.icon = to.icon.clone();
            task.updated_at = now;
            moved += 1;
        }
        if moved > 0 {
            self.persist();
        }
        moved
    }

    pub(crate) fn remove_in_category(&mut self, name: &str) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.category != name);
        let removed = before - self.tasks.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    fn index_of(&self, id: Uuid) -> StoreResult<usize> {
        self.tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| StoreError::not_found("task", id.to_string()))
    }

    /// Write-through. A failure keeps the in-memory state and is held for
    /// [`Self::take_persistence_error`].
    fn persist(&mut self) {
        if let Err(err) = self.store.save_tasks(self.identity.username(), &self.tasks) {
            warn!(error = %format!("{err:#}"), "task write failed; in-memory state kept");
            self.write_error = Some(err);
        }
    }

    fn reward_completion(&self) {
        if let Err(err) = self
            .store
            .award_xp(self.identity.username(), XP_PER_COMPLETION)
        {
            warn!(error = %format!("{err:#}"), "failed to record completion xp");
        }
    }
}

fn stamp_visual(task: &mut Task, categories: &[Category], color: bool, icon: bool) {
    let Some(category) = categories.iter().find(|c| c.name == task.category) else {
        return;
    };
    if color {
        task.color = Some(category.color.clone());
    }
    if icon {
        task.icon = category.icon.clone();
    }
}
