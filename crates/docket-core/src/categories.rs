use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::category::{
    Category, CategoryPatch, DeletePolicy, FALLBACK_CATEGORY, default_categories, is_known_icon,
};
use crate::datastore::DataStore;
use crate::error::{StoreError, StoreResult};
use crate::identity::Identity;
use crate::tasks::TaskRepository;

/// Whether two categories may share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamePolicy {
    #[default]
    AllowDuplicates,
    RejectDuplicates,
}

/// Outcome of a category delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRemoval {
    pub category: Category,
    pub tasks_reassigned: usize,
    pub tasks_deleted: usize,
}

#[derive(Debug)]
pub struct CategoryRepository<'s> {
    store: &'s DataStore,
    identity: Identity,
    categories: Vec<Category>,
    names: NamePolicy,
    write_error: Option<StoreError>,
}

impl<'s> CategoryRepository<'s> {
    #[instrument(skip(store), fields(username = %identity.username()))]
    pub fn load(store: &'s DataStore, identity: Identity, names: NamePolicy) -> Self {
        let categories = store.load_categories(identity.username());
        debug!(count = categories.len(), "loaded category repository");
        Self {
            store,
            identity,
            categories,
            names,
            write_error: None,
        }
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn get(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.name == name)
    }

    /// Accepts an id, or a name compared case-insensitively.
    pub fn resolve(&self, token: &str) -> StoreResult<&Category> {
        self.get(token)
            .or_else(|| {
                self.categories
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(token))
            })
            .ok_or_else(|| StoreError::not_found("category", token))
    }

    pub fn take_persistence_error(&mut self) -> Option<StoreError> {
        self.write_error.take()
    }

    #[instrument(skip(self, category), fields(name = %category.name))]
    pub fn create(&mut self, mut category: Category) -> StoreResult<Category> {
        category.name = category.name.trim().to_string();
        self.validate(&category, None)?;
        if category.id.trim().is_empty() || self.get(&category.id).is_some() {
            category.id = Uuid::new_v4().to_string();
        }

        self.categories.push(category.clone());
        info!(id = %category.id, "category created");
        self.persist();
        Ok(category)
    }

    /// Applies `patch`. Tasks filed under the old name follow a rename and
    /// pick up the new color and icon.
    #[instrument(skip(self, patch, tasks, now), fields(id = %id))]
    pub fn update(
        &mut self,
        id: &str,
        patch: CategoryPatch,
        tasks: &mut TaskRepository<'_>,
        now: DateTime<Utc>,
    ) -> StoreResult<Category> {
        self.ensure_same_owner(tasks)?;
        let idx = self
            .categories
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| StoreError::not_found("category", id))?;

        let current = self.categories[idx].clone();
        let mut updated = current.clone();
        if let Some(name) = patch.name {
            updated.name = name.trim().to_string();
        }
        if let Some(color) = patch.color {
            updated.color = color;
        }
        if let Some(icon) = patch.icon {
            updated.icon = icon;
        }

        if current.is_protected() && updated.name != current.name {
            return Err(StoreError::validation(format!(
                "category {} cannot be renamed",
                current.name
            )));
        }
        self.validate(&updated, Some(idx))?;

        if updated != current {
            let moved = tasks.reassign_category(&current.name, &updated, now);
            debug!(moved, "tasks refreshed for category change");
        }
        self.categories[idx] = updated.clone();
        self.persist();
        Ok(updated)
    }

    /// Removes a category, first reassigning or deleting its tasks. Deleting
    /// an unknown id is a no-op.
    #[instrument(skip(self, tasks, now), fields(id = %id))]
    pub fn delete(
        &mut self,
        id: &str,
        policy: DeletePolicy,
        tasks: &mut TaskRepository<'_>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<CategoryRemoval>> {
        self.ensure_same_owner(tasks)?;
        let Some(idx) = self.categories.iter().position(|c| c.id == id) else {
            debug!("delete of absent category ignored");
            return Ok(None);
        };
        let category = self.categories[idx].clone();
        if category.is_protected() {
            return Err(StoreError::validation(format!(
                "category {} cannot be deleted",
                category.name
            )));
        }

        let mut removal = CategoryRemoval {
            category: category.clone(),
            tasks_reassigned: 0,
            tasks_deleted: 0,
        };
        match policy {
            DeletePolicy::Reassign => {
                let fallback = self.ensure_fallback();
                removal.tasks_reassigned = tasks.reassign_category(&category.name, &fallback, now);
            }
            DeletePolicy::DeleteTasks => {
                removal.tasks_deleted = tasks.remove_in_category(&category.name);
            }
        }

        self.categories.retain(|c| c.id != category.id);
        info!(
            name = %category.name,
            reassigned = removal.tasks_reassigned,
            deleted = removal.tasks_deleted,
            "category deleted"
        );
        self.persist();
        Ok(Some(removal))
    }

    fn validate(&self, category: &Category, existing: Option<usize>) -> StoreResult<()> {
        if category.name.is_empty() {
            return Err(StoreError::validation("category name must not be empty"));
        }
        if let Some(icon) = category.icon.as_deref()
            && !is_known_icon(icon)
        {
            return Err(StoreError::validation(format!("unknown icon: {icon}")));
        }
        if self.names == NamePolicy::RejectDuplicates {
            let clash = self
                .categories
                .iter()
                .enumerate()
                .any(|(idx, c)| Some(idx) != existing && c.name.eq_ignore_ascii_case(&category.name));
            if clash {
                return Err(StoreError::validation(format!(
                    "category name already in use: {}",
                    category.name
                )));
            }
        }
        Ok(())
    }

    /// The fallback bucket, restored from the defaults if a stored set
    /// lacks it.
    fn ensure_fallback(&mut self) -> Category {
        if let Some(existing) = self.find_by_name(FALLBACK_CATEGORY) {
            return existing.clone();
        }
        let restored = default_categories()
            .into_iter()
            .find(|c| c.name == FALLBACK_CATEGORY)
            .unwrap_or_else(|| Category::new(FALLBACK_CATEGORY, "slate", None));
        warn!("fallback category missing; restoring it");
        self.categories.push(restored.clone());
        restored
    }

    fn ensure_same_owner(&self, tasks: &TaskRepository<'_>) -> StoreResult<()> {
        if tasks.identity() != &self.identity {
            return Err(StoreError::validation(
                "task and category repositories belong to different users",
            ));
        }
        Ok(())
    }

    fn persist(&mut self) {
        if let Err(err) = self
            .store
            .save_categories(self.identity.username(), &self.categories)
        {
            warn!(error = %format!("{err:#}"), "category write failed; in-memory state kept");
            self.write_error = Some(err);
        }
    }
}
