use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the pseudo-category that selects every task.
pub const ALL_CATEGORY: &str = "All";

/// Name of the always-present bucket receiving orphaned tasks.
pub const FALLBACK_CATEGORY: &str = "Other";

pub const FALLBACK_COLOR: &str = "slate";
pub const FALLBACK_ICON: &str = "tag";

/// Icon keys a category may carry.
pub const ICON_REGISTRY: &[&str] = &[
    "list", "briefcase", "user", "tag", "heart", "cart", "book", "home", "star", "bolt",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub icon: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>, color: impl Into<String>, icon: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            color: color.into(),
            icon,
        }
    }

    fn builtin(id: &str, name: &str, color: &str, icon: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            icon: Some(icon.to_string()),
        }
    }

    /// `All` and the fallback bucket cannot be removed.
    pub fn is_protected(&self) -> bool {
        self.name.eq_ignore_ascii_case(ALL_CATEGORY)
            || self.name.eq_ignore_ascii_case(FALLBACK_CATEGORY)
    }
}

/// Set shown to an account with no stored categories.
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::builtin("all", ALL_CATEGORY, "indigo", "list"),
        Category::builtin("work", "Work", "blue", "briefcase"),
        Category::builtin("personal", "Personal", "emerald", "user"),
        Category::builtin("other", FALLBACK_CATEGORY, FALLBACK_COLOR, FALLBACK_ICON),
    ]
}

pub fn is_known_icon(icon: &str) -> bool {
    ICON_REGISTRY.contains(&icon)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub icon: Option<Option<String>>,
}

/// What happens to tasks still filed under a category being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DeletePolicy {
    /// Move them to the fallback category.
    Reassign,
    DeleteTasks,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_fallback_and_all() {
        let defaults = default_categories();
        assert!(defaults.iter().any(|c| c.name == FALLBACK_CATEGORY));
        assert!(defaults.iter().any(|c| c.name == ALL_CATEGORY));
        assert!(
            defaults
                .iter()
                .filter_map(|c| c.icon.as_deref())
                .all(is_known_icon)
        );
    }

    #[test]
    fn protection_is_case_insensitive() {
        let other = Category::new("other", "red", None);
        let work = Category::new("Work", "blue", None);
        assert!(other.is_protected());
        assert!(!work.is_protected());
    }
}
