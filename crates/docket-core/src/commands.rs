use anyhow::{Context, anyhow};
use chrono::{DateTime, Local, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::categories::CategoryRepository;
use crate::category::{Category, CategoryPatch};
use crate::cli::{AddArgs, CategoryCommand, Command, EditArgs, ListArgs, SubtaskCommand};
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::{parse_due_date, parse_reminder};
use crate::error::StoreError;
use crate::identity::{Identity, UserRecord, UserUpdate, Username};
use crate::render::{Renderer, short_id};
use crate::task::{Status, TaskDraft, TaskPatch};
use crate::tasks::TaskRepository;
use crate::view::{CategorySelection, TaskQuery, compute_stats, filter_tasks};

#[instrument(skip_all)]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    let now = Utc::now();
    debug!(?command, "dispatching command");

    match command {
        Command::Register {
            username,
            password,
            email,
            phone,
        } => cmd_register(store, &username, password, email, phone, now),
        Command::Login { username, password } => cmd_login(store, &username, &password, now),
        Command::Logout => cmd_logout(store),
        Command::Whoami => {
            let session = store
                .get_session()
                .ok_or_else(|| anyhow!("not logged in"))?;
            renderer.print_session(&session)
        }
        Command::Rename { new_username } => cmd_rename(store, &new_username),
        Command::Category(sub) => cmd_category(store, cfg, renderer, sub, now),
        other => {
            let identity = active_identity(store)?;
            let mut tasks = TaskRepository::load(store, identity.clone());
            let mut categories = CategoryRepository::load(store, identity, cfg.name_policy());
            let result = cmd_task(&mut tasks, &categories, cfg, renderer, other, now);
            finish_with_write_errors(result, &mut tasks, &mut categories)
        }
    }
}

fn active_identity(store: &DataStore) -> anyhow::Result<Identity> {
    Identity::resume(store).ok_or_else(|| anyhow!("not logged in; run `docket login <username>`"))
}

fn report_write_error(err: Option<StoreError>) {
    if let Some(err) = err {
        warn!(error = %format!("{err:#}"), "write failure surfaced to user");
        eprintln!("warning: changes may not be saved: {:#}", anyhow::Error::from(err));
    }
}

/// Reports write failures held by either repository, whether or not the
/// command itself succeeded.
fn finish_with_write_errors(
    result: anyhow::Result<()>,
    tasks: &mut TaskRepository<'_>,
    categories: &mut CategoryRepository<'_>,
) -> anyhow::Result<()> {
    report_write_error(tasks.take_persistence_error());
    report_write_error(categories.take_persistence_error());
    result
}

#[instrument(skip(store, password, email, phone, now))]
fn cmd_register(
    store: &DataStore,
    username: &str,
    password: String,
    email: Option<String>,
    phone: Option<String>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    if password.is_empty() {
        return Err(anyhow!("password must not be empty"));
    }
    let username = Username::parse(username)?;
    let mut record = UserRecord::new(username.clone(), password, now);
    record.email = email;
    record.phone = phone;

    store.register_user(record)?;
    store
        .initialize_new_account(&username, now)
        .context("failed to seed new account")?;
    Identity::login(store, &username, now)?;

    info!(username = %username, "account registered");
    println!("Registered and logged in as {username}.");
    Ok(())
}

#[instrument(skip(store, password, now))]
fn cmd_login(store: &DataStore, username: &str, password: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
    let username = Username::parse(username)?;
    let user = store
        .find_user(&username)
        .filter(|user| user.password == password)
        .ok_or_else(|| anyhow!("invalid username or password"))?;

    Identity::login(store, &user.username, now)?;
    println!("Logged in as {}.", user.username);
    Ok(())
}

fn cmd_logout(store: &DataStore) -> anyhow::Result<()> {
    match Identity::resume(store) {
        Some(identity) => {
            let name = identity.username().clone();
            identity.logout(store)?;
            println!("Logged out {name}.");
        }
        None => println!("Not logged in."),
    }
    Ok(())
}

#[instrument(skip(store))]
fn cmd_rename(store: &DataStore, new_username: &str) -> anyhow::Result<()> {
    let identity = active_identity(store)?;
    let new_username = Username::parse(new_username)?;
    let update = UserUpdate {
        username: Some(new_username.clone()),
        ..UserUpdate::default()
    };
    if !store.update_user(identity.username(), update)? {
        return Err(anyhow!(
            "account {} is not registered",
            identity.username()
        ));
    }
    println!("Renamed {} to {new_username}.", identity.username());
    Ok(())
}

fn cmd_task(
    tasks: &mut TaskRepository<'_>,
    categories: &CategoryRepository<'_>,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Command,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let today = now.with_timezone(&Local).date_naive();
    match command {
        Command::Add(args) => {
            let draft = draft_from_args(args, categories, today)?;
            let task = tasks.create(draft, categories.categories(), now)?;
            println!("Created task {}.", short_id(&task));
        }
        Command::Edit(args) => {
            let id = tasks.resolve_id(&args.id)?;
            let patch = patch_from_args(args, categories, today)?;
            if patch.is_empty() {
                return Err(anyhow!("edit requires at least one field to change"));
            }
            let task = tasks.update(id, patch, categories.categories(), now)?;
            renderer.print_task_info(&task)?;
        }
        Command::Status { id, status } => {
            let id = tasks.resolve_id(&id)?;
            let task = tasks.set_status(id, status, now)?;
            println!("Task {} is now {:?}.", short_id(&task), task.status);
        }
        Command::Done { id } => {
            let id = tasks.resolve_id(&id)?;
            let task = tasks.set_status(id, Status::Completed, now)?;
            println!("Completed task {}.", short_id(&task));
        }
        Command::Delete { id } => {
            // unknown ids are tolerated; only ambiguity is an error
            match tasks.resolve_id(&id) {
                Ok(id) => {
                    tasks.delete(id);
                    println!("Deleted task {}.", &id.to_string()[..8]);
                }
                Err(err) if err.is_not_found() => println!("No task matches {id}."),
                Err(err) => return Err(err.into()),
            }
        }
        Command::Duplicate { id } => {
            let id = tasks.resolve_id(&id)?;
            let copy = tasks.duplicate(id, now)?;
            println!("Duplicated as task {}.", short_id(&copy));
        }
        Command::Pin { id } => {
            let id = tasks.resolve_id(&id)?;
            if let Some(task) = tasks.toggle_pin(id, now) {
                let state = if task.is_pinned { "Pinned" } else { "Unpinned" };
                println!("{state} task {}.", short_id(&task));
            }
        }
        Command::Favorite { id } => {
            let id = tasks.resolve_id(&id)?;
            if let Some(task) = tasks.toggle_favorite(id, now) {
                let state = if task.is_favorite { "Starred" } else { "Unstarred" };
                println!("{state} task {}.", short_id(&task));
            }
        }
        Command::Subtask(sub) => cmd_subtask(tasks, sub, now)?,
        Command::List(args) => {
            let query = query_from_args(args, categories, cfg)?;
            let visible = filter_tasks(tasks.tasks(), &query);
            renderer.print_task_table(&visible, categories.categories(), today)?;
        }
        Command::Stats => {
            renderer.print_stats(&compute_stats(tasks.tasks()))?;
        }
        other => return Err(anyhow!("not a task command: {other:?}")),
    }
    Ok(())
}

fn cmd_subtask(tasks: &mut TaskRepository<'_>, sub: SubtaskCommand, now: DateTime<Utc>) -> anyhow::Result<()> {
    match sub {
        SubtaskCommand::Add { task, title } => {
            let id = tasks.resolve_id(&task)?;
            tasks.add_subtask(id, &title, now)?;
            println!("Added sub-task to {}.", &id.to_string()[..8]);
        }
        SubtaskCommand::Toggle { task, index } => {
            let id = tasks.resolve_id(&task)?;
            let sub_id = subtask_at(tasks, id, index)?;
            let toggled = tasks.toggle_subtask(id, sub_id, now)?;
            let state = if toggled.is_completed { "done" } else { "open" };
            println!("Sub-task {index} is {state}.");
        }
        SubtaskCommand::Remove { task, index } => {
            let id = tasks.resolve_id(&task)?;
            let sub_id = subtask_at(tasks, id, index)?;
            tasks.remove_subtask(id, sub_id, now)?;
            println!("Removed sub-task {index}.");
        }
    }
    Ok(())
}

/// Sub-tasks are addressed by their 1-based display position.
fn subtask_at(tasks: &TaskRepository<'_>, task_id: Uuid, index: usize) -> anyhow::Result<Uuid> {
    let task = tasks
        .get(task_id)
        .ok_or_else(|| StoreError::not_found("task", task_id.to_string()))?;
    index
        .checked_sub(1)
        .and_then(|idx| task.sub_tasks.get(idx))
        .map(|sub| sub.id)
        .ok_or_else(|| anyhow!("task has no sub-task {index}"))
}

fn cmd_category(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    command: CategoryCommand,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let identity = active_identity(store)?;
    let mut tasks = TaskRepository::load(store, identity.clone());
    let mut categories = CategoryRepository::load(store, identity, cfg.name_policy());

    let result = run_category_command(&mut tasks, &mut categories, renderer, command, now);
    finish_with_write_errors(result, &mut tasks, &mut categories)
}

fn run_category_command(
    tasks: &mut TaskRepository<'_>,
    categories: &mut CategoryRepository<'_>,
    renderer: &mut Renderer,
    command: CategoryCommand,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    match command {
        CategoryCommand::List => {
            renderer.print_categories(categories.categories(), tasks.tasks())?;
        }
        CategoryCommand::Add { name, color, icon } => {
            let created = categories.create(Category::new(name, color, icon))?;
            println!("Created category {}.", created.name);
        }
        CategoryCommand::Edit {
            category,
            name,
            color,
            icon,
        } => {
            let id = categories.resolve(&category)?.id.clone();
            let patch = CategoryPatch {
                name,
                color,
                icon: icon.map(|i| Some(i).filter(|i| !i.is_empty() && i != "none")),
            };
            let updated = categories.update(&id, patch, tasks, now)?;
            println!("Updated category {}.", updated.name);
        }
        CategoryCommand::Delete { category, policy } => {
            let id = categories.resolve(&category)?.id.clone();
            if let Some(removal) = categories.delete(&id, policy, tasks, now)? {
                println!(
                    "Deleted category {} ({} tasks reassigned, {} tasks deleted).",
                    removal.category.name, removal.tasks_reassigned, removal.tasks_deleted
                );
            }
        }
    }

    Ok(())
}

/// Maps a category argument onto the stored name, ignoring case.
fn canonical_category(categories: &CategoryRepository<'_>, raw: &str) -> String {
    categories
        .resolve(raw)
        .map(|c| c.name.clone())
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn draft_from_args(
    args: AddArgs,
    categories: &CategoryRepository<'_>,
    today: chrono::NaiveDate,
) -> anyhow::Result<TaskDraft> {
    Ok(TaskDraft {
        title: args.title,
        description: args.description,
        priority: args.priority,
        status: None,
        category: args.category.map(|c| canonical_category(categories, &c)),
        color: None,
        icon: None,
        due_date: args
            .due
            .map(|due| parse_due_date(&due, today))
            .transpose()?,
        reminder_at: args.reminder.map(|r| parse_reminder(&r)).transpose()?,
        recurrence: args.recurrence,
        sub_tasks: args.subtasks,
        is_favorite: args.favorite,
        is_pinned: Some(args.pin),
    })
}

fn patch_from_args(
    args: EditArgs,
    categories: &CategoryRepository<'_>,
    today: chrono::NaiveDate,
) -> anyhow::Result<TaskPatch> {
    let reminder_at = match args.reminder.as_deref() {
        None => None,
        Some(r) if r.eq_ignore_ascii_case("none") => Some(None),
        Some(r) => Some(Some(parse_reminder(r)?)),
    };

    Ok(TaskPatch {
        title: args.title,
        description: args.description.map(|d| Some(d).filter(|d| !d.is_empty())),
        priority: args.priority,
        category: args.category.map(|c| canonical_category(categories, &c)),
        due_date: args
            .due
            .map(|due| parse_due_date(&due, today))
            .transpose()?,
        reminder_at,
        recurrence: args.recurrence,
        ..TaskPatch::default()
    })
}

fn query_from_args(
    args: ListArgs,
    categories: &CategoryRepository<'_>,
    cfg: &Config,
) -> anyhow::Result<TaskQuery> {
    let category = match args.category.as_deref().map(CategorySelection::parse) {
        Some(CategorySelection::Named(raw)) => {
            CategorySelection::Named(canonical_category(categories, &raw))
        }
        _ => CategorySelection::All,
    };
    let view = match args.view {
        Some(view) => view,
        None => cfg.default_view()?,
    };

    Ok(TaskQuery {
        category,
        view,
        search: args.search.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::categories::NamePolicy;

    #[test]
    fn failed_category_command_still_drains_write_errors() {
        let temp = tempdir().unwrap();
        let mut store = DataStore::open(temp.path()).unwrap();
        let blocked = temp.path().join("blocked");
        fs::write(&blocked, "").unwrap();
        store.tasks_dir = blocked;

        let now = Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap();
        let identity = Identity::new(Username::parse("alice").unwrap());
        let mut tasks = TaskRepository::load(&store, identity.clone());
        let mut categories = CategoryRepository::load(&store, identity, NamePolicy::default());
        tasks.create(TaskDraft::titled("unsaved"), &[], now).unwrap();

        let mut renderer = Renderer::new(&Config::default()).unwrap();
        let result = run_category_command(
            &mut tasks,
            &mut categories,
            &mut renderer,
            CategoryCommand::Edit {
                category: "missing".to_string(),
                name: None,
                color: None,
                icon: None,
            },
            now,
        );
        assert!(result.is_err());

        assert!(finish_with_write_errors(result, &mut tasks, &mut categories).is_err());
        assert!(tasks.take_persistence_error().is_none());
        assert!(categories.take_persistence_error().is_none());
    }
}
