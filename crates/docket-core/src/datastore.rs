use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::category::{Category, default_categories};
use crate::error::{StoreError, StoreResult};
use crate::identity::{Session, UserRecord, UserUpdate, Username, level_for_xp};
use crate::task::{Priority, SubTask, Task};

const WELCOME_CATEGORY: &str = "Personal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Tasks,
    Categories,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Tasks => "tasks",
            Collection::Categories => "categories",
        }
    }
}

type WriteKey = (Username, Collection);

/// User-scoped persistence: one JSONL file per (user, collection) plus the
/// global user table and session slot.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub users_path: PathBuf,
    pub session_path: PathBuf,
    pub tasks_dir: PathBuf,
    pub categories_dir: PathBuf,
    write_locks: Mutex<HashMap<WriteKey, Arc<Mutex<()>>>>,
    users_lock: Mutex<()>,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        let tasks_dir = data_dir.join(Collection::Tasks.name());
        let categories_dir = data_dir.join(Collection::Categories.name());

        for dir in [&data_dir, &tasks_dir, &categories_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }

        let users_path = data_dir.join("users.json");
        let session_path = data_dir.join("session.json");

        info!(
            data_dir = %data_dir.display(),
            users = %users_path.display(),
            session = %session_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            users_path,
            session_path,
            tasks_dir,
            categories_dir,
            write_locks: Mutex::new(HashMap::new()),
            users_lock: Mutex::new(()),
        })
    }

    pub fn collection_path(&self, username: &Username, collection: Collection) -> PathBuf {
        let dir = match collection {
            Collection::Tasks => &self.tasks_dir,
            Collection::Categories => &self.categories_dir,
        };
        dir.join(format!("{}.jsonl", username.as_str()))
    }

    fn write_lock(&self, username: &Username, collection: Collection) -> Arc<Mutex<()>> {
        self.write_locks
            .lock()
            .entry((username.clone(), collection))
            .or_default()
            .clone()
    }

    /// Stored tasks in saved order. Unreadable data degrades to empty.
    #[tracing::instrument(skip(self), fields(username = %username))]
    pub fn load_tasks(&self, username: &Username) -> Vec<Task> {
        let path = self.collection_path(username, Collection::Tasks);
        match load_jsonl::<Task>(&path) {
            Ok(Some(tasks)) => tasks,
            Ok(None) => vec![],
            Err(err) => {
                warn!(error = %format!("{err:#}"), "task collection unreadable; using empty list");
                vec![]
            }
        }
    }

    #[tracing::instrument(skip(self, tasks), fields(username = %username, count = tasks.len()))]
    pub fn save_tasks(&self, username: &Username, tasks: &[Task]) -> StoreResult<()> {
        self.save_collection(username, Collection::Tasks, tasks)
    }

    /// Stored categories, or the default set when the user has none.
    #[tracing::instrument(skip(self), fields(username = %username))]
    pub fn load_categories(&self, username: &Username) -> Vec<Category> {
        let path = self.collection_path(username, Collection::Categories);
        match load_jsonl::<Category>(&path) {
            Ok(Some(categories)) if !categories.is_empty() => categories,
            Ok(_) => {
                debug!("no stored categories; using defaults");
                default_categories()
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "category collection unreadable; using defaults");
                default_categories()
            }
        }
    }

    #[tracing::instrument(skip(self, categories), fields(username = %username, count = categories.len()))]
    pub fn save_categories(&self, username: &Username, categories: &[Category]) -> StoreResult<()> {
        self.save_collection(username, Collection::Categories, categories)
    }

    fn save_collection<T: Serialize>(
        &self,
        username: &Username,
        collection: Collection,
        items: &[T],
    ) -> StoreResult<()> {
        let lock = self.write_lock(username, collection);
        let _guard = lock.lock();
        let path = self.collection_path(username, collection);
        save_jsonl_atomic(&path, items).map_err(|err| {
            StoreError::persistence(
                format!("failed to save {} for {username}", collection.name()),
                err,
            )
        })
    }

    fn has_collection(&self, username: &Username, collection: Collection) -> bool {
        self.collection_path(username, collection).exists()
    }

    #[tracing::instrument(skip(self))]
    pub fn get_users(&self) -> Vec<UserRecord> {
        match load_json::<Vec<UserRecord>>(&self.users_path) {
            Ok(users) => users.unwrap_or_default(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "user table unreadable; treating as empty");
                vec![]
            }
        }
    }

    pub fn find_user(&self, username: &Username) -> Option<UserRecord> {
        self.get_users()
            .into_iter()
            .find(|user| &user.username == username)
    }

    #[tracing::instrument(skip(self, record), fields(username = %record.username))]
    pub fn register_user(&self, record: UserRecord) -> StoreResult<()> {
        let _guard = self.users_lock.lock();
        let mut users = self.get_users();
        if users.iter().any(|u| u.username == record.username) {
            return Err(StoreError::validation(format!(
                "username already registered: {}",
                record.username
            )));
        }
        users.push(record);
        self.save_users(&users)?;
        info!(total = users.len(), "registered user");
        Ok(())
    }

    /// Applies `update` to the named user. Returns `Ok(false)` for an unknown
    /// user. A username change copies both collections to the new key, then
    /// rewrites the user table, and only then removes the old files. A
    /// failure before the user table is saved removes whatever was copied, so
    /// the old key stays the only copy.
    #[tracing::instrument(skip(self, update), fields(username = %username))]
    pub fn update_user(&self, username: &Username, update: UserUpdate) -> StoreResult<bool> {
        let _guard = self.users_lock.lock();
        let mut users = self.get_users();
        let Some(idx) = users.iter().position(|u| &u.username == username) else {
            debug!("update for unknown user ignored");
            return Ok(false);
        };

        let renamed_to = update
            .username
            .clone()
            .filter(|new_name| new_name != username);

        let Some(new_name) = renamed_to else {
            update.apply(&mut users[idx]);
            let updated = users[idx].clone();
            self.save_users(&users)?;
            self.sync_session(username, &updated)?;
            info!("updated user");
            return Ok(true);
        };

        if users.iter().any(|u| u.username == new_name) {
            return Err(StoreError::validation(format!(
                "username already registered: {new_name}"
            )));
        }

        let locks = self.migration_locks(username, &new_name);
        let guards: Vec<_> = locks.iter().map(|lock| lock.lock()).collect();

        let copied = self.copy_collections(username, &new_name)?;

        update.apply(&mut users[idx]);
        let updated = users[idx].clone();
        if let Err(err) = self.save_users(&users) {
            discard_copies(&copied);
            return Err(err);
        }

        for collection in [Collection::Tasks, Collection::Categories] {
            let old_path = self.collection_path(username, collection);
            match fs::remove_file(&old_path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        file = %old_path.display(),
                        error = %err,
                        "failed to remove collection under old username"
                    );
                }
            }
        }

        drop(guards);
        drop(locks);
        self.write_locks.lock().retain(|(name, _), _| name != username);

        self.sync_session(username, &updated)?;
        info!(renamed_to = %new_name, "renamed user");
        Ok(true)
    }

    /// Lock handles for both keys of a rename, in a fixed order.
    fn migration_locks(&self, from: &Username, to: &Username) -> Vec<Arc<Mutex<()>>> {
        let mut keys: Vec<WriteKey> = [Collection::Tasks, Collection::Categories]
            .into_iter()
            .flat_map(|collection| [(from.clone(), collection), (to.clone(), collection)])
            .collect();
        keys.sort();
        keys.into_iter()
            .map(|(name, collection)| self.write_lock(&name, collection))
            .collect()
    }

    /// Writes every stored collection of `from` under `to` and returns the
    /// new paths. On failure the copies made so far are removed.
    #[tracing::instrument(skip(self), fields(from = %from, to = %to))]
    fn copy_collections(&self, from: &Username, to: &Username) -> StoreResult<Vec<PathBuf>> {
        let mut copied = Vec::new();
        for collection in [Collection::Tasks, Collection::Categories] {
            if let Err(err) = self.copy_collection(from, to, collection, &mut copied) {
                discard_copies(&copied);
                return Err(err);
            }
        }
        Ok(copied)
    }

    fn copy_collection(
        &self,
        from: &Username,
        to: &Username,
        collection: Collection,
        copied: &mut Vec<PathBuf>,
    ) -> StoreResult<()> {
        let old_path = self.collection_path(from, collection);
        let new_path = self.collection_path(to, collection);

        let contents = match fs::read(&old_path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(collection = collection.name(), "nothing stored under old key");
                return Ok(());
            }
            Err(err) => {
                return Err(StoreError::persistence(
                    format!("failed to read {}", old_path.display()),
                    err.into(),
                ));
            }
        };

        write_atomic(&new_path, &contents).map_err(|err| {
            StoreError::persistence(
                format!("failed to migrate {} to {to}", collection.name()),
                err,
            )
        })?;
        copied.push(new_path);
        debug!(collection = collection.name(), "copied collection to new key");
        Ok(())
    }

    /// Mirrors an updated user record into the session when it belongs to
    /// `previous`.
    fn sync_session(&self, previous: &Username, updated: &UserRecord) -> StoreResult<()> {
        let Some(mut session) = self.get_session() else {
            return Ok(());
        };
        if &session.username != previous {
            return Ok(());
        }
        session.username = updated.username.clone();
        session.xp = updated.xp;
        session.level = updated.level;
        session.email = updated.email.clone();
        session.phone = updated.phone.clone();
        session.avatar = updated.avatar.clone();
        self.set_session(&session)
    }

    /// Adds completion xp to a user and their live session.
    #[tracing::instrument(skip(self), fields(username = %username))]
    pub fn award_xp(&self, username: &Username, amount: u32) -> StoreResult<Option<u32>> {
        let Some(user) = self.find_user(username) else {
            return Ok(None);
        };
        let xp = user.xp.saturating_add(amount);
        let update = UserUpdate {
            xp: Some(xp),
            level: Some(level_for_xp(xp)),
            ..UserUpdate::default()
        };
        self.update_user(username, update)?;
        Ok(Some(xp))
    }

    fn save_users(&self, users: &[UserRecord]) -> StoreResult<()> {
        save_json_atomic(&self.users_path, &users)
            .map_err(|err| StoreError::persistence("failed to save user table", err))
    }

    #[tracing::instrument(skip(self, session), fields(username = %session.username))]
    pub fn set_session(&self, session: &Session) -> StoreResult<()> {
        save_json_atomic(&self.session_path, session)
            .map_err(|err| StoreError::persistence("failed to save session", err))
    }

    #[tracing::instrument(skip(self))]
    pub fn get_session(&self) -> Option<Session> {
        match load_json::<Session>(&self.session_path) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "session unreadable; treating as logged out");
                None
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn clear_session(&self) -> StoreResult<()> {
        match fs::remove_file(&self.session_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::persistence(
                "failed to clear session",
                err.into(),
            )),
        }
    }

    /// First-run seeding: a pinned welcome task when the user has no tasks,
    /// and the default categories when none are stored. Returns whether the
    /// welcome task was written.
    #[tracing::instrument(skip(self, now), fields(username = %username))]
    pub fn initialize_new_account(
        &self,
        username: &Username,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let tasks_path = self.collection_path(username, Collection::Tasks);
        match load_jsonl::<Task>(&tasks_path) {
            Ok(None) => {}
            Ok(Some(tasks)) if tasks.is_empty() => {}
            Ok(Some(_)) => {
                debug!("account already has tasks; skipping seed");
                return Ok(false);
            }
            Err(err) => {
                return Err(StoreError::persistence(
                    format!("refusing to seed over unreadable {}", tasks_path.display()),
                    err,
                ));
            }
        }

        let categories = self.load_categories(username);
        if !self.has_collection(username, Collection::Categories) {
            self.save_categories(username, &categories)?;
        }

        let mut welcome = Task::new_pending(
            "Welcome to Docket".to_string(),
            WELCOME_CATEGORY.to_string(),
            now,
        );
        welcome.description = Some(
            "Tasks live in categories. Pin what matters, star favorites, and mark things done."
                .to_string(),
        );
        welcome.priority = Priority::Medium;
        welcome.is_pinned = true;
        welcome.sub_tasks = vec![
            SubTask::new("Create your first task"),
            SubTask::new("Pin something important"),
            SubTask::new("Complete a task"),
        ];
        if let Some(category) = categories.iter().find(|c| c.name == WELCOME_CATEGORY) {
            welcome.color = Some(category.color.clone());
            welcome.icon = category.icon.clone();
        }

        self.save_tasks(username, &[welcome])?;
        info!("seeded new account");
        Ok(true)
    }
}

fn discard_copies(paths: &[PathBuf]) {
    for path in paths {
        if let Err(err) = fs::remove_file(path) {
            warn!(file = %path.display(), error = %err, "failed to remove partial migration copy");
        }
    }
}

/// `Ok(None)` when the file does not exist.
#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<Vec<T>>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to open {}", path.display()));
        }
    };
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let item: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(item);
    }

    debug!(count = out.len(), "loaded records from jsonl");
    Ok(Some(out))
}

#[tracing::instrument(skip(path, items))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, items: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = items.len(), "saving jsonl atomically");

    let mut buf = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buf, item)?;
        buf.push(b'\n');
    }
    write_atomic(path, &buf)
}

fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()));
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    Ok(Some(value))
}

fn save_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let buf = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::tempdir;

    use super::*;
    use crate::category::FALLBACK_CATEGORY;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
    }

    fn user(name: &str) -> Username {
        Username::parse(name).unwrap()
    }

    #[test]
    fn missing_collections_degrade_to_empty_and_defaults() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let alice = user("alice");

        assert!(store.load_tasks(&alice).is_empty());
        assert_eq!(store.load_categories(&alice), default_categories());
        assert!(store.get_session().is_none());
        assert!(store.get_users().is_empty());
    }

    #[test]
    fn corrupt_task_file_reads_as_empty() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let alice = user("alice");
        fs::write(store.collection_path(&alice, Collection::Tasks), "{not json\n").unwrap();

        assert!(store.load_tasks(&alice).is_empty());
    }

    #[test]
    fn corrupt_categories_fall_back_to_defaults() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let alice = user("alice");
        fs::write(store.collection_path(&alice, Collection::Categories), "[[[").unwrap();

        let categories = store.load_categories(&alice);
        assert!(categories.iter().any(|c| c.name == FALLBACK_CATEGORY));
    }

    #[test]
    fn save_overwrites_whole_collection_in_order() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let alice = user("alice");

        let first: Vec<Task> = ["a", "b", "c"]
            .iter()
            .map(|t| Task::new_pending(t.to_string(), "Work".to_string(), now()))
            .collect();
        store.save_tasks(&alice, &first).unwrap();
        store.save_tasks(&alice, &first).unwrap();
        assert_eq!(store.load_tasks(&alice), first);

        let second = vec![first[2].clone(), first[0].clone()];
        store.save_tasks(&alice, &second).unwrap();
        assert_eq!(store.load_tasks(&alice), second);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();

        store
            .register_user(UserRecord::new(user("alice"), "pw", now()))
            .unwrap();
        let err = store
            .register_user(UserRecord::new(user("ALICE"), "pw2", now()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.get_users().len(), 1);
    }

    #[test]
    fn rename_without_data_creates_nothing() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        store
            .register_user(UserRecord::new(user("dora"), "pw", now()))
            .unwrap();

        let renamed = store
            .update_user(
                &user("dora"),
                UserUpdate {
                    username: Some(user("dora2")),
                    ..UserUpdate::default()
                },
            )
            .unwrap();

        assert!(renamed);
        assert!(!store.collection_path(&user("dora2"), Collection::Tasks).exists());
        assert!(!store.collection_path(&user("dora2"), Collection::Categories).exists());
        assert!(store.find_user(&user("dora2")).is_some());
        assert!(store.find_user(&user("dora")).is_none());
    }

    #[test]
    fn rename_onto_taken_username_is_rejected_before_migration() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        for name in ["erin", "frank"] {
            store
                .register_user(UserRecord::new(user(name), "pw", now()))
                .unwrap();
        }
        let task = Task::new_pending("keep".to_string(), "Work".to_string(), now());
        store.save_tasks(&user("erin"), &[task.clone()]).unwrap();

        let err = store
            .update_user(
                &user("erin"),
                UserUpdate {
                    username: Some(user("frank")),
                    ..UserUpdate::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.load_tasks(&user("erin")), vec![task]);
    }

    #[test]
    fn update_unknown_user_returns_false() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        assert!(!store.update_user(&user("ghost"), UserUpdate::default()).unwrap());
    }

    #[test]
    fn rename_follows_active_session() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let record = UserRecord::new(user("hana"), "pw", now());
        store.register_user(record.clone()).unwrap();
        store.set_session(&Session::for_user(&record, now())).unwrap();

        store
            .update_user(
                &user("hana"),
                UserUpdate {
                    username: Some(user("hana.k")),
                    ..UserUpdate::default()
                },
            )
            .unwrap();

        let session = store.get_session().unwrap();
        assert_eq!(session.username, user("hana.k"));
        assert_eq!(session.last_login, now());
    }

    #[test]
    fn award_xp_levels_up_user_and_session() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let mut record = UserRecord::new(user("ivan"), "pw", now());
        record.xp = 95;
        store.register_user(record.clone()).unwrap();
        store.set_session(&Session::for_user(&record, now())).unwrap();

        assert_eq!(store.award_xp(&user("ivan"), 10).unwrap(), Some(105));
        let stored = store.find_user(&user("ivan")).unwrap();
        assert_eq!(stored.level, 2);
        assert_eq!(store.get_session().unwrap().xp, 105);

        assert_eq!(store.award_xp(&user("nobody"), 10).unwrap(), None);
    }

    #[test]
    fn session_set_get_clear() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let record = UserRecord::new(user("jo"), "pw", now());

        store.set_session(&Session::for_user(&record, now())).unwrap();
        assert_eq!(store.get_session().unwrap().username, user("jo"));

        store.clear_session().unwrap();
        store.clear_session().unwrap();
        assert!(store.get_session().is_none());
    }

    #[test]
    fn seeding_keeps_existing_categories() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let kim = user("kim");
        let custom = vec![Category::new("Garden", "green", None)];
        store.save_categories(&kim, &custom).unwrap();

        assert!(store.initialize_new_account(&kim, now()).unwrap());
        assert_eq!(store.load_categories(&kim), custom);
        assert_eq!(store.load_tasks(&kim).len(), 1);
    }

    #[test]
    fn failed_rename_leaves_data_under_old_username() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let alice = user("alice");
        let alice2 = user("alice2");
        store
            .register_user(UserRecord::new(alice.clone(), "pw", now()))
            .unwrap();
        let task = Task::new_pending("T1".to_string(), "Work".to_string(), now());
        let category = Category::new("C1", "teal", None);
        store.save_tasks(&alice, &[task.clone()]).unwrap();
        store.save_categories(&alice, &[category.clone()]).unwrap();

        // a directory in the way makes the categories copy fail after tasks copied
        fs::create_dir(store.collection_path(&alice2, Collection::Categories)).unwrap();

        let err = store
            .update_user(
                &alice,
                UserUpdate {
                    username: Some(alice2.clone()),
                    ..UserUpdate::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, StoreError::Persistence { .. }));
        assert!(store.find_user(&alice).is_some());
        assert!(store.find_user(&alice2).is_none());
        assert_eq!(store.load_tasks(&alice), vec![task]);
        assert_eq!(store.load_categories(&alice), vec![category]);
        assert!(!store.collection_path(&alice2, Collection::Tasks).exists());
    }

    #[test]
    fn rename_forgets_write_locks_of_old_username() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let lena = user("lena");
        store
            .register_user(UserRecord::new(lena.clone(), "pw", now()))
            .unwrap();
        store.save_tasks(&lena, &[]).unwrap();
        store.save_categories(&lena, &default_categories()).unwrap();

        store
            .update_user(
                &lena,
                UserUpdate {
                    username: Some(user("lena2")),
                    ..UserUpdate::default()
                },
            )
            .unwrap();

        let locks = store.write_locks.lock();
        assert!(locks.keys().all(|(name, _)| name != &lena));
    }

    #[test]
    fn seeding_leaves_unreadable_task_file_alone() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path()).unwrap();
        let mia = user("mia");
        let task = Task::new_pending("important".to_string(), "Work".to_string(), now());
        store.save_tasks(&mia, &[task]).unwrap();

        let path = store.collection_path(&mia, Collection::Tasks);
        let mut raw = fs::read_to_string(&path).unwrap();
        raw.push_str("{truncated\n");
        fs::write(&path, &raw).unwrap();

        let err = store.initialize_new_account(&mia, now()).unwrap_err();
        assert!(matches!(err, StoreError::Persistence { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), raw);
    }
}
