use chrono::{DateTime, TimeZone, Utc};
use docket_core::categories::{CategoryRepository, NamePolicy};
use docket_core::category::{Category, DeletePolicy, FALLBACK_CATEGORY, default_categories};
use docket_core::datastore::{Collection, DataStore};
use docket_core::identity::{Identity, UserRecord, UserUpdate, Username};
use docket_core::task::{Status, Task, TaskDraft};
use docket_core::tasks::TaskRepository;
use docket_core::view::{TaskQuery, filter_tasks};
use proptest::prelude::*;
use tempfile::tempdir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 9, 14, 8, 0, 0).single().expect("valid time")
}

fn user(name: &str) -> Username {
    Username::parse(name).expect("valid username")
}

fn draft(title: &str, category: &str) -> TaskDraft {
    TaskDraft {
        category: Some(category.to_string()),
        ..TaskDraft::titled(title)
    }
}

#[test]
fn completing_any_task_clears_favorite_and_pin() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut tasks = TaskRepository::load(&store, Identity::new(user("alice")));

    let mut special = draft("special", "Work");
    special.is_favorite = true;
    special.is_pinned = Some(true);
    let special = tasks.create(special, &[], now()).expect("create");
    let plain = tasks.create(draft("plain", "Work"), &[], now()).expect("create");

    for id in [special.id, plain.id] {
        let done = tasks.set_status(id, Status::Completed, now()).expect("set status");
        assert!(!done.is_favorite);
        assert!(!done.is_pinned);
    }

    let stored = store.load_tasks(&user("alice"));
    assert!(stored.iter().all(|t| t.is_completed() && !t.is_favorite && !t.is_pinned));
}

#[test]
fn deleting_twice_matches_deleting_once() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let mut tasks = TaskRepository::load(&store, Identity::new(user("alice")));
    let keep = tasks.create(draft("keep", "Work"), &[], now()).expect("create");
    let gone = tasks.create(draft("gone", "Work"), &[], now()).expect("create");

    assert!(tasks.delete(gone.id));
    let after_once = tasks.tasks().to_vec();
    assert!(!tasks.delete(gone.id));

    assert_eq!(tasks.tasks(), after_once.as_slice());
    assert_eq!(store.load_tasks(&user("alice")), vec![keep]);
}

#[test]
fn reassign_delete_moves_tasks_to_fallback() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let identity = Identity::new(user("alice"));
    let mut tasks = TaskRepository::load(&store, identity.clone());
    let mut categories = CategoryRepository::load(&store, identity, NamePolicy::default());
    let snapshot = categories.categories().to_vec();

    for (title, category) in [("a", "Work"), ("b", "Work"), ("c", "Personal")] {
        tasks.create(draft(title, category), &snapshot, now()).expect("create");
    }
    let work_ids: Vec<_> = tasks
        .tasks()
        .iter()
        .filter(|t| t.category == "Work")
        .map(|t| t.id)
        .collect();
    let work = categories.find_by_name("Work").expect("work category").id.clone();

    let removal = categories
        .delete(&work, DeletePolicy::Reassign, &mut tasks, now())
        .expect("delete")
        .expect("category existed");

    assert_eq!(removal.tasks_reassigned, 2);
    assert_eq!(tasks.tasks().len(), 3);
    for id in work_ids {
        assert_eq!(tasks.get(id).expect("task kept").category, FALLBACK_CATEGORY);
    }
    assert!(categories.find_by_name("Work").is_none());

    let stored_tasks = store.load_tasks(&user("alice"));
    assert_eq!(stored_tasks.iter().filter(|t| t.category == FALLBACK_CATEGORY).count(), 2);
    let stored_categories = store.load_categories(&user("alice"));
    assert!(stored_categories.iter().all(|c| c.name != "Work"));
}

#[test]
fn delete_tasks_policy_drops_referencing_tasks() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let identity = Identity::new(user("alice"));
    let mut tasks = TaskRepository::load(&store, identity.clone());
    let mut categories = CategoryRepository::load(&store, identity, NamePolicy::default());
    let gym = categories
        .create(Category::new("Gym", "red", None))
        .expect("create category");

    for (title, category) in [("a", "Gym"), ("b", "Work"), ("c", "Gym"), ("d", "Personal")] {
        tasks.create(draft(title, category), categories.categories(), now()).expect("create");
    }
    let before = tasks.tasks().len();

    let removal = categories
        .delete(&gym.id, DeletePolicy::DeleteTasks, &mut tasks, now())
        .expect("delete")
        .expect("category existed");

    assert_eq!(removal.tasks_deleted, 2);
    assert_eq!(tasks.tasks().len(), before - 2);
    assert_eq!(store.load_tasks(&user("alice")).len(), before - 2);
}

#[test]
fn rename_moves_tasks_and_categories() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let alice = user("alice");
    let alice2 = user("alice2");
    store
        .register_user(UserRecord::new(alice.clone(), "secret", now()))
        .expect("register");

    let t1 = Task::new_pending("T1".to_string(), "Work".to_string(), now());
    let c1 = Category::new("C1", "teal", None);
    store.save_tasks(&alice, &[t1.clone()]).expect("save tasks");
    store.save_categories(&alice, &[c1.clone()]).expect("save categories");

    let updated = store
        .update_user(
            &alice,
            UserUpdate {
                username: Some(alice2.clone()),
                ..UserUpdate::default()
            },
        )
        .expect("update user");

    assert!(updated);
    assert_eq!(store.load_tasks(&alice2), vec![t1]);
    assert!(store.load_tasks(&alice).is_empty());
    assert_eq!(store.load_categories(&alice2), vec![c1]);
    // nothing stored under the old key any more, so it reads as the defaults
    assert!(!store.collection_path(&alice, Collection::Categories).exists());
    assert_eq!(store.load_categories(&alice), default_categories());
    assert!(store.find_user(&alice2).is_some());
}

#[test]
fn initializing_twice_seeds_one_pinned_welcome_task() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let bob = user("bob");

    assert!(store.initialize_new_account(&bob, now()).expect("first init"));
    assert_eq!(store.load_tasks(&bob).len(), 1);

    assert!(!store.initialize_new_account(&bob, now()).expect("second init"));
    let tasks = store.load_tasks(&bob);
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].is_pinned);
    assert!(store.load_categories(&bob).iter().any(|c| c.name == FALLBACK_CATEGORY));
}

#[test]
fn login_session_drives_repositories() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");
    let carol = user("Carol");
    store
        .register_user(UserRecord::new(carol.clone(), "pw", now()))
        .expect("register");

    let identity = Identity::login(&store, &carol, now()).expect("login");
    let resumed = Identity::resume(&store).expect("session present");
    assert_eq!(resumed, identity);
    assert_eq!(store.get_session().expect("session").last_login, now());

    let mut tasks = TaskRepository::load(&store, resumed);
    tasks.create(draft("hello", "Work"), &[], now()).expect("create");
    assert_eq!(store.load_tasks(&user("carol")).len(), 1);

    identity.logout(&store).expect("logout");
    assert!(Identity::resume(&store).is_none());
    assert!(Identity::login(&store, &user("nobody"), now()).is_err());
}

#[test]
fn pinned_task_listed_before_unpinned() {
    let mut unpinned = Task::new_pending("first".to_string(), "Work".to_string(), now());
    unpinned.status = Status::Pending;
    let mut pinned = Task::new_pending("second".to_string(), "Work".to_string(), now());
    pinned.is_pinned = true;
    let tasks = vec![unpinned.clone(), pinned.clone()];

    let out = filter_tasks(&tasks, &TaskQuery::default());
    assert_eq!(out, vec![&pinned, &unpinned]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn saved_tasks_load_back_in_order(titles in proptest::collection::vec("[a-zA-Z0-9 ]{1,24}", 0..12)) {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let tasks: Vec<Task> = titles
            .iter()
            .enumerate()
            .map(|(idx, title)| {
                let mut task = Task::new_pending(title.clone(), "Work".to_string(), now());
                task.is_pinned = idx % 2 == 0;
                task
            })
            .collect();

        store.save_tasks(&user("prop"), &tasks).expect("save");
        prop_assert_eq!(store.load_tasks(&user("prop")), tasks);
    }

    #[test]
    fn delete_is_idempotent(count in 1usize..8, pick in 0usize..8) {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open datastore");
        let mut tasks = TaskRepository::load(&store, Identity::new(user("prop")));
        let ids: Vec<_> = (0..count)
            .map(|idx| tasks.create(draft(&format!("t{idx}"), "Work"), &[], now()).expect("create").id)
            .collect();
        let target = ids[pick % count];

        prop_assert!(tasks.delete(target));
        let once = tasks.tasks().to_vec();
        prop_assert!(!tasks.delete(target));
        prop_assert_eq!(tasks.tasks(), once.as_slice());
        prop_assert_eq!(store.load_tasks(&user("prop")), once);
    }
}
