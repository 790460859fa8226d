use std::fs;
use std::path::Path;

use chrono::{Duration, Utc};
use tally_core::cli::Invocation;
use tally_core::commands;
use tally_core::config::Config;
use tally_core::datastore::DataStore;
use tally_core::datetime::{end_of_day, to_project_date};
use tally_core::render::Renderer;
use tally_core::session::{Session, StartOutcome};
use tally_core::task::{Category, Task};
use tempfile::tempdir;

fn config_for(dir: &Path) -> Config {
    let rc = dir.join("tallyrc");
    fs::write(&rc, "color=off\n").expect("write rc");
    Config::load(Some(&rc)).expect("load config")
}

fn invocation(selector: &[&str], command: &str, args: &[&str]) -> Invocation {
    Invocation {
        selector_terms: selector.iter().map(|s| s.to_string()).collect(),
        command: command.to_string(),
        command_args: args.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn datastore_roundtrip() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let now = Utc::now();
    let category = Category::new("Work".to_string(), "#fbbf24".to_string(), 1);
    let mut task = Task::new(
        "Write weekly summary".to_string(),
        category.uuid,
        to_project_date(now),
        now,
        1,
    );
    task.emoji = Some("📝".to_string());

    store.save_categories(&[category.clone()]).expect("save categories");
    store.save_tasks(&[task.clone()]).expect("save tasks");

    let tasks = store.load_tasks().expect("load tasks");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].uuid, task.uuid);
    assert_eq!(tasks[0].emoji.as_deref(), Some("📝"));
    assert_eq!(tasks[0].milliseconds, 0);

    let categories = store.load_categories().expect("load categories");
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].name, "Work");

    assert_eq!(store.next_task_id(&tasks), 2);
    assert_eq!(store.next_category_id(&categories), 2);
}

#[test]
fn session_survives_persistence_mid_timer() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    // Empty session file reads back as idle.
    let idle = store.load_session().expect("load empty session");
    assert!(!idle.is_running());

    let now = Utc::now();
    let category = Category::new("Deep work".to_string(), "#60a5fa".to_string(), 1);
    let mut task = Task::new(
        "Refactor importer".to_string(),
        category.uuid,
        to_project_date(now),
        now,
        1,
    );
    task.milliseconds = 15 * 60 * 1000;

    let mut session = Session::default();
    let outcome = session.start(&task, now).expect("start timer");
    assert!(matches!(
        outcome,
        StartOutcome::Started { committed: None }
    ));

    store.save_session(&session).expect("save session");
    let restored = store.load_session().expect("load session");

    // The backdated start survives the round trip at millisecond precision,
    // so elapsed time still includes the pre-existing 15 minutes.
    assert_eq!(restored.start_time, session.start_time);
    assert_eq!(restored.end_of_day, session.end_of_day);
    let elapsed = restored
        .elapsed(now + Duration::seconds(60))
        .expect("running");
    assert_eq!(elapsed.num_minutes(), 16);
}

#[test]
fn switching_tasks_commits_the_first_one() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let now = Utc::now();
    let category = Category::new("Chores".to_string(), "#f87171".to_string(), 1);
    let today = to_project_date(now);
    let first = Task::new("Dishes".to_string(), category.uuid, today, now, 1);
    let second = Task::new("Laundry".to_string(), category.uuid, today, now, 2);
    let mut tasks = vec![first.clone(), second.clone()];

    let mut session = Session::default();
    session.start(&first, now).expect("start first");

    let later = now + Duration::minutes(10);
    let outcome = session.start(&second, later).expect("switch to second");
    let StartOutcome::Started {
        committed: Some(commit),
    } = outcome
    else {
        panic!("switch should commit the first task");
    };

    assert_eq!(commit.task, first.uuid);
    assert_eq!(commit.milliseconds, 10 * 60 * 1000);

    if let Some(task) = tasks.iter_mut().find(|t| t.uuid == commit.task) {
        task.milliseconds = commit.milliseconds;
    }
    store.save_tasks(&tasks).expect("save tasks");
    store.save_session(&session).expect("save session");

    let reloaded = store.load_tasks().expect("reload tasks");
    let dishes = reloaded
        .iter()
        .find(|t| t.uuid == first.uuid)
        .expect("dishes present");
    assert_eq!(dishes.milliseconds, 10 * 60 * 1000);

    let live = store.load_session().expect("reload session");
    assert_eq!(live.task_in_process, Some(second.uuid));
}

#[test]
fn undo_restores_the_previous_store_state() {
    let temp = tempdir().expect("tempdir");
    let store = DataStore::open(temp.path()).expect("open datastore");

    let now = Utc::now();
    let category = Category::new("Errands".to_string(), "#a78bfa".to_string(), 1);
    let task = Task::new(
        "Pick up parcel".to_string(),
        category.uuid,
        to_project_date(now),
        now,
        1,
    );

    store.save_categories(&[category.clone()]).expect("save categories");

    // Snapshot the empty task list, then add a task on top of it.
    store
        .push_undo_snapshot(&[], &[category.clone()], &Session::default())
        .expect("push snapshot");
    store.save_tasks(&[task]).expect("save tasks");
    assert_eq!(store.load_tasks().expect("load").len(), 1);

    let (tasks, categories, session) = store
        .pop_undo_snapshot()
        .expect("pop snapshot")
        .expect("snapshot present");
    store.save_tasks(&tasks).expect("restore tasks");
    store.save_categories(&categories).expect("restore categories");
    store.save_session(&session).expect("restore session");

    assert!(store.load_tasks().expect("load").is_empty());
    assert_eq!(store.load_categories().expect("load").len(), 1);
    assert!(store.pop_undo_snapshot().expect("pop again").is_none());
}

#[test]
fn listing_clones_stale_tasks_and_undo_reverses_it() {
    let temp = tempdir().expect("tempdir");
    let mut store = DataStore::open(temp.path()).expect("open datastore");

    let now = Utc::now();
    let category = Category::new("Chores".to_string(), "#f87171".to_string(), 1);
    let yesterday = to_project_date(now) - Duration::days(1);
    let mut stale = Task::new("Water plants".to_string(), category.uuid, yesterday, now, 1);
    stale.milliseconds = 90_000;

    store.save_categories(&[category]).expect("save categories");
    store.save_tasks(&[stale.clone()]).expect("save tasks");

    let cfg = config_for(temp.path());
    let mut renderer = Renderer::new(&cfg).expect("renderer");
    commands::dispatch(&mut store, &cfg, &mut renderer, invocation(&[], "list", &[]))
        .expect("list");

    let tasks = store.load_tasks().expect("reload tasks");
    assert_eq!(tasks.len(), 2);

    let original = tasks
        .iter()
        .find(|t| t.uuid == stale.uuid)
        .expect("original kept");
    assert!(!original.visible);
    assert_eq!(original.milliseconds, 90_000);
    assert_eq!(original.date, yesterday);

    let clone = tasks
        .iter()
        .find(|t| t.uuid != stale.uuid)
        .expect("clone created");
    assert!(clone.visible);
    assert_eq!(clone.milliseconds, 0);
    assert_eq!(clone.date, to_project_date(now));
    assert_eq!(clone.description, "Water plants");

    commands::dispatch(&mut store, &cfg, &mut renderer, invocation(&[], "undo", &[]))
        .expect("undo");

    let tasks = store.load_tasks().expect("reload after undo");
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].visible);
    assert_eq!(tasks[0].date, yesterday);
}

#[test]
fn starting_a_stale_task_lands_on_todays_clone() {
    let temp = tempdir().expect("tempdir");
    let mut store = DataStore::open(temp.path()).expect("open datastore");

    let now = Utc::now();
    let category = Category::new("Chores".to_string(), "#f87171".to_string(), 1);
    let yesterday = to_project_date(now) - Duration::days(1);
    let stale = Task::new("Dishes".to_string(), category.uuid, yesterday, now, 1);

    store.save_categories(&[category]).expect("save categories");
    store.save_tasks(&[stale.clone()]).expect("save tasks");

    let cfg = config_for(temp.path());
    let mut renderer = Renderer::new(&cfg).expect("renderer");
    commands::dispatch(
        &mut store,
        &cfg,
        &mut renderer,
        invocation(&["dishes"], "start", &[]),
    )
    .expect("start");

    let tasks = store.load_tasks().expect("reload tasks");
    let clone = tasks
        .iter()
        .find(|t| t.uuid != stale.uuid)
        .expect("clone created");
    assert!(clone.visible);
    assert_eq!(clone.date, to_project_date(now));

    let original = tasks
        .iter()
        .find(|t| t.uuid == stale.uuid)
        .expect("original kept");
    assert!(!original.visible);

    // The timer runs against today's clone, not the hidden original.
    let session = store.load_session().expect("load session");
    assert_eq!(session.task_in_process, Some(clone.uuid));
    assert!(session.is_running());
}

#[test]
fn overnight_timer_is_force_stopped_at_cutoff() {
    let temp = tempdir().expect("tempdir");
    let mut store = DataStore::open(temp.path()).expect("open datastore");

    let now = Utc::now();
    let start = now - Duration::days(1);
    let category = Category::new("Night".to_string(), "#60a5fa".to_string(), 1);
    let task = Task::new(
        "Overnight render".to_string(),
        category.uuid,
        to_project_date(start),
        start,
        1,
    );

    store.save_categories(&[category]).expect("save categories");
    store.save_tasks(&[task.clone()]).expect("save tasks");

    let cutoff = end_of_day(start).expect("cutoff");
    let mut session = Session::default();
    session.start_time = Some(start);
    session.end_of_day = Some(cutoff);
    session.task_in_process = Some(task.uuid);
    store.save_session(&session).expect("save session");

    // Any command triggers the rollover check on load; status mutates nothing
    // else.
    let cfg = config_for(temp.path());
    let mut renderer = Renderer::new(&cfg).expect("renderer");
    commands::dispatch(&mut store, &cfg, &mut renderer, invocation(&[], "status", &[]))
        .expect("status");

    let tasks = store.load_tasks().expect("reload tasks");
    assert_eq!(
        tasks[0].milliseconds,
        (cutoff - start).num_milliseconds()
    );

    let session = store.load_session().expect("reload session");
    assert!(!session.is_running());
    assert!(session.task_in_process.is_none());
}
