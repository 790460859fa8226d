use std::collections::BTreeMap;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::cli::Invocation;
use crate::config::Config;
use crate::datastore::DataStore;
use crate::datetime::to_project_date;
use crate::render::{Renderer, format_hours};
use crate::select::{Selector, select_one};
use crate::session::{Session, StartOutcome, TimerCommit};
use crate::task::{Category, Task};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "add",
        "list",
        "modify",
        "start",
        "stop",
        "status",
        "strike",
        "rollover",
        "delete",
        "categories",
        "category",
        "report",
        "undo",
        "export",
        "_commands",
        "_show",
        "help",
        "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv))]
pub fn dispatch(
    store: &mut DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
) -> anyhow::Result<()> {
    let now = Utc::now();

    check_day_rollover(store, now)?;

    let command = inv.command.as_str();
    debug!(
        command,
        selector = ?inv.selector_terms,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "add" => cmd_add(store, &inv.command_args, now),
        "list" => cmd_list(store, renderer, now),
        "modify" => cmd_modify(store, &inv.selector_terms, &inv.command_args, now),
        "start" => cmd_start(store, &inv.selector_terms, now),
        "stop" => cmd_stop(store, now),
        "status" => cmd_status(store, renderer, now),
        "strike" => cmd_strike(store, &inv.selector_terms, now),
        "rollover" => cmd_rollover(store, now),
        "delete" => cmd_delete(store, &inv.selector_terms),
        "categories" => cmd_categories(store, renderer),
        "category" => cmd_category(store, &inv.command_args),
        "report" => cmd_report(store, renderer, &inv.command_args),
        "undo" => cmd_undo(store),
        "export" => cmd_export(store),
        "_commands" => cmd_commands(),
        "_show" => cmd_show(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => Err(anyhow!("unknown command: {other}")),
    }
}

/// Runs on every session load: a timer left running past its end-of-day
/// cutoff is force-stopped and credited up to the cutoff.
#[instrument(skip(store, now))]
fn check_day_rollover(store: &mut DataStore, now: DateTime<Utc>) -> anyhow::Result<()> {
    let mut session = store.load_session()?;
    let Some(in_process) = session.task_in_process else {
        return Ok(());
    };

    let mut tasks = store.load_tasks()?;
    let Some(task) = tasks.iter().find(|task| task.uuid == in_process) else {
        warn!(task = %in_process, "session pointed at a missing task; clearing timer");
        session = Session::default();
        store.save_session(&session)?;
        return Ok(());
    };

    if let Some(commit) = session.rollover(task.date, now)? {
        info!(
            task = %commit.task,
            milliseconds = commit.milliseconds,
            "timer crossed end-of-day; force-stopped at cutoff"
        );
        apply_commit(&mut tasks, &commit, now);
        store.save_tasks(&tasks)?;
        store.save_session(&session)?;
    }

    Ok(())
}

fn apply_commit(tasks: &mut [Task], commit: &TimerCommit, now: DateTime<Utc>) {
    if let Some(task) = tasks.iter_mut().find(|task| task.uuid == commit.task) {
        task.milliseconds = commit.milliseconds;
        task.modified = now;
    }
}

/// Every visible task dated before today becomes a hidden original plus a
/// fresh zero-duration clone dated today. Returns the number of clones.
fn rollover_stale_tasks(
    store: &DataStore,
    tasks: &mut Vec<Task>,
    now: DateTime<Utc>,
) -> u64 {
    let today = to_project_date(now);
    let mut next_id = store.next_task_id(tasks);
    let mut clones = Vec::new();

    for task in tasks.iter_mut() {
        if task.is_stale(today) {
            clones.push(task.clone_for_day(today, now, next_id));
            next_id += 1;
            task.visible = false;
            task.modified = now;
        }
    }

    let count = clones.len() as u64;
    tasks.extend(clones);
    count
}

#[derive(Debug, Clone)]
enum Mod {
    Category(String),
    Emoji(String),
    Minutes(i64),
}

fn parse_desc_and_mods(args: &[String]) -> anyhow::Result<(Vec<String>, Vec<Mod>)> {
    let mut desc_parts = Vec::new();
    let mut mods = Vec::new();

    let mut literal = false;
    for arg in args {
        if arg == "--" {
            literal = true;
            continue;
        }

        if !literal && let Some(one_mod) = parse_one_mod(arg)? {
            mods.push(one_mod);
            continue;
        }

        desc_parts.push(arg.clone());
    }

    Ok((desc_parts, mods))
}

fn parse_one_mod(tok: &str) -> anyhow::Result<Option<Mod>> {
    let Some((key, value)) = tok.split_once(':') else {
        return Ok(None);
    };

    match key.to_ascii_lowercase().as_str() {
        "category" | "cat" => Ok(Some(Mod::Category(value.to_string()))),
        "emoji" => Ok(Some(Mod::Emoji(value.to_string()))),
        "minutes" | "min" => {
            let minutes: i64 = value
                .parse()
                .map_err(|_| anyhow!("minutes must be a whole number, got: {value}"))?;
            if minutes < 0 {
                return Err(anyhow!("minutes cannot be negative"));
            }
            Ok(Some(Mod::Minutes(minutes)))
        }
        _ => Ok(None),
    }
}

/// Resolves a category by name, creating it on demand the way the original
/// app's "new category" flow did.
fn resolve_category(
    store: &DataStore,
    categories: &mut Vec<Category>,
    name: &str,
) -> uuid::Uuid {
    if let Some(existing) = categories
        .iter()
        .find(|category| category.name.eq_ignore_ascii_case(name))
    {
        return existing.uuid;
    }

    let id = store.next_category_id(categories);
    let category = Category::new(name.to_string(), "#fbbf24".to_string(), id);
    let uuid = category.uuid;
    info!(name, %uuid, "created category on demand");
    categories.push(category);
    uuid
}

#[instrument(skip(store, args, now))]
fn cmd_add(store: &mut DataStore, args: &[String], now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command add");

    let mut tasks = store.load_tasks()?;
    let mut categories = store.load_categories()?;
    let session = store.load_session()?;
    let tasks_before = tasks.clone();
    let categories_before = categories.clone();

    let (desc_parts, mods) = parse_desc_and_mods(args)?;
    if desc_parts.is_empty() {
        return Err(anyhow!("add: description is required"));
    }

    let mut category_name = None;
    let mut emoji = None;
    let mut minutes = None;
    for one_mod in mods {
        match one_mod {
            Mod::Category(name) => category_name = Some(name),
            Mod::Emoji(value) => emoji = Some(value),
            Mod::Minutes(value) => minutes = Some(value),
        }
    }

    let category_name =
        category_name.ok_or_else(|| anyhow!("add: category:NAME is required"))?;
    let category = resolve_category(store, &mut categories, &category_name);

    let next_id = store.next_task_id(&tasks);
    let mut task = Task::new(
        desc_parts.join(" "),
        category,
        to_project_date(now),
        now,
        next_id,
    );
    task.emoji = emoji;
    if let Some(minutes) = minutes {
        task.milliseconds = minutes * 60 * 1000;
    }

    store.push_undo_snapshot(&tasks_before, &categories_before, &session)?;
    tasks.push(task.clone());
    store.save_tasks(&tasks)?;
    store.save_categories(&categories)?;

    debug!(task_count = tasks.len(), "task added");
    println!("Created task {}.", task.id.unwrap_or(next_id));
    Ok(())
}

#[instrument(skip(store, renderer, now))]
fn cmd_list(store: &mut DataStore, renderer: &mut Renderer, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command list");

    let mut tasks = store.load_tasks()?;
    let categories = store.load_categories()?;
    let session = store.load_session()?;
    let tasks_before = tasks.clone();

    // The original cloned stale tasks on every fetch; listing is the closest
    // equivalent here.
    let cloned = rollover_stale_tasks(store, &mut tasks, now);
    if cloned > 0 {
        store.push_undo_snapshot(&tasks_before, &categories, &session)?;
        store.save_tasks(&tasks)?;
        info!(cloned, "rolled stale tasks into today");
    }

    let mut rows: Vec<Task> = tasks.into_iter().filter(|task| task.visible).collect();
    rows.sort_by_key(|task| std::cmp::Reverse(task.milliseconds));

    renderer.print_task_table(&rows, &categories, &session)?;
    Ok(())
}

#[instrument(skip(store, selector_terms, args, now))]
fn cmd_modify(
    store: &mut DataStore,
    selector_terms: &[String],
    args: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command modify");

    let mut tasks = store.load_tasks()?;
    let mut categories = store.load_categories()?;
    let session = store.load_session()?;
    let tasks_before = tasks.clone();
    let categories_before = categories.clone();

    let selector = Selector::parse(selector_terms)?;
    let target = select_one(&tasks, &selector)?.uuid;

    let (desc_parts, mods) = parse_desc_and_mods(args)?;
    if desc_parts.is_empty() && mods.is_empty() {
        return Err(anyhow!("modify: nothing to change"));
    }

    let mut category = None;
    let mut emoji = None;
    let mut minutes = None;
    for one_mod in mods {
        match one_mod {
            Mod::Category(name) => {
                category = Some(resolve_category(store, &mut categories, &name));
            }
            Mod::Emoji(value) => emoji = Some(value),
            Mod::Minutes(value) => minutes = Some(value),
        }
    }

    let task = tasks
        .iter_mut()
        .find(|task| task.uuid == target)
        .ok_or_else(|| anyhow!("task vanished during modify"))?;

    if !desc_parts.is_empty() {
        task.description = desc_parts.join(" ");
    }
    if let Some(category) = category {
        task.category = category;
    }
    if let Some(emoji) = emoji {
        task.emoji = Some(emoji);
    }
    if let Some(minutes) = minutes {
        task.milliseconds = minutes * 60 * 1000;
    }
    task.modified = now;

    store.push_undo_snapshot(&tasks_before, &categories_before, &session)?;
    store.save_tasks(&tasks)?;
    store.save_categories(&categories)?;

    println!("Modified 1 task.");
    Ok(())
}

#[instrument(skip(store, selector_terms, now))]
fn cmd_start(
    store: &mut DataStore,
    selector_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command start");

    let mut tasks = store.load_tasks()?;
    let categories = store.load_categories()?;
    let mut session = store.load_session()?;
    let tasks_before = tasks.clone();
    let session_before = session.clone();

    // Clone stale tasks first so the selector lands on today's copy.
    let cloned = rollover_stale_tasks(store, &mut tasks, now);

    let selector = Selector::parse(selector_terms)?;
    let target = select_one(&tasks, &selector)?.clone();

    let outcome = session.start(&target, now)?;
    match outcome {
        StartOutcome::AlreadyRunning => {
            if cloned > 0 {
                store.push_undo_snapshot(&tasks_before, &categories, &session_before)?;
                store.save_tasks(&tasks)?;
            }
            println!("Task {} is already running.", target.description);
            return Ok(());
        }
        StartOutcome::Started { committed } => {
            if let Some(commit) = committed {
                apply_commit(&mut tasks, &commit, now);
                debug!(
                    previous = %commit.task,
                    milliseconds = commit.milliseconds,
                    "committed time to previous task on switch"
                );
            }
        }
    }

    store.push_undo_snapshot(&tasks_before, &categories, &session_before)?;
    store.save_tasks(&tasks)?;
    store.save_session(&session)?;

    println!("Started timer on: {}", target.description);
    Ok(())
}

#[instrument(skip(store, now))]
fn cmd_stop(store: &mut DataStore, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command stop");

    let mut tasks = store.load_tasks()?;
    let categories = store.load_categories()?;
    let mut session = store.load_session()?;
    let tasks_before = tasks.clone();
    let session_before = session.clone();

    let commit = session.stop(now)?;
    apply_commit(&mut tasks, &commit, now);

    store.push_undo_snapshot(&tasks_before, &categories, &session_before)?;
    store.save_tasks(&tasks)?;
    store.save_session(&session)?;

    println!(
        "Stopped timer; total {}.",
        crate::render::format_clock(commit.milliseconds)
    );
    Ok(())
}

#[instrument(skip(store, renderer, now))]
fn cmd_status(
    store: &mut DataStore,
    renderer: &mut Renderer,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let tasks = store.load_tasks()?;
    let session = store.load_session()?;
    renderer.print_status(&session, &tasks, now)?;
    Ok(())
}

#[instrument(skip(store, selector_terms, now))]
fn cmd_strike(
    store: &mut DataStore,
    selector_terms: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!("command strike");

    let mut tasks = store.load_tasks()?;
    let categories = store.load_categories()?;
    let session = store.load_session()?;
    let tasks_before = tasks.clone();

    let selector = Selector::parse(selector_terms)?;
    let target = select_one(&tasks, &selector)?.uuid;

    let task = tasks
        .iter_mut()
        .find(|task| task.uuid == target)
        .ok_or_else(|| anyhow!("task vanished during strike"))?;
    task.strikethrough = !task.strikethrough;
    task.modified = now;
    let struck = task.strikethrough;

    store.push_undo_snapshot(&tasks_before, &categories, &session)?;
    store.save_tasks(&tasks)?;

    println!(
        "Task {}.",
        if struck { "struck through" } else { "restored" }
    );
    Ok(())
}

#[instrument(skip(store, now))]
fn cmd_rollover(store: &mut DataStore, now: DateTime<Utc>) -> anyhow::Result<()> {
    info!("command rollover");

    let mut tasks = store.load_tasks()?;
    let categories = store.load_categories()?;
    let session = store.load_session()?;
    let tasks_before = tasks.clone();

    let cloned = rollover_stale_tasks(store, &mut tasks, now);
    if cloned > 0 {
        store.push_undo_snapshot(&tasks_before, &categories, &session)?;
        store.save_tasks(&tasks)?;
    }

    println!("Rolled {cloned} task(s) into today.");
    Ok(())
}

#[instrument(skip(store, selector_terms))]
fn cmd_delete(store: &mut DataStore, selector_terms: &[String]) -> anyhow::Result<()> {
    info!("command delete");

    let mut tasks = store.load_tasks()?;
    let categories = store.load_categories()?;
    let mut session = store.load_session()?;
    let tasks_before = tasks.clone();
    let session_before = session.clone();

    let selector = Selector::parse(selector_terms)?;
    let target = select_one(&tasks, &selector)?.uuid;

    if session.task_in_process == Some(target) {
        warn!(task = %target, "deleting the in-process task; timer cleared");
        session = Session::default();
    }

    tasks.retain(|task| task.uuid != target);

    store.push_undo_snapshot(&tasks_before, &categories, &session_before)?;
    store.save_tasks(&tasks)?;
    store.save_session(&session)?;

    println!("Deleted 1 task.");
    Ok(())
}

#[instrument(skip(store, renderer))]
fn cmd_categories(store: &mut DataStore, renderer: &mut Renderer) -> anyhow::Result<()> {
    let tasks = store.load_tasks()?;
    let categories = store.load_categories()?;
    renderer.print_category_table(&categories, &tasks)?;
    Ok(())
}

#[instrument(skip(store, args))]
fn cmd_category(store: &mut DataStore, args: &[String]) -> anyhow::Result<()> {
    let Some(action) = args.first() else {
        return Err(anyhow!("category requires: add NAME [COLOR] | delete NAME"));
    };

    let tasks = store.load_tasks()?;
    let mut categories = store.load_categories()?;
    let session = store.load_session()?;
    let categories_before = categories.clone();

    match action.to_ascii_lowercase().as_str() {
        "add" => {
            let name = args
                .get(1)
                .ok_or_else(|| anyhow!("category add requires a name"))?;
            if categories
                .iter()
                .any(|category| category.name.eq_ignore_ascii_case(name))
            {
                return Err(anyhow!("category already exists: {name}"));
            }

            let color = args
                .get(2)
                .cloned()
                .unwrap_or_else(|| "#fbbf24".to_string());
            let id = store.next_category_id(&categories);
            categories.push(Category::new(name.clone(), color, id));

            store.push_undo_snapshot(&tasks, &categories_before, &session)?;
            store.save_categories(&categories)?;
            println!("Created category {name}.");
            Ok(())
        }
        "delete" => {
            let name = args
                .get(1)
                .ok_or_else(|| anyhow!("category delete requires a name"))?;
            let Some(category) = categories
                .iter()
                .find(|category| category.name.eq_ignore_ascii_case(name))
            else {
                return Err(anyhow!("unknown category: {name}"));
            };

            if tasks.iter().any(|task| task.category == category.uuid) {
                return Err(anyhow!(
                    "category {name} is still referenced by tasks; reassign them first"
                ));
            }

            let uuid = category.uuid;
            categories.retain(|category| category.uuid != uuid);

            store.push_undo_snapshot(&tasks, &categories_before, &session)?;
            store.save_categories(&categories)?;
            println!("Deleted category {name}.");
            Ok(())
        }
        other => Err(anyhow!("unknown category action: {other}")),
    }
}

/// Per-day, per-category accumulated hours: the data series the original fed
/// into its line chart, printed as a table.
#[instrument(skip(store, renderer, args))]
fn cmd_report(store: &mut DataStore, renderer: &mut Renderer, args: &[String]) -> anyhow::Result<()> {
    info!("command report");

    let tasks = store.load_tasks()?;
    let categories = store.load_categories()?;

    let day_limit: Option<usize> = match args.first().map(String::as_str) {
        None => None,
        Some("--days") => {
            let raw = args
                .get(1)
                .ok_or_else(|| anyhow!("--days requires a number"))?;
            Some(raw.parse().map_err(|_| anyhow!("invalid day count: {raw}"))?)
        }
        Some(other) => Some(
            other
                .parse()
                .map_err(|_| anyhow!("invalid day count: {other}"))?,
        ),
    };

    // date -> category uuid -> milliseconds, over the full history (hidden
    // originals carry the past days' totals).
    let mut grouped: BTreeMap<NaiveDate, BTreeMap<uuid::Uuid, i64>> = BTreeMap::new();
    for task in &tasks {
        *grouped
            .entry(task.date)
            .or_default()
            .entry(task.category)
            .or_insert(0) += task.milliseconds;
    }

    let mut series: Vec<&Category> = categories.iter().collect();
    series.sort_by(|a, b| a.name.cmp(&b.name));

    let mut headers = vec!["Date".to_string()];
    headers.extend(series.iter().map(|category| category.name.clone()));

    let mut rows: Vec<Vec<String>> = grouped
        .iter()
        .map(|(date, totals)| {
            let mut row = vec![date.format("%Y-%m-%d").to_string()];
            row.extend(
                series
                    .iter()
                    .map(|category| format_hours(totals.get(&category.uuid).copied().unwrap_or(0))),
            );
            row
        })
        .collect();

    if let Some(limit) = day_limit {
        let skip = rows.len().saturating_sub(limit);
        rows.drain(..skip);
    }

    renderer.print_report_table(&headers, &rows)?;
    Ok(())
}

#[instrument(skip(store))]
fn cmd_undo(store: &mut DataStore) -> anyhow::Result<()> {
    info!("command undo");

    let Some((tasks, categories, session)) = store.pop_undo_snapshot()? else {
        println!("No undo transactions available.");
        return Ok(());
    };

    store.save_tasks(&tasks)?;
    store.save_categories(&categories)?;
    store.save_session(&session)?;

    println!("Undo completed.");
    Ok(())
}

#[instrument(skip(store))]
fn cmd_export(store: &mut DataStore) -> anyhow::Result<()> {
    info!("command export");

    let tasks = store.load_tasks()?;
    let categories = store.load_categories()?;

    let out = serde_json::to_string(&json!({
        "tasks": tasks,
        "categories": categories,
    }))?;
    println!("{out}");
    Ok(())
}

fn cmd_commands() -> anyhow::Result<()> {
    for command in known_command_names() {
        println!("{command}");
    }
    Ok(())
}

fn cmd_show(cfg: &Config) -> anyhow::Result<()> {
    for (k, v) in cfg.iter() {
        println!("{k}={v}");
    }
    Ok(())
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "Implemented commands: add, list, modify, start, stop, status, strike, rollover, delete, categories, category, report, undo, export"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{expand_command_abbrev, known_command_names, parse_desc_and_mods};

    #[test]
    fn abbreviations_expand_when_unambiguous() {
        let known = known_command_names();
        assert_eq!(expand_command_abbrev("li", &known), Some("list"));
        assert_eq!(expand_command_abbrev("rep", &known), Some("report"));
        // "st" could be start, stop, status, or strike.
        assert_eq!(expand_command_abbrev("st", &known), None);
        assert_eq!(expand_command_abbrev("start", &known), Some("start"));
    }

    #[test]
    fn mods_split_from_description() {
        let args = vec![
            "Review".to_string(),
            "PRs".to_string(),
            "category:Work".to_string(),
            "minutes:30".to_string(),
        ];
        let (desc, mods) = parse_desc_and_mods(&args).expect("parse");
        assert_eq!(desc.join(" "), "Review PRs");
        assert_eq!(mods.len(), 2);
    }

    #[test]
    fn double_dash_forces_literal_description() {
        let args = vec![
            "--".to_string(),
            "category:notamod".to_string(),
        ];
        let (desc, mods) = parse_desc_and_mods(&args).expect("parse");
        assert_eq!(desc.join(" "), "category:notamod");
        assert!(mods.is_empty());
    }

    #[test]
    fn negative_minutes_rejected() {
        let args = vec!["minutes:-5".to_string()];
        assert!(parse_desc_and_mods(&args).is_err());
    }
}
