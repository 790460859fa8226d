use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::session::Session;
use crate::task::{Category, Task};

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    pub categories_path: PathBuf,
    pub session_path: PathBuf,
    pub undo_path: PathBuf,
}

/// One undo step: the full pre-mutation state of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UndoEntry {
    tasks: Vec<Task>,
    categories: Vec<Category>,
    session: Session,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let tasks_path = data_dir.join("tasks.data");
        let categories_path = data_dir.join("categories.data");
        let session_path = data_dir.join("session.data");
        let undo_path = data_dir.join("undo.data");

        if !tasks_path.exists() {
            fs::write(&tasks_path, "")?;
        }
        if !categories_path.exists() {
            fs::write(&categories_path, "")?;
        }
        if !session_path.exists() {
            fs::write(&session_path, "")?;
        }
        if !undo_path.exists() {
            fs::write(&undo_path, "")?;
        }

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            categories = %categories_path.display(),
            session = %session_path.display(),
            undo = %undo_path.display(),
            "opened datastore"
        );

        Ok(Self {
            data_dir,
            tasks_path,
            categories_path,
            session_path,
            undo_path,
        })
    }

    #[tracing::instrument(skip(self))]
    pub fn load_tasks(&self) -> anyhow::Result<Vec<Task>> {
        load_jsonl(&self.tasks_path).context("failed to load tasks.data")
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.tasks_path, tasks).context("failed to save tasks.data")
    }

    #[tracing::instrument(skip(self))]
    pub fn load_categories(&self) -> anyhow::Result<Vec<Category>> {
        load_jsonl(&self.categories_path).context("failed to load categories.data")
    }

    #[tracing::instrument(skip(self, categories))]
    pub fn save_categories(&self, categories: &[Category]) -> anyhow::Result<()> {
        save_jsonl_atomic(&self.categories_path, categories)
            .context("failed to save categories.data")
    }

    /// An absent or empty session file is an idle session.
    #[tracing::instrument(skip(self))]
    pub fn load_session(&self) -> anyhow::Result<Session> {
        let raw = fs::read_to_string(&self.session_path)
            .with_context(|| format!("failed reading {}", self.session_path.display()))?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Session::default());
        }

        serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {}", self.session_path.display()))
    }

    #[tracing::instrument(skip(self, session))]
    pub fn save_session(&self, session: &Session) -> anyhow::Result<()> {
        let serialized = serde_json::to_string(session)?;
        let dir = self.session_path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        writeln!(temp, "{serialized}")?;
        temp.flush()?;
        temp.persist(&self.session_path)
            .map_err(|err| anyhow!("failed to persist {}: {}", self.session_path.display(), err))?;
        Ok(())
    }

    pub fn next_task_id(&self, tasks: &[Task]) -> u64 {
        tasks.iter().filter_map(|t| t.id).max().unwrap_or(0) + 1
    }

    pub fn next_category_id(&self, categories: &[Category]) -> u64 {
        categories.iter().filter_map(|c| c.id).max().unwrap_or(0) + 1
    }

    #[tracing::instrument(skip(self, tasks, categories, session))]
    pub fn push_undo_snapshot(
        &self,
        tasks: &[Task],
        categories: &[Category],
        session: &Session,
    ) -> anyhow::Result<()> {
        let mut entries = load_undo_entries(&self.undo_path)?;
        entries.push(UndoEntry {
            tasks: tasks.to_vec(),
            categories: categories.to_vec(),
            session: session.clone(),
        });
        save_jsonl_atomic(&self.undo_path, &entries)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn pop_undo_snapshot(&self) -> anyhow::Result<Option<(Vec<Task>, Vec<Category>, Session)>> {
        let mut entries = load_undo_entries(&self.undo_path)?;
        let Some(entry) = entries.pop() else {
            return Ok(None);
        };
        save_jsonl_atomic(&self.undo_path, &entries)?;
        Ok(Some((entry.tasks, entry.categories, entry.session)))
    }
}

#[tracing::instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: T = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, rows: &[T]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

fn load_undo_entries(path: &Path) -> anyhow::Result<Vec<UndoEntry>> {
    load_jsonl(path).context("failed to load undo.data")
}
