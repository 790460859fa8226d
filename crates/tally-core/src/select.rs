use anyhow::anyhow;
use tracing::debug;
use uuid::Uuid;

use crate::task::Task;

/// How a command picks its target task: a display id, a full UUID, or a
/// case-insensitive description substring. Hidden (rolled-over) tasks are
/// only reachable by UUID so that text selectors never resurrect history.
#[derive(Debug, Clone)]
pub enum Selector {
    Id(u64),
    Uuid(Uuid),
    Text(String),
}

impl Selector {
    pub fn parse(terms: &[String]) -> anyhow::Result<Self> {
        if terms.is_empty() {
            return Err(anyhow!("a task selector is required (id, uuid, or text)"));
        }

        if terms.len() == 1 {
            let token = terms[0].trim();
            if let Ok(id) = token.parse::<u64>() {
                debug!(id, "selector is a display id");
                return Ok(Self::Id(id));
            }
            if let Ok(uuid) = Uuid::parse_str(token) {
                debug!(%uuid, "selector is a uuid");
                return Ok(Self::Uuid(uuid));
            }
        }

        Ok(Self::Text(terms.join(" ").to_ascii_lowercase()))
    }

    pub fn matches(&self, task: &Task) -> bool {
        match self {
            Self::Uuid(uuid) => task.uuid == *uuid,
            Self::Id(id) => task.visible && task.id == Some(*id),
            Self::Text(needle) => {
                task.visible && task.description.to_ascii_lowercase().contains(needle)
            }
        }
    }
}

/// Exactly-one-match selection used by commands that mutate a single task.
pub fn select_one<'a>(tasks: &'a [Task], selector: &Selector) -> anyhow::Result<&'a Task> {
    let mut matches = tasks.iter().filter(|task| selector.matches(task));
    let first = matches
        .next()
        .ok_or_else(|| anyhow!("no task matches {selector:?}"))?;
    if matches.next().is_some() {
        return Err(anyhow!("more than one task matches {selector:?}"));
    }
    Ok(first)
}
