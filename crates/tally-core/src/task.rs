use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::compact_date_serde;

/// A single day's task. Accumulated time lives on the task itself; the
/// session only knows which task is currently accruing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub uuid: Uuid,

    /// Display id, allocated past the current maximum on creation.
    #[serde(default)]
    pub id: Option<u64>,

    pub category: Uuid,

    pub description: String,

    #[serde(default)]
    pub emoji: Option<String>,

    /// Total accrued time. Timer commits replace this value rather than add
    /// to it: a running timer starts at `now - milliseconds`.
    pub milliseconds: i64,

    /// The project-timezone calendar day this task belongs to.
    pub date: NaiveDate,

    /// Cleared when the task is rolled over into a fresh clone; hidden tasks
    /// keep their totals but no longer appear in listings.
    pub visible: bool,

    #[serde(default)]
    pub strikethrough: bool,

    #[serde(with = "compact_date_serde")]
    pub entry: DateTime<Utc>,

    #[serde(with = "compact_date_serde")]
    pub modified: DateTime<Utc>,
}

impl Task {
    pub fn new(
        description: String,
        category: Uuid,
        date: NaiveDate,
        now: DateTime<Utc>,
        id: u64,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            id: Some(id),
            category,
            description,
            emoji: None,
            milliseconds: 0,
            date,
            visible: true,
            strikethrough: false,
            entry: now,
            modified: now,
        }
    }

    pub fn is_stale(&self, today: NaiveDate) -> bool {
        self.visible && self.date != today
    }

    /// Fresh zero-duration copy dated `today`. The caller hides the original.
    pub fn clone_for_day(&self, today: NaiveDate, now: DateTime<Utc>, id: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            id: Some(id),
            category: self.category,
            description: self.description.clone(),
            emoji: self.emoji.clone(),
            milliseconds: 0,
            date: today,
            visible: true,
            strikethrough: false,
            entry: now,
            modified: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub uuid: Uuid,

    #[serde(default)]
    pub id: Option<u64>,

    pub name: String,

    /// Hex color, used as a report series label only (no terminal mapping).
    pub color: String,
}

impl Category {
    pub fn new(name: String, color: String, id: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            id: Some(id),
            name,
            color,
        }
    }
}
