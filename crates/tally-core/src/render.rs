use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;
use uuid::Uuid;

use crate::config::Config;
use crate::session::Session;
use crate::task::{Category, Task};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, tasks, categories, session))]
    pub fn print_task_table(
        &mut self,
        tasks: &[Task],
        categories: &[Category],
        session: &Session,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Day".to_string(),
            "Category".to_string(),
            "Time".to_string(),
            "Description".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());

        for task in tasks {
            let id = task
                .id
                .map(|value| value.to_string())
                .unwrap_or_else(|| "-".to_string());
            let id = self.paint(&id, "33");

            let mut description = match &task.emoji {
                Some(emoji) => format!("{emoji} {}", task.description),
                None => task.description.clone(),
            };
            if task.strikethrough {
                description = self.paint(&description, "9");
            }
            if session.task_in_process == Some(task.uuid) {
                description = format!("{description} {}", self.paint("(running)", "32"));
            }

            rows.push(vec![
                id,
                task.date.format("%Y-%m-%d").to_string(),
                category_name(categories, task.category).to_string(),
                format_hr_min(task.milliseconds),
                description,
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    /// The timer display: derived elapsed time, refreshed by re-running the
    /// command rather than by a tick.
    #[tracing::instrument(skip(self, session, tasks, now))]
    pub fn print_status(
        &mut self,
        session: &Session,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let Some(elapsed) = session.elapsed(now) else {
            writeln!(out, "No timer running.")?;
            return Ok(());
        };

        let description = session
            .task_in_process
            .and_then(|uuid| tasks.iter().find(|task| task.uuid == uuid))
            .map(|task| task.description.as_str())
            .unwrap_or("(unknown task)");

        writeln!(
            out,
            "{}  {}",
            self.paint(&format_clock(elapsed.num_milliseconds()), "32"),
            description
        )?;

        if let Some(cutoff) = session.end_of_day {
            writeln!(out, "auto-stop at {}", cutoff.format("%Y-%m-%d %H:%M:%S%.3f UTC"))?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, categories, tasks))]
    pub fn print_category_table(
        &mut self,
        categories: &[Category],
        tasks: &[Task],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let headers = vec![
            "ID".to_string(),
            "Name".to_string(),
            "Color".to_string(),
            "Total".to_string(),
        ];

        let mut rows = Vec::with_capacity(categories.len());
        for category in categories {
            let total: i64 = tasks
                .iter()
                .filter(|task| task.category == category.uuid)
                .map(|task| task.milliseconds)
                .sum();

            rows.push(vec![
                category
                    .id
                    .map(|value| value.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                category.name.clone(),
                category.color.clone(),
                format_hh_mm(total),
            ]);
        }

        write_table(&mut out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, headers, rows))]
    pub fn print_report_table(
        &mut self,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        write_table(&mut out, headers.to_vec(), rows.to_vec())?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn category_name(categories: &[Category], uuid: Uuid) -> &str {
    categories
        .iter()
        .find(|category| category.uuid == uuid)
        .map(|category| category.name.as_str())
        .unwrap_or("-")
}

/// `02hr 05min`, the per-task accumulator format.
pub fn format_hr_min(milliseconds: i64) -> String {
    let total_minutes = milliseconds.max(0) / (1000 * 60);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    format!("{hours:02}hr {minutes:02}min")
}

/// `HH:MM`, the category-total format.
pub fn format_hh_mm(milliseconds: i64) -> String {
    let total_minutes = milliseconds.max(0) / (1000 * 60);
    format!("{:02}:{:02}", total_minutes / 60, total_minutes % 60)
}

/// `HH:MM:SS` wall-clock elapsed.
pub fn format_clock(milliseconds: i64) -> String {
    let total_seconds = milliseconds.max(0) / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60
    )
}

/// Fractional hours with two decimals, the report-cell format.
pub fn format_hours(milliseconds: i64) -> String {
    format!("{:.2}", milliseconds.max(0) as f64 / (1000.0 * 60.0 * 60.0))
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for idx in 0..column_count {
        write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        write!(writer, "{:-<width$} ", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
