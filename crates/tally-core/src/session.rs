use anyhow::anyhow;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::{end_of_day, to_project_date};
use crate::task::Task;

/// Singleton per data dir: the state of the one timer. Invariants:
/// `start_time` is `Some` iff a timer runs, and `task_in_process` is `Some`
/// only while running.
///
/// Timestamps persist losslessly (RFC 3339) so the 23:59:59.999 cutoff and
/// sub-millisecond start times survive a round trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub end_of_day: Option<DateTime<Utc>>,

    #[serde(default)]
    pub task_in_process: Option<Uuid>,
}

/// Accrued time to write back onto a task. The machine never touches the
/// task list itself; the command layer applies commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerCommit {
    pub task: Uuid,
    pub milliseconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Selecting the task already in process is a no-op.
    AlreadyRunning,
    Started {
        /// Set when switching away from another running task: its total up
        /// to the switch instant.
        committed: Option<TimerCommit>,
    },
}

impl Session {
    pub fn is_running(&self) -> bool {
        self.start_time.is_some()
    }

    /// Presentation-only: total accrued time of the running task as of `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.start_time.map(|start| now - start)
    }

    /// Transition to Running against `task`. The start time is backdated by
    /// the task's accumulated milliseconds so accrual resumes where it left
    /// off, which is also why commits replace the task total instead of
    /// adding to it.
    pub fn start(&mut self, task: &Task, now: DateTime<Utc>) -> anyhow::Result<StartOutcome> {
        if self.is_running() && self.task_in_process == Some(task.uuid) {
            return Ok(StartOutcome::AlreadyRunning);
        }

        if !task.visible {
            return Err(anyhow!("task {} is hidden and cannot be started", task.uuid));
        }

        let today = to_project_date(now);
        if task.date != today {
            return Err(anyhow!(
                "task is dated {}; run `tally rollover` to carry it into today first",
                task.date
            ));
        }

        let committed = match (self.start_time, self.task_in_process) {
            (Some(start), Some(previous)) => Some(TimerCommit {
                task: previous,
                milliseconds: (now - start).num_milliseconds().max(0),
            }),
            _ => None,
        };

        self.start_time = Some(now - Duration::milliseconds(task.milliseconds));
        self.end_of_day = Some(end_of_day(now)?);
        self.task_in_process = Some(task.uuid);

        Ok(StartOutcome::Started { committed })
    }

    /// Transition to Idle, committing the running task's total as of `now`.
    /// The cutoff is recomputed from the old start time and kept on the
    /// session record.
    pub fn stop(&mut self, now: DateTime<Utc>) -> anyhow::Result<TimerCommit> {
        let start = self
            .start_time
            .ok_or_else(|| anyhow!("no timer is running"))?;
        let task = self
            .task_in_process
            .ok_or_else(|| anyhow!("timer is running but bound to no task"))?;

        let commit = TimerCommit {
            task,
            milliseconds: (now - start).num_milliseconds().max(0),
        };

        self.end_of_day = Some(end_of_day(start)?);
        self.start_time = None;
        self.task_in_process = None;

        Ok(commit)
    }

    /// Day-rollover check, run on every session load: a timer left running
    /// across the end-of-day cutoff is force-stopped and credited only up to
    /// the cutoff.
    pub fn rollover(
        &mut self,
        task_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<TimerCommit>> {
        let (Some(start), Some(task)) = (self.start_time, self.task_in_process) else {
            return Ok(None);
        };

        if task_date == to_project_date(now) {
            return Ok(None);
        }

        let cutoff = match self.end_of_day {
            Some(cutoff) => cutoff,
            // Sessions written before the cutoff was tracked.
            None => end_of_day(start)?,
        };

        if now <= cutoff {
            return Ok(None);
        }

        let commit = TimerCommit {
            task,
            milliseconds: (cutoff - start).num_milliseconds().max(0),
        };

        self.start_time = None;
        self.task_in_process = None;

        Ok(Some(commit))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::{Session, StartOutcome};
    use crate::datetime::to_project_date;
    use crate::task::Task;

    fn task_for(now: chrono::DateTime<Utc>, milliseconds: i64) -> Task {
        let mut task = Task::new(
            "focus".to_string(),
            Uuid::new_v4(),
            to_project_date(now),
            now,
            1,
        );
        task.milliseconds = milliseconds;
        task
    }

    fn noon() -> chrono::DateTime<Utc> {
        // 12:00 UTC is mid-morning in the project zone; well clear of the
        // day boundary on both sides.
        Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    #[test]
    fn round_trip_never_double_counts() {
        let t0 = noon();
        let mut session = Session::default();
        let mut task = task_for(t0, 60_000);

        match session.start(&task, t0).expect("start") {
            StartOutcome::Started { committed: None } => {}
            other => panic!("unexpected outcome: {other:?}"),
        }

        let commit = session.stop(t0 + Duration::seconds(5)).expect("stop");
        assert_eq!(commit.task, task.uuid);
        assert_eq!(commit.milliseconds, 65_000);
        assert!(!session.is_running());
        assert!(session.start_time.is_none());
        assert!(session.task_in_process.is_none());

        // Resume and stop immediately: the total is unchanged.
        task.milliseconds = commit.milliseconds;
        let t1 = t0 + Duration::minutes(10);
        session.start(&task, t1).expect("restart");
        let commit = session.stop(t1).expect("stop again");
        assert_eq!(commit.milliseconds, 65_000);
    }

    #[test]
    fn switching_commits_previous_task_first() {
        let t0 = noon();
        let mut session = Session::default();
        let first = task_for(t0, 30_000);
        let second = task_for(t0, 0);

        session.start(&first, t0).expect("start first");

        let t1 = t0 + Duration::seconds(90);
        let outcome = session.start(&second, t1).expect("switch");
        let StartOutcome::Started {
            committed: Some(commit),
        } = outcome
        else {
            panic!("expected a commit for the first task, got {outcome:?}");
        };

        assert_eq!(commit.task, first.uuid);
        assert_eq!(commit.milliseconds, 120_000);
        assert_eq!(session.task_in_process, Some(second.uuid));
        assert_eq!(session.start_time, Some(t1));
    }

    #[test]
    fn selecting_active_task_is_noop() {
        let t0 = noon();
        let mut session = Session::default();
        let task = task_for(t0, 0);

        session.start(&task, t0).expect("start");
        let start_before = session.start_time;

        let outcome = session
            .start(&task, t0 + Duration::seconds(30))
            .expect("reselect");
        assert_eq!(outcome, StartOutcome::AlreadyRunning);
        assert_eq!(session.start_time, start_before);
    }

    #[test]
    fn stale_task_cannot_be_started() {
        let t0 = noon();
        let mut session = Session::default();
        let mut task = task_for(t0, 0);
        task.date = to_project_date(t0) - Duration::days(1);

        assert!(session.start(&task, t0).is_err());
        assert!(!session.is_running());
    }

    #[test]
    fn stop_without_timer_is_an_error() {
        let mut session = Session::default();
        assert!(session.stop(noon()).is_err());
    }

    #[test]
    fn rollover_commits_up_to_cutoff() {
        let t0 = noon();
        let mut session = Session::default();
        let task = task_for(t0, 0);

        session.start(&task, t0).expect("start");
        let cutoff = session.end_of_day.expect("cutoff set");

        // Load the session well past the cutoff, task now a day stale.
        let later = cutoff + Duration::hours(3);
        let commit = session
            .rollover(task.date, later)
            .expect("rollover")
            .expect("force-stop");

        assert_eq!(commit.task, task.uuid);
        assert_eq!(commit.milliseconds, (cutoff - t0).num_milliseconds());
        assert!(!session.is_running());
    }

    #[test]
    fn rollover_is_noop_before_cutoff_or_same_day() {
        let t0 = noon();
        let mut session = Session::default();
        let task = task_for(t0, 0);

        session.start(&task, t0).expect("start");

        // Same project day: nothing happens no matter the clock.
        let same_day = session
            .rollover(task.date, t0 + Duration::minutes(1))
            .expect("check");
        assert!(same_day.is_none());
        assert!(session.is_running());
    }
}
