//! Timing aggregation for finished runs.
//!
//! The service reports times as `HH:MM:SS` strings, with hours unbounded
//! since execution time is cumulated across instances. They are gathered
//! into an [`ExecutionReport`] once every task is terminal, optionally
//! comparing two tasks as a speed-up ratio. Only that comparison needs the
//! strings to parse; an unreadable timing elsewhere is kept as reported.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::core::task::TaskState;
use crate::core::types::TaskId;
use crate::execution::TrackedTask;
use crate::remote::{BatchService, RemoteError};

/// Errors raised while aggregating results.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The candidate duration is too short for a meaningful ratio.
    #[error("cannot compare against a duration of {0:?}: below the one second clock resolution")]
    DegenerateTiming(Duration),

    /// A timing string is not `[D.]H:MM:SS`.
    #[error("invalid timing '{value}': {reason}")]
    InvalidTiming { value: String, reason: &'static str },

    /// A report was requested while a task could still change.
    #[error("task '{task}' is not terminal (state {state})")]
    NotTerminal { task: TaskId, state: TaskState },

    /// A compared task is not part of the run.
    #[error("task '{0}' is not part of the run")]
    UnknownTask(TaskId),

    #[error("failed to read timings: {0}")]
    Remote(#[from] RemoteError),
}

/// Parse a reported duration such as `00:02:00`, `30:00:00` or `1.02:00:00`.
///
/// Hours are not capped at 24. An optional `D.` prefix counts whole days.
pub fn parse_wall_clock(value: &str) -> Result<Duration, ReportError> {
    let invalid = |reason| ReportError::InvalidTiming {
        value: value.to_string(),
        reason,
    };

    let trimmed = value.trim();
    let (days, clock) = match trimmed.split_once('.') {
        Some((days, clock)) if !days.contains(':') => {
            (field(days).ok_or_else(|| invalid("day count is not a number"))?, clock)
        }
        _ => (0, trimmed),
    };

    let mut parts = clock.split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid("expected H:MM:SS"));
    };
    let hours = field(hours).ok_or_else(|| invalid("hours are not a number"))?;
    let minutes = field(minutes)
        .filter(|m| *m < 60)
        .ok_or_else(|| invalid("minutes must be 00-59"))?;
    let seconds = field(seconds)
        .filter(|s| *s < 60)
        .ok_or_else(|| invalid("seconds must be 00-59"))?;

    let units: [(i64, fn(i64) -> Option<TimeDelta>); 4] = [
        (days, TimeDelta::try_days),
        (hours, TimeDelta::try_hours),
        (minutes, TimeDelta::try_minutes),
        (seconds, TimeDelta::try_seconds),
    ];
    units
        .into_iter()
        .try_fold(TimeDelta::zero(), |total, (count, unit)| {
            total.checked_add(&unit(count)?)
        })
        .and_then(|total| total.to_std().ok())
        .ok_or_else(|| invalid("out of range"))
}

/// A non-empty run of ASCII digits.
fn field(digits: &str) -> Option<i64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Whole seconds of a reported timing, or `None` when it does not parse.
fn reported_secs(task: &TaskId, what: &str, value: &str) -> Option<u64> {
    match parse_wall_clock(value) {
        Ok(duration) => Some(duration.as_secs()),
        Err(e) => {
            warn!(task = %task, error = %e, "{} time kept as reported", what);
            None
        }
    }
}

/// How many times faster `candidate` ran than `baseline`.
pub fn speedup(baseline: Duration, candidate: Duration) -> Result<f64, ReportError> {
    if candidate < Duration::from_secs(1) {
        return Err(ReportError::DegenerateTiming(candidate));
    }
    Ok(baseline.as_secs_f64() / candidate.as_secs_f64())
}

/// A pair of tasks whose execution times are compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedupComparison {
    /// The slow reference, e.g. the full-order validation.
    pub baseline: TaskId,
    /// The task expected to be faster.
    pub candidate: TaskId,
}

/// What the report should contain beyond per-task timings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSettings {
    pub speedup: Option<SpeedupComparison>,
    /// Free-form lines appended to the rendered report.
    pub notes: Vec<String>,
}

impl ReportSettings {
    pub fn with_speedup(mut self, baseline: impl Into<TaskId>, candidate: impl Into<TaskId>) -> Self {
        self.speedup = Some(SpeedupComparison {
            baseline: baseline.into(),
            candidate: candidate.into(),
        });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

/// Timings of one terminal task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskTiming {
    pub task_id: TaskId,
    pub state: TaskState,
    pub instance_count: u32,
    /// Cumulated time across instances, as reported.
    pub execution_time: String,
    /// `None` when `execution_time` is not a readable duration.
    pub execution_secs: Option<u64>,
    /// Wall-clock span of the task, as reported.
    pub wall_time: String,
    pub wall_secs: Option<u64>,
}

/// Result of a speed-up comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Speedup {
    pub baseline: TaskId,
    pub candidate: TaskId,
    pub ratio: f64,
}

/// Timings of a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub timings: Vec<TaskTiming>,
    pub speedup: Option<Speedup>,
    pub notes: Vec<String>,
}

impl ExecutionReport {
    /// Read timings for every task from the service.
    ///
    /// Fails with [`ReportError::NotTerminal`] before any remote call if a
    /// task is still live. A timing that does not parse only fails the
    /// report when it is part of the configured speed-up comparison.
    pub async fn collect(
        service: &dyn BatchService,
        tasks: &[TrackedTask],
        settings: &ReportSettings,
    ) -> Result<Self, ReportError> {
        if let Some(task) = tasks.iter().find(|t| !t.is_terminal()) {
            return Err(ReportError::NotTerminal {
                task: task.id().clone(),
                state: task.state(),
            });
        }

        let mut timings = Vec::with_capacity(tasks.len());
        for task in tasks {
            let execution_time = service.execution_time(task.handle()).await?;
            let wall_time = service.wall_time(task.handle()).await?;
            timings.push(TaskTiming {
                task_id: task.id().clone(),
                state: task.state(),
                instance_count: task.instance_count(),
                execution_secs: reported_secs(task.id(), "execution", &execution_time),
                wall_secs: reported_secs(task.id(), "wall", &wall_time),
                execution_time,
                wall_time,
            });
        }

        let mut report = ExecutionReport {
            timings,
            speedup: None,
            notes: settings.notes.clone(),
        };
        if let Some(comparison) = &settings.speedup {
            report.speedup = Some(report.compare(comparison)?);
        }
        Ok(report)
    }

    /// Timing of a single task.
    pub fn timing(&self, task_id: &TaskId) -> Option<&TaskTiming> {
        self.timings.iter().find(|t| &t.task_id == task_id)
    }

    /// Compare the execution times of two tasks in the report.
    pub fn compare(&self, comparison: &SpeedupComparison) -> Result<Speedup, ReportError> {
        let lookup = |id: &TaskId| {
            let timing = self
                .timing(id)
                .ok_or_else(|| ReportError::UnknownTask(id.clone()))?;
            parse_wall_clock(&timing.execution_time)
        };
        let ratio = speedup(lookup(&comparison.baseline)?, lookup(&comparison.candidate)?)?;
        Ok(Speedup {
            baseline: comparison.baseline.clone(),
            candidate: comparison.candidate.clone(),
            ratio,
        })
    }

    /// Human-readable summary.
    pub fn render(&self) -> String {
        let mut out = String::from("******** Time results ********\n");
        for timing in &self.timings {
            let _ = writeln!(
                out,
                "{:<16} {:<10} execution {}  wall {}  ({} instance{})",
                timing.task_id.as_str(),
                timing.state.to_string(),
                timing.execution_time,
                timing.wall_time,
                timing.instance_count,
                if timing.instance_count == 1 { "" } else { "s" },
            );
        }
        if let Some(speedup) = &self.speedup {
            let _ = writeln!(
                out,
                "{} is {:.1} times quicker than {}",
                speedup.candidate, speedup.ratio, speedup.baseline
            );
        }
        for note in &self.notes {
            let _ = writeln!(out, "{}", note);
        }
        out
    }
}
