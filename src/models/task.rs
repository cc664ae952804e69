use std::{collections::BTreeMap, fmt};

use serde::Deserialize;

/// Report key holding the unix time the report was written.
pub const TIME_KEY: &str = "time";
/// Report key a job sets to ask for automatic resubmission.
pub const RESUBMIT_KEY: &str = "resubmit";
/// Finish reason recorded when the operator cancels a job.
pub const CANCEL_REASON: &str = "cancel";
#[cfg(test)]
pub const OK_REASON: &str = "ok";

/// One submitted task, folded from the submission log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task_id: String,
    pub name: String,
    /// Empty until the first successful submission.
    pub external_id: String,
    pub prev_external_id: Option<String>,
    pub template: String,
    pub args: String,
}

impl TaskRecord {
    pub fn new(task_id: String, name: String, template: String, args: String) -> Self {
        Self {
            task_id,
            name,
            external_id: String::new(),
            prev_external_id: None,
            template,
            args,
        }
    }

    /// The record as it looks after a successful (re)submission.
    pub fn resubmitted(&self, external_id: String) -> Self {
        let prev = if self.external_id.is_empty() {
            self.prev_external_id.clone()
        } else {
            Some(self.external_id.clone())
        };
        Self {
            external_id,
            prev_external_id: prev,
            ..self.clone()
        }
    }
}

/// A line of the dead or finished log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalEvent {
    pub external_id: String,
    pub name: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Dead,
    Finished,
    Unknown,
    Lost,
    Running,
    Waiting,
    Other,
}

impl JobStatus {
    pub fn cancellable(self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Waiting)
    }

    pub fn needs_attention(self) -> bool {
        matches!(self, JobStatus::Dead | JobStatus::Lost)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Dead | JobStatus::Finished)
    }

    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Dead => "Dead",
            JobStatus::Finished => "Finished",
            JobStatus::Unknown => "?",
            JobStatus::Lost => "Lost",
            JobStatus::Running => "Running",
            JobStatus::Waiting => "Waiting",
            JobStatus::Other => "Other",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReportValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ReportValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            ReportValue::Null => false,
            ReportValue::Bool(b) => *b,
            ReportValue::Int(i) => *i != 0,
            ReportValue::Float(f) => *f != 0.0,
            ReportValue::Text(s) => !s.is_empty() && s != "false" && s != "0",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReportValue::Int(i) => Some(*i as f64),
            ReportValue::Float(f) => Some(*f),
            ReportValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ReportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportValue::Null => Ok(()),
            ReportValue::Bool(b) => write!(f, "{}", b),
            ReportValue::Int(i) => write!(f, "{}", i),
            ReportValue::Float(v) => write!(f, "{}", v),
            ReportValue::Text(s) => f.write_str(s),
        }
    }
}

/// Flat key/scalar mapping parsed from a job's sentinel line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Report(BTreeMap<String, ReportValue>);

impl Report {
    pub fn get(&self, key: &str) -> Option<&ReportValue> {
        self.0.get(key)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys shown as table columns.
    pub fn column_keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str).filter(|k| *k != TIME_KEY)
    }

    pub fn reported_at(&self) -> Option<f64> {
        self.get(TIME_KEY).and_then(ReportValue::as_f64)
    }

    pub fn resubmit_requested(&self) -> bool {
        self.get(RESUBMIT_KEY).map_or(false, ReportValue::is_truthy)
    }
}

impl FromIterator<(String, ReportValue)> for Report {
    fn from_iter<I: IntoIterator<Item = (String, ReportValue)>>(iter: I) -> Self {
        Report(iter.into_iter().collect())
    }
}

/// A task with its status for the current cycle. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub record: TaskRecord,
    pub status: JobStatus,
    /// Raw scheduler token, only for `JobStatus::Other`.
    pub status_detail: Option<String>,
    pub finish_reason: Option<String>,
    pub report: Report,
}

impl Job {
    pub fn new(record: TaskRecord, status: JobStatus) -> Self {
        Self {
            record,
            status,
            status_detail: None,
            finish_reason: None,
            report: Report::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn task_id(&self) -> &str {
        &self.record.task_id
    }

    /// External id whose log files describe this job best. A job that was
    /// just resubmitted has no logs under its new id yet.
    pub fn log_external_id(&self) -> &str {
        match self.status {
            JobStatus::Waiting | JobStatus::Unknown | JobStatus::Other => self
                .record
                .prev_external_id
                .as_deref()
                .unwrap_or(&self.record.external_id),
            _ => &self.record.external_id,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.status == JobStatus::Finished && self.finish_reason.as_deref() == Some(CANCEL_REASON)
    }

    /// Whether `resume` may resubmit this job.
    pub fn resumable(&self) -> bool {
        matches!(self.status, JobStatus::Dead | JobStatus::Lost) || self.was_cancelled()
    }

    /// Whether the job asked to be resubmitted automatically.
    pub fn wants_resubmit(&self) -> bool {
        self.status == JobStatus::Finished && self.report.resubmit_requested()
    }
}
