//! Adapters over the batch scheduler's command-line tools.

pub mod moab;
pub mod slurm;
#[cfg(test)]
pub mod fake;

use std::{collections::HashMap, path::Path, time::Duration};

use clap::ValueEnum;
use log::warn;

use crate::error::SchedulerError;
use crate::worker::process::{self, ExecOutcome};

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Scheduler-side state of a queued job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Running,
    Eligible,
    /// Any other token, kept verbatim.
    Other(String),
}

/// One poll of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Live(HashMap<String, QueueState>),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Submitted(String),
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled(String),
    TimedOut,
    Failed(String),
}

pub trait Scheduler {
    fn name(&self) -> &'static str;

    /// Queue snapshot for the configured user. Only a timeout degrades to
    /// `Snapshot::TimedOut`; every other failure is an error.
    fn poll(&self, timeout: Duration) -> Result<Snapshot>;

    fn submit(&self, script: &Path, timeout: Duration) -> SubmitOutcome;

    fn cancel(&self, external_id: &str, timeout: Duration) -> CancelOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SchedulerKind {
    Moab,
    Slurm,
}

pub fn from_kind(kind: SchedulerKind, user: Option<String>) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::Moab => Box::new(moab::Moab::new(user)),
        SchedulerKind::Slurm => Box::new(slurm::Slurm::new(user)),
    }
}

/// Runs a queue query, separating a timeout from real failures.
pub(crate) fn query(program: &str, args: &[String], timeout: Duration) -> Result<Option<String>> {
    let command = format!("{} {}", program, args.join(" "));
    match process::run(program, args, timeout) {
        Ok(ExecOutcome::Ok(output)) => Ok(Some(output)),
        Ok(ExecOutcome::TimedOut) => Ok(None),
        Ok(ExecOutcome::Failed { status, output }) => Err(SchedulerError::Failed {
            command,
            status: status.to_string(),
            output: output.trim().to_string(),
        }),
        Err(source) => Err(SchedulerError::Spawn { command, source }),
    }
}

/// Runs a submit command and pulls the job id out of its output.
pub(crate) fn run_submit<F>(program: &str, args: &[String], timeout: Duration, parse_id: F) -> SubmitOutcome
where
    F: Fn(&str) -> Option<String>,
{
    match process::run(program, args, timeout) {
        Ok(ExecOutcome::Ok(output)) => match parse_id(&output) {
            Some(id) => SubmitOutcome::Submitted(id),
            None => SubmitOutcome::Failed(format!("no job id in `{}` output: {}", program, output.trim())),
        },
        Ok(ExecOutcome::TimedOut) => SubmitOutcome::TimedOut,
        Ok(ExecOutcome::Failed { status, output }) => {
            warn!("{} failed with {}: {}", program, status, output.trim());
            SubmitOutcome::Failed(format!("{} ({})", output.trim(), status))
        }
        Err(e) => SubmitOutcome::Failed(format!("cannot run {}: {}", program, e)),
    }
}

pub(crate) fn run_cancel(program: &str, args: &[String], timeout: Duration) -> CancelOutcome {
    match process::run(program, args, timeout) {
        Ok(ExecOutcome::Ok(output)) => CancelOutcome::Cancelled(output.trim().to_string()),
        Ok(ExecOutcome::TimedOut) => CancelOutcome::TimedOut,
        Ok(ExecOutcome::Failed { status, output }) => {
            CancelOutcome::Failed(format!("{} ({})", output.trim(), status))
        }
        Err(e) => CancelOutcome::Failed(format!("cannot run {}: {}", program, e)),
    }
}

/// Last non-empty line of a submit command's output.
pub(crate) fn last_line(output: &str) -> Option<&str> {
    output.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}
