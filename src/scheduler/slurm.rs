use std::{collections::HashMap, path::Path, time::Duration};

use log::debug;

use super::{
    last_line, query, run_cancel, run_submit, CancelOutcome, QueueState, Result, Scheduler,
    Snapshot, SubmitOutcome,
};
use crate::error::SchedulerError;

const SQUEUE: &str = "squeue";
const SBATCH: &str = "sbatch";
const SCANCEL: &str = "scancel";

fn queue_state(token: &str) -> QueueState {
    match token {
        "RUNNING" | "COMPLETING" => QueueState::Running,
        "PENDING" => QueueState::Eligible,
        other => QueueState::Other(other.to_string()),
    }
}

/// Parses `squeue -h -o "%i %T"` output.
pub fn parse_squeue(output: &str) -> std::result::Result<HashMap<String, QueueState>, String> {
    let mut jobs = HashMap::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(id), Some(state), None) => {
                jobs.insert(id.to_string(), queue_state(state));
            }
            _ => return Err(format!("expected `<id> <state>`, got {:?}", line)),
        }
    }
    Ok(jobs)
}

/// `sbatch --parsable` prints `<id>` or `<id>;<cluster>`.
fn parse_job_id(output: &str) -> Option<String> {
    let line = last_line(output)?;
    let id = line.split(';').next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}

pub struct Slurm {
    user: Option<String>,
}

impl Slurm {
    pub fn new(user: Option<String>) -> Self {
        Self { user }
    }

    fn squeue_args(&self) -> Vec<String> {
        let mut args = vec!["-h".to_string()];
        if let Some(user) = &self.user {
            args.push("-u".to_string());
            args.push(user.clone());
        }
        args.push("-o".to_string());
        args.push("%i %T".to_string());
        args
    }
}

impl Scheduler for Slurm {
    fn name(&self) -> &'static str {
        "slurm"
    }

    fn poll(&self, timeout: Duration) -> Result<Snapshot> {
        let Some(output) = query(SQUEUE, &self.squeue_args(), timeout)? else {
            return Ok(Snapshot::TimedOut);
        };
        let jobs = parse_squeue(&output).map_err(|reason| SchedulerError::Malformed {
            command: SQUEUE.to_string(),
            reason,
        })?;
        debug!("squeue listed {} job(s).", jobs.len());
        Ok(Snapshot::Live(jobs))
    }

    fn submit(&self, script: &Path, timeout: Duration) -> SubmitOutcome {
        let args = vec![
            "--parsable".to_string(),
            script.to_string_lossy().into_owned(),
        ];
        run_submit(SBATCH, &args, timeout, parse_job_id)
    }

    fn cancel(&self, external_id: &str, timeout: Duration) -> CancelOutcome {
        run_cancel(SCANCEL, &[external_id.to_string()], timeout)
    }
}
