use std::{collections::HashMap, path::Path, time::Duration};

use log::debug;

use super::{
    last_line, query, run_cancel, run_submit, CancelOutcome, QueueState, Result, Scheduler,
    Snapshot, SubmitOutcome,
};
use crate::error::SchedulerError;

const SHOWQ: &str = "showq";
const MSUB: &str = "msub";
const MJOBCTL: &str = "mjobctl";

/// Words that only occur on showq's headers and summary lines.
const NOISE: [&str; 7] = ["JOBID", "processors", "nodes", "eligible", "Total", "blocked", "active job"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Active,
    Eligible,
    Blocked,
}

impl Section {
    fn from_header(line: &str) -> Option<Self> {
        if line.starts_with("active j") {
            Some(Section::Active)
        } else if line.starts_with("eligible") {
            Some(Section::Eligible)
        } else if line.starts_with("blocked ") {
            Some(Section::Blocked)
        } else {
            None
        }
    }

    fn state(self) -> QueueState {
        match self {
            Section::Active => QueueState::Running,
            Section::Eligible => QueueState::Eligible,
            Section::Blocked => QueueState::Other("Blocked".to_string()),
        }
    }
}

/// Parses `showq --blocking` output into id/state pairs.
pub fn parse_showq(output: &str) -> std::result::Result<HashMap<String, QueueState>, String> {
    let mut jobs = HashMap::new();
    let mut section = None;
    for line in output.lines().map(str::trim) {
        if let Some(next) = Section::from_header(line) {
            section = Some(next);
            continue;
        }
        if line.is_empty() || NOISE.iter().any(|word| line.contains(word)) {
            continue;
        }
        let Some(current) = section else {
            return Err(format!("job line before any section header: {:?}", line));
        };
        if let Some(id) = line.split_whitespace().next() {
            jobs.insert(id.to_string(), current.state());
        }
    }
    Ok(jobs)
}

pub struct Moab {
    user: Option<String>,
}

impl Moab {
    pub fn new(user: Option<String>) -> Self {
        Self { user }
    }

    fn showq_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(user) = &self.user {
            args.push("-w".to_string());
            args.push(format!("user={}", user));
        }
        args.push("--blocking".to_string());
        args
    }
}

impl Scheduler for Moab {
    fn name(&self) -> &'static str {
        "moab"
    }

    fn poll(&self, timeout: Duration) -> Result<Snapshot> {
        let args = self.showq_args();
        let Some(output) = query(SHOWQ, &args, timeout)? else {
            return Ok(Snapshot::TimedOut);
        };
        let jobs = parse_showq(&output).map_err(|reason| SchedulerError::Malformed {
            command: SHOWQ.to_string(),
            reason,
        })?;
        debug!("showq listed {} job(s).", jobs.len());
        Ok(Snapshot::Live(jobs))
    }

    fn submit(&self, script: &Path, timeout: Duration) -> SubmitOutcome {
        let args = vec![script.to_string_lossy().into_owned()];
        run_submit(MSUB, &args, timeout, |output| last_line(output).map(str::to_string))
    }

    fn cancel(&self, external_id: &str, timeout: Duration) -> CancelOutcome {
        run_cancel(MJOBCTL, &["-c".to_string(), external_id.to_string()], timeout)
    }
}
