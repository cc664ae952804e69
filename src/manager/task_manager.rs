use std::{
    cell::RefCell,
    collections::HashSet,
    path::PathBuf,
    thread,
    time::Duration,
};

use chrono::Local;
use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::manager::{
    reconciler,
    report::{ReportReader, Stream},
    scripts::ScriptGenerator,
};
use crate::models::{
    command::NamePattern,
    task::{Job, TaskRecord, TerminalEvent, CANCEL_REASON},
};
use crate::scheduler::{CancelOutcome, Scheduler, Snapshot, SubmitOutcome};
use crate::store::task_log::{self, Rewrite, TaskLog};
use crate::worker::process;

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub poll: Duration,
    pub command: Duration,
}

/// What became of one (re)submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Submitted(TaskRecord),
    Rejected { record: TaskRecord, reason: String },
}

/// Operator-facing view of one job's inputs and recent output.
#[derive(Debug, Clone, PartialEq)]
pub struct Inspection {
    pub name: String,
    pub task_id: String,
    pub args: String,
    pub output: Option<Vec<String>>,
    pub error: Option<Vec<String>>,
}

/// Everything one refresh/render/command cycle works against.
pub struct TaskManager {
    store: TaskLog,
    scheduler: Box<dyn Scheduler>,
    scripts: ScriptGenerator,
    reports: ReportReader,
    timeouts: Timeouts,
    pack_script: PathBuf,
    last_task_id: RefCell<String>,
}

impl TaskManager {
    pub fn new(
        store: TaskLog,
        scheduler: Box<dyn Scheduler>,
        scripts: ScriptGenerator,
        reports: ReportReader,
        timeouts: Timeouts,
        pack_script: PathBuf,
    ) -> Self {
        TaskManager {
            store,
            scheduler,
            scripts,
            reports,
            timeouts,
            pack_script,
            last_task_id: RefCell::new(String::new()),
        }
    }

    /// Rebuilds every job from the logs and a fresh queue poll. `None` when
    /// the submission log cannot be used this cycle.
    pub fn refresh(&self) -> Result<Option<Vec<Job>>> {
        let Some(log) = self.store.read_all()? else {
            return Ok(None);
        };
        let snapshot = self.scheduler.poll(self.timeouts.poll)?;
        if snapshot == Snapshot::TimedOut {
            warn!(
                "{} queue query timed out after {:?}; live jobs are unknown this cycle.",
                self.scheduler.name(),
                self.timeouts.poll
            );
        }
        let mut jobs = reconciler::reconcile(&log, &snapshot);
        self.reports.enrich(&mut jobs);
        debug!("Refreshed {} job(s).", jobs.len());
        Ok(Some(jobs))
    }

    fn next_task_id(&self) -> String {
        let mut last = self.last_task_id.borrow_mut();
        loop {
            let id = Local::now().format("%m-%d_%H-%M-%S_%6f").to_string();
            if id != *last {
                *last = id.clone();
                return id;
            }
            thread::sleep(Duration::from_micros(1));
        }
    }

    /// Creates a brand-new task and submits it.
    pub fn create_task(&self, template: &str, args: &str, name: &str) -> Result<Submission> {
        let record = TaskRecord::new(
            self.next_task_id(),
            name.to_string(),
            template.to_string(),
            args.to_string(),
        );
        task_log::validate(&record)?;
        self.scripts.generate(&record)?;
        info!("Task '{}' created as '{}'.", record.task_id, record.name);
        self.submit(&record)
    }

    /// Submits the record's script and logs the new external id on success.
    fn submit(&self, record: &TaskRecord) -> Result<Submission> {
        task_log::validate(record)?;
        let script = self.scripts.script_path(&record.name, &record.task_id);
        if !script.exists() {
            self.scripts.generate(record)?;
        }
        let reason = match self.scheduler.submit(&script, self.timeouts.command) {
            SubmitOutcome::Submitted(external_id) => {
                let submitted = record.resubmitted(external_id);
                self.store.append(&submitted)?;
                info!(
                    "Submitted task '{}' ({}) as {}.",
                    submitted.task_id, submitted.name, submitted.external_id
                );
                return Ok(Submission::Submitted(submitted));
            }
            SubmitOutcome::TimedOut => "submission timed out".to_string(),
            SubmitOutcome::Failed(reason) => reason,
        };
        warn!("Submission of task '{}' failed: {}", record.task_id, reason);
        Ok(Submission::Rejected {
            record: record.clone(),
            reason,
        })
    }

    /// Submits the same task again, keeping its id, template and arguments.
    pub fn resubmit(&self, job: &Job) -> Result<Submission> {
        self.submit(&job.record)
    }

    /// Submits a fresh task for each distinct name among `jobs`.
    pub fn duplicate(&self, jobs: &[&Job]) -> Result<Vec<Submission>> {
        let mut seen = HashSet::new();
        let mut submissions = Vec::new();
        for job in jobs {
            if seen.insert(job.name()) {
                submissions.push(self.create_task(&job.record.template, &job.record.args, job.name())?);
            }
        }
        Ok(submissions)
    }

    pub fn cancel(&self, job: &Job) -> Result<CancelOutcome> {
        let external_id = &job.record.external_id;
        let outcome = self.scheduler.cancel(external_id, self.timeouts.command);
        match &outcome {
            CancelOutcome::Cancelled(_) => {
                self.store.append_finished(&TerminalEvent {
                    external_id: external_id.clone(),
                    name: Some(job.name().to_string()),
                    reason: Some(CANCEL_REASON.to_string()),
                })?;
                info!("Cancelled task '{}' ({}).", job.task_id(), external_id);
            }
            CancelOutcome::TimedOut => warn!("Cancelling {} timed out.", external_id),
            CancelOutcome::Failed(reason) => warn!("Cancelling {} failed: {}", external_id, reason),
        }
        Ok(outcome)
    }

    /// Task ids `archive` would drop from the log.
    pub fn archivable<'a>(
        jobs: &'a [Job],
        pattern: Option<&NamePattern>,
        all: bool,
    ) -> HashSet<&'a str> {
        jobs.iter()
            .filter(|job| pattern.map_or(true, |p| p.matches(job.name())))
            .filter(|job| all || job.status.is_terminal())
            .map(Job::task_id)
            .collect()
    }

    /// Drops the selected tasks from the submission log after a backup.
    /// `None` when nothing qualifies; the log is then left untouched.
    pub fn archive(
        &self,
        jobs: &[Job],
        pattern: Option<&NamePattern>,
        all: bool,
    ) -> Result<Option<Rewrite>> {
        let remove = Self::archivable(jobs, pattern, all);
        if remove.is_empty() {
            return Ok(None);
        }
        let rewrite = self
            .store
            .rewrite(|line| !remove.contains(line.task_id.as_str()))?;
        Ok(Some(rewrite))
    }

    pub fn regenerate(&self, job: &Job) -> Result<PathBuf> {
        task_log::validate(&job.record)?;
        Ok(self.scripts.generate(&job.record)?)
    }

    pub fn inspect(&self, job: &Job, tail_lines: usize) -> Inspection {
        let tail = |stream| match self.reports.tail(job, stream, tail_lines) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Cannot read log of task '{}': {}", job.task_id(), e);
                None
            }
        };
        Inspection {
            name: job.name().to_string(),
            task_id: job.task_id().to_string(),
            args: job.record.args.clone(),
            output: tail(Stream::Output),
            error: tail(Stream::Error),
        }
    }

    /// Hands `<name>/<task_id>` of each job to the pack hook without waiting.
    pub fn pack(&self, jobs: &[&Job]) -> Result<()> {
        let paths: Vec<String> = jobs
            .iter()
            .map(|job| format!("{}/{}", job.name(), job.task_id()))
            .collect();
        let program = self.pack_script.to_string_lossy();
        process::spawn_detached(&program, &paths).map_err(|source| Error::Hook {
            path: self.pack_script.clone(),
            source,
        })?;
        Ok(())
    }

    /// Resubmits finished jobs whose report asks for it.
    pub fn auto_resubmit(&self, jobs: &[Job]) -> Result<Vec<Submission>> {
        let mut submissions = Vec::new();
        for job in jobs.iter().filter(|job| job.wants_resubmit()) {
            info!("Task '{}' asked to be resubmitted.", job.task_id());
            submissions.push(self.resubmit(job)?);
        }
        Ok(submissions)
    }
}
