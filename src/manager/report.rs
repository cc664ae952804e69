use std::{
    fs, io,
    path::{Path, PathBuf},
};

use log::warn;

use crate::error::ReportError;
use crate::models::task::{Job, Report};

pub type Result<T> = std::result::Result<T, ReportError>;

/// Prefix marking a job's structured report line.
pub const SENTINEL: &str = "!taskman";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Output,
    Error,
}

impl Stream {
    fn suffix(self) -> char {
        match self {
            Stream::Output => 'o',
            Stream::Error => 'e',
        }
    }
}

/// Payload of the last sentinel line, if any.
pub fn last_sentinel<'a, I>(lines: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(|line| line.strip_prefix(SENTINEL))
        .last()
}

/// Reads jobs' captured stdout/stderr from the scheduler's log directory.
pub struct ReportReader {
    log_dir: PathBuf,
}

impl ReportReader {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }

    pub fn log_path(&self, job: &Job, stream: Stream) -> PathBuf {
        self.log_dir.join(format!(
            "{}.{}{}",
            job.name(),
            stream.suffix(),
            job.log_external_id()
        ))
    }

    /// All lines of the job's log, or `None` when it does not exist yet.
    pub fn extract(&self, job: &Job, stream: Stream) -> Result<Option<Vec<String>>> {
        let path = self.log_path(job, stream);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(
                String::from_utf8_lossy(&bytes)
                    .lines()
                    .map(str::to_string)
                    .collect(),
            )),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ReportError::Io { path, source }),
        }
    }

    pub fn report(&self, job: &Job) -> Result<Report> {
        let Some(lines) = self.extract(job, Stream::Output)? else {
            return Ok(Report::default());
        };
        match last_sentinel(lines.iter().map(String::as_str)) {
            Some(payload) => parse_report(payload, &self.log_path(job, Stream::Output)),
            None => Ok(Report::default()),
        }
    }

    pub fn tail(&self, job: &Job, stream: Stream, count: usize) -> Result<Option<Vec<String>>> {
        Ok(self.extract(job, stream)?.map(|mut lines| {
            let start = lines.len().saturating_sub(count);
            lines.split_off(start)
        }))
    }

    /// Fills in every job's report. Unreadable or malformed reports are
    /// logged and left empty.
    pub fn enrich(&self, jobs: &mut [Job]) {
        for job in jobs.iter_mut() {
            match self.report(job) {
                Ok(report) => job.report = report,
                Err(e) => warn!("No report for task '{}': {}", job.task_id(), e),
            }
        }
    }
}

fn parse_report(payload: &str, path: &Path) -> Result<Report> {
    serde_json::from_str(payload.trim()).map_err(|source| ReportError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::{JobStatus, TaskRecord};
    use tempfile::TempDir;

    fn job(status: JobStatus) -> Job {
        Job::new(
            TaskRecord {
                task_id: "T1".into(),
                name: "jobA".into(),
                external_id: "200".into(),
                prev_external_id: Some("100".into()),
                template: "t".into(),
                args: "a".into(),
            },
            status,
        )
    }

    #[test]
    fn last_sentinel_line_wins() {
        let lines = ["start", "!taskman{\"step\": 1}", "noise", "!taskman{\"step\": 2}", "end"];
        assert_eq!(last_sentinel(lines), Some("{\"step\": 2}"));
        assert_eq!(last_sentinel(["nothing here"]), None);
    }

    #[test]
    fn report_is_read_from_the_relevant_run() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("jobA.o100"), "!taskman{\"epoch\": 7}\n").unwrap();
        fs::write(dir.path().join("jobA.o200"), "!taskman{\"epoch\": 9}\n").unwrap();
        let reader = ReportReader::new(dir.path());

        let waiting = reader.report(&job(JobStatus::Waiting)).unwrap();
        assert_eq!(waiting.get("epoch").unwrap().to_string(), "7");
        let running = reader.report(&job(JobStatus::Running)).unwrap();
        assert_eq!(running.get("epoch").unwrap().to_string(), "9");
    }

    #[test]
    fn missing_log_is_an_empty_report() {
        let dir = TempDir::new().unwrap();
        let reader = ReportReader::new(dir.path());
        assert!(reader.report(&job(JobStatus::Running)).unwrap().is_empty());
        assert!(reader.extract(&job(JobStatus::Running), Stream::Error).unwrap().is_none());
    }

    #[test]
    fn log_without_sentinel_is_an_empty_report() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("jobA.o200"), "plain output\n").unwrap();
        let reader = ReportReader::new(dir.path());
        assert!(reader.report(&job(JobStatus::Running)).unwrap().is_empty());
    }

    #[test]
    fn malformed_report_is_left_empty_by_enrich() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("jobA.o200"), "!taskman{\"nested\": {\"a\": 1}}\n").unwrap();
        let reader = ReportReader::new(dir.path());
        assert!(reader.report(&job(JobStatus::Running)).is_err());

        let mut jobs = vec![job(JobStatus::Running)];
        reader.enrich(&mut jobs);
        assert!(jobs[0].report.is_empty());
    }

    #[test]
    fn tail_returns_last_lines() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("jobA.e200"), "1\n2\n3\n4\n").unwrap();
        let reader = ReportReader::new(dir.path());
        let tail = reader.tail(&job(JobStatus::Dead), Stream::Error, 2).unwrap().unwrap();
        assert_eq!(tail, ["3", "4"]);
        let all = reader.tail(&job(JobStatus::Dead), Stream::Error, 10).unwrap().unwrap();
        assert_eq!(all.len(), 4);
    }
}
