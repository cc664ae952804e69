use std::collections::HashMap;

use crate::models::task::{Job, JobStatus, TaskRecord, TerminalEvent};
use crate::scheduler::{QueueState, Snapshot};
use crate::store::task_log::LogSnapshot;

/// Derives one task's status. Rules are checked in order and the first that
/// applies wins: dead, finished, poll timeout, absent from queue, queue state.
pub fn resolve(
    record: &TaskRecord,
    dead: &HashMap<String, TerminalEvent>,
    finished: &HashMap<String, TerminalEvent>,
    snapshot: &Snapshot,
) -> Job {
    let id = record.external_id.as_str();
    let mut job = Job::new(record.clone(), JobStatus::Unknown);

    if dead.contains_key(id) {
        job.status = JobStatus::Dead;
    } else if let Some(event) = finished.get(id) {
        job.status = JobStatus::Finished;
        job.finish_reason = event.reason.clone();
    } else {
        match snapshot {
            Snapshot::TimedOut => job.status = JobStatus::Unknown,
            Snapshot::Live(queue) => match queue.get(id) {
                None => job.status = JobStatus::Lost,
                Some(QueueState::Running) => job.status = JobStatus::Running,
                Some(QueueState::Eligible) => job.status = JobStatus::Waiting,
                Some(QueueState::Other(token)) => {
                    job.status = JobStatus::Other;
                    job.status_detail = Some(token.clone());
                }
            },
        }
    }
    job
}

/// Builds this cycle's jobs, ordered by name then task id.
pub fn reconcile(log: &LogSnapshot, snapshot: &Snapshot) -> Vec<Job> {
    let mut jobs: Vec<Job> = log
        .records
        .iter()
        .map(|record| resolve(record, &log.dead, &log.finished, snapshot))
        .collect();
    jobs.sort_by(|a, b| (a.name(), a.task_id()).cmp(&(b.name(), b.task_id())));
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(task_id: &str, name: &str, external_id: &str) -> TaskRecord {
        TaskRecord {
            task_id: task_id.into(),
            name: name.into(),
            external_id: external_id.into(),
            prev_external_id: None,
            template: "tmplA".into(),
            args: "argsA".into(),
        }
    }

    fn events(entries: &[(&str, Option<&str>)]) -> HashMap<String, TerminalEvent> {
        entries
            .iter()
            .map(|(id, reason)| {
                (
                    id.to_string(),
                    TerminalEvent {
                        external_id: id.to_string(),
                        name: Some("jobA".into()),
                        reason: reason.map(str::to_string),
                    },
                )
            })
            .collect()
    }

    fn live(entries: &[(&str, QueueState)]) -> Snapshot {
        Snapshot::Live(
            entries
                .iter()
                .map(|(id, state)| (id.to_string(), state.clone()))
                .collect(),
        )
    }

    #[test]
    fn precedence_table_is_exhaustive() {
        let queue_cases: Vec<(&str, Snapshot)> = vec![
            ("timeout", Snapshot::TimedOut),
            ("absent", live(&[])),
            ("running", live(&[("123", QueueState::Running)])),
            ("eligible", live(&[("123", QueueState::Eligible)])),
            ("other", live(&[("123", QueueState::Other("Blocked".into()))])),
        ];
        let task = record("T1", "jobA", "123");

        for in_dead in [false, true] {
            for in_finished in [false, true] {
                for (label, snapshot) in &queue_cases {
                    let dead = if in_dead { events(&[("123", None)]) } else { HashMap::new() };
                    let finished = if in_finished {
                        events(&[("123", Some("ok"))])
                    } else {
                        HashMap::new()
                    };
                    let job = resolve(&task, &dead, &finished, snapshot);

                    let expected = if in_dead {
                        JobStatus::Dead
                    } else if in_finished {
                        JobStatus::Finished
                    } else {
                        match *label {
                            "timeout" => JobStatus::Unknown,
                            "absent" => JobStatus::Lost,
                            "running" => JobStatus::Running,
                            "eligible" => JobStatus::Waiting,
                            _ => JobStatus::Other,
                        }
                    };
                    assert_eq!(
                        job.status, expected,
                        "dead={in_dead} finished={in_finished} queue={label}"
                    );
                    assert_eq!(job.status_detail.is_some(), expected == JobStatus::Other);
                    assert_eq!(job.finish_reason.is_some(), expected == JobStatus::Finished);
                }
            }
        }
    }

    #[test]
    fn other_status_keeps_raw_token() {
        let job = resolve(
            &record("T1", "jobA", "123"),
            &HashMap::new(),
            &HashMap::new(),
            &live(&[("123", QueueState::Other("Deferred".into()))]),
        );
        assert_eq!(job.status, JobStatus::Other);
        assert_eq!(job.status_detail.as_deref(), Some("Deferred"));
    }

    #[test]
    fn submission_missing_from_queue_is_lost() {
        let log = LogSnapshot {
            records: vec![record("T1", "jobA", "123")],
            ..LogSnapshot::default()
        };
        let jobs = reconcile(&log, &live(&[("999", QueueState::Running)]));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task_id(), "T1");
        assert_eq!(jobs[0].status, JobStatus::Lost);
    }

    #[test]
    fn finished_event_carries_reason() {
        let log = LogSnapshot {
            records: vec![record("T1", "jobA", "123")],
            finished: events(&[("123", Some("ok"))]),
            ..LogSnapshot::default()
        };
        let jobs = reconcile(&log, &live(&[]));
        assert_eq!(jobs[0].status, JobStatus::Finished);
        assert_eq!(jobs[0].finish_reason.as_deref(), Some("ok"));
    }

    #[test]
    fn timeout_only_affects_non_terminal_jobs() {
        let log = LogSnapshot {
            records: vec![
                record("T1", "a", "1"),
                record("T2", "b", "2"),
                record("T3", "c", "3"),
                record("T4", "d", "4"),
            ],
            dead: events(&[("2", None)]),
            finished: events(&[("3", Some("cancel"))]),
        };
        let statuses: Vec<JobStatus> = reconcile(&log, &Snapshot::TimedOut)
            .iter()
            .map(|job| job.status)
            .collect();
        assert_eq!(
            statuses,
            [JobStatus::Unknown, JobStatus::Dead, JobStatus::Finished, JobStatus::Unknown]
        );
    }

    #[test]
    fn jobs_are_ordered_by_name_then_task_id() {
        let log = LogSnapshot {
            records: vec![
                record("T3", "beta", "3"),
                record("T2", "alpha", "2"),
                record("T1", "beta", "1"),
            ],
            ..LogSnapshot::default()
        };
        let jobs = reconcile(&log, &live(&[]));
        let order: Vec<&str> = jobs.iter().map(|job| job.task_id()).collect();
        assert_eq!(order, ["T2", "T1", "T3"]);
    }
}
