use log::{info, warn};

use crate::error::{CommandError, Error, Result};
use crate::manager::task_manager::{Submission, TaskManager};
use crate::models::{
    command::{self, Command, CommandKind, CommandSpec, NamePattern, ParamKind, COMMANDS, WILDCARD},
    task::Job,
};
use crate::scheduler::CancelOutcome;

const ARG_DELIMITER: char = ';';

/// `name : param; param` lines for every command, sorted by name.
pub fn help_lines() -> Vec<String> {
    let mut specs: Vec<&CommandSpec> = COMMANDS.iter().collect();
    specs.sort_by_key(|spec| spec.name);
    specs
        .into_iter()
        .map(|spec| {
            let params: Vec<String> = spec.params.iter().map(ToString::to_string).collect();
            let aliases = if spec.aliases.is_empty() {
                String::new()
            } else {
                format!(" ({})", spec.aliases.join(", "))
            };
            format!(
                "{}{} : {}    # {}",
                spec.name,
                aliases,
                params.join("; "),
                spec.summary
            )
        })
        .collect()
}

fn parse_flag(spec: &CommandSpec, value: &str) -> std::result::Result<bool, CommandError> {
    match value {
        "" | "false" | "no" | "0" => Ok(false),
        "all" | "true" | "yes" | "1" => Ok(true),
        other => Err(CommandError::Flag {
            command: spec.name,
            value: other.to_string(),
        }),
    }
}

/// Parses `name arg; arg; ...`. `Ok(None)` for a blank line.
pub fn parse(line: &str) -> std::result::Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let spec = command::lookup(name).ok_or_else(|| CommandError::Unknown(name.to_string()))?;

    let rest = rest.trim();
    let args: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split(ARG_DELIMITER).map(str::trim).collect()
    };
    if args.len() < spec.required_params() || args.len() > spec.params.len() {
        let expected = if spec.required_params() == spec.params.len() {
            spec.params.len().to_string()
        } else {
            format!("{} to {}", spec.required_params(), spec.params.len())
        };
        return Err(CommandError::Arity {
            command: spec.name,
            expected,
            got: args.len(),
        });
    }
    for (param, value) in spec.params.iter().zip(&args) {
        let may_be_empty = matches!(param.kind, ParamKind::Args | ParamKind::Flag);
        if !param.optional && !may_be_empty && value.is_empty() {
            return Err(CommandError::Empty {
                command: spec.name,
                param: param.name,
            });
        }
    }

    let arg = |i: usize| args.get(i).copied().unwrap_or("");
    let pattern = || NamePattern::parse(arg(0));
    let command = match spec.kind {
        CommandKind::Submit => Command::Submit {
            template: arg(0).to_string(),
            args: arg(1).to_string(),
            name: arg(2).to_string(),
        },
        CommandKind::Resume => Command::Resume(pattern()),
        CommandKind::Cancel => Command::Cancel(pattern()),
        CommandKind::Duplicate => Command::Duplicate(pattern()),
        CommandKind::Archive => Command::Archive {
            pattern: (!arg(0).is_empty()).then(pattern),
            all: parse_flag(spec, arg(1))?,
        },
        CommandKind::Regenerate => Command::Regenerate(pattern()),
        CommandKind::Inspect => Command::Inspect(pattern()),
        CommandKind::Pack => Command::Pack(pattern()),
        CommandKind::Exit => Command::Exit,
    };
    Ok(Some(command))
}

/// Jobs matching `pattern` for which `eligible` holds. Distinguishes an
/// unmatched pattern from matches that are all ineligible.
fn select<'a, F>(
    jobs: &'a [Job],
    command: &'static str,
    pattern: &NamePattern,
    eligible: F,
) -> std::result::Result<Vec<&'a Job>, CommandError>
where
    F: Fn(&Job) -> bool,
{
    let matched: Vec<&Job> = jobs.iter().filter(|job| pattern.matches(job.name())).collect();
    if matched.is_empty() {
        return Err(CommandError::NoMatch {
            command,
            pattern: pattern.to_string(),
        });
    }
    let count = matched.len();
    let selected: Vec<&Job> = matched.into_iter().filter(|job| eligible(*job)).collect();
    if selected.is_empty() {
        return Err(CommandError::NotEligible {
            command,
            pattern: pattern.to_string(),
            matched: count,
        });
    }
    Ok(selected)
}

/// A failure for one job is reported in place; the other jobs still run.
fn per_job<T>(job: &Job, action: &str, result: Result<T>, describe: impl FnOnce(T) -> String) -> String {
    match result {
        Ok(value) => describe(value),
        Err(e) => {
            warn!("{} of task '{}' failed: {}", action, job.task_id(), e);
            format!("{} {} ({}) failed: {}", action, job.name(), job.task_id(), e)
        }
    }
}

pub fn describe_submission(submission: &Submission) -> String {
    match submission {
        Submission::Submitted(record) => format!(
            "Submitted {}.  Task id: {}  External id: {}",
            record.name, record.task_id, record.external_id
        ),
        Submission::Rejected { record, reason } => format!(
            "Submission of {} ({}) failed: {}",
            record.name, record.task_id, reason
        ),
    }
}

fn describe_cancel(job: &Job, outcome: &CancelOutcome) -> String {
    match outcome {
        CancelOutcome::Cancelled(output) if output.is_empty() => {
            format!("Cancelled {} ({}).", job.name(), job.record.external_id)
        }
        CancelOutcome::Cancelled(output) => output.clone(),
        CancelOutcome::TimedOut => format!("Cancelling {} timed out.", job.record.external_id),
        CancelOutcome::Failed(reason) => {
            format!("Cancelling {} failed: {}", job.record.external_id, reason)
        }
    }
}

/// Applies `command` to this cycle's jobs and returns lines for the operator.
pub fn dispatch(
    manager: &TaskManager,
    jobs: &[Job],
    command: &Command,
    tail_lines: usize,
) -> Result<Vec<String>> {
    info!("Dispatching {:?}", command);
    let mut lines = Vec::new();
    match command {
        Command::Submit {
            template,
            args,
            name,
        } => {
            let submission = manager.create_task(template, args, name)?;
            lines.push(describe_submission(&submission));
        }
        Command::Resume(pattern) => {
            for job in select(jobs, "resume", pattern, Job::resumable)? {
                lines.push(per_job(job, "Resuming", manager.resubmit(job), |s| {
                    describe_submission(&s)
                }));
            }
        }
        Command::Cancel(pattern) => {
            for job in select(jobs, "cancel", pattern, |job| job.status.cancellable())? {
                lines.push(per_job(job, "Cancelling", manager.cancel(job), |outcome| {
                    describe_cancel(job, &outcome)
                }));
            }
        }
        Command::Duplicate(pattern) => {
            let selected = select(jobs, "duplicate", pattern, |_| true)?;
            for submission in manager.duplicate(&selected)? {
                lines.push(describe_submission(&submission));
            }
        }
        Command::Archive { pattern, all } => match manager.archive(jobs, pattern.as_ref(), *all)? {
            Some(rewrite) => lines.push(format!(
                "Removed {} line(s), kept {}. Backup: {}",
                rewrite.removed,
                rewrite.kept,
                rewrite.backup.display()
            )),
            None => {
                let shown = pattern
                    .as_ref()
                    .map_or_else(|| WILDCARD.to_string(), ToString::to_string);
                let matched = jobs
                    .iter()
                    .filter(|job| pattern.as_ref().map_or(true, |p| p.matches(job.name())))
                    .count();
                let error = if matched == 0 {
                    CommandError::NoMatch {
                        command: "archive",
                        pattern: shown,
                    }
                } else {
                    CommandError::NotEligible {
                        command: "archive",
                        pattern: shown,
                        matched,
                    }
                };
                return Err(Error::Command(error));
            }
        },
        Command::Regenerate(pattern) => {
            for job in select(jobs, "regenerate", pattern, |_| true)? {
                lines.push(per_job(job, "Regenerating", manager.regenerate(job), |path| {
                    format!("Created {}", path.display())
                }));
            }
        }
        Command::Inspect(pattern) => {
            for job in select(jobs, "inspect", pattern, |_| true)? {
                let inspection = manager.inspect(job, tail_lines);
                lines.push(format!(
                    "{} [{}] : {}",
                    inspection.name, inspection.task_id, inspection.args
                ));
                for (label, tail) in [("stdout", &inspection.output), ("stderr", &inspection.error)] {
                    match tail {
                        Some(tail) => {
                            lines.push(format!("  --- {} ---", label));
                            lines.extend(tail.iter().map(|line| format!("  {}", line)));
                        }
                        None => lines.push(format!("  --- {}: no log yet ---", label)),
                    }
                }
            }
        }
        Command::Pack(pattern) => {
            let selected = select(jobs, "pack", pattern, |_| true)?;
            manager.pack(&selected)?;
            lines.push(format!("Packing {} task(s) in the background.", selected.len()));
        }
        Command::Exit => {}
    }
    Ok(lines)
}
