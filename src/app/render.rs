use std::{cmp::Ordering, collections::BTreeSet};

use crate::models::task::{Job, JobStatus};

const STATUS_WIDTH: usize = 8;
const TASK_ID_WIDTH: usize = 21;
const EXTERNAL_ID_WIDTH: usize = 10;
const AGE_WIDTH: usize = 7;
const ELLIPSIS: &str = "..";

/// How a row should stand out; the terminal layer picks the actual style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderHint {
    NeedsAttention,
    Success,
    Cancelled,
    RawDetail,
    Normal,
}

impl RenderHint {
    pub fn for_job(job: &Job) -> Self {
        if job.status.needs_attention() {
            RenderHint::NeedsAttention
        } else if job.was_cancelled() {
            RenderHint::Cancelled
        } else if job.status == JobStatus::Finished {
            RenderHint::Success
        } else if job.status == JobStatus::Other {
            RenderHint::RawDetail
        } else {
            RenderHint::Normal
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub max_rows: usize,
    pub name_width: usize,
    pub column_width: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub text: String,
    pub hint: RenderHint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusView {
    pub header: String,
    pub rows: Vec<Row>,
    pub summary: Option<String>,
}

impl StatusView {
    /// Width of the status cell at the start of every row.
    pub const STATUS_CELL: usize = STATUS_WIDTH;
}

/// Keeps both ends of `text`, joined by an ellipsis, in exactly `width` chars.
pub fn truncate_middle(text: &str, width: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= width {
        return text.to_string();
    }
    if width <= ELLIPSIS.len() {
        return chars[..width].iter().collect();
    }
    let room = width - ELLIPSIS.len();
    let head = (room + 1) / 2;
    let tail = room - head;
    let mut out: String = chars[..head].iter().collect();
    out.push_str(ELLIPSIS);
    out.extend(&chars[chars.len() - tail..]);
    out
}

pub fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

/// Rounded age in the largest unit that is at least one.
pub fn format_age(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    if seconds >= 3600.0 {
        format!("{}h", (seconds / 3600.0).round())
    } else if seconds >= 60.0 {
        format!("{}m", (seconds / 60.0).round())
    } else {
        format!("{}s", seconds.round())
    }
}

/// Sorted union of all jobs' report keys, minus the time key.
pub fn report_columns(jobs: &[Job]) -> Vec<String> {
    jobs.iter()
        .flat_map(|job| job.report.column_keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn by_name(a: &&Job, b: &&Job) -> Ordering {
    (a.name(), a.task_id()).cmp(&(b.name(), b.task_id()))
}

fn format_line(options: &RenderOptions, cells: [&str; 5], report: &[String]) -> String {
    let [status, name, task_id, external_id, age] = cells;
    let mut line = format!(
        "{:<sw$} {:<nw$} {:<tw$} {:<ew$} {:<aw$}",
        truncate(status, STATUS_WIDTH),
        truncate_middle(name, options.name_width),
        task_id,
        truncate(external_id, EXTERNAL_ID_WIDTH),
        age,
        sw = STATUS_WIDTH,
        nw = options.name_width,
        tw = TASK_ID_WIDTH,
        ew = EXTERNAL_ID_WIDTH,
        aw = AGE_WIDTH,
    );
    for value in report {
        line.push(' ');
        line.push_str(&format!(
            "{:<w$}",
            truncate(value, options.column_width),
            w = options.column_width
        ));
    }
    line.trim_end().to_string()
}

fn render_row(job: &Job, columns: &[String], options: &RenderOptions, now: f64) -> Row {
    let status = match (&job.status, &job.status_detail) {
        (JobStatus::Other, Some(detail)) => detail.clone(),
        (status, _) => status.to_string(),
    };
    let age = job
        .report
        .reported_at()
        .map(|at| format_age(now - at))
        .unwrap_or_default();
    let report: Vec<String> = columns
        .iter()
        .map(|key| job.report.get(key).map(|v| v.to_string()).unwrap_or_default())
        .collect();
    Row {
        text: format_line(
            options,
            [
                status.as_str(),
                job.name(),
                job.task_id(),
                job.record.external_id.as_str(),
                age.as_str(),
            ],
            &report,
        ),
        hint: RenderHint::for_job(job),
    }
}

/// Lays out the job table within the row budget. Non-waiting jobs come
/// first; waiting jobs fill whatever budget is left.
pub fn render(jobs: &[Job], options: &RenderOptions, now: f64) -> StatusView {
    let columns = report_columns(jobs);
    let header = format_line(
        options,
        ["Status", "Task name", "Task id", "Ext id", "Updated"],
        &columns,
    );

    let (mut waiting, mut active): (Vec<&Job>, Vec<&Job>) =
        jobs.iter().partition(|job| job.status == JobStatus::Waiting);
    active.sort_by(by_name);
    waiting.sort_by(by_name);

    let shown_active = active.len().min(options.max_rows);
    let shown_waiting = waiting.len().min(options.max_rows - shown_active);
    let rows = active[..shown_active]
        .iter()
        .chain(&waiting[..shown_waiting])
        .map(|job| render_row(job, &columns, options, now))
        .collect();

    let omitted = jobs.len() - shown_active - shown_waiting;
    let summary = (omitted > 0).then(|| {
        format!(
            "... {} more row(s) not shown, {} job(s) waiting in total",
            omitted,
            waiting.len()
        )
    });

    StatusView {
        header,
        rows,
        summary,
    }
}
