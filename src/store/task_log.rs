use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use chrono::Local;
use log::{debug, info, warn};

use crate::error::StoreError;
use crate::models::task::{TaskRecord, TerminalEvent};

pub type Result<T> = std::result::Result<T, StoreError>;

pub const FIELD_DELIMITER: char = ';';
pub const EVENT_DELIMITER: char = ',';

const STARTED: &str = "started";
const DEAD: &str = "dead";
const FINISHED: &str = "finished";
const BACKUPS: &str = "backups";
const SUBMISSION_FIELDS: usize = 5;

/// One line of the submission log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionLine {
    pub task_id: String,
    pub name: String,
    pub external_id: String,
    pub template: String,
    pub args: String,
}

impl SubmissionLine {
    pub fn decode(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        if fields.len() != SUBMISSION_FIELDS {
            return Err(format!(
                "expected {} `{}`-separated fields, found {}",
                SUBMISSION_FIELDS,
                FIELD_DELIMITER,
                fields.len()
            ));
        }
        if fields[0].is_empty() {
            return Err("empty task id".to_string());
        }
        if fields[1].is_empty() {
            return Err("empty task name".to_string());
        }
        Ok(Self {
            task_id: fields[0].to_string(),
            name: fields[1].to_string(),
            external_id: fields[2].to_string(),
            template: fields[3].to_string(),
            args: fields[4].to_string(),
        })
    }

    pub fn encode(&self) -> String {
        [
            self.task_id.as_str(),
            &self.name,
            &self.external_id,
            &self.template,
            &self.args,
        ]
        .join(&FIELD_DELIMITER.to_string())
    }
}

impl From<&TaskRecord> for SubmissionLine {
    fn from(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id.clone(),
            name: record.name.clone(),
            external_id: record.external_id.clone(),
            template: record.template.clone(),
            args: record.args.clone(),
        }
    }
}

/// Rejects values that would not survive an encode/decode cycle.
pub fn validate(record: &TaskRecord) -> Result<()> {
    let fields = [
        ("task id", &record.task_id),
        ("name", &record.name),
        ("external id", &record.external_id),
        ("template", &record.template),
        ("args", &record.args),
    ];
    for (field, value) in fields {
        for forbidden in [FIELD_DELIMITER, '\n', '\r'] {
            if value.contains(forbidden) {
                return Err(StoreError::InvalidField {
                    field,
                    forbidden,
                    value: value.to_string(),
                });
            }
        }
    }
    // Names and ids are repeated in the comma-separated event logs.
    for (field, value) in [("name", &record.name), ("external id", &record.external_id)] {
        if value.contains(EVENT_DELIMITER) {
            return Err(StoreError::InvalidField {
                field,
                forbidden: EVENT_DELIMITER,
                value: value.to_string(),
            });
        }
    }
    // Names and templates become path components under the script and log dirs.
    for (field, value) in [("name", &record.name), ("template", &record.template)] {
        for forbidden in ['/', '\0'] {
            if value.contains(forbidden) {
                return Err(StoreError::InvalidField {
                    field,
                    forbidden,
                    value: value.to_string(),
                });
            }
        }
        if value.is_empty() || value == "." || value == ".." {
            return Err(StoreError::ReservedName {
                field,
                value: value.to_string(),
            });
        }
    }
    Ok(())
}

fn decode_dead(line: &str) -> std::result::Result<TerminalEvent, String> {
    let fields: Vec<&str> = line.split(EVENT_DELIMITER).collect();
    match fields.as_slice() {
        [id] | [id, _] if id.is_empty() => Err("empty external id".to_string()),
        [id] => Ok(TerminalEvent {
            external_id: id.to_string(),
            name: None,
            reason: None,
        }),
        [id, name] => Ok(TerminalEvent {
            external_id: id.to_string(),
            name: Some(name.to_string()),
            reason: None,
        }),
        _ => Err(format!("expected 1 or 2 fields, found {}", fields.len())),
    }
}

fn decode_finished(line: &str) -> std::result::Result<TerminalEvent, String> {
    let fields: Vec<&str> = line.split(EVENT_DELIMITER).collect();
    match fields.as_slice() {
        [id, ..] if id.is_empty() => Err("empty external id".to_string()),
        [id, name, reason] => Ok(TerminalEvent {
            external_id: id.to_string(),
            name: Some(name.to_string()),
            reason: Some(reason.to_string()),
        }),
        _ => Err(format!("expected 3 fields, found {}", fields.len())),
    }
}

fn encode_finished(event: &TerminalEvent) -> String {
    format!(
        "{}{d}{}{d}{}",
        event.external_id,
        event.name.as_deref().unwrap_or(""),
        event.reason.as_deref().unwrap_or(""),
        d = EVENT_DELIMITER
    )
}

/// Everything the reconciler needs from disk for one cycle.
#[derive(Debug, Default)]
pub struct LogSnapshot {
    pub records: Vec<TaskRecord>,
    pub dead: HashMap<String, TerminalEvent>,
    pub finished: HashMap<String, TerminalEvent>,
}

#[derive(Debug)]
pub struct Rewrite {
    pub backup: PathBuf,
    pub kept: usize,
    pub removed: usize,
}

/// The three append-only logs plus their backups, under one directory.
pub struct TaskLog {
    dir: PathBuf,
}

impl TaskLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn started_path(&self) -> PathBuf {
        self.dir.join(STARTED)
    }

    pub fn dead_path(&self) -> PathBuf {
        self.dir.join(DEAD)
    }

    pub fn finished_path(&self) -> PathBuf {
        self.dir.join(FINISHED)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.dir.join(BACKUPS)
    }

    pub fn append(&self, record: &TaskRecord) -> Result<()> {
        validate(record)?;
        let line = SubmissionLine::from(record).encode();
        self.append_line(&self.started_path(), &line)?;
        debug!("Appended submission '{}'.", line);
        Ok(())
    }

    pub fn append_finished(&self, event: &TerminalEvent) -> Result<()> {
        self.append_line(&self.finished_path(), &encode_finished(event))
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        // Never glue a record onto an unterminated last line.
        let separator = if ends_torn(&mut file).map_err(|e| StoreError::io(path, e))? {
            warn!("{} ends in an unterminated line, closing it first.", path.display());
            "\n"
        } else {
            ""
        };
        file.write_all(format!("{}{}\n", separator, line).as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| StoreError::io(path, e))
    }

    /// Reads all three logs. `Ok(None)` means the submission log is missing,
    /// empty or unreadable, and the cycle should be skipped. An unterminated
    /// last line is used when it holds a whole record and ignored otherwise.
    pub fn read_all(&self) -> Result<Option<LogSnapshot>> {
        let path = self.started_path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Skipping cycle, cannot read {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        if content.trim().is_empty() {
            debug!("Skipping cycle, {} is empty.", path.display());
            return Ok(None);
        }

        let torn = !content.ends_with('\n');
        let last = content.lines().count();
        let mut records: Vec<TaskRecord> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (number, line) in numbered_lines(&content) {
            let entry = match SubmissionLine::decode(line) {
                Ok(entry) => entry,
                Err(reason) if torn && number == last => {
                    warn!(
                        "Ignoring partial last line {} of {}: {}",
                        number,
                        path.display(),
                        reason
                    );
                    break;
                }
                Err(reason) => {
                    return Err(StoreError::Parse {
                        path: path.clone(),
                        line: number,
                        reason,
                    })
                }
            };
            match index.get(&entry.task_id) {
                Some(&i) => {
                    let previous = &records[i];
                    let prev_external_id = if previous.external_id.is_empty() {
                        previous.prev_external_id.clone()
                    } else {
                        Some(previous.external_id.clone())
                    };
                    records[i] = TaskRecord {
                        task_id: entry.task_id,
                        name: entry.name,
                        external_id: entry.external_id,
                        prev_external_id,
                        template: entry.template,
                        args: entry.args,
                    };
                }
                None => {
                    index.insert(entry.task_id.clone(), records.len());
                    records.push(TaskRecord {
                        task_id: entry.task_id,
                        name: entry.name,
                        external_id: entry.external_id,
                        prev_external_id: None,
                        template: entry.template,
                        args: entry.args,
                    });
                }
            }
        }

        Ok(Some(LogSnapshot {
            records,
            dead: read_events(&self.dead_path(), decode_dead)?,
            finished: read_events(&self.finished_path(), decode_finished)?,
        }))
    }

    /// Backs the submission log up, then replaces it with the lines `keep`
    /// accepts. Kept lines are written back byte for byte, in order.
    pub fn rewrite<F>(&self, mut keep: F) -> Result<Rewrite>
    where
        F: FnMut(&SubmissionLine) -> bool,
    {
        let path = self.started_path();
        let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;

        let mut retained = String::with_capacity(content.len());
        let mut kept = 0;
        let mut removed = 0;
        for (number, raw) in content.split_inclusive('\n').enumerate() {
            let line = raw.trim_end_matches(|c| c == '\n' || c == '\r');
            if line.trim().is_empty() {
                retained.push_str(raw);
                continue;
            }
            let entry = match SubmissionLine::decode(line) {
                Ok(entry) => entry,
                Err(_) if !raw.ends_with('\n') => {
                    retained.push_str(raw);
                    continue;
                }
                Err(reason) => {
                    return Err(StoreError::Parse {
                        path: path.clone(),
                        line: number + 1,
                        reason,
                    })
                }
            };
            if keep(&entry) {
                retained.push_str(raw);
                kept += 1;
            } else {
                removed += 1;
            }
        }

        let backup = self.backup(&path)?;
        let temp = self.dir.join(format!(".{}.tmp", STARTED));
        write_synced(&temp, retained.as_bytes()).map_err(|e| StoreError::io(&temp, e))?;
        fs::rename(&temp, &path).map_err(|e| StoreError::io(&path, e))?;

        info!(
            "Rewrote {} ({} kept, {} removed), backup at {}.",
            path.display(),
            kept,
            removed,
            backup.display()
        );
        Ok(Rewrite {
            backup,
            kept,
            removed,
        })
    }

    fn backup(&self, path: &Path) -> Result<PathBuf> {
        let dir = self.backups_dir();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let mut target = dir.join(format!("{}.{}", STARTED, stamp));
        let mut n = 1;
        while target.exists() {
            target = dir.join(format!("{}.{}.{}", STARTED, stamp, n));
            n += 1;
        }
        let content = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        write_synced(&target, &content).map_err(|e| StoreError::io(&target, e))?;
        Ok(target)
    }
}

/// Whether a non-empty file lacks its final newline.
fn ends_torn(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(false);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn write_synced(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}

fn numbered_lines(content: &str) -> impl Iterator<Item = (usize, &str)> {
    content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty())
}

fn read_events(
    path: &Path,
    decode: fn(&str) -> std::result::Result<TerminalEvent, String>,
) -> Result<HashMap<String, TerminalEvent>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let torn = !content.ends_with('\n');
    let last = content.lines().count();
    let mut events = HashMap::new();
    for (number, line) in numbered_lines(&content) {
        // Jobs append these logs themselves, so a torn tail is expected.
        if torn && number == last {
            debug!("Ignoring partial last line of {}.", path.display());
            break;
        }
        let event = decode(line).map_err(|reason| StoreError::Parse {
            path: path.to_path_buf(),
            line: number,
            reason,
        })?;
        events.insert(event.external_id.clone(), event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn log_with(started: &str) -> (TempDir, TaskLog) {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());
        fs::write(log.started_path(), started).unwrap();
        (dir, log)
    }

    fn record(task_id: &str, name: &str, external_id: &str) -> TaskRecord {
        TaskRecord {
            task_id: task_id.into(),
            name: name.into(),
            external_id: external_id.into(),
            prev_external_id: None,
            template: "tmpl".into(),
            args: "--seed 1".into(),
        }
    }

    #[test]
    fn decode_rejects_wrong_field_count() {
        assert!(SubmissionLine::decode("T1;jobA;123;tmplA").is_err());
        assert!(SubmissionLine::decode("T1;jobA;123;tmplA;args;extra").is_err());
        let line = SubmissionLine::decode("T1;jobA;123;tmplA;argsA").unwrap();
        assert_eq!(line.encode(), "T1;jobA;123;tmplA;argsA");
    }

    #[test]
    fn append_then_read_back() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path().join("store"));
        log.append(&record("T1", "jobA", "1")).unwrap();
        log.append(&record("T2", "jobB", "2")).unwrap();

        let snapshot = log.read_all().unwrap().unwrap();
        assert_eq!(snapshot.records, vec![record("T1", "jobA", "1"), record("T2", "jobB", "2")]);
        assert!(snapshot.dead.is_empty());
        assert!(snapshot.finished.is_empty());
    }

    #[test]
    fn append_rejects_delimiters_in_fields() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());
        let mut bad = record("T1", "jobA", "1");
        bad.args = "a;b".into();
        assert!(matches!(
            log.append(&bad),
            Err(StoreError::InvalidField { field: "args", .. })
        ));
        assert!(!log.started_path().exists());
    }

    #[test]
    fn names_that_escape_their_directory_are_rejected() {
        let dir = TempDir::new().unwrap();
        let log = TaskLog::new(dir.path());
        for name in ["../../escape", "a/b", "..", ".", "", "nul\0byte"] {
            let bad = record("T1", name, "1");
            assert!(
                matches!(
                    validate(&bad),
                    Err(StoreError::InvalidField { field: "name", .. })
                        | Err(StoreError::ReservedName { field: "name", .. })
                ),
                "{name:?}"
            );
        }
        let mut bad = record("T1", "jobA", "1");
        bad.template = "../secrets".into();
        assert!(matches!(
            log.append(&bad),
            Err(StoreError::InvalidField { field: "template", forbidden: '/', .. })
        ));
        assert!(validate(&record("T1", "run..2", "1")).is_ok());
        assert!(!log.started_path().exists());
    }

    #[test]
    fn append_closes_an_unterminated_last_line_first() {
        let (_dir, log) = log_with("T1;jobA;1;tmplA;a");
        log.append(&record("T2", "jobB", "1000")).unwrap();
        assert_eq!(
            fs::read_to_string(log.started_path()).unwrap(),
            "T1;jobA;1;tmplA;a\nT2;jobB;1000;tmpl;--seed 1\n"
        );
        let snapshot = log.read_all().unwrap().unwrap();
        let ids: Vec<&str> = snapshot.records.iter().map(|r| r.task_id.as_str()).collect();
        assert_eq!(ids, ["T1", "T2"]);

        fs::write(log.finished_path(), "9,jobA,ok\n7,jo").unwrap();
        log.append_finished(&TerminalEvent {
            external_id: "8".into(),
            name: Some("jobB".into()),
            reason: Some("ok".into()),
        })
        .unwrap();
        assert_eq!(
            fs::read_to_string(log.finished_path()).unwrap(),
            "9,jobA,ok\n7,jo\n8,jobB,ok\n"
        );
    }

    #[test]
    fn resubmission_lines_fold_into_one_record() {
        let (_dir, log) = log_with("T1;jobA;100;t;a\nT2;jobB;150;t;a\nT1;jobA;200;t;a\n");
        let snapshot = log.read_all().unwrap().unwrap();
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[0].external_id, "200");
        assert_eq!(snapshot.records[0].prev_external_id.as_deref(), Some("100"));
        assert_eq!(snapshot.records[1].prev_external_id, None);
    }

    #[test]
    fn missing_or_empty_log_skips_the_cycle() {
        let dir = TempDir::new().unwrap();
        assert!(TaskLog::new(dir.path()).read_all().unwrap().is_none());

        let (_dir, log) = log_with("");
        assert!(log.read_all().unwrap().is_none());
    }

    #[test]
    fn unterminated_last_line_does_not_stall_the_cycle() {
        let (_dir, log) = log_with("T1;jobA;100;t;a\nT2;jobB");
        let snapshot = log.read_all().unwrap().unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].task_id, "T1");

        let (_dir, log) = log_with("T1;jobA;100;t;a\nT2;jobB;200;t;a");
        let snapshot = log.read_all().unwrap().unwrap();
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[1].external_id, "200");

        let kept = log.rewrite(|line| line.task_id == "T2").unwrap();
        assert_eq!(kept.removed, 1);
        assert_eq!(fs::read_to_string(log.started_path()).unwrap(), "T2;jobB;200;t;a");
    }

    #[test]
    fn malformed_line_is_a_parse_error_with_line_number() {
        let (_dir, log) = log_with("T1;jobA;100;t;a\nT2;jobB;t;a\n");
        match log.read_all() {
            Err(StoreError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn terminal_events_are_keyed_by_external_id() {
        let (_dir, log) = log_with("T1;jobA;123;tmplA;argsA\n");
        fs::write(log.dead_path(), "77\n78,jobB\n").unwrap();
        fs::write(log.finished_path(), "123,jobA,ok\n").unwrap();

        let snapshot = log.read_all().unwrap().unwrap();
        assert!(snapshot.dead.contains_key("77"));
        assert_eq!(snapshot.dead["78"].name.as_deref(), Some("jobB"));
        assert_eq!(snapshot.finished["123"].reason.as_deref(), Some("ok"));
    }

    #[test]
    fn finished_line_without_reason_is_rejected() {
        let (_dir, log) = log_with("T1;jobA;123;tmplA;argsA\n");
        fs::write(log.finished_path(), "123,jobA\n").unwrap();
        assert!(matches!(log.read_all(), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn append_finished_writes_cancel_event() {
        let (_dir, log) = log_with("T1;jobA;123;tmplA;argsA\n");
        log.append_finished(&TerminalEvent {
            external_id: "123".into(),
            name: Some("jobA".into()),
            reason: Some("cancel".into()),
        })
        .unwrap();
        assert_eq!(fs::read_to_string(log.finished_path()).unwrap(), "123,jobA,cancel\n");
    }

    #[test]
    fn rewrite_keeps_lines_verbatim_and_in_order() {
        let original = "T1;jobA;1;t;a  b\nT2;jobB;2;t;x\nT3;jobA;3;t;y\nT4;jobC;4;t;z\n";
        let (_dir, log) = log_with(original);

        let result = log.rewrite(|line| line.task_id != "T2" && line.task_id != "T4").unwrap();
        assert_eq!(result.kept, 2);
        assert_eq!(result.removed, 2);
        assert_eq!(
            fs::read_to_string(log.started_path()).unwrap(),
            "T1;jobA;1;t;a  b\nT3;jobA;3;t;y\n"
        );
        assert_eq!(fs::read_to_string(&result.backup).unwrap(), original);
        assert!(result.backup.starts_with(log.backups_dir()));
    }

    #[test]
    fn consecutive_backups_do_not_overwrite_each_other() {
        let (_dir, log) = log_with("T1;jobA;1;t;a\n");
        let first = log.rewrite(|_| true).unwrap();
        let second = log.rewrite(|_| true).unwrap();
        assert_ne!(first.backup, second.backup);
    }
}
