use std::{io, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("cannot start {path}: {source}")]
    Hook {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("configuration: {0}")]
    Config(String),
    #[error("terminal error: {0}")]
    Terminal(#[from] io::Error),
}

/// Failures of the durable task log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("field `{field}` cannot contain {forbidden:?}: {value:?}")]
    InvalidField {
        field: &'static str,
        forbidden: char,
        value: String,
    },
    #[error("field `{field}` cannot be {value:?}")]
    ReservedName { field: &'static str, value: String },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Non-timeout failures of a scheduler command. Timeouts are not errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}: {output}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },
    #[error("unexpected output from `{command}`: {reason}")]
    Malformed { command: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("cannot read template {path}: {source}")]
    Template {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write script {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed report line in {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Operator mistakes. Reported, never fatal.
#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{command}` expects {expected}, got {got} argument(s)")]
    Arity {
        command: &'static str,
        expected: String,
        got: usize,
    },
    #[error("`{command}`: parameter `{param}` cannot be empty")]
    Empty {
        command: &'static str,
        param: &'static str,
    },
    #[error("`{command}`: `{value}` is not a flag (use `all` or leave it empty)")]
    Flag {
        command: &'static str,
        value: String,
    },
    #[error("`{command}`: no job matches `{pattern}`")]
    NoMatch {
        command: &'static str,
        pattern: String,
    },
    #[error("`{command}`: no eligible job among {matched} matching `{pattern}`")]
    NotEligible {
        command: &'static str,
        pattern: String,
        matched: usize,
    },
}
