use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::app::{cli::Settings, render::RenderOptions};
use crate::error::{Error, Result};
use crate::manager::task_manager::Timeouts;
use crate::scheduler::SchedulerKind;

/// taskman - track, resubmit and inspect batch jobs
#[derive(Parser, Debug)]
#[command(name = "taskman", version)]
#[command(about = "Batch job lifecycle tracker for Moab and Slurm clusters", long_about = None)]
pub struct Config {
    /// Root for the default store, script and log directories
    #[arg(long, env = "TASKMAN_HOME")]
    pub home: Option<PathBuf>,

    /// Directory holding the started/dead/finished logs (default: <home>/taskman)
    #[arg(long, env = "TASKMAN_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Templates and generated job scripts (default: <home>/script_moab)
    #[arg(long, env = "TASKMAN_SCRIPT_DIR")]
    pub script_dir: Option<PathBuf>,

    /// Job output and error files (default: <home>/logs)
    #[arg(long, env = "TASKMAN_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Batch scheduler to talk to
    #[arg(long, env = "TASKMAN_SCHEDULER", value_enum, default_value = "moab")]
    pub scheduler: SchedulerKind,

    /// Only list jobs of this user
    #[arg(long, env = "USER")]
    pub user: Option<String>,

    /// Seconds between refresh cycles
    #[arg(long, default_value = "10")]
    pub poll_interval: u64,

    /// Seconds allowed for the queue query
    #[arg(long, default_value = "10")]
    pub poll_timeout: u64,

    /// Seconds allowed for submit and cancel calls
    #[arg(long, default_value = "20")]
    pub command_timeout: u64,

    /// Seconds to pause after automatic resubmissions
    #[arg(long, default_value = "2")]
    pub settle_delay: u64,

    /// Maximum number of table rows
    #[arg(long, default_value = "60")]
    pub max_rows: usize,

    /// Width of the task name column
    #[arg(long, default_value = "30")]
    pub name_width: usize,

    /// Width of each report column
    #[arg(long, default_value = "12")]
    pub column_width: usize,

    /// Output lines shown per stream by `inspect`
    #[arg(long, default_value = "10")]
    pub tail_lines: usize,

    /// Hook run by `pack` (default: <home>/pack.sh)
    #[arg(long)]
    pub pack_script: Option<PathBuf>,

    /// Diagnostic log file (default: <store-dir>/taskman.log)
    #[arg(long, env = "TASKMAN_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Print the table once and exit
    #[arg(long, conflicts_with = "exec")]
    pub once: bool,

    /// Run one command line, e.g. "cancel job*", and exit
    #[arg(long)]
    pub exec: Option<String>,
}

/// Every filesystem location, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub store_dir: PathBuf,
    pub script_dir: PathBuf,
    pub log_dir: PathBuf,
    pub pack_script: PathBuf,
    pub log_file: PathBuf,
}

impl Config {
    pub fn paths(&self) -> Result<Paths> {
        let home = || -> Result<PathBuf> {
            self.home
                .clone()
                .or_else(dirs::home_dir)
                .ok_or_else(|| Error::Config("no home directory, pass --home".into()))
        };
        let or_home = |explicit: &Option<PathBuf>, default: &str| -> Result<PathBuf> {
            match explicit {
                Some(path) => Ok(path.clone()),
                None => Ok(home()?.join(default)),
            }
        };

        let store_dir = or_home(&self.store_dir, "taskman")?;
        let log_file = self
            .log_file
            .clone()
            .unwrap_or_else(|| store_dir.join("taskman.log"));
        Ok(Paths {
            script_dir: or_home(&self.script_dir, "script_moab")?,
            log_dir: or_home(&self.log_dir, "logs")?,
            pack_script: or_home(&self.pack_script, "pack.sh")?,
            store_dir,
            log_file,
        })
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            poll: Duration::from_secs(self.poll_timeout),
            command: Duration::from_secs(self.command_timeout),
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            poll_interval: Duration::from_secs(self.poll_interval),
            settle_delay: Duration::from_secs(self.settle_delay),
            render: RenderOptions {
                max_rows: self.max_rows,
                name_width: self.name_width,
                column_width: self.column_width,
            },
            tail_lines: self.tail_lines,
        }
    }
}
