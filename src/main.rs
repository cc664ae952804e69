mod app;
mod config;
mod error;
mod logging;
mod manager;
mod models;
mod scheduler;
mod store;
mod worker;

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use app::cli;
use config::Config;
use error::Result;
use manager::{report::ReportReader, scripts::ScriptGenerator, task_manager::TaskManager};
use store::task_log::TaskLog;

fn run(config: Config) -> Result<()> {
    let paths = config.paths()?;
    logging::init(&paths.log_file)?;
    info!(
        "Using store {}, scheduler {:?}",
        paths.store_dir.display(),
        config.scheduler
    );

    let manager = TaskManager::new(
        TaskLog::new(&paths.store_dir),
        scheduler::from_kind(config.scheduler, config.user.clone()),
        ScriptGenerator::new(&paths.script_dir),
        ReportReader::new(&paths.log_dir),
        config.timeouts(),
        paths.pack_script,
    );
    let settings = config.settings();

    if config.once {
        cli::run_once(&manager, &settings)
    } else if let Some(line) = &config.exec {
        cli::run_command(&manager, &settings, line)
    } else {
        cli::run_cli(manager, settings)
    }
}

fn main() -> ExitCode {
    match run(Config::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("taskman: {}", e);
            ExitCode::FAILURE
        }
    }
}
