use std::{
    io::{self, Write},
    time::Duration,
};

use chrono::{Local, Utc};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    style::Stylize,
    terminal,
};
use log::{error, info, warn};

use crate::app::{
    commands,
    interrupt,
    render::{self, RenderHint, RenderOptions, StatusView},
};
use crate::error::{Error, Result};
use crate::manager::task_manager::TaskManager;
use crate::models::{command::Command, task::Job};

pub struct Settings {
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub render: RenderOptions,
    pub tail_lines: usize,
}

/// Puts the terminal in raw mode for as long as it lives.
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            error!("Failed to disable raw mode: {}", e);
        }
    }
}

fn now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Polls, renders and resubmits until the operator exits from command mode.
pub fn run_cli(manager: TaskManager, settings: Settings) -> Result<()> {
    interrupt::install()?;
    info!("Task manager started.");
    let mut commands_history: Vec<String> = Vec::new();

    loop {
        update(&manager, &settings, true)?;
        if !interrupt::is_set() {
            interrupt::sleep(settings.poll_interval);
        }
        if interrupt::take() {
            println!("\rUpdating, please wait...");
            if !command_mode(&manager, &settings, &mut commands_history)? {
                break;
            }
        }
    }

    println!("\rExiting the program...");
    info!("Task manager stopped.");
    Ok(())
}

/// One refresh and render, without resubmitting anything.
pub fn run_once(manager: &TaskManager, settings: &Settings) -> Result<()> {
    if let Some(jobs) = manager.refresh()? {
        print_view(&mut io::stdout(), &render::render(&jobs, &settings.render, now()))?;
    } else {
        println!("Task log is missing or empty.");
    }
    Ok(())
}

/// Dispatches a single command line against a fresh refresh.
pub fn run_command(manager: &TaskManager, settings: &Settings, line: &str) -> Result<()> {
    let Some(command) = commands::parse(line)? else {
        return Ok(());
    };
    let jobs = manager.refresh()?.unwrap_or_default();
    for line in commands::dispatch(manager, &jobs, &command, settings.tail_lines)? {
        println!("{}", line);
    }
    Ok(())
}

fn update(manager: &TaskManager, settings: &Settings, resubmit: bool) -> io::Result<Option<Vec<Job>>> {
    let mut stdout = io::stdout();
    execute!(
        stdout,
        terminal::Clear(terminal::ClearType::All),
        cursor::MoveTo(0, 0)
    )?;
    print_title(&mut stdout)?;

    let jobs = match manager.refresh() {
        Ok(Some(jobs)) => jobs,
        Ok(None) => {
            writeln!(stdout, "\rTask log is missing or empty, skipping this update.")?;
            return Ok(None);
        }
        Err(e) => {
            error!("Update failed: {}", e);
            writeln!(stdout, "\r{}", format!("Update failed: {}", e).red())?;
            return Ok(None);
        }
    };
    print_view(&mut stdout, &render::render(&jobs, &settings.render, now()))?;

    if resubmit && !interrupt::is_set() {
        match manager.auto_resubmit(&jobs) {
            Ok(submissions) => {
                for submission in &submissions {
                    writeln!(stdout, "\r{}", commands::describe_submission(submission))?;
                }
            }
            Err(e) => {
                error!("Automatic resubmission failed: {}", e);
                writeln!(stdout, "\r{}", format!("Automatic resubmission failed: {}", e).red())?;
            }
        }
        stdout.flush()?;
        interrupt::sleep(settings.settle_delay);
    }
    Ok(Some(jobs))
}

fn print_title(out: &mut impl Write) -> io::Result<()> {
    writeln!(
        out,
        "\r{}     {}     {}",
        "( Task Manager )".white().on_magenta(),
        Local::now().format("%H:%M:%S"),
        "Ctrl+C to enter command mode".grey()
    )
}

fn print_view(out: &mut impl Write, view: &StatusView) -> io::Result<()> {
    writeln!(out, "\r{}", view.header.as_str().bold())?;
    for row in &view.rows {
        let split = row
            .text
            .char_indices()
            .nth(StatusView::STATUS_CELL)
            .map_or(row.text.len(), |(i, _)| i);
        let (status, rest) = row.text.split_at(split);
        match row.hint {
            RenderHint::NeedsAttention => writeln!(out, "\r{}", row.text.as_str().red())?,
            RenderHint::Success => writeln!(out, "\r{}{}", status.green(), rest)?,
            RenderHint::Cancelled => writeln!(out, "\r{}{}", status.yellow(), rest)?,
            RenderHint::RawDetail => writeln!(out, "\r{}{}", status.magenta(), rest)?,
            RenderHint::Normal => writeln!(out, "\r{}", row.text)?,
        }
    }
    if let Some(summary) = &view.summary {
        writeln!(out, "\r{}", summary.as_str().dark_grey())?;
    }
    out.flush()
}

/// Refreshes once more, then reads and runs one command. Returns `false`
/// when the operator asked to leave.
fn command_mode(
    manager: &TaskManager,
    settings: &Settings,
    commands_history: &mut Vec<String>,
) -> Result<bool> {
    let jobs = update(manager, settings, false)?.unwrap_or_default();

    println!("\r-------------------");
    println!("\rAvailable commands:");
    for line in commands::help_lines() {
        println!("\r{}", line);
    }

    let Some(input) = read_command(commands_history)? else {
        println!("\rCommand abandoned.");
        return Ok(true);
    };

    match run_line(manager, &jobs, &input, settings.tail_lines) {
        LineOutcome::Exit => return Ok(false),
        LineOutcome::Nothing => return Ok(true),
        LineOutcome::Done(lines) => {
            for line in lines {
                println!("\r{}", line);
            }
        }
        LineOutcome::Failed(message) => println!("\r{}", message.red()),
    }
    wait_for_key()?;
    Ok(true)
}

/// What one typed command line came to.
#[derive(Debug, PartialEq)]
enum LineOutcome {
    Exit,
    Nothing,
    Done(Vec<String>),
    Failed(String),
}

fn run_line(manager: &TaskManager, jobs: &[Job], input: &str, tail_lines: usize) -> LineOutcome {
    let command = match commands::parse(input) {
        Ok(Some(command)) => command,
        Ok(None) => return LineOutcome::Nothing,
        Err(e) => {
            warn!("Rejected command '{}': {}", input, e);
            return LineOutcome::Failed(e.to_string());
        }
    };
    if command == Command::Exit {
        return LineOutcome::Exit;
    }
    match commands::dispatch(manager, jobs, &command, tail_lines) {
        Ok(lines) => LineOutcome::Done(lines),
        Err(e) => {
            match &e {
                Error::Command(_) => warn!("Command '{}' failed: {}", input, e),
                _ => error!("Command '{}' failed: {}", input, e),
            }
            LineOutcome::Failed(e.to_string())
        }
    }
}

fn wait_for_key() -> io::Result<()> {
    print!("\rPress any key...");
    io::stdout().flush()?;
    let _raw = RawMode::enable()?;
    loop {
        if let Event::Key(key_event) = event::read()? {
            if key_event.kind == KeyEventKind::Press {
                break;
            }
        }
    }
    println!();
    Ok(())
}

fn clear_line() -> io::Result<()> {
    execute!(
        io::stdout(),
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine)
    )
}

fn redraw(input: &str) -> io::Result<()> {
    clear_line()?;
    print!("{} {}", "Command>>".bold(), input);
    io::stdout().flush()
}

/// Line editor with history. `None` when the operator backs out with
/// Ctrl+C or Esc.
fn read_command(commands_history: &mut Vec<String>) -> io::Result<Option<String>> {
    let _raw = RawMode::enable()?;
    let mut history_index = commands_history.len();
    let mut input = String::new();
    redraw(&input)?;

    loop {
        let Event::Key(key_event) = event::read()? else {
            continue;
        };
        if key_event.kind != KeyEventKind::Press {
            continue;
        }
        match key_event.code {
            KeyCode::Enter => {
                println!("\r");
                break;
            }
            KeyCode::Esc => {
                println!("\r");
                return Ok(None);
            }
            KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                println!("\r");
                return Ok(None);
            }
            KeyCode::Up => {
                if history_index > 0 {
                    history_index -= 1;
                }
                if let Some(command) = commands_history.get(history_index) {
                    input = command.clone();
                    redraw(&input)?;
                }
            }
            KeyCode::Down => {
                if history_index < commands_history.len() {
                    history_index += 1;
                }
                input = commands_history
                    .get(history_index)
                    .cloned()
                    .unwrap_or_default();
                redraw(&input)?;
            }
            KeyCode::Char(c) => {
                input.push(c);
                print!("{}", c);
                io::stdout().flush()?;
            }
            KeyCode::Backspace => {
                input.pop();
                redraw(&input)?;
            }
            _ => {}
        }
    }

    if !input.trim().is_empty() {
        commands_history.push(input.clone());
    }
    Ok(Some(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::task_manager::tests::Fixture;

    #[test]
    fn each_line_yields_exactly_one_outcome() {
        let fixture = Fixture::new("T1;jobA;1;tmplA;a\n");
        let jobs = fixture.jobs();
        let run = |line: &str| run_line(&fixture.manager, &jobs, line, 3);

        assert_eq!(run("quit"), LineOutcome::Exit);
        assert_eq!(run("  "), LineOutcome::Nothing);
        assert!(matches!(run("explode"), LineOutcome::Failed(_)));
        assert!(matches!(run("cancel nothing*"), LineOutcome::Failed(_)));
        assert!(matches!(run("show jobA"), LineOutcome::Done(lines) if lines[0].starts_with("jobA [T1]")));
    }
}
