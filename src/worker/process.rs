use std::{
    io,
    os::unix::process::CommandExt,
    process::{Command, ExitStatus, Output, Stdio},
    thread,
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError};
use log::{error, info, warn};

/// Result of one bounded external command.
#[derive(Debug)]
pub enum ExecOutcome {
    Ok(String),
    TimedOut,
    Failed { status: ExitStatus, output: String },
}

fn describe(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Runs `program` and waits at most `timeout` for it. A child that overruns
/// is killed together with its process group. `Err` only when it cannot be
/// started at all.
pub fn run(program: &str, args: &[String], timeout: Duration) -> io::Result<ExecOutcome> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Keep terminal Ctrl+C away from scheduler commands.
        .process_group(0)
        .spawn()?;
    let pid = child.id();

    let (sender, receiver) = bounded(1);
    thread::spawn(move || {
        let _ = sender.send(child.wait_with_output());
    });

    match receiver.recv_timeout(timeout) {
        Ok(Ok(output)) => {
            let text = combined_output(&output);
            if output.status.success() {
                Ok(ExecOutcome::Ok(text))
            } else {
                Ok(ExecOutcome::Failed {
                    status: output.status,
                    output: text,
                })
            }
        }
        Ok(Err(e)) => Err(e),
        Err(RecvTimeoutError::Timeout) => {
            warn!(
                "Timeout after {:?} with command: {}",
                timeout,
                describe(program, args)
            );
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
            Ok(ExecOutcome::TimedOut)
        }
        Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
            io::ErrorKind::Other,
            format!("lost track of `{}`", describe(program, args)),
        )),
    }
}

/// Starts `program` without waiting for it; its exit is only logged.
pub fn spawn_detached(program: &str, args: &[String]) -> io::Result<u32> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()?;
    let pid = child.id();
    let label = describe(program, args);
    info!("Started '{}' as pid {}.", label, pid);

    thread::spawn(move || match child.wait() {
        Ok(status) if status.success() => info!("'{}' finished.", label),
        Ok(status) => warn!("'{}' exited with {}.", label, status),
        Err(e) => error!("Failed to wait for '{}': {}", label, e),
    });
    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout: Duration) -> io::Result<ExecOutcome> {
        run("sh", &["-c".to_string(), script.to_string()], timeout)
    }

    #[test]
    fn successful_command_returns_output() {
        match sh("echo 4242; echo warn >&2", Duration::from_secs(5)).unwrap() {
            ExecOutcome::Ok(text) => assert_eq!(text, "4242\nwarn\n"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn non_zero_exit_is_failed() {
        match sh("echo nope; exit 3", Duration::from_secs(5)).unwrap() {
            ExecOutcome::Failed { status, output } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(output, "nope\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn slow_command_times_out() {
        let started = std::time::Instant::now();
        let outcome = sh("sleep 5", Duration::from_millis(200)).unwrap();
        assert!(matches!(outcome, ExecOutcome::TimedOut));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_an_error() {
        assert!(run("/nonexistent/taskman-test-binary", &[], Duration::from_secs(1)).is_err());
    }
}
