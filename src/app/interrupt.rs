use std::{
    io,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crossbeam_channel::{after, select, tick};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const CHECK_EVERY: Duration = Duration::from_millis(100);

extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Routes SIGINT to the command-mode flag instead of terminating.
pub fn install() -> io::Result<()> {
    let handler = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
    let previous = unsafe { libc::signal(libc::SIGINT, handler) };
    if previous == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn is_set() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Clears the flag, returning whether it was set.
pub fn take() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
pub fn raise() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Sleeps for `duration` unless interrupted first. Returns `true` when woken
/// by an interrupt.
pub fn sleep(duration: Duration) -> bool {
    let ticker = tick(CHECK_EVERY);
    let deadline = after(duration);
    loop {
        if is_set() {
            return true;
        }
        select! {
            recv(ticker) -> _ => {}
            recv(deadline) -> _ => return is_set(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    // Both cases share the process-wide flag, so they run in one test.
    #[test]
    fn sleep_ends_early_when_interrupted() {
        take();
        let started = Instant::now();
        assert!(!sleep(Duration::from_millis(150)));
        assert!(started.elapsed() >= Duration::from_millis(150));

        raise();
        let started = Instant::now();
        assert!(sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(take());
        assert!(!is_set());
    }
}
