use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};

use super::{CancelOutcome, QueueState, Result, Scheduler, Snapshot, SubmitOutcome};

/// In-memory scheduler recording every call.
pub struct FakeScheduler {
    pub snapshot: RefCell<Snapshot>,
    pub submitted: RefCell<Vec<PathBuf>>,
    pub cancelled: RefCell<Vec<String>>,
    pub refuse_submissions: Cell<bool>,
    next_id: Cell<u64>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self {
            snapshot: RefCell::new(Snapshot::Live(HashMap::new())),
            submitted: RefCell::new(Vec::new()),
            cancelled: RefCell::new(Vec::new()),
            refuse_submissions: Cell::new(false),
            next_id: Cell::new(1000),
        }
    }

    pub fn set_queue(&self, entries: &[(&str, QueueState)]) {
        let jobs = entries
            .iter()
            .map(|(id, state)| (id.to_string(), state.clone()))
            .collect();
        *self.snapshot.borrow_mut() = Snapshot::Live(jobs);
    }
}

impl Scheduler for FakeScheduler {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn poll(&self, _timeout: Duration) -> Result<Snapshot> {
        Ok(self.snapshot.borrow().clone())
    }

    fn submit(&self, script: &Path, _timeout: Duration) -> SubmitOutcome {
        if self.refuse_submissions.get() {
            return SubmitOutcome::Failed("queue closed".to_string());
        }
        self.submitted.borrow_mut().push(script.to_path_buf());
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        SubmitOutcome::Submitted(id.to_string())
    }

    fn cancel(&self, external_id: &str, _timeout: Duration) -> CancelOutcome {
        self.cancelled.borrow_mut().push(external_id.to_string());
        CancelOutcome::Cancelled(format!("job '{}' cancelled", external_id))
    }
}

/// Lets a test keep a handle on the fake it hands to the manager.
impl Scheduler for Rc<FakeScheduler> {
    fn name(&self) -> &'static str {
        self.as_ref().name()
    }

    fn poll(&self, timeout: Duration) -> Result<Snapshot> {
        self.as_ref().poll(timeout)
    }

    fn submit(&self, script: &Path, timeout: Duration) -> SubmitOutcome {
        self.as_ref().submit(script, timeout)
    }

    fn cancel(&self, external_id: &str, timeout: Duration) -> CancelOutcome {
        self.as_ref().cancel(external_id, timeout)
    }
}
