//! Sync Buffer (C7): an ordered deferred-action queue with two priority
//! bands (`later1` fast-forward, `later2` rebase) and a final flush.

use crate::error::GitError;

type Thunk = Box<dyn FnOnce() -> Result<(), GitError> + Send>;

struct Deferred {
    project: String,
    thunk: Thunk,
}

#[derive(Default)]
pub struct SyncBuffer {
    messages: Vec<String>,
    failures: Vec<(String, String)>,
    later_queue1: Vec<Deferred>,
    later_queue2: Vec<Deferred>,
    clean: bool,
}

impl SyncBuffer {
    pub fn new() -> Self {
        SyncBuffer { clean: true, ..Default::default() }
    }

    pub fn info(&mut self, project: &str, msg: impl Into<String>) {
        self.messages.push(format!("{project}: {}", msg.into()));
    }

    pub fn fail(&mut self, project: &str, err: impl std::fmt::Display) {
        self.clean = false;
        self.failures.push((project.to_string(), err.to_string()));
    }

    pub fn later1(&mut self, project: String, thunk: impl FnOnce() -> Result<(), GitError> + Send + 'static) {
        self.later_queue1.push(Deferred { project, thunk: Box::new(thunk) });
    }

    pub fn later2(&mut self, project: String, thunk: impl FnOnce() -> Result<(), GitError> + Send + 'static) {
        self.later_queue2.push(Deferred { project, thunk: Box::new(thunk) });
    }

    /// Run `later_queue1`, stopping at its first failure; run `later_queue2`
    /// only if `later_queue1` fully succeeded (a strict two-gate sequence,
    /// not independent queues — see SPEC_FULL.md §4.7). Returns whether the
    /// buffer is still clean.
    pub fn finish(mut self) -> (bool, Vec<String>, Vec<(String, String)>) {
        for line in &self.messages {
            log::info!("{line}");
        }

        let queue1_clean = Self::run_queue(&mut self.later_queue1, &mut self.failures, &mut self.clean);
        if queue1_clean {
            Self::run_queue(&mut self.later_queue2, &mut self.failures, &mut self.clean);
        } else {
            for deferred in self.later_queue2.drain(..) {
                self.failures.push((deferred.project, "skipped: later1 queue failed".to_string()));
            }
        }

        for failure in &self.failures {
            log::error!("{}: {}", failure.0, failure.1);
        }

        (self.clean, self.messages, self.failures)
    }

    fn run_queue(queue: &mut Vec<Deferred>, failures: &mut Vec<(String, String)>, clean: &mut bool) -> bool {
        let mut all_ok = true;
        let pending: Vec<Deferred> = queue.drain(..).collect();
        for deferred in pending {
            match (deferred.thunk)() {
                Ok(()) => {}
                Err(e) => {
                    *clean = false;
                    all_ok = false;
                    failures.push((deferred.project, e.to_string()));
                    break;
                }
            }
        }
        all_ok
    }

    pub fn is_clean(&self) -> bool {
        self.clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later2_runs_when_later1_succeeds() {
        let mut buf = SyncBuffer::new();
        buf.later1("a".to_string(), || Ok(()));
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        buf.later2("b".to_string(), move || {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });
        let (clean, _, failures) = buf.finish();
        assert!(clean);
        assert!(failures.is_empty());
        assert!(ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn later2_is_skipped_when_later1_fails() {
        let mut buf = SyncBuffer::new();
        buf.later1("a".to_string(), || Err(GitError::Io("boom".to_string())));
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        buf.later2("b".to_string(), move || {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });
        let (clean, _, failures) = buf.finish();
        assert!(!clean);
        assert_eq!(failures.len(), 2);
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn later1_stops_at_first_failure_leaving_rest_unrun() {
        let mut buf = SyncBuffer::new();
        buf.later1("a".to_string(), || Err(GitError::Io("boom".to_string())));
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let ran2 = ran.clone();
        buf.later1("b".to_string(), move || {
            ran2.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });
        let (clean, _, _) = buf.finish();
        assert!(!clean);
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
