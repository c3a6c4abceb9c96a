//! Completion rendezvous between a pipeline's bus thread and the control
//! thread.
//!
//! The bus callback calls [`CompletionLatch::finish`] on end-of-stream and
//! [`CompletionLatch::fail`] on an error message; control code blocks in
//! [`CompletionLatch::wait`].  Each session is a generation handed out by
//! [`CompletionLatch::begin`], so a waiter from an earlier session can tell
//! that it was superseded instead of reading the new session's outcome.
//!
//! An outcome stays recorded until the next `begin`; waiting does not
//! consume it.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::error::EngineError;
use crate::graph::{lock, Message};

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Finished,
    Failed(EngineError),
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// End-of-stream arrived, or the session was stopped explicitly.
    Finished,
    /// The bus reported an error before end-of-stream.
    Failed(EngineError),
    TimedOut,
    /// A newer session began while waiting.
    Superseded,
}

#[derive(Debug, Default)]
struct LatchState {
    generation: u64,
    active: bool,
    outcome: Option<Outcome>,
}

#[derive(Debug, Default)]
pub struct CompletionLatch {
    state: Mutex<LatchState>,
    changed: Condvar,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session, clearing the previous outcome.
    pub fn begin(&self) -> u64 {
        let mut state = lock(&self.state);
        state.generation += 1;
        state.active = true;
        state.outcome = None;
        self.changed.notify_all();
        state.generation
    }

    /// Record end-of-stream for the active session.  Ignored when no session
    /// is active or an outcome is already recorded.
    pub fn finish(&self) {
        self.record(Outcome::Finished, false);
    }

    /// Record an engine error for the active session.  Returns `true` when
    /// the error became the session's outcome.
    pub fn fail(&self, err: EngineError) -> bool {
        self.record(Outcome::Failed(err), false)
    }

    /// Mark the session finished on behalf of an explicit stop.
    pub fn force_finish(&self) {
        self.record(Outcome::Finished, true);
    }

    /// Close the session.  Later bus messages no longer change the outcome.
    pub fn deactivate(&self) {
        lock(&self.state).active = false;
    }

    /// `true` while a session is open and has no outcome yet.
    pub fn is_pending(&self) -> bool {
        let state = lock(&self.state);
        state.active && state.outcome.is_none()
    }

    pub fn generation(&self) -> u64 {
        lock(&self.state).generation
    }

    /// Feed a bus message: end-of-stream finishes the session, an error
    /// message fails it.  Everything else is ignored.
    ///
    /// Returns `true` when the message failed the active session.
    pub fn observe(&self, component: &str, message: &Message) -> bool {
        if message.is_eos() {
            self.finish();
            false
        } else if let Some(err) = EngineError::from_message(message) {
            log::error!("{component}: {err}");
            self.fail(err)
        } else {
            false
        }
    }

    fn record(&self, outcome: Outcome, forced: bool) -> bool {
        let mut state = lock(&self.state);
        if (state.active || forced) && state.outcome.is_none() {
            log::debug!("latch: session {} -> {outcome:?}", state.generation);
            state.outcome = Some(outcome);
            self.changed.notify_all();
            true
        } else {
            false
        }
    }

    /// Block until session `generation` has an outcome or `bound` elapses.
    pub fn wait(&self, generation: u64, bound: Duration) -> WaitOutcome {
        let deadline = Instant::now() + bound;
        let mut state = lock(&self.state);
        loop {
            if state.generation != generation {
                return WaitOutcome::Superseded;
            }
            match &state.outcome {
                Some(Outcome::Finished) => return WaitOutcome::Finished,
                Some(Outcome::Failed(err)) => return WaitOutcome::Failed(err.clone()),
                None => {}
            }
            let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                return WaitOutcome::TimedOut;
            };
            state = match self.changed.wait_timeout(state, left) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// [`wait`](Self::wait) on the most recent session.
    pub fn wait_current(&self, bound: Duration) -> WaitOutcome {
        self.wait(self.generation(), bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn engine_error() -> EngineError {
        EngineError {
            element: "asrc".into(),
            code: 5,
            description: "stream failed".into(),
        }
    }

    #[test]
    fn wait_times_out_without_outcome() {
        let latch = CompletionLatch::new();
        let generation = latch.begin();
        let started = Instant::now();
        assert_eq!(
            latch.wait(generation, Duration::from_millis(50)),
            WaitOutcome::TimedOut
        );
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(latch.is_pending());
    }

    #[test]
    fn finish_from_another_thread_wakes_waiter() {
        let latch = Arc::new(CompletionLatch::new());
        let generation = latch.begin();
        let remote = Arc::clone(&latch);
        let poster = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.finish();
        });
        assert_eq!(
            latch.wait(generation, Duration::from_secs(5)),
            WaitOutcome::Finished
        );
        poster.join().unwrap();
    }

    #[test]
    fn outcome_survives_a_successful_wait() {
        let latch = CompletionLatch::new();
        latch.begin();
        latch.finish();
        assert_eq!(latch.wait_current(Duration::ZERO), WaitOutcome::Finished);
        assert_eq!(latch.wait_current(Duration::ZERO), WaitOutcome::Finished);

        latch.begin();
        assert_eq!(latch.wait_current(Duration::ZERO), WaitOutcome::TimedOut);
    }

    #[test]
    fn error_terminates_the_wait() {
        let latch = Arc::new(CompletionLatch::new());
        let generation = latch.begin();
        let remote = Arc::clone(&latch);
        let poster = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.fail(engine_error());
        });
        assert_eq!(
            latch.wait(generation, Duration::from_secs(5)),
            WaitOutcome::Failed(engine_error())
        );
        poster.join().unwrap();
        assert!(!latch.is_pending());
    }

    #[test]
    fn first_outcome_wins() {
        let latch = CompletionLatch::new();
        latch.begin();
        latch.finish();
        latch.fail(engine_error());
        assert_eq!(latch.wait_current(Duration::ZERO), WaitOutcome::Finished);
    }

    #[test]
    fn messages_outside_a_session_are_ignored() {
        let latch = CompletionLatch::new();
        let generation = latch.begin();
        latch.deactivate();
        latch.finish();
        assert_eq!(latch.wait(generation, Duration::ZERO), WaitOutcome::TimedOut);

        latch.force_finish();
        assert_eq!(latch.wait(generation, Duration::ZERO), WaitOutcome::Finished);
    }

    #[test]
    fn observe_maps_bus_messages() {
        let latch = CompletionLatch::new();
        latch.begin();
        let error = Message::Error {
            source: "asrc".into(),
            code: 5,
            description: "stream failed".into(),
        };
        assert!(!latch.observe(
            "test",
            &Message::Warning {
                source: "sink".into(),
                description: "late".into(),
            },
        ));
        assert!(latch.is_pending());
        assert!(latch.observe("test", &error));
        assert_eq!(
            latch.wait_current(Duration::ZERO),
            WaitOutcome::Failed(engine_error())
        );
        // Only the first error decides the session.
        assert!(!latch.observe("test", &error));
    }

    #[test]
    fn new_session_supersedes_old_waiter() {
        let latch = Arc::new(CompletionLatch::new());
        let first = latch.begin();
        let remote = Arc::clone(&latch);
        let waiter = thread::spawn(move || remote.wait(first, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(30));
        latch.begin();
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Superseded);
    }
}
