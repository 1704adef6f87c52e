//! Per-bridge CPU watchdog.
//!
//! One persistent thread per isolate. Each guarded run arms a deadline; if the
//! run is still going when the deadline passes, the thread terminates
//! execution on the isolate. The thread exits when the watchdog is dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use deno_core::v8;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct State {
    /// Deadline of the run in progress, if any.
    deadline: Option<Instant>,
    /// Set when the thread terminated the current run.
    fired: bool,
    shutdown: bool,
}

/// Terminates runs on one isolate that outlive their deadline.
pub(crate) struct Watchdog {
    state: Arc<Mutex<State>>,
    wake: Arc<Condvar>,
}

impl Watchdog {
    /// Start the watchdog thread for the isolate behind `handle`.
    ///
    /// Fails when the OS refuses to spawn the thread.
    pub(crate) fn new(handle: v8::IsolateHandle) -> std::io::Result<Self> {
        let state = Arc::new(Mutex::new(State::default()));
        let wake = Arc::new(Condvar::new());
        // The join handle is dropped; the thread exits on its own once
        // `shutdown` is set.
        std::thread::Builder::new()
            .name("exprbox-watchdog".into())
            .spawn({
                let state = Arc::clone(&state);
                let wake = Arc::clone(&wake);
                move || watch(handle, &state, &wake)
            })?;
        Ok(Self { state, wake })
    }

    /// Run `f` under a `timeout` deadline.
    ///
    /// Returns the closure's output and whether the deadline fired. When it
    /// fired, the isolate is left terminating; the caller must cancel the
    /// termination before running more script.
    pub(crate) fn run<T>(&self, timeout: Duration, f: impl FnOnce() -> T) -> (T, bool) {
        {
            let mut state = self.state.lock();
            state.deadline = Some(Instant::now() + timeout);
            state.fired = false;
        }
        self.wake.notify_one();

        let out = f();

        let fired = {
            let mut state = self.state.lock();
            state.deadline = None;
            std::mem::take(&mut state.fired)
        };
        self.wake.notify_one();
        (out, fired)
    }
}

fn watch(handle: v8::IsolateHandle, state: &Mutex<State>, wake: &Condvar) {
    let mut guard = state.lock();
    loop {
        wake.wait_while(&mut guard, |s| s.deadline.is_none() && !s.shutdown);
        if guard.shutdown {
            break;
        }
        let Some(deadline) = guard.deadline else {
            continue;
        };
        let now = Instant::now();
        if now >= deadline {
            guard.deadline = None;
            guard.fired = true;
            handle.terminate_execution();
            tracing::debug!("watchdog terminated a run");
            continue;
        }
        // Woken early when the run finishes or a new one is armed; either
        // way the loop re-reads the current deadline.
        wake.wait_for(&mut guard, deadline - now);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.state.lock().shutdown = true;
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deno_core::{JsRuntime, RuntimeOptions};

    #[test]
    fn run_reports_whether_the_deadline_fired() {
        let mut runtime = JsRuntime::new(RuntimeOptions::default());
        let watchdog = Watchdog::new(runtime.v8_isolate().thread_safe_handle()).unwrap();
        let ((), fired) = watchdog.run(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
        });
        assert!(fired);
        let (out, fired) = watchdog.run(Duration::from_secs(5), || 7);
        assert_eq!(out, 7);
        assert!(!fired);
    }
}
