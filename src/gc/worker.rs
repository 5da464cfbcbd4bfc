//! The background collector thread (§4.10): states {not-started, idle,
//! running, exiting}. `enable` spawns the thread (not-started -> running);
//! it sleeps on a condition variable between cycles (running -> idle ->
//! running); `disable` signals exit, wakes it, and joins before returning
//! (any -> exiting), so a caller's own "run one final cycle" happens only
//! once the thread is truly gone, never racing it.
//!
//! Grounded on `mmtk-core`'s `scheduler::worker_monitor::WorkerMonitor`: a
//! `Mutex`-guarded sync block paired with a single `Condvar`, with the
//! mutex held only long enough to read/update state and never across the
//! callback that does the actual (slow) work.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::gc::CollectStats;

type CycleFn = dyn FnMut() -> CollectStats + Send;

/// Per-spawn shutdown signal: a fresh one is made each time `enable` starts
/// a thread, so a stale signal from a previous run/join can't be mistaken
/// for the current thread's.
struct Control {
    shutdown: Mutex<bool>,
    wake: Condvar,
}

struct RunningThread {
    control: Arc<Control>,
    handle: std::thread::JoinHandle<()>,
}

/// A handle to the (possibly not currently running) background collector.
/// Exactly one thread exists while `enable`d, per §5's "exactly one
/// collector thread may exist per allocator" — `disable` joins it fully
/// rather than merely pausing it, so a later `enable` always spawns a fresh
/// one instead of waking a parked survivor.
pub struct GcWorker {
    interval: Duration,
    run_cycle: Arc<Mutex<Box<CycleFn>>>,
    running: Mutex<Option<RunningThread>>,
}

impl GcWorker {
    /// Constructs a worker in the not-started state. `run_cycle` is called
    /// from the background thread every time the interval elapses while
    /// running; its return value is logged but otherwise only useful to
    /// tests. Call [`GcWorker::enable`] to actually start it.
    pub fn new<F>(interval: Duration, run_cycle: F) -> Self
    where
        F: FnMut() -> CollectStats + Send + 'static,
    {
        GcWorker {
            interval,
            run_cycle: Arc::new(Mutex::new(Box::new(run_cycle))),
            running: Mutex::new(None),
        }
    }

    /// Constructs a worker and immediately enables it if `enabled_at_init`.
    pub fn spawn<F>(interval: Duration, enabled_at_init: bool, run_cycle: F) -> Self
    where
        F: FnMut() -> CollectStats + Send + 'static,
    {
        let worker = Self::new(interval, run_cycle);
        if enabled_at_init {
            worker.enable();
        }
        worker
    }

    fn run(control: Arc<Control>, interval: Duration, run_cycle: Arc<Mutex<Box<CycleFn>>>) {
        loop {
            let guard = control.shutdown.lock().unwrap();
            let (guard, timeout) = control.wake.wait_timeout(guard, interval).unwrap();
            let shutting_down = *guard;
            drop(guard);

            if shutting_down {
                log::trace!("gc worker: shutdown observed, exiting");
                return;
            }
            if timeout.timed_out() {
                log::trace!("gc worker: interval elapsed, running a cycle");
                let stats = (run_cycle.lock().unwrap())();
                log::debug!("gc worker: cycle finished: {stats:?}");
            }
            // Woken early without a shutdown pending shouldn't happen in
            // practice (nothing else signals this condvar), but loop back
            // around and re-check rather than assume.
        }
    }

    /// Starts the background thread if it is not already running
    /// (not-started/exited -> running). Idempotent.
    pub fn enable(&self) {
        let mut slot = self.running.lock().unwrap();
        if slot.is_some() {
            return;
        }
        let control = Arc::new(Control {
            shutdown: Mutex::new(false),
            wake: Condvar::new(),
        });
        let thread_control = control.clone();
        let run_cycle = self.run_cycle.clone();
        let interval = self.interval;
        let handle = std::thread::Builder::new()
            .name("sconeheap-gc".to_string())
            .spawn(move || Self::run(thread_control, interval, run_cycle))
            .expect("failed to spawn background collector thread");
        log::debug!("gc worker: enabled, background thread spawned");
        *slot = Some(RunningThread { control, handle });
    }

    /// Signals the background thread to exit, wakes it, and joins it before
    /// returning (running/idle -> exiting, synchronously) — per §4.10, the
    /// caller is then free to run one final cycle knowing no background
    /// cycle can start concurrently with it. Idempotent: a no-op if the
    /// worker is not currently running.
    pub fn disable(&self) {
        let running = self.running.lock().unwrap().take();
        if let Some(RunningThread { control, handle }) = running {
            *control.shutdown.lock().unwrap() = true;
            control.wake.notify_all();
            let _ = handle.join();
            log::debug!("gc worker: disabled, background thread joined");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }
}

impl Drop for GcWorker {
    fn drop(&mut self) {
        self.disable();
    }
}
