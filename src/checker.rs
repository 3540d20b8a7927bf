//! Owns the work/result queues, spawns the worker pool, and streams
//! results back to the caller (spec.md §4.1, §5).

use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::classify;
use crate::config::Config;
use crate::rate_limiter::{now_secs, RateLimiter};
use crate::types::{CheckRequest, CheckResult, Hyperlink};
use crate::worker;

const QUEUE_POLL: Duration = Duration::from_secs(1);

/// Thread-safe priority work queue plus an in-flight counter so the
/// caller can `join()` the way `queue.Queue.join()` does in the
/// original: block until every enqueued item has been acknowledged
/// done, including items re-enqueued by rate-limited workers.
struct WorkQueue {
    heap: Mutex<BinaryHeap<CheckRequest>>,
    not_empty: Condvar,
    in_flight: Mutex<usize>,
    all_done: Condvar,
}

impl WorkQueue {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            not_empty: Condvar::new(),
            in_flight: Mutex::new(0),
            all_done: Condvar::new(),
        }
    }

    fn put(&self, req: CheckRequest) {
        let mut in_flight = self.in_flight.lock().unwrap();
        *in_flight += 1;
        drop(in_flight);

        let mut heap = self.heap.lock().unwrap();
        heap.push(req);
        self.not_empty.notify_one();
    }

    fn get(&self) -> CheckRequest {
        let mut heap = self.heap.lock().unwrap();
        loop {
            if let Some(req) = heap.pop() {
                return req;
            }
            heap = self.not_empty.wait(heap).unwrap();
        }
    }

    /// Mark one previously-`get()`'d item as fully processed.
    fn task_done(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        *in_flight -= 1;
        if *in_flight == 0 {
            self.all_done.notify_all();
        }
    }

    /// Block until every put item has been acknowledged `task_done`.
    fn join(&self) {
        let in_flight = self.in_flight.lock().unwrap();
        let _unused = self.all_done.wait_while(in_flight, |n| *n != 0).unwrap();
    }
}

/// The priority work queue and result channel shared by every worker
/// thread for the duration of one `Checker::check` call.
pub struct Checker {
    config: Arc<Config>,
    source_root: PathBuf,
}

impl Checker {
    pub fn new(config: Config, source_root: impl Into<PathBuf>) -> Self {
        Self { config: Arc::new(config), source_root: source_root.into() }
    }

    /// Check every hyperlink in `hyperlinks`, deduplicated by URI
    /// (callers are expected to have already deduplicated via the map
    /// key, per spec.md invariant 1). Ignored URIs are classified
    /// synchronously, bypassing the worker pool entirely. Blocks until
    /// every non-ignored URI has produced a result, then shuts the
    /// worker pool down before returning.
    pub fn check(&self, hyperlinks: &HashMap<String, Hyperlink>) -> Vec<CheckResult> {
        let rate_limiter = Arc::new(RateLimiter::new(self.config.rate_limit_timeout));
        let wqueue = Arc::new(WorkQueue::new());
        let (rtx, rrx) = mpsc::channel::<CheckResult>();

        let workers = self.spawn_workers(&wqueue, &rate_limiter, &rtx);

        let mut results = Vec::with_capacity(hyperlinks.len());
        let mut total_links = 0usize;

        for hyperlink in hyperlinks.values() {
            if classify::is_ignored(&self.config, &hyperlink.uri) {
                results.push(CheckResult::ignored(&hyperlink.uri, &hyperlink.docname, hyperlink.lineno, String::new()));
            } else {
                wqueue.put(CheckRequest::immediate(hyperlink.clone()));
                total_links += 1;
            }
        }
        drop(rtx);

        let mut done = 0usize;
        while done < total_links {
            match rrx.recv() {
                Ok(result) => {
                    results.push(result);
                    done += 1;
                }
                Err(_) => break, // all workers gone; shouldn't happen before shutdown
            }
        }

        self.shutdown(&wqueue, workers);
        results
    }

    fn spawn_workers(
        &self,
        wqueue: &Arc<WorkQueue>,
        rate_limiter: &Arc<RateLimiter>,
        rtx: &mpsc::Sender<CheckResult>,
    ) -> Vec<thread::JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let wqueue = Arc::clone(wqueue);
            let rate_limiter = Arc::clone(rate_limiter);
            let rtx = rtx.clone();
            let config = Arc::clone(&self.config);
            let source_root = self.source_root.clone();

            handles.push(thread::spawn(move || {
                run_worker(id, &wqueue, &rate_limiter, &config, &source_root, rtx);
            }));
        }
        handles
    }

    /// Wait for the work queue to fully drain, then enqueue one
    /// shutdown sentinel per worker ahead of any lingering high
    /// timestamps and join every thread (spec.md §5 "Shutdown
    /// protocol").
    fn shutdown(&self, wqueue: &Arc<WorkQueue>, workers: Vec<thread::JoinHandle<()>>) {
        wqueue.join();
        for _ in 0..self.config.workers {
            wqueue.put(CheckRequest::shutdown());
        }
        for handle in workers {
            let _ = handle.join();
        }
    }
}

fn run_worker(
    id: usize,
    wqueue: &WorkQueue,
    rate_limiter: &RateLimiter,
    config: &Config,
    source_root: &Path,
    rtx: mpsc::Sender<CheckResult>,
) {
    let agent = worker::build_agent(config.timeout);
    debug!("worker {id} started");

    loop {
        let request = wqueue.get();
        let Some(hyperlink) = request.hyperlink else {
            wqueue.task_done();
            break;
        };

        let origin = worker::origin_of(&hyperlink.uri);
        let mut next_check = request.next_check;
        if let Some(refreshed) = rate_limiter.next_check(&origin) {
            // Links may have been queued before this origin's rate limit
            // was discovered (or a later response may have *lowered* an
            // earlier pessimistic back-off); always defer to the current
            // table, per spec.md §9.
            next_check = refreshed;
        }

        if next_check > now_secs() {
            thread::sleep(QUEUE_POLL);
            wqueue.put(CheckRequest { next_check, hyperlink: Some(hyperlink) });
            wqueue.task_done();
            continue;
        }

        let source_dir = source_root.join(Path::new(&hyperlink.docname).parent().unwrap_or(Path::new("")));
        match worker::check(&agent, config, rate_limiter, &hyperlink, &source_dir) {
            worker::CheckOutcome::Requeue(next_check) => {
                debug!("worker {id}: {} rate limited, retry at {next_check}", hyperlink.uri);
                wqueue.put(CheckRequest { next_check, hyperlink: Some(hyperlink) });
            }
            worker::CheckOutcome::Done(result) => {
                info!("worker {id}: {} -> {}", result.uri, result.status);
                let _ = rtx.send(result);
            }
        }
        wqueue.task_done();
    }
}
