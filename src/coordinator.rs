use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{KeyLock, ResolutionCache};
use crate::error::UsiError;

pub const DEFAULT_TASK_TIME_LIMIT: Duration = Duration::from_secs(60);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type Job = Box<dyn FnOnce() -> Result<Value, UsiError> + Send + 'static>;

pub enum Dispatched {
    Completed(Result<Value, UsiError>),
    TimedOut,
    /// The job never started; it is handed back for local execution.
    Unavailable(Job),
}

/// Somewhere other than the calling thread that can run a job.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job, budget: Duration) -> Dispatched;
}

struct Envelope {
    job: Job,
    reply: Sender<Result<Value, UsiError>>,
}

/// Fixed set of worker threads fed from one queue.
pub struct WorkerPool {
    queue: Mutex<Option<Sender<Envelope>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, UsiError> {
        let (sender, receiver) = mpsc::channel::<Envelope>();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size.max(1))
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("usi-worker-{id}"))
                    .spawn(move || worker_loop(id, receiver))
                    .map_err(|err| UsiError::WorkerFailed(err.to_string()))
            })
            .collect::<Result<Vec<_>, UsiError>>()?;
        Ok(Self {
            queue: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Closes the queue and waits for in-progress jobs to finish.
    pub fn shutdown(&self) {
        lock(&self.queue).take();
        let workers: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, receiver: Arc<Mutex<Receiver<Envelope>>>) {
    loop {
        let next = lock(&receiver).recv();
        let Ok(Envelope { job, reply }) = next else {
            debug!(worker = id, "queue closed");
            return;
        };
        let result = catch_unwind(AssertUnwindSafe(job))
            .unwrap_or_else(|_| Err(UsiError::WorkerFailed("task panicked".to_string())));
        // The caller may have given up already.
        let _ = reply.send(result);
    }
}

impl Dispatcher for WorkerPool {
    fn dispatch(&self, job: Job, budget: Duration) -> Dispatched {
        let (reply, response) = mpsc::channel();
        let sent = match lock(&self.queue).as_ref() {
            Some(queue) => queue.send(Envelope { job, reply }),
            None => return Dispatched::Unavailable(job),
        };
        if let Err(mpsc::SendError(envelope)) = sent {
            return Dispatched::Unavailable(envelope.job);
        }
        match response.recv_timeout(budget) {
            Ok(result) => Dispatched::Completed(result),
            Err(RecvTimeoutError::Timeout) => Dispatched::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Dispatched::Completed(Err(
                UsiError::WorkerFailed("worker exited before replying".to_string()),
            )),
        }
    }
}

enum SlotState {
    Pending,
    Done(Result<Value, UsiError>),
}

struct Slot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
            ready: Condvar::new(),
        }
    }

    fn finish(&self, result: Result<Value, UsiError>) {
        *lock(&self.state) = SlotState::Done(result);
        self.ready.notify_all();
    }

    fn wait(&self, budget: Duration) -> Option<Result<Value, UsiError>> {
        let guard = lock(&self.state);
        let (guard, _) = self
            .ready
            .wait_timeout_while(guard, budget, |state| matches!(state, SlotState::Pending))
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match &*guard {
            SlotState::Done(result) => Some(result.clone()),
            SlotState::Pending => None,
        }
    }
}

type Inflight = Arc<Mutex<HashMap<String, Arc<Slot>>>>;

/// Settles one computation for every caller of its key.
///
/// It travels with the job, so the cross-process lock and the in-flight entry
/// are held until the computation really ends, even after the leader stopped
/// waiting for it.
struct Completion {
    key: String,
    slot: Arc<Slot>,
    inflight: Inflight,
    cache: Arc<ResolutionCache>,
    lock: Option<KeyLock>,
    finished: bool,
}

impl Completion {
    fn finish(mut self, result: &Result<Value, UsiError>) {
        if let (Ok(value), Some(_)) = (result, &self.lock) {
            if let Err(err) = self.cache.put(&self.key, value) {
                warn!(key = %self.key, error = %err, "failed to persist result");
            }
        }
        self.slot.finish(result.clone());
        self.finished = true;
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.finished {
            self.slot.finish(Err(UsiError::WorkerFailed(
                "computation aborted".to_string(),
            )));
        }
        let mut inflight = lock(&self.inflight);
        if inflight
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.slot))
        {
            inflight.remove(&self.key);
        }
        drop(inflight);
        // Released only after the entry is visible to the next caller.
        self.lock.take();
    }
}

/// At most one computation per key, shared by every caller asking for it.
///
/// Successful results are memoised in the [`ResolutionCache`]; failures are
/// handed to the callers waiting at that moment and then forgotten. A caller
/// that runs out of time gets [`UsiError::TaskTimeout`] while the computation
/// carries on; nobody starts another one for that key until it ends.
pub struct TaskCoordinator {
    cache: Arc<ResolutionCache>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    budget: Duration,
    inflight: Inflight,
}

impl TaskCoordinator {
    pub fn new(
        cache: Arc<ResolutionCache>,
        dispatcher: Option<Arc<dyn Dispatcher>>,
        budget: Duration,
    ) -> Self {
        Self {
            cache,
            dispatcher,
            budget,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn get_or_compute<T, F>(&self, key: &str, compute: F) -> Result<T, UsiError>
    where
        T: Serialize + DeserializeOwned + 'static,
        F: FnOnce() -> Result<T, UsiError> + Send + 'static,
    {
        if let Some(value) = self.cache.get(key)? {
            debug!(key, "cache hit");
            return decode(value);
        }

        let (slot, leader) = {
            let mut inflight = lock(&self.inflight);
            match inflight.get(key) {
                Some(slot) => (Arc::clone(slot), false),
                None => {
                    let slot = Arc::new(Slot::new());
                    inflight.insert(key.to_string(), Arc::clone(&slot));
                    (slot, true)
                }
            }
        };

        if !leader {
            debug!(key, "waiting for in-flight computation");
            return match slot.wait(self.budget) {
                Some(result) => decode(result?),
                None => Err(self.timeout(key)),
            };
        }

        let completion = Completion {
            key: key.to_string(),
            slot,
            inflight: Arc::clone(&self.inflight),
            cache: Arc::clone(&self.cache),
            lock: None,
            finished: false,
        };
        decode(self.lead(completion, compute)?)
    }

    fn lead<T, F>(&self, mut completion: Completion, compute: F) -> Result<Value, UsiError>
    where
        T: Serialize + 'static,
        F: FnOnce() -> Result<T, UsiError> + Send + 'static,
    {
        let key = completion.key.clone();
        let started = Instant::now();
        let settled = loop {
            match self.cache.try_lock(&key, self.budget) {
                Ok(Some(lock)) => {
                    completion.lock = Some(lock);
                    break None;
                }
                Ok(None) => {}
                Err(err) => break Some(Err(err)),
            }
            match self.cache.get(&key) {
                Ok(Some(value)) => break Some(Ok(value)),
                Ok(None) => {}
                Err(err) => break Some(Err(err)),
            }
            if started.elapsed() >= self.budget {
                break Some(Err(self.timeout(&key)));
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        };
        // Another process may have finished between our miss and the lock.
        let settled = match settled {
            None => self.cache.get(&key).transpose(),
            settled => settled,
        };
        if let Some(result) = settled {
            completion.lock.take();
            completion.finish(&result);
            return result;
        }

        let job: Job = Box::new(move || {
            let result = compute().and_then(|value| {
                serde_json::to_value(value).map_err(|err| UsiError::Cache(err.to_string()))
            });
            completion.finish(&result);
            result
        });
        let result = self.execute(&key, job);
        if result.is_ok() {
            info!(key, elapsed_ms = started.elapsed().as_millis() as u64, "computed");
        }
        result
    }

    fn execute(&self, key: &str, job: Job) -> Result<Value, UsiError> {
        let Some(dispatcher) = &self.dispatcher else {
            return job();
        };
        match dispatcher.dispatch(job, self.budget) {
            Dispatched::Completed(result) => result,
            Dispatched::TimedOut => {
                warn!(key, "task exceeded its time limit, leaving it to finish in the background");
                Err(self.timeout(key))
            }
            Dispatched::Unavailable(job) => {
                warn!(key, "worker pool unavailable, running in the calling thread");
                job()
            }
        }
    }

    fn timeout(&self, key: &str) -> UsiError {
        UsiError::TaskTimeout {
            key: key.to_string(),
            millis: u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, UsiError> {
    serde_json::from_value(value).map_err(|err| UsiError::Cache(err.to_string()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
