use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::context::DeviceId;

/// Scheduling hint for a command stream.
///
/// Upload copies run at the lowest priority, kernels in the middle and
/// download copies highest, to bias the device toward completing in-flight
/// work instead of head-of-line blocking on copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPriority {
    Low,
    Normal,
    High,
}

impl StreamPriority {
    fn label(self) -> &'static str {
        match self {
            StreamPriority::Low => "low",
            StreamPriority::Normal => "normal",
            StreamPriority::High => "high",
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct StreamState {
    queue: VecDeque<Job>,
    in_flight: bool,
    shutdown: bool,
}

struct StreamInner {
    state: Mutex<StreamState>,
    job_cv: Condvar,
    idle_cv: Condvar,
}

/// An ordered asynchronous command queue owned by one worker thread.
///
/// Commands execute strictly in submission order on a dedicated executor
/// thread; `synchronize` blocks the caller until every queued command has
/// completed. A command that panics is a fatal kernel failure: it is logged
/// and the process aborts. There is no retry policy.
pub struct Stream {
    device: DeviceId,
    priority: StreamPriority,
    inner: Arc<StreamInner>,
    executor: Option<JoinHandle<()>>,
}

impl Stream {
    pub fn new(device: DeviceId, priority: StreamPriority) -> Self {
        let inner = Arc::new(StreamInner {
            state: Mutex::new(StreamState {
                queue: VecDeque::new(),
                in_flight: false,
                shutdown: false,
            }),
            job_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });

        let executor_inner = Arc::clone(&inner);
        let name = format!("risa-stream-d{device}-{}", priority.label());
        let executor = std::thread::Builder::new()
            .name(name)
            .spawn(move || Self::executor_loop(device, executor_inner))
            .expect("failed to spawn stream executor");

        Self {
            device,
            priority,
            inner,
            executor: Some(executor),
        }
    }

    fn executor_loop(device: DeviceId, inner: Arc<StreamInner>) {
        loop {
            let job = {
                let mut state = inner.state.lock();
                loop {
                    if let Some(job) = state.queue.pop_front() {
                        state.in_flight = true;
                        break job;
                    }
                    if state.shutdown {
                        return;
                    }
                    inner.job_cv.wait(&mut state);
                }
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(job));
            if outcome.is_err() {
                tracing::error!(device, "fatal error in device stream command, terminating");
                std::process::abort();
            }

            let mut state = inner.state.lock();
            state.in_flight = false;
            if state.queue.is_empty() {
                inner.idle_cv.notify_all();
            }
        }
    }

    /// Enqueue a command without waiting for its completion.
    pub fn enqueue(&self, job: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        state.queue.push_back(Box::new(job));
        self.inner.job_cv.notify_one();
    }

    /// Enqueue a command and obtain a handle for its result.
    pub fn submit<R, F>(&self, job: F) -> JobHandle<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let slot = Arc::new(JobSlot {
            result: Mutex::new(None),
            done: Condvar::new(),
        });
        let executor_slot = Arc::clone(&slot);
        self.enqueue(move || {
            let value = job();
            *executor_slot.result.lock() = Some(value);
            executor_slot.done.notify_all();
        });
        JobHandle { slot }
    }

    /// Block until every command submitted so far has completed.
    pub fn synchronize(&self) {
        let mut state = self.inner.state.lock();
        while !state.queue.is_empty() || state.in_flight {
            self.inner.idle_cv.wait(&mut state);
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn priority(&self) -> StreamPriority {
        self.priority
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            self.inner.job_cv.notify_all();
        }
        if let Some(executor) = self.executor.take() {
            let _ = executor.join();
        }
    }
}

struct JobSlot<R> {
    result: Mutex<Option<R>>,
    done: Condvar,
}

/// Completion handle for a command submitted to a [`Stream`].
pub struct JobHandle<R> {
    slot: Arc<JobSlot<R>>,
}

impl<R> JobHandle<R> {
    /// Block until the command has run and take its result.
    pub fn wait(self) -> R {
        let mut result = self.slot.result.lock();
        loop {
            if let Some(value) = result.take() {
                return value;
            }
            self.slot.done.wait(&mut result);
        }
    }
}
