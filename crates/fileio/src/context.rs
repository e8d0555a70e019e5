// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use tracing::{Level, event};

use crate::op::{self, CompleteCause};
use crate::platform::FileService;
use crate::scheduler::Scheduler;
use crate::status::Result;

/// How long one `process_completions` call inside [`IoContext::block_on`]
/// waits before re-checking for external wake-ups.
const POLL_WAIT_MILLIS: u32 = 100;

/// The execution context that file streams bind to.
///
/// Owns the scheduler (ready-operation queue, outstanding-work accounting
/// and the platform wait object) and the per-context file service with its
/// completion engine. The context is the single place where completed
/// operations are dispatched: completion callbacks only ever run inside
/// [`process_completions`][Self::process_completions], which the built-in
/// [`block_on`][Self::block_on] executor calls whenever the driven future
/// is not ready.
///
/// Dropping the context shuts the file service down: every tracked file is
/// closed and records still in flight run their cleanup path.
///
/// # Thread safety
///
/// The context may be shared across threads, but completions are processed
/// by whichever single thread is inside `process_completions` at a time.
#[derive(Debug, Clone)]
pub struct IoContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
pub(crate) struct ContextInner {
    scheduler: Arc<Scheduler>,
    service: FileService,
}

impl IoContext {
    /// Creates a context, initializing the platform completion engine
    /// (the io_uring ring, the I/O completion port, or the dispatch
    /// queue).
    pub fn new() -> Result<Self> {
        let scheduler = Arc::new(Scheduler::new()?);
        let service = FileService::new(&scheduler)?;

        event!(Level::TRACE, message = "new I/O context");

        Ok(Self {
            inner: Arc::new(ContextInner { scheduler, service }),
        })
    }

    /// Drives a future to completion on the current thread, processing
    /// file completions whenever the future is pending.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        let mut future = std::pin::pin!(future);

        let signal = Arc::new(BlockOnSignal {
            notified: AtomicBool::new(true),
            scheduler: Arc::clone(&self.inner.scheduler),
        });
        let waker = Waker::from(Arc::clone(&signal));
        let mut cx = Context::from_waker(&waker);

        loop {
            if signal.notified.swap(false, Ordering::AcqRel) {
                if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                    return output;
                }
            }

            self.process_completions(POLL_WAIT_MILLIS);
        }
    }

    /// Processes completed I/O operations, waiting up to
    /// `max_wait_time_millis` for at least one completion, a posted
    /// synthetic completion, or an external wake-up.
    ///
    /// Each completed record's callback updates the stream position,
    /// publishes the `(Status, bytes)` outcome and resumes the suspended
    /// caller through its waker.
    pub fn process_completions(&self, max_wait_time_millis: u32) {
        self.inner.process_completions(max_wait_time_millis);
    }

    /// Number of file operations currently outstanding on this context.
    #[must_use]
    pub fn outstanding_work(&self) -> usize {
        self.inner.scheduler.outstanding_work()
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }
}

impl ContextInner {
    pub(crate) const fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub(crate) const fn service(&self) -> &FileService {
        &self.service
    }

    #[cfg(target_os = "linux")]
    pub(crate) fn process_completions(&self, max_wait_time_millis: u32) {
        // Drain opportunistically first: the ring is registered
        // edge-triggered, so completions that arrived since the last drain
        // must not be left waiting for another edge.
        self.service.drain_completions();

        if self.scheduler.ready_is_empty() {
            let source_ready = self.scheduler.wake_object().wait(max_wait_time_millis);
            if source_ready {
                self.service.drain_completions();
            }
        }

        self.run_ready();
    }

    #[cfg(target_os = "macos")]
    pub(crate) fn process_completions(&self, max_wait_time_millis: u32) {
        if self.scheduler.ready_is_empty() {
            self.scheduler.wake_object().wait(max_wait_time_millis);
        }

        self.run_ready();
    }

    #[cfg(windows)]
    pub(crate) fn process_completions(&self, max_wait_time_millis: u32) {
        let timeout = if self.scheduler.ready_is_empty() {
            max_wait_time_millis
        } else {
            0
        };

        let entries = self.scheduler.wake_object().wait_entries(timeout);
        for entry in entries {
            self.service.route_completion(&entry);
        }

        self.run_ready();
    }

    fn run_ready(&self) {
        let batch = self.scheduler.take_ready();
        for ready in batch {
            op::complete(&self.scheduler, &ready.state, ready.dir, CompleteCause::Normal);
        }
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.service.shutdown();
    }
}

/// Waker state for [`IoContext::block_on`]: marks the future runnable and
/// interrupts a wait in progress.
#[derive(Debug)]
struct BlockOnSignal {
    notified: AtomicBool,
    scheduler: Arc<Scheduler>,
}

impl std::task::Wake for BlockOnSignal {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if !self.notified.swap(true, Ordering::AcqRel) {
            self.scheduler.notify();
        }
    }
}
