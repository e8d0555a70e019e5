// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The host scheduler adapter.
//!
//! Completion engines hand finished (or synthetic) operations to the
//! scheduler via [`Scheduler::post`]; the context later dequeues them and
//! invokes their completion callbacks. The scheduler also carries the
//! outstanding-work count and the platform wait object that
//! `process_completions` blocks on: an epoll set on Linux (which the
//! io_uring file service registers its ring descriptor with), an I/O
//! completion port on Windows, and a condition variable on macOS (where
//! dispatch queues deliver completions from their own threads).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{Level, event};

use crate::op::Direction;
use crate::platform::FileState;
use crate::status::Result;
#[cfg(target_os = "linux")]
use crate::status::Status;
use crate::ERR_POISONED_LOCK;

/// A completed operation waiting for its completion callback to run.
#[derive(Debug)]
pub(crate) struct ReadyOp {
    pub state: std::sync::Arc<FileState>,
    pub dir: Direction,
}

#[derive(Debug)]
pub(crate) struct Scheduler {
    ready: Mutex<VecDeque<ReadyOp>>,
    outstanding: AtomicUsize,
    wake: WakeObject,
}

impl Scheduler {
    pub(crate) fn new() -> Result<Self> {
        Ok(Self {
            ready: Mutex::new(VecDeque::new()),
            outstanding: AtomicUsize::new(0),
            wake: WakeObject::new()?,
        })
    }

    /// Defers a completed operation for invocation on the context thread.
    pub(crate) fn post(&self, op: ReadyOp) {
        {
            let mut ready = self.ready.lock().expect(ERR_POISONED_LOCK);
            ready.push_back(op);
        }
        self.wake.notify();
    }

    /// Wakes a thread blocked in the platform wait call.
    pub(crate) fn notify(&self) {
        self.wake.notify();
    }

    pub(crate) fn take_ready(&self) -> VecDeque<ReadyOp> {
        let mut ready = self.ready.lock().expect(ERR_POISONED_LOCK);
        std::mem::take(&mut *ready)
    }

    pub(crate) fn ready_is_empty(&self) -> bool {
        self.ready.lock().expect(ERR_POISONED_LOCK).is_empty()
    }

    /// Records the start of an outstanding operation.
    pub(crate) fn work_started(&self) {
        let previous = self.outstanding.fetch_add(1, Ordering::AcqRel);
        event!(Level::TRACE, message = "work started", outstanding = previous + 1);
    }

    /// Records the completion of an outstanding operation.
    pub(crate) fn work_finished(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "work count underflow");
        event!(Level::TRACE, message = "work finished", outstanding = previous - 1);
    }

    /// Number of operations currently outstanding.
    pub(crate) fn outstanding_work(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) const fn wake_object(&self) -> &WakeObject {
        &self.wake
    }
}

// ---------------------------------------------------------------------------
// Linux: epoll set containing a wake eventfd plus any completion sources
// the file service registers (the io_uring ring descriptor).
// ---------------------------------------------------------------------------

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub(crate) struct WakeObject {
    epoll_fd: i32,
    event_fd: i32,
}

#[cfg(target_os = "linux")]
const WAKE_TOKEN: u64 = 0;
#[cfg(target_os = "linux")]
const COMPLETION_SOURCE_TOKEN: u64 = 1;

#[cfg(target_os = "linux")]
impl WakeObject {
    fn new() -> Result<Self> {
        // SAFETY: Plain resource-creating syscalls with no pointer arguments.
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(Status::last_os_error());
        }

        // SAFETY: As above.
        let event_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if event_fd < 0 {
            let status = Status::last_os_error();
            // SAFETY: epoll_fd was just created and is owned by us.
            unsafe { libc::close(epoll_fd) };
            return Err(status);
        }

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        // SAFETY: Both descriptors are valid and `ev` outlives the call.
        if unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, event_fd, &mut ev) } < 0 {
            let status = Status::last_os_error();
            // SAFETY: Both descriptors were just created and are owned by us.
            unsafe {
                libc::close(event_fd);
                libc::close(epoll_fd);
            }
            return Err(status);
        }

        event!(Level::TRACE, message = "new scheduler wait set", epoll_fd, event_fd);

        Ok(Self { epoll_fd, event_fd })
    }

    /// Adds a completion source (the io_uring ring fd) to the wait set,
    /// edge-triggered: the ring is drained fully on every wake-up.
    pub(crate) fn add_completion_source(&self, fd: i32) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLET) as u32,
            u64: COMPLETION_SOURCE_TOKEN,
        };
        // SAFETY: Descriptors are valid and `ev` outlives the call.
        if unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut ev) } < 0 {
            return Err(Status::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn remove_completion_source(&self, fd: i32) {
        // SAFETY: Removing a registration takes no event argument.
        unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    fn notify(&self) {
        let value: u64 = 1;
        // SAFETY: Writing 8 bytes from a stack value to an owned eventfd.
        unsafe {
            libc::write(self.event_fd, std::ptr::from_ref(&value).cast(), 8);
        }
    }

    /// Waits up to `max_wait_time_millis` for activity. Returns whether a
    /// completion source became readable.
    pub(crate) fn wait(&self, max_wait_time_millis: u32) -> bool {
        let mut events: [libc::epoll_event; 8] = [libc::epoll_event { events: 0, u64: 0 }; 8];

        // SAFETY: The events array outlives the call and its length is passed.
        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.as_mut_ptr(),
                events.len() as i32,
                max_wait_time_millis.min(i32::MAX as u32) as i32,
            )
        };

        let mut source_ready = false;
        for ev in events.iter().take(n.max(0) as usize) {
            match ev.u64 {
                WAKE_TOKEN => self.drain_wake_signal(),
                COMPLETION_SOURCE_TOKEN => source_ready = true,
                _ => {}
            }
        }
        source_ready
    }

    fn drain_wake_signal(&self) {
        let mut value: u64 = 0;
        // SAFETY: Reading 8 bytes into a stack value from an owned eventfd.
        unsafe {
            libc::read(self.event_fd, std::ptr::from_mut(&mut value).cast(), 8);
        }
    }
}

#[cfg(target_os = "linux")]
impl Drop for WakeObject {
    fn drop(&mut self) {
        // SAFETY: Both descriptors are owned by this object.
        unsafe {
            libc::close(self.event_fd);
            libc::close(self.epoll_fd);
        }
    }
}

// ---------------------------------------------------------------------------
// macOS: completions arrive from dispatch queue threads through `post`;
// a condition variable is all the waiting we need.
// ---------------------------------------------------------------------------

#[cfg(target_os = "macos")]
#[derive(Debug)]
pub(crate) struct WakeObject {
    signaled: Mutex<bool>,
    cond: std::sync::Condvar,
}

#[cfg(target_os = "macos")]
impl WakeObject {
    fn new() -> Result<Self> {
        Ok(Self {
            signaled: Mutex::new(false),
            cond: std::sync::Condvar::new(),
        })
    }

    fn notify(&self) {
        let mut signaled = self.signaled.lock().expect(ERR_POISONED_LOCK);
        *signaled = true;
        self.cond.notify_all();
    }

    pub(crate) fn wait(&self, max_wait_time_millis: u32) -> bool {
        let timeout = std::time::Duration::from_millis(u64::from(max_wait_time_millis));
        let mut signaled = self.signaled.lock().expect(ERR_POISONED_LOCK);
        if !*signaled {
            let (guard, _timed_out) = self
                .cond
                .wait_timeout(signaled, timeout)
                .expect(ERR_POISONED_LOCK);
            signaled = guard;
        }
        *signaled = false;
        false
    }
}

// ---------------------------------------------------------------------------
// Windows: the wake object owns the I/O completion port itself. File
// handles are associated with the port at open time; wake-ups are posted
// as packets carrying a reserved completion key.
// ---------------------------------------------------------------------------

#[cfg(windows)]
pub(crate) use windows_wake::{CompletionEntry, IO_KEY, WakeObject};

#[cfg(windows)]
mod windows_wake {
    use windows_sys::Win32::Foundation::{
        CloseHandle, GetLastError, HANDLE, INVALID_HANDLE_VALUE, WAIT_TIMEOUT,
    };
    use windows_sys::Win32::System::IO::{
        CreateIoCompletionPort, GetQueuedCompletionStatusEx, OVERLAPPED, OVERLAPPED_ENTRY,
        PostQueuedCompletionStatus,
    };

    use crate::status::{Result, Status};

    /// Completion key used for wake-up packets. Real completions carry the
    /// reserved I/O key instead; the overlapped pointer identifies the
    /// operation record.
    const WAKE_KEY: usize = usize::MAX;

    /// Completion key carried by every file handle bound to the port.
    pub(crate) const IO_KEY: usize = 1;

    /// Max number of I/O operations to dequeue in one go.
    const POLL_SIZE_ENTRIES: usize = 64;

    /// A dequeued completion packet, decoded enough for the file service
    /// to route it to its operation record.
    #[derive(Debug, Clone, Copy)]
    pub(crate) struct CompletionEntry {
        pub overlapped: *mut OVERLAPPED,
        pub bytes: u32,
        /// NTSTATUS from the overlapped block; zero on success.
        pub status: usize,
    }

    #[derive(Debug)]
    pub(crate) struct WakeObject {
        port: HANDLE,
    }

    // SAFETY: The port handle is a kernel object designed for cross-thread
    // use; all operations on it are thread-safe by API contract.
    unsafe impl Send for WakeObject {}
    // SAFETY: As above.
    unsafe impl Sync for WakeObject {}

    impl WakeObject {
        pub(super) fn new() -> Result<Self> {
            // SAFETY: Creating a fresh port; no handle is being bound yet.
            let port = unsafe {
                CreateIoCompletionPort(
                    INVALID_HANDLE_VALUE,
                    std::ptr::null_mut(),
                    0,
                    1, // The port is only read from by one thread at a time.
                )
            };
            if port.is_null() {
                // SAFETY: Plain error query.
                return Err(Status::from_os_error(unsafe { GetLastError() } as i32));
            }
            Ok(Self { port })
        }

        pub(crate) const fn port(&self) -> HANDLE {
            self.port
        }

        pub(super) fn notify(&self) {
            // SAFETY: Posting a packet with a null overlapped pointer and
            // the reserved wake key; the dequeue loop filters it out.
            unsafe {
                PostQueuedCompletionStatus(self.port, 0, WAKE_KEY, std::ptr::null_mut());
            }
        }

        /// Dequeues pending completion packets, waiting up to the given
        /// timeout if none are immediately available.
        pub(crate) fn wait_entries(&self, max_wait_time_millis: u32) -> Vec<CompletionEntry> {
            let mut entries: [OVERLAPPED_ENTRY; POLL_SIZE_ENTRIES] =
                // SAFETY: OVERLAPPED_ENTRY is plain data; the kernel fills it.
                unsafe { std::mem::zeroed() };
            let mut removed: u32 = 0;

            // SAFETY: The entries array outlives the call and its length is
            // passed alongside it.
            let ok = unsafe {
                GetQueuedCompletionStatusEx(
                    self.port,
                    entries.as_mut_ptr(),
                    POLL_SIZE_ENTRIES as u32,
                    &mut removed,
                    max_wait_time_millis,
                    0,
                )
            };

            if ok == 0 {
                // SAFETY: Plain error query.
                let error = unsafe { GetLastError() };
                debug_assert!(
                    error == WAIT_TIMEOUT,
                    "unexpected error from GetQueuedCompletionStatusEx: {error}"
                );
                return Vec::new();
            }

            entries
                .iter()
                .take(removed as usize)
                .filter(|entry| entry.lpCompletionKey != WAKE_KEY)
                .map(|entry| {
                    // SAFETY: For I/O-key packets the overlapped pointer is
                    // non-null and points at a live operation record whose
                    // keepalive reference has not yet been released.
                    let status = unsafe { (*entry.lpOverlapped).Internal };
                    CompletionEntry {
                        overlapped: entry.lpOverlapped,
                        bytes: entry.dwNumberOfBytesTransferred,
                        status,
                    }
                })
                .collect()
        }
    }

    impl Drop for WakeObject {
        fn drop(&mut self) {
            // SAFETY: The port handle is owned by this object.
            unsafe {
                CloseHandle(self.port);
            }
        }
    }
}
