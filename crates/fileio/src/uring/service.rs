// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::CString;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use io_uring::IoUring;
use tracing::{Level, event};

use crate::access::{AccessMode, CreationMode};
use crate::op::{self, CompleteCause, Direction, OpSlot};
use crate::scheduler::{ReadyOp, Scheduler};
use crate::status::{Result, Status};
use crate::uring::FileState;
use crate::ERR_POISONED_LOCK;

/// Submission/completion queue depth of the per-context ring.
const RING_ENTRIES: u32 = 64;

/// State shared between the service, its file states and the cancellation
/// paths that may fire from arbitrary threads.
pub(crate) struct ServiceShared {
    /// The ring is not shared with the kernel across threads without
    /// serialization; every SQE acquisition and submit goes through this
    /// mutex.
    pub(crate) ring: Mutex<IoUring>,

    pub(crate) scheduler: Arc<Scheduler>,

    /// Every live file state, tracked for shutdown. Mutated only under
    /// the mutex; I/O submission and completion take no part in it.
    files: Mutex<Vec<Weak<FileState>>>,
}

impl ServiceShared {
    pub(crate) fn forget_state(&self, state: &FileState) {
        let mut files = self.files.lock().expect(ERR_POISONED_LOCK);
        files.retain(|w| !std::ptr::addr_eq(w.as_ptr(), std::ptr::from_ref(state)));
    }
}

impl std::fmt::Debug for ServiceShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceShared").finish_non_exhaustive()
    }
}

/// The per-context file service for the io_uring engine.
///
/// Creates the ring at construction and registers its descriptor with the
/// scheduler's epoll set; tears down every tracked file on shutdown.
#[derive(Debug)]
pub(crate) struct FileService {
    shared: Arc<ServiceShared>,
    ring_fd: i32,
}

impl FileService {
    pub(crate) fn new(scheduler: &Arc<Scheduler>) -> Result<Self> {
        let ring = IoUring::new(RING_ENTRIES).map_err(Status::from)?;
        let ring_fd = ring.as_raw_fd();

        scheduler.wake_object().add_completion_source(ring_fd)?;

        event!(Level::TRACE, message = "io_uring service ready", ring_fd, entries = RING_ENTRIES);

        Ok(Self {
            shared: Arc::new(ServiceShared {
                ring: Mutex::new(ring),
                scheduler: Arc::clone(scheduler),
                files: Mutex::new(Vec::new()),
            }),
            ring_fd,
        })
    }

    /// Allocates and tracks a fresh file state; the file is not yet open.
    pub(crate) fn create_state(&self) -> Arc<FileState> {
        let state = FileState::new(Arc::downgrade(&self.shared));
        {
            let mut files = self.shared.files.lock().expect(ERR_POISONED_LOCK);
            files.push(Arc::downgrade(&state));
        }
        state
    }

    /// Closes any previous handle on the state and performs the native
    /// open. No per-file registration is needed on this engine.
    pub(crate) fn open_file(
        &self,
        state: &FileState,
        path: &Path,
        access: AccessMode,
        creation: CreationMode,
    ) -> Status {
        state.close_file();

        let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
            return Status::Os(libc::EINVAL);
        };

        let flags = access.to_posix_flags() | creation.to_posix_flags() | libc::O_CLOEXEC;

        // SAFETY: The path buffer is NUL-terminated and outlives the call.
        let fd = unsafe { libc::open(c_path.as_ptr(), flags, CreationMode::DEFAULT_CREATE_MODE) };
        if fd == -1 {
            return Status::last_os_error();
        }

        state.set_fd(fd);
        state.pos.store(0, std::sync::atomic::Ordering::Release);

        event!(Level::TRACE, message = "file opened", fd, path = %path.display());
        Status::Success
    }

    /// Drains the completion queue, storing each CQE's `res` on its record
    /// before posting the record to the scheduler.
    pub(crate) fn drain_completions(&self) {
        let mut posted = 0_usize;
        {
            let mut ring = self.shared.ring.lock().expect(ERR_POISONED_LOCK);
            for cqe in ring.completion() {
                let user_data = cqe.user_data();
                if user_data == 0 {
                    // Completion of a cancel request; the canceled
                    // operation reports through its own CQE.
                    continue;
                }

                // SAFETY: `user_data` was set at submission to the address
                // of an operation slot inside an `Arc<FileState>` whose
                // keepalive reference is still held by the record.
                let slot = unsafe { &*(user_data as *const OpSlot) };

                let state = {
                    let mut record = slot.lock();
                    record.res = i64::from(cqe.result());
                    record.keepalive.clone()
                };

                if let Some(state) = state {
                    self.shared.scheduler.post(ReadyOp { state, dir: slot.dir });
                    posted += 1;
                }
            }
        }

        if posted > 0 {
            event!(Level::TRACE, message = "drained completions", count = posted);
        }
    }

    /// Closes all tracked files. Records still in flight run their
    /// cleanup-only completion path, dropping their keepalive references.
    pub(crate) fn shutdown(&self) {
        let states: Vec<Arc<FileState>> = {
            let mut files = self.shared.files.lock().expect(ERR_POISONED_LOCK);
            files.drain(..).filter_map(|w| w.upgrade()).collect()
        };

        for state in &states {
            state.close_file();
            for dir in [Direction::Read, Direction::Write] {
                if state.slot(dir).is_in_flight() {
                    op::complete(
                        &self.shared.scheduler,
                        state,
                        dir,
                        CompleteCause::ShutdownCleanup,
                    );
                }
            }
        }

        self.shared
            .scheduler
            .wake_object()
            .remove_completion_source(self.ring_fd);

        event!(Level::TRACE, message = "file service shut down", files = states.len());
    }
}
