// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use dispatch2::ffi::{
    dispatch_queue_create, dispatch_queue_t, dispatch_release, DISPATCH_QUEUE_CONCURRENT,
};
use tracing::{Level, event};

use crate::access::{AccessMode, CreationMode};
use crate::gcd::FileState;
use crate::op::{self, CompleteCause, Direction};
use crate::scheduler::Scheduler;
use crate::status::{Result, Status};
use crate::ERR_POISONED_LOCK;

/// State shared between the service, its file states and the completion
/// blocks running on the dispatch queue.
pub(crate) struct ServiceShared {
    /// The concurrent queue all channel I/O and completion blocks run on.
    queue: dispatch_queue_t,

    pub(crate) scheduler: Arc<Scheduler>,

    /// Every live file state, tracked for shutdown. Mutated only under
    /// the mutex; I/O submission and completion take no part in it.
    files: Mutex<Vec<Weak<FileState>>>,
}

// SAFETY: The queue handle is a reference-counted dispatch object made
// for cross-thread use.
unsafe impl Send for ServiceShared {}
// SAFETY: As above.
unsafe impl Sync for ServiceShared {}

impl ServiceShared {
    pub(crate) fn queue(&self) -> dispatch_queue_t {
        self.queue
    }

    pub(crate) fn forget_state(&self, state: &FileState) {
        let mut files = self.files.lock().expect(ERR_POISONED_LOCK);
        files.retain(|w| !std::ptr::addr_eq(w.as_ptr(), std::ptr::from_ref(state)));
    }
}

impl Drop for ServiceShared {
    fn drop(&mut self) {
        // SAFETY: The queue was created by this service; dispatch keeps it
        // alive while blocks still reference it.
        unsafe {
            dispatch_release(self.queue.cast());
        }
    }
}

impl std::fmt::Debug for ServiceShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceShared").finish_non_exhaustive()
    }
}

/// The per-context file service for the GCD engine.
///
/// Creates the concurrent "file i/o" queue at construction; per-file
/// channels are created at open time (and re-created after cancels).
#[derive(Debug)]
pub(crate) struct FileService {
    shared: Arc<ServiceShared>,
}

impl FileService {
    pub(crate) fn new(scheduler: &Arc<Scheduler>) -> Result<Self> {
        let label = c"fileio.file-io";
        // SAFETY: The label is NUL-terminated and the attribute constant
        // describes a concurrent queue.
        let queue = unsafe { dispatch_queue_create(label.as_ptr(), DISPATCH_QUEUE_CONCURRENT) };
        if queue.is_null() {
            return Err(Status::Os(libc::ENOMEM));
        }

        event!(Level::TRACE, message = "GCD file service ready");

        Ok(Self {
            shared: Arc::new(ServiceShared {
                queue,
                scheduler: Arc::clone(scheduler),
                files: Mutex::new(Vec::new()),
            }),
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
    /// open. The `dispatch_io` channel is created lazily on the first
    /// submission.
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

        event!(Level::TRACE, message = "file service shut down", files = states.len());
    }
}
