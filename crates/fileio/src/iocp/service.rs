// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use tracing::{Level, event};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_HANDLE_EOF, ERROR_OPERATION_ABORTED, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ,
};
use windows_sys::Win32::System::IO::CreateIoCompletionPort;

use crate::access::{AccessMode, CreationMode};
use crate::iocp::FileState;
use crate::op::{self, CompleteCause, Direction, OpSlot};
use crate::scheduler::{CompletionEntry, ReadyOp, Scheduler};
use crate::status::{Result, Status};
use crate::ERR_POISONED_LOCK;

/// NTSTATUS codes surfaced through the overlapped block's `Internal`
/// field, mapped onto their Win32 equivalents for the canonical status
/// space.
const STATUS_END_OF_FILE: usize = 0xC000_0011;
const STATUS_CANCELLED: usize = 0xC000_0120;

pub(crate) struct ServiceShared {
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

/// The per-context file service for the IOCP engine.
///
/// The completion port itself lives on the scheduler; this service binds
/// file handles to it at open time and routes dequeued packets back to
/// their operation records.
#[derive(Debug)]
pub(crate) struct FileService {
    shared: Arc<ServiceShared>,
}

impl FileService {
    pub(crate) fn new(scheduler: &Arc<Scheduler>) -> Result<Self> {
        event!(Level::TRACE, message = "IOCP file service ready");

        Ok(Self {
            shared: Arc::new(ServiceShared {
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

    /// Closes any previous handle on the state, opens the file in
    /// overlapped mode and associates it with the completion port.
    pub(crate) fn open_file(
        &self,
        state: &FileState,
        path: &Path,
        access: AccessMode,
        creation: CreationMode,
    ) -> Status {
        state.close_file();

        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: The path buffer is NUL-terminated and outlives the call.
        let handle = unsafe {
            CreateFileW(
                wide.as_ptr(),
                access.to_desired_access(),
                FILE_SHARE_READ,
                std::ptr::null(),
                creation.to_creation_disposition(),
                FILE_FLAG_OVERLAPPED | FILE_ATTRIBUTE_NORMAL,
                std::ptr::null_mut(),
            )
        };
        if handle == INVALID_HANDLE_VALUE {
            // SAFETY: Plain error query.
            return Status::from_os_error(unsafe { GetLastError() } as i32);
        }

        // Associate with the context's completion port.
        let port = self.shared.scheduler.wake_object().port();
        // SAFETY: Both handles are valid; binding does not transfer
        // ownership of either.
        let bound = unsafe {
            CreateIoCompletionPort(handle, port, crate::scheduler::IO_KEY, 0)
        };
        if bound.is_null() {
            // SAFETY: Plain error query, then releasing the handle we
            // failed to bind.
            let error = unsafe { GetLastError() };
            // SAFETY: As above.
            unsafe {
                CloseHandle(handle);
            }
            return Status::from_os_error(error as i32);
        }

        state.set_handle(handle);
        state.pos.store(0, std::sync::atomic::Ordering::Release);

        event!(Level::TRACE, message = "file opened", path = %path.display());
        Status::Success
    }

    /// Routes one dequeued completion packet to its operation record:
    /// decodes the result into the canonical sign convention, stores it on
    /// the record and posts the record to the scheduler.
    pub(crate) fn route_completion(&self, entry: &CompletionEntry) {
        // SAFETY: The overlapped pointer is the first field of an
        // operation slot inside an `Arc<FileState>` whose keepalive
        // reference is still held by the record.
        let slot = unsafe { &*entry.overlapped.cast::<OpSlot>() };

        let res = if entry.status == 0 {
            i64::from(entry.bytes)
        } else {
            -i64::from(nt_status_to_win32(entry.status))
        };

        let state = {
            let mut record = slot.lock();
            record.res = res;
            record.keepalive.clone()
        };

        if let Some(state) = state {
            self.shared.scheduler.post(ReadyOp { state, dir: slot.dir });
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

        event!(Level::TRACE, message = "file service shut down", files = states.len());
    }
}

/// Maps the NTSTATUS an overlapped completion carries onto the Win32
/// error space the canonical mapper understands. Codes without a direct
/// equivalent are passed through verbatim.
fn nt_status_to_win32(status: usize) -> u32 {
    match status {
        STATUS_END_OF_FILE => ERROR_HANDLE_EOF,
        STATUS_CANCELLED => ERROR_OPERATION_ABORTED,
        #[expect(
            clippy::cast_possible_truncation,
            reason = "NTSTATUS values fit in 32 bits"
        )]
        other => other as u32,
    }
}
