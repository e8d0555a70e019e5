// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tracing::{Level, event};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_INVALID_HANDLE, ERROR_IO_PENDING, HANDLE,
    INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{GetFileSizeEx, ReadFile, WriteFile};
use windows_sys::Win32::System::IO::CancelIoEx;

use crate::iocp::ServiceShared;
use crate::op::{Direction, OpSlot};
use crate::scheduler::ReadyOp;
use crate::status::Status;

/// Per-file state for the IOCP engine.
///
/// Owns the overlapped-opened handle and the logical position cursor, and
/// holds the two reusable operation records with their embedded
/// `OVERLAPPED` blocks. Shared through an `Arc`; each in-flight operation
/// keeps a strong reference until its completion callback runs.
#[derive(Debug)]
pub(crate) struct FileState {
    svc: Weak<ServiceShared>,

    handle: AtomicPtr<c_void>,

    /// Logical position. Updated only by successful completions; the
    /// handle's own file pointer is never used.
    pub(crate) pos: AtomicU64,

    read: OpSlot,
    write: OpSlot,
}

impl FileState {
    /// Synthetic result used when an operation is started on a closed
    /// stream, in the engine's native encoding.
    pub(crate) const BAD_FD_RES: i64 = -(ERROR_INVALID_HANDLE as i64);

    pub(crate) fn new(svc: Weak<ServiceShared>) -> Arc<Self> {
        Arc::new(Self {
            svc,
            handle: AtomicPtr::new(INVALID_HANDLE_VALUE),
            pos: AtomicU64::new(0),
            read: OpSlot::new(Direction::Read),
            write: OpSlot::new(Direction::Write),
        })
    }

    pub(crate) const fn slot(&self, dir: Direction) -> &OpSlot {
        match dir {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.handle.load(Ordering::Acquire) != INVALID_HANDLE_VALUE
    }

    pub(crate) fn raw_handle(&self) -> HANDLE {
        self.handle.load(Ordering::Acquire)
    }

    pub(crate) fn set_handle(&self, handle: HANDLE) {
        self.handle.store(handle, Ordering::Release);
    }

    /// Closes the handle and rewinds the logical position.
    pub(crate) fn close_file(&self) {
        let handle = self.handle.swap(INVALID_HANDLE_VALUE, Ordering::AcqRel);
        if handle != INVALID_HANDLE_VALUE {
            // SAFETY: The handle was owned by this state and has just been
            // detached from it.
            unsafe {
                CloseHandle(handle);
            }
            event!(Level::TRACE, message = "file closed");
        }
        self.pos.store(0, Ordering::Release);
    }

    /// Queries the file size via `GetFileSizeEx`.
    pub(crate) fn size(&self) -> (Status, u64) {
        let handle = self.raw_handle();
        if handle == INVALID_HANDLE_VALUE {
            return (Status::BadFileDescriptor, 0);
        }

        let mut size: i64 = 0;
        // SAFETY: The handle is valid and `size` is a writable out-param.
        if unsafe { GetFileSizeEx(handle, &mut size) } == 0 {
            // SAFETY: Plain error query.
            return (Status::from_os_error(unsafe { GetLastError() } as i32), 0);
        }

        #[expect(clippy::cast_sign_loss, reason = "file sizes are nonnegative")]
        let size = size as u64;
        (Status::Success, size)
    }

    /// Submits the armed record in the given direction.
    ///
    /// Called only after the caller's suspension point is fully
    /// established. A `TRUE` return from `ReadFile`/`WriteFile` is not an
    /// indication to skip anything - the port always delivers the packet
    /// for an associated handle. `ERROR_IO_PENDING` is the normal
    /// asynchronous path; any other error becomes a synthetic posted
    /// completion.
    pub(crate) fn submit(state: &Arc<Self>, dir: Direction) {
        let handle = state.raw_handle();
        let slot = state.slot(dir);

        let (buf, len, offset) = {
            let record = slot.lock();
            (record.buf, record.len, record.offset)
        };

        // SAFETY: The OVERLAPPED block is only touched by this thread
        // before submission; the kernel owns it until the completion
        // packet is dequeued.
        let overlapped = unsafe { &mut *slot.overlapped.get() };
        *overlapped = unsafe { std::mem::zeroed() };
        #[expect(
            clippy::cast_possible_truncation,
            reason = "splitting a 64-bit offset into its two halves"
        )]
        {
            overlapped.Anonymous.Anonymous.Offset = offset as u32;
            overlapped.Anonymous.Anonymous.OffsetHigh = (offset >> 32) as u32;
        }

        #[expect(
            clippy::cast_possible_truncation,
            reason = "single-buffer I/O lengths fit a DWORD"
        )]
        let len = len as u32;

        let mut transferred: u32 = 0;
        // SAFETY: The buffer stays valid until the completion packet is
        // dequeued - the record's future blocks on drop - and the
        // OVERLAPPED block is pinned inside the Arc-allocated state.
        let ok = unsafe {
            match dir {
                Direction::Read => ReadFile(
                    handle,
                    buf,
                    len,
                    &mut transferred,
                    std::ptr::from_mut(overlapped),
                ),
                Direction::Write => WriteFile(
                    handle,
                    buf.cast_const(),
                    len,
                    &mut transferred,
                    std::ptr::from_mut(overlapped),
                ),
            }
        };

        if ok != 0 {
            // Synchronous completion; the completion packet still arrives
            // through the port, which is where the record resolves.
            event!(Level::TRACE, message = "submitted (completed inline)", ?dir, offset);
            return;
        }

        // SAFETY: Plain error query.
        let error = unsafe { GetLastError() };
        if error == ERROR_IO_PENDING {
            event!(Level::TRACE, message = "submitted", ?dir, offset, len);
            return;
        }

        Self::post_synthetic(state, dir, -i64::from(error));
    }

    /// Requests cancellation of an in-flight operation via `CancelIoEx`
    /// targeting its `OVERLAPPED` block. The completion still arrives
    /// through the port with `ERROR_OPERATION_ABORTED`.
    pub(crate) fn request_cancel(&self, dir: Direction) {
        let handle = self.raw_handle();
        if handle == INVALID_HANDLE_VALUE || !self.slot(dir).is_in_flight() {
            return;
        }

        // SAFETY: The handle is valid and the OVERLAPPED block outlives
        // the in-flight operation it identifies.
        unsafe {
            CancelIoEx(handle, self.slot(dir).overlapped.get());
        }
        event!(Level::TRACE, message = "cancel requested", ?dir);
    }

    /// Requests cancellation of all pending I/O on this file.
    pub(crate) fn cancel_all(&self) {
        let handle = self.raw_handle();
        if handle == INVALID_HANDLE_VALUE {
            return;
        }

        // SAFETY: A null OVERLAPPED pointer cancels everything pending on
        // the handle.
        unsafe {
            CancelIoEx(handle, std::ptr::null());
        }
    }

    /// Stores a synthetic result on the record and posts it so the caller
    /// resumes through the normal completion path.
    pub(crate) fn post_synthetic(state: &Arc<Self>, dir: Direction, res: i64) {
        let slot = state.slot(dir);
        {
            let mut record = slot.lock();
            record.res = res;
        }

        if let Some(svc) = state.svc.upgrade() {
            svc.scheduler.post(ReadyOp {
                state: Arc::clone(state),
                dir,
            });
        }
    }
}

impl Drop for FileState {
    fn drop(&mut self) {
        if let Some(svc) = self.svc.upgrade() {
            svc.forget_state(self);
        }
        self.close_file();
    }
}
