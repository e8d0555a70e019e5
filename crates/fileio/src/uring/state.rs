// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use io_uring::{opcode, types};
use tracing::{Level, event};

use crate::op::{Direction, OpSlot};
use crate::scheduler::ReadyOp;
use crate::status::Status;
use crate::uring::ServiceShared;

/// Sentinel descriptor value for a closed file.
const CLOSED_FD: i32 = -1;

/// Per-file state for the io_uring engine.
///
/// Owns the native descriptor and the logical position cursor, and holds
/// the two reusable operation records. The state is shared through an
/// `Arc`: the stream holds one reference, and every in-flight operation
/// holds another for as long as the kernel has a pointer into its record.
#[derive(Debug)]
pub(crate) struct FileState {
    svc: Weak<ServiceShared>,

    fd: AtomicI32,

    /// Logical position. Updated only by successful completions; the
    /// kernel-maintained descriptor cursor is never consulted.
    pub(crate) pos: AtomicU64,

    read: OpSlot,
    write: OpSlot,
}

impl FileState {
    /// Synthetic result used when an operation is started on a closed
    /// stream, in the engine's native encoding.
    pub(crate) const BAD_FD_RES: i64 = -(libc::EBADF as i64);

    pub(crate) fn new(svc: Weak<ServiceShared>) -> Arc<Self> {
        Arc::new(Self {
            svc,
            fd: AtomicI32::new(CLOSED_FD),
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
        self.fd.load(Ordering::Acquire) != CLOSED_FD
    }

    pub(crate) fn raw_fd(&self) -> i32 {
        self.fd.load(Ordering::Acquire)
    }

    pub(crate) fn set_fd(&self, fd: i32) {
        self.fd.store(fd, Ordering::Release);
    }

    /// Closes the descriptor and rewinds the logical position.
    pub(crate) fn close_file(&self) {
        let fd = self.fd.swap(CLOSED_FD, Ordering::AcqRel);
        if fd != CLOSED_FD {
            // SAFETY: The descriptor was owned by this state and has just
            // been detached from it.
            unsafe {
                libc::close(fd);
            }
            event!(Level::TRACE, message = "file closed", fd);
        }
        self.pos.store(0, Ordering::Release);
    }

    /// Queries the file size via `fstat`.
    pub(crate) fn size(&self) -> (Status, u64) {
        let fd = self.raw_fd();
        if fd == CLOSED_FD {
            return (Status::BadFileDescriptor, 0);
        }

        // SAFETY: `st` is a plain-data out-parameter that outlives the call.
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: The descriptor is valid and `st` is writable.
        if unsafe { libc::fstat(fd, &mut st) } == -1 {
            return (Status::last_os_error(), 0);
        }

        #[expect(clippy::cast_sign_loss, reason = "regular file sizes are nonnegative")]
        let size = st.st_size as u64;
        (Status::Success, size)
    }

    /// Submits the armed record in the given direction to the ring.
    ///
    /// Called only after the caller's suspension point is fully
    /// established: the record already carries the waker, the keepalive
    /// reference and the cancellation subscription. Submission failures
    /// (no free SQE, a negative submit return) never resume the caller
    /// inline; they are funnelled through a synthetic posted completion.
    pub(crate) fn submit(state: &Arc<Self>, dir: Direction) {
        let Some(svc) = state.svc.upgrade() else {
            Self::post_synthetic(state, dir, -i64::from(libc::EBADF));
            return;
        };

        let fd = state.raw_fd();
        let slot = state.slot(dir);
        let (buf, len, offset) = {
            let record = slot.lock();
            (record.buf, record.len, record.offset)
        };

        #[expect(
            clippy::cast_possible_truncation,
            reason = "single-buffer I/O lengths fit the SQE length field"
        )]
        let entry = match dir {
            Direction::Read => opcode::Read::new(types::Fd(fd), buf, len as u32)
                .offset(offset)
                .build()
                .user_data(slot.key()),
            Direction::Write => opcode::Write::new(types::Fd(fd), buf.cast_const(), len as u32)
                .offset(offset)
                .build()
                .user_data(slot.key()),
        };

        let mut ring = svc.ring.lock().expect(crate::ERR_POISONED_LOCK);

        // SAFETY: The buffer pointed to by the entry stays valid until the
        // matching CQE is reaped - the record's future blocks on drop.
        let pushed = unsafe { ring.submission().push(&entry) };
        if pushed.is_err() {
            // The submission queue is full. Flush it and retry once; a
            // second failure completes the operation with ENOMEM like any
            // other submission failure.
            drop(ring.submit());
            // SAFETY: As above.
            if unsafe { ring.submission().push(&entry) }.is_err() {
                drop(ring);
                Self::post_synthetic(state, dir, -i64::from(libc::ENOMEM));
                return;
            }
        }

        match ring.submit() {
            Ok(_) => {
                event!(Level::TRACE, message = "submitted", ?dir, fd, offset, len);
            }
            Err(error) => {
                drop(ring);
                let code = error.raw_os_error().unwrap_or(libc::EIO);
                Self::post_synthetic(state, dir, -i64::from(code));
            }
        }
    }

    /// Requests cancellation of an in-flight operation.
    ///
    /// The original completion still arrives through the ring, carrying
    /// `-ECANCELED`; the cancel SQE's own completion is discarded (zero
    /// `user_data`).
    pub(crate) fn request_cancel(&self, dir: Direction) {
        if !self.slot(dir).is_in_flight() || !self.is_open() {
            return;
        }

        let Some(svc) = self.svc.upgrade() else {
            return;
        };

        let entry = opcode::AsyncCancel::new(self.slot(dir).key())
            .build()
            .user_data(0);

        let mut ring = svc.ring.lock().expect(crate::ERR_POISONED_LOCK);
        // SAFETY: A cancel entry references no caller memory.
        if unsafe { ring.submission().push(&entry) }.is_ok() {
            drop(ring.submit());
            event!(Level::TRACE, message = "cancel requested", ?dir);
        }
    }

    /// Requests cancellation of all pending I/O on this file.
    pub(crate) fn cancel_all(&self) {
        self.request_cancel(Direction::Read);
        self.request_cancel(Direction::Write);
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
