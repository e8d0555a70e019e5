// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-direction operation records.
//!
//! A file state owns exactly one read record and one write record, reused
//! across successive operations. A record is "live" from the moment a
//! `read_some`/`write_some` future stores its parameters until the
//! completion callback runs; for that whole interval the record holds a
//! strong reference to its file state so the kernel-resident pointer into
//! the record stays valid no matter what the user does with the stream.

#[cfg(windows)]
use std::cell::UnsafeCell;
use std::marker::PhantomPinned;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::Waker;

use tracing::{Level, event};

use crate::cancel::CancelSubscription;
use crate::platform::FileState;
use crate::scheduler::Scheduler;
use crate::status::Status;
use crate::ERR_POISONED_LOCK;

/// Transfer direction of an operation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Read,
    Write,
}

/// Lifecycle of a record: `Idle → Submitted → Completed → Idle`.
///
/// The transitions are identical across all three completion engines; only
/// submission calls, cancellation and result encoding differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Submitted,
    Completed,
}

/// The mutable portion of a record, guarded by the slot mutex.
pub(crate) struct OpRecord {
    pub phase: Phase,

    /// Caller's buffer. Valid only while `phase == Submitted`: the future
    /// holding the `&mut [u8]` borrow blocks in its destructor until the
    /// backend has let go of the pointer.
    pub buf: *mut u8,
    pub len: usize,

    /// Absolute file offset captured at submission.
    pub offset: u64,

    /// Backend result in the canonical sign convention: nonnegative =
    /// bytes transferred (zero on read = EOF), negative = `-native_error`.
    /// Stored on the record before the record is posted to the scheduler.
    pub res: i64,

    /// The request had a zero-length buffer; its synthetic completion
    /// reports success rather than EOF.
    pub empty: bool,

    /// Resumption handle of the suspended caller.
    pub waker: Option<Waker>,

    /// Result picked up by the caller's future on its wake-up poll.
    pub outcome: Option<(Status, usize)>,

    /// Keeps the owning file state alive while the operation is
    /// outstanding. Taken by the completion callback (or the shutdown
    /// cleanup path), which is what finally allows the state to drop.
    pub keepalive: Option<Arc<FileState>>,

    /// Active cancellation-token subscription, dropped on completion.
    pub cancel_sub: Option<CancelSubscription>,
}

// SAFETY: The raw buffer pointer is only dereferenced by the completion
// engine while the operation is submitted, and the submitting future
// guarantees the pointee outlives the submission (it blocks on drop until
// completion). All other fields are owned data behind the mutex.
unsafe impl Send for OpRecord {}

impl OpRecord {
    const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            buf: std::ptr::null_mut(),
            len: 0,
            offset: 0,
            res: 0,
            empty: false,
            waker: None,
            outcome: None,
            keepalive: None,
            cancel_sub: None,
        }
    }
}

impl std::fmt::Debug for OpRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpRecord")
            .field("phase", &self.phase)
            .field("len", &self.len)
            .field("offset", &self.offset)
            .field("res", &self.res)
            .finish_non_exhaustive()
    }
}

/// One reusable per-direction operation slot inside a file state.
///
/// On Windows the slot embeds the `OVERLAPPED` block as its first field;
/// the completion port hands back a pointer to that block and the slot is
/// recovered by pointer identity. The slot therefore must not move while
/// an operation is submitted - it lives inside an `Arc<FileState>`, whose
/// allocation address is stable, and the record's keepalive reference
/// prevents that allocation from being freed.
#[repr(C)]
pub(crate) struct OpSlot {
    #[cfg(windows)]
    pub overlapped: UnsafeCell<windows_sys::Win32::System::IO::OVERLAPPED>,

    pub dir: Direction,
    record: Mutex<OpRecord>,

    _requires_pinning: PhantomPinned,
}

// SAFETY: The OVERLAPPED block contains raw pointers but is only touched by
// the submitting thread before submission and by the completion dispatcher
// afterwards; the record mutex serializes everything else.
unsafe impl Send for OpSlot {}
// SAFETY: As above; shared access funnels through the record mutex.
unsafe impl Sync for OpSlot {}

impl OpSlot {
    pub(crate) fn new(dir: Direction) -> Self {
        Self {
            #[cfg(windows)]
            // SAFETY: OVERLAPPED is plain data; all-zero is its documented
            // initial state.
            overlapped: UnsafeCell::new(unsafe { std::mem::zeroed() }),
            dir,
            record: Mutex::new(OpRecord::new()),
            _requires_pinning: PhantomPinned,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, OpRecord> {
        self.record.lock().expect(ERR_POISONED_LOCK)
    }

    /// Whether an operation is currently outstanding on this slot.
    pub(crate) fn is_in_flight(&self) -> bool {
        self.lock().phase == Phase::Submitted
    }

    /// The kernel-facing identifier of this slot: its address.
    ///
    /// Used as io_uring `user_data`; on Windows the `OVERLAPPED` pointer
    /// doubles as the identifier because it is the first field.
    pub(crate) fn key(&self) -> u64 {
        std::ptr::from_ref(self) as u64
    }
}

impl std::fmt::Debug for OpSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpSlot")
            .field("dir", &self.dir)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// Why the completion callback is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompleteCause {
    /// Normal path: the scheduler dequeued the posted record.
    Normal,
    /// The owning service is shutting down; pending records release their
    /// resources and resume their callers as canceled.
    ShutdownCleanup,
}

/// Maps a backend result onto the canonical `(Status, bytes)` pair.
///
/// This is the single place where sign, the zero-byte read case and the
/// cancellation indications of all backends are interpreted.
pub(crate) fn map_result(dir: Direction, res: i64, empty: bool) -> (Status, usize) {
    if res >= 0 {
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "nonnegative and bounded by the submitted buffer length"
        )]
        let bytes = res as usize;
        if bytes == 0 && dir == Direction::Read && !empty {
            (Status::Eof, 0)
        } else {
            (Status::Success, bytes)
        }
    } else {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "native error codes fit in 32 bits"
        )]
        let code = -res as i32;
        (Status::from_os_error(code), 0)
    }
}

/// Runs the completion callback for one posted record.
///
/// Updates the logical position, publishes the `(Status, bytes)` outcome,
/// releases the cancellation subscription and the keepalive reference, and
/// resumes the caller through its waker. The caller is resumed exactly
/// once per operation: every path that produces a completion funnels
/// through here, and the phase transition guards against replays.
pub(crate) fn complete(
    scheduler: &Scheduler,
    state: &Arc<FileState>,
    dir: Direction,
    cause: CompleteCause,
) {
    let slot = state.slot(dir);
    let mut record = slot.lock();

    if record.phase != Phase::Submitted {
        // A replayed or stale notification; nothing is outstanding.
        return;
    }

    let keepalive = record.keepalive.take();
    record.cancel_sub = None;

    let (status, bytes) = match cause {
        CompleteCause::Normal => map_result(dir, record.res, record.empty),
        CompleteCause::ShutdownCleanup => (Status::Canceled, 0),
    };

    if status == Status::Success && bytes > 0 {
        let previous = state.pos.fetch_add(bytes as u64, Ordering::AcqRel);
        event!(
            Level::TRACE,
            message = "position advanced",
            ?dir,
            from = previous,
            by = bytes
        );
    }

    record.outcome = Some((status, bytes));
    record.phase = Phase::Completed;
    record.buf = std::ptr::null_mut();
    record.len = 0;
    let waker = record.waker.take();
    drop(record);

    event!(Level::TRACE, message = "operation completed", ?dir, ?status, bytes);

    scheduler.work_finished();

    if let Some(waker) = waker {
        waker.wake();
    }

    // The strong reference held for the duration of the operation drops
    // last; if the stream was dropped mid-flight this is what frees the
    // file state.
    drop(keepalive);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_result_is_bytes() {
        assert_eq!(
            map_result(Direction::Read, 13, false),
            (Status::Success, 13)
        );
        assert_eq!(
            map_result(Direction::Write, 4096, false),
            (Status::Success, 4096)
        );
    }

    #[test]
    fn zero_read_is_eof() {
        assert_eq!(map_result(Direction::Read, 0, false), (Status::Eof, 0));
    }

    #[test]
    fn zero_write_is_success() {
        assert_eq!(map_result(Direction::Write, 0, false), (Status::Success, 0));
    }

    #[test]
    fn empty_buffer_read_is_success_not_eof() {
        assert_eq!(map_result(Direction::Read, 0, true), (Status::Success, 0));
    }

    #[cfg(unix)]
    #[test]
    fn negative_result_maps_native_error() {
        assert_eq!(
            map_result(Direction::Read, -i64::from(libc::ECANCELED), false),
            (Status::Canceled, 0)
        );
        assert_eq!(
            map_result(Direction::Write, -i64::from(libc::ENOSPC), false),
            (Status::Os(libc::ENOSPC), 0)
        );
    }
}
