// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ffi::c_void;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use block2::RcBlock;
use dispatch2::ffi::{
    dispatch_data_apply, dispatch_data_create, dispatch_data_get_size, dispatch_data_t,
    dispatch_io_close, dispatch_io_create, dispatch_io_read, dispatch_io_set_low_water,
    dispatch_io_t, dispatch_io_write, dispatch_release, DISPATCH_IO_RANDOM, DISPATCH_IO_STOP,
};
use tracing::{Level, event};

use crate::gcd::ServiceShared;
use crate::op::{Direction, OpSlot};
use crate::scheduler::ReadyOp;
use crate::status::Status;
use crate::ERR_POISONED_LOCK;

/// Sentinel descriptor value for a closed file.
const CLOSED_FD: i32 = -1;

/// A `dispatch_io` channel handle. Raw because the channel is created and
/// released through the C API; dispatch retains it internally while
/// operations are pending.
#[derive(Debug)]
struct Channel(Option<dispatch_io_t>);

// SAFETY: dispatch objects are reference-counted kernel-backed handles
// designed for cross-thread use; access is additionally serialized by the
// surrounding mutex.
unsafe impl Send for Channel {}

/// Per-file state for the GCD engine.
///
/// Owns the native descriptor plus the `dispatch_io` channel layered over
/// it, and the logical position cursor. Shared through an `Arc`; each
/// in-flight operation and each completion block keeps a strong reference
/// until the completion callback runs.
#[derive(Debug)]
pub(crate) struct FileState {
    svc: Weak<ServiceShared>,

    fd: AtomicI32,

    /// Logical position. Updated only by successful completions.
    pub(crate) pos: AtomicU64,

    channel: Mutex<Channel>,

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
            channel: Mutex::new(Channel(None)),
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

    /// Returns the channel for the next submission, lazily re-creating it
    /// if a cancel closed the previous one while the descriptor stayed
    /// open.
    fn ensure_channel(&self) -> Option<dispatch_io_t> {
        let fd = self.raw_fd();
        if fd == CLOSED_FD {
            return None;
        }

        let Some(svc) = self.svc.upgrade() else {
            return None;
        };

        let mut channel = self.channel.lock().expect(ERR_POISONED_LOCK);
        if let Some(existing) = channel.0 {
            return Some(existing);
        }

        // SAFETY: The descriptor is open and the queue outlives the
        // channel; the cleanup handler needs no captured state.
        let created = unsafe {
            dispatch_io_create(
                DISPATCH_IO_RANDOM,
                fd,
                svc.queue(),
                &RcBlock::new(move |_error: i32| {}),
            )
        };
        if created.is_null() {
            return None;
        }

        // A one-byte low-water mark delivers data as soon as it exists
        // instead of waiting for internal buffering thresholds.
        // SAFETY: The channel was just created and is owned here.
        unsafe {
            dispatch_io_set_low_water(created, 1);
        }

        channel.0 = Some(created);
        event!(Level::TRACE, message = "dispatch_io channel created", fd);
        Some(created)
    }

    /// Closes the channel, aborting pending operations with `ECANCELED`.
    fn close_channel(&self, stop: bool) {
        let mut channel = self.channel.lock().expect(ERR_POISONED_LOCK);
        if let Some(existing) = channel.0.take() {
            // SAFETY: The channel handle is owned by this state; pending
            // operations receive ECANCELED when stopped.
            unsafe {
                dispatch_io_close(existing, if stop { DISPATCH_IO_STOP } else { 0 });
                dispatch_release(existing.cast());
            }
        }
    }

    /// Closes the channel and the descriptor, rewinding the position.
    pub(crate) fn close_file(&self) {
        self.close_channel(false);

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

    /// Submits the armed record in the given direction to the channel.
    ///
    /// Called only after the caller's suspension point is fully
    /// established. The completion block runs on the service queue,
    /// coalesces partial fragments, and posts the finished record to the
    /// scheduler; the caller is never resumed inline.
    pub(crate) fn submit(state: &Arc<Self>, dir: Direction) {
        let Some(channel) = state.ensure_channel() else {
            Self::post_synthetic(state, dir, Self::BAD_FD_RES);
            return;
        };

        let Some(svc) = state.svc.upgrade() else {
            Self::post_synthetic(state, dir, Self::BAD_FD_RES);
            return;
        };

        let slot = state.slot(dir);
        let (buf, len, offset) = {
            let record = slot.lock();
            (record.buf, record.len, record.offset)
        };

        match dir {
            Direction::Read => Self::submit_read(state, channel, &svc, buf, len, offset),
            Direction::Write => Self::submit_write(state, channel, &svc, buf, len, offset),
        }

        event!(Level::TRACE, message = "submitted", ?dir, offset, len);
    }

    fn submit_read(
        state: &Arc<Self>,
        channel: dispatch_io_t,
        svc: &Arc<ServiceShared>,
        buf: *mut u8,
        len: usize,
        offset: u64,
    ) {
        let state = Arc::clone(state);
        let svc = Arc::clone(svc);
        let buf = SendPtr(buf);

        // Fragments may arrive across several invocations with
        // `done == false`; the transferred count accumulates until the
        // final `done == true` invocation publishes the result. No data
        // and no error on the final invocation means end of file.
        let progress = Arc::new(AtomicUsize::new(0));

        let handler = RcBlock::new(move |done: bool, data: dispatch_data_t, error: i32| {
            if !data.is_null() && error == 0 {
                copy_fragments(data, buf, len, &progress);
            }

            if done {
                let transferred = progress.load(Ordering::Acquire);
                let res = if error != 0 {
                    -i64::from(error)
                } else {
                    transferred as i64
                };
                finish(&state, &svc, Direction::Read, res);
            }
        });

        // SAFETY: The caller's buffer outlives the operation (the future
        // blocks on drop) and dispatch copies the handler block.
        unsafe {
            #[expect(clippy::cast_possible_wrap, reason = "file offsets fit off_t")]
            dispatch_io_read(channel, offset as libc::off_t, len, svc.queue(), &handler);
        }
    }

    fn submit_write(
        state: &Arc<Self>,
        channel: dispatch_io_t,
        svc: &Arc<ServiceShared>,
        buf: *mut u8,
        len: usize,
        offset: u64,
    ) {
        // The default destructor makes dispatch_data copy the bytes
        // immediately, so the caller's buffer is not referenced after
        // this call returns.
        // SAFETY: `buf..buf+len` is valid for reads for the duration of
        // this call.
        let data = unsafe {
            dispatch_data_create(buf.cast::<c_void>(), len, std::ptr::null_mut(), None)
        };

        let state = Arc::clone(state);
        let svc = Arc::clone(svc);

        let handler = RcBlock::new(move |done: bool, remaining: dispatch_data_t, error: i32| {
            if !done {
                return;
            }

            let res = if error != 0 {
                -i64::from(error)
            } else {
                // Bytes written = requested length minus whatever came
                // back unwritten.
                let unwritten = if remaining.is_null() {
                    0
                } else {
                    // SAFETY: `remaining` is a live dispatch_data object
                    // for the duration of the block invocation.
                    unsafe { dispatch_data_get_size(remaining) }
                };
                (len - unwritten) as i64
            };
            finish(&state, &svc, Direction::Write, res);
        });

        // SAFETY: `data` owns a copy of the bytes; dispatch copies the
        // handler block and releases `data` when the operation ends.
        unsafe {
            #[expect(clippy::cast_possible_wrap, reason = "file offsets fit off_t")]
            dispatch_io_write(channel, offset as libc::off_t, data, svc.queue(), &handler);
            dispatch_release(data.cast());
        }
    }

    /// Requests cancellation of pending I/O by stopping the channel.
    ///
    /// Individual operations cannot be canceled on this engine; stopping
    /// the channel completes everything pending with `ECANCELED`, and the
    /// next submission re-creates a channel over the still-open
    /// descriptor.
    pub(crate) fn request_cancel(&self, _dir: Direction) {
        self.cancel_all();
    }

    /// Requests cancellation of all pending I/O on this file.
    pub(crate) fn cancel_all(&self) {
        if self.read.is_in_flight() || self.write.is_in_flight() {
            self.close_channel(true);
            event!(Level::TRACE, message = "channel stopped for cancel");
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

/// Stores the result on the record and posts it from the dispatch queue
/// thread; the scheduler marshals the completion callback onto the
/// context thread.
fn finish(state: &Arc<FileState>, svc: &Arc<ServiceShared>, dir: Direction, res: i64) {
    {
        let mut record = state.slot(dir).lock();
        record.res = res;
    }
    svc.scheduler.post(ReadyOp {
        state: Arc::clone(state),
        dir,
    });
}

/// Copies the fragments of a dispatch_data object into the caller's
/// buffer at the current accumulation offset, returning the bytes copied.
fn copy_fragments(
    data: dispatch_data_t,
    buf: SendPtr,
    len: usize,
    progress: &Arc<AtomicUsize>,
) -> usize {
    // SAFETY: `data` is live for the duration of the enclosing handler
    // invocation.
    let size = unsafe { dispatch_data_get_size(data) };
    if size == 0 {
        return 0;
    }

    let progress_in = Arc::clone(progress);
    let applier = RcBlock::new(
        move |_region: dispatch_data_t, region_offset: usize, ptr: *const c_void, region_len: usize| -> bool {
            let base = progress_in.load(Ordering::Acquire);
            let at = base + region_offset;
            let copy_len = region_len.min(len.saturating_sub(at));
            if copy_len > 0 {
                // SAFETY: The destination range lies inside the caller's
                // buffer (bounded above) and the source region is valid
                // for `region_len` bytes.
                unsafe {
                    std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), buf.0.add(at), copy_len);
                }
            }
            true
        },
    );

    // SAFETY: The applier block only reads the live regions handed to it.
    unsafe {
        dispatch_data_apply(data, &applier);
    }

    progress.fetch_add(size, Ordering::AcqRel);
    size
}

/// A raw buffer pointer that may cross into dispatch queue threads.
#[derive(Clone, Copy)]
struct SendPtr(*mut u8);

// SAFETY: The pointee is the caller's buffer, which outlives the
// operation - the submitting future blocks on drop until the completion
// block has run.
unsafe impl Send for SendPtr {}
// SAFETY: As above; fragment copies for one operation are serialized by
// the dispatch_io handler contract.
unsafe impl Sync for SendPtr {}
