// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::{Level, event};

use crate::access::{AccessMode, CreationMode};
use crate::cancel::CancelToken;
use crate::context::{ContextInner, IoContext};
use crate::op::{Direction, Phase};
use crate::platform::FileState;
use crate::status::Status;

/// An asynchronous file stream bound to an [`IoContext`].
///
/// Provides suspending `read_some`/`write_some` operations backed by the
/// platform completion engine (io_uring, IOCP or `dispatch_io`), plus
/// non-suspending `open`, `close`, `seek`, `tell`, `size` and `cancel`.
///
/// Reads and writes always submit the stream's logical position as an
/// explicit absolute offset; [`seek`][Self::seek] only moves that logical
/// cursor and never touches any kernel-maintained descriptor state. The
/// position advances exactly by the byte count a successful completion
/// reports; EOF and cancellation leave it unchanged.
///
/// At most one read and one write may be outstanding at a time; a read and
/// a write may be in flight concurrently.
///
/// Dropping the stream closes the file. Operations still in flight at that
/// point complete through the normal path with a cancellation status.
///
/// # Thread safety
///
/// Distinct streams are independent. A single stream's operations must be
/// externally serialized per direction.
#[derive(Debug)]
pub struct FileStream {
    ctx: Arc<ContextInner>,
    state: Arc<FileState>,
}

impl FileStream {
    /// Creates a stream bound to the given context. The file is not yet
    /// open.
    #[must_use]
    pub fn new(ctx: &IoContext) -> Self {
        let inner = Arc::clone(ctx.inner());
        let state = inner.service().create_state();
        Self { ctx: inner, state }
    }

    /// Opens a file for asynchronous I/O, closing any previously open one.
    ///
    /// Access and creation modes are translated to native flags (with
    /// overlapped mode on Windows and `0o644` permissions when creating on
    /// POSIX). On failure the native error is returned as a status.
    pub fn open(
        &self,
        path: impl AsRef<Path>,
        access: AccessMode,
        creation: CreationMode,
    ) -> Status {
        self.ctx
            .service()
            .open_file(&self.state, path.as_ref(), access, creation)
    }

    /// Whether the stream currently has an open file.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Closes the file, cancelling pending I/O first. Idempotent; resets
    /// the logical position to zero.
    pub fn close(&self) {
        if self.state.is_open() {
            self.state.cancel_all();
            event!(Level::TRACE, message = "stream closing");
        }
        self.state.close_file();
    }

    /// The current logical position.
    #[must_use]
    pub fn tell(&self) -> u64 {
        self.state.pos.load(Ordering::Acquire)
    }

    /// Sets the logical position for the next read or write. No kernel
    /// cursor is moved; the next operation submits this offset explicitly.
    pub fn seek(&self, offset: u64) {
        self.state.pos.store(offset, Ordering::Release);
    }

    /// Queries the file size via the native API.
    ///
    /// Returns `(Status::BadFileDescriptor, 0)` if no file is open and
    /// `(status, 0)` for any other native failure.
    #[must_use]
    pub fn size(&self) -> (Status, u64) {
        self.state.size()
    }

    /// Requests cancellation of any outstanding I/O on this stream.
    ///
    /// Side-effect only. Pending operations complete through the normal
    /// path with [`Status::Canceled`].
    pub fn cancel(&self) {
        self.state.cancel_all();
    }

    /// Reads up to `buf.len()` bytes at the current logical position.
    ///
    /// Resolves to `(status, bytes)`. Partial transfers are allowed; a
    /// read at or past end of file resolves to `(Status::Eof, 0)`. An
    /// empty buffer resolves to `(Status::Success, 0)` without issuing a
    /// system call, still resuming through the posted-completion path.
    pub fn read_some<'a>(&'a self, buf: &'a mut [u8]) -> ReadSome<'a> {
        ReadSome {
            io: OpFuture::new(self, Direction::Read, buf.as_mut_ptr(), buf.len(), None),
            _buf: std::marker::PhantomData,
        }
    }

    /// Like [`read_some`][Self::read_some], with a cancellation token the
    /// pending operation subscribes to.
    pub fn read_some_with<'a>(&'a self, buf: &'a mut [u8], token: &CancelToken) -> ReadSome<'a> {
        ReadSome {
            io: OpFuture::new(
                self,
                Direction::Read,
                buf.as_mut_ptr(),
                buf.len(),
                Some(token.clone()),
            ),
            _buf: std::marker::PhantomData,
        }
    }

    /// Writes up to `buf.len()` bytes at the current logical position.
    ///
    /// Resolves to `(status, bytes)` where `bytes` is the exact count the
    /// completion engine reported. An empty buffer resolves to
    /// `(Status::Success, 0)` without issuing a system call.
    pub fn write_some<'a>(&'a self, buf: &'a [u8]) -> WriteSome<'a> {
        WriteSome {
            io: OpFuture::new(
                self,
                Direction::Write,
                buf.as_ptr().cast_mut(),
                buf.len(),
                None,
            ),
            _buf: std::marker::PhantomData,
        }
    }

    /// Like [`write_some`][Self::write_some], with a cancellation token.
    pub fn write_some_with<'a>(&'a self, buf: &'a [u8], token: &CancelToken) -> WriteSome<'a> {
        WriteSome {
            io: OpFuture::new(
                self,
                Direction::Write,
                buf.as_ptr().cast_mut(),
                buf.len(),
                Some(token.clone()),
            ),
            _buf: std::marker::PhantomData,
        }
    }
}

impl Drop for FileStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Shared machinery of the read and write futures.
///
/// The first poll arms the operation record - buffer, captured offset,
/// waker, keepalive reference, cancellation subscription - and only then
/// submits to the backend. Submission thus happens strictly after the
/// suspension point is established, and completions resume the caller
/// exclusively through the stored waker, never inline.
#[derive(Debug)]
struct OpFuture<'a> {
    ctx: &'a Arc<ContextInner>,
    state: &'a Arc<FileState>,
    dir: Direction,
    buf: *mut u8,
    len: usize,
    token: Option<CancelToken>,
    started: bool,
    finished: bool,
}

impl<'a> OpFuture<'a> {
    fn new(
        stream: &'a FileStream,
        dir: Direction,
        buf: *mut u8,
        len: usize,
        token: Option<CancelToken>,
    ) -> Self {
        Self {
            ctx: &stream.ctx,
            state: &stream.state,
            dir,
            buf,
            len,
            token,
            started: false,
            finished: false,
        }
    }

    fn poll_op(&mut self, cx: &mut Context<'_>) -> Poll<(Status, usize)> {
        let slot = self.state.slot(self.dir);

        if self.started {
            let mut record = slot.lock();
            return match record.phase {
                Phase::Completed => {
                    let outcome = record
                        .outcome
                        .take()
                        .expect("completed operation must carry an outcome");
                    record.phase = Phase::Idle;
                    self.finished = true;
                    Poll::Ready(outcome)
                }
                Phase::Submitted => {
                    record.waker = Some(cx.waker().clone());
                    Poll::Pending
                }
                Phase::Idle => unreachable!("started operation cannot be idle"),
            };
        }

        // Arm the record. Everything the completion path needs must be in
        // place before submission.
        let empty = self.len == 0;
        {
            let mut record = slot.lock();
            assert!(
                record.phase == Phase::Idle,
                "at most one outstanding {:?} operation per stream",
                self.dir
            );
            record.phase = Phase::Submitted;
            record.buf = self.buf;
            record.len = self.len;
            record.offset = self.state.pos.load(Ordering::Acquire);
            record.res = 0;
            record.empty = empty;
            record.outcome = None;
            record.waker = Some(cx.waker().clone());
            record.keepalive = Some(Arc::clone(self.state));
        }
        self.started = true;
        self.ctx.scheduler().work_started();

        // Bind the cancellation subscription outside the record lock; an
        // already-fired token runs its action during `subscribe`.
        if let Some(token) = &self.token {
            let weak = Arc::downgrade(self.state);
            let dir = self.dir;
            let sub = token.subscribe(Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    state.request_cancel(dir);
                }
            }));
            slot.lock().cancel_sub = Some(sub);
        }

        if empty {
            // Zero-length request: no system call, synthetic completion.
            FileState::post_synthetic(self.state, self.dir, 0);
        } else if self.state.is_open() {
            FileState::submit(self.state, self.dir);
        } else {
            FileState::post_synthetic(self.state, self.dir, FileState::BAD_FD_RES);
        }

        Poll::Pending
    }
}

impl Drop for OpFuture<'_> {
    fn drop(&mut self) {
        if !self.started || self.finished {
            return;
        }

        // The operation may still be in flight with the kernel holding a
        // pointer into the caller's buffer. Cancel it and drive the
        // context until the completion releases the buffer; only then may
        // the borrow end.
        let slot = self.state.slot(self.dir);
        if slot.is_in_flight() {
            self.state.request_cancel(self.dir);
        }

        loop {
            {
                let mut record = slot.lock();
                match record.phase {
                    Phase::Idle => break,
                    Phase::Completed => {
                        record.outcome = None;
                        record.phase = Phase::Idle;
                        break;
                    }
                    Phase::Submitted => {}
                }
            }
            self.ctx.process_completions(10);
        }

        event!(Level::TRACE, message = "in-flight operation reclaimed", dir = ?self.dir);
    }
}

/// Future returned by [`FileStream::read_some`]. Resolves to
/// `(Status, usize)`.
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct ReadSome<'a> {
    io: OpFuture<'a>,
    _buf: std::marker::PhantomData<&'a mut [u8]>,
}

impl Future for ReadSome<'_> {
    type Output = (Status, usize);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.io.poll_op(cx)
    }
}

/// Future returned by [`FileStream::write_some`]. Resolves to
/// `(Status, usize)`.
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct WriteSome<'a> {
    io: OpFuture<'a>,
    _buf: std::marker::PhantomData<&'a [u8]>,
}

impl Future for WriteSome<'_> {
    type Output = (Status, usize);

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.io.poll_op(cx)
    }
}
