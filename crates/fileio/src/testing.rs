// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test doubles for code that consumes file streams.
//!
//! [`MockFileStream`] behaves indistinguishably from the real stream for
//! tests that stage bytes to read or expected bytes to write, except that
//! every operation completes synchronously and no file I/O occurs.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::access::{AccessMode, CreationMode};
use crate::status::Status;

/// A test collaborator that records a permanent failure flag.
///
/// Mocks notify the fuse on any staged-vs-actual mismatch; tests assert
/// [`is_failed`][Self::is_failed] at the end.
#[derive(Debug, Clone, Default)]
pub struct Fuse {
    failed: Arc<AtomicBool>,
}

impl Fuse {
    /// Creates an untripped fuse.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the fuse. Irreversible.
    pub fn fail(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Whether the fuse has been tripped.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// A mock file stream for testing I/O consumers.
///
/// Data staged with [`provide`][Self::provide] is drained by reads; data
/// staged with [`expect`][Self::expect] is validated against writes. The
/// mock is strict: [`close`][Self::close] verifies that both staging
/// buffers are empty, and the destructor fires the fuse as a safety net if
/// the stream is still open with staged data remaining.
///
/// # Thread safety
///
/// Not thread-safe. All operations must occur on a single thread.
#[derive(Debug)]
pub struct MockFileStream {
    provide: Vec<u8>,
    expect: Vec<u8>,
    fuse: Fuse,
    position: u64,
    file_size: u64,
    max_read_size: usize,
    max_write_size: usize,
    is_open: bool,
}

impl MockFileStream {
    /// Creates a mock with unlimited per-operation transfer sizes.
    #[must_use]
    pub fn new(fuse: &Fuse) -> Self {
        Self::with_limits(fuse, usize::MAX, usize::MAX)
    }

    /// Creates a mock that transfers at most `max_read_size` bytes per
    /// read and `max_write_size` bytes per write, forcing callers into
    /// multiple partial operations.
    #[must_use]
    pub fn with_limits(fuse: &Fuse, max_read_size: usize, max_write_size: usize) -> Self {
        Self {
            provide: Vec::new(),
            expect: Vec::new(),
            fuse: fuse.clone(),
            position: 0,
            file_size: 0,
            max_read_size,
            max_write_size,
            is_open: false,
        }
    }

    /// Stages data for reads; appended to any data already staged.
    pub fn provide(&mut self, data: impl AsRef<[u8]>) {
        self.provide.extend_from_slice(data.as_ref());
    }

    /// Stages expected write data; appended to any data already staged.
    pub fn expect(&mut self, data: impl AsRef<[u8]>) {
        self.expect.extend_from_slice(data.as_ref());
    }

    /// Sets the synthetic size reported by [`size`][Self::size].
    pub fn set_file_size(&mut self, size: u64) {
        self.file_size = size;
    }

    /// Marks the mock open. No file I/O occurs; always succeeds.
    pub fn open(&mut self, _path: impl AsRef<Path>, _access: AccessMode, _creation: CreationMode) -> Status {
        self.is_open = true;
        Status::Success
    }

    /// Whether [`open`][Self::open] has been called.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.is_open
    }

    /// Closes the mock and verifies all expectations were met.
    ///
    /// Returns [`Status::TestFailure`] (and fires the fuse) if staged
    /// provide or expect data remains unconsumed.
    pub fn close(&mut self) -> Status {
        if !self.is_open {
            return Status::Success;
        }

        self.is_open = false;

        if !self.expect.is_empty() {
            self.fuse.fail();
            return Status::TestFailure;
        }
        if !self.provide.is_empty() {
            self.fuse.fail();
            return Status::TestFailure;
        }

        Status::Success
    }

    /// The current simulated position.
    #[must_use]
    pub const fn tell(&self) -> u64 {
        self.position
    }

    /// Sets the simulated position.
    pub fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    /// The simulated file size; never fails.
    #[must_use]
    pub const fn size(&self) -> (Status, u64) {
        (Status::Success, self.file_size)
    }

    /// Requests cancellation. Nothing is ever pending on the mock, so
    /// this is a no-op.
    pub fn cancel(&mut self) {}

    /// Reads staged data into `buf`, completing synchronously.
    ///
    /// Drains the provide buffer; once it is empty, resolves to
    /// `(Status::Eof, 0)`.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> (Status, usize) {
        if self.provide.is_empty() {
            return (Status::Eof, 0);
        }

        let n = buf.len().min(self.provide.len()).min(self.max_read_size);
        buf[..n].copy_from_slice(&self.provide[..n]);
        self.provide.drain(..n);
        self.position += n as u64;
        (Status::Success, n)
    }

    /// Validates `buf` against the staged expect data, completing
    /// synchronously.
    ///
    /// On a prefix mismatch the fuse fires and the result is
    /// `(Status::TestFailure, 0)`; on a match the matched portion is
    /// consumed.
    pub async fn write_some(&mut self, buf: &[u8]) -> (Status, usize) {
        if self.expect.is_empty() {
            return (Status::Success, 0);
        }

        let written = &buf[..buf.len().min(self.max_write_size)];
        let match_size = written.len().min(self.expect.len());

        if written[..match_size] != self.expect[..match_size] {
            self.fuse.fail();
            return (Status::TestFailure, 0);
        }

        self.expect.drain(..match_size);
        self.position += written.len() as u64;
        (Status::Success, written.len())
    }
}

impl Drop for MockFileStream {
    fn drop(&mut self) {
        // Safety net: a mock dropped while open with staged data still
        // fails the test even if close() was never called.
        if self.is_open && (!self.expect.is_empty() || !self.provide.is_empty()) {
            self.fuse.fail();
        }
    }
}
