// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Completion-backed asynchronous file streams.
//!
//! This crate provides a uniform, stream-oriented asynchronous file
//! abstraction over three platform completion engines:
//!
//! * Linux - `io_uring`, with the ring registered in the context's epoll
//!   set;
//! * Windows - I/O completion ports with overlapped file handles;
//! * macOS - Grand Central Dispatch `dispatch_io` channels.
//!
//! The public surface is small:
//!
//! 1. [`IoContext`] owns the completion engine and processes completed
//!    operations; its [`block_on`][IoContext::block_on] drives a future
//!    while servicing completions.
//! 1. [`FileStream`] is the user-facing handle with `open`/`close`,
//!    absolute-position `seek`/`tell`, `size`, `cancel` and suspending
//!    [`read_some`][FileStream::read_some]/
//!    [`write_some`][FileStream::write_some] operations that resolve to a
//!    `(Status, bytes)` pair.
//! 1. [`testing::MockFileStream`] mirrors the stream's surface for tests,
//!    completing synchronously against staged data.
//!
//! Reads and writes always carry an explicit absolute offset captured from
//! the stream's logical position; no kernel-maintained file cursor is ever
//! relied upon. Partial transfers are surfaced as-is - callers that need
//! exact counts loop at a higher level.
//!
//! # Example
//!
//! ```no_run
//! use fileio::{AccessMode, CreationMode, FileStream, IoContext, Status};
//!
//! let ctx = IoContext::new().expect("completion engine unavailable");
//! ctx.block_on(async {
//!     let file = FileStream::new(&ctx);
//!     let status = file.open("data.txt", AccessMode::READ_ONLY, CreationMode::OpenExisting);
//!     assert!(status.is_ok());
//!
//!     let mut buf = [0_u8; 4096];
//!     let (status, n) = file.read_some(&mut buf).await;
//!     if status == Status::Eof {
//!         // empty file
//!     }
//!     let _ = (status, n);
//! });
//! ```

#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
compile_error!("fileio requires io_uring, IOCP or GCD; this target has none of them");

mod access;
mod cancel;
mod constants;
mod context;
mod op;
mod scheduler;
mod status;
mod stream;

pub mod testing;

pub use access::{AccessMode, CreationMode};
pub use cancel::CancelToken;
pub use context::IoContext;
pub use status::{Result, Status};
pub use stream::{FileStream, ReadSome, WriteSome};

pub(crate) use constants::ERR_POISONED_LOCK;

#[cfg(target_os = "linux")]
mod uring;
#[cfg(target_os = "linux")]
pub(crate) use uring as platform;

#[cfg(windows)]
mod iocp;
#[cfg(windows)]
pub(crate) use iocp as platform;

#[cfg(target_os = "macos")]
mod gcd;
#[cfg(target_os = "macos")]
pub(crate) use gcd as platform;
