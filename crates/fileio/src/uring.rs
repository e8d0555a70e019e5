// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The io_uring completion engine (Linux).
//!
//! One ring per context, created at service initialization and registered
//! with the scheduler's epoll set so the context wakes when the completion
//! queue has entries. Files need no per-file registration; every read and
//! write is a submission-queue entry carrying the captured absolute offset
//! and a `user_data` pointer identifying its operation record.

mod service;
mod state;

pub(crate) use service::{FileService, ServiceShared};
pub(crate) use state::FileState;
