// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The Grand Central Dispatch engine (macOS).
//!
//! The service owns one concurrent dispatch queue. Each open file carries
//! a `dispatch_io` channel created in random-access mode with a low-water
//! mark of one byte; reads and writes are submitted against the channel
//! with the captured absolute offset, and their completion blocks post the
//! finished record back to the scheduler from the queue's threads.
//!
//! `cancel` closes the channel with `DISPATCH_IO_STOP`, which aborts
//! pending I/O only: the next submission lazily re-creates a channel from
//! the still-open descriptor, so a canceled stream remains usable.

mod service;
mod state;

pub(crate) use service::{FileService, ServiceShared};
pub(crate) use state::FileState;
