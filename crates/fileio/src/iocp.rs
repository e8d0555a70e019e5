// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The I/O completion port engine (Windows).
//!
//! Files are opened with `FILE_FLAG_OVERLAPPED` and associated with the
//! context's completion port at open time. Each operation record embeds a
//! pinned `OVERLAPPED` block whose offset fields carry the captured
//! logical position; the port hands the block's address back on
//! completion, which is how records are recovered.

mod service;
mod state;

pub(crate) use service::{FileService, ServiceShared};
pub(crate) use state::FileState;
