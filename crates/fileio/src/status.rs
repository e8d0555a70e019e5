// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// The canonical completion status of a file stream operation.
///
/// Every asynchronous operation resolves to a `(Status, usize)` pair; errors
/// are never propagated across the async boundary by any other means. The
/// platform-specific completion engines all converge onto this one type: the
/// completion mapper is the single place where native result encodings
/// (IOCP error codes, io_uring `-errno` results, dispatch error ints) are
/// translated.
///
/// # Thread safety
///
/// This type is thread-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Status {
    /// Normal completion. For reads and writes the byte count accompanying
    /// this status is the exact count the completion engine reported.
    #[error("success")]
    Success,

    /// A read completed with zero bytes transferred and no native error.
    ///
    /// Subsequent reads keep returning `Eof` until `seek` moves the stream
    /// position back into a valid range.
    #[error("end of file")]
    Eof,

    /// The operation was canceled, either through a [`CancelToken`][1] or
    /// via [`FileStream::cancel`][2]. The stream position is unchanged.
    ///
    /// [1]: crate::CancelToken
    /// [2]: crate::FileStream::cancel
    #[error("operation canceled")]
    Canceled,

    /// The operation was invoked on a stream that has no open file.
    #[error("bad file descriptor")]
    BadFileDescriptor,

    /// Any other nonzero native error, preserved with its native code
    /// (`errno` on POSIX, a Win32 error code on Windows).
    #[error("os error {0}")]
    Os(i32),

    /// A staged expectation of the test-time mock stream was violated.
    /// Never produced by the real stream.
    #[error("test expectation mismatch")]
    TestFailure,
}

impl Status {
    /// Whether this status represents a normal completion.
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Whether this status represents anything other than a normal completion.
    #[must_use]
    pub const fn is_err(self) -> bool {
        !self.is_ok()
    }

    /// Maps a native error code into the canonical status space.
    ///
    /// The cancellation indications of all three completion engines funnel
    /// through here (`ECANCELED` on POSIX, `ERROR_OPERATION_ABORTED` on
    /// Windows); everything else is preserved verbatim in [`Status::Os`].
    #[must_use]
    pub fn from_os_error(code: i32) -> Self {
        if code == 0 {
            return Self::Success;
        }
        Self::from_nonzero_os_error(code)
    }

    #[cfg(unix)]
    fn from_nonzero_os_error(code: i32) -> Self {
        match code {
            libc::ECANCELED => Self::Canceled,
            libc::EBADF => Self::BadFileDescriptor,
            other => Self::Os(other),
        }
    }

    #[cfg(windows)]
    fn from_nonzero_os_error(code: i32) -> Self {
        use windows_sys::Win32::Foundation::{
            ERROR_HANDLE_EOF, ERROR_INVALID_HANDLE, ERROR_OPERATION_ABORTED,
        };

        #[expect(
            clippy::cast_sign_loss,
            reason = "Win32 error codes are small positive values"
        )]
        let native = code as u32;
        match native {
            ERROR_OPERATION_ABORTED => Self::Canceled,
            ERROR_INVALID_HANDLE => Self::BadFileDescriptor,
            ERROR_HANDLE_EOF => Self::Eof,
            _ => Self::Os(code),
        }
    }

    /// Captures the current `errno` / `GetLastError` value as a status.
    #[must_use]
    pub fn last_os_error() -> Self {
        let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Self::from_os_error(code)
    }
}

/// A specialized `Result` for fallible non-I/O entry points such as
/// [`IoContext::new`](crate::IoContext::new).
pub type Result<T> = std::result::Result<T, Status>;

impl From<std::io::Error> for Status {
    fn from(value: std::io::Error) -> Self {
        value
            .raw_os_error()
            .map_or(Self::Os(-1), Self::from_os_error)
    }
}
