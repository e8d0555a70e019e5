// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::ops::BitOr;

/// File access mode, a bit set over read and write permission.
///
/// Only the two defined bits exist; combining [`READ_ONLY`][Self::READ_ONLY]
/// and [`WRITE_ONLY`][Self::WRITE_ONLY] with `|` yields
/// [`READ_WRITE`][Self::READ_WRITE].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMode(u8);

impl AccessMode {
    const READ_BIT: u8 = 1;
    const WRITE_BIT: u8 = 2;

    /// Open for reading.
    pub const READ_ONLY: Self = Self(Self::READ_BIT);

    /// Open for writing.
    pub const WRITE_ONLY: Self = Self(Self::WRITE_BIT);

    /// Open for reading and writing.
    pub const READ_WRITE: Self = Self(Self::READ_BIT | Self::WRITE_BIT);

    /// Whether the read bit is set.
    #[must_use]
    pub const fn is_readable(self) -> bool {
        self.0 & Self::READ_BIT != 0
    }

    /// Whether the write bit is set.
    #[must_use]
    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITE_BIT != 0
    }

    /// Translates the access bits into POSIX `open(2)` flags.
    #[cfg(unix)]
    pub(crate) const fn to_posix_flags(self) -> i32 {
        if self.is_readable() && self.is_writable() {
            libc::O_RDWR
        } else if self.is_writable() {
            libc::O_WRONLY
        } else {
            libc::O_RDONLY
        }
    }

    /// Translates the access bits into `CreateFileW` desired-access flags.
    #[cfg(windows)]
    pub(crate) const fn to_desired_access(self) -> u32 {
        use windows_sys::Win32::Foundation::{GENERIC_READ, GENERIC_WRITE};

        let mut access = 0;
        if self.is_readable() {
            access |= GENERIC_READ;
        }
        if self.is_writable() {
            access |= GENERIC_WRITE;
        }
        access
    }
}

impl BitOr for AccessMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// File creation disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationMode {
    /// Open an existing file; fail if it does not exist.
    #[default]
    OpenExisting,

    /// Create a new file; fail if it already exists.
    CreateNew,

    /// Create a new file, truncating any existing one.
    CreateAlways,

    /// Open an existing file or create a new one.
    OpenAlways,
}

impl CreationMode {
    /// Default permissions applied when a file is created: `rw-r--r--`.
    #[cfg(unix)]
    pub(crate) const DEFAULT_CREATE_MODE: u32 = 0o644;

    /// Translates the disposition into POSIX `open(2)` flags.
    #[cfg(unix)]
    pub(crate) const fn to_posix_flags(self) -> i32 {
        match self {
            // No additional flags - the file must exist.
            Self::OpenExisting => 0,
            Self::CreateNew => libc::O_CREAT | libc::O_EXCL,
            Self::CreateAlways => libc::O_CREAT | libc::O_TRUNC,
            Self::OpenAlways => libc::O_CREAT,
        }
    }

    /// Translates the disposition into a `CreateFileW` creation disposition.
    #[cfg(windows)]
    pub(crate) const fn to_creation_disposition(self) -> u32 {
        use windows_sys::Win32::Storage::FileSystem::{
            CREATE_ALWAYS, CREATE_NEW, OPEN_ALWAYS, OPEN_EXISTING,
        };

        match self {
            Self::OpenExisting => OPEN_EXISTING,
            Self::CreateNew => CREATE_NEW,
            Self::CreateAlways => CREATE_ALWAYS,
            Self::OpenAlways => OPEN_ALWAYS,
        }
    }
}
