// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Basic file stream read and write operations.
//!
//! Demonstrates opening a [`FileStream`] on an [`IoContext`], writing
//! bytes, and reading them back through the completion engine.

use fileio::{AccessMode, CreationMode, FileStream, IoContext, Status};

fn main() {
    let ctx = IoContext::new().expect("completion engine unavailable");
    let tmp = std::env::temp_dir().join("fileio_basic_example.txt");

    ctx.block_on(async {
        // Write a file.
        let file = FileStream::new(&ctx);
        let status = file.open(&tmp, AccessMode::WRITE_ONLY, CreationMode::CreateAlways);
        assert!(status.is_ok(), "open failed: {status}");

        let (status, n) = file.write_some(b"Hello, world!\n").await;
        println!("write: {status}, {n} bytes");
        file.close();

        // Read it back.
        let file = FileStream::new(&ctx);
        let status = file.open(&tmp, AccessMode::READ_ONLY, CreationMode::OpenExisting);
        assert!(status.is_ok(), "open failed: {status}");

        let mut buf = [0_u8; 64];
        let (status, n) = file.read_some(&mut buf).await;
        println!(
            "read: {status}, {n} bytes: {:?}",
            String::from_utf8_lossy(&buf[..n])
        );

        // A second read at the end of the file reports EOF as a status.
        let (status, n) = file.read_some(&mut buf).await;
        assert_eq!(status, Status::Eof);
        assert_eq!(n, 0);

        file.close();
    });

    let _ = std::fs::remove_file(&tmp);
}
