// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Absolute-position reads with `seek`/`tell`.
//!
//! Every read submits the stream's logical position as an explicit
//! offset, so seeking never touches the kernel's file cursor and
//! positions compose predictably.

use fileio::{AccessMode, CreationMode, FileStream, IoContext};

fn main() {
    let ctx = IoContext::new().expect("completion engine unavailable");
    let tmp = std::env::temp_dir().join("fileio_positional_example.txt");

    ctx.block_on(async {
        let file = FileStream::new(&ctx);
        file.open(&tmp, AccessMode::READ_WRITE, CreationMode::CreateAlways);

        file.write_some(b"0123456789").await;

        // Jump to offset 5 and read three bytes.
        file.seek(5);
        let mut buf = [0_u8; 3];
        let (status, n) = file.read_some(&mut buf).await;
        println!("at 5: {status}, {:?}", &buf[..n]); // "567"

        // The position advanced by exactly the bytes read.
        assert_eq!(file.tell(), 8);

        // Rewind and read the prefix.
        file.seek(0);
        let (status, n) = file.read_some(&mut buf).await;
        println!("at 0: {status}, {:?}", &buf[..n]); // "012"

        file.close();
    });

    let _ = std::fs::remove_file(&tmp);
}
