// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Testing file consumers with the mock stream.
//!
//! The mock completes synchronously against staged data: `provide` feeds
//! reads, `expect` validates writes, and the strict `close` turns unmet
//! expectations into a test failure through the [`Fuse`].

use fileio::testing::{Fuse, MockFileStream};
use fileio::{AccessMode, CreationMode, Status};

fn main() {
    let fuse = Fuse::new();
    let mut mock = MockFileStream::new(&fuse);
    mock.open("virtual.txt", AccessMode::READ_WRITE, CreationMode::OpenExisting);

    mock.provide("response bytes");
    mock.expect("request bytes");

    // Mock operations never suspend, so a single poll resolves them.
    futures_block_on(async {
        let (status, n) = mock.write_some(b"request bytes").await;
        println!("write: {status}, {n} bytes");

        let mut buf = [0_u8; 32];
        let (status, n) = mock.read_some(&mut buf).await;
        println!("read: {status}, {:?}", String::from_utf8_lossy(&buf[..n]));
    });

    // All staged data was consumed, so the strict close passes.
    assert_eq!(mock.close(), Status::Success);
    assert!(!fuse.is_failed());
    println!("expectations met");
}

fn futures_block_on<F: Future>(future: F) -> F::Output {
    let waker = std::task::Waker::noop();
    let mut cx = std::task::Context::from_waker(waker);
    let mut future = std::pin::pin!(future);
    match future.as_mut().poll(&mut cx) {
        std::task::Poll::Ready(output) => output,
        std::task::Poll::Pending => unreachable!("mock operations complete synchronously"),
    }
}
