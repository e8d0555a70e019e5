// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
#![allow(missing_docs, reason = "Tests")]

use fileio::testing::{Fuse, MockFileStream};
use fileio::{AccessMode, CreationMode, Status};

fn open_mock(fuse: &Fuse) -> MockFileStream {
    let mut mock = MockFileStream::new(fuse);
    let status = mock.open("unused.txt", AccessMode::READ_WRITE, CreationMode::OpenExisting);
    assert_eq!(status, Status::Success);
    mock
}

/// Drives a mock operation to completion. Mock operations never suspend,
/// so a noop waker and a single poll suffice.
fn block_on<F: Future>(future: F) -> F::Output {
    let waker = std::task::Waker::noop();
    let mut cx = std::task::Context::from_waker(waker);
    let mut future = std::pin::pin!(future);
    match future.as_mut().poll(&mut cx) {
        std::task::Poll::Ready(output) => output,
        std::task::Poll::Pending => unreachable!("mock operations complete synchronously"),
    }
}

#[test]
fn provided_data_is_read_back() {
    let fuse = Fuse::new();
    let mut mock = open_mock(&fuse);
    mock.provide("Hello");

    block_on(async {
        let mut buf = [0_u8; 20];
        let (status, n) = mock.read_some(&mut buf).await;
        assert_eq!(status, Status::Success);
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"Hello");
    });

    assert_eq!(mock.close(), Status::Success);
    assert!(!fuse.is_failed());
}

#[test]
fn draining_past_provided_data_is_eof() {
    let fuse = Fuse::new();
    let mut mock = open_mock(&fuse);
    mock.provide("ab");

    block_on(async {
        let mut buf = [0_u8; 8];
        let (status, n) = mock.read_some(&mut buf).await;
        assert_eq!(status, Status::Success);
        assert_eq!(n, 2);

        let (status, n) = mock.read_some(&mut buf).await;
        assert_eq!(status, Status::Eof);
        assert_eq!(n, 0);
    });

    assert_eq!(mock.close(), Status::Success);
}

#[test]
fn expected_write_succeeds() {
    let fuse = Fuse::new();
    let mut mock = open_mock(&fuse);
    mock.expect("data");

    block_on(async {
        let (status, n) = mock.write_some(b"data").await;
        assert_eq!(status, Status::Success);
        assert_eq!(n, 4);
    });

    assert_eq!(mock.close(), Status::Success);
    assert!(!fuse.is_failed());
}

#[test]
fn mismatched_write_is_test_failure_and_fires_fuse() {
    let fuse = Fuse::new();
    let mut mock = open_mock(&fuse);
    mock.expect("data");

    block_on(async {
        let (status, n) = mock.write_some(b"DATA").await;
        assert_eq!(status, Status::TestFailure);
        assert_eq!(n, 0);
    });

    assert!(fuse.is_failed());
}

#[test]
fn expectation_consumed_across_multiple_writes() {
    let fuse = Fuse::new();
    let mut mock = open_mock(&fuse);
    mock.expect("hello world");

    block_on(async {
        let (status, n) = mock.write_some(b"hello ").await;
        assert_eq!(status, Status::Success);
        assert_eq!(n, 6);

        let (status, n) = mock.write_some(b"world").await;
        assert_eq!(status, Status::Success);
        assert_eq!(n, 5);
    });

    assert_eq!(mock.close(), Status::Success);
    assert!(!fuse.is_failed());
}

#[test]
fn close_with_leftover_provide_is_test_failure() {
    let fuse = Fuse::new();
    let mut mock = open_mock(&fuse);
    mock.provide("unread");

    assert_eq!(mock.close(), Status::TestFailure);
    assert!(fuse.is_failed());
}

#[test]
fn close_with_leftover_expect_is_test_failure() {
    let fuse = Fuse::new();
    let mut mock = open_mock(&fuse);
    mock.expect("unwritten");

    assert_eq!(mock.close(), Status::TestFailure);
    assert!(fuse.is_failed());
}

#[test]
fn close_without_open_is_success() {
    let fuse = Fuse::new();
    let mut mock = MockFileStream::new(&fuse);
    mock.provide("staged but never opened");

    assert_eq!(mock.close(), Status::Success);
    assert!(!fuse.is_failed());
}

#[test]
fn position_tracks_reads_and_writes() {
    let fuse = Fuse::new();
    let mut mock = open_mock(&fuse);
    mock.provide("abcdef");
    mock.expect("xy");

    block_on(async {
        let mut buf = [0_u8; 3];
        mock.read_some(&mut buf).await;
        assert_eq!(mock.tell(), 3);

        mock.write_some(b"xy").await;
        assert_eq!(mock.tell(), 5);

        mock.seek(0);
        assert_eq!(mock.tell(), 0);

        // Drain the remainder so close() passes.
        let mut rest = [0_u8; 3];
        mock.read_some(&mut rest).await;
    });

    assert_eq!(mock.close(), Status::Success);
}

#[test]
fn synthetic_file_size() {
    let fuse = Fuse::new();
    let mut mock = MockFileStream::new(&fuse);
    mock.set_file_size(4096);

    let (status, size) = mock.size();
    assert_eq!(status, Status::Success);
    assert_eq!(size, 4096);
}

#[test]
fn chunked_transfers_with_limits() {
    let fuse = Fuse::new();
    let mut mock = MockFileStream::with_limits(&fuse, 3, 2);
    mock.open("unused.txt", AccessMode::READ_WRITE, CreationMode::OpenExisting);
    mock.provide("abcdef");
    mock.expect("wxyz");

    block_on(async {
        let mut buf = [0_u8; 16];
        let (_, n) = mock.read_some(&mut buf).await;
        assert_eq!(n, 3);
        let (_, n) = mock.read_some(&mut buf).await;
        assert_eq!(n, 3);

        let (_, n) = mock.write_some(b"wxyz").await;
        assert_eq!(n, 2);
        let (_, n) = mock.write_some(b"yz").await;
        assert_eq!(n, 2);
    });

    assert_eq!(mock.close(), Status::Success);
    assert!(!fuse.is_failed());
}
