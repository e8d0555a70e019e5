// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
#![allow(missing_docs, reason = "Tests")]
#![allow(clippy::assertions_on_result_states, reason = "Tests")]

use std::path::{Path, PathBuf};

use fileio::{AccessMode, CancelToken, CreationMode, FileStream, IoContext, Status};
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn setup() -> (TempDir, IoContext) {
    let tmp = TempDir::new().unwrap();
    let ctx = IoContext::new().expect("completion engine unavailable");
    (tmp, ctx)
}

fn scratch(tmp: &TempDir, name: &str) -> PathBuf {
    tmp.path().join(name)
}

/// Writes `data` through the stream API and closes the file.
fn write_file(ctx: &IoContext, path: &Path, data: &[u8]) {
    ctx.block_on(async {
        let file = FileStream::new(ctx);
        let status = file.open(path, AccessMode::WRITE_ONLY, CreationMode::CreateAlways);
        assert!(status.is_ok(), "open for write failed: {status}");

        let mut written = 0;
        while written < data.len() {
            let (status, n) = file.write_some(&data[written..]).await;
            assert!(status.is_ok(), "write failed: {status}");
            written += n;
        }

        file.close();
    });
}

// ===========================================================================
// End-to-end read/write scenarios
// ===========================================================================

mod read_write {
    use super::*;

    #[test]
    fn write_then_read_round_trip() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_file.txt");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            let status = file.open(&path, AccessMode::WRITE_ONLY, CreationMode::CreateAlways);
            assert!(status.is_ok());

            let data = b"Test content\n";
            let (status, n) = file.write_some(data).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, data.len());

            file.close();
        });

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            let status = file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);
            assert!(status.is_ok());

            let mut buf = [0_u8; 100];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 13);
            assert_eq!(&buf[..n], b"Test content\n");

            file.close();
        });
    }

    #[test]
    fn sequential_reads_track_position() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_seq.txt");
        write_file(&ctx, &path, b"0123456789ABCDEF");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

            let mut buf = [0_u8; 4];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 4);
            assert_eq!(&buf, b"0123");

            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 4);
            assert_eq!(&buf, b"4567");

            assert_eq!(file.tell(), 8);
            file.close();
        });
    }

    #[test]
    fn random_access_with_seek() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_seek.txt");
        write_file(&ctx, &path, b"0123456789");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

            file.seek(5);
            assert_eq!(file.tell(), 5);

            let mut buf = [0_u8; 3];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 3);
            assert_eq!(&buf, b"567");

            file.seek(0);
            assert_eq!(file.tell(), 0);

            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 3);
            assert_eq!(&buf, b"012");

            file.close();
        });
    }

    #[test]
    fn read_write_mode_round_trip() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_rw.txt");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            let status = file.open(&path, AccessMode::READ_WRITE, CreationMode::CreateAlways);
            assert!(status.is_ok());

            let data = b"Initial data";
            let (status, written) = file.write_some(data).await;
            assert_eq!(status, Status::Success);
            assert_eq!(written, data.len());

            file.seek(0);

            let mut buf = [0_u8; 20];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, data.len());
            assert_eq!(&buf[..n], data);

            file.close();
        });
    }

    #[test]
    fn partial_read_returns_available_bytes() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_partial.txt");
        write_file(&ctx, &path, b"ABC");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

            // Buffer larger than the file: the read returns what exists.
            let mut buf = [0_u8; 10];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 3);
            assert_eq!(&buf[..3], b"ABC");

            file.close();
        });
    }
}

// ===========================================================================
// EOF semantics
// ===========================================================================

mod eof {
    use super::*;

    #[test]
    fn second_read_past_end_is_eof() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_eof.txt");
        write_file(&ctx, &path, b"ABC");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

            let mut buf = [0_u8; 10];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 3);

            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Eof);
            assert_eq!(n, 0);

            // EOF leaves the position unchanged, and reads keep
            // returning EOF until a seek moves it back.
            assert_eq!(file.tell(), 3);
            let (status, _) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Eof);

            file.seek(0);
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 3);

            file.close();
        });
    }

    #[test]
    fn seek_past_end_then_read_is_eof() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_eof_seek.txt");
        write_file(&ctx, &path, b"short");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

            file.seek(1000);
            let mut buf = [0_u8; 10];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Eof);
            assert_eq!(n, 0);
            assert_eq!(file.tell(), 1000);

            file.close();
        });
    }
}

// ===========================================================================
// Size query
// ===========================================================================

mod size {
    use super::*;

    #[test]
    fn reports_written_length() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_size.txt");
        write_file(&ctx, &path, &[b'X'; 1024]);

        let file = FileStream::new(&ctx);
        file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

        let (status, size) = file.size();
        assert_eq!(status, Status::Success);
        assert_eq!(size, 1024);

        file.close();
    }

    #[test]
    fn closed_stream_is_bad_file_descriptor() {
        let (_tmp, ctx) = setup();

        let file = FileStream::new(&ctx);
        let (status, size) = file.size();
        assert_eq!(status, Status::BadFileDescriptor);
        assert_eq!(size, 0);
    }
}

// ===========================================================================
// Open/close lifecycle
// ===========================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn open_nonexistent_fails() {
        let (_tmp, ctx) = setup();

        let file = FileStream::new(&ctx);
        let status = file.open(
            "/no/such/path/file.txt",
            AccessMode::READ_ONLY,
            CreationMode::OpenExisting,
        );
        assert!(status.is_err());
        assert!(!file.is_open());
    }

    #[test]
    fn create_new_fails_when_file_exists() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "exists.txt");
        write_file(&ctx, &path, b"x");

        let file = FileStream::new(&ctx);
        let status = file.open(&path, AccessMode::WRITE_ONLY, CreationMode::CreateNew);
        assert!(status.is_err());
    }

    #[test]
    fn open_always_creates_missing_file() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "fresh.txt");

        let file = FileStream::new(&ctx);
        let status = file.open(&path, AccessMode::WRITE_ONLY, CreationMode::OpenAlways);
        assert!(status.is_ok());
        assert!(file.is_open());
        file.close();
    }

    #[test]
    fn close_is_idempotent_and_rewinds() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_close.txt");
        write_file(&ctx, &path, b"data");

        let file = FileStream::new(&ctx);
        file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);
        file.seek(2);

        file.close();
        assert!(!file.is_open());
        assert_eq!(file.tell(), 0);

        // Second close is a no-op.
        file.close();
        assert!(!file.is_open());
    }

    #[test]
    fn reopen_resets_position() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_reopen.txt");
        write_file(&ctx, &path, b"0123456789");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

            let mut buf = [0_u8; 4];
            file.read_some(&mut buf).await;
            assert_eq!(file.tell(), 4);

            // Re-opening closes the previous handle and rewinds.
            let status = file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);
            assert!(status.is_ok());
            assert_eq!(file.tell(), 0);

            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 4);
            assert_eq!(&buf, b"0123");

            file.close();
        });
    }

    #[test]
    fn drop_closes_the_file() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_drop.txt");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::WRITE_ONLY, CreationMode::CreateAlways);
            let (status, n) = file.write_some(b"persisted").await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 9);
            // No explicit close: dropping the stream must close the file.
        });

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            let status = file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);
            assert!(status.is_ok());

            let mut buf = [0_u8; 20];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(&buf[..n], b"persisted");
        });
    }

    #[test]
    fn seek_tell_round_trip() {
        let (_tmp, ctx) = setup();

        let file = FileStream::new(&ctx);
        file.seek(12345);
        assert_eq!(file.tell(), 12345);
    }

    #[test]
    fn read_on_closed_stream_is_bad_file_descriptor() {
        let (_tmp, ctx) = setup();

        ctx.block_on(async {
            let file = FileStream::new(&ctx);

            let mut buf = [0_u8; 8];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::BadFileDescriptor);
            assert_eq!(n, 0);

            let (status, n) = file.write_some(b"x").await;
            assert_eq!(status, Status::BadFileDescriptor);
            assert_eq!(n, 0);
        });
    }
}

// ===========================================================================
// Empty-buffer short-circuit
// ===========================================================================

mod empty_buffer {
    use super::*;

    #[test]
    fn empty_read_completes_with_success() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_empty_read.txt");
        write_file(&ctx, &path, b"irrelevant");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

            // Zero-length request: no system call, success with zero
            // bytes even though the position sits at data.
            let mut buf = [0_u8; 0];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 0);
            assert_eq!(file.tell(), 0);

            file.close();
        });
    }

    #[test]
    fn empty_write_completes_with_success() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_empty_write.txt");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::WRITE_ONLY, CreationMode::CreateAlways);

            let (status, n) = file.write_some(&[]).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 0);
            assert_eq!(file.tell(), 0);

            file.close();
        });
    }
}

// ===========================================================================
// Cancellation
// ===========================================================================

mod cancel {
    use super::*;

    #[test]
    fn cancel_with_nothing_pending_is_a_no_op() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_cancel_idle.txt");
        write_file(&ctx, &path, b"data");

        let file = FileStream::new(&ctx);
        file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);
        file.cancel();
        assert!(file.is_open());
        file.close();
    }

    #[test]
    fn token_fired_after_completion_changes_nothing() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_cancel_late.txt");
        write_file(&ctx, &path, b"0123456789");

        let token = CancelToken::new();
        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

            let mut buf = [0_u8; 4];
            let (status, n) = file.read_some_with(&mut buf, &token).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 4);

            file.close();
        });

        // The subscription was released on completion; firing now must
        // not disturb the next operation.
        token.cancel();

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);
            let mut buf = [0_u8; 4];
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(n, 4);
            file.close();
        });
    }
}

// ===========================================================================
// Lifetime safety of in-flight operations
// ===========================================================================

mod in_flight {
    use super::*;

    #[test]
    fn dropping_a_submitted_read_reclaims_the_buffer() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_drop_mid_flight.txt");
        write_file(&ctx, &path, b"some file content");

        let file = FileStream::new(&ctx);
        file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);

        let mut buf = [0_u8; 32];
        {
            let mut read = std::pin::pin!(file.read_some(&mut buf));

            // Establish the suspension point and submit, then abandon the
            // future. Its destructor must not return until the kernel has
            // let go of the buffer.
            let waker = std::task::Waker::noop();
            let mut cx = std::task::Context::from_waker(waker);
            assert!(read.as_mut().poll(&mut cx).is_pending());
        }

        // The slot is reusable and the stream still works.
        ctx.block_on(async {
            file.seek(0);
            let (status, n) = file.read_some(&mut buf).await;
            assert_eq!(status, Status::Success);
            assert_eq!(&buf[..n], b"some file content");
        });

        file.close();
    }

    #[test]
    fn dropping_stream_and_context_with_nothing_pending_is_clean() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_teardown.txt");
        write_file(&ctx, &path, b"bytes");

        let file = FileStream::new(&ctx);
        file.open(&path, AccessMode::READ_ONLY, CreationMode::OpenExisting);
        assert_eq!(ctx.outstanding_work(), 0);

        drop(file);
        drop(ctx);
    }
}

// ===========================================================================
// Concurrent read + write on one stream
// ===========================================================================

mod concurrent {
    use super::*;

    #[test]
    fn read_and_write_may_be_in_flight_together() {
        let (tmp, ctx) = setup();
        let path = scratch(&tmp, "test_concurrent.txt");
        write_file(&ctx, &path, b"AAAABBBB");

        ctx.block_on(async {
            let file = FileStream::new(&ctx);
            file.open(&path, AccessMode::READ_WRITE, CreationMode::OpenExisting);

            // One read and one write outstanding at once; both complete.
            let mut rbuf = [0_u8; 4];
            let read = file.read_some(&mut rbuf);
            let write = file.write_some(b"CCCC");

            let ((rs, rn), (ws, wn)) = futures_join(read, write).await;
            assert_eq!(rs, Status::Success);
            assert_eq!(rn, 4);
            assert_eq!(ws, Status::Success);
            assert_eq!(wn, 4);

            file.close();
        });
    }

    /// Polls two futures to completion together (a minimal join, since
    /// this crate deliberately brings no executor dependencies).
    async fn futures_join<A: Future, B: Future>(a: A, b: B) -> (A::Output, B::Output) {
        let mut a = std::pin::pin!(a);
        let mut b = std::pin::pin!(b);
        let mut ra = None;
        let mut rb = None;
        std::future::poll_fn(move |cx| {
            if ra.is_none() {
                if let std::task::Poll::Ready(v) = a.as_mut().poll(cx) {
                    ra = Some(v);
                }
            }
            if rb.is_none() {
                if let std::task::Poll::Ready(v) = b.as_mut().poll(cx) {
                    rb = Some(v);
                }
            }
            if ra.is_some() && rb.is_some() {
                std::task::Poll::Ready((ra.take().unwrap(), rb.take().unwrap()))
            } else {
                std::task::Poll::Pending
            }
        })
        .await
    }
}
