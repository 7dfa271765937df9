// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Delivery of responses to the fifo named in each request.

use std::io;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use slog::debug;
use slog::trace;
use slog::warn;

use crate::types::VfdError;
use crate::types::VfdResult;
use common::fifo;
use vfd_types::response::Response;

/// Consecutive writes that may make no progress before we give up.
pub const WRITE_ATTEMPTS: u32 = 5;
pub const WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Write all of `buf`, tolerating a full pipe for a bounded number of
/// attempts.  Any forward progress restores the full attempt budget.
pub fn write_with_retry<W: Write>(
    w: &mut W,
    mut buf: &[u8],
    attempts: u32,
    backoff: Duration,
) -> io::Result<()> {
    let len = buf.len();
    let mut remaining = attempts;
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(n) if n > 0 => {
                buf = &buf[n..];
                remaining = attempts;
                continue;
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        remaining = remaining.saturating_sub(1);
        if remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!(
                    "write timed out attempting {len} bytes, but wrote only {} bytes",
                    len - buf.len()
                ),
            ));
        }
        std::thread::sleep(backoff);
    }
    Ok(())
}

/// Send a response to the client's fifo.  Fails immediately unless the path
/// is a fifo that somebody is reading.
pub fn deliver(
    log: &slog::Logger,
    path: &Path,
    response: &Response,
) -> VfdResult<()> {
    let mut body = serde_json::to_vec(response)
        .map_err(|e| VfdError::Internal(format!("encoding response: {e}")))?;
    body.push(b'\n');

    let mut file = fifo::open_writer(path).map_err(|e| {
        warn!(log, "unable to open response fifo";
            "path" => path.display().to_string(),
            "error" => %e);
        VfdError::Io(e)
    })?;

    trace!(log, "sending response";
        "path" => path.display().to_string(),
        "msg" => &response.msg);
    write_with_retry(&mut file, &body, WRITE_ATTEMPTS, WRITE_BACKOFF).map_err(
        |e| {
            warn!(log, "unable to write response";
                "path" => path.display().to_string(),
                "error" => %e);
            VfdError::Io(e)
        },
    )?;
    debug!(log, "response written";
        "path" => path.display().to_string(),
        "bytes" => body.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Read;

    // Replays a script of write outcomes.  A number is how many bytes the
    // write accepts; None is EWOULDBLOCK.
    struct Scripted {
        script: VecDeque<Option<usize>>,
        written: Vec<u8>,
        calls: usize,
    }

    impl Scripted {
        fn new(script: &[Option<usize>]) -> Self {
            Scripted {
                script: script.iter().copied().collect(),
                written: Vec::new(),
                calls: 0,
            }
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            match self.script.pop_front().unwrap_or(None) {
                Some(n) => {
                    let n = n.min(buf.len());
                    self.written.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    const NO_WAIT: Duration = Duration::from_millis(0);

    #[test]
    fn test_gives_up_after_five_stalls() {
        let mut w = Scripted::new(&[]);
        let e = write_with_retry(&mut w, b"hello", WRITE_ATTEMPTS, NO_WAIT)
            .unwrap_err();
        assert_eq!(e.kind(), io::ErrorKind::TimedOut);
        assert_eq!(w.calls, 5);
    }

    #[test]
    fn test_progress_resets_budget() {
        let mut w = Scripted::new(&[
            None,
            None,
            None,
            None,
            Some(2),
            None,
            None,
            None,
            None,
            Some(10),
        ]);
        write_with_retry(&mut w, b"hello", WRITE_ATTEMPTS, NO_WAIT).unwrap();
        assert_eq!(w.written, b"hello");
        assert_eq!(w.calls, 10);
    }

    #[test]
    fn test_zero_length_write_is_a_stall() {
        let mut w = Scripted::new(&[Some(0), Some(0), Some(0), Some(0), Some(0)]);
        assert!(write_with_retry(&mut w, b"x", WRITE_ATTEMPTS, NO_WAIT).is_err());
        assert_eq!(w.calls, 5);
    }

    #[test]
    fn test_deliver_without_reader() {
        let log = crate::test_util::logger();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply");
        fifo::create(&path, 0o600).unwrap();
        assert!(deliver(&log, &path, &Response::ok("pong")).is_err());
        assert!(deliver(&log, &dir.path().join("missing"), &Response::ok("x"))
            .is_err());
    }

    #[test]
    fn test_deliver_refuses_regular_file() {
        let log = crate::test_util::logger();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("passwd");
        let contents = b"root:x:0:0:root:/root:/bin/sh\n";
        std::fs::write(&path, contents).unwrap();

        match deliver(&log, &path, &Response::ok("pong")) {
            Err(VfdError::Io(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::InvalidInput)
            }
            other => panic!("expected an I/O error, got {other:?}"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), contents);
    }

    #[test]
    fn test_deliver() {
        let log = crate::test_util::logger();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply");
        fifo::create(&path, 0o600).unwrap();
        let mut reader = fifo::open_reader(&path).unwrap();

        let response = Response::error("100% of \"nothing\"");
        deliver(&log, &path, &response).unwrap();

        let mut buf = vec![0u8; 1024];
        let n = reader.read(&mut buf).unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.ends_with('\n'));
        let back: Response = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(back, response);
    }
}
