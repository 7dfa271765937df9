// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Named pipe helpers, and the framing used to pull whole JSON messages out
//! of the byte stream a pipe delivers.

use std::ffi::CString;
use std::fs::File;
use std::fs::OpenOptions;
use std::fs::Permissions;
use std::io;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

// A sender that never completes a message shouldn't be able to make us
// buffer without bound.
const MAX_FRAME: usize = 64 * 1024;

/// Create a fifo at `path` with the given mode.  An existing fifo is reused;
/// any other kind of file at that path is an error.
pub fn create(path: &Path, mode: u32) -> io::Result<()> {
    match std::fs::metadata(path) {
        Ok(md) if md.file_type().is_fifo() => return Ok(()),
        Ok(_) => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a fifo", path.display()),
            ))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: cpath is a valid nul-terminated string that outlives the call.
    if unsafe { libc::mkfifo(cpath.as_ptr(), mode as libc::mode_t) } < 0 {
        return Err(io::Error::last_os_error());
    }

    // mkfifo() is subject to the umask; set the mode we were asked for.
    std::fs::set_permissions(path, Permissions::from_mode(mode))
}

/// Open a fifo for reading without blocking.  The fifo is opened read/write
/// so that it never reports end-of-file when the last writer goes away.
pub fn open_reader(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Open a fifo for writing without blocking.  This fails immediately with
/// ENXIO if nobody has the fifo open for reading, and with `InvalidInput` if
/// the path names anything other than a fifo.
pub fn open_writer(path: &Path) -> io::Result<File> {
    let file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;
    // Checked on the open handle, so a swapped path can't slip past.
    if !file.metadata()?.file_type().is_fifo() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a fifo", path.display()),
        ));
    }
    Ok(file)
}

/// Accumulates bytes from a stream and splits them into complete JSON values.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    // Length of the incomplete value seen by the last call to next_frame(),
    // or zero.
    stale: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        FrameBuffer::default()
    }

    /// Pull everything currently available from a non-blocking reader.
    /// Returns the number of bytes added to the buffer.
    pub fn fill<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];
        let mut total = 0;
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Append bytes directly.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.iter().all(|b| b.is_ascii_whitespace())
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.stale = 0;
    }

    /// Remove and return the bytes of the first complete JSON value in the
    /// buffer.  Returns `Ok(None)` if the buffer holds only whitespace or a
    /// partial value.  If an earlier partial value is followed by bytes that
    /// can't continue it, the partial value is dropped and framing resumes
    /// with the bytes that followed.  Otherwise, if the buffer can't be the
    /// start of a valid value, it is discarded and the parse error returned.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, serde_json::Error> {
        loop {
            let Some(start) =
                self.buf.iter().position(|b| !b.is_ascii_whitespace())
            else {
                self.clear();
                return Ok(None);
            };

            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf[start..])
                    .into_iter::<serde::de::IgnoredAny>();
            match stream.next() {
                None => {
                    self.clear();
                    return Ok(None);
                }
                Some(Ok(_)) => {
                    let end = start + stream.byte_offset();
                    let frame = self.buf[start..end].to_vec();
                    self.buf.drain(..end);
                    self.stale = 0;
                    return Ok(Some(frame));
                }
                Some(Err(e)) if e.is_eof() && self.buf.len() < MAX_FRAME => {
                    self.stale = self.buf.len();
                    return Ok(None);
                }
                // The sender of the partial value went away, and another
                // sender's message followed it.
                Some(Err(_))
                    if self.stale > 0 && self.stale < self.buf.len() =>
                {
                    self.buf.drain(..self.stale);
                    self.stale = 0;
                }
                Some(Err(e)) => {
                    self.clear();
                    return Err(e);
                }
            }
        }
    }
}
