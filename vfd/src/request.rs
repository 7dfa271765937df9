// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Receipt of requests on the daemon's fifo.

use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

use slog::debug;
use slog::error;
use slog::info;

use crate::types::VfdError;
use crate::types::VfdResult;
use common::fifo;
use common::fifo::FrameBuffer;
use common::logging::Verbosity;
use common::logging::VerbosityGuard;
use vfd_types::request::RequestKind;
use vfd_types::request::RequestMessage;
use vfd_types::request::UnknownAction;

const REQUEST_FIFO_MODE: u32 = 0o666;

/// A request which has been received and parsed, and is waiting to be
/// handled.  The verbosity level the client asked for stays in effect until
/// the request is dropped.
#[derive(Debug)]
pub struct Request {
    pub kind: RequestKind,
    pub resource: Option<String>,
    pub response_path: Option<PathBuf>,
    pub log_level: i32,
    _verbosity: VerbosityGuard,
}

impl Request {
    pub fn from_message(
        msg: RequestMessage,
        verbosity: &Verbosity,
    ) -> Result<Self, UnknownAction> {
        let kind = msg.kind()?;
        let resource = msg.resource().map(str::to_string);
        let log_level = msg.params.loglevel;
        Ok(Request {
            kind,
            resource,
            response_path: msg.params.r_fifo.map(PathBuf::from),
            log_level,
            _verbosity: verbosity.push(log_level),
        })
    }
}

/// Decode a single framed message.
pub fn parse_request(
    log: &slog::Logger,
    raw: &[u8],
    verbosity: &Verbosity,
) -> Option<Request> {
    let text = String::from_utf8_lossy(raw);
    let msg: RequestMessage = match serde_json::from_slice(raw) {
        Ok(msg) => msg,
        Err(e) => {
            error!(log, "unable to decode request";
                "raw" => %text,
                "error" => %e);
            return None;
        }
    };

    match Request::from_message(msg, verbosity) {
        Ok(req) => {
            debug!(log, "request received";
                "action" => %req.kind,
                "resource" => req.resource.as_deref(),
                "loglevel" => req.log_level,
                "raw" => %text);
            Some(req)
        }
        Err(e) => {
            error!(log, "{e}"; "raw" => %text);
            None
        }
    }
}

/// The fifo on which the daemon listens for requests.
pub struct RequestFifo {
    log: slog::Logger,
    path: PathBuf,
    file: File,
    frames: FrameBuffer,
}

impl RequestFifo {
    /// Create the fifo if necessary and open it for non-blocking reads.
    pub fn create(log: &slog::Logger, path: &Path) -> VfdResult<Self> {
        let log = log.new(slog::o!("unit" => "request"));
        let file = fifo::create(path, REQUEST_FIFO_MODE)
            .and_then(|_| fifo::open_reader(path))
            .map_err(|e| {
                VfdError::Other(format!(
                    "unable to create request fifo {}: {e}",
                    path.display()
                ))
            })?;
        info!(log, "listening for requests";
            "fifo" => path.display().to_string());
        Ok(RequestFifo {
            log,
            path: path.to_path_buf(),
            file,
            frames: FrameBuffer::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the next request if one is available.  Never blocks.  Malformed
    /// input is logged and discarded.
    pub fn read_request(&mut self, verbosity: &Verbosity) -> Option<Request> {
        if let Err(e) = self.frames.fill(&mut self.file) {
            error!(self.log, "read from request fifo failed"; "error" => %e);
            self.frames.clear();
            return None;
        }

        match self.frames.next_frame() {
            Ok(Some(frame)) => parse_request(&self.log, &frame, verbosity),
            Ok(None) => None,
            Err(e) => {
                error!(self.log, "discarding unparsable request data";
                    "error" => %e);
                None
            }
        }
    }
}
