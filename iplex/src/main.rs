// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fs::Permissions;
use std::io::Read;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;
use std::time::Instant;

use anyhow::bail;
use anyhow::Context;
use structopt::*;

use common::fifo;
use common::fifo::FrameBuffer;
use vfd_types::request::RequestKind;
use vfd_types::request::RequestMessage;
use vfd_types::response::Response;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, StructOpt)]
#[structopt(
    name = "iplex",
    about = "submits requests to the VF configuration daemon"
)]
struct GlobalOpts {
    #[structopt(short, long, help = "the daemon's request fifo")]
    fifo: Option<String>,

    #[structopt(
        short,
        long,
        default_value = "5",
        help = "seconds to wait for a response"
    )]
    timeout: u64,

    #[structopt(
        short = "l",
        long = "loglevel",
        default_value = "0",
        help = "daemon verbosity while this request is handled"
    )]
    loglevel: i32,

    #[structopt(subcommand)]
    cmd: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    /// Check that the daemon is listening.
    Ping,
    /// Add the VF described by a configuration file.
    Add { file: String },
    /// Remove the VF described by a configuration file.
    Delete { file: String },
    /// Write the state of every port and VF to the daemon's log.
    Dump,
    /// Show statistics for all functions, or physical functions only.
    Show {
        #[structopt(default_value = "all", help = "'all' or 'pfs'")]
        what: String,
    },
    /// Change the daemon's verbosity.
    Verbose { level: i32 },
}

fn build_message(cmd: &Commands, loglevel: i32) -> RequestMessage {
    let msg = match cmd {
        Commands::Ping => RequestMessage::new(RequestKind::Ping),
        Commands::Add { file } => {
            RequestMessage::new(RequestKind::Add).with_resource(file)
        }
        Commands::Delete { file } => {
            RequestMessage::new(RequestKind::Delete).with_resource(file)
        }
        Commands::Dump => RequestMessage::new(RequestKind::Dump),
        Commands::Show { what } => {
            RequestMessage::new(RequestKind::Show).with_resource(what)
        }
        Commands::Verbose { level } => {
            return RequestMessage::new(RequestKind::SetVerbosity)
                .with_loglevel(*level)
        }
    };
    msg.with_loglevel(loglevel)
}

fn send(path: &Path, msg: &RequestMessage) -> anyhow::Result<()> {
    let mut body = serde_json::to_vec(msg)?;
    body.push(b'\n');
    let mut f = fifo::open_writer(path).with_context(|| {
        format!("vfd doesn't appear to be listening on {}", path.display())
    })?;
    f.write_all(&body).context("sending request")
}

// Poll the reply fifo until a complete response arrives or the deadline
// passes.
fn await_response<R: Read>(
    reader: &mut R,
    timeout: Duration,
) -> anyhow::Result<Response> {
    let deadline = Instant::now() + timeout;
    let mut frames = FrameBuffer::new();
    loop {
        frames.fill(reader).context("reading response")?;
        if let Some(frame) =
            frames.next_frame().context("malformed response")?
        {
            return serde_json::from_slice(&frame).context("malformed response");
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for a response from vfd");
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn submit(opts: &GlobalOpts) -> anyhow::Result<Response> {
    let request_fifo = opts
        .fifo
        .as_deref()
        .unwrap_or(common::DEFAULT_REQUEST_FIFO);

    let dir = tempfile::Builder::new()
        .prefix("iplex")
        .tempdir()
        .context("creating response directory")?;
    // The daemon may not share our uid
    std::fs::set_permissions(dir.path(), Permissions::from_mode(0o711))?;
    let reply_path = dir.path().join("response");
    fifo::create(&reply_path, 0o622).context("creating response fifo")?;
    let mut reply = fifo::open_reader(&reply_path)?;

    let msg = build_message(&opts.cmd, opts.loglevel)
        .with_reply_fifo(reply_path.display());
    send(Path::new(request_fifo), &msg)?;
    await_response(&mut reply, Duration::from_secs(opts.timeout))
}

fn main() -> anyhow::Result<()> {
    let opts = GlobalOpts::from_args();
    let response = submit(&opts)?;
    println!("{}", response.msg);
    if !response.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_messages() {
        let msg = build_message(&Commands::Add { file: "vf1.json".into() }, 2);
        assert_eq!(msg.kind(), Ok(RequestKind::Add));
        assert_eq!(msg.resource(), Some("vf1.json"));
        assert_eq!(msg.params.loglevel, 2);

        let msg = build_message(&Commands::Verbose { level: 3 }, 1);
        assert_eq!(msg.kind(), Ok(RequestKind::SetVerbosity));
        assert_eq!(msg.params.loglevel, 3);

        let msg = build_message(&Commands::Show { what: "pfs".into() }, 0);
        assert_eq!(msg.resource(), Some("pfs"));

        let msg = build_message(&Commands::Dump, 0);
        assert_eq!(msg.kind(), Ok(RequestKind::Dump));
    }

    #[test]
    fn test_await_response() {
        let mut r = Cursor::new(br#"{"state":"OK","msg":"pong: 0.1.0"}"#.to_vec());
        let response = await_response(&mut r, Duration::from_secs(1)).unwrap();
        assert!(response.is_ok());
        assert_eq!(response.msg, "pong: 0.1.0");
    }

    #[test]
    fn test_await_timeout() {
        let mut r = Cursor::new(br#"{"state":"OK","#.to_vec());
        assert!(await_response(&mut r, Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_send_without_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request");
        fifo::create(&path, 0o600).unwrap();
        let msg = RequestMessage::new(RequestKind::Ping);
        assert!(send(&path, &msg).is_err());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request");
        fifo::create(&path, 0o600).unwrap();
        let mut daemon = fifo::open_reader(&path).unwrap();

        let msg = RequestMessage::new(RequestKind::Ping).with_reply_fifo("/tmp/r");
        send(&path, &msg).unwrap();
        let got = await_raw(&mut daemon);
        assert_eq!(got, msg);
    }

    fn await_raw<R: Read>(reader: &mut R) -> RequestMessage {
        let mut frames = FrameBuffer::new();
        frames.fill(reader).unwrap();
        let frame = frames.next_frame().unwrap().unwrap();
        serde_json::from_slice(&frame).unwrap()
    }
}
