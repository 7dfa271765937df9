// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Main application entry point for `vfd`, the SR-IOV virtual function
//! configuration daemon.
//!
//! The daemon keeps a model of the VFs configured on each managed port.
//! Clients ask for VFs to be added or removed by writing requests to a fifo;
//! each request names a VF configuration file, which is validated against the
//! model before any change is made.  Everything runs on the main thread, with
//! a second thread forwarding signals.

use std::sync::mpsc;

use anyhow::Context;
use libc::c_int;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGQUIT;
use signal_hook::consts::SIGTERM;
use signal_hook::iterator::Signals;
use slog::error;
use slog::info;
use structopt::StructOpt;

use crate::config::Config;
use crate::diag::ModelDiagnostics;
use crate::dispatch::Dispatcher;
use crate::reconcile::ModelReconciler;
use crate::request::RequestFifo;
use crate::store::ConfigStore;
use common::logging::Verbosity;

mod admit;
mod config;
mod descriptor;
mod diag;
mod dispatch;
mod reconcile;
mod remove;
mod request;
mod response;
mod store;
mod types;

#[derive(Debug, Default, StructOpt)]
#[structopt(name = "vfd", about = "SR-IOV virtual function configuration daemon")]
pub(crate) struct Opt {
    #[structopt(
        long,
        short = "p",
        help = "TOML file holding the daemon's parameters and port list"
    )]
    parms: Option<String>,

    #[structopt(
        long,
        about = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        about = "log format",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<common::logging::LogFormat>,

    #[structopt(
        long,
        short = "v",
        help = "baseline verbosity: 0 (warnings) through 3 (trace)"
    )]
    verbosity: Option<i32>,

    #[structopt(long, help = "path of the fifo on which requests arrive")]
    fifo: Option<String>,

    #[structopt(long, help = "directory holding the VF configuration files")]
    config_dir: Option<String>,

    #[structopt(
        long,
        help = "rename, rather than remove, the files of deleted VFs"
    )]
    keep_deleted: bool,

    #[structopt(long, short = "n", help = "don't touch the hardware")]
    no_harm: bool,

    #[structopt(
        long,
        help = "milliseconds to sleep when no request is pending"
    )]
    idle_interval_ms: Option<u64>,
}

enum Messages {
    Dump,
    Exit,
}

fn handle_signals(
    log: slog::Logger,
    mut signals: Signals,
    tx: mpsc::Sender<Messages>,
) {
    for signal in signals.forever() {
        let msg = match signal {
            SIGTERM | SIGQUIT | SIGINT => Messages::Exit,
            SIGHUP => Messages::Dump,
            _ => continue,
        };
        info!(log, "received signal"; "sig" => signal);
        let exit = matches!(msg, Messages::Exit);
        if tx.send(msg).is_err() || exit {
            return;
        }
    }
}

fn run_vfd(
    log: slog::Logger,
    config: Config,
    verbosity: Verbosity,
) -> anyhow::Result<()> {
    let mut store = ConfigStore::new(&log);
    store.add_ports(&config.ports);

    let admit_log = log.new(slog::o!("unit" => "admit"));
    admit::add_all_vfs(&mut store, &admit_log, &config.config_dir);

    let mut dispatcher = Dispatcher::new(
        &log,
        &config,
        store,
        Box::new(ModelReconciler::new(&log, config.no_harm)),
        Box::new(ModelDiagnostics::new(&log)),
        verbosity,
    );
    dispatcher
        .reconcile()
        .context("configuring restored VFs")?;

    let mut fifo = RequestFifo::create(&log, &config.fifo_path)
        .context("opening the request fifo")?;

    const SIGNALS: &[c_int] = &[SIGTERM, SIGQUIT, SIGINT, SIGHUP];
    let signals = Signals::new(SIGNALS).context("installing signal handlers")?;
    let signal_log = log.clone();
    let (tx, rx) = mpsc::channel();
    let handler =
        std::thread::spawn(move || handle_signals(signal_log, signals, tx));

    info!(log, "ready";
        "ports" => dispatcher.store().ports().len(),
        "fifo" => fifo.path().display().to_string());

    loop {
        // Keep draining the fifo while requests are arriving, and only sleep
        // once it's empty.
        let idle = if dispatcher.service(&mut fifo) {
            std::time::Duration::ZERO
        } else {
            config.idle_interval
        };

        match rx.recv_timeout(idle) {
            Ok(Messages::Dump) => dispatcher.dump(),
            Ok(Messages::Exit) => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                error!(log, "signal handler shut down");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    info!(log, "shutting down");
    let _ = handler.join();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opts = Opt::from_args();
    let config = config::build_config(&opts).context("building config")?;
    let verbosity = Verbosity::new(config.verbosity);
    let log = common::logging::init(
        "vfd",
        &config.log_file,
        config.log_format,
        &verbosity,
    )?;
    info!(log, "vfd starting";
        "version" => dispatch::VERSION,
        "no_harm" => config.no_harm,
        "config_dir" => config.config_dir.display().to_string());

    run_vfd(log, config, verbosity)
}

#[cfg(test)]
mod test_util {
    use slog::Drain;

    pub fn logger() -> slog::Logger {
        let decorator =
            slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        slog::Logger::root(drain, slog::o!())
    }
}
