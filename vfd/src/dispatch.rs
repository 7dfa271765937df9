// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Routing of each request to its handler, and delivery of the result.

use std::path::PathBuf;

use slog::crit;
use slog::debug;
use slog::error;
use slog::info;

use crate::admit;
use crate::config::Config;
use crate::diag::Diagnostics;
use crate::diag::StatsScope;
use crate::reconcile::Reconcile;
use crate::remove;
use crate::request::Request;
use crate::request::RequestFifo;
use crate::response;
use crate::store::ConfigStore;
use common::logging::Verbosity;
use common::logging::VERBOSITY_TRACE;
use vfd_types::request::RequestKind;
use vfd_types::response::Response;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const NO_HARM_STATS: &str =
    "VFD running in 'no harm' (-n) mode; no stats available.";
const SPECIFIC_PF_STATS: &str =
    "show of specific PF is not supported in this release; use 'all' or 'pfs'.";
const MISSING_RESOURCE: &str = "missing resource (filename) in request";

pub struct Dispatcher {
    log: slog::Logger,
    store: ConfigStore,
    reconciler: Box<dyn Reconcile>,
    diag: Box<dyn Diagnostics>,
    verbosity: Verbosity,
    config_dir: PathBuf,
    keep_deleted: bool,
    no_harm: bool,
}

impl Dispatcher {
    pub fn new(
        log: &slog::Logger,
        config: &Config,
        store: ConfigStore,
        reconciler: Box<dyn Reconcile>,
        diag: Box<dyn Diagnostics>,
        verbosity: Verbosity,
    ) -> Self {
        Dispatcher {
            log: log.new(slog::o!("unit" => "dispatch")),
            store,
            reconciler,
            diag,
            verbosity,
            config_dir: config.config_dir.clone(),
            keep_deleted: config.keep_deleted,
            no_harm: config.no_harm,
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Bring the hardware in line with the store.  Used at startup, after
    /// the store has been populated from the configuration directory.
    pub fn reconcile(&mut self) -> crate::types::VfdResult<()> {
        self.reconciler.reconcile(&mut self.store)
    }

    /// Write the state of every device and VF to the log.
    pub fn dump(&self) {
        self.diag.dump_device_info(&self.store);
        self.diag.dump_sriov_state(&self.store);
    }

    /// Handle at most one pending request.  Returns true if a request was
    /// found.
    pub fn service(&mut self, fifo: &mut RequestFifo) -> bool {
        match fifo.read_request(&self.verbosity) {
            Some(req) => {
                self.dispatch(req);
                true
            }
            None => false,
        }
    }

    /// Handle a request and send the response to the requester, if they asked
    /// for one.  The request's verbosity is restored once the response has
    /// been delivered.
    pub fn dispatch(&mut self, req: Request) {
        let response = self.handle(&req);
        debug!(self.log, "request handled";
            "action" => %req.kind,
            "state" => response.is_ok(),
            "msg" => &response.msg);
        match &req.response_path {
            Some(path) => {
                if let Err(e) = response::deliver(&self.log, path, &response) {
                    error!(self.log, "response not delivered";
                        "path" => path.display().to_string(),
                        "error" => %e);
                }
            }
            None => debug!(self.log, "no response fifo in request"),
        }
    }

    /// Produce the response to a request.
    pub fn handle(&mut self, req: &Request) -> Response {
        match req.kind {
            RequestKind::Ping => Response::ok(format!("pong: {VERSION}")),
            RequestKind::Add => match req.resource.as_deref() {
                Some(resource) => self.add(resource),
                None => Response::error(MISSING_RESOURCE),
            },
            RequestKind::Delete => match req.resource.as_deref() {
                Some(resource) => self.delete(resource),
                None => Response::error(MISSING_RESOURCE),
            },
            RequestKind::Dump => {
                self.dump();
                Response::ok("dump captured in the log")
            }
            RequestKind::Show => self.show(req.resource.as_deref()),
            RequestKind::SetVerbosity => self.set_verbosity(req.log_level),
        }
    }

    fn resolve(&self, resource: &str) -> PathBuf {
        if resource.contains('/') {
            PathBuf::from(resource)
        } else {
            self.config_dir.join(resource)
        }
    }

    fn trace_state(&self) {
        if self.verbosity.will_it(VERBOSITY_TRACE) {
            self.diag.dump_sriov_state(&self.store);
        }
    }

    fn add(&mut self, resource: &str) -> Response {
        if resource.is_empty() {
            crit!(self.log, "empty resource in add request");
            return Response::error("internal mishap: resource was empty");
        }
        let path = self.resolve(resource);
        info!(self.log, "adding vf"; "path" => path.display().to_string());

        let response =
            match admit::load_vf(&mut self.store, &self.log, &path) {
                Ok(_) => match self.reconciler.reconcile(&mut self.store) {
                    Ok(()) => {
                        Response::ok(format!("vf added successfully: {resource}"))
                    }
                    Err(e) => {
                        error!(self.log, "unable to configure vf";
                            "resource" => resource,
                            "error" => %e);
                        Response::error(format!(
                            "vf add failed: unable to configure the vf for: {resource}: {e}"
                        ))
                    }
                },
                Err(e) => {
                    error!(self.log, "unable to add vf";
                        "resource" => resource,
                        "error" => %e);
                    Response::error(format!("unable to add vf: {resource}: {e}"))
                }
            };
        self.trace_state();
        response
    }

    fn delete(&mut self, resource: &str) -> Response {
        if resource.is_empty() {
            crit!(self.log, "empty resource in delete request");
            return Response::error("internal mishap: resource was empty");
        }
        let path = self.resolve(resource);
        info!(self.log, "deleting vf"; "path" => path.display().to_string());

        let response = match remove::del_vf(
            &mut self.store,
            &self.log,
            &path,
            self.keep_deleted,
        ) {
            Ok(()) => match self.reconciler.reconcile(&mut self.store) {
                Ok(()) => {
                    Response::ok(format!("vf deleted successfully: {resource}"))
                }
                Err(e) => {
                    error!(self.log, "unable to remove vf";
                        "resource" => resource,
                        "error" => %e);
                    Response::error(format!(
                        "vf delete failed: unable to configure the nic for: {resource}: {e}"
                    ))
                }
            },
            Err(e) => {
                error!(self.log, "unable to delete vf";
                    "resource" => resource,
                    "error" => %e);
                Response::error(format!("unable to delete vf: {resource}: {e}"))
            }
        };
        self.trace_state();
        response
    }

    fn show(&self, resource: Option<&str>) -> Response {
        if self.no_harm {
            return Response::error(NO_HARM_STATS);
        }

        let (scope, failure) = match resource {
            Some("pfs") => (StatsScope::Pfs, "unable to generate pf stats"),
            Some(r) if r.starts_with(|c: char| c.is_ascii_digit()) => {
                return Response::error(SPECIFIC_PF_STATS)
            }
            _ => (StatsScope::All, "unable to generate stats"),
        };
        match self.diag.generate_stats(&self.store, scope) {
            Ok(text) => Response::ok(text),
            Err(e) => {
                error!(self.log, "{failure}"; "error" => %e);
                Response::error(failure)
            }
        }
    }

    fn set_verbosity(&self, level: i32) -> Response {
        if level < 0 {
            return Response::error(format!("loglevel out of range: {level}"));
        }
        self.verbosity.set(level);
        info!(self.log, "verbose level changed"; "level" => level);
        Response::ok(format!("verbose level changed to: {level}"))
    }
}
