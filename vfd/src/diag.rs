// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Dumps of the managed devices and their VFs, and the statistics text
//! returned by `show` requests.

use std::io::Write;

use slog::info;
use tabwriter::TabWriter;

use crate::store::ConfigStore;
use crate::types::VfdError;
use crate::types::VfdResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatsScope {
    /// Physical and virtual functions
    All,
    /// Physical functions only
    Pfs,
}

#[cfg_attr(test, mockall::automock)]
pub trait Diagnostics {
    /// Log a description of each physical function.
    fn dump_device_info(&self, store: &ConfigStore);
    /// Log the full SR-IOV state: every port and every VF on it.
    fn dump_sriov_state(&self, store: &ConfigStore);
    fn generate_stats(
        &self,
        store: &ConfigStore,
        scope: StatsScope,
    ) -> VfdResult<String>;
}

pub struct ModelDiagnostics {
    log: slog::Logger,
}

impl ModelDiagnostics {
    pub fn new(log: &slog::Logger) -> Self {
        let log = log.new(slog::o!("unit" => "diag"));
        ModelDiagnostics { log }
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "-".to_string();
    }
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl Diagnostics for ModelDiagnostics {
    fn dump_device_info(&self, store: &ConfigStore) {
        for port in store.ports() {
            info!(self.log, "device";
                "name" => &port.name,
                "pciid" => &port.pciid,
                "mtu" => port.mtu,
                "hw_vfs" => port.hw_vfs,
                "loopback" => port.loopback,
                "oversubscribe" => port.oversubscribe,
                "mirrors" => port.num_mirrors);
        }
    }

    fn dump_sriov_state(&self, store: &ConfigStore) {
        for port in store.ports() {
            info!(self.log, "pf";
                "name" => &port.name,
                "pciid" => &port.pciid,
                "state" => %port.marker,
                "slots" => port.num_vfs(),
                "active" => port.active_vfs(),
                "vlans" => port.vlan_total(),
                "macs" => port.mac_total(),
                "tc_totals" => ?port.tc_totals());
            for (slot, vf) in port.vfs() {
                info!(self.log, "vf";
                    "pciid" => &port.pciid,
                    "slot" => slot,
                    "vf" => vf.id,
                    "owner" => vf.owner,
                    "state" => %vf.marker,
                    "link" => %vf.link,
                    "vlans" => ?vf.vlans,
                    "macs" => ?vf.macs,
                    "strip_stag" => vf.strip_stag,
                    "rate" => vf.rate,
                    "tc_pctgs" => ?vf.tc_pctgs);
            }
        }
    }

    fn generate_stats(
        &self,
        store: &ConfigStore,
        scope: StatsScope,
    ) -> VfdResult<String> {
        let mut tw = TabWriter::new(Vec::new());
        writeln!(tw, "generated: {}", chrono::Utc::now().to_rfc3339())?;
        writeln!(
            tw,
            "PF\tPCIID\tMTU\tHW VFS\tACTIVE\tLOOPBACK\tOVERSUB\tVLANS\tMACS"
        )?;
        for port in store.ports() {
            writeln!(
                tw,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                port.name,
                port.pciid,
                port.mtu,
                port.hw_vfs,
                port.active_vfs(),
                port.loopback,
                port.oversubscribe,
                port.vlan_total(),
                port.mac_total(),
            )?;
        }

        if scope == StatsScope::All {
            writeln!(tw)?;
            writeln!(
                tw,
                "PF\tVF\tOWNER\tSTATE\tLINK\tRATE\tVLANS\tMACS\tTC%"
            )?;
            for port in store.ports() {
                for (_, vf) in port.vfs() {
                    writeln!(
                        tw,
                        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                        port.name,
                        vf.id,
                        vf.owner,
                        vf.marker,
                        vf.link,
                        vf.rate,
                        join(&vf.vlans),
                        join(&vf.macs),
                        join(&vf.tc_pctgs),
                    )?;
                }
            }
        }

        tw.flush()?;
        let bytes = tw
            .into_inner()
            .map_err(|e| VfdError::Stats(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| VfdError::Stats(e.to_string()))
    }
}
