// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Pushing pending changes in the configuration store out to the hardware.

use slog::debug;
use slog::info;

use crate::store::ConfigStore;
use crate::store::Port;
use crate::store::UpdateMarker;
use crate::store::Vf;
use crate::types::VfdResult;

/// Brings the device in line with the store.  Every VF marked as added is
/// configured and every VF marked as deleted is removed, after which the
/// markers are cleared.  Calling this with nothing pending is a no-op.
#[cfg_attr(test, mockall::automock)]
pub trait Reconcile {
    fn reconcile(&mut self, store: &mut ConfigStore) -> VfdResult<()>;
}

/// A reconciler with no hardware beneath it.  The settings each VF should
/// have are logged, and the store's markers are committed.
pub struct ModelReconciler {
    log: slog::Logger,
    no_harm: bool,
}

impl ModelReconciler {
    pub fn new(log: &slog::Logger, no_harm: bool) -> Self {
        let log = log.new(slog::o!("unit" => "reconcile"));
        ModelReconciler { log, no_harm }
    }

    fn verb(&self, action: &'static str) -> String {
        if self.no_harm {
            format!("would {action}")
        } else {
            action.to_string()
        }
    }

    fn configure_port(&self, port: &Port) {
        info!(self.log, "{} pf", self.verb("configure");
            "pciid" => &port.pciid,
            "mtu" => port.mtu,
            "loopback" => port.loopback,
            "num_vfs" => port.hw_vfs);
    }

    fn configure_vf(&self, pciid: &str, vf: &Vf) {
        info!(self.log, "{} vf", self.verb("configure");
            "pciid" => pciid,
            "vf" => vf.id,
            "owner" => vf.owner,
            "vlans" => ?vf.vlans,
            "macs" => ?vf.macs,
            "strip_stag" => vf.strip_stag,
            "insert_stag" => vf.insert_stag,
            "allow_bcast" => vf.allow_bcast,
            "allow_mcast" => vf.allow_mcast,
            "allow_un_ucast" => vf.allow_un_ucast,
            "allow_untagged" => vf.allow_untagged,
            "vlan_anti_spoof" => vf.vlan_anti_spoof,
            "mac_anti_spoof" => vf.mac_anti_spoof,
            "rate" => vf.rate,
            "link" => %vf.link,
            "tc_pctgs" => ?vf.tc_pctgs);
        if let Some(cmd) = &vf.start_cb {
            info!(self.log, "{} start_cb", self.verb("run");
                "vf" => vf.id,
                "cmd" => cmd);
        }
    }

    fn remove_vf(&self, pciid: &str, vf: &Vf) {
        if let Some(cmd) = &vf.stop_cb {
            info!(self.log, "{} stop_cb", self.verb("run");
                "vf" => vf.id,
                "cmd" => cmd);
        }
        info!(self.log, "{} vf", self.verb("remove");
            "pciid" => pciid,
            "vf" => vf.id);
    }
}

impl Reconcile for ModelReconciler {
    fn reconcile(&mut self, store: &mut ConfigStore) -> VfdResult<()> {
        for port in store.ports_mut() {
            if port.marker == UpdateMarker::Added {
                self.configure_port(port);
                port.marker = UpdateMarker::Unchanged;
            }

            for slot in 0..port.num_vfs() {
                let Some(marker) = port.vf(slot).map(|vf| vf.marker) else {
                    continue;
                };
                match marker {
                    UpdateMarker::Added => {
                        let pciid = port.pciid.clone();
                        if let Some(vf) = port.vf_mut(slot) {
                            self.configure_vf(&pciid, vf);
                            vf.marker = UpdateMarker::Unchanged;
                        }
                    }
                    UpdateMarker::Deleted => {
                        if let Some(vf) = port.release(slot) {
                            self.remove_vf(&port.pciid, &vf);
                            debug!(self.log, "slot released";
                                "pciid" => &port.pciid,
                                "slot" => slot);
                        }
                    }
                    UpdateMarker::Unchanged => {}
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test::port_config;
    use crate::store::test::vf;

    fn store() -> ConfigStore {
        let log = crate::test_util::logger();
        let mut store = ConfigStore::new(&log);
        store.add_ports(&[port_config("a", 32)]);
        let port = &mut store.ports_mut()[0];
        port.install(0, vf(1)).unwrap();
        port.install(1, vf(2)).unwrap();
        port.install(2, vf(3)).unwrap();
        store
    }

    #[test]
    fn test_commit() {
        let log = crate::test_util::logger();
        let mut store = store();
        let mut r = ModelReconciler::new(&log, false);
        r.reconcile(&mut store).unwrap();

        let port = &store.ports()[0];
        assert_eq!(port.marker, UpdateMarker::Unchanged);
        assert!(port.vfs().all(|(_, vf)| vf.marker == UpdateMarker::Unchanged));
        assert_eq!(port.active_vfs(), 3);

        let port = &mut store.ports_mut()[0];
        port.vf_mut(1).unwrap().marker = UpdateMarker::Deleted;
        r.reconcile(&mut store).unwrap();
        let port = &store.ports()[0];
        assert_eq!(port.active_vfs(), 2);
        assert_eq!(port.find_vf(2), None);
        assert_eq!(port.next_slot(), 1);
    }

    #[test]
    fn test_idempotent() {
        let log = crate::test_util::logger();
        let mut store = store();
        let mut r = ModelReconciler::new(&log, true);
        r.reconcile(&mut store).unwrap();
        let after = store.ports().to_vec();
        r.reconcile(&mut store).unwrap();
        assert_eq!(store.ports(), &after[..]);
    }
}
