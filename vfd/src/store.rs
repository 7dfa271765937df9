// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The in-memory model of the ports being managed and the VFs configured on
//! each of them.
//!
//! Each port holds its VFs in an arena of slots.  The arena only grows; a
//! released slot becomes a hole, and the lowest hole is reused before the
//! arena is extended.  A VF that has been marked for deletion keeps its slot
//! until the reconciler has removed it from the hardware and releases it.

use std::collections::BTreeSet;
use std::fmt;

use slog::debug;
use slog::info;
use slog::warn;

use crate::config::PortConfig;
use crate::types::VfdError;
use crate::types::VfdResult;
use common::network::MacAddr;
pub use vfd_types::descriptor::TC_COUNT;

pub const MAX_PORTS: usize = 16;
/// Slots available on each port.
pub const MAX_VFS: usize = 32;
pub const MAX_VF_ID: i32 = 31;
pub const MAX_VF_VLANS: usize = 64;
pub const MAX_PF_VLANS: usize = 64;
pub const MAX_VF_MACS: usize = 64;
pub const MAX_PF_MACS: usize = 128;

/// Tracks a pending change that the reconciler has yet to push to the
/// hardware.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum UpdateMarker {
    Unchanged,
    Added,
    Deleted,
}

impl fmt::Display for UpdateMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &'static str = self.into();
        write!(f, "{s}")
    }
}

/// How the VF's link state should be reported to its guest.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum LinkPolicy {
    /// Follow the state of the physical link
    #[default]
    Auto,
    #[strum(serialize = "down")]
    ForcedDown,
    #[strum(serialize = "up")]
    ForcedUp,
}

impl LinkPolicy {
    /// Only the first character of the token is significant.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.chars().next() {
            Some('a' | 'A') => Some(LinkPolicy::Auto),
            Some('d' | 'D') => Some(LinkPolicy::ForcedDown),
            Some('u' | 'U') => Some(LinkPolicy::ForcedUp),
            _ => None,
        }
    }
}

impl fmt::Display for LinkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: &'static str = self.into();
        write!(f, "{s}")
    }
}

/// A single virtual function, as it should be configured on the hardware.
#[derive(Clone, Debug, PartialEq)]
pub struct Vf {
    pub id: u8,
    pub owner: u32,
    pub marker: UpdateMarker,
    pub vlans: Vec<u16>,
    pub macs: Vec<MacAddr>,
    pub tc_pctgs: [u8; TC_COUNT],
    pub strip_stag: bool,
    pub insert_stag: bool,
    pub allow_bcast: bool,
    pub allow_mcast: bool,
    pub allow_un_ucast: bool,
    pub allow_untagged: bool,
    pub vlan_anti_spoof: bool,
    pub mac_anti_spoof: bool,
    pub rate: f64,
    pub link: LinkPolicy,
    pub start_cb: Option<String>,
    pub stop_cb: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
enum Slot {
    Empty,
    Occupied(Vf),
}

/// A physical function and the VFs configured on it.
#[derive(Clone, Debug, PartialEq)]
pub struct Port {
    pub pciid: String,
    pub name: String,
    pub mtu: u32,
    pub loopback: bool,
    pub oversubscribe: bool,
    /// Number of VFs exposed by the hardware
    pub hw_vfs: u32,
    pub marker: UpdateMarker,
    pub num_mirrors: u32,
    slots: Vec<Slot>,
    holes: BTreeSet<usize>,
}

impl Port {
    fn new(idx: usize, config: &PortConfig) -> Self {
        Port {
            pciid: config.pciid.clone(),
            name: format!("port-{idx}"),
            mtu: config.mtu,
            loopback: config.loopback,
            oversubscribe: config.oversubscribe,
            hw_vfs: config.num_vfs,
            marker: UpdateMarker::Added,
            num_mirrors: 0,
            slots: Vec::new(),
            holes: BTreeSet::new(),
        }
    }

    /// The high-water mark of the slot arena.
    pub fn num_vfs(&self) -> usize {
        self.slots.len()
    }

    /// Are traffic class allocations capped at 100% on this port?
    pub fn is_strict(&self) -> bool {
        !self.oversubscribe
    }

    /// Iterate over the occupied slots, yielding each slot's index and VF.
    pub fn vfs(&self) -> impl Iterator<Item = (usize, &Vf)> {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| match slot {
            Slot::Occupied(vf) => Some((idx, vf)),
            Slot::Empty => None,
        })
    }

    pub fn active_vfs(&self) -> usize {
        self.vfs().count()
    }

    pub fn vf(&self, slot: usize) -> Option<&Vf> {
        match self.slots.get(slot) {
            Some(Slot::Occupied(vf)) => Some(vf),
            _ => None,
        }
    }

    pub fn vf_mut(&mut self, slot: usize) -> Option<&mut Vf> {
        match self.slots.get_mut(slot) {
            Some(Slot::Occupied(vf)) => Some(vf),
            _ => None,
        }
    }

    /// Find the slot holding the VF with the given id.
    pub fn find_vf(&self, id: i32) -> Option<usize> {
        self.vfs()
            .find(|(_, vf)| i32::from(vf.id) == id)
            .map(|(idx, _)| idx)
    }

    /// The slot the next VF would be installed in: the lowest hole if there
    /// is one, and the end of the arena otherwise.
    pub fn next_slot(&self) -> usize {
        self.holes.first().copied().unwrap_or(self.slots.len())
    }

    /// Install a VF in the given slot, which must be a hole or the end of the
    /// arena.
    pub fn install(&mut self, slot: usize, vf: Vf) -> VfdResult<()> {
        if slot == self.slots.len() && slot < MAX_VFS {
            self.slots.push(Slot::Occupied(vf));
            Ok(())
        } else if self.holes.remove(&slot) {
            self.slots[slot] = Slot::Occupied(vf);
            Ok(())
        } else {
            Err(VfdError::Internal(format!(
                "slot {slot} on port {} is not available",
                self.pciid
            )))
        }
    }

    /// Empty a slot, making it available for reuse.
    pub fn release(&mut self, slot: usize) -> Option<Vf> {
        let entry = self.slots.get_mut(slot)?;
        match std::mem::replace(entry, Slot::Empty) {
            Slot::Occupied(vf) => {
                self.holes.insert(slot);
                Some(vf)
            }
            Slot::Empty => None,
        }
    }

    pub fn vlan_total(&self) -> usize {
        self.vfs().map(|(_, vf)| vf.vlans.len()).sum()
    }

    pub fn mac_total(&self) -> usize {
        self.vfs().map(|(_, vf)| vf.macs.len()).sum()
    }

    /// The percentage of each traffic class already allocated to VFs.
    pub fn tc_totals(&self) -> [u32; TC_COUNT] {
        let mut totals = [0u32; TC_COUNT];
        for (_, vf) in self.vfs() {
            for (total, pct) in totals.iter_mut().zip(vf.tc_pctgs.iter()) {
                *total += u32::from(*pct);
            }
        }
        totals
    }
}

/// The authoritative model of every port and VF.
pub struct ConfigStore {
    log: slog::Logger,
    ports: Vec<Port>,
    populated: bool,
}

impl ConfigStore {
    pub fn new(log: &slog::Logger) -> Self {
        let log = log.new(slog::o!("unit" => "store"));
        ConfigStore {
            log,
            ports: Vec::new(),
            populated: false,
        }
    }

    /// Populate the port table.  Only the first call has any effect.
    pub fn add_ports(&mut self, ports: &[PortConfig]) {
        if self.populated {
            debug!(self.log, "port table already populated");
            return;
        }
        self.populated = true;

        if ports.len() > MAX_PORTS {
            warn!(self.log, "too many ports configured; ignoring the excess";
                "configured" => ports.len(),
                "max" => MAX_PORTS);
        }
        for (idx, config) in ports.iter().take(MAX_PORTS).enumerate() {
            let port = Port::new(idx, config);
            info!(self.log, "adding port";
                "name" => &port.name,
                "pciid" => &port.pciid,
                "mtu" => port.mtu,
                "num_vfs" => port.hw_vfs,
                "loopback" => port.loopback,
                "oversubscribe" => port.oversubscribe);
            self.ports.push(port);
        }
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut [Port] {
        &mut self.ports
    }

    pub fn port(&self, pciid: &str) -> Option<&Port> {
        self.ports.iter().find(|p| p.pciid == pciid)
    }

    pub fn port_mut(&mut self, pciid: &str) -> Option<&mut Port> {
        self.ports.iter_mut().find(|p| p.pciid == pciid)
    }
}
