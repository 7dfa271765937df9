// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Admission of new VFs into the configuration store.
//!
//! A descriptor is checked against the port it names in a fixed order, and
//! the first failed check is the one reported.  Validation works on a shared
//! borrow of the store and returns a plan; only once every check has passed
//! is the VF installed.

use std::path::Path;

use slog::debug;
use slog::error;
use slog::info;
use slog::warn;

use crate::descriptor;
use crate::store::ConfigStore;
use crate::store::LinkPolicy;
use crate::store::Port;
use crate::store::UpdateMarker;
use crate::store::Vf;
use crate::store::MAX_PF_MACS;
use crate::store::MAX_PF_VLANS;
use crate::store::MAX_VFS;
use crate::store::MAX_VF_ID;
use crate::store::MAX_VF_MACS;
use crate::store::MAX_VF_VLANS;
use crate::store::TC_COUNT;
use crate::types::VfError;
use crate::types::VfdError;
use crate::types::VfdResult;
use common::network::validate_vlan;
use common::network::MacAddr;
use vfd_types::descriptor::VfDescriptor;

/// Where, and in what form, a validated VF will be installed.
#[derive(Debug, PartialEq)]
pub struct SlotPlan {
    pub pciid: String,
    pub slot: usize,
    pub id: u8,
    pub vlans: Vec<u16>,
    pub macs: Vec<MacAddr>,
    pub tc_pctgs: [u8; TC_COUNT],
}

/// Check a descriptor against the current state of the store.
pub fn validate(
    store: &ConfigStore,
    log: &slog::Logger,
    desc: &VfDescriptor,
) -> Result<SlotPlan, VfError> {
    let pciid = desc.target().ok_or(VfError::Malformed)?;

    let port = store.port(pciid).ok_or_else(|| VfError::NoSuchPort {
        name: desc.name.clone(),
        pciid: pciid.clone(),
    })?;

    let mut vlan_total = 0;
    let mut mac_total = 0;
    for (_, vf) in port.vfs() {
        if i32::from(vf.id) == desc.vfid {
            return Err(VfError::DuplicateVf {
                vfid: desc.vfid,
                pciid: pciid.clone(),
            });
        }
        vlan_total += vf.vlans.len();
        mac_total += vf.macs.len();
    }

    let slot = port.next_slot();
    let id = match u8::try_from(desc.vfid) {
        Ok(id) if slot < MAX_VFS && desc.vfid <= MAX_VF_ID => id,
        _ => return Err(VfError::OutOfRange { vfid: desc.vfid }),
    };

    if u32::from(id) >= port.hw_vfs {
        return Err(VfError::ExceedsConfigured {
            vfid: desc.vfid,
            configured: port.hw_vfs,
            pciid: pciid.clone(),
        });
    }

    let nvlans = desc.vlans.len();
    let nmacs = desc.macs.len();
    if nvlans > MAX_VF_VLANS {
        return Err(VfError::TooManyVlans {
            count: nvlans,
            max: MAX_VF_VLANS,
        });
    }
    if nmacs > MAX_VF_MACS {
        return Err(VfError::TooManyMacs {
            count: nmacs,
            max: MAX_VF_MACS,
        });
    }
    if vlan_total + nvlans > MAX_PF_VLANS {
        return Err(VfError::PortVlanLimit {
            count: nvlans,
            max: MAX_PF_VLANS,
        });
    }
    if mac_total + nmacs > MAX_PF_MACS {
        return Err(VfError::PortMacLimit {
            count: nmacs,
            max: MAX_PF_MACS,
        });
    }

    if desc.strip_stag && nvlans > 1 {
        return Err(VfError::StripWithVlanList);
    }

    let vlans = check_vlans(&desc.vlans)?;
    let macs = check_macs(&desc.macs)?;
    let tc_pctgs = check_traffic_classes(port, log, &desc.tc_pctgs)?;
    check_hook("start_cb", &desc.start_cb)?;
    check_hook("stop_cb", &desc.stop_cb)?;

    Ok(SlotPlan {
        pciid: pciid.clone(),
        slot,
        id,
        vlans,
        macs,
        tc_pctgs,
    })
}

fn check_vlans(vlans: &[i32]) -> Result<Vec<u16>, VfError> {
    let mut ids = Vec::with_capacity(vlans.len());
    for (idx, vlan) in vlans.iter().enumerate() {
        let id = u16::try_from(*vlan)
            .ok()
            .filter(|id| validate_vlan(*id).is_ok())
            .ok_or(VfError::InvalidVlan(*vlan))?;
        if vlans[idx + 1..].contains(vlan) {
            return Err(VfError::DuplicateVlan(*vlan));
        }
        ids.push(id);
    }
    Ok(ids)
}

fn check_macs(macs: &[String]) -> Result<Vec<MacAddr>, VfError> {
    let mut parsed: Vec<MacAddr> = Vec::with_capacity(macs.len());
    for text in macs {
        let mac: MacAddr = text
            .parse()
            .map_err(|_| VfError::InvalidMac(text.clone()))?;
        if parsed.contains(&mac) {
            return Err(VfError::DuplicateMac(text.clone()));
        }
        parsed.push(mac);
    }
    Ok(parsed)
}

fn check_traffic_classes(
    port: &Port,
    log: &slog::Logger,
    requested: &[i32; TC_COUNT],
) -> Result<[u8; TC_COUNT], VfError> {
    let mut pctgs = [0u8; TC_COUNT];
    for (tc, (pct, req)) in pctgs.iter_mut().zip(requested.iter()).enumerate()
    {
        *pct = u8::try_from(*req)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or(VfError::InvalidTcPercentage { tc, pct: *req })?;
    }

    if !port.is_strict() {
        return Ok(pctgs);
    }

    let totals = port.tc_totals();
    let mut classes = Vec::new();
    for (tc, (total, pct)) in totals.iter().zip(pctgs.iter()).enumerate() {
        if total + u32::from(*pct) > 100 {
            debug!(log, "traffic class oversubscribed";
                "pciid" => &port.pciid,
                "tc" => tc,
                "allocated" => total,
                "requested" => pct);
            classes.push(tc);
        }
    }
    if classes.is_empty() {
        Ok(pctgs)
    } else {
        Err(VfError::TcOversubscribed { classes })
    }
}

fn check_hook(
    hook: &'static str,
    cmd: &Option<String>,
) -> Result<(), VfError> {
    match cmd {
        Some(cmd) if cmd.contains(';') => Err(VfError::InvalidHook { hook }),
        _ => Ok(()),
    }
}

fn build_vf(log: &slog::Logger, plan: SlotPlan, desc: &VfDescriptor) -> Vf {
    let link = LinkPolicy::from_token(&desc.link_status).unwrap_or_else(|| {
        warn!(log, "unrecognised link status; using auto";
            "link_status" => &desc.link_status);
        LinkPolicy::Auto
    });

    Vf {
        id: plan.id,
        owner: desc.owner.unwrap_or(0),
        marker: UpdateMarker::Added,
        vlans: plan.vlans,
        macs: plan.macs,
        tc_pctgs: plan.tc_pctgs,
        strip_stag: desc.strip_stag,
        insert_stag: desc.strip_stag,
        allow_bcast: desc.allow_bcast,
        allow_mcast: desc.allow_mcast,
        allow_un_ucast: desc.allow_un_ucast,
        allow_untagged: false,
        vlan_anti_spoof: true,
        mac_anti_spoof: true,
        rate: desc.rate,
        link,
        start_cb: desc.start_cb.clone(),
        stop_cb: desc.stop_cb.clone(),
    }
}

/// Validate a descriptor and, if it passes, install the VF it describes.
/// Returns the slot the VF was installed in.  On failure the store is left
/// untouched.
pub fn add_vf(
    store: &mut ConfigStore,
    log: &slog::Logger,
    desc: &VfDescriptor,
) -> VfdResult<usize> {
    let plan = validate(store, log, desc)?;
    let pciid = plan.pciid.clone();
    let slot = plan.slot;
    let vf = build_vf(log, plan, desc);
    store
        .port_mut(&pciid)
        .ok_or_else(|| {
            VfdError::Internal(format!("port {pciid} vanished during add"))
        })?
        .install(slot, vf)?;
    info!(log, "vf added";
        "pciid" => desc.pciid.as_deref(),
        "vfid" => desc.vfid,
        "slot" => slot);
    Ok(slot)
}

/// Add the VF described by a configuration file.
pub fn load_vf(
    store: &mut ConfigStore,
    log: &slog::Logger,
    path: &Path,
) -> VfdResult<usize> {
    let desc = descriptor::read_descriptor(path)?;
    debug!(log, "add: config data";
        "name" => &desc.name,
        "pciid" => desc.pciid.as_deref(),
        "vfid" => desc.vfid,
        "nvlans" => desc.vlans.len(),
        "nmacs" => desc.macs.len());
    add_vf(store, log, &desc)
}

/// Add a VF for each configuration file found in `dir`.  Files that can't be
/// read or are rejected are logged and skipped.  Returns the number of VFs
/// added.
pub fn add_all_vfs(
    store: &mut ConfigStore,
    log: &slog::Logger,
    dir: &Path,
) -> usize {
    let files = match descriptor::list_descriptor_files(dir) {
        Ok(files) => files,
        Err(e) => {
            error!(log, "unable to list vf configuration files";
                "dir" => dir.display().to_string(),
                "error" => %e);
            return 0;
        }
    };

    if files.is_empty() {
        info!(log, "zero vf configuration files (*.json) found; nothing restored";
            "dir" => dir.display().to_string());
        return 0;
    }

    let mut added = 0;
    for path in files {
        match load_vf(store, log, &path) {
            Ok(_) => added += 1,
            Err(e) => error!(log, "could not add vf";
                "file" => path.display().to_string(),
                "error" => %e),
        }
    }
    info!(log, "restored vf configuration"; "added" => added);
    added
}
