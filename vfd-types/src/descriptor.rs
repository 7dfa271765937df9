// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The per-VF configuration files written by the virtualisation manager and
//! consumed by `vfd` on `add` and `delete` requests, and at startup.

use serde::Deserialize;
use serde::Serialize;

/// Number of traffic classes supported on each port.
pub const TC_COUNT: usize = 8;

fn default_vfid() -> i32 {
    -1
}

fn default_link_status() -> String {
    "auto".to_string()
}

/// The contents of a single VF configuration file.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct VfDescriptor {
    /// Free-form name, used only in messages.
    #[serde(default)]
    pub name: String,
    /// PCI address of the physical function hosting this VF.
    #[serde(default)]
    pub pciid: Option<String>,
    /// Hardware index of the VF on its PF.  A missing id is recorded as -1,
    /// which fails validation.
    #[serde(default = "default_vfid")]
    pub vfid: i32,
    /// Numeric uid of the VF's owner.  When absent from the file, the uid of
    /// the file's owner is used.
    #[serde(default)]
    pub owner: Option<u32>,
    /// Strip the outer VLAN tag on receive, and insert it on transmit.
    #[serde(default)]
    pub strip_stag: bool,
    #[serde(default)]
    pub allow_bcast: bool,
    #[serde(default)]
    pub allow_mcast: bool,
    #[serde(default)]
    pub allow_un_ucast: bool,
    /// "auto", "down" or "up".  Only the first character is significant.
    #[serde(default = "default_link_status")]
    pub link_status: String,
    /// Range checks happen at admission, so ids are read as plain integers.
    #[serde(default)]
    pub vlans: Vec<i32>,
    #[serde(default)]
    pub macs: Vec<String>,
    /// Bandwidth share, as a percentage, for each traffic class.
    #[serde(default)]
    pub tc_pctgs: [i32; TC_COUNT],
    #[serde(default)]
    pub rate: f64,
    /// Command run when the VF is brought up.
    #[serde(default)]
    pub start_cb: Option<String>,
    /// Command run when the VF is torn down.
    #[serde(default)]
    pub stop_cb: Option<String>,
}

impl Default for VfDescriptor {
    fn default() -> Self {
        VfDescriptor {
            name: String::new(),
            pciid: None,
            vfid: default_vfid(),
            owner: None,
            strip_stag: false,
            allow_bcast: false,
            allow_mcast: false,
            allow_un_ucast: false,
            link_status: default_link_status(),
            vlans: Vec::new(),
            macs: Vec::new(),
            tc_pctgs: [0; TC_COUNT],
            rate: 0.0,
            start_cb: None,
            stop_cb: None,
        }
    }
}

impl VfDescriptor {
    /// The PF hosting the VF, or `None` if the descriptor doesn't identify a
    /// VF at all.
    pub fn target(&self) -> Option<&String> {
        self.pciid.as_ref().filter(|_| self.vfid >= 1)
    }
}
