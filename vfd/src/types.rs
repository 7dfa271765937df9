// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout vfd.

use std::convert;
use std::fmt::Write;

pub type VfdResult<T> = Result<T, VfdError>;

#[derive(Debug, thiserror::Error)]
pub enum VfdError {
    #[error("I/O error: {0}")]
    Io(std::io::Error),
    #[error("unable to read config file: {path}: {reason}")]
    Descriptor { path: String, reason: String },
    #[error("unable to {action} config file: {path}: {err}")]
    Retire {
        action: &'static str,
        path: String,
        err: std::io::Error,
    },
    #[error("{0}")]
    Rejected(#[from] VfError),
    #[error("internal mishap: {0}")]
    Internal(String),
    #[error("unable to generate stats: {0}")]
    Stats(String),
    #[error("Invalid config: {0}")]
    Config(String),
    #[error("Error: {0}")]
    Other(String),
}

impl convert::From<std::io::Error> for VfdError {
    fn from(err: std::io::Error) -> Self {
        VfdError::Io(err)
    }
}

impl convert::From<toml::de::Error> for VfdError {
    fn from(err: toml::de::Error) -> Self {
        VfdError::Config(err.to_string())
    }
}

/// The reasons a VF may be refused admission.  Each is reported to the client
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VfError {
    #[error("config data is missing the pciid or has an invalid vfid")]
    Malformed,
    #[error("{name}: could not find port {pciid} in the config")]
    NoSuchPort { name: String, pciid: String },
    #[error("vfid {vfid} already exists on port {pciid}")]
    DuplicateVf { vfid: i32, pciid: String },
    #[error("max VFs already defined or vfid {vfid} is out of range")]
    OutOfRange { vfid: i32 },
    #[error(
        "vf {vfid} is out of range; only {configured} VFs are configured on port {pciid}"
    )]
    ExceedsConfigured {
        vfid: i32,
        configured: u32,
        pciid: String,
    },
    #[error("number of vlans supplied ({count}) exceeds the maximum ({max})")]
    TooManyVlans { count: usize, max: usize },
    #[error("number of macs supplied ({count}) exceeds the maximum ({max})")]
    TooManyMacs { count: usize, max: usize },
    #[error(
        "number of vlans supplied ({count}) causes total for PF to exceed the maximum ({max})"
    )]
    PortVlanLimit { count: usize, max: usize },
    #[error(
        "number of macs supplied ({count}) causes total for PF to exceed the maximum ({max})"
    )]
    PortMacLimit { count: usize, max: usize },
    #[error(
        "conflicting options: strip_stag may not be supplied with a list of vlan ids"
    )]
    StripWithVlanList,
    #[error("invalid vlan id: {0}")]
    InvalidVlan(i32),
    #[error("duplicate vlan in list: {0}")]
    DuplicateVlan(i32),
    #[error("invalid mac in list: {0}")]
    InvalidMac(String),
    #[error("duplicate mac in list: {0}")]
    DuplicateMac(String),
    #[error("traffic class {tc} percentage ({pct}) is not between 0 and 100")]
    InvalidTcPercentage { tc: usize, pct: i32 },
    #[error(
        "TC percentages cause one or more total allocation to exceed 100%: {}",
        list_classes(.classes)
    )]
    TcOversubscribed { classes: Vec<usize> },
    #[error("{hook} command contains invalid character: ;")]
    InvalidHook { hook: &'static str },
}

fn list_classes(classes: &[usize]) -> String {
    let mut out = String::new();
    for (i, tc) in classes.iter().enumerate() {
        let sep = if i == 0 { "tc " } else { ", " };
        let _ = write!(out, "{sep}{tc}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_text() {
        let e = VfError::TcOversubscribed {
            classes: vec![0, 3],
        };
        assert_eq!(
            e.to_string(),
            "TC percentages cause one or more total allocation to exceed 100%: tc 0, 3"
        );

        let e: VfdError = VfError::DuplicateVf {
            vfid: 3,
            pciid: "0000:01:00.0".to_string(),
        }
        .into();
        assert_eq!(e.to_string(), "vfid 3 already exists on port 0000:01:00.0");
    }

    #[test]
    fn test_descriptor_text() {
        let e = VfdError::Descriptor {
            path: "/var/lib/vfd/config/vf1.json".to_string(),
            reason: "No such file or directory (os error 2)".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "unable to read config file: /var/lib/vfd/config/vf1.json: \
             No such file or directory (os error 2)"
        );
    }
}
