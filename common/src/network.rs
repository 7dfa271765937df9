// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Layer-2 identifiers assigned to virtual functions.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Lowest VLAN id that may be assigned to a VF.
pub const VLAN_MIN: u16 = 1;
/// Highest VLAN id that may be assigned to a VF.
pub const VLAN_MAX: u16 = 4095;

/// An EUI-48 MAC address.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct MacAddr {
    a: [u8; 6],
}

impl MacAddr {
    /// Create a new MAC address from octets in network byte order.
    pub fn new(o0: u8, o1: u8, o2: u8, o3: u8, o4: u8, o5: u8) -> MacAddr {
        MacAddr {
            a: [o0, o1, o2, o3, o4, o5],
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MacError {
    #[error("Too few octets")]
    TooShort,
    #[error("Too many octets")]
    TooLong,
    /// An octet that isn't one or two hex digits
    #[error("Invalid octet")]
    InvalidOctet,
}

fn parse_octet(octet: &str) -> Result<u8, MacError> {
    // from_str_radix() would accept a leading '+'
    if !(1..=2).contains(&octet.len())
        || !octet.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(MacError::InvalidOctet);
    }
    u8::from_str_radix(octet, 16).map_err(|_| MacError::InvalidOctet)
}

impl FromStr for MacAddr {
    type Err = MacError;

    fn from_str(s: &str) -> Result<Self, MacError> {
        let mut a = [0u8; 6];
        let mut octets = s.split(':');
        for slot in a.iter_mut() {
            let octet = octets.next().ok_or(MacError::TooShort)?;
            *slot = parse_octet(octet)?;
        }
        if octets.next().is_some() {
            return Err(MacError::TooLong);
        }
        Ok(MacAddr { a })
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.a;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VlanError {
    #[error("invalid vlan id: {}", .0)]
    InvalidVlan(u16),
}

pub fn validate_vlan(id: impl Into<u16>) -> Result<(), VlanError> {
    let id: u16 = id.into();
    if (VLAN_MIN..=VLAN_MAX).contains(&id) {
        Ok(())
    } else {
        Err(VlanError::InvalidVlan(id))
    }
}
