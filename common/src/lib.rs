// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Code shared by `vfd` and the tools that talk to it.

pub mod fifo;
pub mod logging;
pub mod network;

/// Where `vfd` listens for requests unless told otherwise.
pub const DEFAULT_REQUEST_FIFO: &str = "/var/lib/vfd/request";
