// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Requests sent to `vfd` over its request fifo.

use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// The operations a client may ask of the daemon.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum RequestKind {
    Ping,
    Add,
    Delete,
    Dump,
    Show,
    #[strum(serialize = "verbose")]
    SetVerbosity,
}

impl RequestKind {
    /// The action keyword that selects this kind of request.
    pub fn action(&self) -> &'static str {
        self.into()
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.action())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised action in request: {0:?}")]
pub struct UnknownAction(pub String);

// Only the leading character of the action matters, with the exception of
// "dump", which has to be told apart from "delete".
impl FromStr for RequestKind {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.chars().next() {
            Some('a' | 'A') => Ok(RequestKind::Add),
            Some('d' | 'D') if s == "dump" => Ok(RequestKind::Dump),
            Some('d' | 'D') => Ok(RequestKind::Delete),
            Some('p') => Ok(RequestKind::Ping),
            Some('s' | 'S') => Ok(RequestKind::Show),
            Some('v') => Ok(RequestKind::SetVerbosity),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

/// Optional arguments carried by a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Path of the fifo on which the reply should be written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r_fifo: Option<String>,
    #[serde(default)]
    pub loglevel: i32,
}

/// A request as it appears on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RequestMessage {
    pub action: String,
    #[serde(default)]
    pub params: RequestParams,
}

impl RequestMessage {
    pub fn new(kind: RequestKind) -> Self {
        RequestMessage {
            action: kind.action().to_string(),
            params: RequestParams::default(),
        }
    }

    pub fn with_resource(mut self, resource: impl ToString) -> Self {
        self.params.resource = Some(resource.to_string());
        self
    }

    pub fn with_reply_fifo(mut self, path: impl ToString) -> Self {
        self.params.r_fifo = Some(path.to_string());
        self
    }

    pub fn with_loglevel(mut self, level: i32) -> Self {
        self.params.loglevel = level;
        self
    }

    pub fn kind(&self) -> Result<RequestKind, UnknownAction> {
        self.action.parse()
    }

    /// The request's target.  Older clients name it `filename`, which wins
    /// if both are present.
    pub fn resource(&self) -> Option<&str> {
        self.params
            .filename
            .as_deref()
            .or(self.params.resource.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_prefixes() {
        assert_eq!("add".parse(), Ok(RequestKind::Add));
        assert_eq!("Append".parse(), Ok(RequestKind::Add));
        assert_eq!("delete".parse(), Ok(RequestKind::Delete));
        assert_eq!("del".parse(), Ok(RequestKind::Delete));
        assert_eq!("dump".parse(), Ok(RequestKind::Dump));
        assert_eq!("dumpster".parse(), Ok(RequestKind::Delete));
        assert_eq!("ping".parse(), Ok(RequestKind::Ping));
        assert_eq!("show".parse(), Ok(RequestKind::Show));
        assert_eq!("Show".parse(), Ok(RequestKind::Show));
        assert_eq!("verbose".parse(), Ok(RequestKind::SetVerbosity));
        assert!("Ping".parse::<RequestKind>().is_err());
        assert!("quit".parse::<RequestKind>().is_err());
        assert!("".parse::<RequestKind>().is_err());
    }

    #[test]
    fn test_action_names() {
        for kind in [
            RequestKind::Ping,
            RequestKind::Add,
            RequestKind::Delete,
            RequestKind::Dump,
            RequestKind::Show,
            RequestKind::SetVerbosity,
        ] {
            assert_eq!(kind.action().parse(), Ok(kind));
        }
        assert_eq!(RequestKind::SetVerbosity.to_string(), "verbose");
    }

    #[test]
    fn test_decode_full() {
        let msg: RequestMessage = serde_json::from_str(
            r#"{ "action": "add",
                 "params": { "filename": "vf3.json",
                             "resource": "ignored",
                             "r_fifo": "/tmp/reply",
                             "loglevel": 2 } }"#,
        )
        .unwrap();
        assert_eq!(msg.kind(), Ok(RequestKind::Add));
        assert_eq!(msg.resource(), Some("vf3.json"));
        assert_eq!(msg.params.r_fifo.as_deref(), Some("/tmp/reply"));
        assert_eq!(msg.params.loglevel, 2);
    }

    #[test]
    fn test_decode_minimal() {
        let msg: RequestMessage =
            serde_json::from_str(r#"{ "action": "ping" }"#).unwrap();
        assert_eq!(msg.resource(), None);
        assert_eq!(msg.params.r_fifo, None);
        assert_eq!(msg.params.loglevel, 0);
    }

    #[test]
    fn test_missing_action() {
        assert!(serde_json::from_str::<RequestMessage>(
            r#"{ "params": { "resource": "pfs" } }"#
        )
        .is_err());
    }

    #[test]
    fn test_builder() {
        let msg = RequestMessage::new(RequestKind::Show)
            .with_resource("pfs")
            .with_reply_fifo("/tmp/r")
            .with_loglevel(1);
        let text = serde_json::to_string(&msg).unwrap();
        let back: RequestMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.resource(), Some("pfs"));
    }
}
