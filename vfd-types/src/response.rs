// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum ResponseState {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

/// The single reply written for each request that names a reply fifo.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Response {
    pub state: ResponseState,
    pub msg: String,
}

impl Response {
    pub fn ok(msg: impl Into<String>) -> Self {
        Response {
            state: ResponseState::Ok,
            msg: msg.into(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response {
            state: ResponseState::Error,
            msg: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.state == ResponseState::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let r = Response::error("TC percentages exceed 100%\" for tc 0");
        let text = serde_json::to_string(&r).unwrap();
        assert_eq!(
            text,
            r#"{"state":"ERROR","msg":"TC percentages exceed 100%\" for tc 0"}"#
        );
        let back: Response = serde_json::from_str(&text).unwrap();
        assert_eq!(back, r);
        assert!(!back.is_ok());
    }

    #[test]
    fn test_ok_state() {
        let back: Response =
            serde_json::from_str(r#"{ "state": "OK", "msg": "pong" }"#)
                .unwrap();
        assert!(back.is_ok());
        assert_eq!(back.msg, "pong");
    }
}
