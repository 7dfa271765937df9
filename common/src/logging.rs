// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Logger construction and the run-time verbosity control shared by the
//! daemon and its tools.
//!
//! Verbosity is an integer level, independent of slog's own levels, which
//! clients may raise for the duration of a single request:
//!
//! | verbosity | records emitted            |
//! |-----------|----------------------------|
//! | 0         | critical, error, warning   |
//! | 1         | ... and info               |
//! | 2         | ... and debug              |
//! | 3+        | ... and trace              |

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use slog::Drain;

pub const VERBOSITY_INFO: i32 = 1;
pub const VERBOSITY_DEBUG: i32 = 2;
pub const VERBOSITY_TRACE: i32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Human,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("invalid log format: {s}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug)]
struct VerbosityState {
    level: AtomicI32,
    // Levels in effect before each outstanding push()
    saved: Mutex<Vec<i32>>,
}

/// A shareable handle on the active verbosity level.
#[derive(Clone, Debug)]
pub struct Verbosity {
    state: Arc<VerbosityState>,
}

impl Verbosity {
    pub fn new(level: i32) -> Self {
        Verbosity {
            state: Arc::new(VerbosityState {
                level: AtomicI32::new(level),
                saved: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn level(&self) -> i32 {
        self.state.level.load(Ordering::Relaxed)
    }

    /// Would a message at the given verbosity be emitted?
    pub fn will_it(&self, level: i32) -> bool {
        self.level() >= level
    }

    /// Change the active level.  The change is also written into the most
    /// recently saved level, so that it survives the pop at the end of any
    /// request which is currently in flight.
    pub fn set(&self, level: i32) {
        let mut saved = self.state.saved.lock().unwrap();
        if let Some(top) = saved.last_mut() {
            *top = level;
        }
        self.state.level.store(level, Ordering::Relaxed);
    }

    /// Raise the level to `level` if it is above the current setting.  A
    /// lower level leaves the current setting in place.  Either way, the
    /// prior level is restored when the returned guard is dropped.
    pub fn push(&self, level: i32) -> VerbosityGuard {
        let mut saved = self.state.saved.lock().unwrap();
        let current = self.level();
        saved.push(current);
        self.state.level.store(current.max(level), Ordering::Relaxed);
        VerbosityGuard {
            verbosity: self.clone(),
        }
    }

    fn pop(&self) {
        let mut saved = self.state.saved.lock().unwrap();
        if let Some(level) = saved.pop() {
            self.state.level.store(level, Ordering::Relaxed);
        }
    }

    /// Number of outstanding pushes.
    pub fn depth(&self) -> usize {
        self.state.saved.lock().unwrap().len()
    }

    fn allows(&self, level: slog::Level) -> bool {
        match level {
            slog::Level::Critical
            | slog::Level::Error
            | slog::Level::Warning => true,
            slog::Level::Info => self.will_it(VERBOSITY_INFO),
            slog::Level::Debug => self.will_it(VERBOSITY_DEBUG),
            slog::Level::Trace => self.will_it(VERBOSITY_TRACE),
        }
    }
}

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity::new(VERBOSITY_INFO)
    }
}

/// Restores the verbosity level saved by [`Verbosity::push`] when dropped.
#[derive(Debug)]
pub struct VerbosityGuard {
    verbosity: Verbosity,
}

impl Drop for VerbosityGuard {
    fn drop(&mut self) {
        self.verbosity.pop();
    }
}

/// Drain adapter which discards records not allowed by the current verbosity.
pub struct VerbosityDrain<D> {
    drain: D,
    verbosity: Verbosity,
}

impl<D: Drain> Drain for VerbosityDrain<D> {
    type Ok = ();
    type Err = D::Err;

    fn log(
        &self,
        record: &slog::Record,
        values: &slog::OwnedKVList,
    ) -> Result<Self::Ok, Self::Err> {
        if self.verbosity.allows(record.level()) {
            self.drain.log(record, values)?;
        }
        Ok(())
    }
}

/// Build the root logger for a process.  Output goes to `log_file` if one is
/// provided, and to stdout otherwise.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
    verbosity: &Verbosity,
) -> anyhow::Result<slog::Logger> {
    let out: Box<dyn Write + Send> = match log_file {
        Some(path) => Box::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?,
        ),
        None => Box::new(std::io::stdout()),
    };

    let drain: Box<dyn Drain<Ok = (), Err = slog::Never> + Send> =
        match log_format {
            LogFormat::Human => {
                let decorator = slog_term::PlainDecorator::new(out);
                Box::new(slog_term::FullFormat::new(decorator).build().fuse())
            }
            LogFormat::Json => Box::new(
                slog_bunyan::with_name(name, out).build().fuse(),
            ),
        };
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = VerbosityDrain {
        drain,
        verbosity: verbosity.clone(),
    }
    .fuse();

    Ok(slog::Logger::root(drain, slog::o!("process" => name.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_push_keeps_higher_level() {
        let v = Verbosity::new(2);
        {
            let _guard = v.push(1);
            assert_eq!(v.level(), 2);
        }
        assert_eq!(v.level(), 2);

        {
            let _guard = v.push(3);
            assert_eq!(v.level(), 3);
            assert_eq!(v.depth(), 1);
        }
        assert_eq!(v.level(), 2);
        assert_eq!(v.depth(), 0);
    }

    #[test]
    fn test_set_survives_pop() {
        let v = Verbosity::new(1);
        let guard = v.push(0);
        v.set(4);
        assert_eq!(v.level(), 4);
        drop(guard);
        assert_eq!(v.level(), 4);
    }

    #[test]
    fn test_allows() {
        let v = Verbosity::new(0);
        assert!(v.allows(slog::Level::Warning));
        assert!(!v.allows(slog::Level::Info));
        v.set(2);
        assert!(v.allows(slog::Level::Debug));
        assert!(!v.allows(slog::Level::Trace));
    }
}
