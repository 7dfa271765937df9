// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `vfd`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::store::MAX_VFS;
use crate::types::VfdError;
use crate::types::VfdResult;
use common::logging::LogFormat;

pub const DEFAULT_CONFIG_DIR: &str = "/var/lib/vfd/config";
const DEFAULT_MTU: u32 = 9000;
const DEFAULT_IDLE_MS: u64 = 1000;

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

/// One physical function to be managed, as listed in the parameter file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PortConfig {
    pub pciid: String,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Number of VFs the hardware has been asked to expose.
    pub num_vfs: u32,
    #[serde(default)]
    pub loopback: bool,
    /// Allow the traffic class percentages of the port's VFs to sum to more
    /// than 100.
    #[serde(default)]
    pub oversubscribe: bool,
}

/// The Config structure captures all of the run-time settings that can be
/// controlled by the parameter file, or by command-line options which
/// override it.
#[derive(Debug)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// Baseline verbosity, restored after each request.
    pub verbosity: i32,

    /// The fifo on which requests arrive.
    pub fifo_path: PathBuf,

    /// Where VF configuration files live.  Unqualified names in requests are
    /// looked up here.
    pub config_dir: PathBuf,

    /// Rename, rather than remove, the configuration file of a deleted VF.
    pub keep_deleted: bool,

    /// Don't touch the hardware.
    pub no_harm: bool,

    /// How long to wait for a signal when no request was pending.
    pub idle_interval: Duration,

    pub ports: Vec<PortConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Human,
            verbosity: common::logging::VERBOSITY_INFO,
            fifo_path: PathBuf::from(common::DEFAULT_REQUEST_FIFO),
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            keep_deleted: false,
            no_harm: false,
            idle_interval: Duration::from_millis(DEFAULT_IDLE_MS),
            ports: Vec::new(),
        }
    }
}

// The contents of the parameter file.  Everything is optional, with missing
// settings left at their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct Parms {
    log_file: Option<String>,
    log_format: Option<LogFormat>,
    verbosity: Option<i32>,
    fifo_path: Option<String>,
    config_dir: Option<String>,
    keep_deleted: Option<bool>,
    no_harm: Option<bool>,
    idle_interval_ms: Option<u64>,
    #[serde(default)]
    ports: Vec<PortConfig>,
}

fn update_from_parms(parms: Parms, config: &mut Config) {
    if let Some(log_file) = parms.log_file {
        config.log_file = Some(log_file);
    }
    if let Some(log_format) = parms.log_format {
        config.log_format = log_format;
    }
    if let Some(verbosity) = parms.verbosity {
        config.verbosity = verbosity;
    }
    if let Some(fifo_path) = parms.fifo_path {
        config.fifo_path = PathBuf::from(fifo_path);
    }
    if let Some(config_dir) = parms.config_dir {
        config.config_dir = PathBuf::from(config_dir);
    }
    if let Some(keep_deleted) = parms.keep_deleted {
        config.keep_deleted = keep_deleted;
    }
    if let Some(no_harm) = parms.no_harm {
        config.no_harm = no_harm;
    }
    if let Some(ms) = parms.idle_interval_ms {
        config.idle_interval = Duration::from_millis(ms);
    }
    config.ports = parms.ports;
}

pub(crate) fn update_from_file(path: &str, config: &mut Config) -> VfdResult<()> {
    let txt = std::fs::read_to_string(path).map_err(|e| {
        VfdError::Config(format!("unable to read parameter file {path}: {e}"))
    })?;
    let parms: Parms = toml::from_str(&txt)?;
    update_from_parms(parms, config);
    Ok(())
}

fn update_from_cli(opts: &crate::Opt, config: &mut Config) -> VfdResult<()> {
    if let Some(log_file) = &opts.log_file {
        config.log_file = Some(log_file.to_string());
    }

    if let Some(log_format) = opts.log_format {
        config.log_format = log_format;
    }

    if let Some(verbosity) = opts.verbosity {
        config.verbosity = verbosity;
    }

    if let Some(fifo) = &opts.fifo {
        config.fifo_path = PathBuf::from(fifo);
    }

    if let Some(config_dir) = &opts.config_dir {
        config.config_dir = PathBuf::from(config_dir);
    }

    if opts.keep_deleted {
        config.keep_deleted = true;
    }

    if opts.no_harm {
        config.no_harm = true;
    }

    if let Some(ms) = opts.idle_interval_ms {
        config.idle_interval = Duration::from_millis(ms);
    }

    Ok(())
}

fn check(config: &Config) -> VfdResult<()> {
    if config.verbosity < 0 {
        return Err(VfdError::Config(format!(
            "verbosity must not be negative: {}",
            config.verbosity
        )));
    }
    if config.idle_interval.is_zero() {
        return Err(VfdError::Config(
            "idle interval must be non-zero".to_string(),
        ));
    }
    for (idx, port) in config.ports.iter().enumerate() {
        if port.pciid.is_empty() {
            return Err(VfdError::Config(format!("port {idx} has no pciid")));
        }
        if port.num_vfs as usize > MAX_VFS {
            return Err(VfdError::Config(format!(
                "port {}: num_vfs {} exceeds the maximum ({MAX_VFS})",
                port.pciid, port.num_vfs
            )));
        }
        if config.ports[..idx].iter().any(|p| p.pciid == port.pciid) {
            return Err(VfdError::Config(format!(
                "port {} is listed more than once",
                port.pciid
            )));
        }
    }
    Ok(())
}

pub(crate) fn build_config(opts: &crate::Opt) -> VfdResult<Config> {
    let mut config = Config::default();
    if let Some(parms) = &opts.parms {
        update_from_file(parms, &mut config)?;
    }
    update_from_cli(opts, &mut config)?;
    check(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Opt;

    use std::io::Write;

    const PARMS: &str = r#"
log_format = "json"
verbosity = 2
fifo_path = "/tmp/vfd/request"
config_dir = "/tmp/vfd/config"
keep_deleted = true
idle_interval_ms = 250

[[ports]]
pciid = "0000:01:00.0"
num_vfs = 16

[[ports]]
pciid = "0000:01:00.1"
mtu = 1500
num_vfs = 32
loopback = true
oversubscribe = true
"#;

    fn parms_file(text: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_defaults() {
        let config = build_config(&Opt::default()).unwrap();
        assert_eq!(config.log_file, None);
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.verbosity, 1);
        assert_eq!(
            config.fifo_path,
            PathBuf::from(common::DEFAULT_REQUEST_FIFO)
        );
        assert_eq!(config.idle_interval, Duration::from_secs(1));
        assert!(!config.keep_deleted);
        assert!(config.ports.is_empty());
    }

    #[test]
    fn test_parms_file() {
        let f = parms_file(PARMS);
        let opts = Opt {
            parms: Some(f.path().display().to_string()),
            ..Opt::default()
        };
        let config = build_config(&opts).unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.config_dir, PathBuf::from("/tmp/vfd/config"));
        assert!(config.keep_deleted);
        assert_eq!(config.idle_interval, Duration::from_millis(250));
        assert_eq!(config.ports.len(), 2);
        assert_eq!(config.ports[0].mtu, DEFAULT_MTU);
        assert!(!config.ports[0].oversubscribe);
        assert_eq!(config.ports[1].mtu, 1500);
        assert!(config.ports[1].loopback);
        assert!(config.ports[1].oversubscribe);
    }

    #[test]
    fn test_updates() {
        let f = parms_file(PARMS);
        let opts = Opt {
            parms: Some(f.path().display().to_string()),
            log_file: Some("test.log".to_string()),
            verbosity: Some(0),
            fifo: Some("/tmp/other".to_string()),
            no_harm: true,
            ..Opt::default()
        };
        let config = build_config(&opts).unwrap();
        assert_eq!(config.log_file, Some("test.log".to_string()));
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.fifo_path, PathBuf::from("/tmp/other"));
        assert!(config.no_harm);
        // Untouched by the command line
        assert!(config.keep_deleted);
        assert_eq!(config.ports.len(), 2);
    }

    #[test]
    fn test_bad_parms() {
        let f = parms_file("verbosity = 1\nbogus = true\n");
        let opts = Opt {
            parms: Some(f.path().display().to_string()),
            ..Opt::default()
        };
        assert!(matches!(build_config(&opts), Err(VfdError::Config(_))));

        let f = parms_file(
            "[[ports]]\npciid = \"0000:01:00.0\"\nnum_vfs = 33\n",
        );
        let opts = Opt {
            parms: Some(f.path().display().to_string()),
            ..Opt::default()
        };
        assert!(matches!(build_config(&opts), Err(VfdError::Config(_))));

        let f = parms_file(
            "[[ports]]\npciid = \"a\"\nnum_vfs = 1\n\
             [[ports]]\npciid = \"a\"\nnum_vfs = 2\n",
        );
        let opts = Opt {
            parms: Some(f.path().display().to_string()),
            ..Opt::default()
        };
        assert!(matches!(build_config(&opts), Err(VfdError::Config(_))));

        let opts = Opt {
            parms: Some("/nonexistent/vfd.parms".to_string()),
            ..Opt::default()
        };
        assert!(build_config(&opts).is_err());
    }
}
