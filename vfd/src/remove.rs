// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Removal of VFs from the configuration store.

use std::path::Path;

use slog::debug;
use slog::info;
use slog::warn;

use crate::descriptor;
use crate::store::ConfigStore;
use crate::store::UpdateMarker;
use crate::types::VfError;
use crate::types::VfdError;
use crate::types::VfdResult;

// Take the configuration file out of service, so that the VF isn't restored
// the next time the daemon starts.
fn retire(path: &Path, keep_deleted: bool) -> VfdResult<()> {
    let (action, result) = if keep_deleted {
        let mut dest = path.as_os_str().to_owned();
        dest.push("-");
        ("rename", std::fs::rename(path, &dest))
    } else {
        ("delete", std::fs::remove_file(path))
    };
    result.map_err(|err| VfdError::Retire {
        action,
        path: path.display().to_string(),
        err,
    })
}

/// Mark the VF described by a configuration file for deletion, retiring the
/// file.  The slot is released once the reconciler has removed the VF from
/// the hardware.
pub fn del_vf(
    store: &mut ConfigStore,
    log: &slog::Logger,
    path: &Path,
    keep_deleted: bool,
) -> VfdResult<()> {
    let desc = descriptor::read_descriptor(path)?;
    retire(path, keep_deleted)?;
    debug!(log, "delete: config data";
        "name" => &desc.name,
        "pciid" => desc.pciid.as_deref(),
        "vfid" => desc.vfid,
        "kept" => keep_deleted);

    let pciid = desc.target().ok_or(VfError::Malformed)?;
    let port = store.port_mut(pciid).ok_or_else(|| VfError::NoSuchPort {
        name: desc.name.clone(),
        pciid: pciid.clone(),
    })?;

    match port.find_vf(desc.vfid).and_then(|slot| port.vf_mut(slot)) {
        Some(vf) => {
            vf.marker = UpdateMarker::Deleted;
            info!(log, "vf marked for deletion";
                "pciid" => pciid,
                "vfid" => desc.vfid);
        }
        None => warn!(log, "del didn't find the pciid/vf combination";
            "pciid" => pciid,
            "vfid" => desc.vfid),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admit;
    use crate::store::test::port_config;

    const PCI: &str = "0000:01:00.0";

    fn setup() -> (slog::Logger, ConfigStore, tempfile::TempDir) {
        let log = crate::test_util::logger();
        let mut store = ConfigStore::new(&log);
        store.add_ports(&[port_config(PCI, 32)]);
        (log, store, tempfile::tempdir().unwrap())
    }

    fn write_vf(dir: &Path, name: &str, pciid: &str, vfid: i32) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(
            &path,
            format!(r#"{{ "pciid": "{pciid}", "vfid": {vfid} }}"#),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_delete_marks_vf() {
        let (log, mut store, dir) = setup();
        let path = write_vf(dir.path(), "vf3.json", PCI, 3);
        admit::load_vf(&mut store, &log, &path).unwrap();

        del_vf(&mut store, &log, &path, false).unwrap();
        assert!(!path.exists());
        let port = store.port(PCI).unwrap();
        let slot = port.find_vf(3).unwrap();
        let vf = port.vf(slot).unwrap();
        assert_eq!(vf.marker, UpdateMarker::Deleted);
        assert_eq!(vf.id, 3);
    }

    #[test]
    fn test_keep_deleted_renames() {
        let (log, mut store, dir) = setup();
        let path = write_vf(dir.path(), "vf3.json", PCI, 3);
        admit::load_vf(&mut store, &log, &path).unwrap();

        del_vf(&mut store, &log, &path, true).unwrap();
        assert!(!path.exists());
        assert!(dir.path().join("vf3.json-").exists());
    }

    #[test]
    fn test_missing_file_changes_nothing() {
        let (log, mut store, dir) = setup();
        let path = write_vf(dir.path(), "vf3.json", PCI, 3);
        admit::load_vf(&mut store, &log, &path).unwrap();
        std::fs::remove_file(&path).unwrap();
        let before = store.ports().to_vec();

        let r = del_vf(&mut store, &log, &path, false);
        assert!(matches!(r, Err(VfdError::Descriptor { .. })));
        assert_eq!(store.ports(), &before[..]);
    }

    #[test]
    fn test_unknown_vf_is_not_an_error() {
        let (log, mut store, dir) = setup();
        let path = write_vf(dir.path(), "vf9.json", PCI, 9);
        del_vf(&mut store, &log, &path, false).unwrap();
        assert!(!path.exists());
        assert_eq!(store.port(PCI).unwrap().active_vfs(), 0);
    }

    #[test]
    fn test_unknown_port() {
        let (log, mut store, dir) = setup();
        let path = write_vf(dir.path(), "vf1.json", "0000:02:00.0", 1);
        let r = del_vf(&mut store, &log, &path, false);
        assert!(matches!(
            r,
            Err(VfdError::Rejected(VfError::NoSuchPort { .. }))
        ));
    }

    #[test]
    fn test_malformed() {
        let (log, mut store, dir) = setup();
        let path = write_vf(dir.path(), "vf0.json", PCI, 0);
        let r = del_vf(&mut store, &log, &path, false);
        assert!(matches!(r, Err(VfdError::Rejected(VfError::Malformed))));
    }
}
