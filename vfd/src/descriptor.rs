// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Access to the VF configuration files on disk.

use std::ffi::OsStr;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::path::PathBuf;

use crate::types::VfdError;
use crate::types::VfdResult;
use vfd_types::descriptor::VfDescriptor;

/// Read and parse a single VF configuration file.  If the file doesn't name
/// an owner, the VF is owned by whoever owns the file.
pub fn read_descriptor(path: &Path) -> VfdResult<VfDescriptor> {
    let fail = |reason: String| VfdError::Descriptor {
        path: path.display().to_string(),
        reason,
    };

    let txt = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
    let mut desc: VfDescriptor =
        serde_json::from_str(&txt).map_err(|e| fail(e.to_string()))?;
    if desc.owner.is_none() {
        desc.owner = std::fs::metadata(path).ok().map(|md| md.uid());
    }
    Ok(desc)
}

/// List the `*.json` files in a directory, in sorted order.
pub fn list_descriptor_files(dir: &Path) -> VfdResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension() == Some(OsStr::new("json")) && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_fills_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vf1.json");
        std::fs::write(&path, r#"{ "pciid": "0000:01:00.0", "vfid": 1 }"#)
            .unwrap();
        let desc = read_descriptor(&path).unwrap();
        let uid = std::fs::metadata(&path).unwrap().uid();
        assert_eq!(desc.owner, Some(uid));

        std::fs::write(
            &path,
            r#"{ "pciid": "0000:01:00.0", "vfid": 1, "owner": 4242 }"#,
        )
        .unwrap();
        assert_eq!(read_descriptor(&path).unwrap().owner, Some(4242));
    }

    #[test]
    fn test_read_failures() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = read_descriptor(&path).unwrap_err();
        assert!(err
            .to_string()
            .starts_with(&format!("unable to read config file: {}", path.display())));

        std::fs::write(&path, "{ \"pciid\": ").unwrap();
        assert!(matches!(
            read_descriptor(&path),
            Err(VfdError::Descriptor { .. })
        ));
    }

    #[test]
    fn test_list() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.json", "a.json", "c.json-", "notes.txt"] {
            std::fs::write(dir.path().join(name), "{}").unwrap();
        }
        std::fs::create_dir(dir.path().join("d.json")).unwrap();

        let files = list_descriptor_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);

        assert!(list_descriptor_files(&dir.path().join("nope")).is_err());
    }
}
