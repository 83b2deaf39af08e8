//! SCSI bus rescan and address-based disk lookup.
//!
//! The host names a hotplugged SCSI disk by address, never by kernel name.
//! After a rescan the kernel publishes the disk under
//! `scsi_disk/0:0:<target>:<lun>/device/block/<name>`, which is all the guest
//! needs to find it.

use std::io;
use std::path::Path;

use hotmount_shared::constants::hotplug;
use hotmount_shared::errors::{HotmountError, HotmountResult};

/// Ask every SCSI host to probe all channels, targets and LUNs.
pub fn scan_scsi_bus(scsi_host_dir: &Path) -> HotmountResult<()> {
    let entries = std::fs::read_dir(scsi_host_dir).map_err(|e| {
        HotmountError::io(
            format!("Failed to read SCSI host registry {}", scsi_host_dir.display()),
            e,
        )
    })?;

    let mut scanned = 0;
    for entry in entries {
        let entry = entry.map_err(|e| {
            HotmountError::io(
                format!("Failed to list {}", scsi_host_dir.display()),
                e,
            )
        })?;
        let scan_path = entry.path().join("scan");
        std::fs::write(&scan_path, hotplug::SCSI_SCAN_WILDCARD).map_err(|e| {
            HotmountError::io(format!("Failed to trigger {}", scan_path.display()), e)
        })?;
        scanned += 1;
    }

    tracing::debug!("Rescanned {} SCSI hosts", scanned);
    Ok(())
}

/// Kernel name of the single disk bound to `scsi_addr` (`target:lun`).
pub fn find_scsi_disk(scsi_disk_dir: &Path, scsi_addr: &str) -> HotmountResult<String> {
    let block_dir = scsi_disk_dir
        .join(format!("{}:{}", hotplug::SCSI_HOST_CHANNEL, scsi_addr))
        .join("device")
        .join("block");

    let entries = match std::fs::read_dir(&block_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(HotmountError::NotFound(format!(
                "no SCSI disk at address {} ({})",
                scsi_addr,
                block_dir.display()
            )));
        }
        Err(e) => {
            return Err(HotmountError::io(
                format!("Failed to read {}", block_dir.display()),
                e,
            ));
        }
    };

    let mut names = entries
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| HotmountError::io(format!("Failed to list {}", block_dir.display()), e))?;
    names.sort();

    match names.len() {
        0 => Err(HotmountError::NotFound(format!(
            "no block device under {}",
            block_dir.display()
        ))),
        1 => Ok(names.remove(0)),
        _ => Err(HotmountError::AmbiguousDevice {
            path: block_dir,
            entries: names,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk_dir(root: &Path, addr: &str) -> std::path::PathBuf {
        root.join(format!("0:0:{}", addr)).join("device/block")
    }

    #[test]
    fn test_scan_writes_wildcard_to_every_host() {
        let tmp = tempfile::tempdir().unwrap();
        for host in ["host0", "host1"] {
            std::fs::create_dir_all(tmp.path().join(host)).unwrap();
        }

        scan_scsi_bus(tmp.path()).unwrap();

        for host in ["host0", "host1"] {
            let written = std::fs::read_to_string(tmp.path().join(host).join("scan")).unwrap();
            assert_eq!(written, "0 0 0");
        }
    }

    #[test]
    fn test_scan_without_registry() {
        let tmp = tempfile::tempdir().unwrap();
        let err = scan_scsi_bus(&tmp.path().join("scsi_host")).unwrap_err();
        assert!(matches!(err, HotmountError::Io { .. }));
    }

    #[test]
    fn test_scan_write_failure() {
        let tmp = tempfile::tempdir().unwrap();
        // A host whose scan file is a directory cannot be written.
        std::fs::create_dir_all(tmp.path().join("host0/scan")).unwrap();
        assert!(scan_scsi_bus(tmp.path()).is_err());
    }

    #[test]
    fn test_find_single_disk() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(disk_dir(tmp.path(), "2:0").join("sda")).unwrap();

        assert_eq!(find_scsi_disk(tmp.path(), "2:0").unwrap(), "sda");
    }

    #[test]
    fn test_find_missing_address() {
        let tmp = tempfile::tempdir().unwrap();
        let err = find_scsi_disk(tmp.path(), "2:0").unwrap_err();
        assert!(matches!(err, HotmountError::NotFound(_)));
    }

    #[test]
    fn test_find_empty_block_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(disk_dir(tmp.path(), "2:0")).unwrap();
        let err = find_scsi_disk(tmp.path(), "2:0").unwrap_err();
        assert!(matches!(err, HotmountError::NotFound(_)));
    }

    #[test]
    fn test_find_ambiguous() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = disk_dir(tmp.path(), "2:0");
        std::fs::create_dir_all(dir.join("sdb")).unwrap();
        std::fs::create_dir_all(dir.join("sda")).unwrap();

        match find_scsi_disk(tmp.path(), "2:0").unwrap_err() {
            HotmountError::AmbiguousDevice { entries, .. } => {
                assert_eq!(entries, vec!["sda".to_string(), "sdb".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
