//! Resolution of volume IDs to local block devices.
//!
//! A volume attached to the node out-of-band shows up as a stable symlink
//! `<device dir>/<prefix><volume id>` (by default
//! `/dev/disk/by-id/wwn-0x<volume id>`). The naming scheme is fixed by the
//! attacher and must not change.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{NodeError, Result};

/// Directory holding the stable device links
pub const DEFAULT_DEVICE_DIR: &str = "/dev/disk/by-id";

/// Prefix prepended to the volume ID to form the link name
pub const DEFAULT_DEVICE_PREFIX: &str = "wwn-0x";

/// A local block device backing a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Path the driver addresses (the stable link)
    pub full_path: String,
    /// Symlink-free device node
    pub real_path: String,
    /// File name of the stable link
    pub name: String,
}

/// Maps volume IDs to devices using the stable link naming convention.
///
/// Holds only the naming convention; every call reads the filesystem again
/// because devices come and go with attach/detach outside the driver.
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    device_dir: PathBuf,
    prefix: String,
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_DIR, DEFAULT_DEVICE_PREFIX)
    }
}

impl DeviceResolver {
    pub fn new(device_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            device_dir: device_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn device_dir(&self) -> &Path {
        &self.device_dir
    }

    /// Name of the stable link for `volume_id`.
    pub fn link_name(&self, volume_id: &str) -> String {
        format!("{}{}", self.prefix, volume_id)
    }

    /// Resolve `volume_id` to the device currently attached for it.
    pub fn resolve(&self, volume_id: &str) -> Result<Device> {
        let path = self.attached_path(volume_id)?;

        get_device(&path).map_err(|e| {
            NodeError::Internal(format!(
                "error getting block device for volume: {}, err: {}",
                volume_id, e
            ))
        })
    }

    /// Find the stable link for `volume_id` in the device directory.
    fn attached_path(&self, volume_id: &str) -> Result<PathBuf> {
        if volume_id.is_empty() {
            return Err(NodeError::InvalidArgument(
                "Volume ID is required".to_string(),
            ));
        }

        let wanted = self.link_name(volume_id);

        let entries = fs::read_dir(&self.device_dir).map_err(|e| {
            NodeError::Internal(format!(
                "Error trying to read attached disks in {}: {}",
                self.device_dir.display(),
                e
            ))
        })?;

        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy() == wanted {
                return Ok(self.device_dir.join(&wanted));
            }
        }

        Err(NodeError::NotFound(format!(
            "Volume ID: {} not attached to node",
            volume_id
        )))
    }
}

/// Describe the device at `path`, following symlinks to the real node.
///
/// Fails if the path does not exist or does not end at a device node.
fn get_device(path: &Path) -> std::result::Result<Device, String> {
    let link = fs::symlink_metadata(path).map_err(|e| e.to_string())?;
    debug!(path = %path.display(), is_symlink = link.file_type().is_symlink(), "Resolving device");

    let real = fs::canonicalize(path).map_err(|e| e.to_string())?;
    let meta = fs::metadata(&real).map_err(|e| e.to_string())?;

    let file_type = meta.file_type();
    if !file_type.is_block_device() && !file_type.is_char_device() {
        return Err(format!("{} is not a block device", path.display()));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Device {
        full_path: path.to_string_lossy().into_owned(),
        real_path: real.to_string_lossy().into_owned(),
        name,
    })
}
