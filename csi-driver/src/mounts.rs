//! Mount table queries correlated to a device or a path.
//!
//! Every query reads the full table again through the [`Mounter`]; mounts
//! change between calls because of actors outside the driver.

use crate::device::Device;
use crate::error::{NodeError, Result};
use crate::platform::{MountRecord, Mounter};

/// Read the full mount table.
pub fn all_mounts(mounter: &dyn Mounter) -> Result<Vec<MountRecord>> {
    mounter.list_mounts().map_err(|e| {
        NodeError::Internal(format!(
            "could not reliably determine existing mount status: {}",
            e
        ))
    })
}

/// Mounts of `device`, including bind mounts recorded through a pseudo
/// filesystem source.
pub fn mounts_for_device(mounter: &dyn Mounter, device: &Device) -> Result<Vec<MountRecord>> {
    Ok(all_mounts(mounter)?
        .into_iter()
        .filter(|m| m.refers_to(&device.real_path))
        .collect())
}

/// Mounts whose mount point is `path`.
pub fn mounts_at_path(mounter: &dyn Mounter, path: &str) -> Result<Vec<MountRecord>> {
    Ok(all_mounts(mounter)?
        .into_iter()
        .filter(|m| m.path == path)
        .collect())
}
