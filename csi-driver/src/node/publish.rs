//! NodePublishVolume / NodeUnpublishVolume.
//!
//! Publishing bind mounts the staging directory into the workload's target
//! path. The staged filesystem and each of its bind mounts all show up in
//! the mount table under the same device.

use std::fs::{self, DirBuilder};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;

use tracing::{debug, info};

use super::{NodeService, validate_path, verify_target_dir};
use crate::capability::{self, rw_option};
use crate::csi;
use crate::error::{NodeError, Result};
use crate::mounts;

/// Permission bits for publish target directories created by the driver
pub const TARGET_DIR_MODE: u32 = 0o750;

/// Create the publish target directory if it does not exist yet.
///
/// Returns whether the directory was created. Only the last component is
/// created; the parent must already exist. An existing entry of any type
/// is left alone; the mount call rejects non-directories.
fn ensure_target_dir(target: &str) -> Result<bool> {
    match fs::symlink_metadata(target) {
        Ok(_) => Ok(false),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            DirBuilder::new()
                .mode(TARGET_DIR_MODE)
                .create(target)
                .map_err(|e| {
                    NodeError::Internal(format!(
                        "Unable to create target dir: {}, err: {}",
                        target, e
                    ))
                })?;
            debug!(path = %target, "Created target directory");
            Ok(true)
        }
        Err(e) => Err(NodeError::Internal(format!(
            "Unable to create target dir: {}, err: {}",
            target, e
        ))),
    }
}

impl NodeService {
    pub(crate) fn publish_volume(&self, req: &csi::NodePublishVolumeRequest) -> Result<()> {
        let volume_id = &req.volume_id;
        let device = self.resolver.resolve(volume_id)?;

        let target = &req.target_path;
        if target.is_empty() {
            return Err(NodeError::InvalidArgument(
                "Target path is required".to_string(),
            ));
        }
        validate_path(target)?;

        // The driver is responsible for creating the target directory
        ensure_target_dir(target)?;

        let staging_target = &req.staging_target_path;
        verify_target_dir(staging_target)?;

        let params = capability::translate(req.volume_capability.as_ref())?;
        let ro = req.readonly;

        let dev_mnts = mounts::mounts_for_device(self.mounter(), &device)?;

        // A staged volume has at least its staging mount; more than one may
        // mean it is already published here.
        if dev_mnts.len() > 1 {
            if let Some(m) = dev_mnts.iter().find(|m| m.path == *target) {
                if !m.has_option(rw_option(ro)) {
                    return Err(NodeError::AlreadyExists(format!(
                        "volume {} previously published to {} with different options",
                        volume_id, target
                    )));
                }

                debug!(
                    volume_id = %volume_id,
                    target_path = %target,
                    "Volume already published to target"
                );
                return Ok(());
            }
        } else if dev_mnts.is_empty() {
            return Err(NodeError::FailedPrecondition(format!(
                "Volume ID: {} does not appear staged to {}",
                volume_id, staging_target
            )));
        }

        let mut flags = params.flags;
        if ro {
            flags.push("ro".to_string());
        }

        self.mounter()
            .bind_mount(staging_target, target, &flags)
            .map_err(|e| {
                NodeError::Internal(format!(
                    "error publishing volume {} to target path {}: {}",
                    volume_id, target, e
                ))
            })?;

        info!(
            volume_id = %volume_id,
            target_path = %target,
            readonly = ro,
            "Volume published successfully"
        );
        Ok(())
    }

    pub(crate) fn unpublish_volume(&self, req: &csi::NodeUnpublishVolumeRequest) -> Result<()> {
        let volume_id = &req.volume_id;
        let device = self.resolver.resolve(volume_id)?;

        let target = &req.target_path;
        if target.is_empty() {
            return Err(NodeError::InvalidArgument(
                "Target path is required".to_string(),
            ));
        }
        validate_path(target)?;

        // Not filtered by device first: a bind mount may record the device
        // either directly or through a pseudo filesystem source.
        let matching = mounts::mounts_at_path(self.mounter(), target)?
            .into_iter()
            .filter(|m| m.source == device.real_path || m.device == device.real_path)
            .count();

        if matching == 0 {
            debug!(
                volume_id = %volume_id,
                target_path = %target,
                "Volume not mounted at target, already unpublished"
            );
            return Ok(());
        }

        for _ in 0..matching {
            self.mounter().unmount(target).map_err(|e| {
                NodeError::Internal(format!("Error unmounting target {}: {}", target, e))
            })?;
        }

        // The directory is empty once unmounted; a failure here leaves the
        // unmount in place and the caller retries.
        debug!(path = %target, "Removing target directory");
        fs::remove_dir(target).map_err(|e| {
            NodeError::Internal(format!(
                "Unable to remove target dir: {}, err: {}",
                target, e
            ))
        })?;

        info!(
            volume_id = %volume_id,
            target_path = %target,
            "Volume unpublished successfully"
        );
        Ok(())
    }
}
