//! NodeStageVolume / NodeUnstageVolume.
//!
//! Per (volume, node) a volume is Unattached (no device link), Unstaged
//! (device present, not mounted) or Staged (device mounted at the staging
//! path). The device may carry at most one mount while staged and not
//! published.

use tracing::{debug, info};

use super::{NodeService, verify_target_dir};
use crate::capability;
use crate::csi;
use crate::error::{NodeError, Result};
use crate::mounts;

impl NodeService {
    pub(crate) fn stage_volume(&self, req: &csi::NodeStageVolumeRequest) -> Result<()> {
        let volume_id = &req.volume_id;
        let device = self.resolver.resolve(volume_id)?;

        // Check that the staging path is created by the CO and is a directory
        let target = &req.staging_target_path;
        verify_target_dir(target)?;

        let params = capability::translate(req.volume_capability.as_ref())?;

        let mnts = mounts::mounts_for_device(self.mounter(), &device)?;

        if mnts.is_empty() {
            // Read-only volumes are never formatted
            if params.read_only {
                let mut flags = params.flags.clone();
                flags.push("ro".to_string());

                self.mounter()
                    .mount(&device.full_path, target, &params.fs_type, &flags)
                    .map_err(|e| {
                        NodeError::Internal(format!(
                            "error with mount during staging of volume {} to {}: {}",
                            volume_id, target, e
                        ))
                    })?;
            } else {
                self.mounter()
                    .format_and_mount(&device.full_path, target, &params.fs_type, &params.flags)
                    .map_err(|e| {
                        NodeError::Internal(format!(
                            "error with format and mount during staging of volume {} to {}: {}",
                            volume_id, target, e
                        ))
                    })?;
            }

            info!(
                volume_id = %volume_id,
                staging_target_path = %target,
                device = %device.real_path,
                fs_type = %params.fs_type,
                read_only = params.read_only,
                "Volume staged successfully"
            );
            return Ok(());
        }

        // Already mounted: it must be at the staging path with matching rw/ro
        match mnts.iter().find(|m| m.path == *target) {
            Some(m) if m.has_option(params.rw_option()) => {
                debug!(
                    volume_id = %volume_id,
                    staging_target_path = %target,
                    "Volume already staged"
                );
                Ok(())
            }
            Some(m) => Err(NodeError::AlreadyExists(format!(
                "access mode conflicts with existing mount of volume {} at {} (options: {})",
                volume_id,
                target,
                m.options.join(",")
            ))),
            None => Err(NodeError::Internal(format!(
                "device {} of volume {} already in use and mounted elsewhere",
                device.real_path, volume_id
            ))),
        }
    }

    pub(crate) fn unstage_volume(&self, req: &csi::NodeUnstageVolumeRequest) -> Result<()> {
        let volume_id = &req.volume_id;
        let device = self.resolver.resolve(volume_id)?;

        let target = &req.staging_target_path;
        verify_target_dir(target)?;

        let mnts = mounts::mounts_for_device(self.mounter(), &device)?;

        let mnt = match mnts.as_slice() {
            [] => {
                debug!(volume_id = %volume_id, "Volume not mounted, already unstaged");
                return Ok(());
            }
            [mnt] => mnt,
            _ => {
                let paths: Vec<&str> = mnts.iter().map(|m| m.path.as_str()).collect();
                return Err(NodeError::Internal(format!(
                    "volume: {} appears mounted in multiple places: {}",
                    volume_id,
                    paths.join(", ")
                )));
            }
        };

        if mnt.source != device.real_path || mnt.path != *target {
            return Err(NodeError::Internal(format!(
                "volume {} is mounted someplace other than target: {}, mounted to: {}",
                volume_id, target, mnt.path
            )));
        }

        self.mounter().unmount(target).map_err(|e| {
            NodeError::Internal(format!("Error unmounting target {}: {}", target, e))
        })?;

        info!(
            volume_id = %volume_id,
            staging_target_path = %target,
            "Volume unstaged successfully"
        );
        Ok(())
    }
}
