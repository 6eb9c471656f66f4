//! Shared setup for node operation tests.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use super::{NodeConfig, NodeService};
use crate::csi;
use crate::csi::volume_capability::access_mode::Mode;
use crate::device::DEFAULT_DEVICE_PREFIX;
use crate::platform::InMemoryMounter;

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub mounter: Arc<InMemoryMounter>,
    pub service: NodeService,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let dev_dir = dir.path().join("by-id");
        fs::create_dir(&dev_dir).unwrap();

        let mut config = NodeConfig::new("test-node");
        config.device_dir = dev_dir;

        let mounter = Arc::new(InMemoryMounter::new());
        let service = NodeService::new(config, mounter.clone());
        Self {
            dir,
            mounter,
            service,
        }
    }

    /// Attach `volume_id` by linking it to a character device node.
    pub fn attach(&self, volume_id: &str, node: &str) {
        let link = self
            .dir
            .path()
            .join("by-id")
            .join(format!("{}{}", DEFAULT_DEVICE_PREFIX, volume_id));
        symlink(node, link).unwrap();
    }

    /// Create a directory under the fixture root and return its path.
    pub fn mkdir(&self, name: &str) -> String {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path).unwrap();
        path.to_str().unwrap().to_string()
    }

    pub fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_str().unwrap().to_string()
    }

    pub fn stage_request(
        &self,
        volume_id: &str,
        staging: &str,
        mode: Mode,
    ) -> csi::NodeStageVolumeRequest {
        csi::NodeStageVolumeRequest {
            volume_id: volume_id.to_string(),
            staging_target_path: staging.to_string(),
            volume_capability: Some(mount_capability("", mode)),
            ..Default::default()
        }
    }

    pub fn unstage_request(&self, volume_id: &str, staging: &str) -> csi::NodeUnstageVolumeRequest {
        csi::NodeUnstageVolumeRequest {
            volume_id: volume_id.to_string(),
            staging_target_path: staging.to_string(),
        }
    }

    pub fn publish_request(
        &self,
        volume_id: &str,
        staging: &str,
        target: &str,
        readonly: bool,
    ) -> csi::NodePublishVolumeRequest {
        csi::NodePublishVolumeRequest {
            volume_id: volume_id.to_string(),
            staging_target_path: staging.to_string(),
            target_path: target.to_string(),
            volume_capability: Some(mount_capability("", Mode::SingleNodeWriter)),
            readonly,
            ..Default::default()
        }
    }

    pub fn unpublish_request(
        &self,
        volume_id: &str,
        target: &str,
    ) -> csi::NodeUnpublishVolumeRequest {
        csi::NodeUnpublishVolumeRequest {
            volume_id: volume_id.to_string(),
            target_path: target.to_string(),
        }
    }

    pub fn mounts_at(&self, path: &str) -> usize {
        self.mounter
            .mounts()
            .iter()
            .filter(|m| Path::new(&m.path) == Path::new(path))
            .count()
    }
}

pub(crate) fn mount_capability(fs_type: &str, mode: Mode) -> csi::VolumeCapability {
    csi::VolumeCapability {
        access_type: Some(csi::volume_capability::AccessType::Mount(
            csi::volume_capability::MountVolume {
                fs_type: fs_type.to_string(),
                ..Default::default()
            },
        )),
        access_mode: Some(csi::volume_capability::AccessMode { mode: mode as i32 }),
    }
}
