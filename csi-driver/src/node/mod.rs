//! CSI Node Service Implementation
//!
//! Handles volume staging and publishing on worker nodes. Volumes are
//! attached to the node out-of-band and appear as stable links under the
//! device directory; this service formats and mounts them to a staging
//! path and bind mounts them into workload paths.
//!
//! The service keeps no record of what it mounted. Each operation resolves
//! the device and reads the mount table again, then decides between
//! "already done", "conflict" and "do it". Operations on the same volume
//! are serialized with [`VolumeLocks`].

#[cfg(test)]
mod fixture;
mod publish;
mod stage;

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};

use crate::csi;
use crate::device::{DEFAULT_DEVICE_DIR, DEFAULT_DEVICE_PREFIX, DeviceResolver};
use crate::error::{NodeError, Result};
use crate::locks::{VolumeGuard, VolumeLocks};
use crate::metrics::OperationTimer;
use crate::platform::{LinuxMounter, Mounter};

/// Default attachable volume limit: four paravirtual SCSI controllers with
/// 15 targets each, minus the boot disk.
pub const DEFAULT_MAX_VOLUMES_PER_NODE: i64 = 59;

/// Node-level settings for the Node service.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// The node identifier reported to the orchestrator
    pub node_id: String,
    /// Maximum number of volumes the orchestrator may attach to this node
    pub max_volumes_per_node: i64,
    /// Directory holding the stable device links
    pub device_dir: PathBuf,
    /// Prefix of a device link name before the volume ID
    pub device_prefix: String,
}

impl NodeConfig {
    /// Config with the standard device naming convention and volume limit.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            max_volumes_per_node: DEFAULT_MAX_VOLUMES_PER_NODE,
            device_dir: PathBuf::from(DEFAULT_DEVICE_DIR),
            device_prefix: DEFAULT_DEVICE_PREFIX.to_string(),
        }
    }
}

/// CSI Node Service
///
/// Implements the CSI Node service which handles:
/// - Volume staging (format if needed, mount to staging path)
/// - Volume unstaging (unmount from staging path)
/// - Volume publishing (bind mount from staging to target path)
/// - Volume unpublishing (unmount from target path, remove the directory)
/// - Node capability and info reporting
pub struct NodeService {
    config: NodeConfig,
    resolver: DeviceResolver,
    mounter: Arc<dyn Mounter>,
    locks: VolumeLocks,
}

impl NodeService {
    /// Create a NodeService that mounts through the given [`Mounter`].
    pub fn new(config: NodeConfig, mounter: Arc<dyn Mounter>) -> Self {
        let resolver = DeviceResolver::new(&config.device_dir, &config.device_prefix);
        Self {
            config,
            resolver,
            mounter,
            locks: VolumeLocks::new(),
        }
    }

    /// Create a NodeService operating on the live system.
    pub fn linux(config: NodeConfig) -> Self {
        Self::new(config, Arc::new(LinuxMounter::new()))
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Serialize operations on one volume. Requests without a volume ID
    /// fail validation before touching anything, so they skip the lock.
    async fn lock_volume(&self, volume_id: &str) -> Option<VolumeGuard> {
        if volume_id.is_empty() {
            return None;
        }
        Some(self.locks.lock(volume_id).await)
    }

    fn mounter(&self) -> &dyn Mounter {
        self.mounter.as_ref()
    }
}

/// Validate that a caller-supplied path is absolute and plain.
///
/// Paths end up as arguments to mount tools and are compared verbatim with
/// mount table entries, so traversal and control characters are rejected.
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(NodeError::InvalidArgument(format!(
            "Path must be absolute: {}",
            path
        )));
    }

    if path.split('/').any(|component| component == "..") {
        return Err(NodeError::InvalidArgument(
            "Path cannot contain '..' (path traversal)".to_string(),
        ));
    }

    if path.chars().any(char::is_control) {
        return Err(NodeError::InvalidArgument(
            "Path cannot contain control characters".to_string(),
        ));
    }

    Ok(())
}

/// Check that a target directory was pre-created by the orchestrator.
pub(crate) fn verify_target_dir(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(NodeError::InvalidArgument(
            "target path required".to_string(),
        ));
    }

    validate_path(target)?;

    let meta = fs::metadata(target).map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            NodeError::FailedPrecondition(format!("target: {} not pre-created", target))
        } else {
            NodeError::Internal(format!("failed to stat target {}, err: {}", target, e))
        }
    })?;

    if !meta.is_dir() {
        return Err(NodeError::FailedPrecondition(format!(
            "existing path: {} is not a directory",
            target
        )));
    }

    Ok(())
}

/// Record metrics and log the outcome of a node operation.
fn complete<T>(
    timer: OperationTimer,
    rpc: &str,
    volume_id: &str,
    result: Result<T>,
) -> std::result::Result<T, Status> {
    timer.finish(&result);
    result.map_err(|e| {
        warn!(volume_id = %volume_id, code = e.label(), error = %e, "{} failed", rpc);
        Status::from(e)
    })
}

#[tonic::async_trait]
impl csi::node_server::Node for NodeService {
    /// Stage a volume to a staging path: format if needed and mount.
    async fn node_stage_volume(
        &self,
        request: Request<csi::NodeStageVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodeStageVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_stage_volume");
        let req = request.into_inner();

        info!(
            volume_id = %req.volume_id,
            staging_target_path = %req.staging_target_path,
            "NodeStageVolume request"
        );

        let _guard = self.lock_volume(&req.volume_id).await;
        let result = self.stage_volume(&req);
        complete(timer, "NodeStageVolume", &req.volume_id, result)?;

        Ok(Response::new(csi::NodeStageVolumeResponse {}))
    }

    /// Unstage a volume from the staging path.
    async fn node_unstage_volume(
        &self,
        request: Request<csi::NodeUnstageVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodeUnstageVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_unstage_volume");
        let req = request.into_inner();

        info!(
            volume_id = %req.volume_id,
            staging_target_path = %req.staging_target_path,
            "NodeUnstageVolume request"
        );

        let _guard = self.lock_volume(&req.volume_id).await;
        let result = self.unstage_volume(&req);
        complete(timer, "NodeUnstageVolume", &req.volume_id, result)?;

        Ok(Response::new(csi::NodeUnstageVolumeResponse {}))
    }

    /// Publish a volume to a target path (bind mount from staging).
    async fn node_publish_volume(
        &self,
        request: Request<csi::NodePublishVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodePublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_publish_volume");
        let req = request.into_inner();

        info!(
            volume_id = %req.volume_id,
            staging_target_path = %req.staging_target_path,
            target_path = %req.target_path,
            readonly = %req.readonly,
            "NodePublishVolume request"
        );

        let _guard = self.lock_volume(&req.volume_id).await;
        let result = self.publish_volume(&req);
        complete(timer, "NodePublishVolume", &req.volume_id, result)?;

        Ok(Response::new(csi::NodePublishVolumeResponse {}))
    }

    /// Unpublish a volume from the target path.
    async fn node_unpublish_volume(
        &self,
        request: Request<csi::NodeUnpublishVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodeUnpublishVolumeResponse>, Status> {
        let timer = OperationTimer::new("node_unpublish_volume");
        let req = request.into_inner();

        info!(
            volume_id = %req.volume_id,
            target_path = %req.target_path,
            "NodeUnpublishVolume request"
        );

        let _guard = self.lock_volume(&req.volume_id).await;
        let result = self.unpublish_volume(&req);
        complete(timer, "NodeUnpublishVolume", &req.volume_id, result)?;

        Ok(Response::new(csi::NodeUnpublishVolumeResponse {}))
    }

    /// Get volume statistics (not implemented, reports nothing).
    async fn node_get_volume_stats(
        &self,
        request: Request<csi::NodeGetVolumeStatsRequest>,
    ) -> std::result::Result<Response<csi::NodeGetVolumeStatsResponse>, Status> {
        let req = request.into_inner();
        debug!(volume_id = %req.volume_id, volume_path = %req.volume_path, "NodeGetVolumeStats request");

        Ok(Response::new(csi::NodeGetVolumeStatsResponse {
            usage: Vec::new(),
            volume_condition: None,
        }))
    }

    /// Expand a volume on this node (capability not advertised).
    async fn node_expand_volume(
        &self,
        _request: Request<csi::NodeExpandVolumeRequest>,
    ) -> std::result::Result<Response<csi::NodeExpandVolumeResponse>, Status> {
        Err(Status::unimplemented("NodeExpandVolume is not supported"))
    }

    /// Report node capabilities.
    async fn node_get_capabilities(
        &self,
        _request: Request<csi::NodeGetCapabilitiesRequest>,
    ) -> std::result::Result<Response<csi::NodeGetCapabilitiesResponse>, Status> {
        let capabilities = vec![csi::NodeServiceCapability {
            r#type: Some(csi::node_service_capability::Type::Rpc(
                csi::node_service_capability::Rpc {
                    r#type: csi::node_service_capability::rpc::Type::StageUnstageVolume as i32,
                },
            )),
        }];

        Ok(Response::new(csi::NodeGetCapabilitiesResponse {
            capabilities,
        }))
    }

    /// Get information about this node.
    async fn node_get_info(
        &self,
        _request: Request<csi::NodeGetInfoRequest>,
    ) -> std::result::Result<Response<csi::NodeGetInfoResponse>, Status> {
        info!(node_id = %self.config.node_id, "NodeGetInfo request");

        Ok(Response::new(csi::NodeGetInfoResponse {
            node_id: self.config.node_id.clone(),
            max_volumes_per_node: self.config.max_volumes_per_node,
            accessible_topology: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryMounter;

    #[test]
    fn test_validate_path_valid() {
        assert!(validate_path("/var/lib/kubelet/plugins/staging").is_ok());
        assert!(validate_path("/mnt/volume").is_ok());
        assert!(validate_path("/tmp/.tmpAbc/dir..name").is_ok());
    }

    #[test]
    fn test_validate_path_invalid() {
        // Relative path
        assert!(validate_path("var/lib").is_err());

        // Path traversal
        assert!(validate_path("/var/../etc").is_err());
        assert!(validate_path("/var/..").is_err());

        // Control characters
        assert!(validate_path("/var/lib\nfoo").is_err());
        assert!(validate_path("/var/lib\0").is_err());
    }

    #[test]
    fn test_verify_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        assert!(verify_target_dir(path).is_ok());

        let missing = dir.path().join("missing");
        assert!(matches!(
            verify_target_dir(missing.to_str().unwrap()),
            Err(NodeError::FailedPrecondition(_))
        ));

        let file = dir.path().join("file");
        fs::write(&file, b"").unwrap();
        assert!(matches!(
            verify_target_dir(file.to_str().unwrap()),
            Err(NodeError::FailedPrecondition(_))
        ));

        assert!(matches!(
            verify_target_dir(""),
            Err(NodeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_node_config_defaults() {
        let config = NodeConfig::new("node-1");
        assert_eq!(config.max_volumes_per_node, DEFAULT_MAX_VOLUMES_PER_NODE);
        assert_eq!(config.device_dir, PathBuf::from("/dev/disk/by-id"));
        assert_eq!(config.device_prefix, "wwn-0x");
    }

    #[test]
    fn test_node_service_creation() {
        let service = NodeService::new(
            NodeConfig::new("test-node-1"),
            Arc::new(InMemoryMounter::new()),
        );
        assert_eq!(service.node_id(), "test-node-1");
    }

    #[tokio::test]
    async fn test_lock_skipped_for_empty_volume_id() {
        let service = NodeService::new(NodeConfig::new("n"), Arc::new(InMemoryMounter::new()));
        assert!(service.lock_volume("").await.is_none());
        let guard = service.lock_volume("vol-1").await;
        assert!(guard.is_some());
        assert_eq!(service.locks.in_flight(), 1);
    }
}
