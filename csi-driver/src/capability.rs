//! Translation of CSI volume capabilities into mount parameters.
//!
//! The capability is modeled as access type × access mode. Both are matched
//! exhaustively; combinations this driver cannot serve are rejected with
//! `InvalidArgument` instead of falling back to a default.

use std::fmt::{self, Display};

use crate::csi;
use crate::csi::volume_capability::access_mode::Mode;
use crate::error::{NodeError, Result};

/// Filesystem used when the capability leaves `fs_type` empty
pub const DEFAULT_FS_TYPE: &str = "ext4";

/// Filesystems the node can create and mount
pub const SUPPORTED_FS_TYPES: &[&str] = &["ext4", "ext3", "xfs"];

/// How the volume is exposed to the workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessType {
    /// Mounted filesystem
    Mount { fs_type: String, flags: Vec<String> },
    /// Raw block device
    Block,
}

/// Node/writer sharing mode requested for the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
    SingleNodeSingleWriter,
    SingleNodeMultiWriter,
    Unknown,
}

impl From<Mode> for AccessMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Unknown => AccessMode::Unknown,
            Mode::SingleNodeWriter => AccessMode::SingleNodeWriter,
            Mode::SingleNodeReaderOnly => AccessMode::SingleNodeReaderOnly,
            Mode::MultiNodeReaderOnly => AccessMode::MultiNodeReaderOnly,
            Mode::MultiNodeSingleWriter => AccessMode::MultiNodeSingleWriter,
            Mode::MultiNodeMultiWriter => AccessMode::MultiNodeMultiWriter,
            Mode::SingleNodeSingleWriter => AccessMode::SingleNodeSingleWriter,
            Mode::SingleNodeMultiWriter => AccessMode::SingleNodeMultiWriter,
        }
    }
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessMode::SingleNodeWriter => "single-node-writer",
            AccessMode::SingleNodeReaderOnly => "single-node-reader-only",
            AccessMode::MultiNodeReaderOnly => "multi-node-reader-only",
            AccessMode::MultiNodeSingleWriter => "multi-node-single-writer",
            AccessMode::MultiNodeMultiWriter => "multi-node-multi-writer",
            AccessMode::SingleNodeSingleWriter => "single-node-single-writer",
            AccessMode::SingleNodeMultiWriter => "single-node-multi-writer",
            AccessMode::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// A volume capability decoded from its wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    pub access_type: Option<AccessType>,
    pub access_mode: AccessMode,
}

impl From<&csi::VolumeCapability> for Capability {
    fn from(cap: &csi::VolumeCapability) -> Self {
        use csi::volume_capability::AccessType as Wire;

        let access_type = cap.access_type.as_ref().map(|t| match t {
            Wire::Mount(m) => AccessType::Mount {
                fs_type: m.fs_type.clone(),
                flags: m.mount_flags.clone(),
            },
            Wire::Block(_) => AccessType::Block,
        });

        // Unrecognized enum values decode as Unknown
        let access_mode = cap
            .access_mode
            .as_ref()
            .and_then(|m| Mode::try_from(m.mode).ok())
            .map(AccessMode::from)
            .unwrap_or(AccessMode::Unknown);

        Self {
            access_type,
            access_mode,
        }
    }
}

/// Concrete parameters for mounting a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountParams {
    pub fs_type: String,
    pub flags: Vec<String>,
    pub read_only: bool,
}

impl MountParams {
    /// The `rw`/`ro` option an existing mount must carry to match these params.
    pub fn rw_option(&self) -> &'static str {
        rw_option(self.read_only)
    }
}

/// `ro` for read-only, `rw` otherwise.
pub fn rw_option(read_only: bool) -> &'static str {
    if read_only { "ro" } else { "rw" }
}

/// Validate a filesystem type, applying the default when empty.
pub fn validate_fs_type(fs_type: &str) -> Result<String> {
    let fs_type = fs_type.to_lowercase();
    if fs_type.is_empty() {
        return Ok(DEFAULT_FS_TYPE.to_string());
    }
    if SUPPORTED_FS_TYPES.contains(&fs_type.as_str()) {
        return Ok(fs_type);
    }
    Err(NodeError::InvalidArgument(format!(
        "Unsupported filesystem type: {}. Supported: {}",
        fs_type,
        SUPPORTED_FS_TYPES.join(", ")
    )))
}

/// Translate a capability from a request into mount parameters.
pub fn translate(cap: Option<&csi::VolumeCapability>) -> Result<MountParams> {
    let cap = cap.ok_or_else(|| {
        NodeError::InvalidArgument("Volume capability is required".to_string())
    })?;

    translate_capability(&Capability::from(cap))
}

/// Translate a decoded capability into mount parameters.
pub fn translate_capability(cap: &Capability) -> Result<MountParams> {
    let (fs_type, flags) = match &cap.access_type {
        Some(AccessType::Mount { fs_type, flags }) => (validate_fs_type(fs_type)?, flags.clone()),
        Some(AccessType::Block) | None => {
            return Err(NodeError::InvalidArgument(
                "Only Mount access type supported".to_string(),
            ));
        }
    };

    let read_only = match cap.access_mode {
        AccessMode::SingleNodeReaderOnly | AccessMode::MultiNodeReaderOnly => true,
        AccessMode::SingleNodeWriter
        | AccessMode::SingleNodeSingleWriter
        | AccessMode::SingleNodeMultiWriter
        | AccessMode::MultiNodeSingleWriter
        | AccessMode::MultiNodeMultiWriter => false,
        AccessMode::Unknown => {
            return Err(NodeError::InvalidArgument(
                "Volume capability access mode is required".to_string(),
            ));
        }
    };

    Ok(MountParams {
        fs_type,
        flags,
        read_only,
    })
}
