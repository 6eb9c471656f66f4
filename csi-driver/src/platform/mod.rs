//! Mount capability layer for the CSI Node service
//!
//! The node handlers never call `mount(8)` or read the mount table directly;
//! they go through the [`Mounter`] trait so the same decision logic runs
//! against the live system ([`LinuxMounter`]) or an in-memory table
//! ([`InMemoryMounter`]) in tests.
//!
//! # Usage
//!
//! ```ignore
//! use crate::platform::{LinuxMounter, Mounter};
//!
//! let mounter = LinuxMounter::new();
//! mounter.format_and_mount("/dev/disk/by-id/wwn-0x6000c29", "/var/lib/staging", "ext4", &[])?;
//! let mounts = mounter.list_mounts()?;
//! ```

mod linux;
mod memory;
mod mountinfo;

use crate::error::MountResult;

pub use linux::{LinuxMounter, MOUNTINFO_PATH};
pub use memory::{InMemoryMounter, MountCall};
pub use mountinfo::parse_mountinfo;

/// Pseudo filesystems whose mount source is a placeholder rather than the
/// device itself (bind mounts of nodes under `/dev`).
pub const PSEUDO_DEVICE_SOURCES: &[&str] = &["devtmpfs", "udev"];

/// One entry of the live mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Mount source as recorded by the kernel (e.g. `/dev/sdb`, `devtmpfs`)
    pub device: String,
    /// Path the mount really refers to; differs from `device` only for
    /// pseudo filesystem sources, where it is the node under `/dev`
    pub source: String,
    /// Mount point
    pub path: String,
    /// Filesystem type
    pub fs_type: String,
    /// Per-mount options in table order (`rw`/`ro` first)
    pub options: Vec<String>,
}

impl MountRecord {
    /// Whether the per-mount options contain `option`.
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    /// Whether this record mounts the device whose resolved node is `real_path`.
    ///
    /// Either the recorded device is the node itself, or the recorded device
    /// is a pseudo filesystem placeholder and the source carries the node.
    pub fn refers_to(&self, real_path: &str) -> bool {
        self.device == real_path
            || (PSEUDO_DEVICE_SOURCES.contains(&self.device.as_str()) && self.source == real_path)
    }
}

/// Capability interface over the system mount primitives.
///
/// Every call is synchronous and blocks until the underlying operation
/// completes. Implementations hold no view of the table between calls;
/// `list_mounts` always reflects the current state.
pub trait Mounter: Send + Sync {
    /// Read the full current mount table.
    fn list_mounts(&self) -> MountResult<Vec<MountRecord>>;

    /// Mount `source` on `target` without formatting.
    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        flags: &[String],
    ) -> MountResult<()>;

    /// Create a filesystem on `source` if it has none, then mount it on `target`.
    fn format_and_mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        flags: &[String],
    ) -> MountResult<()>;

    /// Bind mount the already-mounted `source` directory on `target`.
    fn bind_mount(&self, source: &str, target: &str, flags: &[String]) -> MountResult<()>;

    /// Unmount whatever is mounted on `target`.
    fn unmount(&self, target: &str) -> MountResult<()>;
}
