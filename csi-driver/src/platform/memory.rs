//! In-memory mounter for testing.
//!
//! Keeps a mount table in a `Vec` and mimics what the kernel records for
//! each primitive. It never touches the real system and should only be
//! used for unit and integration testing.
//!
//! # Example
//!
//! ```
//! use pvblock_csi::platform::{InMemoryMounter, Mounter};
//!
//! let mounter = InMemoryMounter::new();
//! mounter.format_and_mount("/dev/null", "/staging", "ext4", &[]).unwrap();
//! assert_eq!(mounter.mounts().len(), 1);
//! assert_eq!(mounter.format_count("/dev/null"), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{MountRecord, Mounter};
use crate::error::{MountError, MountResult};

/// Mount primitive selector for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountCall {
    ListMounts,
    Mount,
    FormatAndMount,
    BindMount,
    Unmount,
}

impl MountCall {
    fn command(self) -> &'static str {
        match self {
            MountCall::ListMounts => "mountinfo",
            MountCall::Mount | MountCall::BindMount => "mount",
            MountCall::FormatAndMount => "mkfs",
            MountCall::Unmount => "umount",
        }
    }
}

#[derive(Default)]
struct State {
    mounts: Vec<MountRecord>,
    /// Device node -> filesystem type written to it
    formatted: HashMap<String, String>,
    /// Device node -> number of times it was formatted
    format_counts: HashMap<String, usize>,
    failing: HashSet<MountCall>,
}

/// [`Mounter`] over an in-memory mount table.
#[derive(Default)]
pub struct InMemoryMounter {
    state: Mutex<State>,
}

impl InMemoryMounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the current table.
    pub fn mounts(&self) -> Vec<MountRecord> {
        self.state().mounts.clone()
    }

    /// Add an entry as if something outside the driver had mounted it.
    pub fn insert(&self, record: MountRecord) {
        self.state().mounts.push(record);
    }

    /// Mark a device as already carrying a filesystem.
    pub fn set_formatted(&self, device: &str, fs_type: &str) {
        self.state()
            .formatted
            .insert(device.to_string(), fs_type.to_string());
    }

    /// Filesystem type written to `device`, if any.
    pub fn filesystem(&self, device: &str) -> Option<String> {
        self.state().formatted.get(device).cloned()
    }

    /// How many times `device` was formatted.
    pub fn format_count(&self, device: &str) -> usize {
        self.state().format_counts.get(device).copied().unwrap_or(0)
    }

    /// Make every subsequent `call` fail until [`InMemoryMounter::clear_failures`].
    pub fn fail_on(&self, call: MountCall) {
        self.state().failing.insert(call);
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    fn check(state: &State, call: MountCall) -> MountResult<()> {
        if state.failing.contains(&call) {
            return Err(MountError::CommandFailed {
                command: call.command().to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    /// The kernel records the resolved node, not the symlink passed in.
    fn resolve(source: &str) -> String {
        std::fs::canonicalize(source)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| source.to_string())
    }

    fn mount_options(flags: &[String]) -> Vec<String> {
        let read_only = flags.iter().any(|f| f == "ro");
        let mut options = vec![if read_only { "ro" } else { "rw" }.to_string()];
        options.extend(
            flags
                .iter()
                .filter(|f| f.as_str() != "ro" && f.as_str() != "rw")
                .cloned(),
        );
        options
    }

    fn push_mount(state: &mut State, source: &str, target: &str, fs_type: &str, flags: &[String]) {
        let device = Self::resolve(source);
        state.mounts.push(MountRecord {
            source: device.clone(),
            device,
            path: target.to_string(),
            fs_type: fs_type.to_string(),
            options: Self::mount_options(flags),
        });
    }
}

impl Mounter for InMemoryMounter {
    fn list_mounts(&self) -> MountResult<Vec<MountRecord>> {
        let state = self.state();
        Self::check(&state, MountCall::ListMounts)?;
        Ok(state.mounts.clone())
    }

    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        flags: &[String],
    ) -> MountResult<()> {
        let mut state = self.state();
        Self::check(&state, MountCall::Mount)?;
        Self::push_mount(&mut state, source, target, fs_type, flags);
        Ok(())
    }

    fn format_and_mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        flags: &[String],
    ) -> MountResult<()> {
        let mut state = self.state();
        Self::check(&state, MountCall::FormatAndMount)?;

        let device = Self::resolve(source);
        if !state.formatted.contains_key(&device) {
            state.formatted.insert(device.clone(), fs_type.to_string());
            *state.format_counts.entry(device).or_insert(0) += 1;
        }

        Self::push_mount(&mut state, source, target, fs_type, flags);
        Ok(())
    }

    fn bind_mount(&self, source: &str, target: &str, flags: &[String]) -> MountResult<()> {
        let mut state = self.state();
        Self::check(&state, MountCall::BindMount)?;

        // A bind mount shares the device of whatever is mounted on the source
        let underlying = state
            .mounts
            .iter()
            .rev()
            .find(|m| m.path == source)
            .cloned();

        let (device, origin, fs_type) = match underlying {
            Some(m) => (m.device, m.source, m.fs_type),
            None => ("none".to_string(), source.to_string(), "none".to_string()),
        };

        state.mounts.push(MountRecord {
            device,
            source: origin,
            path: target.to_string(),
            fs_type,
            options: Self::mount_options(flags),
        });
        Ok(())
    }

    fn unmount(&self, target: &str) -> MountResult<()> {
        let mut state = self.state();
        Self::check(&state, MountCall::Unmount)?;

        match state.mounts.iter().rposition(|m| m.path == target) {
            Some(index) => {
                state.mounts.remove(index);
                Ok(())
            }
            None => Err(MountError::CommandFailed {
                command: "umount".to_string(),
                stderr: format!("{}: not mounted", target),
            }),
        }
    }
}
