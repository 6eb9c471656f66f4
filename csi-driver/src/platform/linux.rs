//! Linux platform implementation of the mount capability layer
//!
//! Uses Linux-specific tools:
//! - blkid to detect an existing filesystem
//! - mkfs.ext4/mkfs.ext3/mkfs.xfs for filesystem formatting
//! - mount / mount --bind / umount
//! - /proc/self/mountinfo for the live mount table

use std::fs;
use std::process::{Command, Output};

use tracing::{debug, error, info};

use super::{MountRecord, Mounter, parse_mountinfo};
use crate::error::{MountError, MountResult};
use crate::metrics;

/// Location of the per-process mount table
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// blkid exit status when no filesystem signature was found
const BLKID_NOTHING_FOUND: i32 = 2;

/// [`Mounter`] backed by the system mount tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxMounter;

impl LinuxMounter {
    pub fn new() -> Self {
        Self
    }

    /// Run a command, turning spawn failures and non-zero exits into errors.
    fn run(program: &str, args: &[&str]) -> MountResult<Output> {
        debug!(program = %program, args = ?args, "Executing");

        let output = Command::new(program).args(args).output().map_err(|e| {
            error!(error = %e, program = %program, "Failed to execute");
            metrics::record_mount_call(program, false);
            MountError::Io(e)
        })?;

        metrics::record_mount_call(program, output.status.success());

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(stderr = %stderr, program = %program, "Command failed");
            return Err(MountError::CommandFailed {
                command: program.to_string(),
                stderr,
            });
        }

        Ok(output)
    }

    /// Check if a device needs formatting (has no filesystem signature).
    fn needs_formatting(device: &str) -> MountResult<bool> {
        let output = Command::new("blkid")
            .args(["-p", device])
            .output()
            .map_err(|e| {
                error!(error = %e, "Failed to execute blkid");
                MountError::Io(e)
            })?;

        if output.status.code() == Some(BLKID_NOTHING_FOUND) {
            return Ok(true);
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(stderr = %stderr, device = %device, "blkid failed");
            return Err(MountError::CommandFailed {
                command: "blkid".to_string(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(!stdout.contains("TYPE="))
    }

    /// Format a device with the specified filesystem type.
    fn format_device(device: &str, fs_type: &str) -> MountResult<()> {
        info!(device = %device, fs_type = %fs_type, "Formatting device");

        let program = format!("mkfs.{}", fs_type);
        // mkfs.ext* wants -F and mkfs.xfs wants -f to skip prompts
        let force = if fs_type == "xfs" { "-f" } else { "-F" };
        Self::run(&program, &[force, device])?;

        Ok(())
    }
}

impl Mounter for LinuxMounter {
    fn list_mounts(&self) -> MountResult<Vec<MountRecord>> {
        let content = fs::read_to_string(MOUNTINFO_PATH)?;
        parse_mountinfo(&content)
    }

    fn mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        flags: &[String],
    ) -> MountResult<()> {
        info!(source = %source, target = %target, fs_type = %fs_type, flags = ?flags, "Mounting device");

        let options = flags.join(",");
        let mut args = vec!["-t", fs_type];
        if !options.is_empty() {
            args.extend(["-o", options.as_str()]);
        }
        args.extend([source, target]);

        Self::run("mount", &args)?;
        Ok(())
    }

    fn format_and_mount(
        &self,
        source: &str,
        target: &str,
        fs_type: &str,
        flags: &[String],
    ) -> MountResult<()> {
        if Self::needs_formatting(source)? {
            Self::format_device(source, fs_type)?;
        } else {
            debug!(source = %source, "Device already has a filesystem, skipping format");
        }

        self.mount(source, target, fs_type, flags)
    }

    fn bind_mount(&self, source: &str, target: &str, flags: &[String]) -> MountResult<()> {
        info!(source = %source, target = %target, flags = ?flags, "Creating bind mount");
        bind_mount_with(
            |program, args| Self::run(program, args).map(|_| ()),
            source,
            target,
            flags,
        )
    }

    fn unmount(&self, target: &str) -> MountResult<()> {
        info!(target = %target, "Unmounting");
        Self::run("umount", &[target])?;
        Ok(())
    }
}

/// Bind mount `source` on `target` and apply `flags` with a remount.
///
/// Bind mounts ignore options on the initial call. If the remount fails
/// the bind mount is undone so it never stays without the requested
/// options (e.g. writable when `ro` was asked for).
fn bind_mount_with<F>(mut run: F, source: &str, target: &str, flags: &[String]) -> MountResult<()>
where
    F: FnMut(&str, &[&str]) -> MountResult<()>,
{
    run("mount", &["--bind", source, target])?;

    if flags.is_empty() {
        return Ok(());
    }

    let options = format!("remount,bind,{}", flags.join(","));
    if let Err(e) = run("mount", &["-o", &options, target]) {
        if let Err(undo) = run("umount", &[target]) {
            error!(target = %target, error = %undo, "Failed to undo bind mount");
        }
        return Err(e);
    }

    Ok(())
}
