//! Mount operations module.
//!
//! This module checks the fixed mount target, builds the `mount`/`umount`
//! command lines and turns their results into messages for the user.

use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::disk::BlockDevice;
use crate::error::{Error, IoResultExt, Result};
use crate::executor::{CommandResult, PrivilegedCommand};
use crate::notify::Message;

/// Directory every device is mounted on.
pub const MOUNT_TARGET: &str = "/mnt";

/// Returns true if something is mounted on `path`.
///
/// A path is a mount point when it lives on a different device than its
/// parent, or when it is its own parent (`/`). Missing paths and symlinks are
/// not mount points.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(Error::MountTargetInspect {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    if meta.file_type().is_symlink() {
        return Ok(false);
    }

    let parent = std::fs::metadata(path.join("..")).mount_target_context(path)?;
    Ok(meta.dev() != parent.dev() || meta.ino() == parent.ino())
}

/// Fails if something is already mounted on the mount target.
pub fn ensure_target_free(target: &Path) -> Result<()> {
    if is_mount_point(target)? {
        return Err(Error::MountTargetBusy {
            path: target.to_path_buf(),
        });
    }
    Ok(())
}

/// Builds `mount <extra args> -- <device> <target>`.
pub fn mount_command(device: &BlockDevice, target: &Path, extra_args: &[String]) -> PrivilegedCommand {
    let mut args = extra_args.to_vec();
    args.push("--".to_string());
    args.push(device.path.clone());
    args.push(target.display().to_string());
    PrivilegedCommand::new("mount", args)
}

/// Builds `umount -- <device>`.
pub fn unmount_command(device: &BlockDevice) -> PrivilegedCommand {
    PrivilegedCommand::new("umount", ["--", device.path.as_str()])
}

/// Short description of a device: its path, plus the label if it has one.
pub fn short_description(device: &BlockDevice) -> String {
    match device.label.as_deref().filter(|l| !l.is_empty()) {
        Some(label) => format!("{} ({})", device.path, label),
        None => device.path.clone(),
    }
}

/// Message for the result of a mount command.
pub fn mount_outcome(device: &BlockDevice, target: &Path, result: &CommandResult) -> Message {
    if result.success() {
        Message::info(format!(
            "Mounted {} on {}.",
            short_description(device),
            target.display()
        ))
    } else {
        Message::error(with_output(
            format!("Failed to mount {} on {}.", device.path, target.display()),
            result,
        ))
    }
}

/// Message for the result of an unmount command.
pub fn unmount_outcome(device: &BlockDevice, result: &CommandResult) -> Message {
    if result.success() {
        Message::info(format!("Unmounted {}.", device.path))
    } else {
        Message::error(with_output(
            format!("Failed to unmount {}.", device.path),
            result,
        ))
    }
}

fn with_output(mut text: String, result: &CommandResult) -> String {
    let output = result.output.trim_end();
    if !output.is_empty() {
        text.push('\n');
        text.push_str(output);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Severity;

    fn usb() -> BlockDevice {
        BlockDevice {
            path: "/dev/sdb1".to_string(),
            fstype: Some("vfat".to_string()),
            label: Some("USB".to_string()),
            uuid: None,
            mountpoint: None,
            size: "14.9G".to_string(),
            modified: None,
        }
    }

    fn result(status: i32, output: &str) -> CommandResult {
        CommandResult {
            status,
            output: output.to_string(),
        }
    }

    #[test]
    fn test_is_mount_point() {
        assert!(is_mount_point(Path::new("/")).unwrap());

        let dir = tempfile::tempdir().unwrap();
        assert!(!is_mount_point(dir.path()).unwrap());
        assert!(!is_mount_point(&dir.path().join("missing")).unwrap());

        let link = dir.path().join("root-link");
        std::os::unix::fs::symlink("/", &link).unwrap();
        assert!(!is_mount_point(&link).unwrap());
    }

    #[test]
    fn test_ensure_target_free() {
        let dir = tempfile::tempdir().unwrap();
        ensure_target_free(dir.path()).unwrap();

        let err = ensure_target_free(Path::new("/")).unwrap_err();
        assert_eq!(err.to_string(), "Something is already mounted on /.");
    }

    #[test]
    fn test_mount_command() {
        let extra = vec!["-o".to_string(), "ro".to_string()];
        let cmd = mount_command(&usb(), Path::new(MOUNT_TARGET), &extra);
        assert_eq!(cmd.program, "mount");
        assert_eq!(cmd.args, vec!["-o", "ro", "--", "/dev/sdb1", "/mnt"]);

        let cmd = mount_command(&usb(), Path::new(MOUNT_TARGET), &[]);
        assert_eq!(cmd.args, vec!["--", "/dev/sdb1", "/mnt"]);
    }

    #[test]
    fn test_unmount_command() {
        let cmd = unmount_command(&usb());
        assert_eq!(cmd.to_string(), "umount -- /dev/sdb1");
    }

    #[test]
    fn test_mount_success_message() {
        let msg = mount_outcome(&usb(), Path::new(MOUNT_TARGET), &result(0, ""));
        assert_eq!(msg.severity, Severity::Info);
        assert_eq!(msg.text, "Mounted /dev/sdb1 (USB) on /mnt.");
    }

    #[test]
    fn test_mount_failure_message() {
        let msg = mount_outcome(
            &usb(),
            Path::new(MOUNT_TARGET),
            &result(32, "mount: /mnt: wrong fs type, bad option\n"),
        );
        assert_eq!(msg.severity, Severity::Error);
        assert_eq!(
            msg.text,
            "Failed to mount /dev/sdb1 on /mnt.\nmount: /mnt: wrong fs type, bad option"
        );
    }

    #[test]
    fn test_unmount_messages() {
        let unlabeled = BlockDevice {
            label: None,
            ..usb()
        };
        assert_eq!(
            unmount_outcome(&unlabeled, &result(0, "")).text,
            "Unmounted /dev/sdb1."
        );
        assert_eq!(
            unmount_outcome(&usb(), &result(0, "")).text,
            "Unmounted /dev/sdb1."
        );

        let msg = unmount_outcome(&usb(), &result(1, ""));
        assert_eq!(msg.severity, Severity::Error);
        assert_eq!(msg.text, "Failed to unmount /dev/sdb1.");
    }
}
