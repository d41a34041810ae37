//! Disk scanning module using lsblk.
//!
//! This module provides functionality to scan and list block devices
//! on the system, filtering out entries that cannot be mounted (no
//! filesystem, swap) and ordering them so that recently attached media
//! come first.

use std::path::Path;
use std::process::{Command, Output};
use std::time::SystemTime;

use log::debug;
use serde::Deserialize;

use crate::error::{Error, IoResultExt, Result};

/// Mount point that is never offered for unmounting.
pub const ROOT_MOUNT_POINT: &str = "/";

/// Filesystem type reported for swap partitions.
const SWAP_FSTYPE: &str = "swap";

/// Represents a block device (disk or partition) on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    /// Full device path (e.g., "/dev/sdb1").
    pub path: String,
    /// Filesystem type (e.g., "vfat", "ext4").
    pub fstype: Option<String>,
    /// Volume label, if set.
    pub label: Option<String>,
    /// Filesystem UUID.
    pub uuid: Option<String>,
    /// Current mount point, if mounted.
    pub mountpoint: Option<String>,
    /// Human readable size as printed by lsblk (e.g., "14.9G").
    pub size: String,
    /// Modification time of the device node. `None` sorts as oldest.
    pub modified: Option<SystemTime>,
}

impl BlockDevice {
    /// Returns true if this device is currently mounted.
    pub fn is_mounted(&self) -> bool {
        self.mountpoint.is_some()
    }

    /// Returns true if this device carries a filesystem that can be mounted.
    pub fn is_mountable(&self) -> bool {
        match self.fstype.as_deref() {
            None | Some("") => false,
            Some(fstype) => fstype != SWAP_FSTYPE,
        }
    }

    /// Returns true if this device is mounted on the root filesystem.
    pub fn is_root(&self) -> bool {
        self.mountpoint.as_deref() == Some(ROOT_MOUNT_POINT)
    }
}

/// Source of block devices for the mount/unmount pipeline.
pub trait DeviceSource {
    /// Reads the current set of block devices.
    fn block_devices(&self) -> Result<Vec<BlockDevice>>;
}

/// Reads devices from `lsblk` and stats each device node for its mtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct LsblkSource;

impl DeviceSource for LsblkSource {
    fn block_devices(&self) -> Result<Vec<BlockDevice>> {
        list_block_devices()
    }
}

/// Raw JSON structure from lsblk output.
#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    path: String,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    size: Option<LsblkSize>,
    #[serde(default)]
    children: Option<Vec<LsblkDevice>>,
}

/// lsblk prints sizes as strings, or as numbers when `--bytes` is in effect.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LsblkSize {
    Text(String),
    Bytes(u64),
}

impl LsblkSize {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Bytes(bytes) => bytes.to_string(),
        }
    }
}

/// Lists all block devices on the system.
///
/// Calls `lsblk --json --paths` and parses the output. Modification times are
/// read from the device nodes; a node that cannot be stat'ed gets no time.
pub fn list_block_devices() -> Result<Vec<BlockDevice>> {
    debug!("Querying block devices with lsblk");

    let output = Command::new("lsblk")
        .args([
            "--json",
            "--paths",
            "--output",
            "PATH,FSTYPE,LABEL,UUID,MOUNTPOINT,SIZE",
        ])
        .output()
        .command_context("lsblk")?;

    let mut devices = devices_from_output("lsblk", &output)?;
    for device in &mut devices {
        device.modified = device_mtime(Path::new(&device.path));
    }

    debug!("lsblk reported {} block devices", devices.len());
    Ok(devices)
}

/// Turns the output of a finished `lsblk` run into devices.
///
/// A non-zero exit is an error carrying the program's stderr, or its stdout
/// when stderr is empty.
fn devices_from_output(command: &str, output: &Output) -> Result<Vec<BlockDevice>> {
    if !output.status.success() {
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if stderr.trim().is_empty() {
            stderr = String::from_utf8_lossy(&output.stdout).to_string();
        }
        return Err(Error::CommandExit {
            command: command.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    parse_lsblk_output(&String::from_utf8_lossy(&output.stdout))
}

/// Parses `lsblk --json` output into a flat list of devices.
///
/// Disks and their partitions are flattened depth-first. The returned devices
/// have no modification time set.
pub fn parse_lsblk_output(json: &str) -> Result<Vec<BlockDevice>> {
    let lsblk_output: LsblkOutput =
        serde_json::from_str(json).map_err(|e| Error::LsblkParse {
            message: e.to_string(),
            output: json.to_string(),
        })?;

    let mut devices = Vec::new();
    collect_devices(lsblk_output.blockdevices, &mut devices);
    Ok(devices)
}

/// Recursively collect devices from lsblk output, including children (partitions).
fn collect_devices(lsblk_devices: Vec<LsblkDevice>, devices: &mut Vec<BlockDevice>) {
    for dev in lsblk_devices {
        devices.push(BlockDevice {
            path: dev.path,
            fstype: dev.fstype,
            label: dev.label,
            uuid: dev.uuid,
            mountpoint: dev.mountpoint,
            size: dev.size.map(LsblkSize::into_string).unwrap_or_default(),
            modified: None,
        });

        if let Some(children) = dev.children {
            collect_devices(children, devices);
        }
    }
}

/// Returns the modification time of a device node, if it can be read.
fn device_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Filters block devices to those with a mountable filesystem.
pub fn filter_mountable_devices(devices: Vec<BlockDevice>) -> Vec<BlockDevice> {
    devices.into_iter().filter(|d| d.is_mountable()).collect()
}

/// Sorts devices newest first. Devices without a timestamp go last.
///
/// The sort is stable: devices with equal timestamps keep their order.
pub fn sort_by_recency(devices: &mut [BlockDevice]) {
    // `None < Some(_)`, so reversing the comparison puts unknown times last.
    devices.sort_by(|a, b| b.modified.cmp(&a.modified));
}

/// Devices that can be offered for mounting, most recently attached first.
pub fn mount_candidates(devices: Vec<BlockDevice>) -> Vec<BlockDevice> {
    let mut candidates: Vec<_> = filter_mountable_devices(devices)
        .into_iter()
        .filter(|d| !d.is_mounted())
        .collect();
    sort_by_recency(&mut candidates);
    candidates
}

/// Devices that can be offered for unmounting, most recently attached first.
///
/// The root filesystem is never a candidate.
pub fn unmount_candidates(devices: Vec<BlockDevice>) -> Vec<BlockDevice> {
    let mut candidates: Vec<_> = filter_mountable_devices(devices)
        .into_iter()
        .filter(|d| d.is_mounted() && !d.is_root())
        .collect();
    sort_by_recency(&mut candidates);
    candidates
}
