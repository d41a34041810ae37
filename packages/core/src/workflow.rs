//! The mount and unmount pipelines.
//!
//! Each run reads the devices, lets the user pick one, runs exactly one
//! privileged command and turns its result into a [`Message`]:
//!
//! - `Err(_)`: fatal, nothing (more) was done.
//! - `Ok(None)`: the user closed the menu.
//! - `Ok(Some(message))`: an info or error message to show.

use std::path::PathBuf;

use log::info;

use crate::disk::{self, DeviceSource};
use crate::error::Result;
use crate::executor::{Escalator, Host};
use crate::menu::{self, Selector};
use crate::mount;
use crate::notify::Message;
use crate::rule::RuleSet;

/// Ties the device source, the menu and the escalator together.
#[derive(Debug)]
pub struct Workflow<S, M, H> {
    source: S,
    selector: M,
    escalator: Escalator<H>,
    target: PathBuf,
}

impl<S: DeviceSource, M: Selector, H: Host> Workflow<S, M, H> {
    pub fn new(source: S, selector: M, escalator: Escalator<H>, target: impl Into<PathBuf>) -> Self {
        Self {
            source,
            selector,
            escalator,
            target: target.into(),
        }
    }

    /// Lets the user pick an unmounted device and mounts it on the target.
    ///
    /// The target is checked before any device is read.
    pub fn mount(&self, rules: &RuleSet) -> Result<Option<Message>> {
        mount::ensure_target_free(&self.target)?;

        let candidates = disk::mount_candidates(self.source.block_devices()?);
        if candidates.is_empty() {
            return Ok(Some(Message::info("No device to mount.")));
        }

        let prompt = format!("Mount on {}", self.target.display());
        let Some(device) = menu::choose_device(&self.selector, &candidates, &prompt)? else {
            return Ok(None);
        };

        let extra_args = rules.match_args(device)?;
        let command = mount::mount_command(device, &self.target, &extra_args);
        info!("Mounting {} on {}", device.path, self.target.display());

        let result = self.escalator.run_privileged(&command)?;
        Ok(Some(mount::mount_outcome(device, &self.target, &result)))
    }

    /// Lets the user pick a mounted device and unmounts it.
    pub fn unmount(&self) -> Result<Option<Message>> {
        let candidates = disk::unmount_candidates(self.source.block_devices()?);
        if candidates.is_empty() {
            return Ok(Some(Message::info("No device to unmount.")));
        }

        let Some(device) = menu::choose_device(&self.selector, &candidates, "Unmount")? else {
            return Ok(None);
        };

        let command = mount::unmount_command(device);
        info!("Unmounting {}", device.path);

        let result = self.escalator.run_privileged(&command)?;
        Ok(Some(mount::unmount_outcome(device, &result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::BlockDevice;
    use crate::error::Error;
    use crate::executor::CommandResult;
    use crate::notify::Severity;
    use std::cell::{Cell, RefCell};
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    struct FakeSource {
        devices: Vec<BlockDevice>,
        calls: Cell<usize>,
    }

    impl FakeSource {
        fn new(devices: Vec<BlockDevice>) -> Self {
            Self {
                devices,
                calls: Cell::new(0),
            }
        }
    }

    impl DeviceSource for FakeSource {
        fn block_devices(&self) -> Result<Vec<BlockDevice>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.devices.clone())
        }
    }

    /// Fails like `lsblk` exiting with an error.
    struct FailingSource;

    impl DeviceSource for FailingSource {
        fn block_devices(&self) -> Result<Vec<BlockDevice>> {
            Err(Error::CommandExit {
                command: "lsblk".to_string(),
                code: 1,
                stderr: "lsblk: failed to access sysfs directory\n".to_string(),
            })
        }
    }

    /// Picks the row at `choice`, or cancels when `None`.
    struct FakeMenu {
        choice: Option<usize>,
        shown: RefCell<Vec<String>>,
    }

    impl FakeMenu {
        fn picking(choice: Option<usize>) -> Self {
            Self {
                choice,
                shown: RefCell::new(Vec::new()),
            }
        }
    }

    impl Selector for FakeMenu {
        fn select(&self, rows: &[String], _prompt: &str) -> Result<Option<usize>> {
            self.shown.borrow_mut().extend(rows.iter().cloned());
            Ok(self.choice)
        }
    }

    /// Already root; every command returns `result`.
    struct RootHost {
        result: CommandResult,
        executed: RefCell<Vec<Vec<String>>>,
    }

    impl RootHost {
        fn returning(status: i32, output: &str) -> Self {
            Self {
                result: CommandResult {
                    status,
                    output: output.to_string(),
                },
                executed: RefCell::new(Vec::new()),
            }
        }
    }

    impl Host for RootHost {
        fn is_elevated(&self) -> bool {
            true
        }

        fn sudo_credentials_cached(&self) -> bool {
            false
        }

        fn find_program(&self, _name: &str) -> Option<std::path::PathBuf> {
            None
        }

        fn stdin_is_terminal(&self) -> bool {
            false
        }

        fn execute(&self, program: &str, args: &[String]) -> Result<CommandResult> {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            self.executed.borrow_mut().push(call);
            Ok(self.result.clone())
        }
    }

    fn device(path: &str, label: Option<&str>, mountpoint: Option<&str>, secs: u64) -> BlockDevice {
        BlockDevice {
            path: path.to_string(),
            fstype: Some("vfat".to_string()),
            label: label.map(str::to_string),
            uuid: None,
            mountpoint: mountpoint.map(str::to_string),
            size: "14.9G".to_string(),
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
        }
    }

    fn workflow(
        devices: Vec<BlockDevice>,
        choice: Option<usize>,
        host: RootHost,
        target: &Path,
    ) -> Workflow<FakeSource, FakeMenu, RootHost> {
        Workflow::new(
            FakeSource::new(devices),
            FakeMenu::picking(choice),
            Escalator::with_host(host, ["pkexec"]),
            target,
        )
    }

    fn executed(wf: &Workflow<FakeSource, FakeMenu, RootHost>) -> Vec<Vec<String>> {
        wf.escalator.host().executed.borrow().clone()
    }

    #[test]
    fn test_mount_target_busy_skips_enumeration() {
        let wf = workflow(
            vec![device("/dev/sdb1", Some("USB"), None, 1)],
            Some(0),
            RootHost::returning(0, ""),
            Path::new("/"),
        );

        let err = wf.mount(&RuleSet::default()).unwrap_err();
        assert!(matches!(err, Error::MountTargetBusy { .. }));
        assert_eq!(wf.source.calls.get(), 0);
        assert!(executed(&wf).is_empty());
    }

    #[test]
    fn test_mount_success() {
        let target = tempfile::tempdir().unwrap();
        let wf = workflow(
            vec![device("/dev/sdb1", Some("USB"), None, 1)],
            Some(0),
            RootHost::returning(0, ""),
            target.path(),
        );

        let msg = wf.mount(&RuleSet::default()).unwrap().unwrap();
        assert_eq!(msg.severity, Severity::Info);
        assert!(msg.text.contains("/dev/sdb1"));
        assert!(msg.text.contains("USB"));

        let target_str = target.path().display().to_string();
        assert_eq!(
            executed(&wf),
            vec![vec!["mount", "--", "/dev/sdb1", target_str.as_str()]]
        );
    }

    #[test]
    fn test_mount_failure_is_an_error_message() {
        let target = tempfile::tempdir().unwrap();
        let wf = workflow(
            vec![device("/dev/sdb1", Some("USB"), None, 1)],
            Some(0),
            RootHost::returning(1, "wrong fs type"),
            target.path(),
        );

        let msg = wf.mount(&RuleSet::default()).unwrap().unwrap();
        assert_eq!(msg.severity, Severity::Error);
        assert!(msg.text.contains("wrong fs type"));
    }

    #[test]
    fn test_mount_uses_rule_args_and_recency_order() {
        let target = tempfile::tempdir().unwrap();
        let wf = workflow(
            vec![
                device("/dev/sdb1", Some("OLD"), None, 1),
                device("/dev/sdc1", Some("BACKUP"), None, 9),
                device("/dev/sda2", Some("ROOT"), Some("/"), 5),
            ],
            Some(0),
            RootHost::returning(0, ""),
            target.path(),
        );
        let rules = RuleSet::new(vec![
            r#"label == "BACKUP"::{"args": ["-o", "ro"]}"#.parse().unwrap(),
        ]);

        wf.mount(&rules).unwrap();

        let shown = wf.selector.shown.borrow();
        assert_eq!(shown.len(), 2);
        assert!(shown[0].starts_with("/dev/sdc1"));

        let target_str = target.path().display().to_string();
        assert_eq!(
            executed(&wf),
            vec![vec!["mount", "-o", "ro", "--", "/dev/sdc1", target_str.as_str()]]
        );
    }

    #[test]
    fn test_rule_evaluation_error_before_mounting() {
        let target = tempfile::tempdir().unwrap();
        let wf = workflow(
            vec![device("/dev/sdb1", None, None, 1)],
            Some(0),
            RootHost::returning(0, ""),
            target.path(),
        );
        let rules = RuleSet::new(vec![r#""x" in label::{"args": []}"#.parse().unwrap()]);

        let err = wf.mount(&rules).unwrap_err();
        assert!(matches!(err, Error::RuleEvaluation { .. }));
        assert!(executed(&wf).is_empty());
    }

    #[test]
    fn test_mount_cancelled() {
        let target = tempfile::tempdir().unwrap();
        let wf = workflow(
            vec![device("/dev/sdb1", Some("USB"), None, 1)],
            None,
            RootHost::returning(0, ""),
            target.path(),
        );

        assert_eq!(wf.mount(&RuleSet::default()).unwrap(), None);
        assert!(executed(&wf).is_empty());
    }

    #[test]
    fn test_nothing_to_mount() {
        let target = tempfile::tempdir().unwrap();
        let wf = workflow(
            vec![device("/dev/sdb1", Some("USB"), Some("/media/usb"), 1)],
            Some(0),
            RootHost::returning(0, ""),
            target.path(),
        );

        let msg = wf.mount(&RuleSet::default()).unwrap().unwrap();
        assert_eq!(msg, Message::info("No device to mount."));
        assert!(wf.selector.shown.borrow().is_empty());
    }

    #[test]
    fn test_unmount_only_root_mounted() {
        let wf = workflow(
            vec![
                device("/dev/sda2", None, Some("/"), 5),
                device("/dev/sdb1", Some("USB"), None, 1),
            ],
            Some(0),
            RootHost::returning(0, ""),
            Path::new("/mnt"),
        );

        let msg = wf.unmount().unwrap().unwrap();
        assert_eq!(msg, Message::info("No device to unmount."));
        assert!(wf.selector.shown.borrow().is_empty());
        assert!(executed(&wf).is_empty());
    }

    #[test]
    fn test_unmount_success() {
        let wf = workflow(
            vec![
                device("/dev/sda2", None, Some("/"), 5),
                device("/dev/sdb1", Some("USB"), Some("/mnt"), 1),
            ],
            Some(0),
            RootHost::returning(0, ""),
            Path::new("/mnt"),
        );

        let msg = wf.unmount().unwrap().unwrap();
        assert_eq!(msg, Message::info("Unmounted /dev/sdb1."));
        assert_eq!(executed(&wf), vec![vec!["umount", "--", "/dev/sdb1"]]);
    }

    #[test]
    fn test_failed_device_query_aborts_before_menu() {
        let target = tempfile::tempdir().unwrap();
        let wf = Workflow::new(
            FailingSource,
            FakeMenu::picking(Some(0)),
            Escalator::with_host(RootHost::returning(0, ""), ["pkexec"]),
            target.path(),
        );

        for result in [wf.mount(&RuleSet::default()), wf.unmount()] {
            match result.unwrap_err() {
                Error::CommandExit { stderr, .. } => assert!(stderr.contains("sysfs")),
                other => panic!("unexpected error: {other:?}"),
            }
        }
        assert!(wf.selector.shown.borrow().is_empty());
        assert!(wf.escalator.host().executed.borrow().is_empty());
    }
}
