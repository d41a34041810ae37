//! dmenu-mount-core: Core library for mounting removable devices from a menu.
//!
//! The tool lists block devices with `lsblk`, lets the user pick one through
//! a dmenu-style menu and mounts it on `/mnt` (or unmounts it) with whatever
//! privilege escalation is available.
//!
//! # Modules
//!
//! - [`disk`]: Device enumeration using `lsblk`
//! - [`menu`]: Table rendering and selection through the menu program
//! - [`rule`]: Mount rules selecting extra `mount` arguments per device
//! - [`executor`]: Privileged command execution with escalation fallback
//! - [`mount`]: Mount target checks, commands and result messages
//! - [`notify`]: Desktop notifications with console fallback
//! - [`workflow`]: The mount and unmount pipelines
//! - [`config`]: Runtime configuration and the rules file
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use dmenu_mount_core::{disk::LsblkSource, Escalator, Menu, RuleSet, Workflow};
//!
//! let workflow = Workflow::new(LsblkSource, Menu::default(), Escalator::new(), "/mnt");
//! let rules: RuleSet = RuleSet::new(vec![
//!     r#"fstype == "vfat"::{"args": ["-o", "uid=1000"]}"#.parse().unwrap(),
//! ]);
//!
//! if let Some(message) = workflow.mount(&rules).unwrap() {
//!     println!("{}", message.text);
//! }
//! ```

pub mod config;
pub mod disk;
pub mod error;
pub mod executor;
pub mod menu;
pub mod mount;
pub mod notify;
pub mod rule;
pub mod workflow;

// Re-export commonly used types
pub use config::Config;
pub use disk::BlockDevice;
pub use error::{Error, Result};
pub use executor::{CommandResult, Escalator, PrivilegedCommand};
pub use menu::Menu;
pub use notify::{Message, Notifier, Severity};
pub use rule::{MountRule, RuleSet};
pub use workflow::Workflow;
