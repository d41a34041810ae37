//! Unified error types for the dmenu-mount-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.
//!
//! Every variant here is fatal for a run of the tool. Operational failures of
//! the mount/unmount command itself are not errors: they are reported as
//! messages built from a [`crate::executor::CommandResult`].

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}': {source}"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// Command executed but returned non-zero exit code.
    #[snafu(display("command '{command}' exited with code {code}: {stderr}"))]
    CommandExit {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Failed to parse lsblk JSON output.
    #[snafu(display("failed to parse lsblk output: {message}\n{output}"))]
    LsblkParse { message: String, output: String },

    /// A required program is not installed.
    #[snafu(display("'{program}' not found in PATH"))]
    ProgramNotFound { program: String },

    /// The fixed mount target already has something mounted on it.
    #[snafu(display("Something is already mounted on {}.", path.display()))]
    MountTargetBusy { path: PathBuf },

    /// Failed to inspect the mount target.
    #[snafu(display("failed to inspect mount target {}: {source}", path.display()))]
    MountTargetInspect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No way to run a command as root is available.
    #[snafu(display(
        "Can't execute commands as root. Run this program as root, in a terminal, or install {helper}."
    ))]
    NoElevationStrategy { helper: String },

    /// A mount rule could not be parsed.
    #[snafu(display("invalid mount rule '{rule}': {message}"))]
    RuleSyntax { rule: String, message: String },

    /// A mount rule condition failed while being evaluated.
    #[snafu(display("failed to evaluate mount rule '{rule}': {message}"))]
    RuleEvaluation { rule: String, message: String },

    /// The rules file exists but could not be read.
    #[snafu(display("failed to read rules file at {}: {source}", path.display()))]
    RulesFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A line of the rules file is not a valid rule.
    #[snafu(display("{}:{line}: {source}", path.display()))]
    RulesFileParse {
        path: PathBuf,
        line: usize,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for mount target inspection errors.
    fn mount_target_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn mount_target_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountTargetInspectSnafu { path: path.into() })
    }
}
