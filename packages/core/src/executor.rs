//! Command execution with privilege escalation fallback.
//!
//! A privileged command is run through the first viable [`Strategy`], tried
//! in this fixed order:
//!
//! 1. [`Strategy::Direct`]: the process already runs as root.
//! 2. [`Strategy::SudoCached`]: `sudo -n -v` succeeds without a password.
//! 3. [`Strategy::Helper`]: a polkit-style helper (`pkexec`) is on `PATH`.
//! 4. [`Strategy::InteractiveSudo`]: stdin is a terminal, so `sudo` may prompt.
//!
//! A tool that is not installed simply makes its strategy unavailable. Once a
//! strategy is picked the command is executed exactly once; a failing command
//! is never retried through another strategy.
//!
//! All probing goes through the [`Host`] trait so the decision logic can be
//! exercised without touching the real system.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info, warn};

use crate::error::{Error, IoResultExt, Result};

/// Helpers tried, in order, for [`Strategy::Helper`].
pub const DEFAULT_HELPERS: &[&str] = &["pkexec", "gksudo"];

const SUDO: &str = "sudo";

/// A command that needs root privileges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl PrivilegedCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Display for PrivilegedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit status and combined output of one executed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, or -1 when the process was killed by a signal.
    pub status: i32,
    /// Standard output followed by standard error.
    pub output: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// How a privileged command gets executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Execute directly without privilege escalation.
    Direct,
    /// Use `sudo` with its cached credentials, never prompting.
    SudoCached,
    /// Use a graphical helper found at the given path.
    Helper(PathBuf),
    /// Use `sudo` and let it prompt on the terminal.
    InteractiveSudo,
}

/// Strategy kinds in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrategyKind {
    Direct,
    SudoCached,
    Helper,
    InteractiveSudo,
}

const STRATEGY_ORDER: [StrategyKind; 4] = [
    StrategyKind::Direct,
    StrategyKind::SudoCached,
    StrategyKind::Helper,
    StrategyKind::InteractiveSudo,
];

/// Fully resolved program and arguments to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub strategy: Strategy,
    pub program: String,
    pub args: Vec<String>,
}

/// Access to the parts of the system the escalator inspects.
pub trait Host {
    /// Returns true if the process runs with an effective uid of 0.
    fn is_elevated(&self) -> bool;

    /// Returns true if `sudo` can run without asking for a password.
    ///
    /// Must return false when `sudo` is not installed.
    fn sudo_credentials_cached(&self) -> bool;

    /// Looks up a program on `PATH`.
    fn find_program(&self, name: &str) -> Option<PathBuf>;

    /// Returns true if standard input is attached to a terminal.
    fn stdin_is_terminal(&self) -> bool;

    /// Executes a program, collecting its exit status and output.
    fn execute(&self, program: &str, args: &[String]) -> Result<CommandResult>;
}

/// The real system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

impl Host for SystemHost {
    fn is_elevated(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn sudo_credentials_cached(&self) -> bool {
        let status = Command::new(SUDO)
            .args(["-n", "-v"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) => status.success(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("sudo is not installed");
                false
            }
            Err(e) => {
                warn!("Failed to probe sudo credentials: {}", e);
                false
            }
        }
    }

    fn find_program(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn stdin_is_terminal(&self) -> bool {
        std::io::stdin().is_terminal()
    }

    fn execute(&self, program: &str, args: &[String]) -> Result<CommandResult> {
        run_command(program, args)
    }
}

/// Runs privileged commands through the first available strategy.
#[derive(Debug, Clone)]
pub struct Escalator<H = SystemHost> {
    host: H,
    helpers: Vec<String>,
}

impl Escalator<SystemHost> {
    /// Creates an escalator for the real system with the default helpers.
    pub fn new() -> Self {
        Self::with_host(SystemHost, DEFAULT_HELPERS.iter().map(|h| h.to_string()))
    }
}

impl Default for Escalator<SystemHost> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Host> Escalator<H> {
    /// Creates an escalator over a specific host and helper list.
    pub fn with_host<I, S>(host: H, helpers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            host,
            helpers: helpers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Picks the first viable strategy.
    pub fn strategy(&self) -> Result<Strategy> {
        for kind in STRATEGY_ORDER {
            if let Some(strategy) = self.probe(kind) {
                debug!("Using privilege strategy {:?}", strategy);
                return Ok(strategy);
            }
        }

        Err(Error::NoElevationStrategy {
            helper: self
                .helpers
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_HELPERS[0].to_string()),
        })
    }

    fn probe(&self, kind: StrategyKind) -> Option<Strategy> {
        match kind {
            StrategyKind::Direct => self.host.is_elevated().then_some(Strategy::Direct),
            StrategyKind::SudoCached => self
                .host
                .sudo_credentials_cached()
                .then_some(Strategy::SudoCached),
            StrategyKind::Helper => self
                .helpers
                .iter()
                .find_map(|helper| self.host.find_program(helper))
                .map(Strategy::Helper),
            StrategyKind::InteractiveSudo => (self.host.stdin_is_terminal()
                && self.host.find_program(SUDO).is_some())
            .then_some(Strategy::InteractiveSudo),
        }
    }

    /// Builds the invocation for a privileged command without running it.
    pub fn plan(&self, command: &PrivilegedCommand) -> Result<Invocation> {
        let strategy = self.strategy()?;

        let (program, args) = match &strategy {
            Strategy::Direct => (command.program.clone(), command.args.clone()),
            Strategy::SudoCached => (SUDO.to_string(), sudo_args(&["-n"], command)),
            Strategy::InteractiveSudo => (SUDO.to_string(), sudo_args(&[], command)),
            Strategy::Helper(helper) => {
                // Helpers like pkexec refuse relative program names.
                let target = self.resolve_program(&command.program)?;
                let mut args = vec![target.display().to_string()];
                args.extend(command.args.iter().cloned());
                (helper.display().to_string(), args)
            }
        };

        Ok(Invocation {
            strategy,
            program,
            args,
        })
    }

    /// Runs a command with root privileges and returns its result.
    ///
    /// A non-zero exit of the command is not an error; only failing to pick a
    /// strategy or to start the process is.
    pub fn run_privileged(&self, command: &PrivilegedCommand) -> Result<CommandResult> {
        let invocation = self.plan(command)?;
        info!(
            "Running '{}' via {} {}",
            command,
            invocation.program,
            invocation.args.join(" ")
        );

        let result = self.host.execute(&invocation.program, &invocation.args)?;
        debug!("'{}' exited with status {}", command, result.status);
        Ok(result)
    }

    fn resolve_program(&self, program: &str) -> Result<PathBuf> {
        if Path::new(program).is_absolute() {
            return Ok(PathBuf::from(program));
        }
        self.host
            .find_program(program)
            .ok_or_else(|| Error::ProgramNotFound {
                program: program.to_string(),
            })
    }
}

fn sudo_args(flags: &[&str], command: &PrivilegedCommand) -> Vec<String> {
    let mut args: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
    args.push("--".to_string());
    args.push(command.program.clone());
    args.extend(command.args.iter().cloned());
    args
}

/// Runs a command directly, collecting stdout and stderr into one string.
pub fn run_command(program: &str, args: &[String]) -> Result<CommandResult> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .output()
        .command_context(program)?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CommandResult {
        status: output.status.code().unwrap_or(-1),
        output: combined,
    })
}
