//! Runtime configuration.
//!
//! Most settings come from the command line. Mount rules may additionally be
//! kept in `$XDG_CONFIG_HOME/dmenu-mount/rules`, one rule per line in the same
//! `<condition>::<args>` syntax as `--rule`. Blank lines and lines starting
//! with `#` are ignored.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::executor::DEFAULT_HELPERS;
use crate::menu::Menu;
use crate::mount::MOUNT_TARGET;
use crate::rule::{MountRule, RuleSet};

/// Name used for notifications and the configuration directory.
pub const APP_NAME: &str = "dmenu-mount";

/// File name of the rules file inside the configuration directory.
pub const RULES_FILE_NAME: &str = "rules";

/// Everything a run of the tool needs to know.
#[derive(Debug, Clone)]
pub struct Config {
    pub menu: Menu,
    /// Elevation helpers tried in order.
    pub helpers: Vec<String>,
    /// Directory devices are mounted on.
    pub target: PathBuf,
    /// Mount rules; command-line rules come before file rules.
    pub rules: RuleSet,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            menu: Menu::default(),
            helpers: DEFAULT_HELPERS.iter().map(|h| h.to_string()).collect(),
            target: PathBuf::from(MOUNT_TARGET),
            rules: RuleSet::default(),
        }
    }
}

/// Default location of the rules file, if a config directory is known.
pub fn default_rules_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_NAME).join(RULES_FILE_NAME))
}

/// Loads rules from a file the user named explicitly. The file must exist.
pub fn load_rules_file(path: &Path) -> Result<Vec<MountRule>> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::RulesFileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let rules = parse_rules(&content, path)?;
    debug!("Loaded {} rules from {}", rules.len(), path.display());
    Ok(rules)
}

/// Loads rules from the default location. A missing file yields no rules.
pub fn load_default_rules_file(path: &Path) -> Result<Vec<MountRule>> {
    if !path.exists() {
        debug!("No rules file at {}", path.display());
        return Ok(Vec::new());
    }
    load_rules_file(path)
}

/// Parses the contents of a rules file.
pub fn parse_rules(content: &str, path: &Path) -> Result<Vec<MountRule>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            line.trim()
                .parse::<MountRule>()
                .map_err(|e| Error::RulesFileParse {
                    path: path.to_path_buf(),
                    line: index + 1,
                    source: Box::new(e),
                })
        })
        .collect()
}
