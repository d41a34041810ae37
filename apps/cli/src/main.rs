//! dmenu-mount - Mount and unmount removable devices from a dmenu menu.
//!
//! `dmenu-mount mount` lists unmounted devices and mounts the chosen one on
//! `/mnt`; `dmenu-mount unmount` lists mounted devices and unmounts the
//! chosen one. Results are shown as desktop notifications when possible.

mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{debug, error};

use dmenu_mount_core::config::{APP_NAME, default_rules_path, load_default_rules_file, load_rules_file};
use dmenu_mount_core::disk::LsblkSource;
use dmenu_mount_core::executor::SystemHost;
use dmenu_mount_core::menu::DEFAULT_MENU_PROGRAM;
use dmenu_mount_core::{Config, Escalator, Menu, MountRule, Notifier, Result, Workflow};

/// Mount and unmount removable devices from a menu.
#[derive(Parser)]
#[command(name = "dmenu-mount", version)]
#[command(about = "Mount and unmount removable devices from a dmenu menu", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Menu program to run. It must accept dmenu's `-p <prompt>` option.
    #[arg(
        long,
        global = true,
        env = "DMENU_MOUNT_MENU",
        value_name = "PROGRAM",
        default_value = DEFAULT_MENU_PROGRAM
    )]
    menu: String,

    /// Extra argument passed to the menu program before `-p`, e.g.
    /// `--menu rofi --menu-arg -dmenu`. May be repeated.
    #[arg(
        long = "menu-arg",
        global = true,
        value_name = "ARG",
        allow_hyphen_values = true
    )]
    menu_args: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Choose an unmounted device and mount it on /mnt.
    Mount {
        /// Extra mount arguments for devices matching a condition, e.g.
        /// `label == "BACKUP"::{"args": ["-o", "ro"]}`. The first matching
        /// rule wins. May be repeated.
        #[arg(long = "rule", value_name = "RULE")]
        rules: Vec<MountRule>,

        /// Read additional rules from PATH instead of the default rules file.
        #[arg(long, value_name = "PATH", conflicts_with = "no_rules_file")]
        rules_file: Option<PathBuf>,

        /// Do not read any rules file.
        #[arg(long)]
        no_rules_file: bool,
    },

    /// Choose a mounted device and unmount it.
    #[command(alias = "umount")]
    Unmount,
}

/// Builds the configuration, reading the rules file when mounting.
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config {
        menu: Menu::new(cli.menu.as_str(), cli.menu_args.iter().cloned()),
        ..Config::default()
    };

    if let Commands::Mount {
        rules,
        rules_file,
        no_rules_file,
    } = &cli.command
    {
        config.rules.extend(rules.iter().cloned());

        if let Some(path) = rules_file {
            config.rules.extend(load_rules_file(path)?);
        } else if !*no_rules_file {
            if let Some(path) = default_rules_path() {
                config.rules.extend(load_default_rules_file(&path)?);
            }
        }
        debug!("{} mount rules configured", config.rules.len());
    }

    Ok(config)
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let notifier = Notifier::detect(APP_NAME);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            notifier.fatal(e.to_string());
        }
    };

    let escalator = Escalator::with_host(SystemHost, config.helpers.iter().cloned());
    let workflow = Workflow::new(LsblkSource, config.menu.clone(), escalator, config.target.clone());

    let outcome = match cli.command {
        Commands::Mount { .. } => workflow.mount(&config.rules),
        Commands::Unmount => workflow.unmount(),
    };

    match outcome {
        Ok(Some(message)) => {
            notifier.report(&message);
        }
        Ok(None) => debug!("Nothing selected"),
        Err(e) => {
            error!("{}", e);
            notifier.fatal(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_mount_rules() {
        let cli = Cli::try_parse_from([
            "dmenu-mount",
            "mount",
            "--rule",
            r#"label == "BACKUP"::{"args": ["-o", "ro"]}"#,
            "--rule",
            r#"True::{"args": []}"#,
            "--no-rules-file",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules.rules()[0].args, vec!["-o", "ro"]);
        assert_eq!(config.menu, Menu::new("dmenu", Vec::<String>::new()));
    }

    #[test]
    fn test_malformed_rule_is_argument_error() {
        let err = Cli::try_parse_from([
            "dmenu-mount",
            "mount",
            "--rule",
            r#"label = "BACKUP"::{"args": []}"#,
        ])
        .err()
        .unwrap();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_rule_only_on_mount() {
        let result = Cli::try_parse_from(["dmenu-mount", "unmount", "--rule", "True::{\"args\": []}"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_umount_alias_and_menu_option() {
        let cli = Cli::try_parse_from([
            "dmenu-mount",
            "--menu",
            "rofi",
            "--menu-arg",
            "-dmenu",
            "--menu-arg",
            "-i",
            "umount",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Unmount));

        let config = load_config(&cli).unwrap();
        assert_eq!(config.menu, Menu::new("rofi", ["-dmenu", "-i"]));
        assert!(config.rules.is_empty());
    }

    #[test]
    fn test_menu_args_after_subcommand() {
        let cli = Cli::try_parse_from(["dmenu-mount", "unmount", "--menu", "rofi", "--menu-arg", "-dmenu"])
            .unwrap();
        assert_eq!(cli.menu_args, vec!["-dmenu"]);
    }

    #[test]
    fn test_missing_explicit_rules_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo").join("rules");
        let cli = Cli::try_parse_from([
            "dmenu-mount",
            "mount",
            "--rules-file",
            path.to_str().unwrap(),
        ])
        .unwrap();

        let err = load_config(&cli).unwrap_err();
        assert!(matches!(err, dmenu_mount_core::Error::RulesFileRead { .. }));
    }

    #[test]
    fn test_rules_file_option() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules");
        std::fs::write(&path, "fstype == \"vfat\"::{\"args\": [\"-o\", \"uid=1000\"]}\n").unwrap();

        let cli = Cli::try_parse_from([
            "dmenu-mount",
            "mount",
            "--rule",
            r#"label == "A"::{"args": ["-o", "ro"]}"#,
            "--rules-file",
            path.to_str().unwrap(),
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        let rules = config.rules.rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].args, vec!["-o", "ro"]);
        assert_eq!(rules[1].args, vec!["-o", "uid=1000"]);
    }
}
