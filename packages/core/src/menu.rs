//! Device selection through an external menu program (dmenu by default).
//!
//! Devices are rendered as the rows of a plain, left-aligned table. The rows
//! are written to the menu program's stdin, one per line, and the line it
//! prints back is mapped to the device it was rendered from. Every row
//! contains the device path, so no two devices share a row.

use std::io::Write;
use std::process::{Command, Stdio};

use log::debug;

use crate::disk::BlockDevice;
use crate::error::{Error, IoResultExt, Result};

/// Default menu program.
pub const DEFAULT_MENU_PROGRAM: &str = "dmenu";

/// Column separator of rendered tables.
const COLUMN_GAP: &str = "  ";

/// Something that lets the user pick one of several rows.
pub trait Selector {
    /// Presents `rows` and returns the index of the chosen one, or `None`
    /// if the user cancelled.
    fn select(&self, rows: &[String], prompt: &str) -> Result<Option<usize>>;
}

/// A dmenu-compatible menu program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    program: String,
    args: Vec<String>,
}

impl Default for Menu {
    fn default() -> Self {
        Self::new(DEFAULT_MENU_PROGRAM, Vec::<String>::new())
    }
}

impl Menu {
    /// Creates a menu running `program` with extra `args` before the prompt.
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

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs the menu program and returns the line it printed.
    ///
    /// Returns `None` when the program exits with a non-zero status, which is
    /// how dmenu signals that the user cancelled.
    fn run(&self, input: &str, prompt: &str) -> Result<Option<String>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(["-p", prompt])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::ProgramNotFound {
                        program: self.program.clone(),
                    }
                } else {
                    Error::CommandExecution {
                        command: self.program.clone(),
                        source: e,
                    }
                }
            })?;

        // Writing may fail if the menu exits early; the child is still
        // reaped below either way.
        let write_result = child
            .stdin
            .take()
            .map(|mut stdin| stdin.write_all(input.as_bytes()))
            .unwrap_or(Ok(()));

        let output = child.wait_with_output().command_context(&self.program)?;

        if !output.status.success() {
            debug!("{} exited with {}, no selection", self.program, output.status);
            return Ok(None);
        }
        match write_result {
            // The menu picked an entry without reading all rows.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("{} closed its input early", self.program);
            }
            other => other.command_context(&self.program)?,
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Some(stdout.trim_end_matches('\n').to_string()))
    }
}

impl Selector for Menu {
    fn select(&self, rows: &[String], prompt: &str) -> Result<Option<usize>> {
        let Some(choice) = self.run(&rows.join("\n"), prompt)? else {
            return Ok(None);
        };

        let index = rows.iter().position(|row| *row == choice);
        if index.is_none() {
            debug!("Menu returned unknown entry {:?}", choice);
        }
        Ok(index)
    }
}

/// Renders rows as a plain table with left-aligned columns.
///
/// Trailing whitespace is trimmed from every line.
pub fn render_table(rows: &[Vec<String>]) -> Vec<String> {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    rows.iter()
        .map(|row| {
            let line = row
                .iter()
                .zip(&widths)
                .map(|(cell, &width)| format!("{cell:<width$}"))
                .collect::<Vec<_>>()
                .join(COLUMN_GAP);
            line.trim_end().to_string()
        })
        .collect()
}

/// Renders devices as menu rows.
///
/// The mount point column is only shown when at least one device is mounted.
pub fn render_devices(devices: &[BlockDevice]) -> Vec<String> {
    let any_mounted = devices.iter().any(BlockDevice::is_mounted);

    let rows: Vec<Vec<String>> = devices
        .iter()
        .map(|device| {
            let mut row = Vec::with_capacity(5);
            if any_mounted {
                row.push(device.mountpoint.clone().unwrap_or_default());
            }
            row.push(device.path.clone());
            row.push(device.label.clone().unwrap_or_default());
            row.push(device.fstype.clone().unwrap_or_default());
            row.push(device.size.clone());
            row
        })
        .collect();

    render_table(&rows)
}

/// Lets the user choose one of `devices`.
pub fn choose_device<'a, S: Selector + ?Sized>(
    selector: &S,
    devices: &'a [BlockDevice],
    prompt: &str,
) -> Result<Option<&'a BlockDevice>> {
    let rows = render_devices(devices);
    let index = selector.select(&rows, prompt)?;
    Ok(index.and_then(|i| devices.get(i)))
}
