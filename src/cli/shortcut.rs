//! The `shortcut` subcommand: write a desktop launcher for a deep link.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::browser::shortcut::write_desktop_file;

pub fn run(
    deep_link: String,
    output: PathBuf,
    name: Option<String>,
    icon: Option<PathBuf>,
) -> Result<()> {
    let exec = std::env::current_exe().context("cannot determine own executable path")?;
    write_desktop_file(
        &output,
        name.as_deref().unwrap_or("Hierarchy Browser"),
        &exec,
        &deep_link,
        icon.as_deref(),
    )?;
    println!("wrote {}", output.display());
    Ok(())
}
