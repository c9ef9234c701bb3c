//! Command line of the `flatfs-server` binary.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "flatfs-server")]
#[command(version)]
#[command(about = "Serve a flat block file system over a line based TCP protocol")]
pub struct Args {
    /// TOML config file; built-in defaults apply when omitted
    pub config: Option<PathBuf>,
}
