use std::fs::OpenOptions;
use std::process;
use std::sync::Arc;

use flatfs::io::FileBlockEmulatorBuilder;
use flatfs::StorageManager;
use clap::Parser;
use flatfs_server::cli::Args;
use flatfs_server::{logger, Config, Server, ServerError};
use log::info;

fn run() -> Result<(), ServerError> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    logger::init(config.level_filter()?);

    // The region is rebuilt empty on every start, metadata is never persisted.
    let disk = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&config.disk)?;
    let dev = FileBlockEmulatorBuilder::from(disk)
        .with_block_count(config.block_count)
        .with_block_size(config.block_size)
        .build()?;
    info!(
        "Formatted {} ({} x {} bytes).",
        config.disk.display(),
        config.block_count,
        config.block_size
    );

    let fs = Arc::new(StorageManager::new(dev, config.fs_options())?);
    let server = Server::bind(("0.0.0.0", config.port), fs)?;
    server.run()?;
    Ok(())
}

pub fn main() {
    if let Err(err) = run() {
        eprintln!("flatfs-server: {}", err);
        process::exit(1);
    }
}
