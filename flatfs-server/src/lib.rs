//! Network front end for a `flatfs` volume: a line based command protocol
//! served over TCP with one thread per client.

pub mod cli;
pub mod config;
pub mod logger;
pub mod protocol;
pub mod server;

use thiserror::Error;

pub use crate::config::Config;
pub use crate::server::Server;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("failed to initialize file system: {0}")]
    Fs(#[from] flatfs::FsError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
