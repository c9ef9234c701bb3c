//! A flat file store over a pre-sized region of fixed-size blocks.
//!
//! Files live in a fixed-capacity table; each file's data is a chain of
//! blocks handed out by a free-block bitmap. All metadata stays in memory and
//! is guarded by one reader/writer lock inside [`StorageManager`], which can be
//! shared between threads.

#[macro_use]
extern crate log;

pub mod alloc;
pub mod chain;
mod fs;
pub mod io;
pub mod table;

pub use crate::fs::{
    FileStat, FsError, FsOptions, ReadMode, Result, StorageManager, DEFAULT_MAX_FILES,
    DEFAULT_RESERVED_BLOCKS,
};
pub use crate::table::MAX_NAME_LEN;
