pub mod inspect_cmd;
pub mod lookup_cmd;
pub mod verify_cmd;

pub use inspect_cmd::cmd_inspect;
pub use lookup_cmd::{cmd_lookup, LookupOptions};
pub use verify_cmd::cmd_verify;

use anyhow::{Context, Result};
use geoip2::{OpenMode, Reader};
use std::path::Path;

/// Open a database, memory-mapped unless `in_memory` is set
pub fn open_reader(database: &Path, in_memory: bool) -> Result<Reader> {
    let mode = if in_memory {
        OpenMode::InMemory
    } else {
        OpenMode::Mmap
    };
    Reader::options()
        .mode(mode)
        .open(database)
        .with_context(|| format!("Failed to load database: {}", database.display()))
}
