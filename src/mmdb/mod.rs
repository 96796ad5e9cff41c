//! MaxMind DB (MMDB) format
//!
//! ## Architecture
//!
//! - **types**: MMDB-specific types and constants
//! - **metadata**: metadata marker search and metadata parsing
//! - **tree**: search tree traversal for IP lookups
//!
//! Data decoding lives in `crate::data_section`.

pub mod metadata;
pub mod tree;
pub mod types;

pub use metadata::{find_metadata_marker, Metadata};
pub use tree::{SearchTree, TreeLayout, TreeMatch, TreeRecord};
pub use types::{
    IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, IPV4_SUBTREE_DEPTH, METADATA_MARKER,
    METADATA_SEARCH_WINDOW,
};
