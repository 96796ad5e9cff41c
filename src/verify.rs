//! Database verification
//!
//! [`Reader::verify`] walks the whole search tree and decodes every data
//! record it reaches. Lookups only touch the path to one address, so a
//! corrupt region can go unnoticed until an unlucky query hits it; this
//! check surfaces such problems up front.
//!
//! ```rust,no_run
//! use geoip2::Reader;
//!
//! let reader = Reader::open("GeoLite2-City.mmdb")?;
//! let report = reader.verify();
//! if !report.is_valid() {
//!     for error in &report.errors {
//!         eprintln!("  - {}", error);
//!     }
//! }
//! # Ok::<(), geoip2::GeoIpError>(())
//! ```

use crate::mmdb::{TreeRecord, DATA_SECTION_SEPARATOR_SIZE};
use crate::reader::Reader;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Verification findings
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Problems that make some lookups fail
    pub errors: Vec<String>,
    /// Suspicious but harmless properties
    pub warnings: Vec<String>,
    /// What the walk covered
    pub stats: VerifyStats,
}

/// Counters gathered while verifying
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyStats {
    /// Distinct tree nodes reached from the root
    pub nodes_visited: u32,
    /// Distinct data offsets referenced by the tree
    pub data_records: usize,
    /// Size of the data section in bytes
    pub data_section_size: usize,
}

impl VerifyReport {
    /// True when no errors were found
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!(error = %msg, "verify");
        self.errors.push(msg);
    }

    fn warning(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!(warning = %msg, "verify");
        self.warnings.push(msg);
    }
}

impl VerifyStats {
    /// One-line summary
    pub fn summary(&self) -> String {
        format!(
            "Nodes: {}, Data records: {}, Data section: {} KB",
            self.nodes_visited,
            self.data_records,
            self.data_section_size / 1024
        )
    }
}

impl Reader {
    /// Check the whole database for structural problems
    pub fn verify(&self) -> VerifyReport {
        let mut report = VerifyReport::default();
        report.stats.data_section_size = self.data_section().len();

        check_metadata(self, &mut report);
        check_separator(self, &mut report);
        let offsets = walk_tree(self, &mut report);
        check_data_records(self, &offsets, &mut report);

        debug!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            stats = %report.stats.summary(),
            "verification finished"
        );
        report
    }
}

fn check_metadata(reader: &Reader, report: &mut VerifyReport) {
    let metadata = reader.metadata();
    if metadata.build_epoch == 0 {
        report.warning("metadata build_epoch is 0");
    }
    if metadata.database_type.is_empty() {
        report.warning("metadata database_type is empty");
    }
    for language in metadata.description.keys() {
        if !metadata.languages.contains(language) {
            report.warning(format!(
                "description language '{}' is not listed in languages",
                language
            ));
        }
    }
}

fn check_separator(reader: &Reader, report: &mut VerifyReport) {
    let start = reader.layout().tree_size();
    let separator = &reader.as_bytes()[start..start + DATA_SECTION_SEPARATOR_SIZE];
    if let Some(pos) = separator.iter().position(|&b| b != 0) {
        report.error(format!(
            "data section separator has non-zero byte 0x{:02x} at file offset {}",
            separator[pos],
            start + pos
        ));
    }
}

/// Walk every node reachable from the root, returning the data offsets seen
///
/// Nodes may be shared (IPv4 aliases in IPv6 trees), so a node can be
/// reached along several paths of different lengths. Each node is expanded
/// again whenever it is reached deeper than before, so the bit-count bound
/// holds for its deepest path. Record errors are reported on first visit.
fn walk_tree(reader: &Reader, report: &mut VerifyReport) -> BTreeSet<usize> {
    let tree = reader.search_tree();
    let node_count = reader.layout().node_count;
    let max_depth = reader.layout().ip_version.bit_count();

    let mut offsets = BTreeSet::new();
    let mut deepest: HashMap<u32, u8> = HashMap::new();
    let mut stack: Vec<(u32, u8)> = Vec::new();
    if node_count > 0 {
        stack.push((0, 0));
    }

    while let Some((node, depth)) = stack.pop() {
        let previous = deepest.get(&node).copied();
        if previous.is_some_and(|seen| seen >= depth) {
            continue;
        }
        deepest.insert(node, depth);
        let first_visit = previous.is_none();
        // Links past the last bit were already reported from a shallower depth
        let depth_reported = previous.is_some_and(|seen| seen + 1 >= max_depth);

        for side in 0..2u8 {
            let record = match tree.read_record(node, side) {
                Ok(record) => record,
                Err(e) => {
                    if first_visit {
                        report.error(format!("node {}: {}", node, e));
                    }
                    continue;
                }
            };
            match tree.classify(record) {
                Ok(TreeRecord::Node(next)) => {
                    if depth + 1 < max_depth {
                        stack.push((next, depth + 1));
                    } else if !depth_reported {
                        report.error(format!(
                            "node {} links to node {} beyond bit {}",
                            node, next, max_depth
                        ));
                    }
                }
                Ok(TreeRecord::Empty) => {}
                Ok(TreeRecord::Data(offset)) => {
                    offsets.insert(offset);
                }
                Err(e) if first_visit => {
                    report.error(format!("node {} side {}: {}", node, side, e))
                }
                Err(_) => {}
            }
        }
    }

    // deepest.len() <= node_count, which is a u32
    report.stats.nodes_visited = deepest.len() as u32;
    if report.stats.nodes_visited < node_count {
        report.warning(format!(
            "{} of {} nodes are unreachable from the root",
            node_count - report.stats.nodes_visited,
            node_count
        ));
    }
    offsets
}

fn check_data_records(reader: &Reader, offsets: &BTreeSet<usize>, report: &mut VerifyReport) {
    report.stats.data_records = offsets.len();
    for &offset in offsets {
        if let Err(e) = reader.decode(offset) {
            report.error(format!("data record at offset {}: {}", offset, e));
        }
    }
}
