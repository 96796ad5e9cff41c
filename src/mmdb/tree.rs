//! MMDB Search Tree Traversal
//!
//! Implements binary search tree traversal for IP address lookups.
//! The tree uses a compact binary representation where each node contains
//! two records (left and right) that point to either:
//! - Another node (continue traversal)
//! - A data section offset (found)
//! - A "not found" marker

use super::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, IPV4_SUBTREE_DEPTH};
use crate::buffer::read_at;
use crate::error::{GeoIpError, Result};
use std::net::IpAddr;
use tracing::trace;

/// Result of a successful tree walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMatch {
    /// Offset into the data section (relative to data section start)
    pub data_offset: usize,
    /// Network prefix length of the matching record, in the address's own
    /// family (IPv4 lookups in an IPv6 tree report IPv4 prefix lengths)
    pub prefix_len: u8,
}

/// A classified tree record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeRecord {
    /// Index of another node
    Node(u32),
    /// No data for this path
    Empty,
    /// Offset into the data section
    Data(usize),
}

/// Shape of a search tree, fixed at open time
///
/// Holds everything a lookup needs besides the tree bytes themselves,
/// including the IPv4 start node of IPv6 trees so it is found only once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLayout {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Size of the data section in bytes
    pub data_section_len: usize,
    ipv4_start: u32,
    ipv4_start_depth: u8,
}

impl TreeLayout {
    /// Build the layout and locate the IPv4 subtree of IPv6 trees
    ///
    /// `tree` must be exactly the search tree region.
    pub fn new(
        tree: &[u8],
        node_count: u32,
        record_size: RecordSize,
        ip_version: IpVersion,
        data_section_len: usize,
    ) -> Result<Self> {
        let mut layout = TreeLayout {
            node_count,
            record_size,
            ip_version,
            data_section_len,
            ipv4_start: 0,
            ipv4_start_depth: 0,
        };

        if ip_version == IpVersion::V6 {
            // IPv4 addresses live at ::0.0.0.0/96. Follow the left record from
            // the root for 96 bits, stopping early if the path ends.
            let search = SearchTree::new(tree, &layout);
            let mut record = 0u32;
            let mut depth = 0u8;
            while depth < IPV4_SUBTREE_DEPTH && record < node_count {
                record = search.read_record(record, 0)?;
                depth += 1;
            }
            layout.ipv4_start = record;
            layout.ipv4_start_depth = depth;
        }

        Ok(layout)
    }

    /// Size of the search tree in bytes
    pub fn tree_size(&self) -> usize {
        self.node_count as usize * self.record_size.node_bytes()
    }

    /// Record value and depth where IPv4 lookups begin
    pub fn ipv4_start(&self) -> (u32, u8) {
        (self.ipv4_start, self.ipv4_start_depth)
    }
}

/// Search tree for IP address lookups
pub struct SearchTree<'a> {
    /// The search tree region of the file
    tree: &'a [u8],
    layout: &'a TreeLayout,
}

impl<'a> SearchTree<'a> {
    /// Create a new search tree over the tree region
    pub fn new(tree: &'a [u8], layout: &'a TreeLayout) -> Self {
        Self { tree, layout }
    }

    /// Resolve an address to a data offset, `None` if the tree has no
    /// record for it
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<TreeMatch>> {
        let result = match (ip, self.layout.ip_version) {
            (IpAddr::V4(addr), IpVersion::V4) => {
                let bits = (u32::from(addr) as u128) << 96;
                self.walk(bits, 0, 0, 32)?
            }
            (IpAddr::V4(addr), IpVersion::V6) => {
                let bits = u32::from(addr) as u128;
                let (start, depth) = self.layout.ipv4_start();
                self.walk(bits, start, depth, 128)?
                    .map(|(offset, depth)| (offset, depth.saturating_sub(IPV4_SUBTREE_DEPTH)))
            }
            (IpAddr::V6(addr), IpVersion::V6) => self.walk(u128::from(addr), 0, 0, 128)?,
            (IpAddr::V6(addr), IpVersion::V4) => match addr.to_ipv4_mapped() {
                Some(v4) => return self.lookup(IpAddr::V4(v4)),
                None => {
                    return Err(GeoIpError::InvalidInput(format!(
                        "cannot look up IPv6 address {} in an IPv4-only database",
                        addr
                    )))
                }
            },
        };

        let found = result.map(|(data_offset, prefix_len)| TreeMatch {
            data_offset,
            prefix_len,
        });
        trace!(%ip, ?found, "search tree lookup");
        Ok(found)
    }

    /// Walk from `start` at bit index `depth` until a terminal record
    ///
    /// `bits` holds the address left-aligned in a 128-bit space for IPv4
    /// trees and as-is for IPv6 trees; bit `i` is `bits >> (127 - i)`.
    fn walk(
        &self,
        bits: u128,
        start: u32,
        mut depth: u8,
        end_depth: u8,
    ) -> Result<Option<(usize, u8)>> {
        let mut record = start;
        loop {
            match self.classify(record)? {
                TreeRecord::Empty => return Ok(None),
                TreeRecord::Data(offset) => return Ok(Some((offset, depth))),
                TreeRecord::Node(node) => {
                    if depth >= end_depth {
                        return Err(GeoIpError::invalid(format!(
                            "search tree continues past bit {} at node {}",
                            end_depth, node
                        )));
                    }
                    let bit = ((bits >> (127 - depth as u32)) & 1) as u8;
                    record = self.read_record(node, bit)?;
                    depth += 1;
                }
            }
        }
    }

    /// Classify a raw record value
    ///
    /// - `< node_count`: another node
    /// - `== node_count`: no data
    /// - `> node_count`: data at `record - node_count - 16`
    pub fn classify(&self, record: u32) -> Result<TreeRecord> {
        let node_count = self.layout.node_count;
        if record < node_count {
            return Ok(TreeRecord::Node(record));
        }
        if record == node_count {
            return Ok(TreeRecord::Empty);
        }

        let past_tree = (record - node_count) as usize;
        let offset = past_tree
            .checked_sub(DATA_SECTION_SEPARATOR_SIZE)
            .ok_or_else(|| {
                GeoIpError::invalid(format!(
                    "record {} points into the data section separator (node_count = {})",
                    record, node_count
                ))
            })?;
        if offset >= self.layout.data_section_len {
            return Err(GeoIpError::invalid(format!(
                "record {} points to data offset {} beyond data section of {} bytes",
                record, offset, self.layout.data_section_len
            )));
        }
        Ok(TreeRecord::Data(offset))
    }

    /// Read a record from a node
    ///
    /// Each node contains two records. `side` determines which:
    /// - 0 = left record (for IP bit 0)
    /// - 1 = right record (for IP bit 1)
    pub fn read_record(&self, node: u32, side: u8) -> Result<u32> {
        if node >= self.layout.node_count {
            return Err(GeoIpError::invalid(format!(
                "node index {} exceeds node count {}",
                node, self.layout.node_count
            )));
        }

        let node_bytes = self.layout.record_size.node_bytes();
        let bytes = read_at(self.tree, node as usize * node_bytes, node_bytes)
            .map_err(|e| GeoIpError::invalid(format!("search tree read failed: {}", e)))?;

        let be = |b: &[u8]| b.iter().fold(0u32, |acc, &x| (acc << 8) | x as u32);
        Ok(match (self.layout.record_size, side) {
            (RecordSize::Bits24, 0) => be(&bytes[0..3]),
            (RecordSize::Bits24, _) => be(&bytes[3..6]),
            // Layout: [left 24 bits][left high nibble | right high nibble][right 24 bits]
            (RecordSize::Bits28, 0) => (((bytes[3] & 0xF0) as u32) << 20) | be(&bytes[0..3]),
            (RecordSize::Bits28, _) => (((bytes[3] & 0x0F) as u32) << 24) | be(&bytes[4..7]),
            (RecordSize::Bits32, 0) => be(&bytes[0..4]),
            (RecordSize::Bits32, _) => be(&bytes[4..8]),
        })
    }
}
