//! MMDB-specific Type Definitions

use crate::error::{GeoIpError, Result};
use serde::Serialize;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// The metadata marker is searched for in this many trailing bytes
pub const METADATA_SEARCH_WINDOW: usize = 128 * 1024;

/// Zero bytes between the search tree and the data section
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// Bits walked from the root to reach `::0.0.0.0/96` in an IPv6 tree
pub const IPV4_SUBTREE_DEPTH: u8 = 96;

/// IP version of the search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (IPv4 lives under ::/96)
    V6,
}

impl IpVersion {
    /// Address width in bits
    pub fn bit_count(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Numeric form as stored in metadata
    pub fn number(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }

    /// Parse the metadata `ip_version` value
    pub fn from_number(n: u64) -> Result<Self> {
        match n {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            _ => Err(GeoIpError::invalid(format!("invalid ip_version: {}", n))),
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        self.bits() as usize * 2 / 8
    }

    /// Record width in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Create from bit size
    pub fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(GeoIpError::invalid(format!(
                "invalid record size: {} bits",
                bits
            ))),
        }
    }
}
