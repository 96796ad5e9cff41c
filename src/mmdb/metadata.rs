//! MMDB metadata parsing
//!
//! The metadata block is a single map value appended after the data
//! section, introduced by [`METADATA_MARKER`]. It is parsed once when the
//! reader opens and kept for the reader's lifetime.

use super::types::{
    IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER, METADATA_SEARCH_WINDOW,
};
use crate::data_section::{DataDecoder, DataValue};
use crate::error::{GeoIpError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Database metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    /// Binary format major version (always 2 for supported files)
    pub binary_format_major_version: u16,
    /// Binary format minor version
    pub binary_format_minor_version: u16,
    /// Build time, seconds since the Unix epoch
    pub build_epoch: u64,
    /// Schema identifier, e.g. "GeoIP2-City"
    pub database_type: String,
    /// Human-readable description keyed by language code
    pub description: BTreeMap<String, String>,
    /// Address family of the search tree
    pub ip_version: IpVersion,
    /// Language codes the records carry names for
    pub languages: Vec<String>,
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Bits per tree record
    pub record_size: RecordSize,
}

impl Metadata {
    /// Locate and parse the metadata block of a database buffer
    ///
    /// Returns the metadata and the offset of the marker, which is where
    /// the data section ends.
    pub fn from_buffer(buffer: &[u8]) -> Result<(Self, usize)> {
        let marker_offset = find_metadata_marker(buffer)?;
        let metadata_start = marker_offset + METADATA_MARKER.len();

        // Pointers inside metadata are relative to the end of the marker
        let decoder = DataDecoder::new(&buffer[metadata_start..]);
        let value = decoder.decode(0).map_err(|e| match e {
            GeoIpError::TruncatedData { .. } | GeoIpError::InvalidDatabase(_) => {
                GeoIpError::invalid(format!("failed to decode metadata: {}", e))
            }
            other => other,
        })?;

        let metadata = Self::from_value(&value)?;

        let search_tree_end = metadata.search_tree_size() + DATA_SECTION_SEPARATOR_SIZE;
        if search_tree_end > marker_offset {
            return Err(GeoIpError::invalid(format!(
                "search tree of {} nodes ({} bytes) does not fit before metadata at offset {}",
                metadata.node_count,
                metadata.search_tree_size(),
                marker_offset
            )));
        }

        Ok((metadata, marker_offset))
    }

    /// Extract metadata fields from the decoded metadata map
    pub fn from_value(value: &DataValue) -> Result<Self> {
        let map = value.as_map().ok_or_else(|| {
            GeoIpError::invalid(format!("metadata is a {}, not a map", value.kind()))
        })?;

        let major = required_uint(map, "binary_format_major_version", u16::MAX as u64)? as u16;
        if major != 2 {
            return Err(GeoIpError::invalid(format!(
                "unsupported binary format major version {}",
                major
            )));
        }

        Ok(Metadata {
            binary_format_major_version: major,
            binary_format_minor_version: required_uint(
                map,
                "binary_format_minor_version",
                u16::MAX as u64,
            )? as u16,
            build_epoch: required_uint(map, "build_epoch", u64::MAX)?,
            database_type: required_string(map, "database_type")?,
            description: optional_string_map(map, "description")?,
            ip_version: IpVersion::from_number(required_uint(map, "ip_version", u16::MAX as u64)?)?,
            languages: optional_string_array(map, "languages")?,
            node_count: required_uint(map, "node_count", u32::MAX as u64)? as u32,
            record_size: RecordSize::from_bits(required_uint(map, "record_size", u16::MAX as u64)?)?,
        })
    }

    /// Size of the search tree region in bytes
    pub fn search_tree_size(&self) -> usize {
        self.node_count as usize * self.record_size.node_bytes()
    }

    /// Offset of the first data section byte in the file
    pub fn data_section_start(&self) -> usize {
        self.search_tree_size() + DATA_SECTION_SEPARATOR_SIZE
    }
}

/// Find the metadata marker in an MMDB buffer
///
/// The marker appears somewhere in the last 128KB of the file; the metadata
/// follows it. If the marker occurs more than once the last occurrence wins.
pub fn find_metadata_marker(data: &[u8]) -> Result<usize> {
    let search_start = data.len().saturating_sub(METADATA_SEARCH_WINDOW);
    memchr::memmem::rfind(&data[search_start..], METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or_else(|| {
            GeoIpError::invalid("metadata marker not found (is this a MaxMind DB file?)")
        })
}

fn required<'a>(map: &'a HashMap<String, DataValue>, key: &str) -> Result<&'a DataValue> {
    map.get(key).ok_or_else(|| {
        GeoIpError::invalid(format!("required metadata field '{}' not found", key))
    })
}

fn required_uint(map: &HashMap<String, DataValue>, key: &str, max: u64) -> Result<u64> {
    let value = required(map, key)?;
    match value {
        DataValue::Uint16(_) | DataValue::Uint32(_) | DataValue::Uint64(_) | DataValue::Uint128(_) => {
            value.as_u64().filter(|n| *n <= max).ok_or_else(|| {
                GeoIpError::invalid(format!("metadata field '{}' is out of range", key))
            })
        }
        other => Err(GeoIpError::invalid(format!(
            "metadata field '{}' is a {}, not an unsigned integer",
            key,
            other.kind()
        ))),
    }
}

fn required_string(map: &HashMap<String, DataValue>, key: &str) -> Result<String> {
    let value = required(map, key)?;
    value.as_str().map(str::to_string).ok_or_else(|| {
        GeoIpError::invalid(format!(
            "metadata field '{}' is a {}, not a string",
            key,
            value.kind()
        ))
    })
}

fn optional_string_map(
    map: &HashMap<String, DataValue>,
    key: &str,
) -> Result<BTreeMap<String, String>> {
    let Some(value) = map.get(key) else {
        return Ok(BTreeMap::new());
    };
    let entries = value.as_map().ok_or_else(|| {
        GeoIpError::invalid(format!(
            "metadata field '{}' is a {}, not a map",
            key,
            value.kind()
        ))
    })?;
    entries
        .iter()
        .map(|(lang, text)| match text.as_str() {
            Some(s) => Ok((lang.clone(), s.to_string())),
            None => Err(GeoIpError::invalid(format!(
                "metadata field '{}.{}' is a {}, not a string",
                key,
                lang,
                text.kind()
            ))),
        })
        .collect()
}

fn optional_string_array(map: &HashMap<String, DataValue>, key: &str) -> Result<Vec<String>> {
    let Some(value) = map.get(key) else {
        return Ok(Vec::new());
    };
    let items = value.as_array().ok_or_else(|| {
        GeoIpError::invalid(format!(
            "metadata field '{}' is a {}, not an array",
            key,
            value.kind()
        ))
    })?;
    items
        .iter()
        .map(|item| {
            item.as_str().map(str::to_string).ok_or_else(|| {
                GeoIpError::invalid(format!(
                    "metadata field '{}' contains a {}, not a string",
                    key,
                    item.kind()
                ))
            })
        })
        .collect()
}
