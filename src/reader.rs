//! Database reader
//!
//! [`Reader`] owns the database bytes and the parsed metadata. Lookups take
//! `&self` and never mutate shared state, so a reader can be shared across
//! threads (`Arc<Reader>` or scoped borrows) without locking.
//!
//! # Examples
//!
//! ```no_run
//! use geoip2::{OpenMode, Reader};
//!
//! let reader = Reader::options()
//!     .mode(OpenMode::InMemory)
//!     .open("GeoIP2-City.mmdb")?;
//!
//! let city = reader.city("81.2.69.160".parse()?)?;
//! println!("{:?}", city.country.iso_code);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::buffer::{BufferSource, OpenMode};
use crate::data_section::{DataDecoder, DataValue, DEFAULT_MAX_DEPTH};
use crate::error::{GeoIpError, Result};
use crate::mmdb::{Metadata, SearchTree, TreeLayout, TreeMatch};
use crate::records::{AnonymousIp, City, ConnectionType, Country, Domain, FromValue, Isp};
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

/// Options controlling how a database is opened
///
/// ```no_run
/// use geoip2::{OpenMode, Reader};
///
/// let reader = Reader::options().mode(OpenMode::Mmap).max_depth(64).open("GeoLite2-Country.mmdb")?;
/// # Ok::<(), geoip2::GeoIpError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    mode: OpenMode,
    max_depth: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            mode: OpenMode::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl ReaderOptions {
    /// Memory-map the file (default) or read it fully into memory
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Bound on pointer and container nesting while decoding values
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Open the database at `path`
    pub fn open<P: AsRef<Path>>(self, path: P) -> Result<Reader> {
        let path = path.as_ref();
        let buffer = BufferSource::open(path, self.mode)?;
        debug!(path = %path.display(), mode = ?self.mode, size = buffer.len(), "opened database file");
        Reader::from_source(buffer, self.max_depth)
    }

    /// Use an in-memory database image
    pub fn from_bytes(self, bytes: Vec<u8>) -> Result<Reader> {
        Reader::from_source(BufferSource::Owned(bytes), self.max_depth)
    }
}

/// An open MaxMind DB database
#[derive(Debug)]
pub struct Reader {
    buffer: BufferSource,
    metadata: Metadata,
    layout: TreeLayout,
    /// Byte range of the data section within the buffer
    data_start: usize,
    data_end: usize,
    max_depth: usize,
}

impl Reader {
    /// Open a database file with default options (memory-mapped)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        ReaderOptions::default().open(path)
    }

    /// Options builder for [`Reader`]
    pub fn options() -> ReaderOptions {
        ReaderOptions::default()
    }

    /// Create a reader over an in-memory database image
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        ReaderOptions::default().from_bytes(bytes)
    }

    fn from_source(buffer: BufferSource, max_depth: usize) -> Result<Self> {
        let (metadata, marker_offset) = Metadata::from_buffer(buffer.as_slice())?;

        let tree_size = metadata.search_tree_size();
        let data_start = metadata.data_section_start();
        let data_end = marker_offset;
        let layout = TreeLayout::new(
            buffer.read(0, tree_size)?,
            metadata.node_count,
            metadata.record_size,
            metadata.ip_version,
            data_end - data_start,
        )?;

        debug!(
            database_type = %metadata.database_type,
            ip_version = metadata.ip_version.number(),
            node_count = metadata.node_count,
            record_size = metadata.record_size.bits(),
            build_epoch = metadata.build_epoch,
            "loaded database metadata"
        );

        Ok(Self {
            buffer,
            metadata,
            layout,
            data_start,
            data_end,
            max_depth,
        })
    }

    /// Database metadata, parsed at open time
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Search tree shape, including the IPv4 start node
    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    /// Raw bytes of the whole database
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Raw bytes of the search tree region
    pub fn tree_bytes(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.layout.tree_size()]
    }

    /// Raw bytes of the data section
    pub fn data_section(&self) -> &[u8] {
        &self.buffer.as_slice()[self.data_start..self.data_end]
    }

    /// Search tree view for traversal
    pub fn search_tree(&self) -> SearchTree<'_> {
        SearchTree::new(self.tree_bytes(), &self.layout)
    }

    fn decoder(&self) -> DataDecoder<'_> {
        DataDecoder::with_max_depth(self.data_section(), self.max_depth)
    }

    /// Resolve an address to its data offset without decoding
    ///
    /// `Ok(None)` means the tree holds no record for the address.
    pub fn resolve(&self, ip: IpAddr) -> Result<Option<TreeMatch>> {
        self.search_tree().lookup(ip)
    }

    /// Decode the value at a data section offset
    pub fn decode(&self, offset: usize) -> Result<DataValue> {
        self.decoder().decode(offset)
    }

    /// Look up an address and decode its record
    ///
    /// Fails with [`GeoIpError::AddressNotFound`] if the database has no
    /// record for the address.
    pub fn lookup(&self, ip: IpAddr) -> Result<DataValue> {
        self.lookup_with_prefix(ip).map(|(value, _)| value)
    }

    /// Like [`Reader::lookup`], also returning the network prefix length
    pub fn lookup_with_prefix(&self, ip: IpAddr) -> Result<(DataValue, u8)> {
        let found = self.resolve(ip)?.ok_or(GeoIpError::AddressNotFound(ip))?;
        let value = self.decode(found.data_offset)?;
        Ok((value, found.prefix_len))
    }

    /// Parse `query` as an IP address and look it up
    pub fn lookup_str(&self, query: &str) -> Result<DataValue> {
        let ip = query
            .trim()
            .parse::<IpAddr>()
            .map_err(|e| GeoIpError::InvalidInput(format!("'{}' is not an IP address: {}", query, e)))?;
        self.lookup(ip)
    }

    /// Look up an address and project the record onto `T`
    pub fn lookup_as<T: FromValue>(&self, ip: IpAddr) -> Result<T> {
        T::from_value(&self.lookup(ip)?)
    }

    /// City-level record (GeoIP2-City / GeoLite2-City)
    pub fn city(&self, ip: IpAddr) -> Result<City> {
        self.lookup_as(ip)
    }

    /// Country-level record (GeoIP2-Country / GeoLite2-Country)
    pub fn country(&self, ip: IpAddr) -> Result<Country> {
        self.lookup_as(ip)
    }

    /// Anonymous IP flags (GeoIP2-Anonymous-IP)
    pub fn anonymous_ip(&self, ip: IpAddr) -> Result<AnonymousIp> {
        self.lookup_as(ip)
    }

    /// Connection type (GeoIP2-Connection-Type)
    pub fn connection_type(&self, ip: IpAddr) -> Result<ConnectionType> {
        self.lookup_as(ip)
    }

    /// Second-level domain (GeoIP2-Domain)
    pub fn domain(&self, ip: IpAddr) -> Result<Domain> {
        self.lookup_as(ip)
    }

    /// ISP and autonomous system data (GeoIP2-ISP)
    pub fn isp(&self, ip: IpAddr) -> Result<Isp> {
        self.lookup_as(ip)
    }

    /// Release the database. Equivalent to dropping the reader; the borrow
    /// checker guarantees no lookup is still using it.
    pub fn close(self) {
        debug!(database_type = %self.metadata.database_type, "closing database");
    }
}
