//! geoip2 - Reader for MaxMind DB (GeoIP2 / GeoLite2) databases
//!
//! Opens `.mmdb` files, resolves IPv4 and IPv6 addresses through the binary
//! search tree, and decodes the associated records either as a generic
//! [`DataValue`] tree or as typed shapes such as [`City`] and [`Country`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use geoip2::Reader;
//! use std::net::IpAddr;
//!
//! let reader = Reader::open("GeoIP2-City.mmdb")?;
//! let ip: IpAddr = "81.2.69.160".parse()?;
//!
//! // Typed record
//! let city = reader.city(ip)?;
//! println!("{:?} {:?}", city.country.iso_code, city.city.names.get("en"));
//!
//! // Generic record
//! let value = reader.lookup(ip)?;
//! if let Some(tz) = value.get_path(&["location", "time_zone"]) {
//!     println!("time zone: {:?}", tz.as_str());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  MMDB File                           │
//! ├──────────────────────────────────────┤
//! │  1. Search tree (binary trie)        │
//! │  2. 16-byte zero separator           │
//! │  3. Data section                     │
//! │  4. Metadata marker + metadata map   │
//! └──────────────────────────────────────┘
//!          ↓ mmap() or read into memory
//! ┌──────────────────────────────────────┐
//! │  Reader (immutable, Send + Sync)     │
//! │  resolve → decode → project          │
//! └──────────────────────────────────────┘
//! ```
//!
//! A lookup that finds nothing is reported as
//! [`GeoIpError::AddressNotFound`]; use [`Reader::resolve`] for an
//! `Option`-returning variant.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Backing storage for database bytes
pub mod buffer;
/// Data section decoding
pub mod data_section;
/// Error types
pub mod error;
/// MMDB format: metadata and search tree
pub mod mmdb;
/// Database reader
pub mod reader;
pub mod records;
pub mod verify;

pub use crate::buffer::OpenMode;
pub use crate::data_section::{DataDecoder, DataValue, DEFAULT_MAX_DEPTH};
pub use crate::error::{GeoIpError, Result};
pub use crate::mmdb::{IpVersion, Metadata, RecordSize, TreeMatch};
pub use crate::reader::{Reader, ReaderOptions};
pub use crate::records::{
    AnonymousIp, City, CityRecord, ConnectionType, ContinentRecord, Country, CountryRecord,
    Domain, FromValue, Isp, Location, Names, Postal, Record, RecordKind, RepresentedCountry,
    Subdivision, Traits,
};
pub use crate::verify::{VerifyReport, VerifyStats};

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
