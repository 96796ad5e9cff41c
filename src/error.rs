/// Error types for the geoip2 library
use std::fmt;
use std::io;
use std::net::IpAddr;

/// Result type alias for reader operations
pub type Result<T> = std::result::Result<T, GeoIpError>;

/// Main error type for reader operations
#[derive(Debug)]
pub enum GeoIpError {
    /// The database file could not be opened or mapped
    Io(io::Error),

    /// Structural corruption: bad marker, malformed metadata, out-of-range
    /// node index, end marker as a value, oversized numeric payload, ...
    InvalidDatabase(String),

    /// A read would run past the end of the buffer
    TruncatedData {
        /// Requested start offset
        offset: usize,
        /// Requested length
        len: usize,
        /// Size of the buffer the read was made against
        size: usize,
    },

    /// The caller supplied an address the database cannot answer for
    InvalidInput(String),

    /// The tree holds no record for this address
    AddressNotFound(IpAddr),
}

impl GeoIpError {
    /// True for the normal "no record" outcome of a lookup
    pub fn is_not_found(&self) -> bool {
        matches!(self, GeoIpError::AddressNotFound(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        GeoIpError::InvalidDatabase(msg.into())
    }
}

impl fmt::Display for GeoIpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeoIpError::Io(err) => write!(f, "I/O error: {}", err),
            GeoIpError::InvalidDatabase(msg) => write!(f, "Invalid database: {}", msg),
            GeoIpError::TruncatedData { offset, len, size } => write!(
                f,
                "Truncated data: read of {} bytes at offset {} exceeds buffer size {}",
                len, offset, size
            ),
            GeoIpError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            GeoIpError::AddressNotFound(addr) => {
                write!(f, "The address {} is not in the database", addr)
            }
        }
    }
}

impl std::error::Error for GeoIpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GeoIpError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for GeoIpError {
    fn from(err: io::Error) -> Self {
        GeoIpError::Io(err)
    }
}
