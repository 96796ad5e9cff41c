//! Typed record shapes
//!
//! Each shape is filled from a decoded [`DataValue`] map by an explicit
//! [`FromValue`] impl. Fields missing from the map keep their default
//! (`None`, empty map, empty list); a field that is present with the wrong
//! type is an [`GeoIpError::InvalidDatabase`] naming the field.

// Field names mirror the keys in the database records.
#![allow(missing_docs)]

use crate::data_section::DataValue;
use crate::error::{GeoIpError, Result};
use crate::reader::Reader;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

/// Conversion from a decoded value into a typed shape
pub trait FromValue: Sized {
    /// Build `Self` from `value`
    fn from_value(value: &DataValue) -> Result<Self>;
}

fn type_mismatch(expected: &str, found: &DataValue) -> GeoIpError {
    GeoIpError::invalid(format!("expected {}, found {}", expected, found.kind()))
}

fn as_map<'a>(value: &'a DataValue, shape: &str) -> Result<&'a HashMap<String, DataValue>> {
    value
        .as_map()
        .ok_or_else(|| type_mismatch(&format!("map for {}", shape), value))
}

/// Field `key` of `map`, default if absent
fn field<T: FromValue + Default>(map: &HashMap<String, DataValue>, key: &str) -> Result<T> {
    match map.get(key) {
        None => Ok(T::default()),
        Some(value) => T::from_value(value).map_err(|e| match e {
            GeoIpError::InvalidDatabase(msg) => {
                GeoIpError::invalid(format!("field '{}': {}", key, msg))
            }
            other => other,
        }),
    }
}

impl FromValue for String {
    fn from_value(value: &DataValue) -> Result<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| type_mismatch("string", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &DataValue) -> Result<Self> {
        value.as_bool().ok_or_else(|| type_mismatch("boolean", value))
    }
}

impl FromValue for f64 {
    fn from_value(value: &DataValue) -> Result<Self> {
        value.as_f64().ok_or_else(|| type_mismatch("floating point number", value))
    }
}

macro_rules! unsigned_from_value {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &DataValue) -> Result<Self> {
                    value
                        .as_u64()
                        .and_then(|n| <$ty>::try_from(n).ok())
                        .ok_or_else(|| type_mismatch(stringify!($ty), value))
                }
            }
        )*
    };
}

unsigned_from_value!(u16, u32, u64);

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &DataValue) -> Result<Self> {
        T::from_value(value).map(Some)
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &DataValue) -> Result<Self> {
        value
            .as_array()
            .ok_or_else(|| type_mismatch("array", value))?
            .iter()
            .enumerate()
            .map(|(i, item)| {
                T::from_value(item).map_err(|e| match e {
                    GeoIpError::InvalidDatabase(msg) => {
                        GeoIpError::invalid(format!("element {}: {}", i, msg))
                    }
                    other => other,
                })
            })
            .collect()
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &DataValue) -> Result<Self> {
        value
            .as_map()
            .ok_or_else(|| type_mismatch("map", value))?
            .iter()
            .map(|(key, item)| {
                T::from_value(item)
                    .map(|v| (key.clone(), v))
                    .map_err(|e| match e {
                        GeoIpError::InvalidDatabase(msg) => {
                            GeoIpError::invalid(format!("key '{}': {}", key, msg))
                        }
                        other => other,
                    })
            })
            .collect()
    }
}

/// Localized names keyed by language code
pub type Names = BTreeMap<String, String>;

/// City of a location
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CityRecord {
    pub geoname_id: Option<u32>,
    pub names: Names,
}

/// Continent of a location
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContinentRecord {
    /// Two-letter continent code, e.g. "EU"
    pub code: Option<String>,
    pub geoname_id: Option<u32>,
    pub names: Names,
}

/// Country of a location, or the country an address is registered to
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CountryRecord {
    pub geoname_id: Option<u32>,
    /// ISO 3166-1 alpha-2 code
    pub iso_code: Option<String>,
    pub names: Names,
}

/// Country represented by users of an address (e.g. military bases)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepresentedCountry {
    pub geoname_id: Option<u32>,
    pub iso_code: Option<String>,
    pub names: Names,
    /// Kind of representation, e.g. "military"
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Coordinates and time zone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Location {
    /// Radius in kilometers around the coordinates
    pub accuracy_radius: Option<u16>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// US metro (DMA) code
    pub metro_code: Option<u16>,
    /// IANA time zone, e.g. "Europe/London"
    pub time_zone: Option<String>,
}

/// Postal code of a location
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Postal {
    pub code: Option<String>,
}

/// First-level (or deeper) subdivision of a country
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Subdivision {
    pub geoname_id: Option<u32>,
    pub iso_code: Option<String>,
    pub names: Names,
}

/// Network traits
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Traits {
    pub is_anonymous_proxy: Option<bool>,
    pub is_satellite_provider: Option<bool>,
}

/// GeoIP2/GeoLite2 City record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct City {
    pub city: CityRecord,
    pub continent: ContinentRecord,
    pub country: CountryRecord,
    pub location: Location,
    pub postal: Postal,
    pub registered_country: CountryRecord,
    pub represented_country: RepresentedCountry,
    /// Most general first
    pub subdivisions: Vec<Subdivision>,
    pub traits: Traits,
}

/// GeoIP2/GeoLite2 Country record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Country {
    pub continent: ContinentRecord,
    pub country: CountryRecord,
    pub registered_country: CountryRecord,
    pub represented_country: RepresentedCountry,
    pub traits: Traits,
}

/// GeoIP2 Anonymous IP record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnonymousIp {
    pub is_anonymous: Option<bool>,
    pub is_anonymous_vpn: Option<bool>,
    pub is_hosting_provider: Option<bool>,
    pub is_public_proxy: Option<bool>,
    pub is_tor_exit_node: Option<bool>,
}

/// GeoIP2 Connection-Type record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionType {
    /// e.g. "Cable/DSL", "Cellular"
    pub connection_type: Option<String>,
}

/// GeoIP2 Domain record
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Domain {
    pub domain: Option<String>,
}

/// GeoIP2 ISP record (also fits GeoLite2-ASN)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Isp {
    pub autonomous_system_number: Option<u32>,
    pub autonomous_system_organization: Option<String>,
    pub isp: Option<String>,
    pub organization: Option<String>,
}

impl FromValue for CityRecord {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "city")?;
        Ok(Self {
            geoname_id: field(map, "geoname_id")?,
            names: field(map, "names")?,
        })
    }
}

impl FromValue for ContinentRecord {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "continent")?;
        Ok(Self {
            code: field(map, "code")?,
            geoname_id: field(map, "geoname_id")?,
            names: field(map, "names")?,
        })
    }
}

impl FromValue for CountryRecord {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "country")?;
        Ok(Self {
            geoname_id: field(map, "geoname_id")?,
            iso_code: field(map, "iso_code")?,
            names: field(map, "names")?,
        })
    }
}

impl FromValue for RepresentedCountry {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "represented country")?;
        Ok(Self {
            geoname_id: field(map, "geoname_id")?,
            iso_code: field(map, "iso_code")?,
            names: field(map, "names")?,
            kind: field(map, "type")?,
        })
    }
}

impl FromValue for Location {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "location")?;
        Ok(Self {
            accuracy_radius: field(map, "accuracy_radius")?,
            latitude: field(map, "latitude")?,
            longitude: field(map, "longitude")?,
            metro_code: field(map, "metro_code")?,
            time_zone: field(map, "time_zone")?,
        })
    }
}

impl FromValue for Postal {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "postal")?;
        Ok(Self {
            code: field(map, "code")?,
        })
    }
}

impl FromValue for Subdivision {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "subdivision")?;
        Ok(Self {
            geoname_id: field(map, "geoname_id")?,
            iso_code: field(map, "iso_code")?,
            names: field(map, "names")?,
        })
    }
}

impl FromValue for Traits {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "traits")?;
        Ok(Self {
            is_anonymous_proxy: field(map, "is_anonymous_proxy")?,
            is_satellite_provider: field(map, "is_satellite_provider")?,
        })
    }
}

impl FromValue for City {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "City")?;
        Ok(Self {
            city: field(map, "city")?,
            continent: field(map, "continent")?,
            country: field(map, "country")?,
            location: field(map, "location")?,
            postal: field(map, "postal")?,
            registered_country: field(map, "registered_country")?,
            represented_country: field(map, "represented_country")?,
            subdivisions: field(map, "subdivisions")?,
            traits: field(map, "traits")?,
        })
    }
}

impl FromValue for Country {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "Country")?;
        Ok(Self {
            continent: field(map, "continent")?,
            country: field(map, "country")?,
            registered_country: field(map, "registered_country")?,
            represented_country: field(map, "represented_country")?,
            traits: field(map, "traits")?,
        })
    }
}

impl FromValue for AnonymousIp {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "AnonymousIp")?;
        Ok(Self {
            is_anonymous: field(map, "is_anonymous")?,
            is_anonymous_vpn: field(map, "is_anonymous_vpn")?,
            is_hosting_provider: field(map, "is_hosting_provider")?,
            is_public_proxy: field(map, "is_public_proxy")?,
            is_tor_exit_node: field(map, "is_tor_exit_node")?,
        })
    }
}

impl FromValue for ConnectionType {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "ConnectionType")?;
        Ok(Self {
            connection_type: field(map, "connection_type")?,
        })
    }
}

impl FromValue for Domain {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "Domain")?;
        Ok(Self {
            domain: field(map, "domain")?,
        })
    }
}

impl FromValue for Isp {
    fn from_value(value: &DataValue) -> Result<Self> {
        let map = as_map(value, "Isp")?;
        Ok(Self {
            autonomous_system_number: field(map, "autonomous_system_number")?,
            autonomous_system_organization: field(map, "autonomous_system_organization")?,
            isp: field(map, "isp")?,
            organization: field(map, "organization")?,
        })
    }
}

/// Record shape implied by a database type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    City,
    Country,
    AnonymousIp,
    ConnectionType,
    Domain,
    Isp,
    /// Unknown database type, records are returned undecoded
    Generic,
}

impl RecordKind {
    /// Pick the shape for a metadata `database_type`
    ///
    /// ```
    /// use geoip2::RecordKind;
    ///
    /// assert_eq!(RecordKind::for_database_type("GeoLite2-City"), RecordKind::City);
    /// assert_eq!(RecordKind::for_database_type("GeoLite2-ASN"), RecordKind::Isp);
    /// assert_eq!(RecordKind::for_database_type("Custom-Threats"), RecordKind::Generic);
    /// ```
    pub fn for_database_type(database_type: &str) -> Self {
        if database_type.contains("Anonymous-IP") {
            RecordKind::AnonymousIp
        } else if database_type.contains("Connection-Type") {
            RecordKind::ConnectionType
        } else if database_type.contains("Domain") {
            RecordKind::Domain
        } else if database_type.contains("ISP") || database_type.contains("ASN") {
            RecordKind::Isp
        } else if database_type.contains("City") || database_type.contains("Enterprise") {
            RecordKind::City
        } else if database_type.contains("Country") {
            RecordKind::Country
        } else {
            RecordKind::Generic
        }
    }
}

/// A record projected according to the database type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Record {
    City(City),
    Country(Country),
    AnonymousIp(AnonymousIp),
    ConnectionType(ConnectionType),
    Domain(Domain),
    Isp(Isp),
    Generic(DataValue),
}

impl Record {
    /// Project `value` onto the shape selected by `kind`
    pub fn from_value(kind: RecordKind, value: DataValue) -> Result<Self> {
        Ok(match kind {
            RecordKind::City => Record::City(City::from_value(&value)?),
            RecordKind::Country => Record::Country(Country::from_value(&value)?),
            RecordKind::AnonymousIp => Record::AnonymousIp(AnonymousIp::from_value(&value)?),
            RecordKind::ConnectionType => {
                Record::ConnectionType(ConnectionType::from_value(&value)?)
            }
            RecordKind::Domain => Record::Domain(Domain::from_value(&value)?),
            RecordKind::Isp => Record::Isp(Isp::from_value(&value)?),
            RecordKind::Generic => Record::Generic(value),
        })
    }
}

impl Reader {
    /// Shape of this database's records
    pub fn record_kind(&self) -> RecordKind {
        RecordKind::for_database_type(&self.metadata().database_type)
    }

    /// Look up an address and project it onto the shape implied by the
    /// database type
    pub fn record(&self, ip: IpAddr) -> Result<Record> {
        Record::from_value(self.record_kind(), self.lookup(ip)?)
    }
}
