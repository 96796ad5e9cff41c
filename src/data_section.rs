//! Data section decoding
//!
//! Implements the MaxMind DB data type specification. Every value starts
//! with a control byte: the top 3 bits select the type, the low 5 bits hold
//! the payload size. Type 0 means "extended": the real type is the next byte
//! plus 7.
//!
//! # Supported Types
//!
//! - **Pointer** (1): reference to another item in the data section
//! - **String** (2): UTF-8 text data
//! - **Double** (3): 64-bit floating point (IEEE 754)
//! - **Bytes** (4): raw byte arrays
//! - **Uint16** (5) / **Uint32** (6) / **Uint64** (9) / **Uint128** (10)
//! - **Map** (7): key-value pairs (string keys)
//! - **Int32** (8): signed 32-bit integers
//! - **Array** (11): ordered lists of values
//! - **Data cache container** (12): wrapper around a shared value
//! - **End marker** (13): structural only
//! - **Bool** (14): value stored in the size field
//! - **Float** (15): 32-bit floating point (IEEE 754)
//!
//! Pointers, containers and end markers never appear in a decoded
//! [`DataValue`]; pointers are followed and replaced by their target.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::buffer::read_at;
use crate::error::{GeoIpError, Result};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::HashMap;

/// Default bound on pointer and container nesting during a decode
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Work budget per data section byte, see [`DataDecoder::work_budget`]
const DECODE_BUDGET_FACTOR: usize = 4;

/// Smallest work budget, so tiny sections still decode shared records
const MIN_DECODE_BUDGET: usize = 1 << 16;

/// Decoded data section value
///
/// Each decode produces a fresh tree owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only)
    Map(HashMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Short name of the value's type, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::Double(_) => "double",
            DataValue::Bytes(_) => "bytes",
            DataValue::Uint16(_) => "uint16",
            DataValue::Uint32(_) => "uint32",
            DataValue::Map(_) => "map",
            DataValue::Int32(_) => "int32",
            DataValue::Uint64(_) => "uint64",
            DataValue::Uint128(_) => "uint128",
            DataValue::Array(_) => "array",
            DataValue::Bool(_) => "boolean",
            DataValue::Float(_) => "float",
        }
    }

    /// Map entry by key, `None` for missing keys and non-map values
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Follow a path of map keys and array indices
    ///
    /// ```
    /// use geoip2::DataValue;
    /// use std::collections::HashMap;
    ///
    /// let names = HashMap::from([("en".to_string(), DataValue::String("London".into()))]);
    /// let city = HashMap::from([("names".to_string(), DataValue::Map(names))]);
    /// let record = DataValue::Map(HashMap::from([("city".to_string(), DataValue::Map(city))]));
    ///
    /// let name = record.get_path(&["city", "names", "en"]).and_then(|v| v.as_str());
    /// assert_eq!(name, Some("London"));
    /// ```
    pub fn get_path(&self, path: &[&str]) -> Option<&DataValue> {
        path.iter().try_fold(self, |value, segment| match value {
            DataValue::Map(map) => map.get(*segment),
            DataValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned (or non-negative signed) integer that fits in a u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            DataValue::Uint128(n) => u64::try_from(*n).ok(),
            DataValue::Int32(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Double or float as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Double(d) => Some(*d),
            DataValue::Float(f) => Some(*f as f64),
            _ => None,
        }
    }

    /// Boolean contents, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Map contents, if this is a map
    pub fn as_map(&self) -> Option<&HashMap<String, DataValue>> {
        match self {
            DataValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Array contents, if this is an array
    pub fn as_array(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// JSON-friendly serialization. uint128 is written as a decimal string
/// since most JSON consumers cannot hold it as a number.
impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DataValue::String(s) => serializer.serialize_str(s),
            DataValue::Double(d) => serializer.serialize_f64(*d),
            DataValue::Bytes(b) => {
                let mut seq = serializer.serialize_seq(Some(b.len()))?;
                for byte in b {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            DataValue::Uint16(n) => serializer.serialize_u16(*n),
            DataValue::Uint32(n) => serializer.serialize_u32(*n),
            DataValue::Map(entries) => {
                // Sorted for stable output
                let mut keys: Vec<_> = entries.keys().collect();
                keys.sort();
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for key in keys {
                    map.serialize_entry(key, &entries[key])?;
                }
                map.end()
            }
            DataValue::Int32(n) => serializer.serialize_i32(*n),
            DataValue::Uint64(n) => serializer.serialize_u64(*n),
            DataValue::Uint128(n) => serializer.serialize_str(&n.to_string()),
            DataValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            DataValue::Bool(b) => serializer.serialize_bool(*b),
            DataValue::Float(f) => serializer.serialize_f32(*f),
        }
    }
}

/// Wire type of a data section item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataType {
    Pointer,
    String,
    Double,
    Bytes,
    Uint16,
    Uint32,
    Map,
    Int32,
    Uint64,
    Uint128,
    Array,
    Container,
    EndMarker,
    Bool,
    Float,
}

impl DataType {
    fn from_id(id: u16) -> Result<Self> {
        Ok(match id {
            1 => DataType::Pointer,
            2 => DataType::String,
            3 => DataType::Double,
            4 => DataType::Bytes,
            5 => DataType::Uint16,
            6 => DataType::Uint32,
            7 => DataType::Map,
            8 => DataType::Int32,
            9 => DataType::Uint64,
            10 => DataType::Uint128,
            11 => DataType::Array,
            12 => DataType::Container,
            13 => DataType::EndMarker,
            14 => DataType::Bool,
            15 => DataType::Float,
            _ => {
                return Err(GeoIpError::invalid(format!(
                    "unknown data type {}",
                    id
                )))
            }
        })
    }
}

/// Work waiting on the value currently being decoded
enum Frame {
    /// Continue after a pointer once its target is decoded
    Return { resume: usize, at: usize },
    /// Data cache container around the next value
    Container,
    Map {
        map: HashMap<String, DataValue>,
        remaining: usize,
        /// Key read, value pending
        key: Option<String>,
        at: usize,
    },
    Array {
        items: Vec<DataValue>,
        remaining: usize,
        at: usize,
    },
}

/// Data section decoder
///
/// Decodes values from a data section buffer. Offsets (including pointer
/// targets) are relative to the start of `buffer`. The decoder only borrows
/// the buffer, so any number of decoders may run concurrently over the same
/// bytes.
#[derive(Debug, Clone, Copy)]
pub struct DataDecoder<'a> {
    buffer: &'a [u8],
    max_depth: usize,
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder for a data section
    pub fn new(buffer: &'a [u8]) -> Self {
        Self::with_max_depth(buffer, DEFAULT_MAX_DEPTH)
    }

    /// Create a decoder with a custom pointer/container nesting bound
    pub fn with_max_depth(buffer: &'a [u8], max_depth: usize) -> Self {
        Self { buffer, max_depth }
    }

    /// Size of the underlying data section
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True if the data section is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Decode the value at `offset`
    ///
    /// Nested maps, arrays and pointers are tracked on an explicit stack,
    /// so stack usage does not grow with nesting depth. A decode also stops
    /// with [`GeoIpError::InvalidDatabase`] once it has produced more items
    /// and payload bytes than [`DataDecoder::work_budget`] allows.
    pub fn decode(&self, offset: usize) -> Result<DataValue> {
        let mut cursor = offset;
        let mut stack: Vec<Frame> = Vec::new();
        let mut budget = self.work_budget();

        loop {
            let item_offset = cursor;
            let Some(mut value) = self.decode_item(&mut cursor, &mut stack, &mut budget)? else {
                continue;
            };
            let mut value_offset = item_offset;

            // Hand the finished value to the frames waiting on it
            loop {
                match stack.pop() {
                    None => return Ok(value),
                    Some(Frame::Return { resume, at }) => {
                        cursor = resume;
                        value_offset = at;
                    }
                    Some(Frame::Container) => {}
                    Some(Frame::Array {
                        mut items,
                        remaining,
                        at,
                    }) => {
                        items.push(value);
                        if remaining > 1 {
                            stack.push(Frame::Array {
                                items,
                                remaining: remaining - 1,
                                at,
                            });
                            break;
                        }
                        value = DataValue::Array(items);
                        value_offset = at;
                    }
                    Some(Frame::Map {
                        map,
                        remaining,
                        key: None,
                        at,
                    }) => {
                        let key = match value {
                            DataValue::String(s) => s,
                            other => {
                                return Err(GeoIpError::invalid(format!(
                                    "map key at offset {} is a {}, not a string",
                                    value_offset,
                                    other.kind()
                                )))
                            }
                        };
                        stack.push(Frame::Map {
                            map,
                            remaining,
                            key: Some(key),
                            at,
                        });
                        break;
                    }
                    Some(Frame::Map {
                        mut map,
                        remaining,
                        key: Some(key),
                        at,
                    }) => {
                        map.insert(key, value);
                        if remaining > 1 {
                            stack.push(Frame::Map {
                                map,
                                remaining: remaining - 1,
                                key: None,
                                at,
                            });
                            break;
                        }
                        value = DataValue::Map(map);
                        value_offset = at;
                    }
                }
            }
        }
    }

    /// Items plus string and byte payload a single decode may produce
    ///
    /// Proportional to the data section size, with a floor for small
    /// sections. Pointers let a few bytes expand into many values, so
    /// without this a crafted section could demand unbounded memory.
    pub fn work_budget(&self) -> usize {
        self.buffer
            .len()
            .saturating_mul(DECODE_BUDGET_FACTOR)
            .max(MIN_DECODE_BUDGET)
    }

    fn charge(&self, budget: &mut usize, cost: usize, offset: usize) -> Result<()> {
        *budget = budget.checked_sub(cost).ok_or_else(|| {
            GeoIpError::invalid(format!(
                "decoding at offset {} exceeds the work budget of {} (pointer fan-out?)",
                offset,
                self.work_budget()
            ))
        })?;
        Ok(())
    }

    /// Read the item at `cursor`
    ///
    /// Scalars and empty containers come back as values. Pointers and
    /// non-empty containers push a frame and return `None`; the caller
    /// keeps reading items until the frame completes.
    fn decode_item(
        &self,
        cursor: &mut usize,
        stack: &mut Vec<Frame>,
        budget: &mut usize,
    ) -> Result<Option<DataValue>> {
        let at = *cursor;
        if stack.len() > self.max_depth {
            return Err(GeoIpError::invalid(format!(
                "data nesting exceeds {} levels at offset {} (pointer cycle?)",
                self.max_depth, at
            )));
        }
        self.charge(budget, 1, at)?;

        let ctrl = self.byte(cursor)?;
        let data_type = match ctrl >> 5 {
            0 => {
                let ext = self.byte(cursor)?;
                let id = ext as u16 + 7;
                if id < 8 {
                    return Err(GeoIpError::invalid(format!(
                        "extended type byte {} at offset {} does not name an extended type",
                        ext,
                        *cursor - 1
                    )));
                }
                DataType::from_id(id)?
            }
            id => DataType::from_id(id as u16)?,
        };

        if data_type == DataType::Pointer {
            let target = self.decode_pointer(cursor, ctrl)?;
            stack.push(Frame::Return {
                resume: *cursor,
                at,
            });
            *cursor = target;
            return Ok(None);
        }

        let size = self.decode_size(cursor, ctrl & 0x1F)?;

        let value = match data_type {
            DataType::String => {
                self.charge(budget, size, at)?;
                self.decode_string(cursor, size)?
            }
            DataType::Double => self.decode_double(cursor, size)?,
            DataType::Bytes => {
                self.charge(budget, size, at)?;
                DataValue::Bytes(self.take(cursor, size)?.to_vec())
            }
            DataType::Uint16 => DataValue::Uint16(self.decode_uint(cursor, size, 2)? as u16),
            DataType::Uint32 => DataValue::Uint32(self.decode_uint(cursor, size, 4)? as u32),
            DataType::Map => {
                self.check_count(*cursor, size)?;
                if size == 0 {
                    DataValue::Map(HashMap::new())
                } else {
                    self.charge(budget, size, at)?;
                    stack.push(Frame::Map {
                        map: HashMap::with_capacity(size),
                        remaining: size,
                        key: None,
                        at,
                    });
                    return Ok(None);
                }
            }
            DataType::Int32 => DataValue::Int32(self.decode_uint(cursor, size, 4)? as u32 as i32),
            DataType::Uint64 => DataValue::Uint64(self.decode_uint(cursor, size, 8)? as u64),
            DataType::Uint128 => DataValue::Uint128(self.decode_uint(cursor, size, 16)?),
            DataType::Array => {
                self.check_count(*cursor, size)?;
                if size == 0 {
                    DataValue::Array(Vec::new())
                } else {
                    self.charge(budget, size, at)?;
                    stack.push(Frame::Array {
                        items: Vec::with_capacity(size),
                        remaining: size,
                        at,
                    });
                    return Ok(None);
                }
            }
            DataType::Container => {
                stack.push(Frame::Container);
                return Ok(None);
            }
            DataType::EndMarker => {
                return Err(GeoIpError::invalid(format!(
                    "unexpected end marker at offset {}",
                    at
                )))
            }
            DataType::Bool => match size {
                0 => DataValue::Bool(false),
                1 => DataValue::Bool(true),
                _ => {
                    return Err(GeoIpError::invalid(format!(
                        "boolean with size {} (must be 0 or 1)",
                        size
                    )))
                }
            },
            DataType::Float => self.decode_float(cursor, size)?,
            DataType::Pointer => unreachable!("pointers are resolved above"),
        };
        Ok(Some(value))
    }

    fn byte(&self, cursor: &mut usize) -> Result<u8> {
        Ok(self.take(cursor, 1)?[0])
    }

    fn take(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
        let bytes = read_at(self.buffer, *cursor, len)?;
        *cursor += len;
        Ok(bytes)
    }

    /// Pointer target relative to the data section start
    fn decode_pointer(&self, cursor: &mut usize, ctrl: u8) -> Result<usize> {
        let size_class = (ctrl >> 3) & 0x3;
        let high = (ctrl & 0x7) as usize;
        let bytes = self.take(cursor, size_class as usize + 1)?;
        let packed = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);

        Ok(match size_class {
            0 => (high << 8) | packed,
            1 => ((high << 16) | packed) + 2048,
            2 => ((high << 24) | packed) + 526_336,
            // 32-bit pointer: the three value bits are ignored
            _ => packed,
        })
    }

    fn decode_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize> {
        match size_bits {
            0..=28 => Ok(size_bits as usize),
            29 => Ok(29 + self.byte(cursor)? as usize),
            30 => {
                let bytes = self.take(cursor, 2)?;
                Ok(285 + u16::from_be_bytes([bytes[0], bytes[1]]) as usize)
            }
            _ => {
                let bytes = self.take(cursor, 3)?;
                let extra = ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | bytes[2] as usize;
                Ok(65_821 + extra)
            }
        }
    }

    /// Big-endian unsigned integer of `size` bytes, at most `max` bytes wide
    fn decode_uint(&self, cursor: &mut usize, size: usize, max: usize) -> Result<u128> {
        if size > max {
            return Err(GeoIpError::invalid(format!(
                "integer payload of {} bytes exceeds type width of {} bytes",
                size, max
            )));
        }
        let bytes = self.take(cursor, size)?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn decode_string(&self, cursor: &mut usize, size: usize) -> Result<DataValue> {
        let start = *cursor;
        let bytes = self.take(cursor, size)?;
        let s = std::str::from_utf8(bytes).map_err(|e| {
            GeoIpError::invalid(format!("invalid UTF-8 in string at offset {}: {}", start, e))
        })?;
        Ok(DataValue::String(s.to_string()))
    }

    fn decode_double(&self, cursor: &mut usize, size: usize) -> Result<DataValue> {
        if size != 8 {
            return Err(GeoIpError::invalid(format!(
                "double with size {} (must be 8)",
                size
            )));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(cursor, 8)?);
        Ok(DataValue::Double(f64::from_be_bytes(bytes)))
    }

    fn decode_float(&self, cursor: &mut usize, size: usize) -> Result<DataValue> {
        if size != 4 {
            return Err(GeoIpError::invalid(format!(
                "float with size {} (must be 4)",
                size
            )));
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(cursor, 4)?);
        Ok(DataValue::Float(f32::from_be_bytes(bytes)))
    }

    /// Every entry needs at least one byte, so a count larger than what is
    /// left cannot be satisfied. Checked before allocating.
    fn check_count(&self, cursor: usize, count: usize) -> Result<()> {
        let remaining = self.buffer.len().saturating_sub(cursor);
        if count > remaining {
            return Err(GeoIpError::TruncatedData {
                offset: cursor,
                len: count,
                size: self.buffer.len(),
            });
        }
        Ok(())
    }
}
