//! Test-only MMDB writer and fixture databases
//!
//! The library only reads databases, so integration tests and benches build
//! their fixtures here: a data section encoder (map keys are deduplicated
//! through pointers, as real databases do), an arena-allocated search tree
//! builder and the metadata trailer.

#![allow(dead_code)]

use geoip2::mmdb::METADATA_MARKER;
use geoip2::{DataValue, IpVersion, RecordSize};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Control byte(s) for `type_id` with payload size `size`
pub fn write_ctrl(out: &mut Vec<u8>, type_id: u8, size: usize) {
    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 285 {
        (29, vec![(size - 29) as u8])
    } else if size < 65_821 {
        let v = size - 285;
        (30, vec![(v >> 8) as u8, v as u8])
    } else {
        let v = size - 65_821;
        (31, vec![(v >> 16) as u8, (v >> 8) as u8, v as u8])
    };

    if type_id <= 7 {
        out.push((type_id << 5) | size_bits);
    } else {
        out.push(size_bits);
        out.push(type_id - 7);
    }
    out.extend_from_slice(&extra);
}

/// Pointer to a data section offset, using the smallest size class
pub fn write_pointer(out: &mut Vec<u8>, target: u32) {
    let ctrl = TYPE_POINTER << 5;
    if target < 2048 {
        out.push(ctrl | (target >> 8) as u8);
        out.push(target as u8);
    } else if target < 526_336 {
        let v = target - 2048;
        out.push(ctrl | 0x08 | (v >> 16) as u8);
        out.extend_from_slice(&[(v >> 8) as u8, v as u8]);
    } else if target < 134_744_064 {
        let v = target - 526_336;
        out.push(ctrl | 0x10 | (v >> 24) as u8);
        out.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
    } else {
        out.push(ctrl | 0x18);
        out.extend_from_slice(&target.to_be_bytes());
    }
}

fn write_uint(out: &mut Vec<u8>, type_id: u8, value: u128) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    write_ctrl(out, type_id, bytes.len() - skip);
    out.extend_from_slice(&bytes[skip..]);
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_ctrl(out, TYPE_STRING, s.len());
    out.extend_from_slice(s.as_bytes());
}

/// Encode a single value with no pointers
pub fn encode(value: &DataValue) -> Vec<u8> {
    let mut writer = DataWriter::without_key_dedup();
    writer.add(value);
    writer.into_bytes()
}

/// Data section under construction
pub struct DataWriter {
    buf: Vec<u8>,
    key_offsets: HashMap<String, u32>,
    dedup_keys: bool,
}

impl Default for DataWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DataWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            key_offsets: HashMap::new(),
            dedup_keys: true,
        }
    }

    pub fn without_key_dedup() -> Self {
        Self {
            dedup_keys: false,
            ..Self::new()
        }
    }

    pub fn offset(&self) -> u32 {
        self.buf.len() as u32
    }

    /// Append a value, returning its offset
    pub fn add(&mut self, value: &DataValue) -> u32 {
        let offset = self.offset();
        self.write(value);
        offset
    }

    /// Append a pointer to `target`, returning the pointer's own offset
    pub fn add_pointer(&mut self, target: u32) -> u32 {
        let offset = self.offset();
        write_pointer(&mut self.buf, target);
        offset
    }

    /// Append raw bytes, returning their offset
    pub fn add_raw(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.offset();
        self.buf.extend_from_slice(bytes);
        offset
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn write(&mut self, value: &DataValue) {
        match value {
            DataValue::String(s) => write_string(&mut self.buf, s),
            DataValue::Double(d) => {
                write_ctrl(&mut self.buf, TYPE_DOUBLE, 8);
                self.buf.extend_from_slice(&d.to_be_bytes());
            }
            DataValue::Float(f) => {
                write_ctrl(&mut self.buf, TYPE_FLOAT, 4);
                self.buf.extend_from_slice(&f.to_be_bytes());
            }
            DataValue::Bytes(b) => {
                write_ctrl(&mut self.buf, TYPE_BYTES, b.len());
                self.buf.extend_from_slice(b);
            }
            DataValue::Uint16(n) => write_uint(&mut self.buf, TYPE_UINT16, *n as u128),
            DataValue::Uint32(n) => write_uint(&mut self.buf, TYPE_UINT32, *n as u128),
            DataValue::Uint64(n) => write_uint(&mut self.buf, TYPE_UINT64, *n as u128),
            DataValue::Uint128(n) => write_uint(&mut self.buf, TYPE_UINT128, *n),
            DataValue::Int32(n) => write_uint(&mut self.buf, TYPE_INT32, *n as u32 as u128),
            DataValue::Bool(b) => write_ctrl(&mut self.buf, TYPE_BOOL, *b as usize),
            DataValue::Map(map) => {
                write_ctrl(&mut self.buf, TYPE_MAP, map.len());
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                for key in keys {
                    self.write_key(key);
                    self.write(&map[key]);
                }
            }
            DataValue::Array(items) => {
                write_ctrl(&mut self.buf, TYPE_ARRAY, items.len());
                for item in items {
                    self.write(item);
                }
            }
        }
    }

    fn write_key(&mut self, key: &str) {
        if self.dedup_keys {
            if let Some(&offset) = self.key_offsets.get(key) {
                write_pointer(&mut self.buf, offset);
                return;
            }
            self.key_offsets.insert(key.to_string(), self.offset());
        }
        write_string(&mut self.buf, key);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Empty,
    Node(u32),
    /// Data offset and the prefix length that produced it, so a less
    /// specific network never overwrites a more specific one
    Data(u32, u8),
}

/// Search tree under construction (arena of nodes, root at 0)
pub struct TreeBuilder {
    nodes: Vec<[Edge; 2]>,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            nodes: vec![[Edge::Empty; 2]],
        }
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    fn alloc(&mut self, edges: [Edge; 2]) -> u32 {
        self.nodes.push(edges);
        (self.nodes.len() - 1) as u32
    }

    /// Insert a network given as left-aligned 128-bit `bits`
    pub fn insert(&mut self, bits: u128, prefix_len: u8, offset: u32) {
        assert!(prefix_len > 0 && prefix_len <= 128, "bad prefix {}", prefix_len);
        let node = self.descend(bits, prefix_len - 1);
        let side = bit_at(bits, prefix_len - 1);
        match self.nodes[node as usize][side] {
            Edge::Node(child) => self.backfill(child, offset, prefix_len),
            Edge::Data(_, existing) if existing > prefix_len => {}
            _ => self.nodes[node as usize][side] = Edge::Data(offset, prefix_len),
        }
    }

    /// Point the edge for `bits/prefix_len` at an existing node
    pub fn link(&mut self, bits: u128, prefix_len: u8, target: u32) {
        let node = self.descend(bits, prefix_len - 1);
        let side = bit_at(bits, prefix_len - 1);
        self.nodes[node as usize][side] = Edge::Node(target);
    }

    /// Node reached after following `depth` bits of `bits`, if it exists
    pub fn find_node(&self, bits: u128, depth: u8) -> Option<u32> {
        let mut node = 0u32;
        for d in 0..depth {
            match self.nodes[node as usize][bit_at(bits, d)] {
                Edge::Node(child) => node = child,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Walk (creating nodes) down to depth `depth`, returning that node
    fn descend(&mut self, bits: u128, depth: u8) -> u32 {
        let mut node = 0u32;
        for d in 0..depth {
            let side = bit_at(bits, d);
            node = match self.nodes[node as usize][side] {
                Edge::Node(child) => child,
                Edge::Empty => {
                    let child = self.alloc([Edge::Empty; 2]);
                    self.nodes[node as usize][side] = Edge::Node(child);
                    child
                }
                data @ Edge::Data(..) => {
                    // Split: both halves keep the less specific record
                    let child = self.alloc([data, data]);
                    self.nodes[node as usize][side] = Edge::Node(child);
                    child
                }
            };
        }
        node
    }

    fn backfill(&mut self, node: u32, offset: u32, prefix_len: u8) {
        for side in 0..2 {
            match self.nodes[node as usize][side] {
                Edge::Empty => self.nodes[node as usize][side] = Edge::Data(offset, prefix_len),
                Edge::Data(_, existing) if prefix_len > existing => {
                    self.nodes[node as usize][side] = Edge::Data(offset, prefix_len)
                }
                Edge::Data(..) => {}
                Edge::Node(child) => self.backfill(child, offset, prefix_len),
            }
        }
    }

    pub fn to_bytes(&self, record_size: RecordSize) -> Vec<u8> {
        let node_count = self.node_count();
        let limit = 1u64 << record_size.bits();
        let value = |edge: Edge| -> u32 {
            let v = match edge {
                Edge::Empty => node_count,
                Edge::Node(id) => id,
                Edge::Data(offset, _) => node_count + 16 + offset,
            };
            assert!((v as u64) < limit, "record {} does not fit {} bits", v, record_size.bits());
            v
        };

        let mut out = Vec::with_capacity(self.nodes.len() * record_size.node_bytes());
        for &[left, right] in &self.nodes {
            let (l, r) = (value(left), value(right));
            match record_size {
                RecordSize::Bits24 => {
                    out.extend_from_slice(&l.to_be_bytes()[1..]);
                    out.extend_from_slice(&r.to_be_bytes()[1..]);
                }
                RecordSize::Bits28 => {
                    out.extend_from_slice(&l.to_be_bytes()[1..]);
                    out.push(((((l >> 24) & 0x0F) as u8) << 4) | ((r >> 24) & 0x0F) as u8);
                    out.extend_from_slice(&r.to_be_bytes()[1..]);
                }
                RecordSize::Bits32 => {
                    out.extend_from_slice(&l.to_be_bytes());
                    out.extend_from_slice(&r.to_be_bytes());
                }
            }
        }
        out
    }
}

fn bit_at(bits: u128, depth: u8) -> usize {
    ((bits >> (127 - depth as u32)) & 1) as usize
}

/// Parse "addr/len" (or a bare address) into left-aligned bits and a tree
/// prefix length for a tree of `ip_version`
pub fn network_bits(network: &str, ip_version: IpVersion) -> (u128, u8) {
    let (addr, len) = match network.split_once('/') {
        Some((addr, len)) => (addr, Some(len.parse::<u8>().expect("prefix length"))),
        None => (network, None),
    };
    let addr: IpAddr = addr.parse().expect("network address");
    match (addr, ip_version) {
        (IpAddr::V4(v4), IpVersion::V4) => ((u32::from(v4) as u128) << 96, len.unwrap_or(32)),
        // IPv4 networks live in the ::/96 subtree of IPv6 trees
        (IpAddr::V4(v4), IpVersion::V6) => (u32::from(v4) as u128, 96 + len.unwrap_or(32)),
        (IpAddr::V6(v6), IpVersion::V6) => (u128::from(v6), len.unwrap_or(128)),
        (IpAddr::V6(_), IpVersion::V4) => panic!("IPv6 network {} in IPv4 tree", network),
    }
}

/// Complete MMDB file under construction
pub struct MmdbWriter {
    ip_version: IpVersion,
    record_size: RecordSize,
    database_type: String,
    languages: Vec<String>,
    description: BTreeMap<String, String>,
    build_epoch: u64,
    metadata_overrides: BTreeMap<String, Option<DataValue>>,
    pub tree: TreeBuilder,
    pub data: DataWriter,
}

impl MmdbWriter {
    pub fn new(ip_version: IpVersion, record_size: RecordSize) -> Self {
        Self {
            ip_version,
            record_size,
            database_type: "Test".to_string(),
            languages: vec!["en".to_string()],
            description: BTreeMap::from([("en".to_string(), "Test database".to_string())]),
            build_epoch: 1_436_981_935,
            metadata_overrides: BTreeMap::new(),
            tree: TreeBuilder::new(),
            data: DataWriter::new(),
        }
    }

    pub fn database_type(mut self, database_type: &str) -> Self {
        self.database_type = database_type.to_string();
        self
    }

    pub fn languages(mut self, languages: &[&str]) -> Self {
        self.languages = languages.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn description(mut self, entries: &[(&str, &str)]) -> Self {
        self.description = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn build_epoch(mut self, epoch: u64) -> Self {
        self.build_epoch = epoch;
        self
    }

    /// Replace a metadata entry with an arbitrary value
    pub fn set_metadata(mut self, key: &str, value: DataValue) -> Self {
        self.metadata_overrides.insert(key.to_string(), Some(value));
        self
    }

    /// Leave a metadata entry out
    pub fn remove_metadata(mut self, key: &str) -> Self {
        self.metadata_overrides.insert(key.to_string(), None);
        self
    }

    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    /// Store `value` and map `network` to it, returning the data offset
    pub fn insert(&mut self, network: &str, value: &DataValue) -> u32 {
        let offset = self.data.add(value);
        self.insert_offset(network, offset);
        offset
    }

    /// Map `network` to an already stored data offset
    pub fn insert_offset(&mut self, network: &str, offset: u32) {
        let (bits, prefix_len) = network_bits(network, self.ip_version);
        self.tree.insert(bits, prefix_len, offset);
    }

    /// Make `::ffff:0:0/96` share the IPv4 subtree at `::/96`
    pub fn alias_ipv4_mapped(&mut self) {
        let ipv4_root = self
            .tree
            .find_node(0, 96)
            .expect("IPv4 subtree must exist before aliasing");
        self.tree.link(0xFFFF_u128 << 32, 96, ipv4_root);
    }

    fn metadata(&self, node_count: u32) -> DataValue {
        let mut map = HashMap::new();
        map.insert("binary_format_major_version".to_string(), DataValue::Uint16(2));
        map.insert("binary_format_minor_version".to_string(), DataValue::Uint16(0));
        map.insert("build_epoch".to_string(), DataValue::Uint64(self.build_epoch));
        map.insert(
            "database_type".to_string(),
            DataValue::String(self.database_type.clone()),
        );
        map.insert(
            "description".to_string(),
            DataValue::Map(
                self.description
                    .iter()
                    .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
                    .collect(),
            ),
        );
        map.insert(
            "ip_version".to_string(),
            DataValue::Uint16(self.ip_version.number()),
        );
        map.insert(
            "languages".to_string(),
            DataValue::Array(
                self.languages
                    .iter()
                    .map(|l| DataValue::String(l.clone()))
                    .collect(),
            ),
        );
        map.insert("node_count".to_string(), DataValue::Uint32(node_count));
        map.insert(
            "record_size".to_string(),
            DataValue::Uint16(self.record_size.bits()),
        );

        for (key, value) in &self.metadata_overrides {
            match value {
                Some(value) => map.insert(key.clone(), value.clone()),
                None => map.remove(key),
            };
        }
        DataValue::Map(map)
    }

    /// Assemble tree, separator, data section and metadata
    pub fn build(&self) -> Vec<u8> {
        let node_count = self.tree.node_count();
        let mut out = self.tree.to_bytes(self.record_size);
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&self.data.buf);
        out.extend_from_slice(METADATA_MARKER);
        out.extend_from_slice(&encode(&self.metadata(node_count)));
        out
    }
}

// Value construction helpers

pub fn s(v: &str) -> DataValue {
    DataValue::String(v.to_string())
}

pub fn map(entries: Vec<(&str, DataValue)>) -> DataValue {
    DataValue::Map(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

pub fn names(entries: &[(&str, &str)]) -> DataValue {
    DataValue::Map(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), s(v)))
            .collect(),
    )
}

// Fixtures

pub const CITY_DESCRIPTION_EN: &str =
    "GeoIP2 City Test Database (a small sample of real GeoIP2 data)";
pub const CITY_DESCRIPTION_ZH: &str = "小型数据库";

fn united_states() -> DataValue {
    map(vec![
        ("geoname_id", DataValue::Uint32(6252001)),
        ("iso_code", s("US")),
        (
            "names",
            names(&[
                ("de", "USA"),
                ("en", "United States"),
                ("es", "Estados Unidos"),
                ("fr", "États-Unis"),
                ("ja", "アメリカ合衆国"),
                ("pt-BR", "Estados Unidos"),
                ("ru", "США"),
                ("zh-CN", "美国"),
            ]),
        ),
    ])
}

/// City record for 81.2.69.160/27
pub fn london() -> DataValue {
    map(vec![
        (
            "city",
            map(vec![
                ("geoname_id", DataValue::Uint32(2643743)),
                (
                    "names",
                    names(&[
                        ("de", "London"),
                        ("en", "London"),
                        ("es", "Londres"),
                        ("fr", "Londres"),
                        ("ja", "ロンドン"),
                        ("pt-BR", "Londres"),
                        ("ru", "Лондон"),
                    ]),
                ),
            ]),
        ),
        (
            "continent",
            map(vec![
                ("code", s("EU")),
                ("geoname_id", DataValue::Uint32(6255148)),
                (
                    "names",
                    names(&[
                        ("de", "Europa"),
                        ("en", "Europe"),
                        ("es", "Europa"),
                        ("fr", "Europe"),
                        ("ja", "ヨーロッパ"),
                        ("pt-BR", "Europa"),
                        ("ru", "Европа"),
                        ("zh-CN", "欧洲"),
                    ]),
                ),
            ]),
        ),
        (
            "country",
            map(vec![
                ("geoname_id", DataValue::Uint32(2635167)),
                ("iso_code", s("GB")),
                (
                    "names",
                    names(&[
                        ("de", "Vereinigtes Königreich"),
                        ("en", "United Kingdom"),
                        ("es", "Reino Unido"),
                        ("fr", "Royaume-Uni"),
                        ("ja", "イギリス"),
                        ("pt-BR", "Reino Unido"),
                        ("ru", "Великобритания"),
                        ("zh-CN", "英国"),
                    ]),
                ),
            ]),
        ),
        (
            "location",
            map(vec![
                ("accuracy_radius", DataValue::Uint16(100)),
                ("latitude", DataValue::Double(51.5142)),
                ("longitude", DataValue::Double(-0.0931)),
                ("time_zone", s("Europe/London")),
            ]),
        ),
        ("registered_country", united_states()),
        (
            "subdivisions",
            DataValue::Array(vec![map(vec![
                ("geoname_id", DataValue::Uint32(6269131)),
                ("iso_code", s("ENG")),
                (
                    "names",
                    names(&[
                        ("en", "England"),
                        ("pt-BR", "Inglaterra"),
                        ("fr", "Angleterre"),
                        ("es", "Inglaterra"),
                    ]),
                ),
            ])]),
        ),
    ])
}

/// City record for 216.160.83.56/29
pub fn milton() -> DataValue {
    map(vec![
        (
            "city",
            map(vec![
                ("geoname_id", DataValue::Uint32(5803556)),
                ("names", names(&[("en", "Milton")])),
            ]),
        ),
        (
            "country",
            map(vec![
                ("geoname_id", DataValue::Uint32(6252001)),
                ("iso_code", s("US")),
            ]),
        ),
        (
            "location",
            map(vec![
                ("latitude", DataValue::Double(47.2513)),
                ("longitude", DataValue::Double(-122.3149)),
                ("metro_code", DataValue::Uint16(819)),
                ("time_zone", s("America/Los_Angeles")),
            ]),
        ),
        ("postal", map(vec![("code", s("98354"))])),
        ("registered_country", united_states()),
    ])
}

/// Country-level record for 2001:218::/32
pub fn japan() -> DataValue {
    map(vec![
        (
            "continent",
            map(vec![("code", s("AS")), ("geoname_id", DataValue::Uint32(6255147))]),
        ),
        (
            "country",
            map(vec![
                ("geoname_id", DataValue::Uint32(1861060)),
                ("iso_code", s("JP")),
                ("names", names(&[("en", "Japan")])),
            ]),
        ),
    ])
}

/// GeoIP2-City shaped database
pub fn city_writer(ip_version: IpVersion, record_size: RecordSize) -> MmdbWriter {
    let mut writer = MmdbWriter::new(ip_version, record_size)
        .database_type("GeoIP2-City")
        .languages(&["en", "zh"])
        .description(&[("en", CITY_DESCRIPTION_EN), ("zh", CITY_DESCRIPTION_ZH)]);
    writer.insert("81.2.69.160/27", &london());
    writer.insert("216.160.83.56/29", &milton());
    if ip_version == IpVersion::V6 {
        writer.insert("2001:218::/32", &japan());
    }
    writer
}

pub fn city_db(ip_version: IpVersion, record_size: RecordSize) -> Vec<u8> {
    city_writer(ip_version, record_size).build()
}

pub fn connection_type_db() -> Vec<u8> {
    let mut writer =
        MmdbWriter::new(IpVersion::V6, RecordSize::Bits24).database_type("GeoIP2-Connection-Type");
    writer.insert("1.0.1.0/24", &map(vec![("connection_type", s("Cable/DSL"))]));
    writer.insert("1.0.2.0/23", &map(vec![("connection_type", s("Cellular"))]));
    writer.build()
}

pub fn domain_db() -> Vec<u8> {
    let mut writer =
        MmdbWriter::new(IpVersion::V6, RecordSize::Bits24).database_type("GeoIP2-Domain");
    writer.insert("1.2.0.0/16", &map(vec![("domain", s("maxmind.com"))]));
    writer.build()
}

pub fn isp_db() -> Vec<u8> {
    let mut writer = MmdbWriter::new(IpVersion::V6, RecordSize::Bits28).database_type("GeoIP2-ISP");
    writer.insert(
        "1.128.0.0/11",
        &map(vec![
            ("autonomous_system_number", DataValue::Uint32(1221)),
            ("autonomous_system_organization", s("Telstra Pty Ltd")),
            ("isp", s("Telstra Internet")),
            ("organization", s("Telstra Internet")),
        ]),
    );
    writer.build()
}

pub fn anonymous_ip_db() -> Vec<u8> {
    let mut writer =
        MmdbWriter::new(IpVersion::V6, RecordSize::Bits32).database_type("GeoIP2-Anonymous-IP");
    writer.insert(
        "1.2.0.0/15",
        &map(vec![
            ("is_anonymous", DataValue::Bool(true)),
            ("is_anonymous_vpn", DataValue::Bool(true)),
        ]),
    );
    writer.build()
}
