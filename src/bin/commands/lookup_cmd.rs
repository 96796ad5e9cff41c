use anyhow::{Context, Result};
use geoip2::{IpVersion, Reader, Record};
use serde_json::json;
use std::net::IpAddr;
use std::path::PathBuf;

use super::open_reader;
use crate::cli_utils::format_cidr;

/// Output switches for `geoip2 lookup`
#[derive(Debug, Clone, Copy, Default)]
pub struct LookupOptions {
    pub json: bool,
    pub prefix: bool,
    pub typed: bool,
    pub in_memory: bool,
}

/// Look up each address; returns whether every address was found
pub fn cmd_lookup(database: PathBuf, addresses: Vec<String>, options: LookupOptions) -> Result<bool> {
    let reader = open_reader(&database, options.in_memory)?;

    let mut all_found = true;
    let mut results = Vec::with_capacity(addresses.len());

    for address in &addresses {
        let ip: IpAddr = address
            .trim()
            .parse()
            .with_context(|| format!("Invalid IP address: {}", address))?;

        let found = reader
            .resolve(ip)
            .with_context(|| format!("Lookup failed for: {}", ip))?;

        let Some(found) = found else {
            all_found = false;
            if options.json {
                results.push(json!({ "ip": ip.to_string(), "found": false }));
            } else {
                println!("{}: not found", ip);
            }
            continue;
        };

        let value = reader.decode(found.data_offset)?;
        let record = if options.typed {
            serde_json::to_value(Record::from_value(reader.record_kind(), value)?)?
        } else {
            serde_json::to_value(value)?
        };
        let network = format_cidr(network_address(&reader, ip), found.prefix_len);

        if options.json {
            let mut entry = json!({ "ip": ip.to_string(), "found": true, "record": record });
            if options.prefix {
                entry["network"] = json!(network);
                entry["prefix_len"] = json!(found.prefix_len);
            }
            results.push(entry);
        } else {
            if options.prefix {
                println!("{} ({})", ip, network);
            } else {
                println!("{}", ip);
            }
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
    }

    if options.json {
        println!("{}", serde_json::to_string_pretty(&json!(results))?);
    }

    Ok(all_found)
}

/// Address the reported prefix applies to
///
/// IPv4-mapped IPv6 addresses are resolved as IPv4 in IPv4 databases, so
/// their prefix is an IPv4 prefix.
fn network_address(reader: &Reader, ip: IpAddr) -> IpAddr {
    match (ip, reader.metadata().ip_version) {
        (IpAddr::V6(v6), IpVersion::V4) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        _ => ip,
    }
}
