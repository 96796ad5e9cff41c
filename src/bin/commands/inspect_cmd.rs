use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;

use super::open_reader;
use crate::cli_utils::{format_bytes, format_unix_timestamp};

pub fn cmd_inspect(database: PathBuf, json_output: bool, in_memory: bool) -> Result<()> {
    let reader = open_reader(&database, in_memory)?;
    let metadata = reader.metadata();
    let layout = reader.layout();

    if json_output {
        let output = json!({
            "file": database.display().to_string(),
            "file_size": reader.as_bytes().len(),
            "search_tree_size": layout.tree_size(),
            "data_section_size": reader.data_section().len(),
            "record_kind": reader.record_kind(),
            "metadata": metadata,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Database: {}", database.display());
    println!("Size:     {}", format_bytes(reader.as_bytes().len()));
    println!();
    println!("Metadata:");
    println!("  Database type:   {}", metadata.database_type);
    if !metadata.description.is_empty() {
        println!("  Description:");
        for (lang, desc) in &metadata.description {
            println!("    {}: {}", lang, desc);
        }
    }
    if !metadata.languages.is_empty() {
        println!("  Languages:       {}", metadata.languages.join(", "));
    }
    println!(
        "  Build time:      {} ({})",
        format_unix_timestamp(metadata.build_epoch),
        metadata.build_epoch
    );
    println!(
        "  Format version:  {}.{}",
        metadata.binary_format_major_version, metadata.binary_format_minor_version
    );
    println!("  IP version:      IPv{}", metadata.ip_version.number());
    println!("  Node count:      {}", metadata.node_count);
    println!("  Record size:     {} bits", metadata.record_size.bits());
    println!();
    println!("Layout:");
    println!("  Search tree:     {}", format_bytes(layout.tree_size()));
    println!("  Data section:    {}", format_bytes(reader.data_section().len()));

    Ok(())
}
