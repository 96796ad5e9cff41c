use anyhow::Result;
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;

use super::open_reader;

/// Verify a database; returns whether it passed
pub fn cmd_verify(database: PathBuf, json_output: bool, verbose: bool, in_memory: bool) -> Result<bool> {
    let reader = open_reader(&database, in_memory)?;

    let start = Instant::now();
    let report = reader.verify();
    let duration = start.elapsed();

    if json_output {
        let output = json!({
            "database": database.display().to_string(),
            "is_valid": report.is_valid(),
            "duration_ms": duration.as_millis(),
            "errors": &report.errors,
            "warnings": &report.warnings,
            "stats": &report.stats,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(report.is_valid());
    }

    println!("Verifying: {}", database.display());
    println!();
    println!("Statistics:");
    println!("  {}", report.stats.summary());
    println!("  Verification time: {}ms", duration.as_millis());
    println!();

    if !report.errors.is_empty() {
        println!("ERRORS ({}):", report.errors.len());
        for error in &report.errors {
            println!("  - {}", error);
        }
        println!();
    }

    if !report.warnings.is_empty() && verbose {
        println!("WARNINGS ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
        println!();
    } else if !report.warnings.is_empty() {
        println!("{} warning(s) (use --verbose to show)", report.warnings.len());
        println!();
    }

    if report.is_valid() {
        println!("VERIFICATION PASSED");
    } else {
        println!("VERIFICATION FAILED");
        println!("  Database has {} error(s).", report.errors.len());
    }

    Ok(report.is_valid())
}
