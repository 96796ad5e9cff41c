mod cli_utils;
mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::{cmd_inspect, cmd_lookup, cmd_verify, LookupOptions};

#[derive(Parser)]
#[command(name = "geoip2")]
#[command(
    about = "Query and inspect MaxMind DB (GeoIP2/GeoLite2) databases",
    long_about = "geoip2 - Query and inspect MaxMind DB (.mmdb) databases\n\n\
    Looks up IPv4 and IPv6 addresses, prints database metadata and checks\n\
    database files for structural corruption.\n\n\
    Examples:\n\
      geoip2 lookup GeoLite2-City.mmdb 81.2.69.160\n\
      geoip2 lookup GeoLite2-City.mmdb 81.2.69.160 2001:218::1 --json --prefix\n\
      geoip2 inspect GeoLite2-City.mmdb\n\
      geoip2 verify GeoLite2-City.mmdb --verbose\n\n\
    Set RUST_LOG (e.g. RUST_LOG=geoip2=trace) for diagnostic logging."
)]
#[command(version)]
struct Cli {
    /// Verbose output (debug logging, verify warnings)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read the database into memory instead of memory-mapping it
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Look up one or more IP addresses
    Lookup {
        /// Path to the database (.mmdb file)
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// IPv4 or IPv6 addresses to look up
        #[arg(value_name = "IP", required = true)]
        addresses: Vec<String>,

        /// Output a JSON array of results
        #[arg(short, long)]
        json: bool,

        /// Include the matched network (CIDR)
        #[arg(short, long)]
        prefix: bool,

        /// Project records onto the shape implied by the database type
        #[arg(short, long)]
        typed: bool,
    },

    /// Show database metadata
    Inspect {
        /// Path to the database (.mmdb file)
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output metadata as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Walk the whole database and report structural problems
    Verify {
        /// Path to the database (.mmdb file)
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Output results as JSON
        #[arg(short, long)]
        json: bool,
    },
}

fn init_logging(verbose: bool) -> Result<()> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("geoip2=warn"));
    if verbose {
        filter = filter.add_directive("geoip2=debug".parse()?);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let ok = match cli.command {
        Commands::Lookup {
            database,
            addresses,
            json,
            prefix,
            typed,
        } => cmd_lookup(
            database,
            addresses,
            LookupOptions {
                json,
                prefix,
                typed,
                in_memory: cli.in_memory,
            },
        )?,
        Commands::Inspect { database, json } => {
            cmd_inspect(database, json, cli.in_memory)?;
            true
        }
        Commands::Verify { database, json } => {
            cmd_verify(database, json, cli.verbose, cli.in_memory)?
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
