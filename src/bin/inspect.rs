//! dhtstore Inspection Binary
//!
//! Opens persisted segments read-only and prints what they hold.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dhtstore::segment::{segment_path, SegmentHeader, SEGMENT_HEADER_BYTES};
use dhtstore::{
    DhtKey, FileSegment, NamespaceOptions, PrereadMode, Retrieval, RetrievalOptions,
    RetrievalType, Segment, SystemTimeSource, VersionConstraint,
};
use tracing_subscriber::{fmt, EnvFilter};

/// dhtstore segment inspector
#[derive(Parser, Debug)]
#[command(name = "dhtstore-inspect")]
#[command(about = "Inspect persisted dhtstore segments")]
#[command(version)]
struct Args {
    /// Namespace directory holding the segment files
    #[arg(short, long, default_value = ".")]
    ns_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the segment header and index statistics
    Info {
        /// Segment number
        segment: u32,
    },

    /// Dump every offset list of a segment
    Lists {
        /// Segment number
        segment: u32,
    },

    /// Retrieve one key
    Get {
        /// Segment number
        segment: u32,

        /// Most significant 64 bits of the key (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_u64)]
        msl: u64,

        /// Least significant 64 bits of the key (decimal or 0x-prefixed hex)
        #[arg(value_parser = parse_u64)]
        lsl: u64,

        /// Exact version to retrieve instead of the greatest
        #[arg(short, long)]
        version: Option<i64>,

        /// Verify the payload checksum
        #[arg(long)]
        verify: bool,
    },
}

fn main() {
    let args = Args::parse();

    // Offset list dumps are logged at debug level
    let default_filter = match args.command {
        Commands::Lists { .. } => "info,dhtstore=debug",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt().with_env_filter(filter).with_target(false).init();

    if let Err(e) = run(&args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> dhtstore::Result<()> {
    match &args.command {
        Commands::Info { segment } => {
            let (header, segment) = open(&args.ns_dir, *segment)?;
            let stats = segment.stats();
            println!("segment         {}", header.segment_number);
            println!("data offset     {}", header.data_offset);
            println!("index offset    {}", header.index_offset);
            println!("storage format  {}", stats.storage_format);
            println!("created (ms)    {}", stats.creation_millis);
            println!("keys            {}", stats.keys);
            println!("index capacity  {}", stats.index_capacity);
            println!("offset lists    {}", stats.offset_lists);
            match stats.invalidated {
                Some(count) => println!("invalidated     {}", count),
                None => println!("invalidated     (not tracked)"),
            }
            if let Some(count) = stats.indexed_lengths {
                println!("indexed lengths {}", count);
            }
        }
        Commands::Lists { segment } => {
            let (_, segment) = open(&args.ns_dir, *segment)?;
            segment.display_for_debug();
        }
        Commands::Get {
            segment,
            msl,
            lsl,
            version,
            verify,
        } => {
            let (_, segment) = open(&args.ns_dir, *segment)?;
            let key = DhtKey::new(*msl, *lsl);
            let constraint = version.map_or(VersionConstraint::GREATEST, VersionConstraint::exact);
            let options = RetrievalOptions::new(RetrievalType::ValueAndMetaData)
                .version_constraint(constraint)
                .verify_checksums(*verify);

            match segment.retrieve(&key, &options)? {
                Retrieval::Found(view) => {
                    println!("offset        {}", view.offset());
                    println!("version       {}", view.version());
                    println!("creation time {}", view.creation_time());
                    println!("invalidated   {}", view.is_invalidated());
                    println!("payload       {} bytes", view.payload().len());
                    println!("{}", String::from_utf8_lossy(&view.payload()));
                }
                Retrieval::NotFound => println!("{}: not found", key),
                Retrieval::Corrupt => println!("{}: corrupt", key),
            }
        }
    }
    Ok(())
}

/// Open a segment read-only, sizing it from its own header
fn open(ns_dir: &Path, segment_number: u32) -> dhtstore::Result<(SegmentHeader, FileSegment)> {
    let options = match NamespaceOptions::read_properties(ns_dir) {
        Ok(options) => options,
        Err(e) => {
            tracing::warn!("No usable namespace properties ({}), using defaults", e);
            NamespaceOptions::default()
        }
    };

    let mut raw = [0u8; SEGMENT_HEADER_BYTES];
    File::open(segment_path(ns_dir, segment_number))?.read_exact(&mut raw)?;
    let header = SegmentHeader::read(&raw)?;

    let segment = FileSegment::open_read_only(
        ns_dir,
        segment_number,
        header.index_offset,
        &options,
        PrereadMode::NoPreread,
        Arc::new(SystemTimeSource),
    )?;
    Ok((header, segment))
}

fn parse_u64(s: &str) -> Result<u64, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        None => s.parse::<u64>().map_err(|e| e.to_string()),
    }
}
