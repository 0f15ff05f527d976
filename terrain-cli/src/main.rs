use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::ServiceOptions;

/// Terrain elevation lookup tool
#[derive(Parser)]
#[command(name = "terrain")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory where downloaded tiles are cached
    #[arg(short = 'd', long, env = "TERRAIN_CACHE_DIR", global = true)]
    cache_dir: Option<PathBuf>,

    /// Maximum decoded tiles held in memory
    #[arg(
        short,
        long,
        env = "TERRAIN_CACHE_SIZE",
        default_value = "8192",
        global = true
    )]
    cache_size: usize,

    /// Tile URL template with {z}, {x} and {y} placeholders
    #[arg(long, env = "TERRAIN_TILE_URL", global = true)]
    tile_url: Option<String>,

    /// Delete tile files when they are evicted from memory
    #[arg(long, global = true)]
    delete_on_evict: bool,

    /// Never download; only use tiles already in the cache directory
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Query elevation for a single coordinate
    Query {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Zoom level; repeat to query several
        #[arg(short, long = "zoom", default_value = "14")]
        zooms: Vec<u8>,

        /// Output result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Add an elevation column to a CSV file
    Batch {
        /// Input CSV file
        input: PathBuf,

        /// Output file (defaults to <input>_elevation.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Column name for latitude
        #[arg(long, default_value = "lat")]
        lat_col: String,

        /// Column name for longitude
        #[arg(long, default_value = "lng")]
        lng_col: String,

        /// Zoom level
        #[arg(short, long, default_value = "14")]
        zoom: u8,
    },

    /// Show the tile address, URL and cache path for a coordinate
    Tile {
        /// Latitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude in decimal degrees
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Zoom level
        #[arg(short, long, default_value = "14")]
        zoom: u8,
    },

    /// Display information about a GeoTIFF tile
    Info {
        /// Path to a .tif file, or a cached tile address (e.g., 14/8789/5383)
        tile: String,
    },

    /// List tiles in the cache directory
    List,

    /// Download every tile covering a bounding box
    Prefetch {
        /// Bounding box as min_lat,min_lng,max_lat,max_lng
        #[arg(long, allow_hyphen_values = true)]
        bbox: String,

        /// Zoom level
        #[arg(short, long, default_value = "14")]
        zoom: u8,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "terrain=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let options = ServiceOptions {
        cache_dir: cli.cache_dir,
        cache_size: cli.cache_size,
        tile_url: cli.tile_url,
        delete_on_evict: cli.delete_on_evict,
        offline: cli.offline,
    };

    match cli.command {
        Commands::Query {
            lat,
            lng,
            zooms,
            json,
        } => commands::query::run(&options, lat, lng, zooms, json),
        Commands::Batch {
            input,
            output,
            lat_col,
            lng_col,
            zoom,
        } => commands::batch::run(&options, input, output, lat_col, lng_col, zoom),
        Commands::Tile { lat, lng, zoom } => commands::tile::run(&options, lat, lng, zoom),
        Commands::Info { tile } => commands::info::run(&options, tile),
        Commands::List => commands::list::run(&options),
        Commands::Prefetch { bbox, zoom } => commands::prefetch::run(&options, bbox, zoom),
    }
}
