use clap::{Args, Parser, Subcommand};
use pf_core::Format;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pixelforge")]
#[command(author, version, about = "Image transformation pipelines from the command line")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transform a single image
    Process {
        /// Input image
        #[arg(required = true)]
        input: PathBuf,

        /// Output file; its extension selects the format unless --format is given
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        transform: TransformArgs,
    },

    /// Transform many images concurrently
    Batch {
        /// Input images
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Storage root (defaults to the configured storage.root_dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Bucket inside the storage root
        #[arg(long, default_value = "processed")]
        bucket: String,

        #[command(flatten)]
        transform: TransformArgs,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

/// Transform options shared by `process` and `batch`, applied in the order
/// listed.
#[derive(Args, Debug, Clone, Default)]
pub struct TransformArgs {
    /// Crop rectangle as X,Y,W,H
    #[arg(long, value_parser = parse_rect)]
    pub crop: Option<(u32, u32, u32, u32)>,

    /// Resize to WxH; a zero side keeps the aspect ratio (e.g. 400x0)
    #[arg(long, value_parser = parse_size)]
    pub resize: Option<(u32, u32)>,

    /// Square thumbnail of N pixels
    #[arg(long)]
    pub thumbnail: Option<u32>,

    /// Convert to grayscale
    #[arg(long)]
    pub grayscale: bool,

    /// Drop EXIF metadata
    #[arg(long)]
    pub strip_exif: bool,

    /// Output format (jpeg, png, webp); defaults to the output extension, then
    /// the configured default_format
    #[arg(long)]
    pub format: Option<Format>,

    /// Encode quality, 1-100
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: Option<u8>,

    /// Search for the highest quality whose output fits this many bytes
    #[arg(long)]
    pub target_size: Option<u64>,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let w = w.trim().parse().map_err(|e| format!("bad width '{w}': {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("bad height '{h}': {e}"))?;
    Ok((w, h))
}

fn parse_rect(s: &str) -> Result<(u32, u32, u32, u32), String> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<u32>().map_err(|e| format!("bad value '{p}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts[..] {
        [x, y, w, h] => Ok((x, y, w, h)),
        _ => Err(format!("expected X,Y,W,H, got '{s}'")),
    }
}
