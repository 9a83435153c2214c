// Command line interface for headless detection runs

use crate::models::pose::Variant;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Settings file (defaults to ~/.posewatch/config/settings.json)
    #[arg(long, env = "POSEWATCH_CONFIG")]
    pub config: Option<PathBuf>,
    /// Model variant, e.g. singlepose_thunder or MULTIPOSE_LIGHTNING
    #[arg(long, value_parser = parse_variant)]
    pub variant: Option<Variant>,
    /// Inference backend base URL
    #[arg(long, env = "POSEWATCH_BACKEND_URL")]
    pub backend_url: Option<String>,
    /// Submit the rendered frame every 5 seconds while detecting
    #[arg(long)]
    pub auto_submit: bool,
    /// Transcript export file written on exit
    #[arg(long)]
    pub export: Option<PathBuf>,
    /// Stop after this many seconds (runs until Ctrl-C when omitted)
    #[arg(long)]
    pub duration_secs: Option<u64>,
    #[command(subcommand)]
    pub source: SourceArg,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum SourceArg {
    /// Detect continuously on the camera
    Webcam,
    /// Detect once on a still image
    Image { path: PathBuf },
    /// Detect while an animated GIF clip plays
    Video { path: PathBuf },
}

fn parse_variant(value: &str) -> Result<Variant, String> {
    Variant::from_string(value).map_err(|e| e.to_string())
}
