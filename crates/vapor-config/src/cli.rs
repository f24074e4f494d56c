//! Command-line overrides.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Volumetric fog frame driver.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "vapor", about = "Headless volumetric fog frame driver")]
pub struct CliArgs {
    /// Screen width in pixels.
    #[arg(long)]
    pub width: Option<u32>,

    /// Screen height in pixels.
    #[arg(long)]
    pub height: Option<u32>,

    /// Number of frames to record.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Number of cameras rendered per frame.
    #[arg(long)]
    pub cameras: Option<u32>,

    /// Number of density volumes in the generated scene.
    #[arg(long)]
    pub volumes: Option<u32>,

    /// Scene seed.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Use the High volumetric preset.
    #[arg(long)]
    pub high_quality: bool,

    /// Disable the separable lighting filter.
    #[arg(long)]
    pub no_filter: bool,

    /// Disable temporal reprojection.
    #[arg(long)]
    pub no_reprojection: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(width) = args.width {
            self.demo.width = width;
        }
        if let Some(height) = args.height {
            self.demo.height = height;
        }
        if let Some(frames) = args.frames {
            self.demo.frames = frames;
        }
        if let Some(cameras) = args.cameras {
            self.demo.cameras = cameras;
        }
        if let Some(volumes) = args.volumes {
            self.demo.volumes = volumes;
        }
        if let Some(seed) = args.seed {
            self.demo.seed = seed;
        }
        if args.high_quality {
            self.volumetrics.increase_resolution = true;
        }
        if args.no_filter {
            self.fog.filter = false;
        }
        if args.no_reprojection {
            self.fog.reprojection = false;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
