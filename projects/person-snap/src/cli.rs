use crate::detect::rtdetr::DEFAULT_TARGET_SIZE;
use crate::pipeline::sampler::DEFAULT_INTERVAL_SECONDS;
use crate::video::Backend;
use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan unprocessed clips under the video root and persist their detections
    Scan(ScanArgs),
    /// Re-extract one detection's crop as base64 PNG
    Extract(ExtractArgs),
    /// Serve the JSON API
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
pub struct RootArgs {
    /// Root directory for camera clips
    #[arg(long, env = "PERSON_SNAP_VIDEO_ROOT")]
    pub video_root: PathBuf,

    /// Root directory for run artifacts
    #[arg(long, env = "PERSON_SNAP_OUTPUT_ROOT")]
    pub output_root: PathBuf,
}

#[derive(Args, Debug)]
pub struct DetectorArgs {
    /// Path to the RT-DETR model file
    #[arg(long, env = "PERSON_SNAP_MODEL")]
    pub model: String,

    /// Seconds between sampled frames
    #[arg(long, default_value_t = NonZeroU32::new(DEFAULT_INTERVAL_SECONDS).unwrap())]
    pub interval: NonZeroU32,

    /// Short-edge size frames are scaled to before inference
    #[arg(long, default_value_t = DEFAULT_TARGET_SIZE)]
    pub target_size: u32,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[command(flatten)]
    pub roots: RootArgs,

    #[command(flatten)]
    pub detector: DetectorArgs,

    /// Decoding backend
    #[arg(long, value_enum, default_value_t = Backend::Opencv)]
    pub backend: Backend,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Source clip the detection was sampled from
    pub filepath: String,

    /// Timestamp of the detection, in whole seconds
    #[arg(long)]
    pub ts: u64,

    /// Bounding box as X1 Y1 X2 Y2
    #[arg(long, required = true, num_args = 4, value_names = ["X1", "Y1", "X2", "Y2"], allow_negative_numbers = true)]
    pub bb: Vec<i32>,

    /// Decoding backend
    #[arg(long, value_enum, default_value_t = Backend::Opencv)]
    pub backend: Backend,

    /// Write the decoded PNG here instead of printing base64
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to bind to
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    #[command(flatten)]
    pub roots: RootArgs,

    #[command(flatten)]
    pub detector: DetectorArgs,

    /// Decoding backend
    #[arg(long, value_enum, default_value_t = Backend::Opencv)]
    pub backend: Backend,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
