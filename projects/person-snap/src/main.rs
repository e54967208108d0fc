mod cli;
mod detect;
mod error;
mod pipeline;
mod run_context;
mod video;
mod web;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cli::{Cli, Command, ExtractArgs, ScanArgs, ServeArgs};
use detect::rtdetr::RtdetrDetector;
use pipeline::types::Detection;
use pipeline::{cropper, sampler};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse_args();

    match cli.command {
        Command::Scan(args) => tokio::task::spawn_blocking(move || run_scan(args)).await??,
        Command::Extract(args) => tokio::task::spawn_blocking(move || run_extract(args)).await??,
        Command::Serve(args) => run_serve(args).await?,
    }

    Ok(())
}

fn run_scan(args: ScanArgs) -> Result<()> {
    // The model is loaded once and reused across every clip in the scan.
    let mut detector = RtdetrDetector::new(&args.detector.model, args.detector.target_size)?;

    let videos = run_context::list_videos(&args.roots.video_root);
    info!(
        "found {} clips under {}",
        videos.len(),
        args.roots.video_root.display()
    );

    let mut processed = 0usize;
    for video in videos {
        if run_context::has_run(&args.roots.output_root, &args.roots.video_root, &video) {
            continue;
        }

        let path = video.to_string_lossy().into_owned();
        info!("Processing {}", path);
        match sampler::process(&path, args.backend, &mut detector, args.detector.interval) {
            Ok(detections) => {
                let metadata = run_context::record_run(
                    &args.roots.output_root,
                    &args.roots.video_root,
                    &video,
                    &detections,
                )?;
                info!("{}: {} person detections", metadata.run_id, detections.len());
                processed += 1;
            }
            Err(e) => {
                // A clip the camera is still writing fails to open here; it is
                // picked up again on the next scan.
                warn!("failed to process {}: {:#}", path, e);
            }
        }
    }

    info!("scan finished, {} new runs", processed);
    Ok(())
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let bb: [i32; 4] = args
        .bb
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("--bb takes exactly four integers"))?;
    let detection = Detection { ts: args.ts, bb };

    let b64 = cropper::extract_box_as_b64(&args.filepath, args.backend, &detection)?;

    match args.out {
        Some(path) => {
            std::fs::write(&path, BASE64.decode(b64.as_bytes())?)?;
            info!("wrote {}", path.display());
        }
        None => println!("{b64}"),
    }
    Ok(())
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let state = web::api::AppState {
        video_root: args.roots.video_root,
        output_root: args.roots.output_root,
        model_path: args.detector.model,
        backend: args.backend,
        interval_seconds: args.detector.interval,
        target_size: args.detector.target_size,
    };

    web::server::run_server(args.host, args.port, state).await
}
