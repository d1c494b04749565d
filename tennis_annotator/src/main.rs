use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tennis_annotator::{config, ProgressLogger, VideoAnnotator};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Annotate a tennis video with player and ball detections.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Video to annotate (mp4, avi or mov)
    input: PathBuf,
    /// Where the annotated video is written
    output: PathBuf,
    /// Log progress every N percent
    #[arg(long, default_value_t = 10)]
    progress_step: u32,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = config::get_configuration()?;
    let log_level = &format!("{},ort=info", config.log_level.as_str());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();

    let annotator = VideoAnnotator::from_config(&config)?;
    let progress = ProgressLogger::new(args.progress_step);

    let report = annotator.process(&args.input, &args.output, &progress)?;
    if !report.is_success() {
        tracing::error!(
            "Processing failed, no output video was produced ({:?})",
            report.stop
        );
        return Ok(ExitCode::FAILURE);
    }

    tracing::info!(
        "Annotated video written to {:?} ({}/{} frames, {:?})",
        args.output,
        report.frames_written,
        report.expected_frames,
        report.status()
    );
    Ok(ExitCode::SUCCESS)
}
