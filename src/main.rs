use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::RgbImage;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use vizor::capture::{FrameSequence, FrameSource};
use vizor::features::{CancelToken, FeatureTracker, FrameOutcome, TrackingSession};
use vizor::output::{ImageDirectory, OutputSink};
use vizor::search::MatchMethod;
use vizor::VisionConfig;

const CAMERA_WIDTH: u32 = 1280;
const CAMERA_HEIGHT: u32 = 720;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// TOML configuration file; defaults are used when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Locate a reference image inside a source image
    Search {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        reference: PathBuf,
        /// sqdiff, sqdiff-normed, ccorr, ccorr-normed, ccoeff or ccoeff-normed
        #[arg(long, default_value = "sqdiff-normed")]
        method: MatchMethod,
        /// Annotated output image
        #[arg(long)]
        out: PathBuf,
        /// Where to save the matched region
        #[arg(long)]
        crop: Option<PathBuf>,
    },

    /// Follow a reference image through a sequence of frames
    Track {
        #[arg(long)]
        reference: PathBuf,
        /// Frame images, in order
        #[arg(long, num_args = 1.., conflicts_with = "camera")]
        frames: Vec<PathBuf>,
        /// Webcam device index
        #[arg(long)]
        camera: Option<u32>,
        /// Directory for annotated frames
        #[arg(long)]
        out_dir: PathBuf,
        /// Stop after this many frames (at least one)
        #[arg(long)]
        max_frames: Option<NonZeroUsize>,
    },

    /// Detect faces and eyes
    Faces {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        crop: Option<PathBuf>,
    },

    /// Outline the largest edge contour
    Edges {
        #[arg(long)]
        source: PathBuf,
        /// Sobel kernel size (odd, 1-31)
        #[arg(long, default_value_t = 3)]
        kernel: u32,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        crop: Option<PathBuf>,
    },

    /// Separate the foreground with GrabCut
    Grabcut {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        crop: Option<PathBuf>,
        /// Save the label mask visualisation instead of the annotated source
        #[arg(long)]
        show_mask: bool,
    },

    /// Capture a single still from a webcam
    Snapshot {
        #[arg(long, default_value_t = 0)]
        camera: u32,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = match &args.config {
        Some(path) => VisionConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => VisionConfig::default(),
    };

    match args.command {
        Command::Search {
            source,
            reference,
            method,
            out,
            crop,
        } => {
            let source = load_rgb(&source)?;
            let reference = load_rgb(&reference)?;
            let mut display = RgbImage::new(source.width(), source.height());
            let found = vizor::search::search(&source, &reference, &mut display, method)
                .context("Search failed")?;
            tracing::info!(
                "Best match at ({}, {}) {}x{}, score {:.4}",
                found.region.x,
                found.region.y,
                found.region.width,
                found.region.height,
                found.score
            );
            save(&display, &out)?;
            save_optional(&found.crop, crop.as_deref())?;
        }

        Command::Track {
            reference,
            frames,
            camera,
            out_dir,
            max_frames,
        } => {
            let reference = load_rgb(&reference)?;
            let mut sink = ImageDirectory::new(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            let source = open_source(frames, camera)?;
            run_tracking(&reference, source, &mut sink, &config, max_frames)?;
        }

        Command::Faces { source, out, crop } => {
            let source = load_rgb(&source)?;
            let mut display = RgbImage::new(source.width(), source.height());
            let detection = vizor::detect::detect_faces(
                &source,
                &mut display,
                &config.models,
                &config.detect,
            )
            .context("Face detection failed")?;
            tracing::info!("Found {} faces", detection.regions.len());
            save(&display, &out)?;
            save_optional(detection.outcome.crop(), crop.as_deref())?;
        }

        Command::Edges {
            source,
            kernel,
            out,
            crop,
        } => {
            let source = load_rgb(&source)?;
            let mut display = RgbImage::new(source.width(), source.height());
            let extraction =
                vizor::edges::extract_edges(&source, &mut display, kernel, &config.edges)
                    .context("Edge extraction failed")?;
            save(&display, &out)?;
            save_optional(extraction.outcome.crop(), crop.as_deref())?;
        }

        Command::Grabcut {
            source,
            out,
            crop,
            show_mask,
        } => {
            let source = load_rgb(&source)?;
            let mut display = RgbImage::new(source.width(), source.height());
            let started = Instant::now();
            let result = vizor::segmentation::segment(&source, &mut display, &config.segment)
                .context("Segmentation failed")?;
            tracing::info!(
                "Segmented in {:.1}ms",
                started.elapsed().as_secs_f64() * 1000.0
            );
            if show_mask {
                save(&result.mask.to_rgb(), &out)?;
            } else {
                save(&display, &out)?;
            }
            save_optional(result.outcome.crop(), crop.as_deref())?;
        }

        Command::Snapshot { camera, out } => {
            let mut webcam = open_camera(camera)?;
            let still =
                vizor::capture::capture_still(&mut webcam).context("Failed to capture frame")?;
            save(&still, &out)?;
        }
    }

    Ok(())
}

fn load_rgb(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(image.to_rgb8())
}

fn save(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Saved {}", path.display());
    Ok(())
}

fn save_optional(image: &RgbImage, path: Option<&Path>) -> Result<()> {
    match path {
        Some(path) => save(image, path),
        None => Ok(()),
    }
}

fn open_source(frames: Vec<PathBuf>, camera: Option<u32>) -> Result<Box<dyn FrameSource>> {
    if let Some(index) = camera {
        return open_camera(index);
    }
    if frames.is_empty() {
        anyhow::bail!("Either --frames or --camera is required");
    }
    let sequence = FrameSequence::from_paths(&frames).context("Failed to load frames")?;
    Ok(Box::new(sequence))
}

#[cfg(feature = "camera")]
fn open_camera(index: u32) -> Result<Box<dyn FrameSource>> {
    let webcam = vizor::capture::WebcamCapture::new(index, CAMERA_WIDTH, CAMERA_HEIGHT)
        .context("Failed to initialize webcam capture")?;
    Ok(Box::new(webcam))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_index: u32) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("Camera input needs the `camera` feature")
}

/// Cancel the session when Enter is pressed
fn spawn_enter_listener(token: CancelToken) {
    std::thread::spawn(move || {
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line).is_ok() {
            token.cancel();
        }
    });
}

fn run_tracking<S, O>(
    reference: &RgbImage,
    source: S,
    sink: &mut O,
    config: &VisionConfig,
    max_frames: Option<NonZeroUsize>,
) -> Result<()>
where
    S: FrameSource,
    O: OutputSink,
{
    let tracker = FeatureTracker::new(reference, &config.tracker).context("Invalid reference")?;
    let token = CancelToken::new();
    let mut session = TrackingSession::new(tracker, source, token.clone());
    spawn_enter_listener(token.clone());

    let mut frame_count = 0u64;
    let mut located = 0u64;
    let mut total_cycle_time = Duration::ZERO;
    let mut total_output_time = Duration::ZERO;
    let mut last = Instant::now();

    tracing::info!("Starting tracking loop");
    tracing::info!("Press Enter to stop");

    let reason = session
        .run(
            Duration::from_millis(config.tracker.poll_interval_ms),
            |frame| {
                total_cycle_time += last.elapsed();

                if matches!(frame.outcome, FrameOutcome::Located { .. }) {
                    located += 1;
                }

                let output_start = Instant::now();
                sink.write_frame(&frame.display)?;
                total_output_time += output_start.elapsed();

                frame_count += 1;

                // Log stats every 30 frames
                if frame_count % 30 == 0 {
                    let avg_cycle_ms = total_cycle_time.as_secs_f64() * 1000.0 / frame_count as f64;
                    let avg_output_ms =
                        total_output_time.as_secs_f64() * 1000.0 / frame_count as f64;
                    tracing::info!(
                        "Frame {}: cycle={:.1}ms, output={:.1}ms, located={}",
                        frame_count,
                        avg_cycle_ms,
                        avg_output_ms,
                        located
                    );
                }

                if max_frames.is_some_and(|max| frame.index + 1 >= max.get()) {
                    token.cancel();
                }
                last = Instant::now();
                Ok(())
            },
        )
        .context("Tracking failed")?;

    tracing::info!(
        "Tracking ended ({:?}) after {} frames, reference located in {}",
        reason,
        frame_count,
        located
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track_args(max_frames: &str) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from([
            "vizor",
            "track",
            "--reference",
            "ref.png",
            "--frames",
            "a.png",
            "--out-dir",
            "out",
            "--max-frames",
            max_frames,
        ])
    }

    #[test]
    fn test_zero_max_frames_rejected() {
        assert!(track_args("0").is_err());
    }

    #[test]
    fn test_max_frames_parsed() {
        match track_args("3").unwrap().command {
            Command::Track { max_frames, .. } => {
                assert_eq!(max_frames.map(NonZeroUsize::get), Some(3));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
