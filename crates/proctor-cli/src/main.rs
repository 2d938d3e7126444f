use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use proctor_core::evaluator::DEFAULT_CONFIDENCE_FLOOR;
use proctor_core::matcher::DEFAULT_SIMILARITY_THRESHOLD;
use proctor_core::pose::{DEFAULT_LEFT_THRESHOLD, DEFAULT_RIGHT_THRESHOLD};
use proctor_core::{
    CosineMatcher, EvaluatorConfig, FrameEvaluator, FrameRef, FrameResult, Gallery, Pipeline, PoseEstimator,
};
use proctor_hw::{Camera, Frame};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "proctor", version, about = "Webcam proctoring: identity, pose and session status per frame")]
struct Cli {
    #[command(flatten)]
    opts: PipelineOpts,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PipelineOpts {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true, env = "PROCTOR_MODEL_DIR")]
    model_dir: Option<PathBuf>,

    /// Gallery embedding matrix (.npy)
    #[arg(long, global = true, env = "PROCTOR_EMBEDDINGS", default_value = "all_train_embeddings.npy")]
    embeddings: PathBuf,

    /// Gallery labels (.json array or one label per line; a labels .npy
    /// must be converted to one of these first)
    #[arg(long, global = true, env = "PROCTOR_LABELS", default_value = "all_train_labels.json")]
    labels: PathBuf,

    /// Cosine similarity a match must exceed
    #[arg(long, global = true, env = "PROCTOR_SIMILARITY_THRESHOLD", default_value_t = DEFAULT_SIMILARITY_THRESHOLD)]
    threshold: f32,

    /// Minimum detector confidence for a face to count
    #[arg(long, global = true, env = "PROCTOR_CONFIDENCE_FLOOR", default_value_t = DEFAULT_CONFIDENCE_FLOOR)]
    confidence_floor: f32,

    /// Nose ratio below which the subject is looking right
    #[arg(long, global = true, env = "PROCTOR_POSE_RIGHT", default_value_t = DEFAULT_RIGHT_THRESHOLD)]
    pose_right: f32,

    /// Nose ratio above which the subject is looking left
    #[arg(long, global = true, env = "PROCTOR_POSE_LEFT", default_value_t = DEFAULT_LEFT_THRESHOLD)]
    pose_left: f32,
}

impl PipelineOpts {
    fn gallery(&self) -> Arc<Gallery> {
        Arc::new(Gallery::load_or_unavailable(&self.embeddings, &self.labels))
    }

    fn evaluator(&self, gallery: Arc<Gallery>) -> FrameEvaluator {
        FrameEvaluator::new(
            gallery,
            CosineMatcher::new(self.threshold),
            PoseEstimator::new(self.pose_right, self.pose_left),
            EvaluatorConfig {
                confidence_floor: self.confidence_floor,
                ..EvaluatorConfig::default()
            },
        )
    }

    fn pipeline(&self) -> Result<Pipeline<proctor_core::FaceDetector, proctor_core::FaceRecognizer, CosineMatcher>> {
        let model_dir = self.model_dir.clone().unwrap_or_else(proctor_core::default_model_dir);
        let evaluator = self.evaluator(self.gallery());
        Pipeline::load(&model_dir, evaluator)
            .with_context(|| format!("failed to load models from {}", model_dir.display()))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate live webcam frames until interrupted
    Watch {
        /// V4L2 device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Stop after this many evaluated frames
        #[arg(short = 'n', long)]
        frames: Option<usize>,
    },
    /// Evaluate a single image file and print the report as JSON
    Check {
        /// Image to evaluate (JPEG, PNG, ...)
        image: PathBuf,
    },
    /// Load the gallery and summarize it
    ///
    /// Labels are read from a JSON array of strings or a text file with one
    /// label per line. A labels `.npy` holding Python strings is not
    /// readable; convert it first.
    Gallery,
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { device, frames } => {
            let stop = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    flag.store(true, Ordering::Relaxed);
                }
            });

            let opts = cli.opts;
            tokio::task::spawn_blocking(move || watch(&opts, &device, frames, &stop)).await??;
        }
        Commands::Check { image } => {
            let frame = Frame::open(&image).with_context(|| format!("cannot read {}", image.display()))?;
            let mut pipeline = cli.opts.pipeline()?;
            let result = pipeline.run(FrameRef::new(&frame.data, frame.width, frame.height))?;
            println!("{}", serde_json::to_string_pretty(&result.report())?);
        }
        Commands::Gallery => {
            let gallery = cli.opts.gallery();
            match gallery.reason() {
                Some(reason) => println!("ready:      no ({reason})"),
                None => println!("ready:      yes"),
            }
            println!("entries:    {}", gallery.len());
            println!("identities: {}", gallery.identities());
            println!("dimension:  {}", gallery.dimension());
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                bail!("no V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn watch(opts: &PipelineOpts, device: &str, limit: Option<usize>, stop: &AtomicBool) -> Result<()> {
    let mut pipeline = opts.pipeline()?;
    let camera = Camera::open(device)?;
    println!(
        "watching {device} at {}x{} (match threshold {:.2}); Ctrl-C to stop",
        camera.width, camera.height, opts.threshold
    );

    let summary = run_watch(camera.stream()?, limit, stop, |frame| {
        let result = pipeline.run(FrameRef::new(&frame.data, frame.width, frame.height))?;
        println!("[{:>6}] thr {:.2}  {}", frame.sequence, opts.threshold, status_line(&result));
        Ok::<_, proctor_core::PipelineError>(())
    });

    tracing::info!(
        evaluated = summary.evaluated,
        dark_skipped = summary.dark_skipped,
        failed = summary.failed,
        "watch finished"
    );
    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct WatchSummary {
    evaluated: usize,
    dark_skipped: usize,
    failed: usize,
}

/// Feed frames to `evaluate` until `stop` is set, `limit` frames have been
/// evaluated, or the source ends. `stop` is checked once per dequeued frame,
/// dark or not. Capture and evaluation errors are logged and skipped.
fn run_watch<I, CE, EE>(
    frames: I,
    limit: Option<usize>,
    stop: &AtomicBool,
    mut evaluate: impl FnMut(&Frame) -> Result<(), EE>,
) -> WatchSummary
where
    I: IntoIterator<Item = Result<Frame, CE>>,
    CE: Display,
    EE: Display,
{
    let mut summary = WatchSummary::default();
    let mut frames = frames.into_iter();

    while !stop.load(Ordering::Relaxed) && limit.map_or(true, |n| summary.evaluated < n) {
        let Some(frame) = frames.next() else { break };
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(error = %e, "capture failed");
                continue;
            }
        };
        if frame.is_dark {
            summary.dark_skipped += 1;
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            continue;
        }

        match evaluate(&frame) {
            Ok(()) => summary.evaluated += 1,
            Err(e) => {
                summary.failed += 1;
                tracing::warn!(seq = frame.sequence, error = %e, "frame evaluation failed");
            }
        }
    }

    summary
}

fn status_line(result: &FrameResult) -> String {
    let faces: Vec<String> = result
        .results()
        .map(|f| format!("{} ({:.2}) {}", f.identity, f.similarity, f.pose.as_str()))
        .collect();
    let mut line = format!("{:<16} {}", result.status.code(), result.message());
    if !faces.is_empty() {
        line.push_str(&format!("  [{}]", faces.join("; ")));
    }
    let skipped = result.skipped().count();
    if skipped > 0 {
        line.push_str(&format!("  ({skipped} skipped)"));
    }
    line
}
