use std::env;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use knownface::{
    config, video::Camera, AddOutcome, FaceEmbedding, FaceExtractor, FaceService,
    GallerySnapshot, Pipeline,
};
use knownface_vision::ModelPaths;
use log::{info, warn};

/// Live mode reports "no face" once nothing has been seen for this long.
const NO_FACE_NOTICE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "knownface")]
#[command(
    version,
    about = "Recognise people by comparing face embeddings against a named gallery"
)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add (or replace) a person from an image
    Add {
        name: String,
        image: PathBuf,
    },
    /// Rename a known person
    Rename {
        old_name: String,
        new_name: String,
    },
    /// Identify the face in an image
    Recognize {
        image: PathBuf,
    },
    /// Add every jpg/png in a directory, named after the file
    Import {
        dir: PathBuf,
    },
    /// List known people
    List,
    /// Recognise faces from the camera until interrupted
    Watch {
        /// Stop after this many frames
        #[arg(short, long)]
        frames: Option<u64>,
    },
    /// Open config file in editor
    Config,
}

/// Loads the ONNX models on first use so commands that only touch the
/// gallery never pay for them.
struct LazyPipeline {
    paths: ModelPaths,
    score_threshold: f32,
    nms_threshold: f32,
    inner: Option<Pipeline>,
}

impl LazyPipeline {
    fn new(cfg: &config::Config) -> Self {
        Self {
            paths: cfg.model_paths(),
            score_threshold: cfg.detection_score,
            nms_threshold: cfg.nms_threshold,
            inner: None,
        }
    }
}

impl FaceExtractor for LazyPipeline {
    fn extract(&mut self, img: &DynamicImage) -> Result<Vec<FaceEmbedding>> {
        if self.inner.is_none() {
            let pipeline = Pipeline::new(&self.paths, self.score_threshold, self.nms_threshold)
                .context("Failed to initialize face recognition pipeline")?;
            self.inner = Some(pipeline);
        }
        self.inner
            .as_mut()
            .context("face recognition pipeline unavailable")?
            .extract(img)
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;
    let mut service = FaceService::from_config(LazyPipeline::new(&cfg), &cfg);

    match cli.command {
        Commands::Add { name, image } => add(&mut service, &name, &image),
        Commands::Rename { old_name, new_name } => rename(&service, &old_name, &new_name),
        Commands::Recognize { image } => recognize(&mut service, &image),
        Commands::Import { dir } => import(&mut service, &dir),
        Commands::List => list(&service),
        Commands::Watch { frames } => watch(&cfg, &mut service, frames),
        Commands::Config => open_config(&cfg, config_path),
    }
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("Failed to open image {}", path.display()))
}

fn add(service: &mut FaceService<LazyPipeline>, name: &str, image: &Path) -> Result<()> {
    let img = open_image(image)?;
    match service.add_face(name, &img)? {
        AddOutcome::Added => {
            info!("✓ {} has been added to the database", name);
            Ok(())
        }
        AddOutcome::NoFaceDetected => {
            anyhow::bail!("No face detected in {}", image.display())
        }
        AddOutcome::MultipleFaces(n) => {
            anyhow::bail!(
                "{} faces detected in {}; use an image with exactly one face",
                n,
                image.display()
            )
        }
    }
}

fn rename(service: &FaceService<LazyPipeline>, old_name: &str, new_name: &str) -> Result<()> {
    if !service.rename_face(old_name, new_name)? {
        anyhow::bail!("Could not rename: no face named {:?}", old_name);
    }
    info!("✓ Renamed {} to {}", old_name, new_name);
    Ok(())
}

fn recognize(service: &mut FaceService<LazyPipeline>, image: &Path) -> Result<()> {
    let img = open_image(image)?;
    let recognition = service.recognize(&img)?;
    info!(
        "{}: {} (confidence {:.2})",
        image.display(),
        recognition.label(),
        recognition.confidence()
    );
    Ok(())
}

fn import(service: &mut FaceService<LazyPipeline>, dir: &Path) -> Result<()> {
    let report = service.import_dir(dir)?;
    for name in &report.added {
        info!("✓ Loaded: {}", name);
    }
    for (path, outcome) in &report.skipped {
        warn!("Skipped {}: {:?}", path.display(), outcome);
    }
    info!("Total added: {}", report.added.len());
    Ok(())
}

fn list(service: &FaceService<LazyPipeline>) -> Result<()> {
    let names = service.store().names();
    if names.is_empty() {
        info!("No faces in database yet");
        return Ok(());
    }
    info!("{} known face(s):", names.len());
    for name in names {
        info!("  {}", name);
    }
    Ok(())
}

fn watch(
    cfg: &config::Config,
    service: &mut FaceService<LazyPipeline>,
    max_frames: Option<u64>,
) -> Result<()> {
    info!("Opening camera: {}", cfg.camera);
    let mut camera = Camera::open(&cfg.camera).context("Failed to open camera")?;
    let mut snapshot = GallerySnapshot::load(service.store().clone(), cfg.refresh_every);
    info!(
        "Live recognition active with {} known face(s). Press Ctrl+C to stop.",
        snapshot.gallery().len()
    );

    let mut last_seen = Instant::now();
    let mut announced_absence = false;
    let mut last_names: Vec<String> = Vec::new();

    let mut frame_no: u64 = 0;
    while max_frames.map_or(true, |max| frame_no < max) {
        frame_no += 1;
        snapshot.tick();

        let frame = match camera.frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame {}: {}", frame_no, e);
                continue;
            }
        };
        if frame_no % u64::from(cfg.process_every) != 0 {
            continue;
        }

        let img = DynamicImage::ImageRgb8(frame);
        let results = match service.recognize_all(&img, snapshot.gallery()) {
            Ok(results) => results,
            Err(e) => {
                warn!("Frame {}: {:#}", frame_no, e);
                continue;
            }
        };

        if results.is_empty() {
            if !announced_absence && last_seen.elapsed() > NO_FACE_NOTICE {
                info!("No face detected");
                announced_absence = true;
                last_names.clear();
            }
            continue;
        }

        last_seen = Instant::now();
        announced_absence = false;
        let labels: Vec<String> = results.iter().map(|(_, r)| r.to_string()).collect();
        let names: Vec<String> = results.iter().map(|(_, r)| r.label().to_string()).collect();
        if names != last_names {
            for ((detection, _), label) in results.iter().zip(&labels) {
                let [x, y, w, h] = detection.bbox;
                info!(
                    "Frame {}: {} at ({:.0}, {:.0}, {:.0}x{:.0})",
                    frame_no, label, x, y, w, h
                );
            }
            last_names = names;
        }
    }

    Ok(())
}

fn open_config(cfg: &config::Config, path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    if !config_path.exists() {
        config::save_config(cfg, Some(config_path)).context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
