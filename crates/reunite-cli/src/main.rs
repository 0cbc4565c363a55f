use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reunite_core::{
    Comparator, ExtractionResult, ExtractionWorker, Extractor, FaceExtractor, Location, MatchDecision, MatchEngine,
    ModelHandle, ModelStatus, Photo, UploadCandidate, UploadOutcome,
};
use reunite_notify::{DispatchSummary, LogNotifier, OutboxNotifier};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod gallery;

use config::Config;
use gallery::Gallery;

#[derive(Parser)]
#[command(name = "reunite", about = "Match found-child photos against missing-child reports")]
struct Cli {
    /// Directory holding the ONNX models (overrides REUNITE_MODEL_DIR)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Similarity a candidate must exceed (overrides REUNITE_SIMILARITY_THRESHOLD)
    #[arg(long, global = true)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract the first face's embedding from an image
    Extract {
        image: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare the first faces of two images
    Compare { a: PathBuf, b: PathBuf },
    /// Search the gallery for the first report matching an uploaded photo
    Match {
        image: PathBuf,
        /// Gallery manifest (TOML)
        #[arg(short, long)]
        gallery: PathBuf,
        #[arg(long, default_value = "anonymous")]
        uploader_name: String,
        #[arg(long, default_value = "")]
        uploader_contact: String,
        #[arg(long)]
        latitude: Option<f64>,
        #[arg(long)]
        longitude: Option<f64>,
        #[arg(long)]
        address: Option<String>,
        /// Skip reports already marked found
        #[arg(long)]
        missing_only: bool,
        #[arg(long)]
        json: bool,
    },
    /// Precompute embeddings for gallery reports that lack one
    Index {
        #[arg(short, long)]
        gallery: PathBuf,
    },
    /// Show configuration and model availability
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    if let Some(threshold) = cli.threshold {
        config.similarity_threshold = config::checked_threshold(threshold, "--threshold");
    }

    let model = ModelHandle::onnx(config.model_paths());

    match cli.command {
        Commands::Extract { image, json } => cmd_extract(&config, model, &image, json),
        Commands::Compare { a, b } => cmd_compare(&config, model, &a, &b),
        Commands::Match {
            image,
            gallery,
            uploader_name,
            uploader_contact,
            latitude,
            longitude,
            address,
            missing_only,
            json,
        } => {
            let location = Location {
                latitude,
                longitude,
                address,
            };
            let upload = UploadCandidate::new(Photo::File(image), uploader_name, uploader_contact, location);
            cmd_match(&config, model, upload, &gallery, missing_only, json)
        }
        Commands::Index { gallery } => cmd_index(&config, model, &gallery),
        Commands::Status => cmd_status(&config, model),
    }
}

fn spawn_worker(config: &Config, model: ModelHandle) -> Result<ExtractionWorker> {
    ExtractionWorker::spawn(FaceExtractor::new(model), config.extract_timeout()).context("starting extraction worker")
}

fn extract_file(extractor: &impl Extractor, path: &Path) -> Result<ExtractionResult> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    extractor
        .extract(&bytes)
        .with_context(|| format!("extracting {}", path.display()))
}

fn cmd_extract(config: &Config, model: ModelHandle, image: &Path, json: bool) -> Result<()> {
    let worker = spawn_worker(config, model)?;
    let result = extract_file(&worker, image)?;

    if json {
        let value = match &result {
            ExtractionResult::NoFaceFound => serde_json::json!({ "face": false }),
            ExtractionResult::Face {
                embedding,
                estimated_age,
            } => serde_json::json!({
                "face": true,
                "estimated_age": estimated_age,
                "embedding": embedding,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match result {
        ExtractionResult::NoFaceFound => println!("No face found"),
        ExtractionResult::Face {
            embedding,
            estimated_age,
        } => {
            println!("Face found: {}-d embedding", embedding.dim());
            if let Some(age) = estimated_age {
                println!("Estimated age: {age:.0}");
            }
        }
    }
    Ok(())
}

fn cmd_compare(config: &Config, model: ModelHandle, a: &Path, b: &Path) -> Result<()> {
    let worker = spawn_worker(config, model)?;
    let first = extract_file(&worker, a)?;
    let second = extract_file(&worker, b)?;

    let comparator = Comparator::new(config.similarity_threshold);
    let comparison = comparator.compare(first.embedding(), second.embedding());
    match comparison.score() {
        Some(score) => {
            let verdict = if comparison.is_match() { "match" } else { "no match" };
            println!("Similarity: {score:.4} ({verdict}, threshold {:.2})", comparator.threshold());
        }
        None => println!("Not comparable: a face is missing from one of the images"),
    }
    Ok(())
}

fn cmd_match(
    config: &Config,
    model: ModelHandle,
    mut upload: UploadCandidate,
    gallery_path: &Path,
    missing_only: bool,
    json: bool,
) -> Result<()> {
    let gallery = Gallery::load(gallery_path)?;
    let records = gallery.records(missing_only);
    tracing::info!(candidates = records.len(), upload = %upload.id, "matching upload");

    let engine = MatchEngine::new(spawn_worker(config, model)?, Comparator::new(config.similarity_threshold));
    let outcome = engine.process_upload(&mut upload, &records).context("processing upload")?;

    let dispatched = match outcome.decision() {
        Some(decision) if decision.is_match() => Some(dispatch(config, decision, &upload)?),
        _ => None,
    };

    if json {
        let value = match &outcome {
            UploadOutcome::NoFaceFound => serde_json::json!({ "upload_id": upload.id, "face": false }),
            UploadOutcome::Searched(report) => serde_json::json!({
                "upload_id": upload.id,
                "face": true,
                "estimated_age": upload.estimated_age,
                "decision": report.decision,
                "examined": report.examined,
                "skipped": report.skipped.len(),
                "notified": dispatched.as_ref().map(|d| &d.delivered),
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    match &outcome {
        UploadOutcome::NoFaceFound => println!("No face found in uploaded photo"),
        UploadOutcome::Searched(report) => {
            match &report.decision {
                MatchDecision::NoMatch => println!("No match among {} report(s)", report.examined),
                MatchDecision::Matched { record, score } => {
                    println!("Match: report {} ({}), similarity {score:.2}", record.id, record.child_name);
                }
            }
            for skipped in &report.skipped {
                println!("  skipped report {}: {:?}", skipped.record_id, skipped.reason);
            }
            if let Some(summary) = &dispatched {
                println!("Notified: {:?}", summary.delivered);
            }
        }
    }
    Ok(())
}

fn dispatch(config: &Config, decision: &MatchDecision, upload: &UploadCandidate) -> Result<DispatchSummary> {
    let notice_config = config.notice_config();
    let summary = match &config.outbox_dir {
        Some(dir) => reunite_notify::notify(&OutboxNotifier::new(dir)?, decision, upload, &notice_config)?,
        None => reunite_notify::notify(&LogNotifier, decision, upload, &notice_config)?,
    };
    Ok(summary)
}

fn cmd_index(config: &Config, model: ModelHandle, gallery_path: &Path) -> Result<()> {
    let mut gallery = Gallery::load(gallery_path)?;
    let worker = spawn_worker(config, model)?;

    let pending: Vec<(usize, PathBuf)> = gallery
        .entries()
        .iter()
        .enumerate()
        .filter(|(_, e)| e.embedding.is_none())
        .filter_map(|(i, e)| gallery.photo_path(e).map(|p| (i, p)))
        .collect();

    let mut indexed = 0;
    for (i, photo) in pending {
        let id = gallery.entries()[i].id;
        let bytes = match std::fs::read(&photo) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(report = id, path = %photo.display(), error = %e, "photo unreadable");
                continue;
            }
        };
        match worker.extract(&bytes) {
            Ok(ExtractionResult::Face { embedding, .. }) => {
                gallery.entries_mut()[i].embedding = Some(embedding);
                indexed += 1;
            }
            Ok(ExtractionResult::NoFaceFound) => tracing::warn!(report = id, "no face in report photo"),
            Err(e) if e.is_fatal() => bail!("indexing stopped at report {id}: {e}"),
            Err(e) => tracing::warn!(report = id, error = %e, "extraction failed"),
        }
    }

    if indexed > 0 {
        gallery.save()?;
    }
    println!("Indexed {indexed} report(s) in {}", gallery.path().display());
    Ok(())
}

fn cmd_status(config: &Config, model: ModelHandle) -> Result<()> {
    let paths = config.model_paths();
    println!("Model directory: {}", config.model_dir.display());
    for path in [Some(&paths.detector), Some(&paths.recognizer), paths.age.as_ref()]
        .into_iter()
        .flatten()
    {
        let state = if path.exists() { "present" } else { "missing" };
        println!("  {}: {state}", path.display());
    }
    println!("Similarity threshold: {:.2}", config.similarity_threshold);
    println!("Extraction timeout: {}s", config.extract_timeout_secs);
    match &config.outbox_dir {
        Some(dir) => println!("Notices: outbox {}", dir.display()),
        None => println!("Notices: log"),
    }

    // Forces the one-time load.
    let _ = model.get();
    match model.status() {
        ModelStatus::Ready => println!("Models: ready"),
        ModelStatus::Unavailable(reason) => println!("Models: unavailable ({reason})"),
        ModelStatus::NotLoaded => println!("Models: not loaded"),
    }
    Ok(())
}
