use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use melody_chunks::classifier::{LogisticClassifier, MelodyClassifier};
use melody_chunks::config::AppConfig;
use melody_chunks::dataset::{BatchOptions, Pipeline, process_dataset};
use melody_chunks::features::{FEATURE_NAMES, FeatureVector, extract_features};
use melody_chunks::midi::{Piece, load_piece};
use melody_chunks::segment::select_melody_track;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "melody-chunks",
    version,
    about = "Find the melody track of multi-track MIDI pieces and mark its melody-bearing chunks"
)]
struct Cli {
    /// Config file (defaults to ~/.config/melody-chunks/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment every piece of a dataset and write melody chunk ids next to each MIDI file
    Segment {
        /// Dataset root holding one directory per piece (defaults to config dataset_dir)
        dataset_dir: Option<PathBuf>,

        /// Classifier model (JSON)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Chunk duration in seconds
        #[arg(long)]
        chunk_sec: Option<f64>,

        /// Minimum fraction of the track's average active energy a melody chunk must exceed
        #[arg(long)]
        melody_threshold: Option<f64>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Recompute pieces that already have a result file
        #[arg(long)]
        force: bool,

        /// Only process pieces whose directory name contains this
        #[arg(long)]
        filter: Option<String>,
    },

    /// Show the per-track feature matrix of one MIDI file
    Features {
        /// MIDI file to analyze
        midi: PathBuf,

        /// Classifier model (JSON); adds melody probabilities
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Config: explicit file must load, default location is optional
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Segment {
            dataset_dir,
            model,
            chunk_sec,
            melody_threshold,
            jobs,
            force,
            filter,
        } => {
            // Resolve dataset root: CLI arg > config dataset_dir
            let root = match dataset_dir.or(config.dataset_dir.clone()) {
                Some(root) => root,
                None => anyhow::bail!(
                    "No dataset directory. Pass it as an argument or set dataset_dir in config."
                ),
            };

            let model_path = model.unwrap_or_else(|| config.model_path.clone());
            let classifier = LogisticClassifier::load(&model_path)
                .with_context(|| format!("Failed to load classifier {}", model_path.display()))?;

            let mut segment = config.segment;
            if let Some(c) = chunk_sec {
                segment.chunk_sec = c;
            }
            if let Some(t) = melody_threshold {
                segment.melody_threshold = t;
            }
            segment.validate().context("Invalid segmentation settings")?;
            config.features.validate().context("Invalid feature settings")?;

            let pipeline = Pipeline {
                classifier: &classifier,
                features: config.features,
                segment,
                layout: config.dataset.clone(),
            };
            let options = BatchOptions {
                force,
                filter,
                workers: if jobs > 0 { jobs } else { config.resolve_workers() },
            };

            let result = process_dataset(&root, &pipeline, &options).context("Segmentation failed")?;
            println!(
                "Segmentation complete: {} segmented, {} skipped, {} failed",
                result.processed, result.skipped, result.failed
            );
            if !result.failures.is_empty() {
                println!();
                println!("Failures:");
                for f in &result.failures {
                    println!("  {:<20} [{}] {}", f.piece, f.class, f.cause);
                }
            }
        }

        Commands::Features { midi, model, json } => {
            config.features.validate().context("Invalid feature settings")?;
            let piece = load_piece(&midi)
                .with_context(|| format!("Failed to read {}", midi.display()))?;
            let rows = extract_features(&piece, &config.features)
                .context("Feature extraction failed")?;

            let probabilities = match model {
                Some(path) => {
                    let classifier = LogisticClassifier::load(&path)
                        .with_context(|| format!("Failed to load classifier {}", path.display()))?;
                    Some(classifier.predict_matrix(&rows).context("Classification failed")?)
                }
                None => None,
            };

            if json {
                let report = build_report(&piece, &rows, probabilities.as_deref());
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_feature_table(&piece, &rows, probabilities.as_deref());
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct FeatureValue {
    name: &'static str,
    value: f64,
}

#[derive(Serialize)]
struct TrackReport<'a> {
    index: usize,
    name: &'a str,
    program: u8,
    family: &'static str,
    notes: usize,
    /// In feature vector order.
    features: Vec<FeatureValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    melody_probability: Option<f64>,
}

#[derive(Serialize)]
struct FeatureReport<'a> {
    duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    melody_track: Option<usize>,
    tracks: Vec<TrackReport<'a>>,
}

fn build_report<'a>(piece: &'a Piece, rows: &[FeatureVector], probs: Option<&[f64]>) -> FeatureReport<'a> {
    let tracks = piece
        .tracks()
        .iter()
        .zip(rows)
        .enumerate()
        .map(|(i, (track, row))| TrackReport {
            index: i,
            name: &track.name,
            program: track.program,
            family: track.family().label(),
            notes: track.note_count(),
            features: FEATURE_NAMES
                .iter()
                .zip(row.to_array())
                .map(|(&name, value)| FeatureValue { name, value })
                .collect(),
            melody_probability: probs.map(|p| p[i]),
        })
        .collect();

    FeatureReport {
        duration_secs: piece.duration(),
        melody_track: probs.and_then(select_melody_track),
        tracks,
    }
}

/// Print own and others' descriptors per track, melody track starred.
fn print_feature_table(piece: &Piece, rows: &[FeatureVector], probs: Option<&[f64]>) {
    let melody = probs.and_then(select_melody_track);

    println!("Duration: {:.2}s, {} tracks", piece.duration(), piece.track_count());
    println!();
    println!(
        "{:>3} {:<18} {:<12} {:>5} {:>6}  {:>5} {:>5} {:>5} {:>5} {:>5} {:>5} {:>5} {:>5} {:>5}",
        "#", "Track", "Family", "Notes", "P(mel)",
        "Poly", "NDen", "DDen", "PMu", "PSd", "VMu", "VSd", "IMu", "ISd"
    );
    println!("{}", "-".repeat(112));

    for (i, (track, row)) in piece.tracks().iter().zip(rows).enumerate() {
        let name: String = if track.name.chars().count() > 18 {
            format!("{}...", track.name.chars().take(15).collect::<String>())
        } else {
            track.name.clone()
        };
        let prob = match probs {
            Some(p) => format!("{:.3}", p[i]),
            None => "-".to_string(),
        };
        let marker = if melody == Some(i) { "*" } else { " " };

        for (label, d) in [("", &row.own), ("others", &row.others)] {
            let (idx, name, family, notes, prob) = if label.is_empty() {
                (
                    format!("{}{}", marker, i),
                    name.clone(),
                    track.family().to_string(),
                    track.note_count().to_string(),
                    prob.clone(),
                )
            } else {
                (String::new(), format!("  ({})", label), String::new(), String::new(), String::new())
            };
            println!(
                "{:>3} {:<18} {:<12} {:>5} {:>6}  {:>5.2} {:>5.2} {:>5.2} {:>5.1} {:>5.1} {:>5.1} {:>5.1} {:>5.2} {:>5.2}",
                idx, name, family, notes, prob,
                d.polyphony_rate, d.note_density, d.duration_density,
                d.pitch_mean, d.pitch_std, d.velocity_mean, d.velocity_std,
                d.ioi_mean, d.ioi_std,
            );
        }
    }

    println!();
    println!("Poly=Polyphony (others: activity-weighted note density)  NDen=Notes/s  DDen=Duration density");
    println!("PMu/PSd=Pitch mean/std  VMu/VSd=Velocity mean/std  IMu/ISd=Inter-onset interval mean/std (s)");
    if melody.is_some() {
        println!("* = predicted melody track");
    }
}
