//! Dataset batch: discover piece directories, segment each one on a worker
//! pool, and write one chunk-id file per piece next to its MIDI file.
//!
//! Pieces never share state. A failing piece is logged and counted, and the
//! batch carries on with the rest.

use crate::ErrorClass;
use crate::classifier::MelodyClassifier;
use crate::features::{FeatureConfig, FeatureError, extract_features};
use crate::midi::{LoadError, load_piece};
use crate::segment::{MelodySelection, SegmentConfig, SegmentError, segment_piece};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Dataset directory not found: {0}")]
    MissingRoot(PathBuf),
    #[error("Invalid piece pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("IO error: {0}")]
    Io(#[from] walkdir::Error),
    #[error("Worker pool error: {0}")]
    ThreadPool(String),
}

#[derive(Error, Debug)]
pub enum PieceError {
    #[error("MIDI load error: {0}")]
    Load(#[from] LoadError),
    #[error("Feature extraction failed: {0}")]
    Features(#[from] FeatureError),
    #[error("Segmentation failed: {0}")]
    Segment(#[from] SegmentError),
    #[error("Failed to write result: {0}")]
    Write(#[from] std::io::Error),
}

impl PieceError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Load(_) | Self::Write(_) => ErrorClass::Input,
            Self::Features(e) => e.class(),
            Self::Segment(e) => e.class(),
        }
    }
}

/// How pieces are laid out inside the dataset root.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatasetLayout {
    /// Regex a directory name must match to count as a piece.
    pub piece_pattern: String,
    /// Combined MIDI file inside each piece directory.
    pub midi_filename: String,
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            piece_pattern: crate::DEFAULT_PIECE_PATTERN.to_string(),
            midi_filename: crate::DEFAULT_MIDI_FILENAME.to_string(),
        }
    }
}

/// A piece directory found under the dataset root.
#[derive(Debug, Clone, PartialEq)]
pub struct PieceDir {
    pub name: String,
    pub dir: PathBuf,
}

/// List piece directories directly under `root`, sorted by name.
/// Entries that are not directories or don't match the pattern are skipped.
pub fn discover_pieces(root: &Path, layout: &DatasetLayout) -> Result<Vec<PieceDir>, DatasetError> {
    if !root.is_dir() {
        return Err(DatasetError::MissingRoot(root.to_path_buf()));
    }
    let pattern = Regex::new(&layout.piece_pattern)?;

    let mut pieces = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !entry.file_type().is_dir() || !pattern.is_match(&name) {
            log::debug!("Skipping {}", entry.path().display());
            continue;
        }
        pieces.push(PieceDir {
            name,
            dir: entry.into_path(),
        });
    }
    Ok(pieces)
}

/// Result file name for a chunk length (seconds truncated to an integer).
pub fn output_filename(chunk_sec: f64) -> String {
    format!("melody_chunks_ids_with_interval_{}_sec.json", chunk_sec.trunc() as i64)
}

/// Write `ids` as a JSON array, replacing `path` atomically.
pub fn write_chunk_ids(path: &Path, ids: &[usize]) -> std::io::Result<()> {
    let json = serde_json::to_string(ids)?;
    let file_name = path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    std::fs::write(&tmp, json)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        std::fs::remove_file(&tmp).ok();
        return Err(e);
    }
    Ok(())
}

/// Everything one piece needs: the injected classifier plus settings.
pub struct Pipeline<'a> {
    pub classifier: &'a dyn MelodyClassifier,
    pub features: FeatureConfig,
    pub segment: SegmentConfig,
    pub layout: DatasetLayout,
}

/// Outcome of one successfully processed piece.
#[derive(Debug)]
pub struct PieceOutcome {
    pub selection: MelodySelection,
    pub output: PathBuf,
}

impl Pipeline<'_> {
    pub fn output_path(&self, piece: &PieceDir) -> PathBuf {
        piece.dir.join(output_filename(self.segment.chunk_sec))
    }

    /// Load -> extract features -> segment -> write. Nothing is written on failure.
    pub fn run_piece(&self, piece: &PieceDir) -> Result<PieceOutcome, PieceError> {
        let midi_path = piece.dir.join(&self.layout.midi_filename);
        log::debug!("Processing {}", midi_path.display());

        let parsed = load_piece(&midi_path)?;
        let features = extract_features(&parsed, &self.features)?;
        let selection = segment_piece(&parsed, &features, self.classifier, &self.segment)?;

        let output = self.output_path(piece);
        write_chunk_ids(&output, selection.chunk_ids())?;

        Ok(PieceOutcome { selection, output })
    }
}

/// Batch knobs that don't affect per-piece results.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Recompute pieces whose result file already exists.
    pub force: bool,
    /// Only process pieces whose name contains this (case-insensitive).
    pub filter: Option<String>,
    /// Worker threads (must be >= 1).
    pub workers: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PieceFailure {
    pub piece: String,
    pub class: ErrorClass,
    pub cause: String,
}

#[derive(Debug, Default)]
pub struct BatchResult {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub failures: Vec<PieceFailure>,
}

/// Segment every piece under `root` on a pool of `options.workers` threads.
pub fn process_dataset(
    root: &Path,
    pipeline: &Pipeline,
    options: &BatchOptions,
) -> Result<BatchResult, DatasetError> {
    let mut result = BatchResult::default();
    let discovered = discover_pieces(root, &pipeline.layout)?;

    let filter = options.filter.as_ref().map(|f| f.to_lowercase());
    let mut pieces = Vec::with_capacity(discovered.len());
    for piece in discovered {
        if let Some(f) = &filter {
            if !piece.name.to_lowercase().contains(f) {
                continue;
            }
        }
        if !options.force && pipeline.output_path(&piece).exists() {
            log::debug!("Already segmented: {}", piece.name);
            result.skipped += 1;
            continue;
        }
        pieces.push(piece);
    }

    if pieces.is_empty() {
        log::info!("No pieces to process");
        return Ok(result);
    }

    let workers = options.workers.max(1);
    log::info!("Processing {} pieces with {} workers", pieces.len(), workers);

    let pb = ProgressBar::new(pieces.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| DatasetError::ThreadPool(e.to_string()))?;

    let outcomes: Vec<(&PieceDir, Result<PieceOutcome, PieceError>)> = pool.install(|| {
        pieces
            .par_iter()
            .map(|piece| {
                let outcome = pipeline.run_piece(piece);
                pb.inc(1);
                (piece, outcome)
            })
            .collect()
    });

    for (piece, outcome) in outcomes {
        match outcome {
            Ok(done) => {
                log::info!(
                    "{}: melody track {}, chunks {:?}",
                    piece.name,
                    done.selection.track,
                    done.selection.chunk_ids()
                );
                result.processed += 1;
            }
            Err(e) => {
                log::warn!("{}: {} ({})", piece.name, e, e.class());
                result.failed += 1;
                result.failures.push(PieceFailure {
                    piece: piece.name.clone(),
                    class: e.class(),
                    cause: e.to_string(),
                });
            }
        }
    }

    pb.finish_with_message(format!("Done: {} segmented, {} failed", result.processed, result.failed));

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierError;
    use crate::features::FeatureVector;
    use crate::midi::loader::testing::{TrackSpec, build_smf, secs};
    use tempfile::TempDir;

    /// Prefers the densest track.
    struct DensityStub;

    impl MelodyClassifier for DensityStub {
        fn predict_melody_probability(&self, f: &FeatureVector) -> Result<f64, ClassifierError> {
            Ok(f.own.note_density / (1.0 + f.own.note_density))
        }
    }

    /// Silent first half then dense and loud lead, steady bass throughout; 4s long.
    fn two_halves_smf() -> Vec<u8> {
        let lead = (0..16)
            .map(|i| {
                let start = 2.0 + i as f64 * 0.125;
                (72, 100, secs(start), secs(start + 0.125))
            })
            .collect();
        let bass = (0..8)
            .map(|i| {
                let start = i as f64 * 0.5;
                (40, 64, secs(start), secs(start + 0.5))
            })
            .collect();
        build_smf(
            &[TrackSpec::new("Lead", 0, 80, lead), TrackSpec::new("Bass", 1, 33, bass)],
            None,
        )
    }

    fn pipeline(chunk_sec: f64) -> Pipeline<'static> {
        Pipeline {
            classifier: &DensityStub,
            features: FeatureConfig::default(),
            segment: SegmentConfig {
                chunk_sec,
                ..SegmentConfig::default()
            },
            layout: DatasetLayout::default(),
        }
    }

    fn add_piece(root: &Path, name: &str, midi: &[u8]) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(crate::DEFAULT_MIDI_FILENAME), midi).unwrap();
        dir
    }

    fn options() -> BatchOptions {
        BatchOptions {
            workers: 2,
            ..BatchOptions::default()
        }
    }

    #[test]
    fn test_output_filename_truncates_seconds() {
        assert_eq!(output_filename(10.0), "melody_chunks_ids_with_interval_10_sec.json");
        assert_eq!(output_filename(2.5), "melody_chunks_ids_with_interval_2_sec.json");
    }

    #[test]
    fn test_discover_filters_by_pattern_and_kind() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("Track00002")).unwrap();
        std::fs::create_dir(tmp.path().join("Track00001")).unwrap();
        std::fs::create_dir(tmp.path().join("metadata")).unwrap();
        std::fs::write(tmp.path().join("Track_notes.txt"), "not a dir").unwrap();

        let pieces = discover_pieces(tmp.path(), &DatasetLayout::default()).unwrap();
        let names: Vec<&str> = pieces.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Track00001", "Track00002"]);
    }

    #[test]
    fn test_missing_root() {
        let err = discover_pieces(Path::new("/nonexistent/slakh"), &DatasetLayout::default()).unwrap_err();
        assert!(matches!(err, DatasetError::MissingRoot(_)));
    }

    #[test]
    fn test_bad_pattern() {
        let tmp = TempDir::new().unwrap();
        let layout = DatasetLayout {
            piece_pattern: "Track(".into(),
            ..DatasetLayout::default()
        };
        assert!(matches!(discover_pieces(tmp.path(), &layout), Err(DatasetError::Pattern(_))));
    }

    #[test]
    fn test_piece_end_to_end_writes_json() {
        let tmp = TempDir::new().unwrap();
        let dir = add_piece(tmp.path(), "Track00001", &two_halves_smf());
        let piece = PieceDir {
            name: "Track00001".into(),
            dir: dir.clone(),
        };

        let outcome = pipeline(1.0).run_piece(&piece).unwrap();
        assert_eq!(outcome.selection.track, 0);
        assert_eq!(outcome.output, dir.join("melody_chunks_ids_with_interval_1_sec.json"));

        let written: Vec<usize> =
            serde_json::from_str(&std::fs::read_to_string(&outcome.output).unwrap()).unwrap();
        assert_eq!(written, vec![2, 3]);
    }

    #[test]
    fn test_batch_isolates_failures() {
        let tmp = TempDir::new().unwrap();
        add_piece(tmp.path(), "Track00001", &two_halves_smf());
        let broken = add_piece(tmp.path(), "Track00002", b"not midi at all");
        // Single-track piece: others aggregation undefined
        let solo = build_smf(&[TrackSpec::new("Solo", 0, 0, vec![(60, 90, 0, secs(1.0))])], None);
        let lonely = add_piece(tmp.path(), "Track00003", &solo);
        std::fs::create_dir(tmp.path().join("Track00004")).unwrap();

        let result = process_dataset(tmp.path(), &pipeline(1.0), &options()).unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(result.failed, 3);

        let classes: Vec<(&str, ErrorClass)> = result
            .failures
            .iter()
            .map(|f| (f.piece.as_str(), f.class))
            .collect();
        assert!(classes.contains(&("Track00002", ErrorClass::Input)));
        assert!(classes.contains(&("Track00003", ErrorClass::InvalidStructure)));
        assert!(classes.contains(&("Track00004", ErrorClass::Input)));

        let name = output_filename(1.0);
        assert!(tmp.path().join("Track00001").join(&name).exists());
        assert!(!broken.join(&name).exists());
        assert!(!lonely.join(&name).exists());
    }

    #[test]
    fn test_existing_results_skipped_unless_forced() {
        let tmp = TempDir::new().unwrap();
        let dir = add_piece(tmp.path(), "Track00001", &two_halves_smf());
        let out = dir.join(output_filename(1.0));
        std::fs::write(&out, "[99]").unwrap();

        let result = process_dataset(tmp.path(), &pipeline(1.0), &options()).unwrap();
        assert_eq!((result.processed, result.skipped), (0, 1));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "[99]");

        let forced = BatchOptions {
            force: true,
            ..options()
        };
        let result = process_dataset(tmp.path(), &pipeline(1.0), &forced).unwrap();
        assert_eq!((result.processed, result.skipped), (1, 0));
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "[2,3]");
    }

    #[test]
    fn test_filter_limits_pieces() {
        let tmp = TempDir::new().unwrap();
        add_piece(tmp.path(), "Track00001", &two_halves_smf());
        add_piece(tmp.path(), "Track00002", &two_halves_smf());

        let filtered = BatchOptions {
            filter: Some("track00002".into()),
            ..options()
        };
        let result = process_dataset(tmp.path(), &pipeline(1.0), &filtered).unwrap();
        assert_eq!(result.processed, 1);
        assert!(!tmp.path().join("Track00001").join(output_filename(1.0)).exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ids.json");
        write_chunk_ids(&path, &[0, 4, 7]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[0,4,7]");
        assert!(!tmp.path().join(".ids.json.tmp").exists());
    }
}
