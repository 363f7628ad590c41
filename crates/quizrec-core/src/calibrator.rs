//! Isotonic probability calibration with a hot-reloading artifact manager
//! and a running drift monitor.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CalibrationSettings;
use crate::error::{ArtifactError, CalibrationError};
use crate::model::{ProbabilityMap, QuestionType};
use crate::statistics::{expected_calibration_error, reliability_bins, ReliabilityBin};
use crate::traits::ProbabilityCalibrator;

/// Calibration artifact format version.
pub const ARTIFACT_VERSION: &str = "1.0";

/// A fitted monotonic mapping, stored as breakpoint pairs.
///
/// Inputs outside the fitted range are clipped; between breakpoints the
/// mapping interpolates linearly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicMapping {
    #[serde(rename = "x_thresholds")]
    x: Vec<f64>,
    #[serde(rename = "y_thresholds")]
    y: Vec<f64>,
}

struct Block {
    sum: f64,
    weight: f64,
    x_min: f64,
    x_max: f64,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum / self.weight
    }
}

impl IsotonicMapping {
    /// Fit with pool-adjacent-violators on `(probability, is_true_class)` pairs.
    pub fn fit(probabilities: &[f64], labels: &[bool]) -> Result<Self, CalibrationError> {
        if probabilities.len() != labels.len() {
            return Err(CalibrationError::LengthMismatch {
                probabilities: probabilities.len(),
                labels: labels.len(),
            });
        }
        if probabilities.is_empty() {
            return Err(CalibrationError::EmptyFit);
        }
        if let Some(&bad) = probabilities.iter().find(|p| !(0.0..=1.0).contains(*p)) {
            return Err(CalibrationError::OutOfRange(bad));
        }

        let mut points: Vec<(f64, f64)> = probabilities
            .iter()
            .zip(labels)
            .map(|(&p, &l)| (p, if l { 1.0 } else { 0.0 }))
            .collect();
        points.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut blocks: Vec<Block> = Vec::new();
        for (x, y) in points {
            match blocks.last_mut() {
                Some(last) if last.x_max == x => {
                    last.sum += y;
                    last.weight += 1.0;
                }
                _ => blocks.push(Block {
                    sum: y,
                    weight: 1.0,
                    x_min: x,
                    x_max: x,
                }),
            }
            while blocks.len() >= 2 && blocks[blocks.len() - 2].mean() > blocks[blocks.len() - 1].mean()
            {
                if let Some(last) = blocks.pop() {
                    if let Some(prev) = blocks.last_mut() {
                        prev.sum += last.sum;
                        prev.weight += last.weight;
                        prev.x_max = last.x_max;
                    }
                }
            }
        }

        let mut x = Vec::with_capacity(blocks.len() * 2);
        let mut y = Vec::with_capacity(blocks.len() * 2);
        for block in &blocks {
            let value = block.mean();
            x.push(block.x_min);
            y.push(value);
            if block.x_max > block.x_min {
                x.push(block.x_max);
                y.push(value);
            }
        }
        Ok(Self { x, y })
    }

    /// Build from stored breakpoints, checking they describe a valid mapping.
    pub fn from_breakpoints(x: Vec<f64>, y: Vec<f64>) -> Result<Self, String> {
        if x.is_empty() || x.len() != y.len() {
            return Err(format!("{} x thresholds but {} y thresholds", x.len(), y.len()));
        }
        if x.windows(2).any(|w| w[0] > w[1]) || y.windows(2).any(|w| w[0] > w[1]) {
            return Err("thresholds are not non-decreasing".to_string());
        }
        Ok(Self { x, y })
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.x.iter().copied().zip(self.y.iter().copied())
    }

    pub fn predict(&self, p: f64) -> f64 {
        let (Some(&lo), Some(&hi)) = (self.x.first(), self.x.last()) else {
            return p;
        };
        let p = if p.is_nan() { lo } else { p.clamp(lo, hi) };
        let idx = self.x.partition_point(|&xi| xi < p);
        if idx == 0 {
            return self.y[0];
        }
        if idx >= self.x.len() {
            return self.y[self.y.len() - 1];
        }
        let (x0, x1) = (self.x[idx - 1], self.x[idx]);
        let (y0, y1) = (self.y[idx - 1], self.y[idx]);
        if x1 == x0 {
            return y1;
        }
        y0 + (y1 - y0) * (p - x0) / (x1 - x0)
    }
}

/// One isotonic mapping per class, renormalized across classes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IsotonicCalibrator {
    mappings: BTreeMap<QuestionType, IsotonicMapping>,
    sample_count: usize,
}

impl IsotonicCalibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit one mapping for every class that appears in the probability maps.
    pub fn fit(samples: &[(ProbabilityMap, QuestionType)]) -> Result<Self, CalibrationError> {
        if samples.is_empty() {
            return Err(CalibrationError::EmptyFit);
        }
        let classes: BTreeSet<QuestionType> = samples
            .iter()
            .flat_map(|(probs, _)| probs.keys().copied())
            .collect();

        let mut calibrator = Self::new();
        for class in classes {
            let probabilities: Vec<f64> = samples
                .iter()
                .map(|(probs, _)| probs.get(&class).copied().unwrap_or(0.0))
                .collect();
            let labels: Vec<bool> = samples.iter().map(|(_, label)| *label == class).collect();
            calibrator.fit_class(class, &probabilities, &labels)?;
        }
        calibrator.sample_count = samples.len();
        tracing::info!(
            classes = calibrator.mappings.len(),
            samples = samples.len(),
            "fitted isotonic calibrator"
        );
        Ok(calibrator)
    }

    pub fn fit_class(
        &mut self,
        class: QuestionType,
        probabilities: &[f64],
        labels: &[bool],
    ) -> Result<(), CalibrationError> {
        let mapping = IsotonicMapping::fit(probabilities, labels)?;
        self.mappings.insert(class, mapping);
        self.sample_count = self.sample_count.max(probabilities.len());
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        !self.mappings.is_empty()
    }

    pub fn classes(&self) -> impl Iterator<Item = QuestionType> + '_ {
        self.mappings.keys().copied()
    }

    pub fn mapping(&self, class: QuestionType) -> Option<&IsotonicMapping> {
        self.mappings.get(&class)
    }

    /// Map each class probability through its mapping and renormalize.
    /// Unfitted calibrators return the input unchanged.
    pub fn calibrate(&self, probabilities: &ProbabilityMap) -> ProbabilityMap {
        if !self.is_fitted() {
            return probabilities.clone();
        }
        let mapped: ProbabilityMap = probabilities
            .iter()
            .map(|(&class, &p)| {
                let q = self.mappings.get(&class).map_or(p, |m| m.predict(p));
                (class, q)
            })
            .collect();
        let total: f64 = mapped.values().sum();
        if total <= 0.0 || !total.is_finite() {
            tracing::warn!("calibrated probabilities sum to {total}; returning raw probabilities");
            return probabilities.clone();
        }
        mapped.into_iter().map(|(c, p)| (c, p / total)).collect()
    }

    pub fn to_artifact(&self, ece: Option<f64>) -> CalibrationArtifact {
        CalibrationArtifact {
            version: ARTIFACT_VERSION.to_string(),
            created_at: Utc::now(),
            sample_count: self.sample_count,
            ece,
            classes: self.mappings.keys().copied().collect(),
            mappings: self.mappings.clone(),
        }
    }
}

impl ProbabilityCalibrator for IsotonicCalibrator {
    fn calibrate(&self, probabilities: &ProbabilityMap) -> ProbabilityMap {
        IsotonicCalibrator::calibrate(self, probabilities)
    }

    fn is_fitted(&self) -> bool {
        IsotonicCalibrator::is_fitted(self)
    }
}

/// On-disk form of a fitted calibrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub sample_count: usize,
    /// ECE measured on the fitting set, if computed.
    #[serde(default)]
    pub ece: Option<f64>,
    pub classes: Vec<QuestionType>,
    pub mappings: BTreeMap<QuestionType, IsotonicMapping>,
}

impl CalibrationArtifact {
    /// Write as JSON via a temporary sibling file and an atomic rename.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("failed to serialize calibration artifact")?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir)?;
        }
        let file_name = path
            .file_name()
            .with_context(|| format!("invalid artifact path: {}", path.display()))?;
        let tmp = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move calibration artifact to {}", path.display()))?;
        tracing::info!(path = %path.display(), "saved calibration artifact");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::NotFound(path.to_path_buf()));
        }
        let malformed = |reason: String| ArtifactError::Malformed {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;
        let artifact: CalibrationArtifact =
            serde_json::from_str(&content).map_err(|e| malformed(e.to_string()))?;
        for (class, mapping) in &artifact.mappings {
            IsotonicMapping::from_breakpoints(mapping.x.clone(), mapping.y.clone())
                .map_err(|reason| malformed(format!("{class}: {reason}")))?;
        }
        Ok(artifact)
    }

    pub fn into_calibrator(self) -> IsotonicCalibrator {
        IsotonicCalibrator {
            mappings: self.mappings,
            sample_count: self.sample_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

struct ManagerState {
    calibrator: Arc<IsotonicCalibrator>,
    fingerprint: Option<Fingerprint>,
}

/// Serves a calibrator backed by an artifact file, reloading it whenever the
/// file's modification time or size changes. A failed reload keeps the
/// previous mapping and is retried on the next call.
pub struct CalibrationManager {
    path: PathBuf,
    state: RwLock<ManagerState>,
}

impl CalibrationManager {
    /// Manager that starts unfitted (identity) if the artifact is missing or
    /// unreadable.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let manager = Self {
            path: path.into(),
            state: RwLock::new(ManagerState {
                calibrator: Arc::new(IsotonicCalibrator::new()),
                fingerprint: None,
            }),
        };
        manager.reload_if_needed();
        manager
    }

    /// Manager whose artifact must load now.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let path = path.into();
        let fingerprint = Fingerprint::of(&path);
        let artifact = CalibrationArtifact::load(&path)?;
        tracing::info!(
            path = %path.display(),
            version = %artifact.version,
            classes = artifact.classes.len(),
            "loaded calibration artifact"
        );
        Ok(Self {
            path,
            state: RwLock::new(ManagerState {
                calibrator: Arc::new(artifact.into_calibrator()),
                fingerprint,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reload if the artifact changed since the last successful load.
    /// Returns `true` when a new mapping was installed.
    pub fn reload_if_needed(&self) -> bool {
        let Some(current) = Fingerprint::of(&self.path) else {
            return false;
        };
        if self.read_state().fingerprint == Some(current) {
            return false;
        }
        match CalibrationArtifact::load(&self.path) {
            Ok(artifact) => {
                let version = artifact.version.clone();
                let calibrator = Arc::new(artifact.into_calibrator());
                let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
                state.calibrator = calibrator;
                state.fingerprint = Some(current);
                tracing::info!(path = %self.path.display(), %version, "reloaded calibration artifact");
                true
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "calibration reload failed; keeping previous mapping"
                );
                false
            }
        }
    }

    /// Snapshot of the calibrator currently in use.
    pub fn current(&self) -> Arc<IsotonicCalibrator> {
        Arc::clone(&self.read_state().calibrator)
    }
}

impl ProbabilityCalibrator for CalibrationManager {
    fn calibrate(&self, probabilities: &ProbabilityMap) -> ProbabilityMap {
        self.reload_if_needed();
        self.current().calibrate(probabilities)
    }

    fn is_fitted(&self) -> bool {
        self.current().is_fitted()
    }
}

/// Accumulates labelled feedback and tracks the running ECE.
#[derive(Debug, Clone)]
pub struct CalibrationMonitor {
    bins: usize,
    max_ece: f64,
    samples: Vec<(f64, bool)>,
}

impl CalibrationMonitor {
    pub fn new(settings: &CalibrationSettings) -> Self {
        Self {
            bins: settings.ece_bins.max(1),
            max_ece: settings.max_ece,
            samples: Vec::new(),
        }
    }

    /// Record one prediction's confidence and whether it turned out correct.
    pub fn record(&mut self, confidence: f64, correct: bool) {
        self.samples.push((confidence.clamp(0.0, 1.0), correct));
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn ece(&self) -> f64 {
        expected_calibration_error(&self.samples, self.bins)
    }

    pub fn reliability(&self) -> Vec<ReliabilityBin> {
        reliability_bins(&self.samples, self.bins)
    }

    /// Whether the running ECE exceeds the configured ceiling.
    pub fn is_drifting(&self) -> bool {
        let ece = self.ece();
        let drifting = !self.samples.is_empty() && ece > self.max_ece;
        if drifting {
            tracing::warn!(ece, max_ece = self.max_ece, "calibration drift detected");
        }
        drifting
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
