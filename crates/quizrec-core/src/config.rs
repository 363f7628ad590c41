//! Pipeline configuration.
//!
//! Every field is optional in the TOML file; missing values fall back to the
//! defaults below.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::QuestionType;

/// Top-level quizrec configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    /// Per-rule overrides keyed by rule name.
    #[serde(default)]
    pub rules: HashMap<String, RuleOverride>,
    #[serde(default)]
    pub paths: ArtifactPaths,
    #[serde(default)]
    pub parsing: ParserConfig,
    #[serde(default)]
    pub calibration: CalibrationSettings,
    /// Max documents processed concurrently by the batch processor.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            rules: HashMap::new(),
            paths: ArtifactPaths::default(),
            parsing: ParserConfig::default(),
            calibration: CalibrationSettings::default(),
            parallelism: default_parallelism(),
        }
    }
}

fn default_parallelism() -> usize {
    4
}

/// Confidence floors applied to final results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Results below this are flagged `is_low_confidence`.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Per-type floors below which a result `needs_review`.
    #[serde(default = "default_review_thresholds")]
    pub review: BTreeMap<QuestionType, f64>,
    /// Floor for types missing from `review`.
    #[serde(default = "default_review_fallback")]
    pub review_fallback: f64,
}

impl ThresholdConfig {
    pub fn review_threshold(&self, question_type: QuestionType) -> f64 {
        self.review
            .get(&question_type)
            .copied()
            .unwrap_or(self.review_fallback)
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            review: default_review_thresholds(),
            review_fallback: default_review_fallback(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.4
}
fn default_review_fallback() -> f64 {
    0.5
}
fn default_review_thresholds() -> BTreeMap<QuestionType, f64> {
    BTreeMap::from([
        (QuestionType::SingleChoice, 0.55),
        (QuestionType::MultipleChoice, 0.55),
        (QuestionType::TrueFalse, 0.55),
        (QuestionType::FillBlank, 0.50),
        (QuestionType::FreeResponse, 0.50),
    ])
}

/// Runtime override for one rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOverride {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Locations of the statistical model and calibration artifacts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub calibration_path: Option<PathBuf>,
}

/// Layout parser tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Shortest final line accepted as an unmarked free-response answer.
    #[serde(default = "default_fr_min")]
    pub free_response_answer_min_len: usize,
    /// Longest final line accepted as an unmarked free-response answer.
    #[serde(default = "default_fr_max")]
    pub free_response_answer_max_len: usize,
    /// Character window in which quiz phrasing alone opens a new question.
    #[serde(default = "default_phrasing_min")]
    pub phrasing_boundary_min_len: usize,
    #[serde(default = "default_phrasing_max")]
    pub phrasing_boundary_max_len: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            free_response_answer_min_len: default_fr_min(),
            free_response_answer_max_len: default_fr_max(),
            phrasing_boundary_min_len: default_phrasing_min(),
            phrasing_boundary_max_len: default_phrasing_max(),
        }
    }
}

fn default_fr_min() -> usize {
    2
}
fn default_fr_max() -> usize {
    80
}
fn default_phrasing_min() -> usize {
    50
}
fn default_phrasing_max() -> usize {
    500
}

/// Calibration monitoring settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Number of equal-width confidence bins used for ECE.
    #[serde(default = "default_ece_bins")]
    pub ece_bins: usize,
    /// ECE above this is reported as calibration drift.
    #[serde(default = "default_max_ece")]
    pub max_ece: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            ece_bins: default_ece_bins(),
            max_ece: default_max_ece(),
        }
    }
}

fn default_ece_bins() -> usize {
    10
}
fn default_max_ece() -> f64 {
    0.1
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let var_name = &result[start + 2..start + end];
        let value = std::env::var(var_name).unwrap_or_default();
        result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
    }
    result
}

fn resolve_path(path: &Path) -> PathBuf {
    PathBuf::from(resolve_env_vars(&path.to_string_lossy()))
}

/// Parse a TOML string into a `PipelineConfig`.
pub fn parse_config_str(content: &str) -> Result<PipelineConfig> {
    toml::from_str(content).context("failed to parse quizrec config")
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `quizrec.toml` in the current directory
/// 2. `~/.config/quizrec/config.toml`
///
/// Environment variable overrides: `QUIZREC_MODEL_PATH`, `QUIZREC_CALIBRATION_PATH`.
pub fn load_config() -> Result<PipelineConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<PipelineConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("quizrec.toml");
            if local.exists() {
                Some(local)
            } else {
                config_dir()
                    .map(|dir| dir.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<PipelineConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    if let Ok(model) = std::env::var("QUIZREC_MODEL_PATH") {
        config.paths.model_path = Some(PathBuf::from(model));
    }
    if let Ok(calibration) = std::env::var("QUIZREC_CALIBRATION_PATH") {
        config.paths.calibration_path = Some(PathBuf::from(calibration));
    }

    config.paths.model_path = config.paths.model_path.as_deref().map(resolve_path);
    config.paths.calibration_path = config.paths.calibration_path.as_deref().map(resolve_path);

    tracing::debug!(?config.paths, "loaded quizrec config");
    Ok(config)
}

fn config_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("quizrec"))
}
