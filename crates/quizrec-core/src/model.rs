//! Core data model types for quizrec.
//!
//! These are the data contracts shared by every pipeline stage: the fragments
//! an upstream reader produces, the question records the parser emits, and the
//! classification results handed to downstream consumers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::QuestionFeatures;

/// Pedagogical question type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    TrueFalse,
    FillBlank,
    #[serde(alias = "subjective")]
    FreeResponse,
    Unknown,
}

impl QuestionType {
    /// The five recognizable types, excluding `Unknown`.
    pub const KNOWN: [QuestionType; 5] = [
        QuestionType::SingleChoice,
        QuestionType::MultipleChoice,
        QuestionType::TrueFalse,
        QuestionType::FillBlank,
        QuestionType::FreeResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::SingleChoice => "single_choice",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::FillBlank => "fill_blank",
            QuestionType::FreeResponse => "free_response",
            QuestionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "single_choice" | "single" => Ok(QuestionType::SingleChoice),
            "multiple_choice" | "multiple" | "multi" => Ok(QuestionType::MultipleChoice),
            "true_false" | "tf" | "judge" => Ok(QuestionType::TrueFalse),
            "fill_blank" | "fill_in_blank" | "blank" => Ok(QuestionType::FillBlank),
            "free_response" | "subjective" | "short_answer" => Ok(QuestionType::FreeResponse),
            "unknown" => Ok(QuestionType::Unknown),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

/// Class → probability map. Ordered so serialized output is stable.
pub type ProbabilityMap = BTreeMap<QuestionType, f64>;

/// Arg-max over a probability map.
///
/// Ties go to the type that sorts first. Returns `None` for an empty map.
pub fn arg_max(probabilities: &ProbabilityMap) -> Option<(QuestionType, f64)> {
    probabilities
        .iter()
        .fold(None, |best: Option<(QuestionType, f64)>, (&ty, &p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((ty, p)),
        })
}

/// Axis-aligned bounding box of a fragment on its source page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

/// One atomic unit of extracted document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFragment {
    /// Reader-assigned kind ("text", "table_row", "ocr_line", ...).
    #[serde(rename = "type", default = "default_fragment_kind")]
    pub kind: String,
    pub text: String,
    pub line_no: u32,
    /// Recognition confidence in [0,1]; present only for OCR-sourced text.
    #[serde(default)]
    pub ocr_conf: Option<f64>,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

fn default_fragment_kind() -> String {
    "text".to_string()
}

impl TextFragment {
    /// Plain text fragment without OCR provenance.
    pub fn new(text: impl Into<String>, line_no: u32) -> Self {
        Self {
            kind: default_fragment_kind(),
            text: text.into(),
            line_no,
            ocr_conf: None,
            bbox: None,
        }
    }

    /// Fragment produced by OCR with the given recognition confidence.
    pub fn ocr(text: impl Into<String>, line_no: u32, confidence: f64) -> Self {
        Self {
            kind: "ocr_line".to_string(),
            ocr_conf: Some(confidence.clamp(0.0, 1.0)),
            ..Self::new(text, line_no)
        }
    }
}

/// A document as handed over by the upstream reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInput {
    pub source_id: String,
    /// Fragments in canonical reading order.
    pub fragments: Vec<TextFragment>,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl DocumentInput {
    pub fn new(source_id: impl Into<String>, fragments: Vec<TextFragment>) -> Self {
        Self {
            source_id: source_id.into(),
            fragments,
            meta: BTreeMap::new(),
        }
    }

    /// Convenience constructor: one fragment per line, numbered from 1.
    pub fn from_lines<S: AsRef<str>>(source_id: impl Into<String>, lines: &[S]) -> Self {
        let fragments = lines
            .iter()
            .enumerate()
            .map(|(i, line)| TextFragment::new(line.as_ref(), i as u32 + 1))
            .collect();
        Self::new(source_id, fragments)
    }
}

/// Ambiguity flags raised while parsing one question.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseFlags {
    /// A continuation line was soft-merged into an option.
    pub merged_lines: bool,
    /// Option markers were missing, gapped, or a lone option was folded back.
    pub missing_option_marker: bool,
    /// A bracketed true/false token was moved from the stem into the answer.
    pub tail_answer_stripped: bool,
    /// Answer channels disagreed; the first candidate was kept.
    pub multi_channel_answer: bool,
}

impl ParseFlags {
    pub fn any(&self) -> bool {
        self.merged_lines
            || self.missing_option_marker
            || self.tail_answer_stripped
            || self.multi_channel_answer
    }
}

/// Letter for option position `i` (`A` for 0), or `None` past the byte range.
pub fn option_letter(i: usize) -> Option<char> {
    u8::try_from(i)
        .ok()
        .and_then(|i| b'A'.checked_add(i))
        .map(char::from)
}

/// A question record as emitted by the layout parser. Frozen after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    /// Stem text.
    pub question: String,
    pub options: Vec<String>,
    /// Option letters as they appeared in the source, parallel to `options`.
    #[serde(default)]
    pub option_letters: Vec<char>,
    #[serde(default)]
    pub answer_raw: String,
    #[serde(default)]
    pub explanation_raw: String,
    /// Layout quality in [0,1].
    pub layout_score: f64,
    #[serde(default)]
    pub parse_flags: ParseFlags,
    /// Mean OCR confidence over the fragment group, if any fragment had one.
    #[serde(default)]
    pub ocr_conf_mean: Option<f64>,
    /// First and last source line of the fragment group.
    #[serde(default)]
    pub line_span: (u32, u32),
}

impl ParsedQuestion {
    /// A record with only a stem; used by tests and callers that bypass parsing.
    pub fn with_stem(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: Vec::new(),
            option_letters: Vec::new(),
            answer_raw: String::new(),
            explanation_raw: String::new(),
            layout_score: 1.0,
            parse_flags: ParseFlags::default(),
            ocr_conf_mean: None,
            line_span: (0, 0),
        }
    }

    pub fn options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = options.into_iter().map(Into::into).collect();
        self.option_letters = (0..self.options.len()).map_while(option_letter).collect();
        self
    }

    pub fn answer(mut self, answer: impl Into<String>) -> Self {
        self.answer_raw = answer.into();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.question.is_empty() && self.options.is_empty() && self.answer_raw.is_empty()
    }
}

/// Outcome of a satisfied rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub rule_name: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Base confidence scaled by satisfaction, in [0,1].
    pub confidence: f64,
    pub explanation: String,
    pub priority: i32,
}

/// Raw output of the statistical classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub probabilities: ProbabilityMap,
    pub features_used: Vec<String>,
    pub model_version: String,
}

/// Final, persistable classification of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedResult {
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub confidence: f64,
    pub probabilities: ProbabilityMap,
    pub is_low_confidence: bool,
    pub needs_review: bool,
}

impl CalibratedResult {
    /// Terminal result for questions nothing could classify.
    pub fn unknown() -> Self {
        Self {
            question_type: QuestionType::Unknown,
            confidence: 0.0,
            probabilities: ProbabilityMap::from([(QuestionType::Unknown, 1.0)]),
            is_low_confidence: true,
            needs_review: true,
        }
    }
}

/// Everything the pipeline knows about one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// `{document-id}#q{n}`.
    pub source_id: String,
    pub question: ParsedQuestion,
    pub features: QuestionFeatures,
    #[serde(default)]
    pub rule_decision: Option<RuleDecision>,
    #[serde(default)]
    pub model_prediction: Option<ModelPrediction>,
    pub final_result: CalibratedResult,
    #[serde(default)]
    pub explanations: Vec<String>,
    /// Processing latency in microseconds.
    pub latency_us: u64,
    pub timestamp: DateTime<Utc>,
}

impl ClassificationResult {
    pub fn question_type(&self) -> QuestionType {
        self.final_result.question_type
    }

    pub fn confidence(&self) -> f64 {
        self.final_result.confidence
    }
}
