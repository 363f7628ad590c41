//! Feature extraction: a pure function from a question record to a fixed
//! vector of interpretable signals.

use serde::{Deserialize, Serialize};

use crate::lexicon::{self, FILL_BLANK_CUES, FREE_RESPONSE_CUES, MULTI_SELECT_CUES, TRUE_FALSE_CUES};
use crate::model::ParsedQuestion;

/// Cue counts are capped so one verbose stem cannot dominate.
const CUE_COUNT_CAP: usize = 3;

/// Answers longer than this (in characters) count as long text.
const LONG_ANSWER_CHARS: usize = 20;

/// Coarse shape of the answer string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerPattern {
    #[default]
    Other,
    SingleLetter,
    MultiLetter,
    TrueFalse,
    LongText,
    Numeric,
}

impl AnswerPattern {
    pub fn classify(answer: &str) -> Self {
        let answer = answer.trim();
        if lexicon::single_letter_answer().is_match(answer) {
            AnswerPattern::SingleLetter
        } else if lexicon::multi_letter_answer().is_match(answer) {
            AnswerPattern::MultiLetter
        } else if lexicon::is_true_false_token(answer) {
            AnswerPattern::TrueFalse
        } else if answer.chars().count() > LONG_ANSWER_CHARS {
            AnswerPattern::LongText
        } else if is_numeric(answer) {
            AnswerPattern::Numeric
        } else {
            AnswerPattern::Other
        }
    }

    /// Stable numeric code used in the model input vector.
    pub fn code(self) -> f64 {
        match self {
            AnswerPattern::Other => 0.0,
            AnswerPattern::SingleLetter => 1.0,
            AnswerPattern::MultiLetter => 2.0,
            AnswerPattern::TrueFalse => 3.0,
            AnswerPattern::LongText => 4.0,
            AnswerPattern::Numeric => 5.0,
        }
    }
}

fn is_numeric(s: &str) -> bool {
    let mut dots = 0;
    s.starts_with(|c: char| c.is_ascii_digit())
        && s.chars().all(|c| {
            if c == '.' {
                dots += 1;
            }
            c.is_ascii_digit() || c == '.'
        })
        && dots <= 1
}

/// Names of the model input features, in `to_vector` order.
pub const FEATURE_NAMES: [&str; 19] = [
    "has_options",
    "num_options",
    "answer_is_single_letter",
    "answer_is_multi_letters",
    "question_len",
    "option_len_mean",
    "answer_len",
    "punct_density",
    "question_mark_count",
    "hint_keywords_multi",
    "hint_keywords_tf",
    "hint_keywords_blank",
    "hint_keywords_free",
    "blank_underline_count",
    "blank_parenthesis_count",
    "option_alignment_score",
    "layout_score",
    "ocr_conf_mean",
    "answer_pattern",
];

/// Signals derived from one `ParsedQuestion`. All lengths are in characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionFeatures {
    pub has_options: bool,
    pub num_options: usize,
    pub answer_is_single_letter: bool,
    pub answer_is_multi_letters: bool,
    pub question_len: usize,
    pub option_len_mean: f64,
    pub answer_len: usize,
    /// Punctuation characters per stem character.
    pub punct_density: f64,
    pub question_mark_count: usize,
    pub hint_keywords_multi: usize,
    pub hint_keywords_tf: usize,
    pub hint_keywords_blank: usize,
    pub hint_keywords_free: usize,
    pub blank_underline_count: usize,
    pub blank_parenthesis_count: usize,
    /// `max(0, 1 - CV)` of option lengths; 0 with fewer than two options.
    pub option_alignment_score: f64,
    pub layout_score: f64,
    /// Mean OCR confidence, 1.0 for born-digital text.
    pub ocr_conf_mean: f64,
    pub answer_pattern: AnswerPattern,
}

impl Default for QuestionFeatures {
    fn default() -> Self {
        Self {
            has_options: false,
            num_options: 0,
            answer_is_single_letter: false,
            answer_is_multi_letters: false,
            question_len: 0,
            option_len_mean: 0.0,
            answer_len: 0,
            punct_density: 0.0,
            question_mark_count: 0,
            hint_keywords_multi: 0,
            hint_keywords_tf: 0,
            hint_keywords_blank: 0,
            hint_keywords_free: 0,
            blank_underline_count: 0,
            blank_parenthesis_count: 0,
            option_alignment_score: 0.0,
            layout_score: 0.0,
            ocr_conf_mean: 1.0,
            answer_pattern: AnswerPattern::Other,
        }
    }
}

impl QuestionFeatures {
    /// Numeric vector in `FEATURE_NAMES` order.
    pub fn to_vector(&self) -> Vec<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        vec![
            flag(self.has_options),
            self.num_options as f64,
            flag(self.answer_is_single_letter),
            flag(self.answer_is_multi_letters),
            self.question_len as f64,
            self.option_len_mean,
            self.answer_len as f64,
            self.punct_density,
            self.question_mark_count as f64,
            self.hint_keywords_multi as f64,
            self.hint_keywords_tf as f64,
            self.hint_keywords_blank as f64,
            self.hint_keywords_free as f64,
            self.blank_underline_count as f64,
            self.blank_parenthesis_count as f64,
            self.option_alignment_score,
            self.layout_score,
            self.ocr_conf_mean,
            self.answer_pattern.code(),
        ]
    }

    pub fn named_values(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.iter().copied().zip(self.to_vector()).collect()
    }
}

fn is_punctuation(c: char) -> bool {
    matches!(
        c,
        '。' | '，' | '！' | '？' | '；' | '：' | '、' | '“' | '”' | '‘' | '’' | '（' | '）' | '【'
            | '】' | '《' | '》' | '〈' | '〉' | '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')'
            | '[' | ']' | '<' | '>' | '"' | '\''
    )
}

fn alignment_score(options: &[String]) -> f64 {
    if options.len() < 2 {
        return 0.0;
    }
    let lengths: Vec<f64> = options.iter().map(|o| o.chars().count() as f64).collect();
    let n = lengths.len() as f64;
    let mean = lengths.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n;
    (1.0 - variance.sqrt() / mean).max(0.0)
}

/// Stateless feature extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, question: &ParsedQuestion) -> QuestionFeatures {
        let stem = question.question.as_str();
        let answer = question.answer_raw.trim();
        let question_len = stem.chars().count();

        let option_len_mean = if question.options.is_empty() {
            0.0
        } else {
            question
                .options
                .iter()
                .map(|o| o.chars().count())
                .sum::<usize>() as f64
                / question.options.len() as f64
        };

        let punct_count = stem.chars().filter(|&c| is_punctuation(c)).count();
        let punct_density = if question_len == 0 {
            0.0
        } else {
            punct_count as f64 / question_len as f64
        };

        let cues = |list: &[&str]| lexicon::count_cues(stem, list).min(CUE_COUNT_CAP);
        let answer_pattern = AnswerPattern::classify(answer);

        QuestionFeatures {
            has_options: !question.options.is_empty(),
            num_options: question.options.len(),
            answer_is_single_letter: answer_pattern == AnswerPattern::SingleLetter,
            answer_is_multi_letters: answer_pattern == AnswerPattern::MultiLetter,
            question_len,
            option_len_mean,
            answer_len: answer.chars().count(),
            punct_density,
            question_mark_count: stem.chars().filter(|&c| c == '?' || c == '？').count(),
            hint_keywords_multi: cues(MULTI_SELECT_CUES),
            hint_keywords_tf: cues(TRUE_FALSE_CUES),
            hint_keywords_blank: cues(FILL_BLANK_CUES),
            hint_keywords_free: cues(FREE_RESPONSE_CUES),
            blank_underline_count: lexicon::underline_blank().find_iter(stem).count(),
            blank_parenthesis_count: lexicon::bracket_blank().find_iter(stem).count(),
            option_alignment_score: alignment_score(&question.options),
            layout_score: question.layout_score,
            ocr_conf_mean: question.ocr_conf_mean.unwrap_or(1.0),
            answer_pattern,
        }
    }

    pub fn extract_batch(&self, questions: &[ParsedQuestion]) -> Vec<QuestionFeatures> {
        questions.iter().map(|q| self.extract(q)).collect()
    }

    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }
}
