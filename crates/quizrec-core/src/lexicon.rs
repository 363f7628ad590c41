//! Cue-word dictionaries and shared text patterns.
//!
//! The corpus is Chinese; the English entries cover the phrasing used by
//! English-language fixtures. ASCII cues match on word boundaries, CJK cues
//! match as substrings.

use std::sync::OnceLock;

use regex::Regex;

/// Multi-select hints, as counted by the feature extractor.
pub const MULTI_SELECT_CUES: &[&str] = &[
    "多选", "多项", "至少两项", "两个以上", "不止一个", "哪些", "哪几个", "包括", "多个", "几个",
    "select all", "choose all", "all that apply", "which of the following are", "more than one",
    "multiple answers", "choose two", "select two",
];

/// Multi-select hints strong enough for the multiple-choice rule.
pub const MULTI_SELECT_RULE_CUES: &[&str] = &[
    "多选", "多项", "至少两项", "两个以上", "不止一个", "哪些", "哪几个", "包括",
    "select all", "choose all", "all that apply", "which of the following are", "more than one",
    "multiple answers",
];

pub const TRUE_FALSE_CUES: &[&str] = &[
    "判断对错", "是否正确", "对吗", "对么", "是非题", "判断题", "说法", "表述", "观点", "是否准确",
    "true or false", "true/false", "correct or incorrect", "this statement",
];

pub const FILL_BLANK_CUES: &[&str] = &[
    "填写", "填入", "应填", "等于", "约为", "标准", "规定", "数值", "参数", "单位",
    "fill in", "blank", "equals", "approximately",
];

/// Free-response hints, as counted by the feature extractor.
pub const FREE_RESPONSE_CUES: &[&str] = &[
    "简述", "说明", "论述", "分析", "阐述", "解释", "描述", "如何", "为什么", "什么是", "怎样",
    "请", "试", "谈谈", "基本要求", "工作原理", "主要特点", "注意事项", "定义", "比较", "列举",
    "举例", "briefly", "describe", "explain", "discuss", "why", "how", "what is", "list",
    "compare", "outline", "define",
];

/// Free-response hints used by the free-response rule.
pub const FREE_RESPONSE_RULE_CUES: &[&str] = &[
    "简述", "说明", "论述", "分析", "阐述", "解释", "描述", "如何", "为什么", "什么是", "请", "试",
    "briefly", "describe", "explain", "discuss", "why", "how", "what is", "outline",
];

/// Stem vocabulary that makes a trailing bracket or final line look like an answer.
pub const ANSWER_CAPTURE_CUES: &[&str] = &[
    "简述", "说明", "论述", "分析", "如何", "为什么", "请",
    "briefly", "describe", "explain", "discuss", "why", "how",
];

/// Phrasing that marks an unnumbered fragment as a plausible question start.
pub const QUIZ_PHRASING: &[&str] = &[
    "是指", "应该", "正确的是", "错误的是", "以下", "下列",
    "which of the following", "which one of", "true or false",
];

/// Canonical true/false answer tokens (post-normalization).
pub const TRUE_FALSE_TOKENS: &[&str] = &[
    "对", "错", "√", "×", "True", "False", "T", "F", "正确", "错误", "是", "否",
];

/// Whether `text` contains `cue`. ASCII cues only match whole words.
pub fn contains_cue(text: &str, cue: &str) -> bool {
    if !cue.is_ascii() {
        return text.contains(cue);
    }
    let haystack = text.to_lowercase();
    let is_word = |c: char| c.is_ascii_alphanumeric();
    haystack.match_indices(cue).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + cue.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

/// Number of distinct cues from `cues` found in `text`.
pub fn count_cues(text: &str, cues: &[&str]) -> usize {
    cues.iter().filter(|cue| contains_cue(text, cue)).count()
}

pub fn has_any_cue(text: &str, cues: &[&str]) -> bool {
    cues.iter().any(|cue| contains_cue(text, cue))
}

pub fn is_true_false_token(answer: &str) -> bool {
    TRUE_FALSE_TOKENS.contains(&answer.trim())
}

static UNDERLINE_BLANK: OnceLock<Regex> = OnceLock::new();
static BRACKET_BLANK: OnceLock<Regex> = OnceLock::new();
static SINGLE_LETTER: OnceLock<Regex> = OnceLock::new();
static MULTI_LETTER: OnceLock<Regex> = OnceLock::new();

/// Runs of two or more underscores.
pub fn underline_blank() -> &'static Regex {
    UNDERLINE_BLANK.get_or_init(|| Regex::new(r"_{2,}").expect("valid regex"))
}

/// Empty parenthesis or bracket pairs, half- or full-width.
pub fn bracket_blank() -> &'static Regex {
    BRACKET_BLANK.get_or_init(|| {
        Regex::new(r"（[\s　]*）|\([\s　]*\)|【[\s　]*】|\[[\s　]*\]").expect("valid regex")
    })
}

pub fn single_letter_answer() -> &'static Regex {
    SINGLE_LETTER.get_or_init(|| Regex::new(r"^[A-F]$").expect("valid regex"))
}

pub fn multi_letter_answer() -> &'static Regex {
    MULTI_LETTER.get_or_init(|| Regex::new(r"^[A-F]{2,6}$").expect("valid regex"))
}

pub fn has_blank_marker(text: &str) -> bool {
    underline_blank().is_match(text) || bracket_blank().is_match(text)
}
