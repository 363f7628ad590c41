//! Layout state machine: segments an ordered fragment stream into question
//! records.
//!
//! Each fragment group runs through `INIT → QUESTION → OPTIONS`. Answer and
//! explanation markers are checked on every fragment regardless of state, and
//! a record is emitted when the next boundary fragment arrives or the stream
//! ends. Parsing never fails; ambiguity is reported through [`ParseFlags`].

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ParserConfig;
use crate::lexicon::{self, ANSWER_CAPTURE_CUES, QUIZ_PHRASING};
use crate::model::{option_letter, DocumentInput, ParseFlags, ParsedQuestion, TextFragment};
use crate::normalize::{
    collapse_whitespace, fold_width, normalize_answer, normalize_option, normalize_stem,
    question_number_len,
};

static OPTION_TRIGGER: OnceLock<Regex> = OnceLock::new();
static INLINE_OPTION: OnceLock<Regex> = OnceLock::new();
static ANSWER_MARKER: OnceLock<Regex> = OnceLock::new();
static EXPLANATION_MARKER: OnceLock<Regex> = OnceLock::new();
static TRAILING_BRACKET: OnceLock<Regex> = OnceLock::new();
static SCORE_ANNOTATION: OnceLock<Regex> = OnceLock::new();
static TAIL_ANSWER: OnceLock<Regex> = OnceLock::new();
static OPTION_LIKE: OnceLock<Regex> = OnceLock::new();
static EMBEDDED_OPTION: OnceLock<Regex> = OnceLock::new();

/// Option letter at the start of a fragment: `A.`, `b)`, `(C)`, `【D】`, or
/// `A` + space before CJK text.
fn option_trigger() -> &'static Regex {
    OPTION_TRIGGER.get_or_init(|| {
        Regex::new(
            r"^\s*(?:[(\[【]\s*(?P<paren>[A-Fa-f])\s*[)\]】]|(?P<sep>[A-Fa-f])\s*[.．、)\]】]|(?P<bare>[A-F])\s+(?P<next>\S))",
        )
        .expect("valid regex")
    })
}

/// A further option marker later in the same fragment.
fn inline_option() -> &'static Regex {
    INLINE_OPTION.get_or_init(|| {
        Regex::new(r"\s(?:[(\[【]\s*(?P<paren>[A-Fa-f])\s*[)\]】]|(?P<sep>[A-Fa-f])\s*[.．、)\]】])")
            .expect("valid regex")
    })
}

fn answer_marker() -> &'static Regex {
    ANSWER_MARKER.get_or_init(|| {
        Regex::new(
            r"(?is)(?:【\s*答案\s*】|\[\s*answer\s*\]|(?:正确答案|参考答案|标准答案)\s*(?:[:：]|\s)|答案为\s*[:：]?|答案\s*[:：]|^\s*答\s*[:：]|\b(?:correct\s+answer|answer|ans)\s*[:：])\s*(?P<value>.*)$",
        )
        .expect("valid regex")
    })
}

fn explanation_marker() -> &'static Regex {
    EXPLANATION_MARKER.get_or_init(|| {
        Regex::new(
            r"(?is)^\s*(?:【\s*(?:解析|解释|说明)\s*】\s*[:：]?|(?:解析|解释|说明)\s*[:：]|(?:explanation|analysis|rationale)\s*[:：])\s*(?P<value>.*)$",
        )
        .expect("valid regex")
    })
}

fn trailing_bracket() -> &'static Regex {
    TRAILING_BRACKET.get_or_init(|| {
        Regex::new(r"(?s)(?:\((?P<p>[^()]*)\)|【(?P<b>[^【】]*)】|\[(?P<s>[^\[\]]*)\])\s*[。.]?\s*$")
            .expect("valid regex")
    })
}

fn score_annotation() -> &'static Regex {
    SCORE_ANNOTATION.get_or_init(|| {
        Regex::new(r"(?i)^\d+\s*(?:分|points?|pts?|marks?)$").expect("valid regex")
    })
}

fn tail_answer() -> &'static Regex {
    TAIL_ANSWER.get_or_init(|| {
        Regex::new(
            r"(?i)[(\[【]\s*(?P<token>对|错|√|×|✓|✔|✗|✘|true|false|t|f|正确|错误|v|x)\s*[)\]】]\s*[。.]?\s*$",
        )
        .expect("valid regex")
    })
}

fn option_like() -> &'static Regex {
    OPTION_LIKE.get_or_init(|| Regex::new(r"^[A-F][.．、]").expect("valid regex"))
}

fn embedded_option() -> &'static Regex {
    EMBEDDED_OPTION.get_or_init(|| Regex::new(r"(?:^|\s)[A-F][.．、]\s*\S").expect("valid regex"))
}

/// Where an answer candidate came from. Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerChannel {
    /// An explicit marker such as `答案：` or `Answer:`.
    Marker,
    /// A trailing bracket on a free-response-looking stem.
    TrailingBracket,
}

/// One answer found while scanning a fragment group.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerCandidate {
    pub channel: AnswerChannel,
    pub value: String,
    pub line_no: u32,
}

/// Pick the answer among the candidates of one record.
///
/// The highest-priority channel wins, then the earliest candidate within it.
/// The second element is `true` when any other candidate normalizes to a
/// different value.
pub fn resolve_answer(candidates: &[AnswerCandidate]) -> Option<(String, bool)> {
    let (_, best) = candidates
        .iter()
        .enumerate()
        .min_by_key(|(i, c)| (c.channel, *i))?;
    let chosen = normalize_answer(&best.value);
    let disagreement = candidates
        .iter()
        .any(|c| normalize_answer(&c.value) != chosen);
    Some((chosen, disagreement))
}

fn next_letter(letter: char) -> Option<char> {
    char::from_u32(letter as u32 + 1)
}

/// Split a fragment that starts with an option trigger into `(letter, body)`
/// slots, following inline markers in alphabetical sequence.
fn split_options(text: &str) -> Option<Vec<(char, String)>> {
    let caps = option_trigger().captures(text)?;
    let whole = caps.get(0)?;
    let (first, body_start) = match caps.name("paren").or_else(|| caps.name("sep")) {
        Some(letter) => (letter.as_str(), whole.end()),
        None => {
            let next = caps.name("next")?;
            if next.as_str().chars().next()?.is_ascii() {
                return None;
            }
            (caps.name("bare")?.as_str(), next.start())
        }
    };

    let mut letter = first.chars().next()?.to_ascii_uppercase();
    let rest = &text[body_start..];
    let mut slots = Vec::new();
    let mut cursor = 0;
    for inline in inline_option().captures_iter(rest) {
        let Some(found) = inline.name("paren").or_else(|| inline.name("sep")) else {
            continue;
        };
        let found = found.as_str().chars().next().map(|c| c.to_ascii_uppercase());
        if found != next_letter(letter) {
            continue;
        }
        let Some(m) = inline.get(0) else { continue };
        slots.push((letter, rest[cursor..m.start()].trim().to_string()));
        letter = found.unwrap_or(letter);
        cursor = m.end();
    }
    slots.push((letter, rest[cursor..].trim().to_string()));
    Some(slots)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Question,
    Options,
}

#[derive(Debug)]
struct OptionSlot {
    letter: char,
    text: String,
}

/// Accumulates one fragment group.
struct RecordBuilder<'a> {
    config: &'a ParserConfig,
    state: State,
    stem_lines: Vec<String>,
    options: Vec<OptionSlot>,
    candidates: Vec<AnswerCandidate>,
    explanations: Vec<String>,
    awaiting_answer: bool,
    flags: ParseFlags,
    ocr_confs: Vec<f64>,
    total_chars: usize,
    line_span: (u32, u32),
}

impl<'a> RecordBuilder<'a> {
    fn new(config: &'a ParserConfig, line_no: u32) -> Self {
        Self {
            config,
            state: State::Init,
            stem_lines: Vec::new(),
            options: Vec::new(),
            candidates: Vec::new(),
            explanations: Vec::new(),
            awaiting_answer: false,
            flags: ParseFlags::default(),
            ocr_confs: Vec::new(),
            total_chars: 0,
            line_span: (line_no, line_no),
        }
    }

    fn feed(&mut self, fragment: &TextFragment) {
        let text = fold_width(fragment.text.trim());
        self.line_span.1 = fragment.line_no;
        self.total_chars += text.chars().count();
        if let Some(conf) = fragment.ocr_conf {
            self.ocr_confs.push(conf);
        }

        if self.awaiting_answer {
            self.awaiting_answer = false;
            let letters = normalize_answer(&text);
            let letter_answer = lexicon::single_letter_answer().is_match(&letters)
                || lexicon::multi_letter_answer().is_match(&letters);
            let structural = explanation_marker().is_match(&text)
                || answer_marker().is_match(&text)
                || (!letter_answer && split_options(&text).is_some());
            if !structural {
                self.push_candidate(AnswerChannel::Marker, &text, fragment.line_no);
                return;
            }
        }

        if let Some(caps) = explanation_marker().captures(&text) {
            let value = caps.name("value").map_or("", |m| m.as_str().trim());
            if !value.is_empty() {
                self.explanations.push(value.to_string());
            }
            return;
        }

        if let Some(caps) = answer_marker().captures(&text) {
            let start = caps.get(0).map_or(0, |m| m.start());
            let value = caps.name("value").map_or("", |m| m.as_str().trim());
            if value.is_empty() {
                self.awaiting_answer = true;
            } else {
                self.push_candidate(AnswerChannel::Marker, value, fragment.line_no);
            }
            let prefix = text[..start].trim();
            if !prefix.is_empty() {
                self.route(prefix);
            }
            return;
        }

        if let Some((prefix, value)) = self.trailing_bracket_answer(&text) {
            self.push_candidate(AnswerChannel::TrailingBracket, &value, fragment.line_no);
            if !prefix.is_empty() {
                self.route(prefix);
            }
            return;
        }

        self.route(&text);
    }

    fn push_candidate(&mut self, channel: AnswerChannel, value: &str, line_no: u32) {
        tracing::debug!(?channel, value, line_no, "answer candidate");
        self.candidates.push(AnswerCandidate {
            channel,
            value: value.to_string(),
            line_no,
        });
    }

    /// Bracketed trailing content on a stem whose wording asks for a written
    /// answer. Returns the text before the bracket and the bracket contents.
    fn trailing_bracket_answer<'t>(&self, text: &'t str) -> Option<(&'t str, String)> {
        if !self.options.is_empty() {
            return None;
        }
        let caps = trailing_bracket().captures(text)?;
        let whole = caps.get(0)?;
        let content = ["p", "b", "s"]
            .iter()
            .find_map(|g| caps.name(g))?
            .as_str()
            .trim();
        if content.is_empty() || score_annotation().is_match(content) {
            return None;
        }
        let prefix = text[..whole.start()].trim();
        let context = format!("{} {prefix}", self.stem_lines.join(" "));
        if !lexicon::has_any_cue(&context, ANSWER_CAPTURE_CUES) {
            return None;
        }
        Some((prefix, content.to_string()))
    }

    fn route(&mut self, text: &str) {
        if self.state == State::Init {
            self.state = State::Question;
            self.stem_lines.push(text.to_string());
            return;
        }

        if let Some(slots) = split_options(text) {
            self.state = State::Options;
            self.options.extend(
                slots
                    .into_iter()
                    .map(|(letter, text)| OptionSlot { letter, text }),
            );
            return;
        }

        match (self.state, self.options.last_mut()) {
            (State::Options, Some(open)) => {
                open.text.push(' ');
                open.text.push_str(text);
                self.flags.merged_lines = true;
            }
            _ => self.stem_lines.push(text.to_string()),
        }
    }

    fn finish(self) -> ParsedQuestion {
        let RecordBuilder {
            config,
            mut stem_lines,
            mut options,
            candidates,
            explanations,
            mut flags,
            ocr_confs,
            total_chars,
            line_span,
            ..
        } = self;

        let (mut answer, disagreement) = resolve_answer(&candidates).unwrap_or_default();
        flags.multi_channel_answer = disagreement;

        // Bracketed true/false token left at the end of the stem.
        if answer.is_empty() {
            if let Some(last) = stem_lines.last_mut() {
                let stripped = tail_answer().captures(last.as_str()).and_then(|caps| {
                    Some((caps.get(0)?.start(), caps.name("token")?.as_str().to_string()))
                });
                if let Some((start, token)) = stripped {
                    answer = normalize_answer(&token);
                    last.truncate(start);
                    let kept = last.trim_end().len();
                    last.truncate(kept);
                    flags.tail_answer_stripped = true;
                }
            }
            if stem_lines.last().is_some_and(|l| l.is_empty()) {
                stem_lines.pop();
            }
        }

        // Unmarked free-response answer on the final line.
        if answer.is_empty() && options.is_empty() && stem_lines.len() >= 2 {
            let stem_text = stem_lines.join(" ");
            let bounds = config.free_response_answer_min_len..=config.free_response_answer_max_len;
            if lexicon::has_any_cue(&stem_text, ANSWER_CAPTURE_CUES) {
                if let Some(last) = stem_lines.last() {
                    if bounds.contains(&last.chars().count()) && !option_like().is_match(last) {
                        answer = normalize_answer(last);
                        stem_lines.pop();
                    }
                }
            }
        }

        // A lone option-looking line is more likely part of the stem.
        if options.len() < 2 && answer.is_empty() {
            let stem_text = stem_lines.join(" ");
            let isolated = options.len() + embedded_option().find_iter(&stem_text).count();
            if isolated == 1 {
                stem_lines.extend(
                    options
                        .drain(..)
                        .map(|slot| format!("{}. {}", slot.letter, slot.text)),
                );
                flags.missing_option_marker = true;
            }
        }

        let contiguous = options
            .iter()
            .enumerate()
            .all(|(i, slot)| Some(slot.letter) == option_letter(i));
        if !contiguous {
            flags.missing_option_marker = true;
        }

        let ocr_conf_mean =
            (!ocr_confs.is_empty()).then(|| ocr_confs.iter().sum::<f64>() / ocr_confs.len() as f64);
        let mut layout_score = ocr_conf_mean.unwrap_or(1.0);
        if total_chars < 10 {
            layout_score *= 0.5;
        } else if total_chars > 1000 {
            layout_score *= 0.8;
        }
        if options.len() >= 2 && contiguous {
            layout_score *= 1.2;
        }

        ParsedQuestion {
            question: normalize_stem(&stem_lines.join(" ")),
            options: options.iter().map(|slot| normalize_option(&slot.text)).collect(),
            option_letters: options.iter().map(|slot| slot.letter).collect(),
            answer_raw: answer,
            explanation_raw: collapse_whitespace(&explanations.join(" ")),
            layout_score: layout_score.clamp(0.0, 1.0),
            parse_flags: flags,
            ocr_conf_mean,
            line_span,
        }
    }
}

/// Segments fragments into [`ParsedQuestion`] records.
#[derive(Debug, Clone, Default)]
pub struct LayoutParser {
    config: ParserConfig,
}

impl LayoutParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn parse_document(&self, document: &DocumentInput) -> Vec<ParsedQuestion> {
        let questions = self.parse(&document.fragments);
        tracing::debug!(
            source_id = %document.source_id,
            fragments = document.fragments.len(),
            questions = questions.len(),
            "parsed document"
        );
        questions
    }

    /// Parse fragments in reading order. Blank fragments are skipped; the
    /// first non-blank fragment always opens a record.
    pub fn parse(&self, fragments: &[TextFragment]) -> Vec<ParsedQuestion> {
        let mut questions = Vec::new();
        let mut current: Option<RecordBuilder<'_>> = None;

        for fragment in fragments {
            if fragment.text.trim().is_empty() {
                continue;
            }
            let builder = match current.take() {
                Some(builder) if self.is_boundary(&fragment.text) => {
                    questions.push(builder.finish());
                    RecordBuilder::new(&self.config, fragment.line_no)
                }
                Some(builder) => builder,
                None => RecordBuilder::new(&self.config, fragment.line_no),
            };
            let builder = current.insert(builder);
            builder.feed(fragment);
        }

        if let Some(builder) = current {
            questions.push(builder.finish());
        }
        questions
    }

    /// Whether `text` starts a new question: a question ordinal, or quiz
    /// phrasing within the configured length window.
    pub fn is_boundary(&self, text: &str) -> bool {
        let text = fold_width(text.trim());
        if text.is_empty() {
            return false;
        }
        if question_number_len(&text).is_some() {
            return true;
        }
        let len = text.chars().count();
        let window = self.config.phrasing_boundary_min_len..=self.config.phrasing_boundary_max_len;
        window.contains(&len)
            && lexicon::has_any_cue(&text, QUIZ_PHRASING)
            && !option_trigger().is_match(&text)
            && !answer_marker().is_match(&text)
            && !explanation_marker().is_match(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_lines(lines: &[&str]) -> Vec<ParsedQuestion> {
        let doc = DocumentInput::from_lines("doc", lines);
        LayoutParser::default().parse_document(&doc)
    }

    fn parse_one(lines: &[&str]) -> ParsedQuestion {
        let mut questions = parse_lines(lines);
        assert_eq!(questions.len(), 1, "expected a single record: {questions:?}");
        questions.remove(0)
    }

    #[test]
    fn single_choice_with_marker_answer() {
        let q = parse_one(&[
            "1. Which of the following is correct?",
            "A. Copper",
            "B. Rubber",
            "C. Glass",
            "D. Wood",
            "Answer: A",
        ]);
        assert_eq!(q.question, "Which of the following is correct?");
        assert_eq!(q.options, vec!["Copper", "Rubber", "Glass", "Wood"]);
        assert_eq!(q.option_letters, vec!['A', 'B', 'C', 'D']);
        assert_eq!(q.answer_raw, "A");
        assert!(!q.parse_flags.any());
        assert_eq!(q.layout_score, 1.0);
        assert_eq!(q.line_span, (1, 6));
    }

    #[test]
    fn chinese_markers_and_full_width_letters() {
        let q = parse_one(&[
            "第3题：下列属于继电保护基本要求的有哪些？",
            "Ａ．可靠性",
            "Ｂ．选择性",
            "Ｃ．经济性",
            "正确答案：Ａ、Ｂ",
            "解析：可靠性与选择性是基本要求。",
        ]);
        assert_eq!(q.question, "下列属于继电保护基本要求的有哪些？");
        assert_eq!(q.options, vec!["可靠性", "选择性", "经济性"]);
        assert_eq!(q.answer_raw, "AB");
        assert_eq!(q.explanation_raw, "可靠性与选择性是基本要求。");
    }

    #[test]
    fn tail_answer_is_stripped() {
        let q = parse_one(&["Isolation must always be performed by two people.(×)"]);
        assert_eq!(q.answer_raw, "×");
        assert_eq!(q.question, "Isolation must always be performed by two people.");
        assert!(q.parse_flags.tail_answer_stripped);
    }

    #[test]
    fn full_width_tail_answer() {
        let q = parse_one(&["5. 停电作业必须由两人进行。（√）"]);
        assert_eq!(q.answer_raw, "√");
        assert_eq!(q.question, "停电作业必须由两人进行。");
    }

    #[test]
    fn boundaries_split_records() {
        let questions = parse_lines(&[
            "1. First question?",
            "A. yes",
            "B. no",
            "",
            "2. Second question ____ here.",
            "Answer: 30",
            "(3) Third question",
            "第4题 fourth",
        ]);
        assert_eq!(questions.len(), 4);
        assert_eq!(questions[1].question, "Second question ____ here.");
        assert_eq!(questions[1].answer_raw, "30");
        assert_eq!(questions[2].question, "Third question");
    }

    #[test]
    fn first_fragment_opens_record_without_ordinal() {
        let questions = parse_lines(&["What is Ohm's law?", "Answer: V = IR"]);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].answer_raw, "V = IR");
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(parse_lines(&[]).is_empty());
        assert!(parse_lines(&["", "   ", "\t"]).is_empty());
    }

    #[test]
    fn decimal_is_not_a_boundary() {
        let parser = LayoutParser::default();
        assert!(!parser.is_boundary("3.5 kV is the rated voltage"));
        assert!(parser.is_boundary("3. The rated voltage"));
        assert!(parser.is_boundary("Question 7: voltage"));
    }

    #[test]
    fn phrasing_boundary_needs_length_window() {
        let parser = LayoutParser::default();
        let long = "在电力系统运行中，为保证人身和设备安全，以下关于倒闸操作的各项说法中，哪一项描述是完全符合现行安全工作规程要求的做法";
        assert!(long.chars().count() >= 50);
        assert!(parser.is_boundary(long));
        assert!(!parser.is_boundary("以下说法正确的是"));
    }

    #[test]
    fn continuation_lines_merge_into_open_option() {
        let q = parse_one(&[
            "1. Pick one",
            "A. a long option that",
            "wraps onto the next line",
            "B. short",
        ]);
        assert_eq!(q.options[0], "a long option that wraps onto the next line");
        assert!(q.parse_flags.merged_lines);
    }

    #[test]
    fn inline_options_are_split() {
        let q = parse_one(&["1. 电压单位是？", "A. 伏特 B. 安培 C. 欧姆 D. 瓦特", "答案：A"]);
        assert_eq!(q.options, vec!["伏特", "安培", "欧姆", "瓦特"]);
        assert_eq!(q.option_letters, vec!['A', 'B', 'C', 'D']);
    }

    #[test]
    fn parenthesised_and_bare_triggers() {
        let q = parse_one(&["1. 选择", "(A) 甲", "(B) 乙", "C 丙"]);
        assert_eq!(q.options, vec!["甲", "乙", "丙"]);
    }

    #[test]
    fn answer_marker_on_next_fragment() {
        let q = parse_one(&["1. 简述接地的作用。", "参考答案：", "保护人身安全。"]);
        assert_eq!(q.answer_raw, "保护人身安全");
        assert_eq!(q.question, "简述接地的作用。");
    }

    #[test]
    fn bare_marker_does_not_swallow_explanation() {
        let q = parse_one(&["1. 简述接地的作用。", "参考答案：", "解析：依据安全规程。"]);
        assert!(q.answer_raw.is_empty());
        assert_eq!(q.explanation_raw, "依据安全规程。");
    }

    #[test]
    fn bare_marker_before_options_keeps_them() {
        let q = parse_one(&["1. Pick the conductor", "Answer:", "A. Copper", "B. Rubber"]);
        assert!(q.answer_raw.is_empty());
        assert_eq!(q.options, vec!["Copper", "Rubber"]);
    }

    #[test]
    fn bare_marker_takes_letter_list() {
        let q = parse_one(&["1. 选择", "A. 甲", "B. 乙", "C. 丙", "参考答案：", "A、C"]);
        assert_eq!(q.answer_raw, "AC");
    }

    #[test]
    fn text_before_marker_stays_in_stem() {
        let q = parse_one(&["1. The rated frequency is ____ Hz. Answer: 50"]);
        assert_eq!(q.question, "The rated frequency is ____ Hz.");
        assert_eq!(q.answer_raw, "50");
    }

    #[test]
    fn conflicting_channels_keep_marker_answer() {
        let q = parse_one(&["1. 请说明变压器的作用（变换电压）", "答案：变换电压等级"]);
        assert_eq!(q.answer_raw, "变换电压等级");
        assert!(q.parse_flags.multi_channel_answer);
        assert_eq!(q.question, "请说明变压器的作用");
    }

    #[test]
    fn resolve_answer_prefers_marker_channel() {
        let candidates = vec![
            AnswerCandidate {
                channel: AnswerChannel::TrailingBracket,
                value: "B".into(),
                line_no: 1,
            },
            AnswerCandidate {
                channel: AnswerChannel::Marker,
                value: "a".into(),
                line_no: 2,
            },
            AnswerCandidate {
                channel: AnswerChannel::Marker,
                value: "A".into(),
                line_no: 3,
            },
        ];
        assert_eq!(resolve_answer(&candidates), Some(("A".to_string(), true)));
        assert_eq!(resolve_answer(&candidates[1..]), Some(("A".to_string(), false)));
        assert_eq!(resolve_answer(&[]), None);
    }

    #[test]
    fn score_annotations_are_not_answers() {
        let q = parse_one(&["1. 请简述继电保护的基本要求。（10分）"]);
        assert!(q.answer_raw.is_empty());
    }

    #[test]
    fn unmarked_free_response_answer() {
        let q = parse_one(&["1. 请简述继电保护的基本要求。", "可靠性、选择性、速动性、灵敏性"]);
        assert_eq!(q.answer_raw, "可靠性、选择性、速动性、灵敏性");
        assert_eq!(q.question, "请简述继电保护的基本要求。");
    }

    #[test]
    fn lone_option_folds_back_into_stem() {
        let q = parse_one(&["1. 关于接地，说法如下", "A. 必须可靠"]);
        assert!(q.options.is_empty());
        assert!(q.parse_flags.missing_option_marker);
        assert_eq!(q.question, "关于接地，说法如下 A. 必须可靠");
    }

    #[test]
    fn letter_gap_is_flagged() {
        let q = parse_one(&["1. Pick", "A. one", "C. three", "Answer: A"]);
        assert_eq!(q.option_letters, vec!['A', 'C']);
        assert!(q.parse_flags.missing_option_marker);
    }

    #[test]
    fn layout_score_uses_ocr_confidence() {
        let fragments = vec![
            TextFragment::ocr("1. Which of these is a conductor?", 1, 0.6),
            TextFragment::ocr("A. Copper", 2, 0.8),
            TextFragment::ocr("B. Rubber", 3, 0.7),
        ];
        let questions = LayoutParser::default().parse(&fragments);
        let q = &questions[0];
        assert!((q.ocr_conf_mean.unwrap() - 0.7).abs() < 1e-9);
        assert!((q.layout_score - 0.84).abs() < 1e-9);
    }

    #[test]
    fn short_records_are_penalized() {
        let q = parse_one(&["1. Hi"]);
        assert_eq!(q.layout_score, 0.5);
    }

    #[test]
    fn parsing_is_deterministic() {
        let lines = [
            "1. Which are metals?",
            "A. Iron B. Wood C. Copper",
            "Answer: A, C",
            "2. The sky is blue. (True)",
        ];
        assert_eq!(parse_lines(&lines), parse_lines(&lines));
        assert_eq!(parse_lines(&lines)[0].answer_raw, "AC");
        assert_eq!(parse_lines(&lines)[1].answer_raw, "True");
    }
}
