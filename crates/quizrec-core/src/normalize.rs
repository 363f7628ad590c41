//! Text normalization applied when a question record is emitted.
//!
//! Every function here is idempotent: normalizing normalized text is a no-op.

use std::sync::OnceLock;

use regex::Regex;

static QUESTION_NUMBER: OnceLock<Regex> = OnceLock::new();

fn question_number() -> &'static Regex {
    QUESTION_NUMBER.get_or_init(|| {
        Regex::new(
            r"(?x)^\s*(?:
                第\s*\d+\s*题\s*[:：.、]?
              | (?i:question)\s*\d+\s*[.:：、)]?
              | [(（]\s*\d+\s*[)）]
              | \d+\s*[.．、)）]
              | \d+\s+
            )\s*",
        )
        .expect("valid regex")
    })
}

/// Map full-width Latin letters, digits and parentheses to half-width.
pub fn fold_width(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'Ａ'..='Ｚ' | 'ａ'..='ｚ' | '０'..='９' | '（' | '）' => {
                char::from_u32(c as u32 - 0xFEE0).unwrap_or(c)
            }
            _ => c,
        })
        .collect()
}

/// Collapse runs of whitespace (including ideographic spaces) into one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte length of a leading question ordinal ("1.", "第3题：", "(2)",
/// "Question 4:"), including trailing whitespace. A decimal such as `3.5`
/// is not an ordinal.
pub fn question_number_len(text: &str) -> Option<usize> {
    let m = question_number().find(text)?;
    let marker = m.as_str();
    let decimal = marker.ends_with(['.', '．'])
        && text[m.end()..].starts_with(|c: char| c.is_ascii_digit());
    (!decimal).then_some(m.end())
}

/// Remove a leading question ordinal.
pub fn strip_question_number(text: &str) -> String {
    match question_number_len(text) {
        Some(len) => text[len..].to_string(),
        None => text.to_string(),
    }
}

/// Normalize a stem for emission.
pub fn normalize_stem(text: &str) -> String {
    collapse_whitespace(&strip_question_number(text))
}

/// Normalize an option body for emission.
pub fn normalize_option(text: &str) -> String {
    collapse_whitespace(&fold_width(text))
}

const CHECK_LOOKALIKES: &[&str] = &["√", "∨", "✓", "✔", "☑", "v", "V"];
const CROSS_LOOKALIKES: &[&str] = &["×", "✗", "✘", "╳", "✕", "x", "X", "*"];
const LETTER_SEPARATORS: &[char] = &[',', '，', '、', '/', ';', '；', ' '];

/// Normalize a raw answer string to its canonical token.
///
/// Whole-token OCR look-alikes become `√`/`×`, true/false spellings become
/// `True`/`False`, and letter lists such as `A、C` become `AC`.
pub fn normalize_answer(answer: &str) -> String {
    let mut token = collapse_whitespace(&fold_width(answer));

    if token.chars().count() <= 7 {
        token = token
            .trim_end_matches(|c: char| matches!(c, '.' | '。' | ';' | '；') || c.is_whitespace())
            .to_string();
    }

    if CHECK_LOOKALIKES.contains(&token.as_str()) {
        return "√".to_string();
    }
    if CROSS_LOOKALIKES.contains(&token.as_str()) {
        return "×".to_string();
    }
    match token.to_lowercase().as_str() {
        "true" => return "True".to_string(),
        "false" => return "False".to_string(),
        _ => {}
    }

    if let Some(letters) = letter_list(&token) {
        return letters;
    }
    token
}

/// `A, C` / `A、B、D` / `ABD` → `ABD`; a lone `c` → `C`.
fn letter_list(token: &str) -> Option<String> {
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return matches!(c, 'a'..='f').then(|| c.to_ascii_uppercase().to_string());
    }

    let letters: String = token
        .chars()
        .filter(|c| !LETTER_SEPARATORS.contains(c))
        .collect();
    let all_choice_letters = !letters.is_empty() && letters.chars().all(|c| matches!(c, 'A'..='F'));
    (all_choice_letters && letters.len() <= 6).then_some(letters)
}
