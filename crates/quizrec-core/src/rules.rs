//! Deterministic rule engine.
//!
//! Rules are data: each one is a weighted list of boolean [`Condition`]s plus
//! the type it votes for. Rules run in priority order (lower first) and the
//! first one whose satisfaction reaches its threshold wins.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::RuleOverride;
use crate::error::RuleError;
use crate::features::QuestionFeatures;
use crate::lexicon::{self, FREE_RESPONSE_RULE_CUES, MULTI_SELECT_RULE_CUES};
use crate::model::{ParsedQuestion, QuestionType, RuleDecision};

/// A boolean test over one question and its features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Condition {
    /// The answer is a true/false token. Bare `T`/`F` do not count when the
    /// question has options, since they read as option letters.
    AnswerIsTrueFalse,
    HasBlankMarkers,
    /// A non-empty answer that is not made of option letters.
    AnswerNotLetter,
    NoOptions,
    HasMultiSelectCue,
    HasOptions,
    MinOptions { count: usize },
    OptionCountBetween { min: usize, max: usize },
    SingleLetterAnswer,
    /// Answer strictly longer than `min_chars` characters.
    LongAnswer { min_chars: usize },
    HasFreeResponseCue,
}

impl Condition {
    pub fn evaluate(&self, question: &ParsedQuestion, features: &QuestionFeatures) -> bool {
        let answer = question.answer_raw.trim();
        match self {
            Condition::AnswerIsTrueFalse => {
                let letter_like = matches!(answer, "T" | "F") && features.num_options >= 2;
                lexicon::is_true_false_token(answer) && !letter_like
            }
            Condition::HasBlankMarkers => {
                features.blank_underline_count + features.blank_parenthesis_count > 0
            }
            Condition::AnswerNotLetter => {
                !answer.is_empty()
                    && !features.answer_is_single_letter
                    && !features.answer_is_multi_letters
            }
            Condition::NoOptions => !features.has_options,
            Condition::HasMultiSelectCue => {
                lexicon::has_any_cue(&question.question, MULTI_SELECT_RULE_CUES)
            }
            Condition::HasOptions => features.has_options,
            Condition::MinOptions { count } => features.num_options >= *count,
            Condition::OptionCountBetween { min, max } => {
                (*min..=*max).contains(&features.num_options)
            }
            Condition::SingleLetterAnswer => features.answer_is_single_letter,
            Condition::LongAnswer { min_chars } => features.answer_len > *min_chars,
            Condition::HasFreeResponseCue => {
                lexicon::has_any_cue(&question.question, FREE_RESPONSE_RULE_CUES)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedCondition {
    pub condition: Condition,
    pub weight: f64,
}

impl WeightedCondition {
    pub fn new(condition: Condition, weight: f64) -> Self {
        Self { condition, weight }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> f64 {
    0.6
}

/// One named rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    /// Lower runs first.
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Minimum satisfaction required to fire.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub conditions: Vec<WeightedCondition>,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub base_confidence: f64,
    pub explanation: String,
}

impl Rule {
    /// Weighted share of satisfied conditions, in [0,1].
    pub fn satisfaction(&self, question: &ParsedQuestion, features: &QuestionFeatures) -> f64 {
        let total: f64 = self.conditions.iter().map(|c| c.weight).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let met: f64 = self
            .conditions
            .iter()
            .filter(|c| c.condition.evaluate(question, features))
            .map(|c| c.weight)
            .sum();
        met / total
    }

    /// The decision this rule emits for `question`, if it fires.
    pub fn evaluate(
        &self,
        question: &ParsedQuestion,
        features: &QuestionFeatures,
    ) -> Option<RuleDecision> {
        let satisfaction = self.satisfaction(question, features);
        (satisfaction >= self.threshold).then(|| RuleDecision {
            rule_name: self.name.clone(),
            question_type: self.question_type,
            confidence: (self.base_confidence * satisfaction).clamp(0.0, 1.0),
            explanation: format!("{} (satisfaction {:.2})", self.explanation, satisfaction),
            priority: self.priority,
        })
    }
}

/// The built-in rule table.
pub fn default_rules() -> Vec<Rule> {
    use Condition::*;
    let rule = |name: &str,
                priority: i32,
                conditions: Vec<(Condition, f64)>,
                question_type: QuestionType,
                base_confidence: f64,
                explanation: &str| Rule {
        name: name.to_string(),
        priority,
        enabled: true,
        threshold: default_threshold(),
        conditions: conditions
            .into_iter()
            .map(|(c, w)| WeightedCondition::new(c, w))
            .collect(),
        question_type,
        base_confidence,
        explanation: explanation.to_string(),
    };

    vec![
        rule(
            "true_false_answer",
            1,
            vec![(AnswerIsTrueFalse, 2.0)],
            QuestionType::TrueFalse,
            0.95,
            "answer is a true/false token",
        ),
        rule(
            "fill_blank_markers",
            2,
            vec![(HasBlankMarkers, 1.5), (AnswerNotLetter, 1.0), (NoOptions, 0.5)],
            QuestionType::FillBlank,
            0.90,
            "stem has blank markers and a non-letter answer",
        ),
        rule(
            "multiple_choice_hints",
            3,
            vec![
                (HasMultiSelectCue, 2.0),
                (HasOptions, 1.0),
                (MinOptions { count: 3 }, 0.5),
            ],
            QuestionType::MultipleChoice,
            0.88,
            "stem asks for several options",
        ),
        rule(
            "single_choice_default",
            4,
            vec![
                (HasOptions, 1.0),
                (OptionCountBetween { min: 2, max: 6 }, 1.0),
                (SingleLetterAnswer, 1.5),
            ],
            QuestionType::SingleChoice,
            0.85,
            "options with a single-letter answer",
        ),
        rule(
            "free_response_fallback",
            5,
            vec![
                (NoOptions, 1.0),
                (LongAnswer { min_chars: 15 }, 1.5),
                (HasFreeResponseCue, 1.0),
            ],
            QuestionType::FreeResponse,
            0.80,
            "no options and a long written answer",
        ),
    ]
}

/// Diagnostic view of one rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInfo {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub total: usize,
    pub enabled: usize,
    pub rules: Vec<RuleInfo>,
}

/// Ordered rule table with runtime administration.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl RuleEngine {
    /// Build an engine; rules are kept sorted by priority (stable).
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        Self { rules }
    }

    pub fn with_default_rules() -> Self {
        Self::new(default_rules())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Run enabled rules in priority order and return the first decision.
    pub fn apply(
        &self,
        question: &ParsedQuestion,
        features: &QuestionFeatures,
    ) -> Option<RuleDecision> {
        let decision = self
            .rules
            .iter()
            .filter(|r| r.enabled)
            .find_map(|r| r.evaluate(question, features));
        if let Some(d) = &decision {
            tracing::debug!(
                rule = %d.rule_name,
                question_type = %d.question_type,
                confidence = d.confidence,
                "rule fired"
            );
        }
        decision
    }

    /// Every decision an enabled rule would emit, in priority order.
    pub fn evaluate_all(
        &self,
        question: &ParsedQuestion,
        features: &QuestionFeatures,
    ) -> Vec<RuleDecision> {
        self.rules
            .iter()
            .filter(|r| r.enabled)
            .filter_map(|r| r.evaluate(question, features))
            .collect()
    }

    /// Keep the decision with the lowest priority number; ties go to the
    /// earliest. Discarded alternatives are logged.
    pub fn resolve_conflicts(mut decisions: Vec<RuleDecision>) -> Option<RuleDecision> {
        let winner_idx = decisions
            .iter()
            .enumerate()
            .min_by_key(|(i, d)| (d.priority, *i))
            .map(|(i, _)| i)?;
        let winner = decisions.swap_remove(winner_idx);
        for discarded in &decisions {
            tracing::warn!(
                kept = %winner.rule_name,
                discarded = %discarded.rule_name,
                discarded_type = %discarded.question_type,
                "conflicting rule decision discarded"
            );
        }
        Some(winner)
    }

    fn rule_mut(&mut self, name: &str) -> Result<&mut Rule, RuleError> {
        self.rules
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| RuleError::UnknownRule(name.to_string()))
    }

    pub fn enable_rule(&mut self, name: &str) -> Result<(), RuleError> {
        self.rule_mut(name)?.enabled = true;
        tracing::info!(rule = name, "rule enabled");
        Ok(())
    }

    pub fn disable_rule(&mut self, name: &str) -> Result<(), RuleError> {
        self.rule_mut(name)?.enabled = false;
        tracing::info!(rule = name, "rule disabled");
        Ok(())
    }

    pub fn set_threshold(&mut self, name: &str, threshold: f64) -> Result<(), RuleError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RuleError::InvalidThreshold {
                rule: name.to_string(),
                threshold,
            });
        }
        self.rule_mut(name)?.threshold = threshold;
        tracing::info!(rule = name, threshold, "rule threshold updated");
        Ok(())
    }

    /// Apply configuration overrides. Stops at the first invalid entry.
    pub fn apply_overrides(
        &mut self,
        overrides: &HashMap<String, RuleOverride>,
    ) -> Result<(), RuleError> {
        let mut names: Vec<&String> = overrides.keys().collect();
        names.sort();
        for name in names {
            let o = &overrides[name];
            match o.enabled {
                Some(true) => self.enable_rule(name)?,
                Some(false) => self.disable_rule(name)?,
                None => {
                    self.rule_mut(name)?;
                }
            }
            if let Some(threshold) = o.threshold {
                self.set_threshold(name, threshold)?;
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            total: self.rules.len(),
            enabled: self.rules.iter().filter(|r| r.enabled).count(),
            rules: self
                .rules
                .iter()
                .map(|r| RuleInfo {
                    name: r.name.clone(),
                    priority: r.priority,
                    enabled: r.enabled,
                    threshold: r.threshold,
                })
                .collect(),
        }
    }
}
