//! Free-response and multiple-choice answers recorded during a stage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A scored multiple-choice answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipleChoiceResponse {
    /// Question tag
    pub tag: String,

    /// Score awarded for the final answer
    pub score: Option<u32>,

    /// Index of the chosen option
    pub choice: Option<usize>,

    /// Number of attempts
    pub tries: u32,

    /// Attempts that were wrong
    pub wrong_attempts: u32,
}

impl MultipleChoiceResponse {
    /// Create an unanswered response.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            score: None,
            choice: None,
            tries: 0,
            wrong_attempts: 0,
        }
    }
}

/// A free-text answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeResponse {
    /// Question tag
    pub tag: String,

    /// Answer text
    pub response: String,
}

/// All answers of a stage, keyed by question tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Responses {
    /// Multiple-choice answers
    #[serde(default)]
    pub multiple_choice: BTreeMap<String, MultipleChoiceResponse>,

    /// Free-text answers
    #[serde(default)]
    pub free: BTreeMap<String, FreeResponse>,
}

impl Responses {
    /// Record an attempt at a multiple-choice question.
    ///
    /// Once a question is scored its score and choice are kept; later
    /// attempts only count as tries.
    pub fn record_multiple_choice(
        &mut self,
        tag: &str,
        choice: usize,
        correct: bool,
        score: u32,
    ) -> &MultipleChoiceResponse {
        let entry = self
            .multiple_choice
            .entry(tag.to_string())
            .or_insert_with(|| MultipleChoiceResponse::new(tag));

        entry.tries += 1;
        if entry.score.is_none() {
            entry.choice = Some(choice);
            if correct {
                entry.score = Some(score);
            } else {
                entry.wrong_attempts += 1;
            }
        }
        entry
    }

    /// Record a free-text answer, replacing any earlier one.
    pub fn record_free_response(&mut self, tag: &str, response: impl Into<String>) {
        self.free.insert(
            tag.to_string(),
            FreeResponse {
                tag: tag.to_string(),
                response: response.into(),
            },
        );
    }

    /// Get a multiple-choice answer.
    pub fn multiple_choice(&self, tag: &str) -> Option<&MultipleChoiceResponse> {
        self.multiple_choice.get(tag)
    }

    /// Get a free-text answer.
    pub fn free_response(&self, tag: &str) -> Option<&FreeResponse> {
        self.free.get(tag)
    }

    /// Whether the question has a scored answer or a non-blank free response.
    pub fn question_completed(&self, tag: &str) -> bool {
        if let Some(mc) = self.multiple_choice.get(tag) {
            return mc.score.is_some();
        }
        self.free
            .get(tag)
            .map(|fr| !fr.response.trim().is_empty())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_then_right_answer() {
        let mut responses = Responses::default();
        responses.record_multiple_choice("which-galaxy-closer", 0, false, 0);
        assert!(!responses.question_completed("which-galaxy-closer"));

        let mc = responses.record_multiple_choice("which-galaxy-closer", 2, true, 10);
        assert_eq!(mc.tries, 2);
        assert_eq!(mc.wrong_attempts, 1);
        assert_eq!(mc.score, Some(10));
        assert_eq!(mc.choice, Some(2));
        assert!(responses.question_completed("which-galaxy-closer"));
    }

    #[test]
    fn test_scored_answer_is_kept() {
        let mut responses = Responses::default();
        responses.record_multiple_choice("q", 1, true, 5);
        let mc = responses.record_multiple_choice("q", 3, false, 0);
        assert_eq!(mc.score, Some(5));
        assert_eq!(mc.choice, Some(1));
        assert_eq!(mc.tries, 2);
    }

    #[test]
    fn test_blank_free_response_is_not_complete() {
        let mut responses = Responses::default();
        responses.record_free_response("fr-1", "   ");
        assert!(!responses.question_completed("fr-1"));
        responses.record_free_response("fr-1", "galaxies move away");
        assert!(responses.question_completed("fr-1"));
        assert!(!responses.question_completed("unknown"));
    }
}
