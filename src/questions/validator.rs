//! Structural and quality checks for free-form question content

use crate::types::Question;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Shortest question text that does not raise a warning
const MIN_TEXT_LEN: usize = 10;

/// Outcome of validating a single question
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Validate a question. Errors make it unusable; warnings are advisory.
pub fn validate_question(question: &Question) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let text = question.text.trim();
    if text.is_empty() {
        errors.push("Question text is empty".to_string());
    } else if text.chars().count() < MIN_TEXT_LEN {
        warnings.push("Question text is very short".to_string());
    }

    if question.options.len() < 2 {
        errors.push(format!(
            "Question needs at least 2 options, got {}",
            question.options.len()
        ));
    }

    if question.options.iter().any(|o| o.trim().is_empty()) {
        errors.push("Question has an empty option".to_string());
    }

    if question.correct_answer_index >= question.options.len() {
        errors.push(format!(
            "Correct answer index {} is out of range for {} options",
            question.correct_answer_index,
            question.options.len()
        ));
    }

    let distinct: HashSet<String> = question
        .options
        .iter()
        .map(|o| o.trim().to_lowercase())
        .collect();
    if distinct.len() < question.options.len() {
        warnings.push("Question has duplicate options".to_string());
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Difficulty};

    fn question(text: &str, options: &[&str], correct: usize) -> Question {
        Question {
            id: "q".to_string(),
            text: text.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct_answer_index: correct,
            category: Category::General,
            difficulty: Difficulty::Easy,
        }
    }

    #[test]
    fn test_valid_question() {
        let result = validate_question(&question(
            "Which planet is known as the Red Planet?",
            &["Venus", "Mars", "Jupiter", "Saturn"],
            1,
        ));
        assert!(result.is_valid);
        assert!(result.errors.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_structural_errors() {
        assert!(!validate_question(&question("", &["a", "b"], 0)).is_valid);
        assert!(!validate_question(&question("Only one option here?", &["a"], 0)).is_valid);
        assert!(!validate_question(&question("Index out of range?", &["a", "b"], 2)).is_valid);
        assert!(!validate_question(&question("Blank option present?", &["a", " "], 0)).is_valid);
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let result = validate_question(&question("2 + 2?", &["4", "4", "5"], 0));
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 2);
    }
}
