//! Built-in question bank, used as the last-resort source

use crate::error::{MatchmakingError, Result};
use crate::questions::source::QuestionSource;
use crate::types::{Category, Difficulty, Question};
use crate::utils::SharedRng;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::info;

/// Name the local bank reports in logs, metrics and stats
pub const LOCAL_SOURCE_NAME: &str = "local";

const EMBEDDED_BANK: &str = include_str!("local_bank.json");

/// In-process question bank filtered by exact category and difficulty
pub struct LocalQuestionBank {
    questions: Vec<Question>,
    rng: SharedRng,
}

impl LocalQuestionBank {
    /// Load the bank compiled into the binary
    pub fn embedded(rng: SharedRng) -> Result<Self> {
        let questions: Vec<Question> = serde_json::from_str(EMBEDDED_BANK).map_err(|e| {
            MatchmakingError::ConfigurationError {
                message: format!("Embedded question bank is malformed: {}", e),
            }
        })?;

        info!("Loaded {} questions into the local bank", questions.len());
        Ok(Self::from_questions(questions, rng))
    }

    pub fn from_questions(questions: Vec<Question>, rng: SharedRng) -> Self {
        Self { questions, rng }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// Number of questions matching the category and difficulty exactly
    pub fn count_for(&self, category: Category, difficulty: Difficulty) -> usize {
        self.questions
            .iter()
            .filter(|q| q.category == category && q.difficulty == difficulty)
            .count()
    }
}

#[async_trait]
impl QuestionSource for LocalQuestionBank {
    fn name(&self) -> String {
        LOCAL_SOURCE_NAME.to_string()
    }

    async fn fetch(
        &self,
        category: Category,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Question>> {
        let mut matching: Vec<Question> = self
            .questions
            .iter()
            .filter(|q| q.category == category && q.difficulty == difficulty)
            .cloned()
            .collect();

        if let Ok(mut rng) = self.rng.lock() {
            matching.shuffle(&mut *rng);
        }
        matching.truncate(count);
        Ok(matching)
    }
}
