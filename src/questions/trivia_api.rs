//! The Trivia API (v2) source

use crate::error::Result;
use crate::questions::source::{HttpFetcher, QuestionSource, SourceKind};
use crate::types::{Category, Difficulty, Question};
use crate::utils::SharedRng;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::debug;

const TRIVIA_API_URL: &str = "https://the-trivia-api.com/v2/questions";

const MAX_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriviaApiQuestion {
    id: String,
    question: TriviaApiText,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TriviaApiText {
    text: String,
}

/// Maps app categories onto The Trivia API category slugs
pub fn category_slug(category: Category) -> &'static str {
    match category {
        Category::Current => "general_knowledge",
        Category::Math => "science",
        Category::English => "general_knowledge",
        Category::Culture => "geography",
        Category::Sports => "sport_and_leisure",
        Category::General => "general_knowledge",
    }
}

pub struct TriviaApiSource {
    http: HttpFetcher,
    rng: SharedRng,
}

impl TriviaApiSource {
    pub fn new(http: HttpFetcher, rng: SharedRng) -> Self {
        Self { http, rng }
    }

    fn convert(
        &self,
        raw: TriviaApiQuestion,
        category: Category,
        difficulty: Difficulty,
    ) -> Question {
        let mut options = raw.incorrect_answers;
        options.push(raw.correct_answer.clone());
        if let Ok(mut rng) = self.rng.lock() {
            options.shuffle(&mut *rng);
        }
        let correct_answer_index = options
            .iter()
            .position(|o| *o == raw.correct_answer)
            .unwrap_or(options.len());

        Question {
            id: format!("{}_{}", SourceKind::TriviaApi.name(), raw.id),
            text: raw.question.text,
            options,
            correct_answer_index,
            category,
            difficulty,
        }
    }
}

#[async_trait]
impl QuestionSource for TriviaApiSource {
    fn name(&self) -> String {
        SourceKind::TriviaApi.name().to_string()
    }

    async fn fetch(
        &self,
        category: Category,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Question>> {
        let query = [
            ("limit", count.clamp(1, MAX_LIMIT).to_string()),
            ("categories", category_slug(category).to_string()),
            ("difficulties", difficulty.as_str().to_string()),
        ];

        let raw: Vec<TriviaApiQuestion> = self
            .http
            .get_json(SourceKind::TriviaApi.name(), TRIVIA_API_URL, &query)
            .await?;

        debug!(
            "The Trivia API returned {} questions for {}/{}",
            raw.len(),
            category,
            difficulty
        );

        Ok(raw
            .into_iter()
            .map(|q| self.convert(q, category, difficulty))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::source::HttpSourceConfig;
    use crate::utils::shared_rng;

    #[test]
    fn test_parse_v2_payload() {
        let payload = r#"[{
            "id": "622a1c357cc59eab6f94fd43",
            "category": "sport_and_leisure",
            "correctAnswer": "Brazil",
            "incorrectAnswers": ["Germany", "Italy", "Argentina"],
            "question": {"text": "Which country has won the most FIFA World Cups?"},
            "difficulty": "easy",
            "type": "text_choice"
        }]"#;
        let parsed: Vec<TriviaApiQuestion> = serde_json::from_str(payload).unwrap();

        let source = TriviaApiSource::new(
            HttpFetcher::new(HttpSourceConfig::default()).unwrap(),
            shared_rng(Some(11)),
        );
        let question = source.convert(
            parsed.into_iter().next().unwrap(),
            Category::Sports,
            Difficulty::Easy,
        );

        assert_eq!(question.id, "the-trivia-api_622a1c357cc59eab6f94fd43");
        assert_eq!(question.options[question.correct_answer_index], "Brazil");
        assert_eq!(question.category, Category::Sports);
    }

    #[test]
    fn test_category_slugs() {
        assert_eq!(category_slug(Category::Math), "science");
        assert_eq!(category_slug(Category::Culture), "geography");
        assert_eq!(category_slug(Category::Sports), "sport_and_leisure");
    }
}
