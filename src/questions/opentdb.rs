//! Open Trivia DB source

use crate::error::{MatchmakingError, Result};
use crate::questions::source::{HttpFetcher, QuestionSource, SourceKind};
use crate::types::{Category, Difficulty, Question};
use crate::utils::{stable_question_id, SharedRng};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::debug;

const OPENTDB_URL: &str = "https://opentdb.com/api.php";

/// Largest `amount` the API accepts in one call
const MAX_AMOUNT: usize = 50;

#[derive(Debug, Deserialize)]
struct OpenTdbResponse {
    response_code: u8,
    #[serde(default)]
    results: Vec<OpenTdbQuestion>,
}

#[derive(Debug, Deserialize)]
struct OpenTdbQuestion {
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

/// Maps app categories onto Open Trivia DB category ids
pub fn category_id(category: Category) -> u32 {
    match category {
        Category::Current => 9,
        Category::Math => 19,
        Category::English => 9,
        Category::Culture => 22,
        Category::Sports => 21,
        Category::General => 9,
    }
}

pub struct OpenTdbSource {
    http: HttpFetcher,
    rng: SharedRng,
}

impl OpenTdbSource {
    pub fn new(http: HttpFetcher, rng: SharedRng) -> Self {
        Self { http, rng }
    }

    fn convert(
        &self,
        raw: OpenTdbQuestion,
        category: Category,
        difficulty: Difficulty,
    ) -> Question {
        let text = decode_html_entities(&raw.question);
        let correct = decode_html_entities(&raw.correct_answer);

        let mut options: Vec<String> = raw
            .incorrect_answers
            .iter()
            .map(|a| decode_html_entities(a))
            .collect();
        options.push(correct.clone());
        if let Ok(mut rng) = self.rng.lock() {
            options.shuffle(&mut *rng);
        }
        // An absent index leaves the question invalid for the validator to drop
        let correct_answer_index = options
            .iter()
            .position(|o| *o == correct)
            .unwrap_or(options.len());

        Question {
            id: stable_question_id(SourceKind::OpenTdb.name(), &text),
            text,
            options,
            correct_answer_index,
            category,
            difficulty,
        }
    }
}

#[async_trait]
impl QuestionSource for OpenTdbSource {
    fn name(&self) -> String {
        SourceKind::OpenTdb.name().to_string()
    }

    async fn fetch(
        &self,
        category: Category,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Vec<Question>> {
        let query = [
            ("amount", count.clamp(1, MAX_AMOUNT).to_string()),
            ("category", category_id(category).to_string()),
            ("difficulty", difficulty.as_str().to_string()),
            ("type", "multiple".to_string()),
        ];

        let response: OpenTdbResponse = self
            .http
            .get_json(SourceKind::OpenTdb.name(), OPENTDB_URL, &query)
            .await?;

        match response.response_code {
            0 => {}
            // No results for the combination
            1 => return Ok(Vec::new()),
            code => {
                return Err(MatchmakingError::ExternalSourceUnavailable {
                    source_name: self.name(),
                    message: format!("response code {}", code),
                }
                .into())
            }
        }

        debug!(
            "OpenTDB returned {} questions for {}/{}",
            response.results.len(),
            category,
            difficulty
        );

        Ok(response
            .results
            .into_iter()
            .map(|raw| self.convert(raw, category, difficulty))
            .collect())
    }
}

/// Decode the HTML entities OpenTDB embeds in question and answer text
pub fn decode_html_entities(input: &str) -> String {
    html_escape::decode_html_entities(input).into_owned()
}
