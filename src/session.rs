//! Player sessions
//!
//! A player is either practising alone or bound to a multiplayer room, never
//! both. Solo practice has no wager and no opponent: ten questions and a pass
//! mark.

use crate::error::{MatchmakingError, Result};
use crate::types::{Category, Difficulty, PlayerId, PublicQuestion, Question, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Correct answers needed to pass a solo session
pub const SOLO_PASS_THRESHOLD: u32 = 3;

/// Questions in a solo session
pub const SOLO_QUESTION_COUNT: usize = 10;

/// The mode a player is currently in
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GameSession {
    Solo(SoloSession),
    Multiplayer { room_id: RoomId },
}

/// Result of answering a solo question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoloAnswer {
    pub correct: bool,
    pub correct_answer_index: usize,
    pub score: u32,
    pub finished: bool,
    pub passed: bool,
}

/// Solo practice run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoloSession {
    pub player_id: PlayerId,
    pub category: Category,
    pub difficulty: Difficulty,
    #[serde(skip)]
    questions: Vec<Question>,
    pub current_index: usize,
    pub total_questions: usize,
    pub score: u32,
    pub started_at: DateTime<Utc>,
}

impl SoloSession {
    pub fn new(
        player_id: PlayerId,
        category: Category,
        difficulty: Difficulty,
        questions: Vec<Question>,
        started_at: DateTime<Utc>,
    ) -> Result<Self> {
        if questions.is_empty() {
            return Err(MatchmakingError::NoQuestionAvailable {
                category: category.to_string(),
                difficulty: difficulty.to_string(),
            }
            .into());
        }

        Ok(Self {
            player_id,
            category,
            difficulty,
            total_questions: questions.len(),
            questions,
            current_index: 0,
            score: 0,
            started_at,
        })
    }

    pub fn current_question(&self) -> Option<PublicQuestion> {
        self.questions.get(self.current_index).map(|q| q.to_public())
    }

    pub fn question_ids(&self) -> Vec<String> {
        self.questions.iter().map(|q| q.id.clone()).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.current_index >= self.questions.len()
    }

    pub fn passed(&self) -> bool {
        self.score >= SOLO_PASS_THRESHOLD
    }

    /// Answer the current question and move to the next one
    pub fn answer(&mut self, answer_index: usize) -> Result<SoloAnswer> {
        let question = self.questions.get(self.current_index).ok_or_else(|| {
            MatchmakingError::InvalidAnswerSubmission {
                reason: "solo session is already finished".to_string(),
            }
        })?;

        if answer_index >= question.options.len() {
            return Err(MatchmakingError::InvalidAnswerSubmission {
                reason: format!("answer index {} out of range", answer_index),
            }
            .into());
        }

        let correct = question.is_correct(answer_index);
        let correct_answer_index = question.correct_answer_index;
        if correct {
            self.score += 1;
        }
        self.current_index += 1;

        Ok(SoloAnswer {
            correct,
            correct_answer_index,
            score: self.score,
            finished: self.is_finished(),
            passed: self.passed(),
        })
    }
}

/// Which session each player is in
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<PlayerId, GameSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_multiplayer(&self, player_id: &str, room_id: RoomId) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(player_id.to_string(), GameSession::Multiplayer { room_id });
        }
    }

    pub fn start_solo(&self, session: SoloSession) -> Result<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_failed("sessions write"))?;
        sessions.insert(session.player_id.clone(), GameSession::Solo(session));
        Ok(())
    }

    pub fn get(&self, player_id: &str) -> Option<GameSession> {
        self.sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(player_id).cloned())
    }

    /// Answer in the player's solo session, returning the finished session when it completes
    pub fn answer_solo(
        &self,
        player_id: &str,
        answer_index: usize,
    ) -> Result<(SoloAnswer, Option<SoloSession>)> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| MatchmakingError::lock_failed("sessions write"))?;

        let session = match sessions.get_mut(player_id) {
            Some(GameSession::Solo(session)) => session,
            _ => {
                return Err(MatchmakingError::PlayerNotFound {
                    player_id: format!("{} has no solo session", player_id),
                }
                .into())
            }
        };

        let answer = session.answer(answer_index)?;
        let finished = answer.finished.then(|| session.clone());
        Ok((answer, finished))
    }

    pub fn end(&self, player_id: &str) -> Option<GameSession> {
        self.sessions
            .write()
            .ok()
            .and_then(|mut sessions| sessions.remove(player_id))
    }

    /// Drop every multiplayer binding to `room_id`
    pub fn release_room(&self, room_id: RoomId) -> usize {
        let mut sessions = match self.sessions.write() {
            Ok(sessions) => sessions,
            Err(_) => return 0,
        };
        let before = sessions.len();
        sessions.retain(|_, session| {
            !matches!(session, GameSession::Multiplayer { room_id: bound } if *bound == room_id)
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
