//! Match room state machine
//!
//! A room owns both players, the question list and the round cursor. It is
//! purely synchronous: timers, question fetching and event publication live
//! in the coordinator, which drives the room through the transitions below
//! while holding the room's lock.
//!
//! ```text
//! active ──(tie after main round)──▶ tiebreaker ──(scores differ | cap)──▶ finished
//!    └──────────────(scores differ)──────────────────────────────────────────▲
//! ```

use crate::config::RoomSettings;
use crate::error::{MatchmakingError, Result};
use crate::types::{
    Bet, MatchId, MatchOutcome, Player, PlayerId, Question, QuestionId, RoomId, RoomSnapshot,
    RoomStatus,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;

/// Round sizes and timings for a room
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub main_round_questions: usize,
    pub tiebreaker_batch_size: usize,
    pub max_tiebreaker_rounds: u32,
    pub question_time_limit: Duration,
    pub settle_delay: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::from(&RoomSettings::default())
    }
}

impl From<&RoomSettings> for RoomConfig {
    fn from(settings: &RoomSettings) -> Self {
        Self {
            main_round_questions: settings.main_round_questions,
            tiebreaker_batch_size: settings.tiebreaker_batch_size,
            max_tiebreaker_rounds: settings.max_tiebreaker_rounds,
            question_time_limit: Duration::from_secs(settings.question_time_limit_seconds),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
        }
    }
}

impl RoomConfig {
    /// Most questions a room can ever hold
    pub fn max_questions(&self) -> usize {
        self.main_round_questions
            + self.max_tiebreaker_rounds as usize * self.tiebreaker_batch_size
    }
}

/// Result of an answer submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    Recorded { correct: bool, all_answered: bool },
    Ignored { reason: String },
}

impl SubmitResult {
    fn ignored(reason: impl Into<String>) -> Self {
        SubmitResult::Ignored {
            reason: reason.into(),
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, SubmitResult::Recorded { .. })
    }
}

/// What the room needs after a round settles
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// The next question is current and its timer should start
    NextQuestion,
    /// Tied at the end of a batch; a tiebreaker batch must be appended
    TiebreakerNeeded { round: u32 },
    Finished(MatchOutcome),
}

#[derive(Debug, Clone)]
pub struct MatchRoom {
    id: RoomId,
    match_id: MatchId,
    players: Vec<Player>,
    bet: Bet,
    status: RoomStatus,
    questions: Vec<Question>,
    current_question_index: usize,
    /// One past the last question of the batch being played
    batch_end: usize,
    tiebreaker_round: u32,
    outcome: Option<MatchOutcome>,
    settling: bool,
    excluded: HashSet<QuestionId>,
    config: RoomConfig,
    created_at: DateTime<Utc>,
    question_started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl MatchRoom {
    /// Build a room from its opening batch.
    ///
    /// `excluded` is the union of both players' histories; the room adds its
    /// own questions to it so tiebreakers never repeat anything.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RoomId,
        match_id: MatchId,
        players: Vec<Player>,
        bet: Bet,
        mut questions: Vec<Question>,
        mut excluded: HashSet<QuestionId>,
        config: RoomConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if players.len() != 2 {
            return Err(MatchmakingError::InternalError {
                message: format!("A room needs exactly 2 players, got {}", players.len()),
            }
            .into());
        }
        if players[0].id == players[1].id {
            return Err(MatchmakingError::InvalidMatchRequest {
                reason: format!("Player {} cannot play against themselves", players[0].id),
            }
            .into());
        }
        if questions.is_empty() {
            return Err(MatchmakingError::NoQuestionAvailable {
                category: bet.category.to_string(),
                difficulty: bet.difficulty.to_string(),
            }
            .into());
        }

        questions.truncate(config.main_round_questions);
        excluded.extend(questions.iter().map(|q| q.id.clone()));
        let batch_end = questions.len();

        let players = players
            .into_iter()
            .map(|mut p| {
                p.score = 0;
                p.has_answered = false;
                p.current_answer_index = None;
                p
            })
            .collect();

        Ok(Self {
            id,
            match_id,
            players,
            bet,
            status: RoomStatus::Active,
            questions,
            current_question_index: 0,
            batch_end,
            tiebreaker_round: 0,
            outcome: None,
            settling: false,
            excluded,
            config,
            created_at: now,
            question_started_at: now,
            finished_at: None,
        })
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    pub fn status(&self) -> RoomStatus {
        self.status
    }

    pub fn bet(&self) -> &Bet {
        &self.bet
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == player_id)
    }

    pub fn outcome(&self) -> Option<&MatchOutcome> {
        self.outcome.as_ref()
    }

    pub fn tiebreaker_round(&self) -> u32 {
        self.tiebreaker_round
    }

    pub fn current_question_index(&self) -> usize {
        self.current_question_index
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn is_finished(&self) -> bool {
        self.status == RoomStatus::Finished
    }

    pub fn is_settling(&self) -> bool {
        self.settling
    }

    pub fn current_question(&self) -> Option<&Question> {
        if self.is_finished() {
            return None;
        }
        self.questions.get(self.current_question_index)
    }

    /// Whether a submission for the current question would be accepted
    pub fn is_answerable(&self) -> bool {
        !self.settling && self.current_question().is_some()
    }

    /// Union of both players' histories and every question in the room
    pub fn exclusion_set(&self) -> &HashSet<QuestionId> {
        &self.excluded
    }

    pub fn human_player_ids(&self) -> Vec<PlayerId> {
        self.players
            .iter()
            .filter(|p| !p.is_bot)
            .map(|p| p.id.clone())
            .collect()
    }

    /// A bot that has not answered the current question yet
    pub fn unanswered_bot(&self) -> Option<PlayerId> {
        self.players
            .iter()
            .find(|p| p.is_bot && !p.has_answered)
            .map(|p| p.id.clone())
    }

    /// Tied at the end of a batch and waiting for tiebreaker round `round`
    pub fn is_awaiting_tiebreaker(&self, round: u32) -> bool {
        self.status == RoomStatus::Tiebreaker
            && self.tiebreaker_round == round
            && self.current_question_index >= self.batch_end
    }

    pub fn all_answered(&self) -> bool {
        self.players.iter().all(|p| p.has_answered)
    }

    /// When the current question stops accepting answers
    pub fn question_deadline(&self) -> Option<DateTime<Utc>> {
        self.current_question()?;
        let limit = chrono::Duration::from_std(self.config.question_time_limit).ok()?;
        Some(self.question_started_at + limit)
    }

    /// Record an answer for the current question
    pub fn submit_answer(&mut self, player_id: &str, answer_index: usize) -> SubmitResult {
        if self.is_finished() {
            return SubmitResult::ignored("room is finished");
        }
        if self.settling {
            return SubmitResult::ignored("round is settling");
        }
        let correct = match self.current_question() {
            Some(question) => {
                if answer_index >= question.options.len() {
                    return SubmitResult::ignored(format!(
                        "answer index {} out of range",
                        answer_index
                    ));
                }
                question.is_correct(answer_index)
            }
            None => return SubmitResult::ignored("no current question"),
        };

        let player = match self.players.iter_mut().find(|p| p.id == player_id) {
            Some(player) => player,
            None => return SubmitResult::ignored(format!("{} is not in this room", player_id)),
        };
        if player.has_answered {
            return SubmitResult::ignored("already answered this question");
        }

        player.has_answered = true;
        player.current_answer_index = Some(answer_index);
        if correct {
            player.score += 1;
        }

        SubmitResult::Recorded {
            correct,
            all_answered: self.all_answered(),
        }
    }

    /// Stop accepting answers for the current question.
    /// Returns false if the round is already settling or the room cannot settle.
    pub fn begin_settling(&mut self) -> bool {
        if !self.is_answerable() {
            return false;
        }
        self.settling = true;
        true
    }

    /// Close the current question and move the cursor forward
    pub fn settle(&mut self, now: DateTime<Utc>) -> Progress {
        if let Some(outcome) = &self.outcome {
            return Progress::Finished(outcome.clone());
        }

        for player in &mut self.players {
            player.has_answered = false;
            player.current_answer_index = None;
        }
        self.settling = false;
        self.current_question_index += 1;

        if self.current_question_index >= self.batch_end {
            return self.batch_verdict(now);
        }

        self.question_started_at = now;
        Progress::NextQuestion
    }

    /// Append a tiebreaker batch. An empty batch counts as a played,
    /// still-tied tiebreaker and escalates again.
    pub fn start_tiebreaker(&mut self, batch: Vec<Question>, now: DateTime<Utc>) -> Progress {
        if let Some(outcome) = &self.outcome {
            return Progress::Finished(outcome.clone());
        }

        let fresh: Vec<Question> = batch
            .into_iter()
            .filter(|q| !self.excluded.contains(&q.id))
            .take(self.config.tiebreaker_batch_size)
            .collect();

        if fresh.is_empty() {
            return self.batch_verdict(now);
        }

        self.excluded.extend(fresh.iter().map(|q| q.id.clone()));
        self.questions.extend(fresh);
        self.batch_end = self.questions.len();
        self.status = RoomStatus::Tiebreaker;
        self.question_started_at = now;
        Progress::NextQuestion
    }

    fn batch_verdict(&mut self, now: DateTime<Utc>) -> Progress {
        let (first, second) = (&self.players[0], &self.players[1]);

        if first.score != second.score {
            let winner = if first.score > second.score {
                first.id.clone()
            } else {
                second.id.clone()
            };
            return self.finish(MatchOutcome::Winner { player_id: winner }, now);
        }

        if self.tiebreaker_round < self.config.max_tiebreaker_rounds {
            self.tiebreaker_round += 1;
            self.status = RoomStatus::Tiebreaker;
            return Progress::TiebreakerNeeded {
                round: self.tiebreaker_round,
            };
        }

        self.finish(MatchOutcome::Draw, now)
    }

    fn finish(&mut self, outcome: MatchOutcome, now: DateTime<Utc>) -> Progress {
        self.status = RoomStatus::Finished;
        self.outcome = Some(outcome.clone());
        self.settling = false;
        self.finished_at = Some(now);
        Progress::Finished(outcome)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.id,
            match_id: self.match_id,
            players: self.players.clone(),
            bet: self.bet.clone(),
            status: self.status,
            current_question: self.current_question().map(|q| q.to_public()),
            current_question_index: self.current_question_index,
            total_questions: self.questions.len(),
            tiebreaker_round: self.tiebreaker_round,
            outcome: self.outcome.clone(),
            question_deadline: self.question_deadline(),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Difficulty};
    use crate::utils::{current_timestamp, generate_match_id, generate_room_id};

    fn questions(prefix: &str, count: usize) -> Vec<Question> {
        (0..count)
            .map(|i| Question {
                id: format!("{}{}", prefix, i),
                text: format!("Question number {}?", i),
                options: vec!["right".into(), "wrong".into(), "also wrong".into()],
                correct_answer_index: 0,
                category: Category::Math,
                difficulty: Difficulty::Easy,
            })
            .collect()
    }

    fn room_with(count: usize) -> MatchRoom {
        MatchRoom::new(
            generate_room_id(),
            generate_match_id(),
            vec![Player::human("p1", "Ana"), Player::human("p2", "Bruno")],
            Bet::new(10, Category::Math, Difficulty::Easy),
            questions("q", count),
            HashSet::new(),
            RoomConfig::default(),
            current_timestamp(),
        )
        .unwrap()
    }

    /// Both players answer; `p1_right`/`p2_right` pick correct or wrong
    fn play(room: &mut MatchRoom, p1_right: bool, p2_right: bool) -> Progress {
        room.submit_answer("p1", if p1_right { 0 } else { 1 });
        room.submit_answer("p2", if p2_right { 0 } else { 1 });
        assert!(room.begin_settling());
        room.settle(current_timestamp())
    }

    #[test]
    fn test_room_creation_rules() {
        let room = room_with(12);
        assert_eq!(room.question_count(), 10);
        assert_eq!(room.status(), RoomStatus::Active);
        assert_eq!(room.exclusion_set().len(), 10);
        assert!(room.question_deadline().is_some());

        let err = MatchRoom::new(
            generate_room_id(),
            generate_match_id(),
            vec![Player::human("p1", "Ana")],
            Bet::new(10, Category::Math, Difficulty::Easy),
            questions("q", 10),
            HashSet::new(),
            RoomConfig::default(),
            current_timestamp(),
        );
        assert!(err.is_err());

        let err = MatchRoom::new(
            generate_room_id(),
            generate_match_id(),
            vec![Player::human("p1", "Ana"), Player::human("p2", "Bruno")],
            Bet::new(10, Category::Math, Difficulty::Easy),
            Vec::new(),
            HashSet::new(),
            RoomConfig::default(),
            current_timestamp(),
        )
        .unwrap_err();
        assert!(crate::error::is_no_question_available(&err));
    }

    #[test]
    fn test_double_submission_is_ignored() {
        let mut room = room_with(10);
        assert_eq!(
            room.submit_answer("p1", 0),
            SubmitResult::Recorded {
                correct: true,
                all_answered: false
            }
        );
        assert!(!room.submit_answer("p1", 1).is_recorded());
        assert_eq!(room.player("p1").unwrap().score, 1);
        assert_eq!(room.player("p1").unwrap().current_answer_index, Some(0));

        assert!(!room.submit_answer("stranger", 0).is_recorded());
        assert!(!room.submit_answer("p2", 7).is_recorded());
        assert_eq!(
            room.submit_answer("p2", 2),
            SubmitResult::Recorded {
                correct: false,
                all_answered: true
            }
        );
    }

    #[test]
    fn test_no_answers_while_settling() {
        let mut room = room_with(10);
        room.submit_answer("p1", 0);
        assert!(room.begin_settling());
        assert!(!room.begin_settling());
        assert!(!room.submit_answer("p2", 0).is_recorded());

        assert_eq!(room.settle(current_timestamp()), Progress::NextQuestion);
        assert_eq!(room.current_question_index(), 1);
        assert!(!room.player("p1").unwrap().has_answered);
        assert!(room.submit_answer("p2", 0).is_recorded());
    }

    #[test]
    fn test_main_round_winner() {
        let mut room = room_with(10);
        let mut last = Progress::NextQuestion;
        for i in 0..10 {
            // p1 gets six right, p2 gets four right
            last = play(&mut room, i < 6, i < 4);
        }

        assert_eq!(
            last,
            Progress::Finished(MatchOutcome::Winner {
                player_id: "p1".to_string()
            })
        );
        assert_eq!(room.status(), RoomStatus::Finished);
        assert!(room.current_question().is_none());
        assert!(!room.submit_answer("p1", 0).is_recorded());

        let snapshot = room.snapshot();
        assert_eq!(snapshot.player("p1").unwrap().score, 6);
        assert_eq!(snapshot.player("p2").unwrap().score, 4);
        assert!(snapshot.current_question.is_none());
        assert!(snapshot.question_deadline.is_none());
    }

    #[test]
    fn test_tiebreakers_until_draw() {
        let mut room = room_with(10);
        for _ in 0..9 {
            assert_eq!(play(&mut room, true, true), Progress::NextQuestion);
        }
        assert_eq!(
            play(&mut room, true, true),
            Progress::TiebreakerNeeded { round: 1 }
        );
        assert_eq!(room.status(), RoomStatus::Tiebreaker);

        for round in 1..=3u32 {
            let progress =
                room.start_tiebreaker(questions(&format!("t{}-", round), 5), current_timestamp());
            assert_eq!(progress, Progress::NextQuestion);

            for _ in 0..4 {
                assert_eq!(play(&mut room, false, false), Progress::NextQuestion);
            }
            let progress = play(&mut room, false, false);
            if round < 3 {
                assert_eq!(progress, Progress::TiebreakerNeeded { round: round + 1 });
            } else {
                assert_eq!(progress, Progress::Finished(MatchOutcome::Draw));
            }
        }

        assert_eq!(room.question_count(), 25);
        assert_eq!(room.tiebreaker_round(), 3);
        assert_eq!(room.outcome(), Some(&MatchOutcome::Draw));
    }

    #[test]
    fn test_tiebreaker_decides_winner() {
        let mut room = room_with(10);
        for _ in 0..10 {
            play(&mut room, false, false);
        }
        room.start_tiebreaker(questions("t", 5), current_timestamp());
        let progress = play(&mut room, false, true);
        assert_eq!(progress, Progress::NextQuestion);
        for _ in 0..4 {
            play(&mut room, false, false);
        }

        assert_eq!(
            room.outcome(),
            Some(&MatchOutcome::Winner {
                player_id: "p2".to_string()
            })
        );
        assert_eq!(room.tiebreaker_round(), 1);
    }

    #[test]
    fn test_empty_tiebreaker_escalates() {
        let mut room = room_with(10);
        for _ in 0..10 {
            play(&mut room, true, true);
        }

        assert_eq!(
            room.start_tiebreaker(Vec::new(), current_timestamp()),
            Progress::TiebreakerNeeded { round: 2 }
        );
        // Repeated ids are filtered out, so this batch is empty too
        assert_eq!(
            room.start_tiebreaker(questions("q", 5), current_timestamp()),
            Progress::TiebreakerNeeded { round: 3 }
        );
        assert_eq!(
            room.start_tiebreaker(Vec::new(), current_timestamp()),
            Progress::Finished(MatchOutcome::Draw)
        );
        assert_eq!(room.question_count(), 10);
    }

    #[test]
    fn test_short_opening_batch() {
        let mut room = room_with(3);
        play(&mut room, true, false);
        play(&mut room, true, false);
        let progress = play(&mut room, true, false);
        assert!(matches!(progress, Progress::Finished(_)));
        assert_eq!(room.question_count(), 3);
    }

    #[test]
    fn test_snapshot_hides_answer_key() {
        let room = room_with(10);
        let json = serde_json::to_value(room.snapshot()).unwrap();
        assert!(json["current_question"].get("correct_answer_index").is_none());
        assert_eq!(json["status"], "active");
        assert_eq!(json["total_questions"], 10);
    }
}
