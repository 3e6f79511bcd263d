//! Bot answer simulation
//!
//! A bot answers each question it is asked after a random delay, correctly
//! with a fixed probability and otherwise with a random wrong option. The
//! answer goes through the same submission path as a human's.

use crate::config::BotSettings;
use crate::error::Result;
use crate::room::instance::SubmitResult;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::types::{PlayerId, RoomId};
use crate::utils::SharedRng;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Bot answers land at least this long before the question closes
const DEADLINE_MARGIN: Duration = Duration::from_millis(100);

/// Where simulated answers are submitted
#[async_trait]
pub trait AnswerSink: Send + Sync {
    /// Submit an answer for question `question_index` of the room.
    /// Submissions for a question the room has moved past are ignored.
    async fn submit_for_question(
        &self,
        room_id: RoomId,
        player_id: &str,
        question_index: usize,
        answer_index: usize,
    ) -> Result<SubmitResult>;
}

/// The question a bot is being asked to answer
#[derive(Debug, Clone)]
pub struct BotTurn {
    pub room_id: RoomId,
    pub bot_id: PlayerId,
    pub question_index: usize,
    pub correct_answer_index: usize,
    pub option_count: usize,
    /// Time until the question stops accepting answers
    pub time_left: Option<Duration>,
}

pub struct BotAnswerSimulator {
    accuracy: f64,
    min_delay: Duration,
    max_delay: Duration,
    rng: SharedRng,
    scheduler: Arc<dyn Scheduler>,
}

impl BotAnswerSimulator {
    pub fn new(settings: &BotSettings, rng: SharedRng, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            accuracy: settings.accuracy.clamp(0.0, 1.0),
            min_delay: Duration::from_millis(settings.min_answer_delay_ms),
            max_delay: Duration::from_millis(
                settings.max_answer_delay_ms.max(settings.min_answer_delay_ms),
            ),
            rng,
            scheduler,
        }
    }

    /// Schedule the bot's answer for `turn`, submitted to `sink` after a random delay
    pub fn schedule_answer(&self, sink: Arc<dyn AnswerSink>, turn: BotTurn) -> TimerHandle {
        let mut delay = self.answer_delay();
        if let Some(time_left) = turn.time_left {
            delay = delay.min(time_left.saturating_sub(DEADLINE_MARGIN));
        }
        let answer_index = self.choose_answer(turn.correct_answer_index, turn.option_count);

        debug!(
            "Bot {} will answer question {} in room {} after {:?}",
            turn.bot_id, turn.question_index, turn.room_id, delay
        );

        self.scheduler.after(
            delay,
            Box::pin(async move {
                match sink
                    .submit_for_question(
                        turn.room_id,
                        &turn.bot_id,
                        turn.question_index,
                        answer_index,
                    )
                    .await
                {
                    Ok(SubmitResult::Recorded { correct, .. }) => debug!(
                        "Bot {} answered question {} in room {} ({})",
                        turn.bot_id,
                        turn.question_index,
                        turn.room_id,
                        if correct { "correct" } else { "wrong" }
                    ),
                    Ok(SubmitResult::Ignored { reason }) => debug!(
                        "Bot answer for room {} dropped: {}",
                        turn.room_id, reason
                    ),
                    Err(e) => warn!("Bot answer for room {} failed: {}", turn.room_id, e),
                }
            }),
        )
    }

    /// Random delay within the configured window
    pub fn answer_delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(self.min_delay..=self.max_delay),
            Err(_) => self.max_delay,
        }
    }

    /// Correct with probability `accuracy`, otherwise a uniformly random wrong option
    pub fn choose_answer(&self, correct_answer_index: usize, option_count: usize) -> usize {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(_) => return correct_answer_index,
        };

        if rng.gen_bool(self.accuracy) {
            return correct_answer_index;
        }

        let wrong: Vec<usize> = (0..option_count)
            .filter(|i| *i != correct_answer_index)
            .collect();
        wrong
            .choose(&mut *rng)
            .copied()
            .unwrap_or(correct_answer_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use crate::utils::shared_rng;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(RoomId, String, usize, usize)>>,
    }

    #[async_trait]
    impl AnswerSink for RecordingSink {
        async fn submit_for_question(
            &self,
            room_id: RoomId,
            player_id: &str,
            question_index: usize,
            answer_index: usize,
        ) -> Result<SubmitResult> {
            self.calls.lock().unwrap().push((
                room_id,
                player_id.to_string(),
                question_index,
                answer_index,
            ));
            Ok(SubmitResult::Recorded {
                correct: true,
                all_answered: true,
            })
        }
    }

    fn simulator(accuracy: f64, scheduler: Arc<ManualScheduler>) -> BotAnswerSimulator {
        BotAnswerSimulator::new(
            &BotSettings {
                accuracy,
                min_answer_delay_ms: 1_000,
                max_answer_delay_ms: 4_000,
            },
            shared_rng(Some(17)),
            scheduler,
        )
    }

    #[test]
    fn test_delay_within_window() {
        let sim = simulator(0.75, Arc::new(ManualScheduler::new()));
        for _ in 0..200 {
            let delay = sim.answer_delay();
            assert!(delay >= Duration::from_secs(1) && delay <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_accuracy_extremes() {
        let sim = simulator(1.0, Arc::new(ManualScheduler::new()));
        assert!((0..100).all(|_| sim.choose_answer(2, 4) == 2));

        let sim = simulator(0.0, Arc::new(ManualScheduler::new()));
        let answers: Vec<usize> = (0..200).map(|_| sim.choose_answer(2, 4)).collect();
        assert!(answers.iter().all(|a| *a != 2 && *a < 4));
        // Every wrong option shows up
        for wrong in [0, 1, 3] {
            assert!(answers.contains(&wrong));
        }
    }

    #[test]
    fn test_accuracy_is_roughly_honoured() {
        let sim = simulator(0.75, Arc::new(ManualScheduler::new()));
        let correct = (0..4_000).filter(|_| sim.choose_answer(0, 4) == 0).count();
        let rate = correct as f64 / 4_000.0;
        assert!((0.70..0.80).contains(&rate), "rate was {}", rate);
    }

    #[tokio::test]
    async fn test_answer_submitted_after_delay() {
        let scheduler = Arc::new(ManualScheduler::new());
        let sim = simulator(0.75, scheduler.clone());
        let sink = Arc::new(RecordingSink::default());
        let room_id = crate::utils::generate_room_id();

        sim.schedule_answer(
            sink.clone(),
            BotTurn {
                room_id,
                bot_id: "bot_1".to_string(),
                question_index: 3,
                correct_answer_index: 1,
                option_count: 4,
                time_left: None,
            },
        );

        scheduler.advance(Duration::from_millis(999)).await;
        assert!(sink.calls.lock().unwrap().is_empty());

        scheduler.advance(Duration::from_secs(3)).await;
        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, room_id);
        assert_eq!(calls[0].2, 3);
    }

    #[tokio::test]
    async fn test_delay_is_clamped_to_question_deadline() {
        let scheduler = Arc::new(ManualScheduler::new());
        let sim = simulator(1.0, scheduler.clone());
        let sink = Arc::new(RecordingSink::default());

        sim.schedule_answer(
            sink.clone(),
            BotTurn {
                room_id: crate::utils::generate_room_id(),
                bot_id: "bot_1".to_string(),
                question_index: 0,
                correct_answer_index: 0,
                option_count: 4,
                time_left: Some(Duration::from_millis(500)),
            },
        );

        // Well short of the 1s minimum delay, but inside the question window
        scheduler.advance(Duration::from_millis(400)).await;
        assert_eq!(sink.calls.lock().unwrap().len(), 1);
    }
}
