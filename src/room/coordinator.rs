//! Room coordinator
//!
//! Drives rooms through their lifecycle: answer submission, bot turns, the
//! settle delay, per-question timeouts, tiebreaker escalation and the
//! terminal report. Every transition happens while holding the room's lock;
//! question fetches, events, ledger writes and history writes happen after
//! it is released.

use crate::amqp::publisher::EventPublisher;
use crate::bot::simulator::{AnswerSink, BotAnswerSimulator, BotTurn};
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::room::instance::{MatchRoom, Progress, SubmitResult};
use crate::room::registry::MatchRegistry;
use crate::scheduler::{Clock, Scheduler, TimerHandle};
use crate::store::{MatchLedger, QuestionHistoryStore};
use crate::types::{
    Bet, MatchFinished, MatchId, MatchOutcome, Player, PlayerId, Question, QuestionId, RoomId,
    RoomSnapshot, RoundSettled,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What a tiebreaker fetch needs, copied out of the room
struct TiebreakerRequest {
    room_id: RoomId,
    round: u32,
    bet: Bet,
    batch_size: usize,
    exclude: HashSet<QuestionId>,
}

/// Everything needed to report a finished match once the room lock is released
struct FinishedReport {
    match_id: MatchId,
    outcome: MatchOutcome,
    players: Vec<Player>,
    human_ids: Vec<PlayerId>,
    question_ids: Vec<QuestionId>,
    bet: Bet,
    total_questions: usize,
    tiebreaker_rounds: u32,
}

pub struct RoomCoordinator {
    me: Weak<RoomCoordinator>,
    registry: Arc<MatchRegistry>,
    bot: Arc<BotAnswerSimulator>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    publisher: Arc<dyn EventPublisher>,
    history: Arc<dyn QuestionHistoryStore>,
    ledger: Arc<dyn MatchLedger>,
    metrics: Option<Arc<MetricsCollector>>,
    /// Live per-question timeout for each room
    question_timers: Mutex<HashMap<RoomId, TimerHandle>>,
}

impl RoomCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<MatchRegistry>,
        bot: Arc<BotAnswerSimulator>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn EventPublisher>,
        history: Arc<dyn QuestionHistoryStore>,
        ledger: Arc<dyn MatchLedger>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            registry,
            bot,
            scheduler,
            clock,
            publisher,
            history,
            ledger,
            metrics,
            question_timers: Mutex::new(HashMap::new()),
        })
    }

    pub fn registry(&self) -> &Arc<MatchRegistry> {
        &self.registry
    }

    /// Create a room for two players and start its first question
    pub async fn open_room(&self, players: Vec<Player>, bet: Bet) -> Result<RoomSnapshot> {
        let snapshot = self.registry.create(players, bet).await?;

        if let Some(room) = self.registry.get(snapshot.room_id) {
            let room = room.lock().await;
            self.arm_question_timer(&room);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_room_created(snapshot.players.iter().any(|p| p.is_bot));
        }
        Ok(snapshot)
    }

    /// Submit an answer for the room's current question.
    /// Unknown rooms and unanswerable states are reported as `Ignored`.
    pub async fn submit_answer(
        &self,
        room_id: RoomId,
        player_id: &str,
        answer_index: usize,
    ) -> Result<SubmitResult> {
        self.submit(room_id, player_id, None, answer_index).await
    }

    async fn submit(
        &self,
        room_id: RoomId,
        player_id: &str,
        expected_question: Option<usize>,
        answer_index: usize,
    ) -> Result<SubmitResult> {
        let room = match self.registry.get(room_id) {
            Some(room) => room,
            None => {
                return Ok(SubmitResult::Ignored {
                    reason: format!("room {} not found", room_id),
                })
            }
        };
        let mut room = room.lock().await;

        if let Some(expected) = expected_question {
            if room.current_question_index() != expected {
                return Ok(SubmitResult::Ignored {
                    reason: format!(
                        "question {} already settled, room is on {}",
                        expected,
                        room.current_question_index()
                    ),
                });
            }
        }

        let question_index = room.current_question_index();
        let result = room.submit_answer(player_id, answer_index);

        match &result {
            SubmitResult::Recorded {
                correct,
                all_answered,
            } => {
                let is_bot = room.player(player_id).map(|p| p.is_bot).unwrap_or(false);
                debug!(
                    "Room {} question {}: {} answered {} ({})",
                    room_id,
                    question_index,
                    player_id,
                    answer_index,
                    if *correct { "correct" } else { "wrong" }
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_answer(*correct, is_bot);
                }

                if *all_answered {
                    self.begin_settle(&mut room);
                } else if !is_bot {
                    self.schedule_bot_turn(&room);
                }
            }
            SubmitResult::Ignored { reason } => {
                debug!(
                    "Ignored answer from {} in room {}: {}",
                    player_id, room_id, reason
                );
            }
        }

        Ok(result)
    }

    fn schedule_bot_turn(&self, room: &MatchRoom) {
        let (Some(bot_id), Some(question), Some(me)) =
            (room.unanswered_bot(), room.current_question(), self.me.upgrade())
        else {
            return;
        };

        let now = self.clock.now();
        let time_left = room
            .question_deadline()
            .map(|deadline| (deadline - now).to_std().unwrap_or(Duration::ZERO));

        let sink: Arc<dyn AnswerSink> = me;
        self.bot.schedule_answer(
            sink,
            BotTurn {
                room_id: room.id(),
                bot_id,
                question_index: room.current_question_index(),
                correct_answer_index: question.correct_answer_index,
                option_count: question.options.len(),
                time_left,
            },
        );
    }

    /// Close answers for the current question and settle after the settle delay
    fn begin_settle(&self, room: &mut MatchRoom) {
        if !room.begin_settling() {
            return;
        }
        self.cancel_question_timer(room.id());

        let room_id = room.id();
        let question_index = room.current_question_index();
        let me = self.me.clone();

        self.scheduler.after(
            room.config().settle_delay,
            Box::pin(async move {
                if let Some(coordinator) = me.upgrade() {
                    coordinator.settle_round(room_id, question_index).await;
                }
            }),
        );
    }

    fn arm_question_timer(&self, room: &MatchRoom) {
        if room.current_question().is_none() {
            return;
        }

        let room_id = room.id();
        let question_index = room.current_question_index();
        let me = self.me.clone();

        let handle = self.scheduler.after(
            room.config().question_time_limit,
            Box::pin(async move {
                if let Some(coordinator) = me.upgrade() {
                    coordinator.question_timed_out(room_id, question_index).await;
                }
            }),
        );

        if let Ok(mut timers) = self.question_timers.lock() {
            if let Some(previous) = timers.insert(room_id, handle) {
                previous.cancel();
            }
        }
    }

    fn cancel_question_timer(&self, room_id: RoomId) {
        if let Ok(mut timers) = self.question_timers.lock() {
            if let Some(handle) = timers.remove(&room_id) {
                handle.cancel();
            }
        }
    }

    async fn question_timed_out(&self, room_id: RoomId, question_index: usize) {
        let Some(room) = self.registry.get(room_id) else {
            return;
        };
        let mut room = room.lock().await;
        if room.current_question_index() != question_index || !room.is_answerable() {
            return;
        }

        info!(
            "Question {} in room {} timed out, settling with {} of 2 answers",
            question_index,
            room_id,
            room.players().iter().filter(|p| p.has_answered).count()
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_question_timeout();
        }
        self.begin_settle(&mut room);
    }

    /// Advance the room past `question_index`. Stale calls are no-ops.
    ///
    /// The room lock is released while a tiebreaker batch is fetched. The
    /// room has no current question during that window, so submissions and
    /// timers are ignored while snapshots stay readable.
    pub async fn settle_round(&self, room_id: RoomId, question_index: usize) {
        let Some(shared) = self.registry.get(room_id) else {
            return;
        };

        let mut room = shared.lock().await;
        if room.current_question_index() != question_index || !room.is_settling() {
            return;
        }

        let mut progress = room.settle(self.clock.now());
        while let Progress::TiebreakerNeeded { round } = progress {
            let request = self.tiebreaker_request(&room, round);
            drop(room);

            let batch = self.fetch_tiebreaker(&request).await;

            room = shared.lock().await;
            if !room.is_awaiting_tiebreaker(round) {
                debug!(
                    "Room {} moved on during tiebreaker fetch for round {}",
                    room_id, round
                );
                return;
            }
            progress = room.start_tiebreaker(batch, self.clock.now());
        }

        let finished = match progress {
            Progress::Finished(outcome) => Some(Self::finished_report(&room, outcome)),
            _ => {
                self.arm_question_timer(&room);
                None
            }
        };
        let settled = RoundSettled {
            settled_question_index: question_index,
            room: room.snapshot(),
            timestamp: self.clock.now(),
        };
        drop(room);

        debug!(
            "Room {} settled question {} ({} of {} questions, status {})",
            room_id,
            question_index,
            settled.room.current_question_index,
            settled.room.total_questions,
            settled.room.status
        );
        if let Err(e) = self.publisher.publish_round_settled(settled).await {
            warn!("Failed to publish round settlement for room {}: {}", room_id, e);
        }

        if let Some(report) = finished {
            self.report_finished(room_id, report).await;
        }
    }

    fn tiebreaker_request(&self, room: &MatchRoom, round: u32) -> TiebreakerRequest {
        info!(
            "Room {} tied at {} after {} questions, starting tiebreaker round {}",
            room.id(),
            room.players()[0].score,
            room.question_count(),
            round
        );
        self.registry.record_tiebreaker();
        if let Some(metrics) = &self.metrics {
            metrics.record_tiebreaker();
        }

        TiebreakerRequest {
            room_id: room.id(),
            round,
            bet: room.bet().clone(),
            batch_size: room.config().tiebreaker_batch_size,
            exclude: room.exclusion_set().clone(),
        }
    }

    async fn fetch_tiebreaker(&self, request: &TiebreakerRequest) -> Vec<Question> {
        let batch = match self
            .registry
            .supplier()
            .next_batch(
                request.bet.category,
                request.bet.difficulty,
                request.batch_size,
                &request.exclude,
            )
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                error!("Tiebreaker fetch for room {} failed: {}", request.room_id, e);
                Vec::new()
            }
        };

        if batch.is_empty() {
            warn!(
                "No fresh questions for tiebreaker round {} in room {}, escalating",
                request.round, request.room_id
            );
        }
        batch
    }

    fn finished_report(room: &MatchRoom, outcome: MatchOutcome) -> FinishedReport {
        FinishedReport {
            match_id: room.match_id(),
            outcome,
            players: room.players().to_vec(),
            human_ids: room.human_player_ids(),
            question_ids: room.questions().iter().map(|q| q.id.clone()).collect(),
            bet: room.bet().clone(),
            total_questions: room.question_count(),
            tiebreaker_rounds: room.tiebreaker_round(),
        }
    }

    async fn report_finished(&self, room_id: RoomId, report: FinishedReport) {
        self.cancel_question_timer(room_id);

        info!(
            "Room {} finished: {} after {} questions and {} tiebreaker rounds ({})",
            room_id,
            report.outcome.label(),
            report.total_questions,
            report.tiebreaker_rounds,
            report
                .players
                .iter()
                .map(|p| format!("{}={}", p.id, p.score))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if let Err(e) = self
            .ledger
            .record_match_result(report.match_id, &report.outcome)
            .await
        {
            error!("Failed to record result of match {}: {}", report.match_id, e);
        }

        for player_id in &report.human_ids {
            if let Err(e) = self
                .history
                .record_answered_questions(player_id, &report.question_ids)
                .await
            {
                error!("Failed to record question history for {}: {}", player_id, e);
            }
        }

        self.registry.record_finished(&report.outcome);
        if let Some(metrics) = &self.metrics {
            metrics.record_room_finished(report.outcome.label(), report.tiebreaker_rounds);
        }

        let event = MatchFinished {
            room_id,
            match_id: report.match_id,
            outcome: report.outcome,
            players: report.players,
            bet: report.bet,
            total_questions: report.total_questions,
            tiebreaker_rounds: report.tiebreaker_rounds,
            timestamp: self.clock.now(),
        };
        if let Err(e) = self.publisher.publish_match_finished(event).await {
            error!("Failed to publish result for room {}: {}", room_id, e);
        }
    }
}

#[async_trait]
impl AnswerSink for RoomCoordinator {
    async fn submit_for_question(
        &self,
        room_id: RoomId,
        player_id: &str,
        question_index: usize,
        answer_index: usize,
    ) -> Result<SubmitResult> {
        self.submit(room_id, player_id, Some(question_index), answer_index).await
    }
}
