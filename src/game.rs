// ====================================================================================
// src/game.rs - 游戏引擎：题目推进、答案收集、回合结算
// ====================================================================================
//
// RoomSession 是单个房间的全部可变状态，只由该房间的 actor 任务持有。
// 所有方法都是同步的，时间由调用方传入，返回需要投递的事件列表。

use crate::{
    config::{GameTimings, TimeoutAnswerPolicy},
    error::AppError,
    models::{
        AnsweredQuestion, CompletedRound, DbWriteCommand, Player, PlayerAnswer, Room, RoomStatus,
        RoomSummary, ServerEvent,
    },
    questions::{seed_for_room, QuestionProvider},
    room::{validate_answer, validate_message},
};
use std::collections::HashMap;
use tokio::time::Instant;

/// 房间 actor 需要投递的副作用
#[derive(Debug, Clone)]
pub enum Outbound {
    /// 只发给发起请求的连接
    Reply(ServerEvent),
    /// 发给房间内所有连接（包括发起者）
    Broadcast(ServerEvent),
    /// 写入历史记录
    Record(DbWriteCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Lobby,
    Answering { deadline: Option<Instant> },
    Reviewing { advance_at: Instant },
    Finished { expires_at: Instant },
    Closed,
}

pub struct RoomSession {
    room: Room,
    phase: Phase,
    /// 当前回合：玩家 id -> 原始答案
    round_answers: HashMap<String, String>,
    completed_rounds: Vec<CompletedRound>,
    match_score: u32,
    timings: GameTimings,
    last_activity: Instant,
}

pub fn normalize_answer(answer: &str) -> String {
    answer.trim().to_lowercase()
}

// 所有玩家都作答且归一化后完全一致才算匹配
fn answers_match(answers: &[PlayerAnswer]) -> bool {
    let mut normalized = answers.iter().map(|a| a.answer.as_deref().map(normalize_answer));
    match normalized.next() {
        Some(Some(first)) => normalized.all(|a| a.as_deref() == Some(first.as_str())),
        _ => false,
    }
}

pub fn percentage(match_score: u32, total_questions: usize) -> u32 {
    if total_questions == 0 {
        return 0;
    }
    (match_score as f64 / total_questions as f64 * 100.0).round() as u32
}

impl RoomSession {
    pub fn new(room: Room, timings: GameTimings, now: Instant) -> Self {
        Self {
            room,
            phase: Phase::Lobby,
            round_answers: HashMap::new(),
            completed_rounds: Vec::new(),
            match_score: 0,
            timings,
            last_activity: now,
        }
    }

    pub fn room(&self) -> &Room {
        &self.room
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    fn total_questions(&self) -> usize {
        if self.room.questions.is_empty() {
            self.room.settings.total_questions
        } else {
            self.room.questions.len()
        }
    }

    pub fn summary(&self, now: Instant) -> RoomSummary {
        RoomSummary {
            room_code: self.room.room_code.clone(),
            status: self.room.status,
            category: self.room.settings.category.clone(),
            player_count: self.room.players.len(),
            created_at: self.room.created_at,
            idle_seconds: now.saturating_duration_since(self.last_activity).as_secs(),
        }
    }

    // ------------------------------------------------------------------
    // 成员管理
    // ------------------------------------------------------------------

    pub fn join(&mut self, player: Player, now: Instant) -> Result<Vec<Outbound>, AppError> {
        let player_id = player.id.clone();
        self.room.add_player(player)?;
        self.last_activity = now;

        let player = self
            .room
            .player(&player_id)
            .cloned()
            .ok_or_else(|| AppError::invalid_state("Player missing after join"))?;
        tracing::debug!(room = %self.room.room_code, player = %player_id, "player joined");

        Ok(vec![
            Outbound::Reply(ServerEvent::RoomJoined {
                room_code: self.room.room_code.clone(),
                player: player.clone(),
                room: self.room.clone(),
            }),
            Outbound::Broadcast(ServerEvent::PlayerJoined { player, room: self.room.clone() }),
        ])
    }

    pub fn leave(&mut self, player_id: &str, now: Instant) -> Result<Vec<Outbound>, AppError> {
        if self.room.remove_player(player_id).is_none() {
            return Err(AppError::invalid_state("Not in this room"));
        }
        self.round_answers.remove(player_id);
        self.last_activity = now;

        let mut out = vec![
            Outbound::Reply(ServerEvent::RoomLeft {}),
            Outbound::Broadcast(ServerEvent::PlayerLeft {
                player_id: player_id.to_string(),
                room: (!self.room.is_empty()).then(|| self.room.clone()),
            }),
        ];
        self.after_departure(now, &mut out);
        Ok(out)
    }

    pub fn kick(&mut self, host_id: &str, target_id: &str, now: Instant) -> Result<Vec<Outbound>, AppError> {
        self.room.ensure_host(host_id)?;
        if host_id == target_id {
            return Err(AppError::invalid_state("Host cannot kick themselves"));
        }
        if self.room.remove_player(target_id).is_none() {
            return Err(AppError::invalid_state("Player not in this room"));
        }
        self.round_answers.remove(target_id);
        self.last_activity = now;
        tracing::info!(room = %self.room.room_code, target = %target_id, "player kicked");

        let mut out = vec![Outbound::Broadcast(ServerEvent::PlayerKicked {
            player_id: target_id.to_string(),
            room: self.room.clone(),
        })];
        self.after_departure(now, &mut out);
        Ok(out)
    }

    // 有人离开后：空房间关闭；游戏中人数不足则提前结束；剩余玩家都已作答则结算
    fn after_departure(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        if self.room.is_empty() {
            self.phase = Phase::Closed;
            return;
        }
        if self.room.status != RoomStatus::Playing {
            return;
        }
        if self.room.players.len() < 2 {
            tracing::info!(room = %self.room.room_code, "not enough players left, finishing game");
            self.finish(now, out);
            return;
        }
        if matches!(self.phase, Phase::Answering { .. }) && self.all_answered() {
            self.resolve_round(now, out);
        }
    }

    // ------------------------------------------------------------------
    // 游戏流程
    // ------------------------------------------------------------------

    pub fn start_game(
        &mut self,
        requester_id: &str,
        provider: &dyn QuestionProvider,
        now: Instant,
    ) -> Result<Vec<Outbound>, AppError> {
        self.room.ensure_host(requester_id)?;
        if self.room.status != RoomStatus::Waiting {
            return Err(AppError::invalid_state("Game already started"));
        }
        if self.room.players.len() < 2 {
            return Err(AppError::NotEnoughPlayers);
        }

        let questions = provider.select(
            &self.room.settings.category,
            self.room.settings.total_questions,
            seed_for_room(&self.room.room_code),
        )?;
        let Some(first) = questions.first().cloned() else {
            return Err(AppError::validation("No questions selected"));
        };

        self.room.questions = questions;
        self.room.status = RoomStatus::Playing;
        self.room.current_question_index = 0;
        for p in &mut self.room.players {
            p.score = 0;
            p.answered_questions.clear();
        }
        self.round_answers.clear();
        self.completed_rounds.clear();
        self.match_score = 0;
        self.phase = Phase::Answering { deadline: self.round_deadline(now) };
        self.last_activity = now;

        tracing::info!(
            room = %self.room.room_code,
            players = self.room.players.len(),
            questions = self.room.questions.len(),
            "game started"
        );

        Ok(vec![Outbound::Broadcast(ServerEvent::GameStarted {
            room: self.room.clone(),
            question: first,
            total_questions: self.total_questions(),
        })])
    }

    pub fn submit_answer(
        &mut self,
        player_id: &str,
        question_id: &str,
        answer: &str,
        now: Instant,
    ) -> Result<Vec<Outbound>, AppError> {
        if self.room.status != RoomStatus::Playing {
            return Err(AppError::invalid_state("Game is not in progress"));
        }
        if !self.room.has_player(player_id) {
            return Err(AppError::invalid_state("Not in this room"));
        }
        let current_id = match self.room.current_question() {
            Some(q) => q.id.clone(),
            None => return Err(AppError::invalid_state("No active question")),
        };
        if current_id != question_id {
            return Err(AppError::invalid_state("Question is no longer active"));
        }
        // 重传：同一回合已作答则忽略
        if self.round_answers.contains_key(player_id) {
            return Ok(Vec::new());
        }
        if !matches!(self.phase, Phase::Answering { .. }) {
            return Err(AppError::invalid_state("Round already closed"));
        }
        let answer = validate_answer(answer)?;

        self.last_activity = now;
        self.round_answers.insert(player_id.to_string(), answer.clone());
        let mut player_name = String::new();
        if let Some(player) = self.room.player_mut(player_id) {
            player.answered_questions.push(AnsweredQuestion { question_id: current_id, answer });
            player_name = player.name.clone();
        }

        let mut out = vec![Outbound::Broadcast(ServerEvent::PlayerAnswered {
            player_id: player_id.to_string(),
            player_name,
        })];
        if self.all_answered() {
            self.resolve_round(now, &mut out);
        }
        Ok(out)
    }

    pub fn post_message(
        &mut self,
        player_id: &str,
        message: &str,
        max_chars: usize,
        now: Instant,
    ) -> Result<Vec<Outbound>, AppError> {
        let player = self
            .room
            .player(player_id)
            .ok_or_else(|| AppError::invalid_state("Not in this room"))?;
        let message = validate_message(message, max_chars)?;

        let out = vec![
            Outbound::Broadcast(ServerEvent::NewMessage {
                player_id: player.id.clone(),
                player_name: player.name.clone(),
                avatar: player.avatar.clone(),
                message: message.clone(),
                timestamp: chrono::Utc::now().timestamp_millis(),
            }),
            Outbound::Record(DbWriteCommand::ChatMessage {
                room_code: self.room.room_code.clone(),
                player_id: player.id.clone(),
                player_name: player.name.clone(),
                content: message,
            }),
        ];
        self.last_activity = now;
        Ok(out)
    }

    fn all_answered(&self) -> bool {
        !self.room.players.is_empty()
            && self.room.players.iter().all(|p| self.round_answers.contains_key(&p.id))
    }

    fn round_deadline(&self, now: Instant) -> Option<Instant> {
        self.timings.round_timeout.map(|timeout| now + timeout)
    }

    fn resolve_round(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        let Some(question) = self.room.current_question().cloned() else {
            return;
        };

        let mut all_players_answered = true;
        let mut player_answers = Vec::with_capacity(self.room.players.len());
        for player in &mut self.room.players {
            let (answer, timed_out) = match self.round_answers.get(&player.id) {
                Some(answer) => (Some(answer.clone()), false),
                None => {
                    all_players_answered = false;
                    match self.timings.timeout_policy {
                        TimeoutAnswerPolicy::DefaultAnswer => {
                            let answer = question.default_answer();
                            player.answered_questions.push(AnsweredQuestion {
                                question_id: question.id.clone(),
                                answer: answer.clone(),
                            });
                            (Some(answer), true)
                        }
                        TimeoutAnswerPolicy::Skip => (None, true),
                    }
                }
            };
            player_answers.push(PlayerAnswer {
                player_id: player.id.clone(),
                player_name: player.name.clone(),
                answer,
                timed_out,
            });
        }

        let is_matched = answers_match(&player_answers);
        if is_matched {
            self.match_score += 1;
            for player in &mut self.room.players {
                player.score += 1;
            }
        }
        self.completed_rounds.push(CompletedRound {
            question: question.clone(),
            is_matched,
            player_answers: player_answers.clone(),
        });

        let total_questions = self.total_questions();
        tracing::debug!(
            room = %self.room.room_code,
            index = self.room.current_question_index,
            is_matched,
            all_players_answered,
            "round completed"
        );
        out.push(Outbound::Broadcast(ServerEvent::RoundCompleted {
            all_players_answered,
            is_matched,
            player_answers,
            question,
            match_score: self.match_score,
            total_questions,
            percentage: percentage(self.match_score, total_questions),
        }));
        self.phase = Phase::Reviewing { advance_at: now + self.timings.result_delay };
    }

    fn advance(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        let next = self.room.current_question_index + 1;
        if next >= self.room.questions.len() {
            self.finish(now, out);
            return;
        }
        self.room.current_question_index = next;
        self.round_answers.clear();
        self.phase = Phase::Answering { deadline: self.round_deadline(now) };
        out.push(Outbound::Broadcast(ServerEvent::NextQuestion {
            question: self.room.questions[next].clone(),
            current_question_index: next,
            total_questions: self.total_questions(),
        }));
    }

    fn finish(&mut self, now: Instant, out: &mut Vec<Outbound>) {
        let total_questions = self.total_questions();
        let percentage = percentage(self.match_score, total_questions);
        self.room.status = RoomStatus::Finished;
        self.round_answers.clear();
        self.phase = Phase::Finished { expires_at: now + self.timings.finished_ttl };

        tracing::info!(
            room = %self.room.room_code,
            match_score = self.match_score,
            total_questions,
            percentage,
            "game finished"
        );
        out.push(Outbound::Broadcast(ServerEvent::GameFinished {
            match_score: self.match_score,
            total_questions,
            percentage,
            completed_rounds: self.completed_rounds.clone(),
        }));
        out.push(Outbound::Record(DbWriteCommand::GameFinished {
            room_code: self.room.room_code.clone(),
            category: self.room.settings.category.clone(),
            match_score: self.match_score,
            total_questions,
            percentage,
            player_count: self.room.players.len(),
        }));
    }

    // ------------------------------------------------------------------
    // 计时
    // ------------------------------------------------------------------

    pub fn next_wake(&self) -> Option<Instant> {
        match self.phase {
            Phase::Answering { deadline } => deadline,
            Phase::Reviewing { advance_at } => Some(advance_at),
            Phase::Finished { expires_at } => Some(expires_at),
            Phase::Lobby | Phase::Closed => None,
        }
    }

    pub fn on_timer(&mut self, now: Instant) -> Vec<Outbound> {
        let mut out = Vec::new();
        match self.phase {
            Phase::Answering { deadline: Some(deadline) } if now >= deadline => {
                tracing::debug!(room = %self.room.room_code, "round timed out");
                self.resolve_round(now, &mut out);
            }
            Phase::Reviewing { advance_at } if now >= advance_at => self.advance(now, &mut out),
            Phase::Finished { expires_at } if now >= expires_at => {
                tracing::info!(room = %self.room.room_code, "finished room expired");
                self.phase = Phase::Closed;
            }
            _ => {}
        }
        out
    }
}
