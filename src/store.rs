// ====================================================================================
// src/store.rs - 房间注册表与房间 actor
// ====================================================================================
//
// 每个房间由一个独立任务持有 RoomSession，所有命令经 mpsc 串行处理，结果经 oneshot 返回。
// 注册表只保存房间码 -> 命令通道；房间码的生成与插入在同一次加锁内完成。

use crate::{
    config::{Config, GameTimings},
    connections::Outbox,
    error::AppError,
    game::{Outbound, RoomSession},
    models::{DbWriteCommand, Player, Room, RoomSettings, RoomSummary, ServerEvent},
    questions::QuestionCatalog,
    room::{
        generate_room_code, is_valid_room_code, normalize_room_code, validate_avatar, validate_category,
        validate_player_name,
    },
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T, AppError>>;

/// 一个已连接的房间成员：玩家 id 与其出站队列
#[derive(Debug, Clone)]
pub struct Member {
    pub id: String,
    pub outbox: Outbox,
}

#[derive(Debug)]
pub enum RoomCommand {
    Join { member: Member, player_name: String, avatar: String, reply: Reply<()> },
    Leave { player_id: String, reply: Option<Reply<()>> },
    Kick { host_id: String, target_id: String, reply: Reply<()> },
    Get { reply: Reply<Room> },
    Start { player_id: String, reply: Reply<()> },
    SubmitAnswer { player_id: String, question_id: String, answer: String, reply: Reply<()> },
    SendMessage { player_id: String, message: String, reply: Reply<()> },
    Summary { reply: oneshot::Sender<RoomSummary> },
    Close { reason: String },
}

// 房间 actor 共享的依赖
pub struct RoomContext {
    pub timings: GameTimings,
    pub questions: Arc<QuestionCatalog>,
    pub db_writer_tx: mpsc::Sender<DbWriteCommand>,
    pub room_code_length: usize,
    pub max_players: usize,
    pub total_questions: usize,
    pub default_category: String,
    pub max_message_length: usize,
}

impl RoomContext {
    pub fn from_config(
        config: &Config,
        questions: Arc<QuestionCatalog>,
        db_writer_tx: mpsc::Sender<DbWriteCommand>,
    ) -> Self {
        Self {
            timings: config.game_timings(),
            questions,
            db_writer_tx,
            room_code_length: config.room_code_length,
            max_players: config.max_players,
            total_questions: config.total_questions,
            default_category: config.default_category.clone(),
            max_message_length: config.max_message_length,
        }
    }
}

#[derive(Clone)]
struct RoomHandle {
    room_id: Uuid,
    cmd_tx: mpsc::Sender<RoomCommand>,
}

pub struct RoomStore {
    rooms: Mutex<HashMap<String, RoomHandle>>,
    ctx: Arc<RoomContext>,
}

impl RoomStore {
    pub fn new(ctx: RoomContext) -> Arc<Self> {
        Arc::new(Self { rooms: Mutex::new(HashMap::new()), ctx: Arc::new(ctx) })
    }

    pub async fn len(&self) -> usize {
        self.rooms.lock().await.len()
    }

    // 创建房间并启动其 actor，返回 (房间码, 房主, 分类)
    pub async fn create_room(
        self: &Arc<Self>,
        creator: Member,
        player_name: &str,
        avatar: &str,
        category: Option<&str>,
    ) -> Result<(String, Player, String), AppError> {
        let name = validate_player_name(player_name)?;
        let avatar = validate_avatar(avatar)?;
        let category = validate_category(category.unwrap_or(self.ctx.default_category.as_str()))?;
        self.ctx.questions.ensure_category(&category, self.ctx.total_questions).await?;

        let settings = RoomSettings {
            max_players: self.ctx.max_players,
            total_questions: self.ctx.total_questions,
            category: category.clone(),
        };
        let player = Player::new(creator.id.clone(), name, avatar);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let room_id = Uuid::new_v4();

        let room = {
            let mut rooms = self.rooms.lock().await;
            let code = loop {
                let candidate = generate_room_code(self.ctx.room_code_length);
                if !rooms.contains_key(&candidate) {
                    break candidate;
                }
            };
            rooms.insert(code.clone(), RoomHandle { room_id, cmd_tx });
            Room::new(code, player, settings)
        };

        let code = room.room_code.clone();
        let host = room.players[0].clone();
        let record = DbWriteCommand::RoomCreated {
            room_code: code.clone(),
            category: category.clone(),
            host_name: host.name.clone(),
        };
        if let Err(e) = self.ctx.db_writer_tx.try_send(record) {
            tracing::warn!("房间创建记录写入队列失败: {}", e);
        }

        let session = RoomSession::new(room, self.ctx.timings, Instant::now());
        tokio::spawn(room_message_loop(session, creator, cmd_rx, self.clone(), room_id));
        tracing::info!(room = %code, %category, "room created");

        Ok((code, host, category))
    }

    async fn handle(&self, room_code: &str) -> Result<(String, mpsc::Sender<RoomCommand>), AppError> {
        let code = normalize_room_code(room_code);
        if !is_valid_room_code(&code, self.ctx.room_code_length) {
            return Err(AppError::RoomNotFound(code));
        }
        let rooms = self.rooms.lock().await;
        match rooms.get(&code) {
            Some(handle) => {
                let tx = handle.cmd_tx.clone();
                Ok((code, tx))
            }
            None => Err(AppError::RoomNotFound(code)),
        }
    }

    // 向房间 actor 发送命令并等待结果；actor 已退出视为房间不存在
    async fn request<T>(
        &self,
        room_code: &str,
        build: impl FnOnce(Reply<T>) -> RoomCommand,
    ) -> Result<T, AppError> {
        let (code, tx) = self.handle(room_code).await?;
        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(build(reply_tx))
            .await
            .map_err(|_| AppError::RoomNotFound(code.clone()))?;
        reply_rx.await.map_err(|_| AppError::RoomNotFound(code))?
    }

    pub async fn join_room(
        &self,
        room_code: &str,
        member: Member,
        player_name: &str,
        avatar: &str,
    ) -> Result<String, AppError> {
        let player_name = validate_player_name(player_name)?;
        let avatar = validate_avatar(avatar)?;
        let code = normalize_room_code(room_code);
        self.request(&code, |reply| RoomCommand::Join { member, player_name, avatar, reply })
            .await?;
        Ok(code)
    }

    pub async fn leave_room(&self, room_code: &str, player_id: &str) -> Result<(), AppError> {
        let player_id = player_id.to_string();
        self.request(room_code, |reply| RoomCommand::Leave { player_id, reply: Some(reply) })
            .await
    }

    // 连接断开：隐式离开，不等待结果
    pub async fn detach(&self, room_code: &str, player_id: &str) {
        if let Ok((_, tx)) = self.handle(room_code).await {
            let _ = tx
                .send(RoomCommand::Leave { player_id: player_id.to_string(), reply: None })
                .await;
        }
    }

    pub async fn kick_player(&self, room_code: &str, host_id: &str, target_id: &str) -> Result<(), AppError> {
        let (host_id, target_id) = (host_id.to_string(), target_id.to_string());
        self.request(room_code, |reply| RoomCommand::Kick { host_id, target_id, reply })
            .await
    }

    pub async fn get_room(&self, room_code: &str) -> Result<Room, AppError> {
        self.request(room_code, |reply| RoomCommand::Get { reply }).await
    }

    pub async fn start_game(&self, room_code: &str, player_id: &str) -> Result<(), AppError> {
        let player_id = player_id.to_string();
        self.request(room_code, |reply| RoomCommand::Start { player_id, reply }).await
    }

    pub async fn submit_answer(
        &self,
        room_code: &str,
        player_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<(), AppError> {
        let (player_id, question_id, answer) = (player_id.to_string(), question_id.to_string(), answer.to_string());
        self.request(room_code, |reply| RoomCommand::SubmitAnswer { player_id, question_id, answer, reply })
            .await
    }

    pub async fn send_message(&self, room_code: &str, player_id: &str, message: &str) -> Result<(), AppError> {
        let (player_id, message) = (player_id.to_string(), message.to_string());
        self.request(room_code, |reply| RoomCommand::SendMessage { player_id, message, reply })
            .await
    }

    pub async fn close_room(&self, room_code: &str, reason: &str) -> Result<(), AppError> {
        let (code, tx) = self.handle(room_code).await?;
        tx.send(RoomCommand::Close { reason: reason.to_string() })
            .await
            .map_err(|_| AppError::RoomNotFound(code))
    }

    // 逐个询问房间 actor，已退出的房间跳过
    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let handles: Vec<mpsc::Sender<RoomCommand>> = {
            let rooms = self.rooms.lock().await;
            rooms.values().map(|h| h.cmd_tx.clone()).collect()
        };

        let mut summaries = Vec::with_capacity(handles.len());
        for tx in handles {
            let (reply_tx, reply_rx) = oneshot::channel();
            if tx.send(RoomCommand::Summary { reply: reply_tx }).await.is_ok() {
                if let Ok(summary) = reply_rx.await {
                    summaries.push(summary);
                }
            }
        }
        summaries
    }

    async fn remove_if_current(&self, room_code: &str, room_id: Uuid) {
        let mut rooms = self.rooms.lock().await;
        if rooms.get(room_code).is_some_and(|h| h.room_id == room_id) {
            rooms.remove(room_code);
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

// 房间的中央消息处理循环
async fn room_message_loop(
    mut session: RoomSession,
    creator: Member,
    mut cmd_rx: mpsc::Receiver<RoomCommand>,
    store: Arc<RoomStore>,
    room_id: Uuid,
) {
    let code = session.room().room_code.clone();
    let mut connections: HashMap<String, Outbox> = HashMap::new();
    connections.insert(creator.id, creator.outbox);

    loop {
        let wake = session.next_wake();
        let lost = tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                handle_command(cmd, &mut session, &mut connections, &store.ctx)
            }
            _ = sleep_until_opt(wake) => {
                let out = session.on_timer(Instant::now());
                deliver(out, None, &connections, &store.ctx.db_writer_tx)
            }
        };
        evict_lost(lost, &mut session, &mut connections, &store.ctx);

        // 已离开或被踢出的玩家不再接收房间事件
        connections.retain(|id, _| session.room().has_player(id));
        if session.is_closed() {
            break;
        }
    }

    store.remove_if_current(&code, room_id).await;
    tracing::info!("房间 {} 已关闭", code);
}

// 处理一条命令，返回投递失败（已失联）的成员
fn handle_command(
    cmd: RoomCommand,
    session: &mut RoomSession,
    connections: &mut HashMap<String, Outbox>,
    ctx: &RoomContext,
) -> Vec<String> {
    let now = Instant::now();
    match cmd {
        RoomCommand::Join { member, player_name, avatar, reply } => {
            let player = Player::new(member.id.clone(), player_name, avatar);
            let result = session.join(player, now);
            if result.is_ok() {
                connections.insert(member.id.clone(), member.outbox);
            }
            respond(result, Some(&member.id), connections, ctx, Some(reply))
        }
        RoomCommand::Leave { player_id, reply } => {
            // 隐式离开（断线、换房）不回送 room-left
            let requester = reply.is_some().then_some(player_id.as_str());
            let result = session.leave(&player_id, now);
            respond(result, requester, connections, ctx, reply)
        }
        RoomCommand::Kick { host_id, target_id, reply } => {
            let result = session.kick(&host_id, &target_id, now);
            respond(result, Some(&host_id), connections, ctx, Some(reply))
        }
        RoomCommand::Get { reply } => {
            let _ = reply.send(Ok(session.room().clone()));
            Vec::new()
        }
        RoomCommand::Start { player_id, reply } => {
            let result = session.start_game(&player_id, ctx.questions.provider(), now);
            respond(result, Some(&player_id), connections, ctx, Some(reply))
        }
        RoomCommand::SubmitAnswer { player_id, question_id, answer, reply } => {
            let result = session.submit_answer(&player_id, &question_id, &answer, now);
            respond(result, Some(&player_id), connections, ctx, Some(reply))
        }
        RoomCommand::SendMessage { player_id, message, reply } => {
            let result = session.post_message(&player_id, &message, ctx.max_message_length, now);
            respond(result, Some(&player_id), connections, ctx, Some(reply))
        }
        RoomCommand::Summary { reply } => {
            let _ = reply.send(session.summary(now));
            Vec::new()
        }
        RoomCommand::Close { reason } => {
            tracing::info!(room = %session.room().room_code, %reason, "closing room");
            deliver(
                vec![Outbound::Broadcast(ServerEvent::error(format!("Room closed: {}", reason)))],
                None,
                connections,
                &ctx.db_writer_tx,
            );
            session.close();
            Vec::new()
        }
    }
}

fn respond(
    result: Result<Vec<Outbound>, AppError>,
    requester: Option<&str>,
    connections: &HashMap<String, Outbox>,
    ctx: &RoomContext,
    reply: Option<Reply<()>>,
) -> Vec<String> {
    let (result, lost) = match result {
        Ok(out) => (Ok(()), deliver(out, requester, connections, &ctx.db_writer_tx)),
        Err(e) => (Err(e), Vec::new()),
    };
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
    lost
}

// 投递事件：单发、房间广播、历史记录。返回投递失败的成员
fn deliver(
    out: Vec<Outbound>,
    requester: Option<&str>,
    connections: &HashMap<String, Outbox>,
    db_writer_tx: &mpsc::Sender<DbWriteCommand>,
) -> Vec<String> {
    let mut lost = Vec::new();
    for item in out {
        match item {
            Outbound::Reply(event) => {
                let Some(id) = requester else { continue };
                if let Some(outbox) = connections.get(id) {
                    if !outbox.push(event) {
                        lost.push(id.to_string());
                    }
                }
            }
            Outbound::Broadcast(event) => {
                for (id, outbox) in connections {
                    if !outbox.push(event.clone()) {
                        lost.push(id.clone());
                    }
                }
            }
            Outbound::Record(cmd) => {
                if let Err(e) = db_writer_tx.try_send(cmd) {
                    tracing::warn!("历史记录写入队列失败: {}", e);
                }
            }
        }
    }
    lost
}

// 失联成员按隐式离开处理；离开产生的广播可能再发现失联成员
fn evict_lost(
    mut lost: Vec<String>,
    session: &mut RoomSession,
    connections: &mut HashMap<String, Outbox>,
    ctx: &RoomContext,
) {
    while let Some(player_id) = lost.pop() {
        if connections.remove(&player_id).is_none() {
            continue;
        }
        tracing::warn!(room = %session.room().room_code, player = %player_id, "连接无法接收事件，移出房间");
        if let Ok(out) = session.leave(&player_id, Instant::now()) {
            lost.extend(deliver(out, None, connections, &ctx.db_writer_tx));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeoutAnswerPolicy;
    use crate::models::RoomStatus;
    use crate::questions::QuestionBank;
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_store(room_code_length: usize, max_players: usize, total_questions: usize) -> Arc<RoomStore> {
        let timings = GameTimings {
            round_timeout: None,
            result_delay: Duration::ZERO,
            finished_ttl: Duration::from_secs(300),
            timeout_policy: TimeoutAnswerPolicy::DefaultAnswer,
        };
        test_store_with(timings, room_code_length, max_players, total_questions)
    }

    fn test_store_with(
        timings: GameTimings,
        room_code_length: usize,
        max_players: usize,
        total_questions: usize,
    ) -> Arc<RoomStore> {
        let (db_tx, mut db_rx) = mpsc::channel(256);
        tokio::spawn(async move { while db_rx.recv().await.is_some() {} });
        let questions = Arc::new(QuestionCatalog::new(
            Arc::new(QuestionBank::embedded().unwrap()),
            Duration::from_secs(60),
        ));
        RoomStore::new(RoomContext {
            timings,
            questions,
            db_writer_tx: db_tx,
            room_code_length,
            max_players,
            total_questions,
            default_category: "just_friends".into(),
            max_message_length: 500,
        })
    }

    fn member(id: &str) -> (Member, mpsc::Receiver<ServerEvent>) {
        member_with_buffer(id, 256)
    }

    fn member_with_buffer(id: &str, capacity: usize) -> (Member, mpsc::Receiver<ServerEvent>) {
        let (outbox, rx) = Outbox::channel(capacity);
        (Member { id: id.to_string(), outbox }, rx)
    }

    async fn wait_for<F>(rx: &mut mpsc::Receiver<ServerEvent>, mut pred: F) -> ServerEvent
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                let event = rx.recv().await.expect("channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn concurrent_creates_issue_unique_codes() {
        // 短房间码，使冲突必然发生
        let store = test_store(2, 2, 3);
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();
        for i in 0..200 {
            let (m, rx) = member(&format!("p{i}"));
            receivers.push(rx);
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.create_room(m, "Host", "cat", None).await.unwrap().0
            }));
        }

        let mut codes = HashSet::new();
        for task in tasks {
            assert!(codes.insert(task.await.unwrap()), "duplicate room code issued");
        }
        assert_eq!(store.len().await, 200);
    }

    #[tokio::test]
    async fn join_full_room_is_rejected() {
        let store = test_store(6, 2, 3);
        let (alice, _rx_a) = member("alice");
        let (code, host, category) = store.create_room(alice, "Alice", "cat", None).await.unwrap();
        assert!(host.is_host);
        assert_eq!(category, "just_friends");

        let (bob, _rx_b) = member("bob");
        store.join_room(&code.to_lowercase(), bob, "Bob", "dog").await.unwrap();

        let (carol, _rx_c) = member("carol");
        assert!(matches!(
            store.join_room(&code, carol, "Carol", "fox").await,
            Err(AppError::RoomFull)
        ));
        assert_eq!(store.get_room(&code).await.unwrap().players.len(), 2);
    }

    #[tokio::test]
    async fn unknown_room_is_not_found() {
        let store = test_store(6, 2, 3);
        assert!(matches!(store.get_room("ZZZZZZ").await, Err(AppError::RoomNotFound(_))));
        assert!(matches!(store.get_room("bad code").await, Err(AppError::RoomNotFound(_))));
        let (bob, _rx) = member("bob");
        assert!(matches!(
            store.join_room("ZZZZZZ", bob, "Bob", "dog").await,
            Err(AppError::RoomNotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_create_input_is_rejected() {
        let store = test_store(6, 2, 3);
        let (alice, _rx) = member("alice");
        assert!(matches!(
            store.create_room(alice.clone(), "  ", "cat", None).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            store.create_room(alice, "Alice", "cat", Some("nope")).await,
            Err(AppError::Validation(_))
        ));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn host_leaving_promotes_next_and_empty_room_is_removed() {
        let store = test_store(6, 3, 3);
        let (alice, _rx_a) = member("alice");
        let (code, _, _) = store.create_room(alice, "Alice", "cat", None).await.unwrap();
        let (bob, mut rx_b) = member("bob");
        store.join_room(&code, bob, "Bob", "dog").await.unwrap();

        store.leave_room(&code, "alice").await.unwrap();
        wait_for(&mut rx_b, |e| matches!(e, ServerEvent::PlayerLeft { player_id, .. } if player_id == "alice")).await;
        let room = store.get_room(&code).await.unwrap();
        assert_eq!(room.host_id(), Some("bob"));

        store.detach(&code, "bob").await;
        for _ in 0..50 {
            if store.len().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(store.get_room(&code).await, Err(AppError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn full_game_reaches_perfect_match() {
        let store = test_store(6, 2, 3);
        let (alice, mut rx_a) = member("alice");
        let (code, _, _) = store.create_room(alice, "Alice", "cat", Some("just_friends")).await.unwrap();
        let (bob, mut rx_b) = member("bob");
        store.join_room(&code, bob, "Bob", "dog").await.unwrap();

        assert!(matches!(store.start_game(&code, "bob").await, Err(AppError::NotHost)));
        store.start_game(&code, "alice").await.unwrap();

        let mut question = match wait_for(&mut rx_a, |e| matches!(e, ServerEvent::GameStarted { .. })).await {
            ServerEvent::GameStarted { question, total_questions, .. } => {
                assert_eq!(total_questions, 3);
                question
            }
            _ => unreachable!(),
        };

        for round in 0..3 {
            store.submit_answer(&code, "alice", &question.id, "Same").await.unwrap();
            // 重传不会重复计分
            store.submit_answer(&code, "alice", &question.id, "Same").await.unwrap();
            store.submit_answer(&code, "bob", &question.id, "same ").await.unwrap();

            match wait_for(&mut rx_a, |e| matches!(e, ServerEvent::RoundCompleted { .. })).await {
                ServerEvent::RoundCompleted { is_matched, match_score, .. } => {
                    assert!(is_matched);
                    assert_eq!(match_score, round + 1);
                }
                _ => unreachable!(),
            }
            if round < 2 {
                question = match wait_for(&mut rx_a, |e| matches!(e, ServerEvent::NextQuestion { .. })).await {
                    ServerEvent::NextQuestion { question, .. } => question,
                    _ => unreachable!(),
                };
            }
        }

        for rx in [&mut rx_a, &mut rx_b] {
            match wait_for(rx, |e| matches!(e, ServerEvent::GameFinished { .. })).await {
                ServerEvent::GameFinished { percentage, completed_rounds, .. } => {
                    assert_eq!(percentage, 100);
                    assert_eq!(completed_rounds.len(), 3);
                    assert!(completed_rounds.iter().all(|r| r.is_matched));
                }
                _ => unreachable!(),
            }
        }
        assert_eq!(store.get_room(&code).await.unwrap().status, RoomStatus::Finished);
    }

    #[tokio::test]
    async fn chat_and_kick_are_broadcast() {
        let store = test_store(6, 3, 3);
        let (alice, mut rx_a) = member("alice");
        let (code, _, _) = store.create_room(alice, "Alice", "cat", None).await.unwrap();
        let (bob, mut rx_b) = member("bob");
        store.join_room(&code, bob, "Bob", "dog").await.unwrap();

        store.send_message(&code, "bob", "hi there").await.unwrap();
        wait_for(&mut rx_a, |e| matches!(e, ServerEvent::NewMessage { message, .. } if message == "hi there")).await;

        assert!(matches!(store.kick_player(&code, "bob", "alice").await, Err(AppError::NotHost)));
        store.kick_player(&code, "alice", "bob").await.unwrap();
        wait_for(&mut rx_b, |e| matches!(e, ServerEvent::PlayerKicked { player_id, .. } if player_id == "bob")).await;
        assert!(!store.get_room(&code).await.unwrap().has_player("bob"));
    }

    #[tokio::test]
    async fn closed_rooms_leave_the_registry() {
        let store = test_store(6, 2, 3);
        let (alice, mut rx_a) = member("alice");
        let (code, _, _) = store.create_room(alice, "Alice", "cat", None).await.unwrap();

        assert_eq!(store.list_rooms().await.len(), 1);
        store.close_room(&code, "maintenance").await.unwrap();
        wait_for(&mut rx_a, |e| matches!(e, ServerEvent::RoomError { .. })).await;
        for _ in 0..50 {
            if store.len().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(store.list_rooms().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn round_deadline_resolves_with_default_answers() {
        let timings = GameTimings {
            round_timeout: Some(Duration::from_secs(30)),
            result_delay: Duration::from_secs(3),
            finished_ttl: Duration::from_secs(300),
            timeout_policy: TimeoutAnswerPolicy::DefaultAnswer,
        };
        let store = test_store_with(timings, 6, 2, 3);
        let (alice, mut rx_a) = member("alice");
        let (code, _, _) = store.create_room(alice, "Alice", "cat", None).await.unwrap();
        let (bob, _rx_b) = member("bob");
        store.join_room(&code, bob, "Bob", "dog").await.unwrap();
        let started = Instant::now();
        store.start_game(&code, "alice").await.unwrap();

        let question = match wait_for(&mut rx_a, |e| matches!(e, ServerEvent::GameStarted { .. })).await {
            ServerEvent::GameStarted { question, .. } => question,
            _ => unreachable!(),
        };
        store.submit_answer(&code, "alice", &question.id, "yes").await.unwrap();

        // bob 一直不作答，由房间计时器结算
        match wait_for(&mut rx_a, |e| matches!(e, ServerEvent::RoundCompleted { .. })).await {
            ServerEvent::RoundCompleted { all_players_answered, player_answers, .. } => {
                assert!(!all_players_answered);
                let bob = player_answers.iter().find(|a| a.player_id == "bob").unwrap();
                assert!(bob.timed_out);
                assert_eq!(bob.answer.as_deref(), Some(question.default_answer().as_str()));
                let alice = player_answers.iter().find(|a| a.player_id == "alice").unwrap();
                assert!(!alice.timed_out);
            }
            _ => unreachable!(),
        }
        assert!(started.elapsed() >= Duration::from_secs(30));

        wait_for(&mut rx_a, |e| matches!(e, ServerEvent::NextQuestion { .. })).await;
        assert!(started.elapsed() >= Duration::from_secs(33));
    }

    #[tokio::test]
    async fn member_that_stops_reading_is_removed_from_the_room() {
        let store = test_store(6, 3, 3);
        let (alice, mut rx_a) = member("alice");
        let (code, _, _) = store.create_room(alice, "Alice", "cat", None).await.unwrap();
        // room-joined 与 player-joined 正好填满队列，之后 bob 不再读取
        let (bob, _rx_b) = member_with_buffer("bob", 2);
        let bob_outbox = bob.outbox.clone();
        store.join_room(&code, bob, "Bob", "dog").await.unwrap();

        store.send_message(&code, "alice", "still there?").await.unwrap();
        wait_for(&mut rx_a, |e| matches!(e, ServerEvent::PlayerLeft { player_id, .. } if player_id == "bob")).await;

        let room = store.get_room(&code).await.unwrap();
        assert_eq!(room.players.len(), 1);
        assert!(!room.has_player("bob"));
        tokio::time::timeout(Duration::from_secs(1), bob_outbox.overflowed())
            .await
            .expect("slow connection was not told to close");
    }
}
