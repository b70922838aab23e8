// ====================================================================================
// src/handler.rs - WebSocket 事件网关
// ====================================================================================
use crate::{
    connections::{ConnectionGuard, Outbox},
    error::AppError,
    ledger::{validate_app_user_id, BalanceUpdate},
    models::{ClientEvent, CoinPush, ServerEvent},
    room::normalize_room_code,
    state::AppState,
    store::Member,
};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const OUTBOUND_BUFFER: usize = 256;

// 单个连接的会话状态；一个连接同时最多在一个房间
struct ClientConnection {
    conn_id: Uuid,
    player_id: String,
    outbox: Outbox,
    current_room: Option<String>,
    app_user_ids: HashSet<String>,
}

impl ClientConnection {
    fn new(conn_id: Uuid, outbox: Outbox) -> Self {
        Self {
            conn_id,
            player_id: conn_id.to_string(),
            outbox,
            current_room: None,
            app_user_ids: HashSet::new(),
        }
    }

    fn member(&self) -> Member {
        Member { id: self.player_id.clone(), outbox: self.outbox.clone() }
    }

    fn send(&self, event: ServerEvent) {
        if !self.outbox.push(event) {
            tracing::warn!(conn_id = %self.conn_id, "发送事件失败");
        }
    }

    fn room_code(&self) -> Result<String, AppError> {
        self.current_room
            .clone()
            .ok_or_else(|| AppError::invalid_state("Not in a room"))
    }

    // 进入新房间成功后才离开旧房间，失败的创建/加入不影响当前房间
    async fn enter_room(&mut self, state: &AppState, room_code: String) {
        if let Some(previous) = self.current_room.replace(room_code) {
            tracing::debug!(conn_id = %self.conn_id, room = %previous, "switching rooms, leaving previous");
            state.rooms.detach(&previous, &self.player_id).await;
        }
    }

    async fn bind_user(&mut self, state: &AppState, app_user_id: &str) {
        if self.app_user_ids.insert(app_user_id.to_string()) {
            state.user_channels.bind(app_user_id, self.conn_id, self.outbox.clone()).await;
        }
    }

    // 连接断开：隐式离开房间并解除金币推送绑定
    async fn disconnect(self, state: &AppState) {
        if let Some(code) = &self.current_room {
            state.rooms.detach(code, &self.player_id).await;
        }
        for app_user_id in &self.app_user_ids {
            state.user_channels.unbind(app_user_id, self.conn_id).await;
        }
    }
}

// 处理单个WebSocket连接
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let _conn_guard = ConnectionGuard::new(state.total_connections.clone());
    let conn_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbox, mut rx) = Outbox::channel(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let overflow = outbox.clone();
    let mut conn = ClientConnection::new(conn_id, outbox);
    conn.send(ServerEvent::Connected { socket_id: conn.player_id.clone() });
    tracing::debug!("连接 {} 已建立", conn_id);

    loop {
        let msg = tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(msg)) => msg,
                _ => break,
            },
            _ = overflow.overflowed() => {
                tracing::warn!(%conn_id, "客户端读取过慢，关闭连接");
                break;
            }
        };
        let parsed = match msg {
            Message::Text(text) => serde_json::from_str::<ClientEvent>(&text),
            Message::Close(_) => break,
            _ => continue,
        };
        match parsed {
            Ok(event) => dispatch(&state, &mut conn, event).await,
            Err(e) => {
                tracing::debug!(%conn_id, "无法解析客户端消息: {}", e);
                conn.send(ServerEvent::error("Invalid message"));
            }
        }
    }

    conn.disconnect(&state).await;
    writer.abort();
    tracing::debug!("连接 {} 已断开", conn_id);
}

async fn dispatch(state: &AppState, conn: &mut ClientConnection, event: ClientEvent) {
    if let Err(e) = handle_event(state, conn, event).await {
        tracing::debug!(conn_id = %conn.conn_id, "request failed: {}", e);
        conn.send(ServerEvent::error(e.client_message()));
    }
}

async fn handle_event(state: &AppState, conn: &mut ClientConnection, event: ClientEvent) -> Result<(), AppError> {
    match event {
        ClientEvent::CreateRoom { player_name, avatar, category } => {
            let (room_code, player, category) = state
                .rooms
                .create_room(conn.member(), &player_name, &avatar, category.as_deref())
                .await?;
            conn.send(ServerEvent::RoomCreated { room_code: room_code.clone(), player, category });
            conn.enter_room(state, room_code).await;
        }
        ClientEvent::JoinRoom { room_code, player_name, avatar } => {
            // room-joined 由房间 actor 发出，保证与广播顺序一致
            let code = state
                .rooms
                .join_room(&normalize_room_code(&room_code), conn.member(), &player_name, &avatar)
                .await?;
            conn.enter_room(state, code).await;
        }
        ClientEvent::GetRoom { room_code } => {
            let room = state.rooms.get_room(&room_code).await?;
            conn.send(ServerEvent::RoomData(room));
        }
        ClientEvent::LeaveRoom { room_code } => {
            let code = normalize_room_code(&room_code);
            let result = state.rooms.leave_room(&code, &conn.player_id).await;
            if conn.current_room.as_deref() == Some(code.as_str()) {
                conn.current_room = None;
            }
            result?;
        }
        ClientEvent::KickPlayer { room_code, player_id } => {
            state.rooms.kick_player(&room_code, &conn.player_id, &player_id).await?;
        }
        ClientEvent::StartGame { room_code } => {
            state.rooms.start_game(&room_code, &conn.player_id).await?;
        }
        ClientEvent::SubmitAnswer { question_id, answer } => {
            let code = conn.room_code()?;
            state.rooms.submit_answer(&code, &conn.player_id, &question_id, &answer).await?;
        }
        ClientEvent::SendMessage { room_code, message } => {
            state.rooms.send_message(&room_code, &conn.player_id, &message).await?;
        }
        ClientEvent::SpendCoins { app_user_id, amount, transaction_type } => {
            let app_user_id = validate_app_user_id(&app_user_id)?.to_string();
            conn.bind_user(state, &app_user_id).await;
            let transaction_type = transaction_type.unwrap_or_else(|| "spend".to_string());
            let result = state.ledger.spend_coins(&app_user_id, amount, &transaction_type).await;
            match coin_push(&app_user_id, &result) {
                Some(push) => {
                    state.user_channels.notify(&app_user_id, ServerEvent::CoinsSpent(push)).await;
                }
                None => {
                    result?;
                }
            }
        }
        ClientEvent::GetCoins { app_user_id } => {
            let app_user_id = validate_app_user_id(&app_user_id)?.to_string();
            conn.bind_user(state, &app_user_id).await;
            let balance = state.ledger.balance(&app_user_id).await?;
            conn.send(ServerEvent::CoinsBalance {
                app_user_id: balance.app_user_id,
                balance: balance.balance,
                version: balance.version,
            });
        }
        ClientEvent::GetCategories {} => {
            let categories = state.questions.categories().await;
            conn.send(ServerEvent::Categories { categories: categories.as_ref().clone() });
        }
    }
    Ok(())
}

/// 账本结果对应的推送；校验类错误不推送，由调用方按 room-error 返回
pub fn coin_push(app_user_id: &str, result: &Result<BalanceUpdate, AppError>) -> Option<CoinPush> {
    match result {
        Ok(update) => Some(CoinPush {
            app_user_id: update.app_user_id.clone(),
            new_balance: Some(update.balance),
            version: Some(update.version),
            success: true,
            error: None,
        }),
        Err(e @ AppError::Persistence(_)) => {
            tracing::error!(app_user_id, "金币账本持久化失败: {}", e);
            Some(CoinPush {
                app_user_id: app_user_id.to_string(),
                new_balance: None,
                version: None,
                success: false,
                error: Some(e.client_message()),
            })
        }
        Err(_) => None,
    }
}
