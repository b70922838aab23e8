// ====================================================================================
// src/models.rs - 数据模型定义
// ====================================================================================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub max_players: usize,
    pub total_questions: usize,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_code: String,
    pub created_at: DateTime<Utc>,
    pub status: RoomStatus,
    /// 按加入顺序排列
    pub players: Vec<Player>,
    pub current_question_index: usize,
    pub questions: Vec<Question>,
    pub settings: RoomSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnsweredQuestion {
    pub question_id: String,
    pub answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub is_host: bool,
    pub score: u32,
    pub answered_questions: Vec<AnsweredQuestion>,
}

impl Player {
    pub fn new(id: impl Into<String>, name: String, avatar: String) -> Self {
        Self {
            id: id.into(),
            name,
            avatar,
            is_host: false,
            score: 0,
            answered_questions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub category: String,
    /// true: 多选题；false: 是/否题
    pub have_answers: bool,
    /// 语言 -> 题目文本
    pub text: BTreeMap<String, String>,
    /// 语言 -> 选项
    #[serde(default)]
    pub answers: BTreeMap<String, Vec<String>>,
}

impl Question {
    // 超时默认答案：多选题取第一个选项（优先 en），是/否题为 "yes"
    pub fn default_answer(&self) -> String {
        if self.have_answers {
            let options = self
                .answers
                .get("en")
                .or_else(|| self.answers.values().next());
            if let Some(first) = options.and_then(|o| o.first()) {
                return first.clone();
            }
        }
        "yes".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub id: String,
    pub question_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAnswer {
    pub player_id: String,
    pub player_name: String,
    /// None: 超时且策略为 skip
    pub answer: Option<String>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedRound {
    pub question: Question,
    pub is_matched: bool,
    pub player_answers: Vec<PlayerAnswer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinPush {
    pub app_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// 客户端 -> 服务端
#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    CreateRoom {
        player_name: String,
        avatar: String,
        #[serde(default)]
        category: Option<String>,
    },
    JoinRoom {
        room_code: String,
        player_name: String,
        avatar: String,
    },
    GetRoom {
        room_code: String,
    },
    LeaveRoom {
        room_code: String,
    },
    KickPlayer {
        room_code: String,
        player_id: String,
    },
    StartGame {
        room_code: String,
    },
    SubmitAnswer {
        question_id: String,
        answer: String,
    },
    SendMessage {
        room_code: String,
        message: String,
    },
    SpendCoins {
        app_user_id: String,
        amount: i64,
        #[serde(default)]
        transaction_type: Option<String>,
    },
    GetCoins {
        app_user_id: String,
    },
    GetCategories {},
}

// 服务端 -> 客户端
#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Connected {
        socket_id: String,
    },
    RoomCreated {
        room_code: String,
        player: Player,
        category: String,
    },
    RoomJoined {
        room_code: String,
        player: Player,
        room: Room,
    },
    PlayerJoined {
        player: Player,
        room: Room,
    },
    RoomData(Room),
    RoomLeft {},
    PlayerLeft {
        player_id: String,
        room: Option<Room>,
    },
    PlayerKicked {
        player_id: String,
        room: Room,
    },
    GameStarted {
        room: Room,
        question: Question,
        total_questions: usize,
    },
    PlayerAnswered {
        player_id: String,
        player_name: String,
    },
    RoundCompleted {
        all_players_answered: bool,
        is_matched: bool,
        player_answers: Vec<PlayerAnswer>,
        question: Question,
        match_score: u32,
        total_questions: usize,
        percentage: u32,
    },
    NextQuestion {
        question: Question,
        current_question_index: usize,
        total_questions: usize,
    },
    GameFinished {
        match_score: u32,
        total_questions: usize,
        percentage: u32,
        completed_rounds: Vec<CompletedRound>,
    },
    NewMessage {
        player_id: String,
        player_name: String,
        avatar: String,
        message: String,
        timestamp: i64,
    },
    CoinsAdded(CoinPush),
    CoinsSpent(CoinPush),
    CoinsBalance {
        app_user_id: String,
        balance: i64,
        version: i64,
    },
    Categories {
        categories: Vec<CategorySummary>,
    },
    RoomError {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::RoomError { message: message.into() }
    }
}

// 管理接口使用的房间概要
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_code: String,
    pub status: RoomStatus,
    pub category: String,
    pub player_count: usize,
    pub created_at: DateTime<Utc>,
    pub idle_seconds: u64,
}

// 数据库写入命令
#[derive(Debug, Clone)]
pub enum DbWriteCommand {
    RoomCreated {
        room_code: String,
        category: String,
        host_name: String,
    },
    GameFinished {
        room_code: String,
        category: String,
        match_score: u32,
        total_questions: usize,
        percentage: u32,
        player_count: usize,
    },
    ChatMessage {
        room_code: String,
        player_id: String,
        player_name: String,
        content: String,
    },
}

// 购买回调请求/响应
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseWebhook {
    pub app_user_id: String,
    pub amount: i64,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseWebhookResponse {
    pub app_user_id: String,
    pub new_balance: i64,
    pub version: i64,
    pub duplicate: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub app_user_id: String,
    pub balance: i64,
    pub version: i64,
}
