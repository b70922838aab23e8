// ====================================================================================
// src/state.rs - 共享应用状态
// ====================================================================================
use crate::{
    config::Config, connections::UserChannels, ledger::CoinLedger, questions::QuestionCatalog, store::RoomStore,
};
use sqlx::SqlitePool;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

pub struct AppState {
    pub db_pool: SqlitePool,
    pub rooms: Arc<RoomStore>,
    pub ledger: CoinLedger,
    pub user_channels: UserChannels,
    pub questions: Arc<QuestionCatalog>,
    pub total_connections: Arc<AtomicU32>,
    pub config: Config,
}
