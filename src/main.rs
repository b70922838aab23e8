// ====================================================================================
// src/main.rs - 应用入口
// ====================================================================================
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cleanup;
mod config;
mod connections;
mod db;
mod error;
mod game;
mod handler;
mod ledger;
mod models;
mod questions;
mod room;
mod routes;
mod state;
mod store;

use cleanup::RoomSweeper;
use config::Config;
use connections::UserChannels;
use ledger::CoinLedger;
use questions::{QuestionBank, QuestionCatalog};
use state::AppState;
use store::{RoomContext, RoomStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志记录
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "match_room_server=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::from_env()?;

    // 连接数据库并运行迁移
    tracing::info!("正在连接数据库: {}", config.database_url);
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    tracing::info!("数据库连接成功，正在运行迁移...");
    db::migrate(&pool).await?;
    tracing::info!("数据库迁移完成");

    // 题库与分类缓存
    let bank = QuestionBank::load(config.question_bank_path.as_deref())?;
    let questions = Arc::new(QuestionCatalog::new(
        Arc::new(bank),
        Duration::from_secs(config.category_cache_ttl_seconds),
    ));

    // 历史记录批量写入任务
    let (db_writer_tx, db_writer_rx) = mpsc::channel(1024);
    db::spawn_db_writer(pool.clone(), db_writer_rx);

    let rooms = RoomStore::new(RoomContext::from_config(&config, questions.clone(), db_writer_tx));

    // 创建共享的应用状态
    let app_state = Arc::new(AppState {
        db_pool: pool.clone(),
        rooms: rooms.clone(),
        ledger: CoinLedger::new(pool, config.max_coin_transaction),
        user_channels: UserChannels::default(),
        questions,
        total_connections: Arc::new(AtomicU32::new(0)),
        config: config.clone(),
    });

    RoomSweeper::new(
        rooms,
        Duration::from_secs(config.room_idle_timeout_seconds),
        Duration::from_secs(config.sweep_interval_seconds),
    )
    .start();

    let app = routes::router(app_state);

    // 启动服务器
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::debug!("服务器正在监听于 {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
