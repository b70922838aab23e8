// ====================================================================================
// src/db.rs - 数据库交互
// ====================================================================================
use crate::error::AppError;
use crate::models::DbWriteCommand;
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(FromRow, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GameResultEntry {
    pub room_code: String,
    pub category: String,
    pub match_score: i64,
    pub total_questions: i64,
    pub percentage: i64,
    pub player_count: i64,
    pub finished_at: i64,
}

#[derive(FromRow, Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredBalance {
    pub balance: i64,
    pub version: i64,
}

// 初始化数据库表
pub async fn migrate(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        CREATE TABLE IF NOT EXISTS coin_balances (
            app_user_id TEXT PRIMARY KEY,
            balance INTEGER NOT NULL CHECK (balance >= 0),
            version INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS coin_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_user_id TEXT NOT NULL,
            delta INTEGER NOT NULL,
            kind TEXT NOT NULL,
            external_id TEXT UNIQUE,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS room_history (id INTEGER PRIMARY KEY AUTOINCREMENT, room_code TEXT NOT NULL, category TEXT NOT NULL, host_name TEXT NOT NULL, created_at INTEGER NOT NULL);
        CREATE TABLE IF NOT EXISTS game_results (id INTEGER PRIMARY KEY AUTOINCREMENT, room_code TEXT NOT NULL, category TEXT NOT NULL, match_score INTEGER NOT NULL, total_questions INTEGER NOT NULL, percentage INTEGER NOT NULL, player_count INTEGER NOT NULL, finished_at INTEGER NOT NULL);
        CREATE TABLE IF NOT EXISTS chat_history (id INTEGER PRIMARY KEY AUTOINCREMENT, room_code TEXT NOT NULL, player_id TEXT NOT NULL, player_name TEXT NOT NULL, content TEXT NOT NULL, created_at INTEGER NOT NULL);

        CREATE INDEX IF NOT EXISTS idx_coin_transactions_user ON coin_transactions(app_user_id);
        CREATE INDEX IF NOT EXISTS idx_game_results_finished_at ON game_results(finished_at);
        CREATE INDEX IF NOT EXISTS idx_chat_history_room_code ON chat_history(room_code);
        ",
    )
    .execute(pool)
    .await?;
    Ok(())
}

// 启动后台数据库写入器
pub fn spawn_db_writer(pool: SqlitePool, mut rx: mpsc::Receiver<DbWriteCommand>) {
    tokio::spawn(async move {
        let mut buffer = Vec::with_capacity(100);
        loop {
            match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                Ok(Some(cmd)) => buffer.push(cmd),
                Ok(None) => {
                    if !buffer.is_empty() {
                        if let Err(e) = write_batch(&pool, &buffer).await {
                            tracing::error!("Failed to write final batch to DB: {}", e);
                        }
                    }
                    break;
                }
                Err(_) => {}
            }
            while buffer.len() < 100 {
                if let Ok(cmd) = rx.try_recv() { buffer.push(cmd); } else { break; }
            }
            if !buffer.is_empty() {
                if let Err(e) = write_batch(&pool, &buffer).await { tracing::error!("Failed to write batch to DB: {}", e); }
                buffer.clear();
            }
        }
        tracing::debug!("历史记录写入器已退出");
    });
}

// 批量写入
async fn write_batch(pool: &SqlitePool, commands: &[DbWriteCommand]) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    for cmd in commands {
        match cmd {
            DbWriteCommand::RoomCreated { room_code, category, host_name } => {
                sqlx::query("INSERT INTO room_history (room_code, category, host_name, created_at) VALUES (?, ?, ?, ?)")
                    .bind(room_code).bind(category).bind(host_name).bind(now)
                    .execute(&mut *tx).await?;
            }
            DbWriteCommand::GameFinished { room_code, category, match_score, total_questions, percentage, player_count } => {
                sqlx::query("INSERT INTO game_results (room_code, category, match_score, total_questions, percentage, player_count, finished_at) VALUES (?, ?, ?, ?, ?, ?, ?)")
                    .bind(room_code).bind(category)
                    .bind(*match_score as i64).bind(*total_questions as i64)
                    .bind(*percentage as i64).bind(*player_count as i64).bind(now)
                    .execute(&mut *tx).await?;
            }
            DbWriteCommand::ChatMessage { room_code, player_id, player_name, content } => {
                sqlx::query("INSERT INTO chat_history (room_code, player_id, player_name, content, created_at) VALUES (?, ?, ?, ?, ?)")
                    .bind(room_code).bind(player_id).bind(player_name).bind(content).bind(now)
                    .execute(&mut *tx).await?;
            }
        }
    }
    tx.commit().await?;
    Ok(())
}

// 最近的游戏结果
pub async fn recent_game_results(pool: &SqlitePool, limit: u32) -> Result<Vec<GameResultEntry>, AppError> {
    sqlx::query_as(
        "SELECT room_code, category, match_score, total_questions, percentage, player_count, finished_at
         FROM game_results ORDER BY finished_at DESC, id DESC LIMIT ?",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await
    .map_err(Into::into)
}

// ------------------------------------------------------------------
// 金币账本
// ------------------------------------------------------------------

pub async fn fetch_balance(conn: &mut SqliteConnection, app_user_id: &str) -> Result<Option<StoredBalance>, sqlx::Error> {
    sqlx::query_as("SELECT balance, version FROM coin_balances WHERE app_user_id = ?")
        .bind(app_user_id)
        .fetch_optional(conn)
        .await
}

pub async fn store_balance(
    conn: &mut SqliteConnection,
    app_user_id: &str,
    balance: StoredBalance,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO coin_balances (app_user_id, balance, version, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(app_user_id) DO UPDATE SET balance = excluded.balance, version = excluded.version, updated_at = excluded.updated_at",
    )
    .bind(app_user_id)
    .bind(balance.balance)
    .bind(balance.version)
    .bind(chrono::Utc::now().timestamp())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn record_transaction(
    conn: &mut SqliteConnection,
    app_user_id: &str,
    delta: i64,
    kind: &str,
    external_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO coin_transactions (app_user_id, delta, kind, external_id, created_at) VALUES (?, ?, ?, ?, ?)")
        .bind(app_user_id)
        .bind(delta)
        .bind(kind)
        .bind(external_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn transaction_exists(conn: &mut SqliteConnection, external_id: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM coin_transactions WHERE external_id = ?")
        .bind(external_id)
        .fetch_optional(conn)
        .await?;
    Ok(row.is_some())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // 内存数据库每个连接独立，测试只用一个连接
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&pool).await.unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batched_writer_persists_game_results() {
        let pool = test_pool().await;
        let (tx, rx) = mpsc::channel(16);
        spawn_db_writer(pool.clone(), rx);

        tx.send(DbWriteCommand::GameFinished {
            room_code: "ABC234".into(),
            category: "just_friends".into(),
            match_score: 3,
            total_questions: 3,
            percentage: 100,
            player_count: 2,
        })
        .await
        .unwrap();
        drop(tx);

        let mut results = Vec::new();
        for _ in 0..50 {
            results = recent_game_results(&pool, 10).await.unwrap();
            if !results.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].room_code, "ABC234");
        assert_eq!(results[0].percentage, 100);
    }

    #[tokio::test]
    async fn balance_upsert_round_trip() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        assert_eq!(fetch_balance(&mut conn, "u1").await.unwrap(), None);
        store_balance(&mut conn, "u1", StoredBalance { balance: 40, version: 1 }).await.unwrap();
        store_balance(&mut conn, "u1", StoredBalance { balance: 25, version: 2 }).await.unwrap();
        assert_eq!(
            fetch_balance(&mut conn, "u1").await.unwrap(),
            Some(StoredBalance { balance: 25, version: 2 })
        );

        // CHECK 约束拒绝负余额
        assert!(store_balance(&mut conn, "u1", StoredBalance { balance: -1, version: 3 }).await.is_err());
    }
}
