// ====================================================================================
// src/ledger.rs - 金币账本
// ====================================================================================
//
// 余额以数据库为准，客户端缓存只作参考。同一用户的读-校验-写在用户级互斥锁内完成，
// 并放在同一个数据库事务中。

use crate::{
    db::{self, StoredBalance},
    error::AppError,
};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const MAX_APP_USER_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub app_user_id: String,
    pub balance: i64,
    /// 每次变更递增，客户端据此丢弃过期推送
    pub version: i64,
    /// 重复的外部交易号，未入账
    pub duplicate: bool,
}

pub struct CoinLedger {
    pool: SqlitePool,
    max_transaction: i64,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

pub fn validate_app_user_id(raw: &str) -> Result<&str, AppError> {
    if raw.is_empty() || raw.len() > MAX_APP_USER_ID_LEN || raw.chars().any(char::is_whitespace) {
        return Err(AppError::validation("Invalid appUserId"));
    }
    Ok(raw)
}

impl CoinLedger {
    pub fn new(pool: SqlitePool, max_transaction: i64) -> Self {
        Self { pool, max_transaction, user_locks: Mutex::new(HashMap::new()) }
    }

    async fn user_lock(&self, app_user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(app_user_id.to_string()).or_default().clone()
    }

    // 无人持有或等待时移除该用户的锁，锁表只保留活跃用户
    async fn release_user_lock(&self, app_user_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().await;
        drop(lock);
        if locks.get(app_user_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(app_user_id);
        }
    }

    fn validate_amount(&self, amount: i64) -> Result<(), AppError> {
        if amount <= 0 || amount > self.max_transaction {
            return Err(AppError::validation(format!(
                "Amount must be between 1 and {}",
                self.max_transaction
            )));
        }
        Ok(())
    }

    pub async fn balance(&self, app_user_id: &str) -> Result<BalanceUpdate, AppError> {
        let app_user_id = validate_app_user_id(app_user_id)?;
        let mut conn = self.pool.acquire().await?;
        let stored = db::fetch_balance(&mut conn, app_user_id).await?.unwrap_or(StoredBalance { balance: 0, version: 0 });
        Ok(BalanceUpdate {
            app_user_id: app_user_id.to_string(),
            balance: stored.balance,
            version: stored.version,
            duplicate: false,
        })
    }

    // 购买回调入账；带外部交易号时保证幂等
    pub async fn add_coins(
        &self,
        app_user_id: &str,
        amount: i64,
        external_id: Option<&str>,
    ) -> Result<BalanceUpdate, AppError> {
        let app_user_id = validate_app_user_id(app_user_id)?;
        self.validate_amount(amount)?;

        let lock = self.user_lock(app_user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.credit(app_user_id, amount, external_id).await
        };
        self.release_user_lock(app_user_id, lock).await;
        result
    }

    async fn credit(
        &self,
        app_user_id: &str,
        amount: i64,
        external_id: Option<&str>,
    ) -> Result<BalanceUpdate, AppError> {
        let mut tx = self.pool.begin().await?;
        let current = db::fetch_balance(&mut tx, app_user_id)
            .await?
            .unwrap_or(StoredBalance { balance: 0, version: 0 });

        if let Some(external_id) = external_id {
            if db::transaction_exists(&mut tx, external_id).await? {
                tracing::warn!(app_user_id, external_id, "重复的购买回调，忽略");
                return Ok(BalanceUpdate {
                    app_user_id: app_user_id.to_string(),
                    balance: current.balance,
                    version: current.version,
                    duplicate: true,
                });
            }
        }

        let balance = current
            .balance
            .checked_add(amount)
            .ok_or_else(|| AppError::validation("Balance overflow"))?;
        let updated = StoredBalance { balance, version: current.version + 1 };
        db::store_balance(&mut tx, app_user_id, updated).await?;
        db::record_transaction(&mut tx, app_user_id, amount, "purchase", external_id).await?;
        tx.commit().await?;

        tracing::info!(app_user_id, amount, balance, "coins added");
        Ok(BalanceUpdate {
            app_user_id: app_user_id.to_string(),
            balance: updated.balance,
            version: updated.version,
            duplicate: false,
        })
    }

    pub async fn spend_coins(
        &self,
        app_user_id: &str,
        amount: i64,
        transaction_type: &str,
    ) -> Result<BalanceUpdate, AppError> {
        let app_user_id = validate_app_user_id(app_user_id)?;
        self.validate_amount(amount)?;

        let lock = self.user_lock(app_user_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.debit(app_user_id, amount, transaction_type).await
        };
        self.release_user_lock(app_user_id, lock).await;
        result
    }

    async fn debit(&self, app_user_id: &str, amount: i64, transaction_type: &str) -> Result<BalanceUpdate, AppError> {
        let mut tx = self.pool.begin().await?;
        let current = db::fetch_balance(&mut tx, app_user_id)
            .await?
            .unwrap_or(StoredBalance { balance: 0, version: 0 });
        if current.balance < amount {
            tracing::debug!(app_user_id, amount, balance = current.balance, "insufficient coins");
            return Err(AppError::InsufficientFunds);
        }

        let updated = StoredBalance { balance: current.balance - amount, version: current.version + 1 };
        db::store_balance(&mut tx, app_user_id, updated).await?;
        db::record_transaction(&mut tx, app_user_id, -amount, transaction_type, None).await?;
        tx.commit().await?;

        tracing::info!(app_user_id, amount, transaction_type, balance = updated.balance, "coins spent");
        Ok(BalanceUpdate {
            app_user_id: app_user_id.to_string(),
            balance: updated.balance,
            version: updated.version,
            duplicate: false,
        })
    }
}
