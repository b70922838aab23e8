// ====================================================================================
// src/connections.rs - 连接计数与用户推送通道
// ====================================================================================
use crate::models::ServerEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use uuid::Uuid;

// RAII Guard for connection counting
pub struct ConnectionGuard {
    count: Arc<AtomicU32>,
}

impl ConnectionGuard {
    pub fn new(count: Arc<AtomicU32>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self { count }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}

/// 单个连接的出站队列。
///
/// 投递不阻塞发送方；队列满说明客户端读得太慢，此时通知连接关闭，
/// 调用方应把该连接当作已离开处理，而不是继续丢事件。
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::Sender<ServerEvent>,
    overflow: Arc<Notify>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, rx) = mpsc::channel(capacity);
        (Self { sender, overflow: Arc::new(Notify::new()) }, rx)
    }

    // 返回 false 表示该连接已失联
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("出站队列已满，断开慢速连接");
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub async fn overflowed(&self) {
        self.overflow.notified().await
    }
}

// appUserId -> 该用户所有在线连接，用于金币推送
#[derive(Default)]
pub struct UserChannels {
    by_user: Mutex<HashMap<String, HashMap<Uuid, Outbox>>>,
}

impl UserChannels {
    pub async fn bind(&self, app_user_id: &str, conn_id: Uuid, outbox: Outbox) {
        self.by_user
            .lock()
            .await
            .entry(app_user_id.to_string())
            .or_default()
            .insert(conn_id, outbox);
    }

    pub async fn unbind(&self, app_user_id: &str, conn_id: Uuid) {
        let mut by_user = self.by_user.lock().await;
        if let Some(conns) = by_user.get_mut(app_user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                by_user.remove(app_user_id);
            }
        }
    }

    // 返回实际送达的连接数
    pub async fn notify(&self, app_user_id: &str, event: ServerEvent) -> usize {
        let by_user = self.by_user.lock().await;
        let Some(conns) = by_user.get(app_user_id) else {
            return 0;
        };
        let mut delivered = 0;
        for (conn_id, outbox) in conns {
            if outbox.push(event.clone()) {
                delivered += 1;
            } else {
                tracing::warn!(%conn_id, app_user_id, "推送金币事件失败");
            }
        }
        delivered
    }
}
