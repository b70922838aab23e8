// ====================================================================================
// src/cleanup.rs - 空闲房间清理任务
// ====================================================================================
use crate::{
    models::{RoomStatus, RoomSummary},
    store::RoomStore,
};
use std::sync::Arc;
use tokio::time::{self, Duration};

pub struct RoomSweeper {
    rooms: Arc<RoomStore>,
    idle_timeout: Duration,
    interval: Duration,
}

// 只回收仍在等待中的房间；进行中和已结束的房间由各自的计时器处理
fn is_abandoned(summary: &RoomSummary, idle_timeout: Duration) -> bool {
    summary.status == RoomStatus::Waiting && summary.idle_seconds >= idle_timeout.as_secs()
}

impl RoomSweeper {
    pub fn new(rooms: Arc<RoomStore>, idle_timeout: Duration, interval: Duration) -> Self {
        Self { rooms, idle_timeout, interval }
    }

    // 启动定时清理任务
    pub fn start(self) {
        if self.idle_timeout.is_zero() || self.interval.is_zero() {
            tracing::info!("空闲房间清理已禁用");
            return;
        }
        tracing::info!(
            "启动空闲房间清理，间隔: {}秒，超时: {}秒",
            self.interval.as_secs(),
            self.idle_timeout.as_secs()
        );

        tokio::spawn(async move {
            let mut timer = time::interval(self.interval);
            timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                timer.tick().await;
                let closed = self.sweep().await;
                if closed > 0 {
                    tracing::info!("本轮清理关闭了 {} 个空闲房间，剩余 {} 个", closed, self.rooms.len().await);
                }
            }
        });
    }

    pub async fn sweep(&self) -> usize {
        let mut closed = 0;
        for summary in self.rooms.list_rooms().await {
            if !is_abandoned(&summary, self.idle_timeout) {
                continue;
            }
            match self.rooms.close_room(&summary.room_code, "idle timeout").await {
                Ok(()) => closed += 1,
                Err(e) => tracing::debug!(room = %summary.room_code, "清理房间失败: {}", e),
            }
        }
        closed
    }
}
