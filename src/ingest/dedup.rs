//! 入站消息去重与频道活跃度
//!
//! 去重键为 (channel, user, ts)，文本不参与；记录保留 60s，由后台每 30s 清扫一次。
//! 检查与登记在同一把锁内完成，两次几乎同时投递的同一事件只有一个能通过。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    channel: String,
    user: String,
    ts: String,
}

pub struct Deduplicator {
    seen: Mutex<HashMap<DedupKey, Instant>>,
    retention: Duration,
}

impl Deduplicator {
    pub fn new(retention: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// 已在保留窗口内见过则返回 true 且不改状态；否则登记并返回 false
    pub async fn is_duplicate(&self, channel_id: &str, user_id: &str, ts: &str, _text: &str) -> bool {
        let key = DedupKey {
            channel: channel_id.to_string(),
            user: user_id.to_string(),
            ts: ts.to_string(),
        };
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        match seen.get(&key) {
            Some(first_seen) if now.duration_since(*first_seen) < self.retention => true,
            _ => {
                seen.insert(key, now);
                false
            }
        }
    }

    /// 清除超过保留窗口的记录，返回清除数量
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.seen.lock().await;
        let before = seen.len();
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.retention);
        before - seen.len()
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }

    /// 后台清扫任务，token 取消时退出
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = dedup.sweep().await;
                        if purged > 0 {
                            tracing::debug!("Dedup sweep purged {} entries", purged);
                        }
                    }
                }
            }
        })
    }
}

/// 频道最后活跃时间（只用于调整兜底轮询的先后，不影响正确性）
#[derive(Default)]
pub struct ActivityTracker {
    last_seen: Mutex<HashMap<String, Instant>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn touch(&self, channel_id: &str) {
        self.last_seen
            .lock()
            .await
            .insert(channel_id.to_string(), Instant::now());
    }

    pub async fn last_activity(&self, channel_id: &str) -> Option<Instant> {
        self.last_seen.lock().await.get(channel_id).copied()
    }

    pub async fn forget(&self, channel_id: &str) {
        self.last_seen.lock().await.remove(channel_id);
    }

    /// 按最近活跃排序（从未活跃的排最后，保持原相对顺序）
    pub async fn most_recent_first(&self, channels: Vec<String>) -> Vec<String> {
        let last_seen = self.last_seen.lock().await;
        let mut ranked: Vec<_> = channels
            .into_iter()
            .map(|c| (last_seen.get(&c).copied(), c))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        ranked.into_iter().map(|(_, c)| c).collect()
    }
}
