//! 兜底轮询：实时事件可能丢失时，定期拉取受监控频道的最近消息
//!
//! - 每个 tick 最多检查 `channels_per_tick` 个频道，检查过的移到队尾（轮转）
//! - 每个频道维护一个 ts 水位（monitor 时初始化为当前时间），只提交水位之后的消息
//! - 提交经过共享的 [`Ingress`]，实时路径已处理过的消息会被去重挡掉
//! - 受监控集合为空时轮询任务退出，下次 monitor 时重新启动

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{Ingress, IngressOutcome};
use crate::platform::{parse_ts, MessagingPlatform};

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub channels_per_tick: usize,
    pub fetch_limit: usize,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            channels_per_tick: 3,
            fetch_limit: 5,
        }
    }
}

#[derive(Default)]
struct PollState {
    queue: VecDeque<String>,
    watermarks: HashMap<String, f64>,
    running: bool,
}

pub struct FallbackPoller {
    platform: Arc<dyn MessagingPlatform>,
    ingress: Ingress,
    settings: PollerSettings,
    state: Mutex<PollState>,
    token: CancellationToken,
}

impl FallbackPoller {
    pub fn new(
        platform: Arc<dyn MessagingPlatform>,
        ingress: Ingress,
        settings: PollerSettings,
        token: CancellationToken,
    ) -> Self {
        Self {
            platform,
            ingress,
            settings,
            state: Mutex::new(PollState::default()),
            token,
        }
    }

    /// 加入轮询集合；轮询任务未运行时启动
    pub async fn monitor(self: &Arc<Self>, channel_id: &str) {
        let now = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        self.monitor_since(channel_id, now).await;
    }

    /// 同 [`monitor`](Self::monitor)，但显式指定水位
    pub async fn monitor_since(self: &Arc<Self>, channel_id: &str, watermark: f64) {
        let spawn = {
            let mut state = self.state.lock().await;
            if !state.queue.iter().any(|c| c == channel_id) {
                state.queue.push_back(channel_id.to_string());
                state.watermarks.insert(channel_id.to_string(), watermark);
                tracing::debug!("Monitoring channel {}", channel_id);
            }
            if state.running {
                false
            } else {
                state.running = true;
                true
            }
        };
        if spawn {
            let poller = Arc::clone(self);
            tokio::spawn(async move { poller.run().await });
            tracing::info!("Fallback poller started");
        }
    }

    /// 移出轮询集合并清掉该频道的活跃记录
    pub async fn unmonitor(&self, channel_id: &str) {
        {
            let mut state = self.state.lock().await;
            state.queue.retain(|c| c != channel_id);
            state.watermarks.remove(channel_id);
        }
        self.ingress.activity().forget(channel_id).await;
        tracing::debug!("Stopped monitoring channel {}", channel_id);
    }

    pub async fn monitored(&self) -> Vec<String> {
        self.state.lock().await.queue.iter().cloned().collect()
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    self.state.lock().await.running = false;
                    break;
                }
                _ = tokio::time::sleep(self.settings.interval) => {}
            }

            let Some(batch) = self.next_batch().await else {
                tracing::info!("No channels left to monitor, fallback poller stopped");
                break;
            };
            let batch = self.ingress.activity().most_recent_first(batch).await;
            for channel_id in batch {
                self.poll_channel(&channel_id).await;
            }
        }
    }

    /// 取出本轮要检查的频道并轮转到队尾；集合为空时标记停止并返回 None
    async fn next_batch(&self) -> Option<Vec<String>> {
        let mut state = self.state.lock().await;
        if state.queue.is_empty() {
            state.running = false;
            return None;
        }
        let take = self.settings.channels_per_tick.max(1).min(state.queue.len());
        let mut batch = Vec::with_capacity(take);
        for _ in 0..take {
            if let Some(channel) = state.queue.pop_front() {
                state.queue.push_back(channel.clone());
                batch.push(channel);
            }
        }
        Some(batch)
    }

    /// 检查单个频道，返回提交成功的消息数
    pub async fn poll_channel(&self, channel_id: &str) -> usize {
        let Some(watermark) = self.state.lock().await.watermarks.get(channel_id).copied() else {
            return 0;
        };

        let messages = match self
            .platform
            .recent_messages(channel_id, self.settings.fetch_limit)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Fallback poll of {} failed: {}", channel_id, e);
                return 0;
            }
        };

        let mut fresh: Vec<_> = messages
            .into_iter()
            .filter_map(|m| parse_ts(&m.ts).map(|ts| (ts, m)))
            .filter(|(ts, _)| *ts > watermark)
            .collect();
        fresh.sort_by(|a, b| a.0.total_cmp(&b.0));

        let Some(newest) = fresh.last().map(|(ts, _)| *ts) else {
            return 0;
        };

        let mut accepted = 0;
        for (_, message) in &fresh {
            if self.ingress.submit(channel_id, message).await == IngressOutcome::Accepted {
                accepted += 1;
            }
        }

        if let Some(mark) = self.state.lock().await.watermarks.get_mut(channel_id) {
            *mark = mark.max(newest);
        }
        if accepted > 0 {
            tracing::info!("Fallback poll recovered {} message(s) in {}", accepted, channel_id);
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ActivityTracker, Deduplicator, InboundMessage};
    use crate::platform::{InMemoryPlatform, PlatformMessage};
    use tokio::sync::mpsc;

    struct Fixture {
        platform: InMemoryPlatform,
        poller: Arc<FallbackPoller>,
        ingress: Ingress,
        rx: mpsc::Receiver<InboundMessage>,
        token: CancellationToken,
    }

    fn fixture(channels_per_tick: usize) -> Fixture {
        let platform = InMemoryPlatform::new();
        let (ingress, rx) = Ingress::new(
            Arc::new(Deduplicator::new(Duration::from_secs(60))),
            Arc::new(ActivityTracker::new()),
            32,
        );
        let token = CancellationToken::new();
        let poller = Arc::new(FallbackPoller::new(
            Arc::new(platform.as_sender("admin")),
            ingress.clone(),
            PollerSettings {
                interval: Duration::from_millis(10),
                channels_per_tick,
                fetch_limit: 5,
            },
            token.clone(),
        ));
        Fixture {
            platform,
            poller,
            ingress,
            rx,
            token,
        }
    }

    #[tokio::test]
    async fn test_poll_forwards_in_chronological_order() {
        let mut f = fixture(3);
        f.poller.monitor_since("C1", 100.0).await;
        f.token.cancel();

        f.platform.push_inbox("C1", PlatformMessage::from_user("U1", "old", "99.0")).await;
        f.platform.push_inbox("C1", PlatformMessage::from_user("U1", "first", "101.0")).await;
        let mut bot = PlatformMessage::from_user("U9", "persona says", "101.5");
        bot.bot_id = Some("B1".into());
        f.platform.push_inbox("C1", bot).await;
        f.platform.push_inbox("C1", PlatformMessage::from_user("U1", "second", "102.0")).await;

        assert_eq!(f.poller.poll_channel("C1").await, 2);
        assert_eq!(f.rx.recv().await.unwrap().text, "first");
        assert_eq!(f.rx.recv().await.unwrap().text, "second");

        // 水位已前移，再次轮询不会重复提交
        assert_eq!(f.poller.poll_channel("C1").await, 0);
    }

    #[tokio::test]
    async fn test_realtime_path_wins_over_poll() {
        let mut f = fixture(3);
        f.poller.monitor_since("C1", 100.0).await;
        f.token.cancel();

        let msg = PlatformMessage::from_user("U1", "hello", "101.0");
        assert_eq!(f.ingress.submit("C1", &msg).await, IngressOutcome::Accepted);
        f.platform.push_inbox("C1", msg).await;

        assert_eq!(f.poller.poll_channel("C1").await, 0);
        assert_eq!(f.rx.recv().await.unwrap().text, "hello");
        assert!(f.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_round_robin_rotation() {
        let f = fixture(2);
        for c in ["C1", "C2", "C3"] {
            f.poller.monitor_since(c, 0.0).await;
        }
        f.token.cancel();

        assert_eq!(f.poller.next_batch().await.unwrap(), vec!["C1".to_string(), "C2".to_string()]);
        assert_eq!(f.poller.next_batch().await.unwrap(), vec!["C3".to_string(), "C1".to_string()]);
    }

    #[tokio::test]
    async fn test_loop_picks_up_missed_messages_and_stops_when_empty() {
        let mut f = fixture(3);
        f.poller.monitor_since("C1", 100.0).await;
        assert!(f.poller.is_running().await);

        f.platform.push_inbox("C1", PlatformMessage::from_user("U1", "missed", "101.0")).await;
        let inbound = tokio::time::timeout(Duration::from_secs(2), f.rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.text, "missed");

        f.poller.unmonitor("C1").await;
        assert!(f.ingress.activity().last_activity("C1").await.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!f.poller.is_running().await);
        assert!(f.poller.monitored().await.is_empty());
    }
}
