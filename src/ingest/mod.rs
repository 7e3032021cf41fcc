//! 入站消息：去重、活跃度、入口闸门、兜底轮询
//!
//! 实时事件（webhook）与兜底轮询是两个独立的生产者，都经过同一个 [`Ingress`]：
//! 过滤机器人 / 空消息 → 去重 → 记录频道活跃 → 进入同一条 mpsc 队列，由编排器单一消费者处理。

pub mod dedup;
pub mod poller;

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::sync::mpsc;

use crate::platform::PlatformMessage;

pub use dedup::{ActivityTracker, Deduplicator};
pub use poller::{FallbackPoller, PollerSettings};

/// 通过闸门的学员消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: String,
    pub user_id: String,
    pub ts: String,
    pub text: String,
}

/// 一次提交的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressOutcome {
    Accepted,
    Duplicate,
    /// 机器人 / 无用户 / 空文本
    Ignored,
    /// 消费者已退出
    Closed,
}

#[derive(Clone)]
pub struct Ingress {
    dedup: Arc<Deduplicator>,
    activity: Arc<ActivityTracker>,
    tx: mpsc::Sender<InboundMessage>,
}

impl Ingress {
    /// 创建闸门与对应的接收端
    pub fn new(
        dedup: Arc<Deduplicator>,
        activity: Arc<ActivityTracker>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { dedup, activity, tx }, rx)
    }

    pub fn dedup(&self) -> &Arc<Deduplicator> {
        &self.dedup
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    pub async fn submit(&self, channel_id: &str, message: &PlatformMessage) -> IngressOutcome {
        if message.is_bot() {
            return IngressOutcome::Ignored;
        }
        let Some(user_id) = message.user.as_deref() else {
            return IngressOutcome::Ignored;
        };
        let text = strip_mentions(&message.text);
        if text.is_empty() {
            return IngressOutcome::Ignored;
        }

        if self
            .dedup
            .is_duplicate(channel_id, user_id, &message.ts, &text)
            .await
        {
            tracing::debug!("Dropped duplicate message {} in {}", message.ts, channel_id);
            return IngressOutcome::Duplicate;
        }
        self.activity.touch(channel_id).await;

        let inbound = InboundMessage {
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            ts: message.ts.clone(),
            text,
        };
        match self.tx.send(inbound).await {
            Ok(()) => IngressOutcome::Accepted,
            Err(_) => {
                tracing::warn!("Inbound queue closed, dropping message from {}", channel_id);
                IngressOutcome::Closed
            }
        }
    }
}

fn mention_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"<@[A-Z0-9]+>").ok())
        .as_ref()
}

/// 去掉 `<@U123>` 形式的提及并裁剪空白
pub fn strip_mentions(text: &str) -> String {
    match mention_pattern() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}
