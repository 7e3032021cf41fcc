//! 内存版消息平台 + 频道开通
//!
//! 记录所有发送 / 开通 / 归档调用；可注入：查无此人、频道不可达、发送失败、开通失败。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ChannelProvisioner, MessageRef, MessagingPlatform, PlatformError, PlatformMessage};
use crate::scenario::ChannelPair;

/// 一次成功的发送
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub text: String,
    /// 发送者标签（人设 id 或 "platform"）
    pub sender: String,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<String, String>,
    channels: HashSet<String>,
    unreachable: HashSet<String>,
    failing_sends: HashSet<String>,
    posts: Vec<PostedMessage>,
    send_attempts: usize,
    inbox: HashMap<String, Vec<PlatformMessage>>,
    archived: Vec<ChannelPair>,
    invites: Vec<(String, Vec<String>)>,
    fail_provisioning: bool,
    provision_delay: Option<Duration>,
}

#[derive(Debug)]
pub struct InMemoryPlatform {
    sender: String,
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self {
            sender: "platform".to_string(),
            inner: Arc::new(Mutex::new(Inner::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// 共享同一份平台状态、以另一身份发消息的句柄（模拟每个人设各自的 bot）
    pub fn as_sender(&self, sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            inner: Arc::clone(&self.inner),
            next_id: Arc::clone(&self.next_id),
        }
    }

    pub async fn add_user(&self, email: &str, user_id: &str) {
        self.inner
            .lock()
            .await
            .users
            .insert(email.to_lowercase(), user_id.to_string());
    }

    pub async fn add_channel(&self, channel_id: &str) {
        self.inner.lock().await.channels.insert(channel_id.to_string());
    }

    /// 频道存在性校验永远失败
    pub async fn set_unreachable(&self, channel_id: &str) {
        self.inner.lock().await.unreachable.insert(channel_id.to_string());
    }

    /// 向该频道发送永远失败
    pub async fn set_failing_send(&self, channel_id: &str) {
        self.inner.lock().await.failing_sends.insert(channel_id.to_string());
    }

    pub async fn set_fail_provisioning(&self, fail: bool) {
        self.inner.lock().await.fail_provisioning = fail;
    }

    /// 建频道前等待（让并发启动交错）
    pub async fn set_provision_delay(&self, delay: Duration) {
        self.inner.lock().await.provision_delay = Some(delay);
    }

    /// 模拟用户在频道里发的消息（供轮询读取）
    pub async fn push_inbox(&self, channel_id: &str, message: PlatformMessage) {
        self.inner
            .lock()
            .await
            .inbox
            .entry(channel_id.to_string())
            .or_default()
            .push(message);
    }

    pub async fn posts(&self) -> Vec<PostedMessage> {
        self.inner.lock().await.posts.clone()
    }

    pub async fn posts_to(&self, channel_id: &str) -> Vec<PostedMessage> {
        self.inner
            .lock()
            .await
            .posts
            .iter()
            .filter(|p| p.channel == channel_id)
            .cloned()
            .collect()
    }

    pub async fn send_attempts(&self) -> usize {
        self.inner.lock().await.send_attempts
    }

    pub async fn archived(&self) -> Vec<ChannelPair> {
        self.inner.lock().await.archived.clone()
    }

    pub async fn invites(&self) -> Vec<(String, Vec<String>)> {
        self.inner.lock().await.invites.clone()
    }

    fn next_ts(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("1700000000.{n:06}")
    }
}

#[async_trait]
impl MessagingPlatform for InMemoryPlatform {
    async fn lookup_user_by_email(&self, email: &str) -> Result<String, PlatformError> {
        self.inner
            .lock()
            .await
            .users
            .get(&email.to_lowercase())
            .cloned()
            .ok_or_else(|| PlatformError::UserNotFound(email.to_string()))
    }

    async fn channel_exists(&self, channel_id: &str) -> Result<bool, PlatformError> {
        let inner = self.inner.lock().await;
        Ok(inner.channels.contains(channel_id) && !inner.unreachable.contains(channel_id))
    }

    async fn post_message(&self, channel_id: &str, text: &str) -> Result<MessageRef, PlatformError> {
        let ts = self.next_ts();
        let mut inner = self.inner.lock().await;
        inner.send_attempts += 1;
        if inner.failing_sends.contains(channel_id) {
            return Err(PlatformError::Api {
                method: "chat.postMessage".to_string(),
                error: "internal_error".to_string(),
            });
        }
        if !inner.channels.contains(channel_id) {
            return Err(PlatformError::ChannelNotFound(channel_id.to_string()));
        }
        inner.posts.push(PostedMessage {
            channel: channel_id.to_string(),
            text: text.to_string(),
            sender: self.sender.clone(),
        });
        Ok(MessageRef {
            channel: channel_id.to_string(),
            ts,
        })
    }

    async fn recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<PlatformMessage>, PlatformError> {
        let inner = self.inner.lock().await;
        let all = inner.inbox.get(channel_id).cloned().unwrap_or_default();
        // 与真实平台一致：最新的在前
        Ok(all.into_iter().rev().take(limit).collect())
    }
}

#[async_trait]
impl ChannelProvisioner for InMemoryPlatform {
    async fn create_channels(&self, _trainee_email: &str, scenario_id: &str) -> Result<ChannelPair, PlatformError> {
        let delay = self.inner.lock().await.provision_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.inner.lock().await;
        if inner.fail_provisioning {
            return Err(PlatformError::Api {
                method: "conversations.create".to_string(),
                error: "restricted_action".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let pair = ChannelPair::new(
            format!("C{scenario_id}-biz-{n}"),
            format!("C{scenario_id}-inc-{n}"),
        );
        inner.channels.insert(pair.business.clone());
        inner.channels.insert(pair.incident.clone());
        Ok(pair)
    }

    async fn archive_channels(&self, channels: &ChannelPair) -> Result<(), PlatformError> {
        let mut inner = self.inner.lock().await;
        inner.channels.remove(&channels.business);
        inner.channels.remove(&channels.incident);
        inner.archived.push(channels.clone());
        Ok(())
    }

    async fn invite_user(&self, email: &str, channel_ids: &[String]) -> Result<(), PlatformError> {
        self.inner
            .lock()
            .await
            .invites
            .push((email.to_string(), channel_ids.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_senders_share_state() {
        let platform = InMemoryPlatform::new();
        platform.add_channel("C1").await;
        let cfo = platform.as_sender("cfo");
        cfo.post_message("C1", "hello").await.unwrap();

        let posts = platform.posts().await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].sender, "cfo");
    }

    #[tokio::test]
    async fn test_recent_messages_newest_first() {
        let platform = InMemoryPlatform::new();
        platform.push_inbox("C1", PlatformMessage::from_user("U1", "a", "1.1")).await;
        platform.push_inbox("C1", PlatformMessage::from_user("U1", "b", "1.2")).await;
        let recent = platform.recent_messages("C1", 5).await.unwrap();
        assert_eq!(recent[0].text, "b");
    }
}
