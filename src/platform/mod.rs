//! 外部协作方：消息平台客户端与频道开通服务
//!
//! - **MessagingPlatform**: 按邮箱查用户、频道存在性、发消息、拉取最近消息（兜底轮询用）
//! - **ChannelProvisioner**: 为一场演练建业务 / 事件频道、邀请学员、归档
//! - **slack**: Slack Web API 实现（两者兼备）
//! - **memory**: 内存实现，记录全部调用，可注入故障（测试 / 离线演示）

pub mod memory;
pub mod slack;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::scenario::ChannelPair;

pub use memory::InMemoryPlatform;
pub use slack::SlackClient;

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    /// 平台返回 ok=false
    #[error("{method} failed: {error}")]
    Api { method: String, error: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        PlatformError::Http(e.to_string())
    }
}

/// 已发送消息的引用（频道 + 平台时间戳）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRef {
    pub channel: String,
    pub ts: String,
}

/// 从平台拉取到的消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMessage {
    pub user: Option<String>,
    /// 机器人（人设）发出的消息带 bot_id
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
    pub text: String,
    pub ts: String,
}

impl PlatformMessage {
    pub fn from_user(user: impl Into<String>, text: impl Into<String>, ts: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            bot_id: None,
            subtype: None,
            text: text.into(),
            ts: ts.into(),
        }
    }

    pub fn is_bot(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }
}

#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    async fn lookup_user_by_email(&self, email: &str) -> Result<String, PlatformError>;

    async fn channel_exists(&self, channel_id: &str) -> Result<bool, PlatformError>;

    async fn post_message(&self, channel_id: &str, text: &str) -> Result<MessageRef, PlatformError>;

    /// 最近 `limit` 条消息（顺序不保证，调用方自行排序）
    async fn recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<PlatformMessage>, PlatformError>;

    /// 建立连接 / 校验凭据（人设上线时调用）
    async fn connect(&self) -> Result<(), PlatformError> {
        Ok(())
    }
}

#[async_trait]
pub trait ChannelProvisioner: Send + Sync {
    async fn create_channels(&self, trainee_email: &str, scenario_id: &str) -> Result<ChannelPair, PlatformError>;

    async fn archive_channels(&self, channels: &ChannelPair) -> Result<(), PlatformError>;

    async fn invite_user(&self, email: &str, channel_ids: &[String]) -> Result<(), PlatformError>;
}

/// 平台时间戳（"1700000000.000100"）转为可比较的数值
pub fn parse_ts(ts: &str) -> Option<f64> {
    ts.trim().parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_detection() {
        let mut msg = PlatformMessage::from_user("U1", "hi", "1.0");
        assert!(!msg.is_bot());
        msg.bot_id = Some("B1".into());
        assert!(msg.is_bot());
    }

    #[test]
    fn test_parse_ts_orders() {
        assert!(parse_ts("1700000000.000200") > parse_ts("1700000000.000100"));
        assert_eq!(parse_ts("nope"), None);
    }
}
