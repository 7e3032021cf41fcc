//! Slack Web API 客户端
//!
//! 每个人设持有自己的 bot token，各自构造一个 SlackClient；编排器另用一个管理 token 的实例
//! 负责查用户、建 / 归档频道与兜底轮询。

use async_trait::async_trait;
use serde::Deserialize;

use super::{ChannelProvisioner, MessageRef, MessagingPlatform, PlatformError, PlatformMessage};
use crate::scenario::ChannelPair;

pub const SLACK_BASE_URL: &str = "https://slack.com/api";

/// Slack 频道名长度上限
const MAX_CHANNEL_NAME: usize = 80;

#[derive(Debug, Deserialize)]
struct HistoryMessage {
    user: Option<String>,
    bot_id: Option<String>,
    subtype: Option<String>,
    #[serde(default)]
    text: String,
    ts: String,
}

#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    channel_prefix: String,
}

impl SlackClient {
    pub fn new(base_url: Option<&str>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url
                .unwrap_or(SLACK_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            token: token.into(),
            channel_prefix: "drill".to_string(),
        }
    }

    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    async fn get(&self, method: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, PlatformError> {
        let url = format!("{}/{}", self.base_url, method);
        let resp: serde_json::Value = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?
            .json()
            .await?;
        check_ok(method, resp)
    }

    async fn post(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value, PlatformError> {
        let url = format!("{}/{}", self.base_url, method);
        let resp: serde_json::Value = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        check_ok(method, resp)
    }

    async fn create_channel(&self, name: &str) -> Result<String, PlatformError> {
        let resp = self
            .post(
                "conversations.create",
                serde_json::json!({ "name": name, "is_private": false }),
            )
            .await?;
        resp["channel"]["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PlatformError::Api {
                method: "conversations.create".to_string(),
                error: "missing channel id".to_string(),
            })
    }
}

fn check_ok(method: &str, resp: serde_json::Value) -> Result<serde_json::Value, PlatformError> {
    if resp["ok"].as_bool() == Some(true) {
        Ok(resp)
    } else {
        Err(PlatformError::Api {
            method: method.to_string(),
            error: resp["error"].as_str().unwrap_or("unknown_error").to_string(),
        })
    }
}

fn api_error_is(err: &PlatformError, code: &str) -> bool {
    matches!(err, PlatformError::Api { error, .. } if error == code)
}

/// 生成合法的 Slack 频道名：小写字母数字、`-`、`_`，不超过 80 字符
pub fn channel_name(prefix: &str, scenario_id: &str, email: &str, role: &str, suffix: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let raw = format!("{prefix}-{scenario_id}-{local}-{role}-{suffix}");
    let mut name: String = raw
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if name.len() > MAX_CHANNEL_NAME {
        // 保留结尾的角色与随机后缀，保证唯一
        let tail_len = role.len() + suffix.len() + 2;
        let head = MAX_CHANNEL_NAME - tail_len;
        name = format!("{}-{}", &name[..head], &name[name.len() - (tail_len - 1)..]);
    }
    name
}

#[async_trait]
impl MessagingPlatform for SlackClient {
    async fn lookup_user_by_email(&self, email: &str) -> Result<String, PlatformError> {
        let resp = match self.get("users.lookupByEmail", &[("email", email)]).await {
            Ok(resp) => resp,
            Err(e) if api_error_is(&e, "users_not_found") => {
                return Err(PlatformError::UserNotFound(email.to_string()))
            }
            Err(e) => return Err(e),
        };
        resp["user"]["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| PlatformError::UserNotFound(email.to_string()))
    }

    async fn channel_exists(&self, channel_id: &str) -> Result<bool, PlatformError> {
        match self.get("conversations.info", &[("channel", channel_id)]).await {
            Ok(resp) => Ok(resp["channel"]["is_archived"].as_bool() != Some(true)),
            Err(e) if api_error_is(&e, "channel_not_found") => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn post_message(&self, channel_id: &str, text: &str) -> Result<MessageRef, PlatformError> {
        let resp = self
            .post(
                "chat.postMessage",
                serde_json::json!({ "channel": channel_id, "text": text }),
            )
            .await?;
        Ok(MessageRef {
            channel: resp["channel"].as_str().unwrap_or(channel_id).to_string(),
            ts: resp["ts"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<PlatformMessage>, PlatformError> {
        let limit = limit.to_string();
        let resp = self
            .get("conversations.history", &[("channel", channel_id), ("limit", &limit)])
            .await?;
        let messages: Vec<HistoryMessage> =
            serde_json::from_value(resp["messages"].clone()).unwrap_or_default();
        Ok(messages
            .into_iter()
            .map(|m| PlatformMessage {
                user: m.user,
                bot_id: m.bot_id,
                subtype: m.subtype,
                text: m.text,
                ts: m.ts,
            })
            .collect())
    }

    async fn connect(&self) -> Result<(), PlatformError> {
        self.post("auth.test", serde_json::json!({})).await.map(|_| ())
    }
}

#[async_trait]
impl ChannelProvisioner for SlackClient {
    async fn create_channels(&self, trainee_email: &str, scenario_id: &str) -> Result<ChannelPair, PlatformError> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let suffix = &suffix[..6];
        let business = self
            .create_channel(&channel_name(&self.channel_prefix, scenario_id, trainee_email, "business", suffix))
            .await?;
        let incident = self
            .create_channel(&channel_name(&self.channel_prefix, scenario_id, trainee_email, "incident", suffix))
            .await?;
        tracing::info!("Created channels business={} incident={}", business, incident);
        Ok(ChannelPair::new(business, incident))
    }

    async fn archive_channels(&self, channels: &ChannelPair) -> Result<(), PlatformError> {
        for channel in channels.ids() {
            match self
                .post("conversations.archive", serde_json::json!({ "channel": channel }))
                .await
            {
                Ok(_) => {}
                Err(e) if api_error_is(&e, "already_archived") => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn invite_user(&self, email: &str, channel_ids: &[String]) -> Result<(), PlatformError> {
        let user_id = self.lookup_user_by_email(email).await?;
        for channel in channel_ids {
            match self
                .post(
                    "conversations.invite",
                    serde_json::json!({ "channel": channel, "users": user_id }),
                )
                .await
            {
                Ok(_) => {}
                Err(e) if api_error_is(&e, "already_in_channel") => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
