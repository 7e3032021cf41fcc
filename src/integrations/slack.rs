//! Slack 事件订阅回调
//!
//! Slack 要求回调在 3 秒内返回 200，否则会重投同一事件。
//! 这里解析后立即返回，消息交给入站闸门（重投的事件由去重挡掉）。

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::Deserialize;

use super::ServerState;
use crate::platform::PlatformMessage;

/// 回调顶层（url_verification / event_callback）
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub challenge: Option<String>,
    pub event: Option<MessageEvent>,
}

#[derive(Debug, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub subtype: Option<String>,
    pub channel: Option<String>,
    pub user: Option<String>,
    pub bot_id: Option<String>,
    #[serde(default)]
    pub text: String,
    pub ts: Option<String>,
}

impl MessageEvent {
    /// 只接受普通用户消息（编辑 / 删除 / 机器人消息等带 subtype 的一律忽略）
    pub fn into_platform_message(self) -> Option<(String, PlatformMessage)> {
        if self.type_.as_deref() != Some("message") || self.subtype.is_some() || self.bot_id.is_some() {
            return None;
        }
        let channel = self.channel?;
        let message = PlatformMessage {
            user: Some(self.user?),
            bot_id: None,
            subtype: None,
            text: self.text,
            ts: self.ts?,
        };
        Some((channel, message))
    }
}

pub fn routes() -> Router<Arc<ServerState>> {
    Router::new().route("/slack/events", post(events_handler))
}

/// POST /slack/events
async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<EventEnvelope>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if payload.type_.as_deref() == Some("url_verification") {
        return match payload.challenge {
            Some(challenge) => Ok(Json(serde_json::json!({ "challenge": challenge }))),
            None => Err(StatusCode::BAD_REQUEST),
        };
    }

    let Some((channel, message)) = payload.event.and_then(MessageEvent::into_platform_message) else {
        return Ok(Json(serde_json::json!({})));
    };

    let ingress = state.ingress.clone();
    tokio::spawn(async move {
        let outcome = ingress.submit(&channel, &message).await;
        tracing::debug!("Slack event {} in {}: {:?}", message.ts, channel, outcome);
    });

    Ok(Json(serde_json::json!({})))
}
