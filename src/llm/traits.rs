//! 推理后端抽象
//!
//! 所有后端（OpenAI 兼容 HTTP / Mock）实现 LlmClient::complete_structured：
//! 发送 system + user 两段文本与期望的 JSON Schema，返回模型原始文本（应为 JSON）。

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// 结构化补全请求
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// 固定的演练指令（system）
    pub instructions: String,
    /// 序列化后的上下文载荷（user）
    pub payload: String,
    /// 结果 schema 名称
    pub schema_name: String,
    /// 结果 JSON Schema
    pub schema: serde_json::Value,
}

/// 传输层错误：只负责分类，是否重试由调用方决定
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("Request timed out")]
    Timeout,

    /// 429：无论其它 4xx 如何分类，限流总是重试
    #[error("Rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Upstream status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),
}

impl LlmError {
    /// 超时 / 限流 / 5xx / 连接错误视为瞬时故障
    pub fn is_retriable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::RateLimited { .. } | LlmError::Transport(_) => true,
            LlmError::Status { status, .. } => *status >= 500,
        }
    }

    /// 上游要求的最短等待（429 的 Retry-After）
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after_ms } => retry_after_ms.map(Duration::from_millis),
            _ => None,
        }
    }
}

/// 推理后端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_structured(&self, request: &StructuredRequest) -> Result<String, LlmError>;

    /// 后端名称（用于日志）
    fn name(&self) -> &str {
        "llm"
    }

    /// 累计 token 用量 (prompt, completion)；不统计的后端返回 None
    fn token_usage(&self) -> Option<(u64, u64)> {
        None
    }
}
