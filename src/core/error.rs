//! 演练错误类型
//!
//! 启动 / 结束失败向 API 层传播；单轮推理失败在编排器内部吸收（频道内道歉），
//! 单条人设消息投递失败只记日志，不中断同批次其余消息。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排引擎对外暴露的错误
#[derive(Error, Debug)]
pub enum DrillError {
    #[error("Trainee already has an active scenario: {0}")]
    DuplicateTrainee(String),

    /// 频道已被另一场演练占用（两场演练永不共享频道）
    #[error("Channel already bound to another scenario: {0}")]
    ChannelInUse(String),

    #[error("No active scenario for trainee: {0}")]
    NoActiveScenario(String),

    #[error("Scenario start failed: {0}")]
    ScenarioStartFailed(String),

    /// 上游明确拒绝（4xx，限流除外），不重试
    #[error("Reasoning service rejected request ({status}): {message}")]
    ReasoningServiceError { status: u16, message: String },

    #[error("Reasoning retries exhausted after {attempts} attempts: {last}")]
    ReasoningExhausted { attempts: u32, last: LlmError },

    #[error("Malformed reasoning response: {0}")]
    MalformedResponse(String),

    #[error("Channel unreachable: {0}")]
    ChannelUnreachable(String),

    #[error("Delivery to {channel} failed: {reason}")]
    DeliveryFailed { channel: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),
}
