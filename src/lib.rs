//! Drill - 多角色对话式安全演练编排引擎
//!
//! 学员在业务 / 事件两个频道里与若干人设（bot）对话，推理后端决定人设回复与步骤推进。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、有界重试、运行时构建
//! - **llm**: 推理后端传输层（OpenAI 兼容 / Mock）
//! - **reasoning**: 推理上下文、结构化结果、带重试的推理客户端
//! - **scenario**: 场景定义与加载、进行中的演练、消息历史、状态存储
//! - **persona**: 人设目录与投递
//! - **platform**: 消息平台与频道开通（Slack / 内存实现）
//! - **ingest**: 去重、频道活跃度、入站闸门、兜底轮询
//! - **orchestrator**: 演练状态机与状态投影
//! - **integrations**: HTTP 控制面与 Slack 事件回调（feature `server`）

pub mod config;
pub mod core;
pub mod ingest;
#[cfg(feature = "server")]
pub mod integrations;
pub mod llm;
pub mod observability;
pub mod orchestrator;
pub mod persona;
pub mod platform;
pub mod reasoning;
pub mod scenario;

pub use crate::core::{DrillBuilder, DrillError, DrillRuntime};
pub use orchestrator::{ScenarioOrchestrator, TurnOutcome};
