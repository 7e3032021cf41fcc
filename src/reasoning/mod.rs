//! 推理层：上下文构建、结构化结果、带重试的推理客户端

pub mod client;
pub mod context;
pub mod types;

pub use client::{parse_result, ReasoningClient, DEFAULT_INSTRUCTIONS};
pub use context::{ContextEntry, Milestone, NewMessage, ReasoningContext};
pub use types::{PersonaReply, StepStatus, StructuredResult};
