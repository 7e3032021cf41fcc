//! 推理后端传输层：客户端抽象与实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, TokenUsage, OPENAI_BASE_URL};
pub use traits::{LlmClient, LlmError, StructuredRequest};
