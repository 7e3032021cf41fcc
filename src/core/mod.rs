//! 核心层：错误类型、有界重试、运行时构建

pub mod builder;
pub mod error;
pub mod retry;

pub use builder::{DrillBuilder, DrillRuntime};
pub use error::DrillError;
pub use retry::{Backoff, RetryError, RetryPolicy};
