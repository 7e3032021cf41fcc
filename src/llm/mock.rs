//! Mock 推理后端（用于测试与离线演示，无需 API）
//!
//! 按脚本依次返回预置结果；脚本耗尽后重复最后一条。可设置人为延迟以触发超时。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::{LlmClient, LlmError, StructuredRequest};

/// 默认回复：不推进步骤、不发人设消息
const IDLE_RESPONSE: &str =
    r#"{"step_status":{"objectives_fulfilled":[],"next_step":null,"badges_awarded":[]},"replies":[],"narrative":""}"#;

#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    last: Mutex<Option<Result<String, LlmError>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<StructuredRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依次返回的结果
    pub fn scripted(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// 每次调用前等待（超过客户端超时即模拟上游超时）
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<StructuredRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete_structured(&self, request: &StructuredRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().await.pop_front();
        let mut last = self.last.lock().await;
        match next {
            Some(result) => {
                *last = Some(result.clone());
                result
            }
            None => last
                .clone()
                .unwrap_or_else(|| Ok(IDLE_RESPONSE.to_string())),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
