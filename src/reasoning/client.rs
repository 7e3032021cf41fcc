//! 推理客户端：超时、指数退避重试、结果结构校验
//!
//! - 每次尝试独立超时（默认 30s），超时计为瞬时故障
//! - 429 / 5xx / 连接错误重试（429 带 Retry-After 时至少等待该时长），其它 4xx 立即以 ReasoningServiceError 返回
//! - 次数耗尽返回 ReasoningExhausted；结果无法解析为 StructuredResult 返回 MalformedResponse

use std::sync::Arc;
use std::time::Duration;

use crate::core::{DrillError, RetryError, RetryPolicy};
use crate::llm::{LlmClient, LlmError, StructuredRequest};
use crate::reasoning::{ReasoningContext, StructuredResult};

/// 未配置指令文件时的兜底演练指令
pub const DEFAULT_INSTRUCTIONS: &str = "You are the director of a security incident response drill. \
The trainee talks to several personas in a business channel and an incident channel. \
Given the scenario, progress so far, history and the trainee's new message, decide which \
objectives were fulfilled, whether to move to another step, which badges to award, and what \
each persona replies. Respond only with JSON matching the provided schema.";

pub struct ReasoningClient {
    llm: Arc<dyn LlmClient>,
    instructions: String,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ReasoningClient {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        instructions: impl Into<String>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            instructions: instructions.into(),
            policy,
            timeout,
        }
    }

    pub async fn submit(&self, context: &ReasoningContext) -> Result<StructuredResult, DrillError> {
        let request = StructuredRequest {
            instructions: self.instructions.clone(),
            payload: context.to_payload(),
            schema_name: StructuredResult::SCHEMA_NAME.to_string(),
            schema: StructuredResult::json_schema(),
        };
        let request = &request;

        let raw = self
            .policy
            .run_with_hint(
                |attempt| async move {
                    tracing::debug!(attempt, backend = self.llm.name(), "Submitting reasoning request");
                    match tokio::time::timeout(self.timeout, self.llm.complete_structured(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(LlmError::Timeout),
                    }
                },
                LlmError::is_retriable,
                LlmError::retry_after,
            )
            .await
            .map_err(|e| match e {
                RetryError::Aborted(LlmError::Status { status, message }) => {
                    DrillError::ReasoningServiceError { status, message }
                }
                RetryError::Aborted(other) => DrillError::ReasoningServiceError {
                    status: 0,
                    message: other.to_string(),
                },
                RetryError::Exhausted { attempts, last } => {
                    DrillError::ReasoningExhausted { attempts, last }
                }
            })?;

        parse_result(&raw)
    }
}

/// 解析模型输出；容忍外层 ``` 代码块包裹
pub fn parse_result(raw: &str) -> Result<StructuredResult, DrillError> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    if body.is_empty() {
        return Err(DrillError::MalformedResponse("empty response".to_string()));
    }
    serde_json::from_str(body).map_err(|e| DrillError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::scenario::{ActiveScenario, ChannelPair, ChannelRole, ScenarioDefinition};

    const OK: &str = r#"{"step_status":{"objectives_fulfilled":["report"],"next_step":2,"badges_awarded":["sharp-eye"]},"replies":[{"persona_id":"cfo","persona_role":"executive","channel":"business","text":"Thanks!"}],"narrative":"good"}"#;

    fn context() -> ReasoningContext {
        let def = Arc::new(ScenarioDefinition {
            id: "phishing-101".into(),
            title: "Phishing".into(),
            description: String::new(),
            difficulty: None,
            length: None,
            situation: String::new(),
            goal: String::new(),
            steps: vec![],
        });
        let scenario = ActiveScenario::new("U1", "a@example.com", def, ChannelPair::new("C1", "C2"), 20);
        ReasoningContext::build(&scenario, ChannelRole::Business, "hello")
    }

    fn client(llm: Arc<MockLlmClient>, attempts: u32, timeout: Duration) -> ReasoningClient {
        ReasoningClient::new(
            llm,
            DEFAULT_INSTRUCTIONS,
            RetryPolicy::exponential(attempts, Duration::from_millis(1)),
            timeout,
        )
    }

    #[tokio::test]
    async fn test_success_parses_result() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Ok(OK.to_string())]));
        let result = client(llm.clone(), 3, Duration::from_secs(1))
            .submit(&context())
            .await
            .unwrap();
        assert_eq!(result.step_status.next_step, Some(2));
        assert_eq!(result.replies[0].channel, ChannelRole::Business);
        assert_eq!(llm.calls(), 1);

        let requests = llm.requests().await;
        assert_eq!(requests[0].schema_name, StructuredResult::SCHEMA_NAME);
        assert!(requests[0].payload.contains("hello"));
    }

    #[tokio::test]
    async fn test_rate_limit_and_server_errors_retry() {
        let llm = Arc::new(MockLlmClient::scripted(vec![
            Err(LlmError::RateLimited { retry_after_ms: None }),
            Err(LlmError::Status { status: 502, message: "bad gateway".into() }),
            Ok(OK.to_string()),
        ]));
        let result = client(llm.clone(), 3, Duration::from_secs(1)).submit(&context()).await;
        assert!(result.is_ok());
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_waits_for_retry_after() {
        let llm = Arc::new(MockLlmClient::scripted(vec![
            Err(LlmError::RateLimited { retry_after_ms: Some(50) }),
            Ok(OK.to_string()),
        ]));
        let started = tokio::time::Instant::now();
        let result = client(llm.clone(), 3, Duration::from_secs(1)).submit(&context()).await;
        assert!(result.is_ok());
        assert_eq!(llm.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Err(LlmError::Status {
            status: 401,
            message: "invalid api key".into(),
        })]));
        let err = client(llm.clone(), 3, Duration::from_secs(1))
            .submit(&context())
            .await
            .unwrap_err();
        assert!(matches!(err, DrillError::ReasoningServiceError { status: 401, .. }));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_retries() {
        let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(200)));
        let err = client(llm.clone(), 3, Duration::from_millis(10))
            .submit(&context())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DrillError::ReasoningExhausted { attempts: 3, last: LlmError::Timeout }
        ));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_malformed_response() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Ok("not json at all".to_string())]));
        let err = client(llm, 3, Duration::from_secs(1)).submit(&context()).await.unwrap_err();
        assert!(matches!(err, DrillError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_fenced_json() {
        let fenced = format!("```json\n{OK}\n```");
        assert!(parse_result(&fenced).is_ok());
        assert!(matches!(parse_result("  "), Err(DrillError::MalformedResponse(_))));
    }
}
