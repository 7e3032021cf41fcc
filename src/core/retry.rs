//! 有界重试：次数上限 + 退避表 + 可重试判定
//!
//! 推理客户端用指数退避（base, 2*base, 4*base ...），人设投递与频道校验用线性退避（1s, 2s, 3s）。
//! 两处共用同一个 `RetryPolicy::run`。

use std::future::Future;
use std::time::Duration;

/// 两次尝试之间的等待表
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// 第 n 次失败后等待 base * 2^(n-1)
    Exponential { base: Duration },
    /// 第 n 次失败后等待 step * n
    Linear { step: Duration },
}

/// 重试策略：`max_attempts` 为总尝试次数（含首次）
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

/// 重试结束后的失败形态
#[derive(Debug)]
pub enum RetryError<E> {
    /// 判定为不可重试，立即放弃
    Aborted(E),
    /// 次数耗尽，携带最后一次错误
    Exhausted { attempts: u32, last: E },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Aborted(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self::new(max_attempts, Backoff::Exponential { base })
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self::new(max_attempts, Backoff::Linear { step })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 第 `failed_attempt` 次（从 1 开始）失败后的等待时长
    pub fn delay_after(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        match self.backoff {
            Backoff::Exponential { base } => {
                let factor = 2u32.saturating_pow(n - 1);
                base.saturating_mul(factor)
            }
            Backoff::Linear { step } => step.saturating_mul(n),
        }
    }

    /// 执行 `operation`，失败且 `should_retry` 为真时按退避表等待后重试
    pub async fn run<F, Fut, T, E, C>(&self, operation: F, should_retry: C) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        C: Fn(&E) -> bool,
    {
        self.run_with_hint(operation, should_retry, |_| None).await
    }

    /// 同 `run`；错误自带等待提示（如 Retry-After）时等待 max(退避, 提示)
    pub async fn run_with_hint<F, Fut, T, E, C, H>(
        &self,
        mut operation: F,
        should_retry: C,
        hint: H,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        C: Fn(&E) -> bool,
        H: Fn(&E) -> Option<Duration>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !should_retry(&e) => return Err(RetryError::Aborted(e)),
                Err(e) if attempt >= self.max_attempts => {
                    return Err(RetryError::Exhausted { attempts: attempt, last: e })
                }
                Err(e) => {
                    let backoff = self.delay_after(attempt);
                    let delay = hint(&e).map_or(backoff, |h| h.max(backoff));
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
