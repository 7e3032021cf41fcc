//! 人设目录
//!
//! 所有人设实现 PersonaSender（频道校验 / 发送 / 上下线），由 PersonaDirectory 按 id 注册与查找。
//! dispatch 先校验频道可达（线性退避，最多 3 次），校验通过后再投递（同样的退避表）。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::RwLock;

use crate::core::{DrillError, RetryError, RetryPolicy};
use crate::platform::{MessageRef, MessagingPlatform, PlatformError};

/// 人设向频道发消息的能力
#[async_trait]
pub trait PersonaSender: Send + Sync {
    async fn channel_exists(&self, channel_id: &str) -> Result<bool, PlatformError>;

    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageRef, PlatformError>;

    /// 上线（校验凭据等）
    async fn start(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn stop(&self) {}
}

/// 任何消息平台客户端都可直接作为人设的发送能力（每个人设持有自己身份的客户端）
#[async_trait]
impl<P: MessagingPlatform> PersonaSender for P {
    async fn channel_exists(&self, channel_id: &str) -> Result<bool, PlatformError> {
        MessagingPlatform::channel_exists(self, channel_id).await
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<MessageRef, PlatformError> {
        self.post_message(channel_id, text).await
    }

    async fn start(&self) -> Result<(), PlatformError> {
        self.connect().await
    }
}

/// 已注册的人设：发送能力 + 角色（如 executive / analyst）
struct Registered {
    sender: Arc<dyn PersonaSender>,
    role: String,
}

pub struct PersonaDirectory {
    personas: RwLock<HashMap<String, Registered>>,
    reachable: RwLock<HashSet<String>>,
    policy: RetryPolicy,
}

impl PersonaDirectory {
    /// `policy` 同时用于频道校验与投递
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            personas: RwLock::new(HashMap::new()),
            reachable: RwLock::new(HashSet::new()),
            policy,
        }
    }

    pub async fn register(
        &self,
        persona_id: impl Into<String>,
        role: impl Into<String>,
        sender: Arc<dyn PersonaSender>,
    ) {
        let persona_id = persona_id.into();
        let role = role.into();
        tracing::debug!("Registered persona {} ({})", persona_id, role);
        self.personas
            .write()
            .await
            .insert(persona_id, Registered { sender, role });
    }

    pub async fn resolve(&self, persona_id: &str) -> Result<Arc<dyn PersonaSender>, DrillError> {
        self.personas
            .read()
            .await
            .get(persona_id)
            .map(|p| Arc::clone(&p.sender))
            .ok_or_else(|| DrillError::NotFound(format!("persona {persona_id}")))
    }

    /// 注册时登记的角色；未注册或角色为空时返回 None
    pub async fn role_of(&self, persona_id: &str) -> Option<String> {
        self.personas
            .read()
            .await
            .get(persona_id)
            .map(|p| p.role.clone())
            .filter(|r| !r.is_empty())
    }

    pub async fn persona_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.personas.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 启动全部人设，返回上线成功的数量
    pub async fn start_all(&self) -> usize {
        let personas: Vec<_> = self
            .personas
            .read()
            .await
            .iter()
            .map(|(id, p)| (id.clone(), Arc::clone(&p.sender)))
            .collect();

        let results = join_all(personas.iter().map(|(id, sender)| async move {
            (id.clone(), sender.start().await)
        }))
        .await;

        let mut reachable = self.reachable.write().await;
        for (id, result) in results {
            match result {
                Ok(()) => {
                    reachable.insert(id);
                }
                Err(e) => {
                    tracing::warn!("Persona {} failed to start: {}", id, e);
                    reachable.remove(&id);
                }
            }
        }
        reachable.len()
    }

    pub async fn stop_all(&self) {
        let personas: Vec<_> = self
            .personas
            .read()
            .await
            .values()
            .map(|p| Arc::clone(&p.sender))
            .collect();
        join_all(personas.iter().map(|s| s.stop())).await;
        self.reachable.write().await.clear();
    }

    /// 当前在线的人设
    pub async fn reachable(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.reachable.read().await.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// 校验频道后投递；任何失败都以错误返回，由调用方记录并继续处理同批次其它消息
    pub async fn dispatch(&self, persona_id: &str, channel_id: &str, text: &str) -> Result<MessageRef, DrillError> {
        let sender = self.resolve(persona_id).await?;
        let sender = &sender;

        let verified = self
            .policy
            .run(
                |_| async move {
                    match sender.channel_exists(channel_id).await {
                        Ok(true) => Ok(()),
                        Ok(false) => Err(format!("channel {channel_id} not visible")),
                        Err(e) => Err(e.to_string()),
                    }
                },
                |_| true,
            )
            .await;
        if let Err(e) = verified {
            tracing::warn!(
                "Channel {} unreachable for persona {}: {}",
                channel_id,
                persona_id,
                e.into_inner()
            );
            return Err(DrillError::ChannelUnreachable(channel_id.to_string()));
        }

        self.policy
            .run(|_| sender.send(channel_id, text), |_| true)
            .await
            .map_err(|e| {
                let reason = match e {
                    RetryError::Exhausted { attempts, last } => format!("{last} (after {attempts} attempts)"),
                    RetryError::Aborted(e) => e.to_string(),
                };
                DrillError::DeliveryFailed {
                    channel: channel_id.to_string(),
                    reason,
                }
            })
    }
}
