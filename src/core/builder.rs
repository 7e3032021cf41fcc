//! 运行时构建器：从 AppConfig 组装编排器、人设目录、入站闸门与后台任务
//!
//! - 配置了 Slack 管理 token 时使用 Slack Web API，否则使用内存平台（离线演示）
//! - 配置了 LLM API Key 时使用 OpenAI 兼容后端，否则使用 Mock
//! - 后台任务（去重清扫、入站消费者）都挂在同一个 CancellationToken 上

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::RetryPolicy;
use crate::ingest::{ActivityTracker, Deduplicator, FallbackPoller, Ingress, PollerSettings};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::orchestrator::{OrchestratorSettings, ScenarioOrchestrator};
use crate::persona::PersonaDirectory;
use crate::platform::{ChannelProvisioner, InMemoryPlatform, MessagingPlatform, SlackClient};
use crate::reasoning::{ReasoningClient, DEFAULT_INSTRUCTIONS};
use crate::scenario::{ScenarioLoader, ScenarioStore};

/// 入站队列容量
const INBOUND_QUEUE_CAPACITY: usize = 256;

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

pub struct DrillBuilder {
    config: AppConfig,
    instructions: String,
}

impl DrillBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = instructions.to_string();
        self
    }

    /// 从配置的路径或默认位置读取推理指令
    pub fn with_instructions_from_file(mut self) -> Self {
        let configured = self.config.app.instructions_path.clone();
        let found = configured
            .into_iter()
            .chain(
                [
                    "config/prompts/instructions.md",
                    "../config/prompts/instructions.md",
                ]
                .into_iter()
                .map(Into::into),
            )
            .find_map(|p: std::path::PathBuf| std::fs::read_to_string(p).ok());
        if let Some(text) = found {
            self.instructions = text;
        }
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        let llm = &self.config.llm;
        match env_non_empty(&llm.api_key_env) {
            Some(key) => {
                tracing::info!("Reasoning backend: {} ({})", llm.model, llm.base_url.as_deref().unwrap_or("openai"));
                Arc::new(
                    OpenAiClient::new(llm.base_url.as_deref(), &llm.model, Some(&key))
                        .with_strict_schema(llm.strict_schema),
                )
            }
            None => {
                tracing::warn!("{} not set, using mock reasoning backend", llm.api_key_env);
                Arc::new(MockLlmClient::new())
            }
        }
    }

    pub fn build_reasoning(&self, llm: Arc<dyn LlmClient>) -> ReasoningClient {
        let r = &self.config.reasoning;
        ReasoningClient::new(
            llm,
            self.instructions.clone(),
            RetryPolicy::exponential(r.max_attempts, r.base_delay()),
            r.request_timeout(),
        )
    }

    pub fn dispatch_policy(&self) -> RetryPolicy {
        let d = &self.config.dispatch;
        RetryPolicy::linear(d.attempts, Duration::from_millis(d.backoff_step_ms))
    }

    pub fn build_loader(&self) -> ScenarioLoader {
        match &self.config.app.scenarios_dir {
            Some(dir) => ScenarioLoader::new(dir),
            None => ScenarioLoader::from_default(),
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        let app = &self.config.app;
        OrchestratorSettings {
            settle_delay: Duration::from_millis(app.settle_delay_ms),
            apology_text: app.apology_text.clone(),
            system_persona: app.system_persona.clone(),
        }
    }

    /// 按配置选择平台实现并注册全部人设
    pub async fn build(self, token: CancellationToken) -> DrillRuntime {
        let personas = PersonaDirectory::new(self.dispatch_policy());
        let slack = &self.config.slack;

        let (platform, provisioner): (Arc<dyn MessagingPlatform>, Arc<dyn ChannelProvisioner>) =
            match env_non_empty(&slack.bot_token_env) {
                Some(admin_token) => {
                    let admin = SlackClient::new(slack.base_url.as_deref(), admin_token.clone())
                        .with_channel_prefix(slack.channel_prefix.clone());
                    for entry in &self.config.personas {
                        let token = entry
                            .token_env
                            .as_deref()
                            .and_then(env_non_empty)
                            .unwrap_or_else(|| admin_token.clone());
                        personas
                            .register(
                                entry.id.clone(),
                                entry.role.clone(),
                                Arc::new(SlackClient::new(slack.base_url.as_deref(), token)),
                            )
                            .await;
                    }
                    if personas.resolve(&self.config.app.system_persona).await.is_err() {
                        personas
                            .register(self.config.app.system_persona.clone(), "system", Arc::new(admin.clone()))
                            .await;
                    }
                    let platform: Arc<dyn MessagingPlatform> = Arc::new(admin.clone());
                    let provisioner: Arc<dyn ChannelProvisioner> = Arc::new(admin);
                    (platform, provisioner)
                }
                None => {
                    tracing::warn!("{} not set, using in-memory platform", slack.bot_token_env);
                    let memory = InMemoryPlatform::new();
                    for entry in &self.config.personas {
                        personas
                            .register(
                                entry.id.clone(),
                                entry.role.clone(),
                                Arc::new(memory.as_sender(entry.id.clone())),
                            )
                            .await;
                    }
                    if personas.resolve(&self.config.app.system_persona).await.is_err() {
                        let id = self.config.app.system_persona.clone();
                        personas.register(id.clone(), "system", Arc::new(memory.as_sender(id))).await;
                    }
                    let platform: Arc<dyn MessagingPlatform> = Arc::new(memory.as_sender("admin"));
                    let provisioner: Arc<dyn ChannelProvisioner> = Arc::new(memory);
                    (platform, provisioner)
                }
            };

        let llm = self.build_llm();
        self.build_with(platform, provisioner, personas, llm, token).await
    }

    /// 用给定的协作方组装（测试与嵌入场景）
    pub async fn build_with(
        self,
        platform: Arc<dyn MessagingPlatform>,
        provisioner: Arc<dyn ChannelProvisioner>,
        personas: PersonaDirectory,
        llm: Arc<dyn LlmClient>,
        token: CancellationToken,
    ) -> DrillRuntime {
        let mut tasks = Vec::new();

        let dedup = Arc::new(Deduplicator::new(Duration::from_secs(self.config.dedup.retention_secs)));
        tasks.push(dedup.spawn_sweeper(
            Duration::from_secs(self.config.dedup.sweep_interval_secs.max(1)),
            token.clone(),
        ));
        let activity = Arc::new(ActivityTracker::new());
        let (ingress, rx) = Ingress::new(dedup, activity, INBOUND_QUEUE_CAPACITY);

        let personas = Arc::new(personas);
        let online = personas.start_all().await;
        tracing::info!("{} persona(s) online", online);

        let reasoning = Arc::new(self.build_reasoning(Arc::clone(&llm)));
        let loader = Arc::new(self.build_loader());
        let store = Arc::new(ScenarioStore::new(self.config.app.max_history));

        let mut orchestrator = ScenarioOrchestrator::new(
            store,
            loader,
            reasoning,
            Arc::clone(&personas),
            Arc::clone(&platform),
            provisioner,
            self.orchestrator_settings(),
        );

        let poller = if self.config.poller.enabled {
            let p = &self.config.poller;
            let poller = Arc::new(FallbackPoller::new(
                platform,
                ingress.clone(),
                PollerSettings {
                    interval: Duration::from_secs(p.interval_secs.max(1)),
                    channels_per_tick: p.channels_per_tick,
                    fetch_limit: p.fetch_limit,
                },
                token.clone(),
            ));
            orchestrator = orchestrator.with_poller(Arc::clone(&poller));
            Some(poller)
        } else {
            None
        };

        let orchestrator = Arc::new(orchestrator);
        tasks.push(orchestrator.spawn_inbound_consumer(rx, token.clone()));

        DrillRuntime {
            orchestrator,
            personas,
            ingress,
            poller,
            token,
            llm,
            tasks,
        }
    }
}

/// 组装好的运行时
pub struct DrillRuntime {
    pub orchestrator: Arc<ScenarioOrchestrator>,
    pub personas: Arc<PersonaDirectory>,
    /// 实时事件的入口（兜底轮询持有同一闸门的克隆）
    pub ingress: Ingress,
    pub poller: Option<Arc<FallbackPoller>>,
    pub token: CancellationToken,
    llm: Arc<dyn LlmClient>,
    tasks: Vec<JoinHandle<()>>,
}

impl DrillRuntime {
    /// 推理后端累计 token 用量 (prompt, completion)
    pub fn token_usage(&self) -> Option<(u64, u64)> {
        self.llm.token_usage()
    }

    /// 取消后台任务、下线人设并等待任务退出
    pub async fn shutdown(self) {
        self.token.cancel();
        self.personas.stop_all().await;
        for task in self.tasks {
            let _ = task.await;
        }
        if let Some((prompt, completion)) = self.llm.token_usage() {
            tracing::info!(
                prompt_tokens = prompt,
                completion_tokens = completion,
                "Reasoning token usage ({})",
                self.llm.name()
            );
        }
        tracing::info!("Drill runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_build_registers_system_persona() {
        let mut config = AppConfig::default();
        config.slack.bot_token_env = "DRILL_TEST_UNSET_SLACK_TOKEN".into();
        config.llm.api_key_env = "DRILL_TEST_UNSET_LLM_KEY".into();
        config.personas = vec![crate::config::PersonaEntry {
            id: "cfo".into(),
            role: "executive".into(),
            token_env: None,
        }];

        let runtime = DrillBuilder::new(config).build(CancellationToken::new()).await;
        assert_eq!(
            runtime.personas.persona_ids().await,
            vec!["cfo".to_string(), "system".to_string()]
        );
        assert_eq!(runtime.personas.reachable().await.len(), 2);
        assert_eq!(runtime.personas.role_of("cfo").await.as_deref(), Some("executive"));
        assert!(runtime.poller.is_some());
        // Mock 后端不统计用量
        assert_eq!(runtime.token_usage(), None);
        runtime.shutdown().await;
    }

    #[test]
    fn test_dispatch_policy_from_config() {
        let mut config = AppConfig::default();
        config.dispatch.backoff_step_ms = 100;
        let policy = DrillBuilder::new(config).dispatch_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
    }
}
