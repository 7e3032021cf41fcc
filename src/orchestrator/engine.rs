//! 演练编排器：单场演练的状态机
//!
//! Initializing → AwaitingTraineeInput ⇄ ProcessingTurn → Ended
//!
//! - 启动：加载定义 → 开通频道 → 解析学员身份（失败则生成临时 id）→ 入库 → 等待片刻后发送第 1 步预置消息
//! - 每轮：定位演练（学员 id，未命中再按频道）→ 追加学员消息 → 推理 → 应用步骤状态 → 逐条投递人设回复
//! - 推理失败不改步骤 / 徽章，只在学员发言的频道里道歉一次；投递失败只记日志
//! - 结束：归档频道 → 停止轮询 → 移出存储
//!
//! 存储的写锁只在同步闭包内持有；推理与投递两个挂起点都在锁外。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{ScenarioStatus, ScenarioSummary};
use crate::core::DrillError;
use crate::ingest::{FallbackPoller, InboundMessage};
use crate::persona::PersonaDirectory;
use crate::platform::{ChannelProvisioner, MessagingPlatform};
use crate::reasoning::{ReasoningClient, ReasoningContext, StructuredResult};
use crate::scenario::{
    ActiveScenario, Badge, CatalogEntry, ChannelPair, ChannelRole, HistoryEntry, ScenarioLoader,
    ScenarioPhase, ScenarioStore,
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// 频道建好后、发送预置消息前的等待
    pub settle_delay: Duration,
    /// 推理失败时发给学员的道歉文本
    pub apology_text: String,
    /// 发道歉消息用的人设 id
    pub system_persona: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(2),
            apology_text: "Sorry, I'm having trouble responding right now. Please send your message again."
                .to_string(),
            system_persona: "system".to_string(),
        }
    }
}

/// 一轮处理的结果（不向消息平台回传错误，仅供调用方观察）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// 找不到对应演练或频道不属于该演练
    Ignored,
    /// 推理失败，已道歉
    Apologized,
    Applied {
        current_step: u32,
        delivered: usize,
        failed: usize,
    },
}

pub struct ScenarioOrchestrator {
    store: Arc<ScenarioStore>,
    loader: Arc<ScenarioLoader>,
    reasoning: Arc<ReasoningClient>,
    personas: Arc<PersonaDirectory>,
    platform: Arc<dyn MessagingPlatform>,
    provisioner: Arc<dyn ChannelProvisioner>,
    poller: Option<Arc<FallbackPoller>>,
    settings: OrchestratorSettings,
}

impl ScenarioOrchestrator {
    pub fn new(
        store: Arc<ScenarioStore>,
        loader: Arc<ScenarioLoader>,
        reasoning: Arc<ReasoningClient>,
        personas: Arc<PersonaDirectory>,
        platform: Arc<dyn MessagingPlatform>,
        provisioner: Arc<dyn ChannelProvisioner>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            loader,
            reasoning,
            personas,
            platform,
            provisioner,
            poller: None,
            settings,
        }
    }

    /// 启用兜底轮询：开始的演练自动加入监控，结束时移出
    pub fn with_poller(mut self, poller: Arc<FallbackPoller>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn store(&self) -> &Arc<ScenarioStore> {
        &self.store
    }

    pub fn personas(&self) -> &Arc<PersonaDirectory> {
        &self.personas
    }

    pub async fn start_scenario(&self, trainee_email: &str, scenario_id: &str) -> Result<ActiveScenario, DrillError> {
        let definition = self.loader.load(scenario_id).await?;

        let trainee_id = match self.platform.lookup_user_by_email(trainee_email).await {
            Ok(id) => id,
            Err(e) => {
                let generated = format!("trainee-{}", uuid::Uuid::new_v4().simple());
                tracing::warn!(
                    "Identity lookup for {} failed ({}), using generated id {}",
                    trainee_email,
                    e,
                    generated
                );
                generated
            }
        };
        if self.store.get(&trainee_id).await.is_ok() {
            return Err(DrillError::DuplicateTrainee(trainee_id));
        }
        // 身份解析失败时每次都会生成新 id，只能按邮箱拦截
        if let Ok(existing) = self.store.find_by_email(trainee_email).await {
            return Err(DrillError::DuplicateTrainee(existing.trainee_id));
        }

        let channels = self
            .provisioner
            .create_channels(trainee_email, scenario_id)
            .await
            .map_err(|e| DrillError::ScenarioStartFailed(format!("channel provisioning: {e}")))?;

        let channel_ids: Vec<String> = channels.ids().iter().map(|c| c.to_string()).collect();
        if let Err(e) = self.provisioner.invite_user(trainee_email, &channel_ids).await {
            tracing::warn!("Could not invite {} to {:?}: {}", trainee_email, channel_ids, e);
        }

        if let Err(e) = self
            .store
            .create(&trainee_id, trainee_email, Arc::clone(&definition), channels.clone())
            .await
        {
            // 并发启动时另一方先入库，刚建好的这对频道不再有主
            if let Err(archive_err) = self.provisioner.archive_channels(&channels).await {
                tracing::warn!(
                    "Archiving orphaned channels {:?} failed: {}",
                    channel_ids,
                    archive_err
                );
            }
            return Err(e);
        }
        tracing::info!(
            "Started scenario {} for {} ({}) business={} incident={}",
            scenario_id,
            trainee_email,
            trainee_id,
            channels.business,
            channels.incident
        );

        if let Some(poller) = &self.poller {
            for channel in channels.ids() {
                poller.monitor(channel).await;
            }
        }

        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
        self.send_seed_messages(&trainee_id, &channels, 1).await;

        self.store
            .with_scenario(&trainee_id, |s| s.phase = ScenarioPhase::AwaitingTraineeInput)
            .await;
        self.store.get(&trainee_id).await
    }

    async fn send_seed_messages(&self, trainee_id: &str, channels: &ChannelPair, step_number: u32) {
        let Ok(scenario) = self.store.get(trainee_id).await else {
            return;
        };
        let Some(step) = scenario.definition.step(step_number) else {
            tracing::warn!("Scenario {} has no step {}", scenario.definition.id, step_number);
            return;
        };

        for seed in &step.seed_messages {
            let channel_id = channels.get(seed.channel);
            if let Err(e) = self.personas.dispatch(&seed.persona, channel_id, &seed.text).await {
                tracing::warn!("Seed message from {} to {} failed: {}", seed.persona, channel_id, e);
            }
            let role = match &seed.persona_role {
                Some(role) => role.clone(),
                None => self
                    .personas
                    .role_of(&seed.persona)
                    .await
                    .unwrap_or_else(|| seed.persona.clone()),
            };
            self.store
                .with_scenario(trainee_id, |s| {
                    s.push_history(HistoryEntry::persona(&seed.persona, role, seed.channel, &seed.text))
                })
                .await;
        }
    }

    /// 定位学员消息所属的演练：先按学员 id，未命中再按频道
    async fn resolve(&self, trainee_id: &str, channel_id: &str) -> Option<(ActiveScenario, ChannelRole)> {
        let scenario = match self.store.get(trainee_id).await {
            Ok(s) => s,
            Err(_) => match self.store.find_by_channel(channel_id).await {
                Ok(s) => {
                    tracing::warn!(
                        "Identity mismatch: message from {} resolved by channel {} to trainee {}",
                        trainee_id,
                        channel_id,
                        s.trainee_id
                    );
                    s
                }
                Err(_) => {
                    tracing::debug!("No scenario for {} in {}, dropping", trainee_id, channel_id);
                    return None;
                }
            },
        };

        match scenario.channels.role_of(channel_id) {
            Some(role) => Some((scenario, role)),
            None => {
                tracing::warn!(
                    "Channel {} does not belong to scenario of trainee {}, dropping",
                    channel_id,
                    scenario.trainee_id
                );
                None
            }
        }
    }

    pub async fn process_trainee_message(&self, trainee_id: &str, channel_id: &str, text: &str) -> TurnOutcome {
        let Some((scenario, role)) = self.resolve(trainee_id, channel_id).await else {
            return TurnOutcome::Ignored;
        };
        let key = scenario.trainee_id.clone();

        let context = self
            .store
            .with_scenario(&key, |s| {
                // 本条消息只出现在 new_message 中，历史取追加前的快照
                let context = ReasoningContext::build(s, role, text);
                s.push_history(HistoryEntry::trainee(&key, role, text));
                s.phase = ScenarioPhase::ProcessingTurn;
                context
            })
            .await;
        let Some(context) = context else {
            // 处理过程中演练已结束
            return TurnOutcome::Ignored;
        };

        let outcome = match self.reasoning.submit(&context).await {
            Ok(result) => self.apply_result(&key, &scenario.channels, result).await,
            Err(e) => {
                tracing::warn!("Reasoning failed for trainee {}: {}", key, e);
                if let Err(e) = self
                    .personas
                    .dispatch(&self.settings.system_persona, channel_id, &self.settings.apology_text)
                    .await
                {
                    tracing::warn!("Apology to {} failed: {}", channel_id, e);
                }
                TurnOutcome::Apologized
            }
        };

        self.store
            .with_scenario(&key, |s| s.phase = ScenarioPhase::AwaitingTraineeInput)
            .await;
        outcome
    }

    async fn apply_result(&self, key: &str, channels: &ChannelPair, result: StructuredResult) -> TurnOutcome {
        let status = result.step_status;
        let current_step = self
            .store
            .with_scenario(key, |s| {
                let step = s.current_step;
                s.merge_objectives(step, &status.objectives_fulfilled);
                s.award_badges(&status.badges_awarded);
                if let Some(target) = status.next_step {
                    if s.advance_to(target) {
                        tracing::info!("Trainee {} advanced to step {}", key, target);
                    } else if target != step {
                        tracing::warn!(
                            "Ignoring step target {} for trainee {} (current {}, last {})",
                            target,
                            key,
                            step,
                            s.definition.last_step()
                        );
                    }
                }
                s.current_step
            })
            .await;
        let Some(current_step) = current_step else {
            return TurnOutcome::Ignored;
        };

        let mut delivered = 0;
        let mut failed = 0;
        for reply in &result.replies {
            let channel_id = channels.get(reply.channel);
            match self.personas.dispatch(&reply.persona_id, channel_id, &reply.text).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Reply from {} to {} failed: {}", reply.persona_id, channel_id, e);
                }
            }
            // 历史记录的是意图，不论是否送达
            self.store
                .with_scenario(key, |s| {
                    s.push_history(HistoryEntry::persona(
                        &reply.persona_id,
                        &reply.persona_role,
                        reply.channel,
                        &reply.text,
                    ))
                })
                .await;
        }

        TurnOutcome::Applied {
            current_step,
            delivered,
            failed,
        }
    }

    /// 结束演练；频道归档失败只记日志，记录仍会移除
    pub async fn end_scenario(&self, trainee_id: &str) -> Result<ActiveScenario, DrillError> {
        let scenario = self
            .store
            .get(trainee_id)
            .await
            .map_err(|_| DrillError::NoActiveScenario(trainee_id.to_string()))?;

        if let Err(e) = self.provisioner.archive_channels(&scenario.channels).await {
            tracing::warn!("Archiving channels of trainee {} failed: {}", trainee_id, e);
        }
        if let Some(poller) = &self.poller {
            for channel in scenario.channels.ids() {
                poller.unmonitor(channel).await;
            }
        }

        let mut ended = self.store.delete(trainee_id).await?;
        ended.phase = ScenarioPhase::Ended;
        tracing::info!("Ended scenario {} for trainee {}", ended.definition.id, trainee_id);
        Ok(ended)
    }

    pub async fn end_for_email(&self, trainee_email: &str) -> Result<ActiveScenario, DrillError> {
        let scenario = self
            .store
            .find_by_email(trainee_email)
            .await
            .map_err(|_| DrillError::NoActiveScenario(trainee_email.to_string()))?;
        self.end_scenario(&scenario.trainee_id).await
    }

    /// 确认学员的权威 id 后迁移记录（历史中的旧 id 一并改写）
    pub async fn reconcile_identity(&self, old_id: &str, new_id: &str) -> Result<(), DrillError> {
        self.store.remap_trainee_id(old_id, new_id).await
    }

    pub async fn status(&self, trainee_id: &str) -> Result<ScenarioStatus, DrillError> {
        let scenario = self.store.get(trainee_id).await?;
        Ok(ScenarioStatus::from(&scenario))
    }

    pub async fn list_active(&self) -> Vec<ScenarioSummary> {
        self.store
            .list_all()
            .await
            .iter()
            .map(ScenarioSummary::from)
            .collect()
    }

    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        self.loader.catalog().await
    }

    pub fn badges(&self) -> Vec<Badge> {
        self.loader.badges()
    }

    /// 入站队列的唯一消费者：每条消息独立处理，互不阻塞
    pub fn spawn_inbound_consumer(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<InboundMessage>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => break,
                    message = rx.recv() => match message {
                        Some(m) => m,
                        None => break,
                    },
                };
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    orchestrator
                        .process_trainee_message(&message.user_id, &message.channel_id, &message.text)
                        .await;
                });
            }
            tracing::info!("Inbound consumer stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RetryPolicy;
    use crate::llm::{LlmClient, LlmError, MockLlmClient};
    use crate::platform::InMemoryPlatform;
    use crate::scenario::{ScenarioDefinition, SeedMessage, Step};

    fn definition() -> ScenarioDefinition {
        let step = |n: u32, seeds: Vec<SeedMessage>| Step {
            number: n,
            title: format!("Step {n}"),
            description: String::new(),
            objectives: vec!["report".into()],
            hints: vec![],
            seed_messages: seeds,
        };
        ScenarioDefinition {
            id: "phishing-101".into(),
            title: "Phishing".into(),
            description: "Suspicious email".into(),
            difficulty: None,
            length: None,
            situation: String::new(),
            goal: String::new(),
            steps: vec![
                step(
                    1,
                    vec![SeedMessage {
                        persona: "cfo".into(),
                        persona_role: Some("executive".into()),
                        channel: ChannelRole::Business,
                        text: "Did anyone else get this invoice email?".into(),
                    }],
                ),
                step(2, vec![]),
                step(3, vec![]),
            ],
        }
    }

    async fn orchestrator(llm: Arc<dyn LlmClient>) -> (ScenarioOrchestrator, InMemoryPlatform) {
        let platform = InMemoryPlatform::new();
        platform.add_user("alice@example.com", "U1").await;

        let loader = Arc::new(ScenarioLoader::new("does-not-exist"));
        loader.insert(definition()).await;

        let personas = Arc::new(PersonaDirectory::new(RetryPolicy::linear(3, Duration::from_millis(1))));
        for (id, role) in [("cfo", "executive"), ("analyst", "analyst"), ("system", "system")] {
            personas.register(id, role, Arc::new(platform.as_sender(id))).await;
        }

        let reasoning = Arc::new(ReasoningClient::new(
            llm,
            "instructions",
            RetryPolicy::exponential(3, Duration::from_millis(1)),
            Duration::from_millis(50),
        ));
        let orchestrator = ScenarioOrchestrator::new(
            Arc::new(ScenarioStore::default()),
            loader,
            reasoning,
            personas,
            Arc::new(platform.as_sender("admin")),
            Arc::new(platform.as_sender("admin")),
            OrchestratorSettings {
                settle_delay: Duration::ZERO,
                ..Default::default()
            },
        );
        (orchestrator, platform)
    }

    fn reply_json(next_step: Option<u32>, badges: &[&str]) -> String {
        serde_json::json!({
            "step_status": {
                "objectives_fulfilled": ["report"],
                "next_step": next_step,
                "badges_awarded": badges,
            },
            "replies": [
                {"persona_id": "analyst", "persona_role": "analyst", "channel": "incident", "text": "On it."}
            ],
            "narrative": ""
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_start_sends_seed_messages() {
        let (orch, platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        let scenario = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();

        assert_eq!(scenario.trainee_id, "U1");
        assert_eq!(scenario.current_step, 1);
        assert_eq!(scenario.phase, ScenarioPhase::AwaitingTraineeInput);
        assert_eq!(scenario.history.len(), 1);
        assert_eq!(platform.posts_to(&scenario.channels.business).await.len(), 1);
        assert_eq!(platform.invites().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_identity_gets_generated_id() {
        let (orch, _platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        let scenario = orch.start_scenario("bob@example.com", "phishing-101").await.unwrap();
        assert!(scenario.trainee_id.starts_with("trainee-"));
    }

    #[tokio::test]
    async fn test_unresolved_email_cannot_start_twice() {
        let (orch, platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        let first = orch.start_scenario("bob@example.com", "phishing-101").await.unwrap();

        let err = orch.start_scenario("bob@example.com", "phishing-101").await.unwrap_err();
        assert!(matches!(err, DrillError::DuplicateTrainee(ref id) if *id == first.trainee_id));
        assert_eq!(orch.store().active_count().await, 1);
        assert_eq!(platform.invites().await.len(), 1);
    }

    #[tokio::test]
    async fn test_seed_without_role_uses_registered_role() {
        let (orch, _platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        let mut def = definition();
        def.id = "unlabelled".into();
        def.steps[0].seed_messages[0].persona_role = None;
        orch.loader.insert(def).await;

        let scenario = orch.start_scenario("alice@example.com", "unlabelled").await.unwrap();
        assert!(matches!(
            &scenario.history.entries()[0],
            HistoryEntry::Persona { persona_id, persona_role, .. } if persona_id == "cfo" && persona_role == "executive"
        ));
    }

    #[tokio::test]
    async fn test_context_excludes_current_message_from_history() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Ok(reply_json(None, &[]))]));
        let (orch, _platform) = orchestrator(llm.clone()).await;
        let scenario = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();

        orch.process_trainee_message("U1", &scenario.channels.business, "I think this is phishing")
            .await;

        let requests = llm.requests().await;
        let payload: serde_json::Value = serde_json::from_str(&requests[0].payload).unwrap();
        assert_eq!(payload["new_message"]["content"], "I think this is phishing");
        let history = payload["history"].as_array().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0]["sender"], "bot");
        // 本轮结束后学员消息已写入历史
        assert_eq!(orch.status("U1").await.unwrap().history[1].text(), "I think this is phishing");
    }

    #[tokio::test]
    async fn test_concurrent_starts_archive_losing_channels() {
        let (orch, platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        platform.set_provision_delay(Duration::from_millis(20)).await;

        let (a, b) = tokio::join!(
            orch.start_scenario("alice@example.com", "phishing-101"),
            orch.start_scenario("alice@example.com", "phishing-101"),
        );
        let (winner, loser) = match (a, b) {
            (Ok(w), Err(l)) | (Err(l), Ok(w)) => (w, l),
            other => panic!("expected exactly one start to succeed: {other:?}"),
        };
        assert!(matches!(loser, DrillError::DuplicateTrainee(_)));
        assert_eq!(orch.store().active_count().await, 1);

        let archived = platform.archived().await;
        assert_eq!(archived.len(), 1);
        assert_ne!(archived[0], winner.channels);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (orch, _platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();
        let err = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap_err();
        assert!(matches!(err, DrillError::DuplicateTrainee(_)));
    }

    #[tokio::test]
    async fn test_provisioning_failure_aborts_start() {
        let (orch, platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        platform.set_fail_provisioning(true).await;
        let err = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap_err();
        assert!(matches!(err, DrillError::ScenarioStartFailed(_)));
        assert_eq!(orch.store().active_count().await, 0);
    }

    #[tokio::test]
    async fn test_turn_applies_step_status() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Ok(reply_json(Some(2), &["sharp-eye"]))]));
        let (orch, platform) = orchestrator(llm).await;
        let scenario = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();

        let outcome = orch
            .process_trainee_message("U1", &scenario.channels.business, "I think this is phishing")
            .await;
        assert_eq!(
            outcome,
            TurnOutcome::Applied {
                current_step: 2,
                delivered: 1,
                failed: 0
            }
        );

        let status = orch.status("U1").await.unwrap();
        assert_eq!(status.current_step, 2);
        assert_eq!(status.badges, vec!["sharp-eye".to_string()]);
        assert_eq!(status.completed_objectives[&1], vec!["report".to_string()]);
        assert_eq!(status.phase, ScenarioPhase::AwaitingTraineeInput);
        // 预置消息 + 学员消息 + 人设回复
        assert_eq!(status.history.len(), 3);
        assert_eq!(platform.posts_to(&scenario.channels.incident).await.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_step_target_is_ignored() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Ok(reply_json(Some(9), &[]))]));
        let (orch, _platform) = orchestrator(llm).await;
        let scenario = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();

        orch.process_trainee_message("U1", &scenario.channels.business, "hello").await;
        assert_eq!(orch.status("U1").await.unwrap().current_step, 1);
    }

    #[tokio::test]
    async fn test_service_rejection_apologizes() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Err(LlmError::Status {
            status: 401,
            message: "bad key".into(),
        })]));
        let (orch, platform) = orchestrator(llm).await;
        let scenario = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();

        let outcome = orch
            .process_trainee_message("U1", &scenario.channels.incident, "hello")
            .await;
        assert_eq!(outcome, TurnOutcome::Apologized);

        let apologies: Vec<_> = platform
            .posts_to(&scenario.channels.incident)
            .await
            .into_iter()
            .filter(|p| p.sender == "system")
            .collect();
        assert_eq!(apologies.len(), 1);
    }

    #[tokio::test]
    async fn test_channel_fallback_resolves_drifted_identity() {
        let llm = Arc::new(MockLlmClient::scripted(vec![Ok(reply_json(None, &[]))]));
        let (orch, _platform) = orchestrator(llm).await;
        let scenario = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();

        let outcome = orch
            .process_trainee_message("U-other", &scenario.channels.business, "hello")
            .await;
        assert!(matches!(outcome, TurnOutcome::Applied { current_step: 1, .. }));
        // 不会自动迁移记录
        assert!(orch.status("U1").await.is_ok());
    }

    #[tokio::test]
    async fn test_foreign_channel_is_dropped() {
        let llm = Arc::new(MockLlmClient::new());
        let (orch, platform) = orchestrator(llm.clone()).await;
        orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();
        let posts_before = platform.posts().await.len();

        let outcome = orch.process_trainee_message("U1", "C-elsewhere", "hello").await;
        assert_eq!(outcome, TurnOutcome::Ignored);
        assert_eq!(llm.calls(), 0);
        assert_eq!(platform.posts().await.len(), posts_before);
        assert_eq!(orch.status("U1").await.unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_end_archives_and_removes() {
        let (orch, platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        let scenario = orch.start_scenario("alice@example.com", "phishing-101").await.unwrap();

        let ended = orch.end_for_email("ALICE@example.com").await.unwrap();
        assert_eq!(ended.phase, ScenarioPhase::Ended);
        assert_eq!(platform.archived().await, vec![scenario.channels]);
        assert!(orch.list_active().await.is_empty());

        assert!(matches!(orch.end_scenario("U1").await, Err(DrillError::NoActiveScenario(_))));
    }

    #[tokio::test]
    async fn test_reconcile_identity_rekeys() {
        let (orch, _platform) = orchestrator(Arc::new(MockLlmClient::new())).await;
        let scenario = orch.start_scenario("bob@example.com", "phishing-101").await.unwrap();

        orch.reconcile_identity(&scenario.trainee_id, "U2").await.unwrap();
        assert_eq!(orch.status("U2").await.unwrap().trainee_email, "bob@example.com");
        assert!(orch.status(&scenario.trainee_id).await.is_err());
    }
}
