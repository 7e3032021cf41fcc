//! 演练状态存储
//!
//! 以学员 id 为键的内存登记表；按频道反查仅作为身份漂移时的兜底路径。
//! 存储本身不做任何外部副作用（建频道 / 归档由调用方负责）。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ActiveScenario, ChannelPair, ScenarioDefinition};
use crate::core::DrillError;

pub struct ScenarioStore {
    scenarios: RwLock<HashMap<String, ActiveScenario>>,
    max_history: usize,
}

impl ScenarioStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            scenarios: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    /// 创建演练；学员（按 id 或邮箱）已有进行中的演练或频道被占用时拒绝
    pub async fn create(
        &self,
        trainee_id: &str,
        trainee_email: &str,
        definition: Arc<ScenarioDefinition>,
        channels: ChannelPair,
    ) -> Result<ActiveScenario, DrillError> {
        if channels.business == channels.incident {
            return Err(DrillError::ChannelInUse(channels.business));
        }

        let mut scenarios = self.scenarios.write().await;
        if scenarios.contains_key(trainee_id) {
            return Err(DrillError::DuplicateTrainee(trainee_id.to_string()));
        }
        if let Some(existing) = scenarios
            .values()
            .find(|s| s.trainee_email.eq_ignore_ascii_case(trainee_email))
        {
            return Err(DrillError::DuplicateTrainee(existing.trainee_id.clone()));
        }
        for channel in channels.ids() {
            if scenarios.values().any(|s| s.channels.contains(channel)) {
                return Err(DrillError::ChannelInUse(channel.to_string()));
            }
        }

        let scenario = ActiveScenario::new(
            trainee_id,
            trainee_email,
            definition,
            channels,
            self.max_history,
        );
        scenarios.insert(trainee_id.to_string(), scenario.clone());
        Ok(scenario)
    }

    pub async fn get(&self, trainee_id: &str) -> Result<ActiveScenario, DrillError> {
        self.scenarios
            .read()
            .await
            .get(trainee_id)
            .cloned()
            .ok_or_else(|| DrillError::NotFound(format!("scenario for trainee {trainee_id}")))
    }

    /// 按业务 / 事件频道反查
    pub async fn find_by_channel(&self, channel_id: &str) -> Result<ActiveScenario, DrillError> {
        self.scenarios
            .read()
            .await
            .values()
            .find(|s| s.channels.contains(channel_id))
            .cloned()
            .ok_or_else(|| DrillError::NotFound(format!("scenario for channel {channel_id}")))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<ActiveScenario, DrillError> {
        self.scenarios
            .read()
            .await
            .values()
            .find(|s| s.trainee_email.eq_ignore_ascii_case(email))
            .cloned()
            .ok_or_else(|| DrillError::NotFound(format!("scenario for {email}")))
    }

    /// 身份漂移时把记录迁移到更权威的新 id 下，并改写历史中的旧 id
    pub async fn remap_trainee_id(&self, old_id: &str, new_id: &str) -> Result<(), DrillError> {
        if old_id == new_id {
            return Ok(());
        }
        let mut scenarios = self.scenarios.write().await;
        if scenarios.contains_key(new_id) {
            return Err(DrillError::DuplicateTrainee(new_id.to_string()));
        }
        let mut scenario = scenarios
            .remove(old_id)
            .ok_or_else(|| DrillError::NoActiveScenario(old_id.to_string()))?;
        scenario.trainee_id = new_id.to_string();
        let retagged = scenario.history.retag_trainee(old_id, new_id);
        tracing::info!(
            "Remapped trainee {} -> {} ({} history entries retagged)",
            old_id,
            new_id,
            retagged
        );
        scenarios.insert(new_id.to_string(), scenario);
        Ok(())
    }

    /// 在写锁内修改单条记录；闭包内不得有挂起点
    pub async fn with_scenario<F, R>(&self, trainee_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut ActiveScenario) -> R,
    {
        let mut scenarios = self.scenarios.write().await;
        scenarios.get_mut(trainee_id).map(f)
    }

    pub async fn delete(&self, trainee_id: &str) -> Result<ActiveScenario, DrillError> {
        self.scenarios
            .write()
            .await
            .remove(trainee_id)
            .ok_or_else(|| DrillError::NoActiveScenario(trainee_id.to_string()))
    }

    /// 调用时刻的快照
    pub async fn list_all(&self) -> Vec<ActiveScenario> {
        let mut all: Vec<_> = self.scenarios.read().await.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    pub async fn active_count(&self) -> usize {
        self.scenarios.read().await.len()
    }
}

impl Default for ScenarioStore {
    fn default() -> Self {
        Self::new(super::DEFAULT_MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::{ChannelRole, HistoryEntry};

    fn definition() -> Arc<ScenarioDefinition> {
        Arc::new(ScenarioDefinition {
            id: "phishing-101".into(),
            title: "Phishing".into(),
            description: String::new(),
            difficulty: None,
            length: None,
            situation: String::new(),
            goal: String::new(),
            steps: vec![],
        })
    }

    #[tokio::test]
    async fn test_at_most_one_scenario_per_trainee() {
        let store = ScenarioStore::default();
        store
            .create("U1", "a@example.com", definition(), ChannelPair::new("C1", "C2"))
            .await
            .unwrap();

        let err = store
            .create("U1", "a@example.com", definition(), ChannelPair::new("C3", "C4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DrillError::DuplicateTrainee(_)));
        assert_eq!(store.active_count().await, 1);

        store.delete("U1").await.unwrap();
        store
            .create("U1", "a@example.com", definition(), ChannelPair::new("C3", "C4"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_same_email_under_new_id_is_rejected() {
        let store = ScenarioStore::default();
        store
            .create("trainee-a", "bob@example.com", definition(), ChannelPair::new("C1", "C2"))
            .await
            .unwrap();
        let err = store
            .create("trainee-b", "BOB@example.com", definition(), ChannelPair::new("C3", "C4"))
            .await
            .unwrap_err();
        assert!(matches!(err, DrillError::DuplicateTrainee(ref id) if id == "trainee-a"));
    }

    #[tokio::test]
    async fn test_channels_are_never_shared() {
        let store = ScenarioStore::default();
        store
            .create("U1", "a@example.com", definition(), ChannelPair::new("C1", "C2"))
            .await
            .unwrap();
        let err = store
            .create("U2", "b@example.com", definition(), ChannelPair::new("C9", "C1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DrillError::ChannelInUse(ref c) if c == "C1"));
    }

    #[tokio::test]
    async fn test_find_by_channel_and_email() {
        let store = ScenarioStore::default();
        store
            .create("U1", "Alice@Example.com", definition(), ChannelPair::new("C1", "C2"))
            .await
            .unwrap();

        assert_eq!(store.find_by_channel("C2").await.unwrap().trainee_id, "U1");
        assert!(matches!(store.find_by_channel("C7").await, Err(DrillError::NotFound(_))));
        assert_eq!(store.find_by_email("alice@example.com").await.unwrap().trainee_id, "U1");
    }

    #[tokio::test]
    async fn test_remap_rekeys_and_retags_history() {
        let store = ScenarioStore::default();
        store
            .create("trainee_tmp", "a@example.com", definition(), ChannelPair::new("C1", "C2"))
            .await
            .unwrap();
        store
            .with_scenario("trainee_tmp", |s| {
                s.push_history(HistoryEntry::trainee("trainee_tmp", ChannelRole::Business, "hi"))
            })
            .await;

        store.remap_trainee_id("trainee_tmp", "U42").await.unwrap();

        assert!(store.get("trainee_tmp").await.is_err());
        let scenario = store.get("U42").await.unwrap();
        assert_eq!(scenario.trainee_id, "U42");
        match &scenario.history.entries()[0] {
            HistoryEntry::Trainee { trainee_id, .. } => assert_eq!(trainee_id, "U42"),
            _ => panic!("Expected trainee entry"),
        }
    }

    #[tokio::test]
    async fn test_delete_missing_is_error() {
        let store = ScenarioStore::default();
        assert!(matches!(store.delete("nobody").await, Err(DrillError::NoActiveScenario(_))));
    }
}
