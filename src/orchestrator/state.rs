//! 对外的状态投影
//!
//! 外部（HTTP 层）只看到 ScenarioStatus / ScenarioSummary，不直接持有 ActiveScenario。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scenario::{ActiveScenario, ChannelPair, HistoryEntry, ScenarioPhase};

/// 单个学员演练的完整状态
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioStatus {
    pub trainee_id: String,
    pub trainee_email: String,
    pub scenario_id: String,
    pub scenario_title: String,
    pub phase: ScenarioPhase,
    pub current_step: u32,
    pub last_step: u32,
    pub channels: ChannelPair,
    pub completed_objectives: BTreeMap<u32, Vec<String>>,
    pub badges: Vec<String>,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

/// 列表用的摘要
#[derive(Clone, Debug, Serialize)]
pub struct ScenarioSummary {
    pub trainee_id: String,
    pub trainee_email: String,
    pub scenario_id: String,
    pub phase: ScenarioPhase,
    pub current_step: u32,
    pub badge_count: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&ActiveScenario> for ScenarioStatus {
    fn from(s: &ActiveScenario) -> Self {
        Self {
            trainee_id: s.trainee_id.clone(),
            trainee_email: s.trainee_email.clone(),
            scenario_id: s.definition.id.clone(),
            scenario_title: s.definition.title.clone(),
            phase: s.phase,
            current_step: s.current_step,
            last_step: s.definition.last_step(),
            channels: s.channels.clone(),
            completed_objectives: s.completed_objectives.clone(),
            badges: s.badges.iter().cloned().collect(),
            history: s.history.entries().to_vec(),
            created_at: s.created_at,
        }
    }
}

impl From<&ActiveScenario> for ScenarioSummary {
    fn from(s: &ActiveScenario) -> Self {
        Self {
            trainee_id: s.trainee_id.clone(),
            trainee_email: s.trainee_email.clone(),
            scenario_id: s.definition.id.clone(),
            phase: s.phase,
            current_step: s.current_step,
            badge_count: s.badges.len(),
            created_at: s.created_at,
        }
    }
}
