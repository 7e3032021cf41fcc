//! 进行中的演练（每位学员至多一场，进程生命周期内存活）

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{ChannelRole, HistoryEntry, MessageHistory, ScenarioDefinition};

/// 演练阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioPhase {
    /// 频道已建好，正在发送首步预置消息
    Initializing,
    AwaitingTraineeInput,
    /// 推理调用进行中
    ProcessingTurn,
    Ended,
}

/// 一场演练占用的两个平台频道
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelPair {
    pub business: String,
    pub incident: String,
}

impl ChannelPair {
    pub fn new(business: impl Into<String>, incident: impl Into<String>) -> Self {
        Self {
            business: business.into(),
            incident: incident.into(),
        }
    }

    pub fn get(&self, role: ChannelRole) -> &str {
        match role {
            ChannelRole::Business => &self.business,
            ChannelRole::Incident => &self.incident,
        }
    }

    pub fn role_of(&self, channel_id: &str) -> Option<ChannelRole> {
        if self.business == channel_id {
            Some(ChannelRole::Business)
        } else if self.incident == channel_id {
            Some(ChannelRole::Incident)
        } else {
            None
        }
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.role_of(channel_id).is_some()
    }

    pub fn ids(&self) -> [&str; 2] {
        [&self.business, &self.incident]
    }
}

#[derive(Debug, Clone)]
pub struct ActiveScenario {
    pub trainee_id: String,
    pub trainee_email: String,
    pub definition: Arc<ScenarioDefinition>,
    pub current_step: u32,
    pub channels: ChannelPair,
    pub created_at: DateTime<Utc>,
    /// 步骤号 -> 该步已完成的目标（去重，保持首次出现顺序）
    pub completed_objectives: BTreeMap<u32, Vec<String>>,
    pub badges: BTreeSet<String>,
    pub history: MessageHistory,
    pub phase: ScenarioPhase,
}

impl ActiveScenario {
    pub fn new(
        trainee_id: impl Into<String>,
        trainee_email: impl Into<String>,
        definition: Arc<ScenarioDefinition>,
        channels: ChannelPair,
        max_history: usize,
    ) -> Self {
        Self {
            trainee_id: trainee_id.into(),
            trainee_email: trainee_email.into(),
            definition,
            current_step: 1,
            channels,
            created_at: Utc::now(),
            completed_objectives: BTreeMap::new(),
            badges: BTreeSet::new(),
            history: MessageHistory::new(max_history),
            phase: ScenarioPhase::Initializing,
        }
    }

    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// 将本轮完成的目标并入指定步骤的记录
    pub fn merge_objectives(&mut self, step: u32, objectives: &[String]) {
        if objectives.is_empty() {
            return;
        }
        let done = self.completed_objectives.entry(step).or_default();
        for objective in objectives {
            if !done.contains(objective) {
                done.push(objective.clone());
            }
        }
    }

    /// 徽章只增不减
    pub fn award_badges(&mut self, badges: &[String]) {
        self.badges.extend(badges.iter().cloned());
    }

    /// 跳到目标步骤；仅接受 (current, last] 区间内的目标
    pub fn advance_to(&mut self, target: u32) -> bool {
        if target > self.current_step && target <= self.definition.last_step() {
            self.current_step = target;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Step;

    fn definition(steps: u32) -> Arc<ScenarioDefinition> {
        Arc::new(ScenarioDefinition {
            id: "phishing-101".into(),
            title: "Phishing".into(),
            description: String::new(),
            difficulty: None,
            length: None,
            situation: String::new(),
            goal: String::new(),
            steps: (1..=steps)
                .map(|n| Step {
                    number: n,
                    title: format!("Step {n}"),
                    description: String::new(),
                    objectives: vec![],
                    hints: vec![],
                    seed_messages: vec![],
                })
                .collect(),
        })
    }

    fn scenario() -> ActiveScenario {
        ActiveScenario::new("U1", "a@example.com", definition(3), ChannelPair::new("C1", "C2"), 20)
    }

    #[test]
    fn test_advance_is_monotonic_and_bounded() {
        let mut s = scenario();
        assert!(s.advance_to(3));
        assert_eq!(s.current_step, 3);
        assert!(!s.advance_to(2));
        assert!(!s.advance_to(3));
        assert!(!s.advance_to(4));
        assert_eq!(s.current_step, 3);
    }

    #[test]
    fn test_badges_are_union() {
        let mut s = scenario();
        s.award_badges(&["first-responder".into()]);
        s.award_badges(&[]);
        s.award_badges(&["first-responder".into(), "sharp-eye".into()]);
        assert_eq!(s.badges.len(), 2);
        assert!(s.badges.contains("first-responder"));
    }

    #[test]
    fn test_objectives_merge_without_duplicates() {
        let mut s = scenario();
        s.merge_objectives(1, &["report".into()]);
        s.merge_objectives(1, &["report".into(), "isolate".into()]);
        assert_eq!(s.completed_objectives[&1], vec!["report".to_string(), "isolate".to_string()]);
    }

    #[test]
    fn test_channel_roles() {
        let pair = ChannelPair::new("C1", "C2");
        assert_eq!(pair.role_of("C1"), Some(ChannelRole::Business));
        assert_eq!(pair.role_of("C2"), Some(ChannelRole::Incident));
        assert_eq!(pair.role_of("C3"), None);
        assert_eq!(pair.get(ChannelRole::Incident), "C2");
    }
}
