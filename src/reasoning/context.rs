//! 推理上下文载荷
//!
//! 情境 / 目标 / 里程碑、已获徽章、本条学员消息与裁剪后的历史；序列化为 JSON 作为 user 消息。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scenario::{ActiveScenario, ChannelRole, HistoryEntry};

#[derive(Debug, Clone, Serialize)]
pub struct Milestone {
    pub step: u32,
    pub title: String,
    pub description: String,
    pub objectives: Vec<String>,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub channel: ChannelRole,
    pub content: String,
}

/// 历史条目：sender 为 user（学员）或 bot（人设）
#[derive(Debug, Clone, Serialize)]
pub struct ContextEntry {
    pub sender: &'static str,
    pub name: String,
    pub role: String,
    pub channel: ChannelRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&HistoryEntry> for ContextEntry {
    fn from(entry: &HistoryEntry) -> Self {
        match entry {
            HistoryEntry::Trainee { trainee_id, channel, text, at } => Self {
                sender: "user",
                name: trainee_id.clone(),
                role: "trainee".to_string(),
                channel: *channel,
                content: text.clone(),
                timestamp: *at,
            },
            HistoryEntry::Persona { persona_id, persona_role, channel, text, at } => Self {
                sender: "bot",
                name: persona_id.clone(),
                role: persona_role.clone(),
                channel: *channel,
                content: text.clone(),
                timestamp: *at,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReasoningContext {
    pub scenario_id: String,
    pub title: String,
    pub situation: String,
    pub goal: String,
    pub milestones: Vec<Milestone>,
    pub current_step: u32,
    pub completed_objectives: BTreeMap<u32, Vec<String>>,
    pub badges: Vec<String>,
    pub new_message: NewMessage,
    pub history: Vec<ContextEntry>,
}

impl ReasoningContext {
    pub fn build(scenario: &ActiveScenario, channel: ChannelRole, text: &str) -> Self {
        let def = &scenario.definition;
        Self {
            scenario_id: def.id.clone(),
            title: def.title.clone(),
            situation: if def.situation.is_empty() {
                def.description.clone()
            } else {
                def.situation.clone()
            },
            goal: def.goal.clone(),
            milestones: def
                .steps
                .iter()
                .map(|s| Milestone {
                    step: s.number,
                    title: s.title.clone(),
                    description: s.description.clone(),
                    objectives: s.objectives.clone(),
                    hints: s.hints.clone(),
                })
                .collect(),
            current_step: scenario.current_step,
            completed_objectives: scenario.completed_objectives.clone(),
            badges: scenario.badges.iter().cloned().collect(),
            new_message: NewMessage {
                channel,
                content: text.to_string(),
            },
            history: scenario.history.entries().iter().map(ContextEntry::from).collect(),
        }
    }

    pub fn to_payload(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
