//! 场景定义（静态内容，按 id 加载）

use serde::{Deserialize, Serialize};

/// 频道角色：一场演练中的业务频道 / 事件频道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    Business,
    Incident,
}

impl std::fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRole::Business => write!(f, "business"),
            ChannelRole::Incident => write!(f, "incident"),
        }
    }
}

/// 步骤开始时由人设发出的预置消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedMessage {
    pub persona: String,
    #[serde(default)]
    pub persona_role: Option<String>,
    pub channel: ChannelRole,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub number: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default)]
    pub seed_messages: Vec<SeedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDefinition {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    /// 预计时长（如 "30 min"）
    #[serde(default)]
    pub length: Option<String>,
    /// 初始情境与目标（进入推理上下文）
    #[serde(default)]
    pub situation: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl ScenarioDefinition {
    pub fn step(&self, number: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.number == number)
    }

    pub fn last_step(&self) -> u32 {
        self.steps.iter().map(|s| s.number).max().unwrap_or(1)
    }

    pub fn catalog_entry(&self) -> CatalogEntry {
        CatalogEntry {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            difficulty: self.difficulty.clone(),
            length: self.length.clone(),
        }
    }
}

/// 目录条目（供外部展示）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Option<String>,
    pub length: Option<String>,
}

/// 徽章目录条目（静态）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}
