//! 推理结果的结构（同时生成请求用的 JSON Schema）

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::scenario::ChannelRole;

/// 本轮的步骤状态变化
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StepStatus {
    /// 本轮完成的目标
    #[serde(default)]
    pub objectives_fulfilled: Vec<String>,
    /// 跳转目标步骤；None 表示留在当前步骤
    #[serde(default)]
    pub next_step: Option<u32>,
    #[serde(default)]
    pub badges_awarded: Vec<String>,
}

/// 单条人设回复指令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PersonaReply {
    pub persona_id: String,
    pub persona_role: String,
    pub channel: ChannelRole,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StructuredResult {
    pub step_status: StepStatus,
    #[serde(default)]
    pub replies: Vec<PersonaReply>,
    /// 叙述文本，仅供参考，不参与状态迁移
    #[serde(default)]
    pub narrative: String,
}

impl StructuredResult {
    pub const SCHEMA_NAME: &'static str = "drill_turn";

    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(StructuredResult))
            .unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
    }
}
