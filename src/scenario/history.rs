//! 演练消息历史
//!
//! 只追加；超过上限时从最旧一端丢弃，保留最近 N 条且相对顺序不变。

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ChannelRole;

/// 默认历史上限
pub const DEFAULT_MAX_HISTORY: usize = 20;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEntry {
    Trainee {
        trainee_id: String,
        channel: ChannelRole,
        text: String,
        at: DateTime<Utc>,
    },
    Persona {
        persona_id: String,
        persona_role: String,
        channel: ChannelRole,
        text: String,
        at: DateTime<Utc>,
    },
}

impl HistoryEntry {
    pub fn trainee(trainee_id: impl Into<String>, channel: ChannelRole, text: impl Into<String>) -> Self {
        Self::Trainee {
            trainee_id: trainee_id.into(),
            channel,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn persona(
        persona_id: impl Into<String>,
        persona_role: impl Into<String>,
        channel: ChannelRole,
        text: impl Into<String>,
    ) -> Self {
        Self::Persona {
            persona_id: persona_id.into(),
            persona_role: persona_role.into(),
            channel,
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn channel(&self) -> ChannelRole {
        match self {
            Self::Trainee { channel, .. } | Self::Persona { channel, .. } => *channel,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Trainee { text, .. } | Self::Persona { text, .. } => text,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MessageHistory {
    entries: Vec<HistoryEntry>,
    #[serde(skip)]
    max_len: usize,
}

impl MessageHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
        self.prune();
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// 将旧学员 id 的记录改写为新 id（身份重新绑定后调用）
    pub fn retag_trainee(&mut self, old_id: &str, new_id: &str) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if let HistoryEntry::Trainee { trainee_id, .. } = entry {
                if trainee_id == old_id {
                    *trainee_id = new_id.to_string();
                    changed += 1;
                }
            }
        }
        changed
    }

    fn prune(&mut self) {
        if self.entries.len() > self.max_len {
            let excess = self.entries.len() - self.max_len;
            self.entries.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}
