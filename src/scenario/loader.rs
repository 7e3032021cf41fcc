//! 场景定义加载器
//!
//! 从 config/scenarios/ 目录读取 `<id>.toml`，首次加载后缓存；`badges.toml` 为静态徽章目录。
//! 目录列举时跳过格式错误的文件（记 warn），不影响其余条目。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

use super::{Badge, CatalogEntry, ScenarioDefinition};
use crate::core::DrillError;

const BADGES_FILE: &str = "badges.toml";

#[derive(Debug, Deserialize)]
struct BadgesToml {
    #[serde(default)]
    badges: Vec<Badge>,
}

pub struct ScenarioLoader {
    scenarios_dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<ScenarioDefinition>>>,
}

impl ScenarioLoader {
    pub fn new(scenarios_dir: impl AsRef<Path>) -> Self {
        Self {
            scenarios_dir: scenarios_dir.as_ref().to_path_buf(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// 从默认位置创建
    pub fn from_default() -> Self {
        let dirs = [
            PathBuf::from("config/scenarios"),
            PathBuf::from("../config/scenarios"),
        ];
        let scenarios_dir = dirs
            .into_iter()
            .find(|d| d.exists())
            .unwrap_or_else(|| PathBuf::from("config/scenarios"));
        Self::new(scenarios_dir)
    }

    pub fn scenarios_dir(&self) -> &Path {
        &self.scenarios_dir
    }

    /// 直接放入一条定义（内置场景 / 测试）
    pub async fn insert(&self, definition: ScenarioDefinition) {
        self.cache
            .write()
            .await
            .insert(definition.id.clone(), Arc::new(definition));
    }

    /// 按 id 加载定义
    pub async fn load(&self, scenario_id: &str) -> Result<Arc<ScenarioDefinition>, DrillError> {
        if let Some(def) = self.cache.read().await.get(scenario_id) {
            return Ok(Arc::clone(def));
        }

        if !is_safe_id(scenario_id) {
            return Err(DrillError::NotFound(format!("scenario {scenario_id}")));
        }
        let path = self.scenarios_dir.join(format!("{scenario_id}.toml"));
        if !path.exists() {
            return Err(DrillError::NotFound(format!("scenario {scenario_id}")));
        }
        let definition = Arc::new(parse_definition(&path)?);
        if definition.id != scenario_id {
            tracing::warn!(
                "Scenario file {:?} declares id '{}', expected '{}'",
                path,
                definition.id,
                scenario_id
            );
        }

        self.cache
            .write()
            .await
            .insert(scenario_id.to_string(), Arc::clone(&definition));
        Ok(definition)
    }

    /// 可用场景目录（磁盘 + 缓存中的内置场景），按 id 排序
    pub async fn catalog(&self) -> Vec<CatalogEntry> {
        let mut entries: HashMap<String, CatalogEntry> = self
            .cache
            .read()
            .await
            .values()
            .map(|d| (d.id.clone(), d.catalog_entry()))
            .collect();

        if let Ok(dir) = std::fs::read_dir(&self.scenarios_dir) {
            for entry in dir.flatten() {
                let path = entry.path();
                let is_toml = path.extension().and_then(|e| e.to_str()) == Some("toml");
                let is_badges = path.file_name().and_then(|n| n.to_str()) == Some(BADGES_FILE);
                if !is_toml || is_badges {
                    continue;
                }
                match parse_definition(&path) {
                    Ok(def) => {
                        entries.entry(def.id.clone()).or_insert_with(|| def.catalog_entry());
                    }
                    Err(e) => {
                        tracing::warn!("Skipping malformed scenario file {:?}: {}", path, e);
                    }
                }
            }
        }

        let mut entries: Vec<_> = entries.into_values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// 静态徽章目录；文件缺失或损坏时返回空
    pub fn badges(&self) -> Vec<Badge> {
        let path = self.scenarios_dir.join(BADGES_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };
        match toml::from_str::<BadgesToml>(&content) {
            Ok(parsed) => parsed.badges,
            Err(e) => {
                tracing::warn!("Malformed badge catalog {:?}: {}", path, e);
                Vec::new()
            }
        }
    }
}

fn parse_definition(path: &Path) -> Result<ScenarioDefinition, DrillError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| DrillError::Config(format!("{}: {e}", path.display())))?;
    toml::from_str(&content).map_err(|e| DrillError::Config(format!("{}: {e}", path.display())))
}

/// 场景 id 只允许字母数字、`-`、`_`，防止路径逃逸
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
