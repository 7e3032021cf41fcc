//! 场景层：静态定义与加载、进行中的演练、消息历史、状态存储

pub mod active;
pub mod definition;
pub mod history;
pub mod loader;
pub mod store;

pub use active::{ActiveScenario, ChannelPair, ScenarioPhase};
pub use definition::{Badge, CatalogEntry, ChannelRole, ScenarioDefinition, SeedMessage, Step};
pub use history::{HistoryEntry, MessageHistory, DEFAULT_MAX_HISTORY};
pub use loader::ScenarioLoader;
pub use store::ScenarioStore;
